//! Device facade: the calls a player front end makes.
//!
//! One [`Device`] owns the audio parsers, the shared [`AudioOutput`] and the
//! main and picture-in-picture [`VideoStream`]s with their decode workers.

use crate::audio::AudioOutput;
use crate::av::{AudioDecoder, CodecId, VideoDecoder};
use crate::config::Config;
use crate::error::Result;
use crate::format::{PesAudioParser, TsDemuxer};
use crate::video::{DecodeWorker, VideoStream, VIDEO_HARD_LIMIT};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Free write segment bytes needed before more audio is taken.
pub const AUDIO_MIN_BUFFER_FREE: usize = 3072 * 8 * 8;
/// Buffered write segment bytes above which audio is refused.
pub const AUDIO_MAX_BUFFERS: usize = 512 * 1024;

const CLEAR_POLLS: usize = 20;
const PIP_STOP_POLLS: usize = 50;
const POLL_STEP_MS: u64 = 15;
/// Sealed video slots above which `poll` reports busy once audio is full.
const POLL_VIDEO_SLOTS: usize = 3;

pub struct Device {
    config: Config,
    audio: Arc<AudioOutput>,
    audio_decoder: Box<dyn AudioDecoder>,
    pes_audio: PesAudioParser,
    ts_audio: TsDemuxer,
    new_audio_stream: bool,
    skip_audio: bool,
    freezed: bool,
    video: Arc<VideoStream>,
    video_worker: Option<DecodeWorker>,
    pip: Arc<VideoStream>,
    pip_worker: Option<DecodeWorker>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("audio", &self.audio)
            .field("skip_audio", &self.skip_audio)
            .field("freezed", &self.freezed)
            .field("video", &self.video)
            .field("pip", &self.pip)
            .finish()
    }
}

impl Device {
    /// Wires a device around an audio output and the decoder feeding it.
    pub fn new(
        config: Config,
        audio: Arc<AudioOutput>,
        audio_decoder: Box<dyn AudioDecoder>,
    ) -> Self {
        let ts_audio = TsDemuxer::new().with_continuity_check(config.ts_continuity_check);
        Self {
            config,
            audio,
            audio_decoder,
            pes_audio: PesAudioParser::new(),
            ts_audio,
            new_audio_stream: false,
            skip_audio: false,
            freezed: false,
            video: Arc::new(VideoStream::new("main")),
            video_worker: None,
            pip: Arc::new(VideoStream::new("pip")),
            pip_worker: None,
        }
    }

    pub fn audio(&self) -> &Arc<AudioOutput> {
        &self.audio
    }

    pub fn video(&self) -> &Arc<VideoStream> {
        &self.video
    }

    pub fn pip(&self) -> &Arc<VideoStream> {
        &self.pip
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ts_audio(&self) -> &TsDemuxer {
        &self.ts_audio
    }

    /// Opens the main video stream and starts its decode worker.
    pub fn start_video(&mut self, decoder: Box<dyn VideoDecoder>) -> Result<()> {
        self.video_worker = None;
        self.video.open(decoder);
        self.video_worker = Some(DecodeWorker::spawn(self.video.clone())?);
        Ok(())
    }

    /// Stops the main decode worker and closes the stream.
    pub fn stop_video(&mut self) {
        self.video_worker = None;
        self.video.close_stream();
    }

    /// Marks a channel switch for the audio parsers and the video stream.
    pub fn new_stream(&mut self) {
        if self.pes_audio.codec() != CodecId::None
            || self.ts_audio.pes().pending() > 0
        {
            self.new_audio_stream = true;
        }
        self.video.new_stream();
    }

    /// The next audio packet starts a new audio stream.
    pub fn new_audio_stream(&mut self) {
        self.new_audio_stream = true;
    }

    fn start_new_audio_stream(&mut self) {
        log::debug!("audio: new audio stream");
        self.audio_decoder.close();
        self.audio.set_buffer_time(self.config.buffer_time_ms());
        self.pes_audio.reset();
        self.ts_audio.reset();
        self.new_audio_stream = false;
    }

    /// Gating shared by both audio entry points. `Some(n)` is the answer
    /// to give without parsing.
    fn gate_audio(&mut self, size: usize) -> Option<usize> {
        if self.skip_audio {
            return Some(size);
        }
        if self.freezed {
            return Some(0);
        }
        if self.new_audio_stream {
            self.start_new_audio_stream();
        }
        if self.audio.free_bytes() < AUDIO_MIN_BUFFER_FREE {
            return Some(0);
        }
        if self.audio.used_bytes() > AUDIO_MAX_BUFFERS {
            return Some(0);
        }
        None
    }

    /// Plays one PES audio packet of stream `id`. Returns the bytes
    /// consumed, 0 when the packet should be offered again.
    pub fn play_audio(&mut self, data: &[u8], id: u8) -> usize {
        if let Some(answer) = self.gate_audio(data.len()) {
            return answer;
        }
        self.pes_audio
            .parse(data, id, self.audio_decoder.as_mut(), &self.audio)
    }

    /// Plays transport stream packets carrying one audio PID.
    pub fn play_ts_audio(&mut self, data: &[u8]) -> usize {
        if let Some(answer) = self.gate_audio(data.len()) {
            return answer;
        }
        self.ts_audio.demux(data, self.audio_decoder.as_mut())
    }

    pub fn play_video(&self, data: &[u8]) -> usize {
        self.video.play_video(data)
    }

    pub fn pip_play_video(&self, data: &[u8]) -> usize {
        self.pip.play_video(data)
    }

    /// Volume in device units, 0..255.
    pub fn set_volume_device(&self, volume: u8) {
        self.audio.set_volume(volume as i32 * 1000 / 255);
    }

    /// Appends `ms` of silence to delay the audio against the video.
    pub fn delay_audio(&self, ms: u32) -> usize {
        self.audio.insert_silence(ms)
    }

    /// Drops all buffered video and audio.
    pub fn clear(&self) {
        self.video.reset_packet();
        self.video.request_clear();
        if !self.skip_audio {
            self.audio.flush();
        }
        for _ in 0..CLEAR_POLLS {
            if !self.video.is_clear_pending() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Leaves freeze and mute.
    pub fn play(&mut self) {
        self.skip_audio = false;
        self.freezed = false;
        self.video.set_freezed(false);
        self.audio.play();
    }

    pub fn freeze(&mut self) {
        self.freezed = true;
        self.video.set_freezed(true);
        self.audio.pause();
    }

    /// Drops audio until the next `play`.
    pub fn mute(&mut self) {
        self.skip_audio = true;
        self.audio.flush();
    }

    pub fn still_picture(&self, data: &[u8]) {
        self.video.still_picture(data);
    }

    /// Waits up to `timeout_ms` for room in the buffers. True when ready.
    pub fn poll(&self, timeout_ms: u64) -> bool {
        let mut timeout = timeout_ms;
        loop {
            let used = self.audio.used_bytes();
            let free = self.audio.free_bytes();
            let filled = self.video.get_buffers();
            let full = (used > AUDIO_MIN_BUFFER_FREE && filled > POLL_VIDEO_SLOTS)
                || free < AUDIO_MIN_BUFFER_FREE
                || filled >= VIDEO_HARD_LIMIT;
            if !full || timeout == 0 {
                return !full;
            }
            let step = timeout.min(POLL_STEP_MS);
            thread::sleep(Duration::from_millis(step));
            timeout -= step;
        }
    }

    /// Waits up to `timeout_ms` for the video buffers to drain. True when
    /// nothing is left.
    pub fn flush(&self, timeout_ms: u64) -> bool {
        if self.video.get_buffers() > 0 {
            thread::sleep(Duration::from_millis(timeout_ms));
        }
        self.video.get_buffers() == 0
    }

    /// Opens the picture-in-picture stream.
    pub fn pip_start(&mut self, decoder: Box<dyn VideoDecoder>) -> Result<()> {
        self.pip_worker = None;
        self.pip.open(decoder);
        self.pip_worker = Some(DecodeWorker::spawn(self.pip.clone())?);
        Ok(())
    }

    /// Closes the picture-in-picture stream through its decode worker.
    pub fn pip_stop(&mut self) {
        if !self.pip.is_open() {
            return;
        }
        self.pip.request_close();
        for _ in 0..PIP_STOP_POLLS {
            if !self.pip.is_close_pending() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.pip_worker = None;
        if self.pip.is_open() {
            self.pip.close_stream();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.pip_worker = None;
        self.video_worker = None;
        self.audio_decoder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureSink, NoopSink};
    use crate::codec::mpeg::tests::layer2_frame;
    use crate::format::ts::demuxer::tests::{Event, RecordingDecoder};
    use crate::format::ts::pes::PESHeader;
    use crate::video::stream::tests::{video_pes, RecordingVideoDecoder, VideoEvent, H264_AU};
    use bytes::BytesMut;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Default)]
    struct SharedDecoder(Arc<Mutex<RecordingDecoder>>);

    impl AudioDecoder for SharedDecoder {
        fn open(&mut self, codec: CodecId) {
            self.0.lock().open(codec);
        }
        fn close(&mut self) {
            self.0.lock().close();
        }
        fn decode(&mut self, frame: &crate::av::ElementaryFrame<'_>) {
            self.0.lock().decode(frame);
        }
    }

    fn device() -> (Device, SharedDecoder) {
        let config = Config::default();
        let audio = AudioOutput::new(&config, Box::new(NoopSink::new()), None).unwrap();
        let decoder = SharedDecoder::default();
        let device = Device::new(config, Arc::new(audio), Box::new(decoder.clone()));
        (device, decoder)
    }

    fn audio_pes(pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        PESHeader::new(0xC0).with_pts(pts).write_to(&mut buf).unwrap();
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    #[test]
    fn freeze_refuses_and_mute_swallows_audio() {
        let (mut device, decoder) = device();
        let mut frames = layer2_frame();
        frames.extend(layer2_frame());
        let packet = audio_pes(9000, &frames);

        device.freeze();
        assert_eq!(device.play_audio(&packet, 0xC0), 0);
        device.mute();
        assert_eq!(device.play_audio(&packet, 0xC0), packet.len());
        assert!(decoder.0.lock().events.is_empty());

        device.play();
        assert_eq!(device.play_audio(&packet, 0xC0), packet.len());
        assert_eq!(
            decoder.0.lock().events,
            vec![
                Event::Close,
                Event::Open(CodecId::MpegAudio),
                Event::Decode(CodecId::MpegAudio, 576, Some(9000)),
            ]
        );
    }

    #[test]
    fn new_audio_stream_closes_decoder() {
        let (mut device, decoder) = device();
        let mut frames = layer2_frame();
        frames.extend(layer2_frame());
        device.play_audio(&audio_pes(0, &frames), 0xC0);

        device.new_audio_stream();
        device.play_audio(&audio_pes(0, &frames), 0xC0);
        let events = decoder.0.lock().events.clone();
        // close from the new stream, then the parser reopens
        assert_eq!(
            &events[3..],
            &[
                Event::Close,
                Event::Close,
                Event::Open(CodecId::MpegAudio),
                Event::Decode(CodecId::MpegAudio, 576, Some(0)),
            ]
        );
    }

    #[test]
    fn full_audio_segment_asks_for_retry() {
        let config = Config::default();
        let (sink, handle) = CaptureSink::new(4096);
        handle.set_gate(false);
        let audio = AudioOutput::new(&config, Box::new(sink), None).unwrap();
        let mut device = Device::new(
            config,
            Arc::new(audio),
            Box::new(SharedDecoder::default()),
        );
        device.audio().setup(48000, 2, false).unwrap();
        while device.audio().free_bytes() >= AUDIO_MIN_BUFFER_FREE {
            device.audio().enqueue(&[0u8; 4608]);
        }
        assert!(!device.poll(0));
        let packet = audio_pes(0, &layer2_frame());
        assert_eq!(device.play_audio(&packet, 0xC0), 0);
    }

    #[test]
    fn volume_is_scaled_to_permille() {
        let (device, _) = device();
        device.set_volume_device(255);
        assert_eq!(device.audio().amplifier(), 1000);
        device.set_volume_device(51);
        assert_eq!(device.audio().amplifier(), 200);
    }

    #[test]
    fn pip_runs_its_own_decoder() {
        let (mut device, _) = device();
        let pip_decoder = RecordingVideoDecoder::default();
        device.pip_start(Box::new(pip_decoder.clone())).unwrap();

        for _ in 0..3 {
            device.pip_play_video(&video_pes(None, &H264_AU));
        }
        for _ in 0..100 {
            if device.pip().get_buffers() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        device.pip_stop();
        assert!(!device.pip().is_open());

        let events = pip_decoder.events();
        assert_eq!(events.first(), Some(&VideoEvent::Open(CodecId::H264)));
        assert_eq!(events.last(), Some(&VideoEvent::Close));
        // main stream untouched
        assert_eq!(device.video().get_buffers(), 0);
    }

    #[test]
    fn clear_drops_sealed_video() {
        let (mut device, _) = device();
        let decoder = RecordingVideoDecoder::default();
        device.start_video(Box::new(decoder.clone())).unwrap();
        device.video().set_freezed(true);
        for _ in 0..3 {
            device.video().ring().enqueue(None, None, &[1]);
            device.video().ring().seal(CodecId::H264);
        }
        device.clear();
        assert_eq!(device.video().get_buffers(), 0);
        assert!(device.flush(0));
        assert!(decoder.events().contains(&VideoEvent::Flush));
    }
}
