//! One video stream: PES input on the producer side, the command flags and
//! the decoder on the consumer side.

use super::packet::{PacketRing, VIDEO_PACKET_MAX};
use crate::av::{CodecId, VideoDecoder};
use crate::codec::video::{self, MPEG2_SEQUENCE_END};
use crate::error::Result;
use crate::format::ts::pes::{has_start_code, PESHeader, PES_HEADER_SIZE};
use crate::format::ts::types::STREAM_ID_PADDING;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sealed slots at which `play_video` asks the caller to retry.
pub const VIDEO_HARD_LIMIT: usize = VIDEO_PACKET_MAX - 10;

const HARD_LIMIT_WAIT: Duration = Duration::from_millis(20);
const STILL_FEED_RETRIES: usize = 50;
const STILL_PAUSE: Duration = Duration::from_millis(25);
const STILL_DRAIN_POLLS: usize = 50;
const DECODE_IDLE: Duration = Duration::from_millis(5);

/// Result of one [`VideoStream::decode_input`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A sealed slot was consumed.
    Decoded,
    /// A command ran or the stream is frozen.
    Paused,
    /// Nothing to do.
    Empty,
}

#[derive(Debug, Default)]
struct Producer {
    codec: CodecId,
    invalid_pes: u32,
}

#[derive(Default)]
struct Consumer {
    last_codec: CodecId,
    decoder: Option<Box<dyn VideoDecoder>>,
}

/// A video stream, main or picture-in-picture.
pub struct VideoStream {
    name: &'static str,
    ring: PacketRing,
    producer: Mutex<Producer>,
    consumer: Mutex<Consumer>,
    open: AtomicBool,
    new_stream: AtomicBool,
    closing: AtomicBool,
    freezed: AtomicBool,
    close: AtomicBool,
    clear_buffers: AtomicBool,
}

impl fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoStream")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("codec", &self.codec())
            .field("filled", &self.ring.filled())
            .finish()
    }
}

impl VideoStream {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ring: PacketRing::new(),
            producer: Mutex::new(Producer::default()),
            consumer: Mutex::new(Consumer::default()),
            open: AtomicBool::new(false),
            new_stream: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            freezed: AtomicBool::new(false),
            close: AtomicBool::new(false),
            clear_buffers: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ring(&self) -> &PacketRing {
        &self.ring
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Codec the producer currently collects slots for.
    pub fn codec(&self) -> CodecId {
        self.producer.lock().codec
    }

    /// True between a new stream close command and its execution.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn is_freezed(&self) -> bool {
        self.freezed.load(Ordering::Acquire)
    }

    pub fn set_freezed(&self, on: bool) {
        self.freezed.store(on, Ordering::Release);
    }

    /// Sealed slots not yet decoded.
    pub fn get_buffers(&self) -> usize {
        self.ring.filled()
    }

    /// Attaches a decoder and starts accepting packets.
    pub fn open(&self, decoder: Box<dyn VideoDecoder>) {
        self.open.store(false, Ordering::Release);
        {
            let mut consumer = self.consumer.lock();
            consumer.last_codec = CodecId::None;
            consumer.decoder = Some(decoder);
        }
        {
            let mut producer = self.producer.lock();
            producer.codec = CodecId::None;
            producer.invalid_pes = 0;
        }
        self.ring.reset();
        self.close.store(false, Ordering::Release);
        self.clear_buffers.store(false, Ordering::Release);
        self.open.store(true, Ordering::Release);
        log::debug!("video: {} stream opened", self.name);
    }

    /// Detaches and closes the decoder. Must not race with `decode_input`;
    /// use [`request_close`](Self::request_close) while a worker runs.
    pub fn close_stream(&self) {
        let mut consumer = self.consumer.lock();
        self.close_with(&mut consumer);
    }

    fn close_with(&self, consumer: &mut Consumer) {
        self.open.store(false, Ordering::Release);
        if let Some(mut decoder) = consumer.decoder.take() {
            log::debug!("video: {} stream closed", self.name);
            decoder.close();
        }
        consumer.last_codec = CodecId::None;
        self.ring.reset();
        self.new_stream.store(true, Ordering::Release);
        self.producer.lock().invalid_pes = 0;
    }

    /// Asks the consumer to close the stream before its next slot.
    pub fn request_close(&self) {
        self.close.store(true, Ordering::Release);
    }

    pub fn is_close_pending(&self) -> bool {
        self.close.load(Ordering::Acquire)
    }

    /// Asks the consumer to drop every sealed slot.
    pub fn request_clear(&self) {
        self.clear_buffers.store(true, Ordering::Release);
    }

    pub fn is_clear_pending(&self) -> bool {
        self.clear_buffers.load(Ordering::Acquire)
    }

    /// Marks a channel switch: the next packet queues a close command.
    pub fn new_stream(&self) {
        if self.codec() != CodecId::None {
            self.new_stream.store(true, Ordering::Release);
            self.producer.lock().invalid_pes = 0;
        }
    }

    /// Drops the bytes collected in the open slot.
    pub fn reset_packet(&self) {
        self.ring.reset_current();
    }

    /// Takes one PES video packet. Returns the bytes consumed; 0 means the
    /// packet was not taken and should be offered again.
    pub fn play_video(&self, data: &[u8]) -> usize {
        let size = data.len();
        if !self.is_open() {
            return size;
        }
        if self.is_freezed() {
            return 0;
        }

        let mut producer = self.producer.lock();
        if self.new_stream.load(Ordering::Acquire) {
            if self.ring.filled() >= VIDEO_PACKET_MAX - 1 {
                log::debug!("video: new video stream lost");
                return 0;
            }
            self.ring.seal(CodecId::None);
            producer.codec = CodecId::None;
            self.closing.store(true, Ordering::Release);
            self.new_stream.store(false, Ordering::Release);
        }

        if size < PES_HEADER_SIZE || !has_start_code(data) {
            if producer.invalid_pes == 0 {
                log::error!("video: invalid PES video packet");
            }
            producer.invalid_pes += 1;
            return size;
        }
        if producer.invalid_pes > 1 {
            log::error!("video: {} invalid PES video packets", producer.invalid_pes);
        }
        producer.invalid_pes = 0;

        if data[3] == STREAM_ID_PADDING {
            return size;
        }

        let header_end = PES_HEADER_SIZE + data[8] as usize;
        if size <= header_end {
            if size == header_end {
                log::warn!("video: empty video packet");
            } else {
                log::error!("video: invalid video packet {}/{} bytes", header_end, size);
            }
            return size;
        }

        if self.ring.filled() >= VIDEO_HARD_LIMIT {
            drop(producer);
            thread::sleep(HARD_LIMIT_WAIT);
            return 0;
        }

        let header = match PESHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("video: {}", e);
                return size;
            }
        };
        let pts = header.pts.map(|v| v as i64);
        let dts = header.dts.map(|v| v as i64);
        let payload = &data[header_end..];

        match video::detect(payload, header.mpeg2) {
            Some(start) => {
                if start.codec == producer.codec {
                    self.ring.seal(start.codec);
                } else {
                    if producer.codec != CodecId::None {
                        self.ring.seal(producer.codec);
                    }
                    log::debug!("video: {} detected on {} stream", start.codec, self.name);
                    producer.codec = start.codec;
                }
                self.ring.enqueue(pts, dts, &payload[start.offset..]);
            }
            None => {
                if producer.codec == CodecId::None {
                    return size;
                }
                self.ring.enqueue(pts, dts, payload);
            }
        }
        size
    }

    /// Shows one I-frame given as PES packets or a raw MPEG-2 elementary
    /// stream; the frame is fed twice and closed by an end of sequence code.
    pub fn still_picture(&self, data: &[u8]) {
        if !self.is_open() {
            return;
        }
        if data.len() < PES_HEADER_SIZE || !has_start_code(data) {
            log::error!("video: invalid still video packet");
            return;
        }

        self.reset_packet();
        if self.codec() == CodecId::None {
            log::error!("video: no codec known for still picture");
        }

        for _ in 0..2 {
            if data[3] & 0xF0 == 0xE0 {
                self.feed_pes_packets(data);
                self.ring.seal(self.codec());
            } else {
                let mut producer = self.producer.lock();
                if producer.codec != CodecId::Mpeg2Video {
                    self.ring.seal(CodecId::None);
                    producer.codec = CodecId::Mpeg2Video;
                }
                self.ring.enqueue(None, None, data);
            }

            let codec = self.codec();
            let end = video::end_of_stream(codec).unwrap_or(&MPEG2_SEQUENCE_END);
            self.ring.enqueue(None, None, end);
            self.ring.seal(codec);
            thread::sleep(STILL_PAUSE);
        }

        for _ in 0..STILL_DRAIN_POLLS {
            if self.get_buffers() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        log::debug!("video: still picture, {} buffers left", self.get_buffers());
    }

    /// Splits `data` into PES packets and feeds the video ones.
    fn feed_pes_packets(&self, data: &[u8]) {
        let mut split = data;
        while split.len() > 6 {
            if !has_start_code(split) {
                log::error!("video: invalid still video packet");
                break;
            }
            let len = u16::from_be_bytes([split[4], split[5]]) as usize;
            if len == 0 || len + 6 > split.len() {
                if split[3] & 0xF0 == 0xE0 {
                    self.feed(split);
                }
                break;
            }
            if split[3] & 0xF0 == 0xE0 {
                self.feed(&split[..len + 6]);
            }
            split = &split[len + 6..];
        }
    }

    fn feed(&self, packet: &[u8]) {
        for _ in 0..STILL_FEED_RETRIES {
            if self.play_video(packet) != 0 {
                return;
            }
        }
        log::warn!("video: still picture packet dropped");
    }

    fn clear_with(&self, consumer: &mut Consumer) {
        self.ring.clear();
        if let Some(decoder) = consumer.decoder.as_mut() {
            decoder.flush_buffers();
        }
        self.clear_buffers.store(false, Ordering::Release);
        log::debug!("video: {} buffers cleared", self.name);
    }

    /// Runs pending commands. True when a command ran or a slot is waiting.
    pub fn poll_input(&self) -> bool {
        let mut consumer = self.consumer.lock();
        if consumer.decoder.is_none() {
            return false;
        }
        if self.close.load(Ordering::Acquire) {
            self.close_with(&mut consumer);
            self.close.store(false, Ordering::Release);
            return true;
        }
        if self.clear_buffers.load(Ordering::Acquire) {
            self.clear_with(&mut consumer);
            return true;
        }
        self.ring.filled() > 0
    }

    /// Runs pending commands or hands the oldest sealed slot to the decoder.
    pub fn decode_input(&self) -> DecodeStatus {
        let mut consumer = self.consumer.lock();
        if consumer.decoder.is_none() {
            return DecodeStatus::Empty;
        }
        if self.close.load(Ordering::Acquire) {
            self.close_with(&mut consumer);
            self.close.store(false, Ordering::Release);
            return DecodeStatus::Paused;
        }
        if self.clear_buffers.load(Ordering::Acquire) {
            self.clear_with(&mut consumer);
            return DecodeStatus::Paused;
        }
        if self.is_freezed() {
            return DecodeStatus::Paused;
        }

        let Some(packet) = self.ring.pop() else {
            return DecodeStatus::Empty;
        };
        let consumer = &mut *consumer;
        let Some(decoder) = consumer.decoder.as_mut() else {
            return DecodeStatus::Empty;
        };

        if packet.codec == CodecId::None {
            self.closing.store(false, Ordering::Release);
            if consumer.last_codec != CodecId::None {
                log::debug!("video: {} decoder closed by stream change", self.name);
                consumer.last_codec = CodecId::None;
                decoder.close();
            }
            return DecodeStatus::Decoded;
        }
        if packet.codec != consumer.last_codec {
            log::debug!("video: open {} decoder", packet.codec);
            consumer.last_codec = packet.codec;
            decoder.open(packet.codec);
        }
        decoder.decode(&packet);
        DecodeStatus::Decoded
    }
}

/// Thread calling [`VideoStream::decode_input`] until stopped.
#[derive(Debug)]
pub struct DecodeWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(stream: Arc<VideoStream>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("vdkplay {} video", stream.name()))
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    if stream.decode_input() != DecodeStatus::Decoded {
                        thread::sleep(DECODE_IDLE);
                    }
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("video: decode worker panicked");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::av::Packet;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum VideoEvent {
        Open(CodecId),
        Close,
        Flush,
        Decode(CodecId, Vec<u8>, Option<i64>),
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct RecordingVideoDecoder {
        pub events: Arc<Mutex<Vec<VideoEvent>>>,
    }

    impl RecordingVideoDecoder {
        pub fn events(&self) -> Vec<VideoEvent> {
            self.events.lock().clone()
        }
    }

    impl VideoDecoder for RecordingVideoDecoder {
        fn open(&mut self, codec: CodecId) {
            self.events.lock().push(VideoEvent::Open(codec));
        }

        fn close(&mut self) {
            self.events.lock().push(VideoEvent::Close);
        }

        fn flush_buffers(&mut self) {
            self.events.lock().push(VideoEvent::Flush);
        }

        fn decode(&mut self, packet: &Packet) {
            self.events.lock().push(VideoEvent::Decode(
                packet.codec,
                packet.data.to_vec(),
                packet.pts,
            ));
        }
    }

    pub(crate) fn video_pes(pts: Option<u64>, payload: &[u8]) -> Vec<u8> {
        let mut header = PESHeader::new(0xE0);
        if let Some(pts) = pts {
            header = header.with_pts(pts);
        }
        let mut buf = BytesMut::new();
        header.write_to(&mut buf).unwrap();
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    pub(crate) const H264_AU: [u8; 10] = [0x00, 0x00, 0x00, 0x01, 0x09, 0x10, 0x00, 0x00, 0x01, 0x67];
    pub(crate) const MPEG2_PICTURE: [u8; 6] = [0x00, 0x00, 0x01, 0x00, 0x12, 0x34];

    fn opened() -> (VideoStream, RecordingVideoDecoder) {
        let stream = VideoStream::new("main");
        let decoder = RecordingVideoDecoder::default();
        stream.open(Box::new(decoder.clone()));
        (stream, decoder)
    }

    #[test]
    fn access_units_are_split_on_start_codes() {
        let (stream, decoder) = opened();
        let first = video_pes(Some(3600), &H264_AU);
        assert_eq!(stream.play_video(&first), first.len());
        let tail = video_pes(None, &[0xAB, 0xCD]);
        assert_eq!(stream.play_video(&tail), tail.len());
        assert_eq!(stream.get_buffers(), 0);

        stream.play_video(&video_pes(Some(7200), &H264_AU));
        assert_eq!(stream.get_buffers(), 1);

        assert_eq!(stream.decode_input(), DecodeStatus::Decoded);
        let mut unit = H264_AU[1..].to_vec();
        unit.extend_from_slice(&[0xAB, 0xCD]);
        assert_eq!(
            decoder.events(),
            vec![
                VideoEvent::Open(CodecId::H264),
                VideoEvent::Decode(CodecId::H264, unit, Some(3600)),
            ]
        );
        assert_eq!(stream.decode_input(), DecodeStatus::Empty);
    }

    #[test]
    fn codec_change_seals_previous_unit() {
        let (stream, decoder) = opened();
        stream.play_video(&video_pes(Some(10), &MPEG2_PICTURE));
        stream.play_video(&video_pes(Some(20), &H264_AU));
        assert_eq!(stream.codec(), CodecId::H264);
        assert_eq!(stream.get_buffers(), 1);

        stream.decode_input();
        assert_eq!(
            decoder.events(),
            vec![
                VideoEvent::Open(CodecId::Mpeg2Video),
                VideoEvent::Decode(CodecId::Mpeg2Video, MPEG2_PICTURE.to_vec(), Some(10)),
            ]
        );
    }

    #[test]
    fn closed_stream_swallows_and_freeze_refuses() {
        let stream = VideoStream::new("pip");
        let pes = video_pes(None, &H264_AU);
        assert_eq!(stream.play_video(&pes), pes.len());
        assert_eq!(stream.get_buffers(), 0);

        let (stream, _) = opened();
        stream.set_freezed(true);
        assert_eq!(stream.play_video(&pes), 0);
    }

    #[test]
    fn junk_and_padding_are_consumed() {
        let (stream, _) = opened();
        assert_eq!(stream.play_video(&[1, 2, 3]), 3);
        assert_eq!(stream.play_video(&[0, 0, 1, 0xE0]), 4);

        let mut padding = video_pes(None, &[0xFF; 8]);
        padding[3] = STREAM_ID_PADDING;
        assert_eq!(stream.play_video(&padding), padding.len());
        // header only
        let empty = video_pes(None, &[]);
        assert_eq!(stream.play_video(&empty), empty.len());
        assert_eq!(stream.ring().pending(), 0);
    }

    #[test]
    fn commands_run_in_priority_order() {
        let (stream, decoder) = opened();
        stream.play_video(&video_pes(None, &H264_AU));
        stream.play_video(&video_pes(None, &H264_AU));
        stream.play_video(&video_pes(None, &H264_AU));
        assert_eq!(stream.get_buffers(), 2);

        stream.set_freezed(true);
        stream.request_clear();
        assert_eq!(stream.decode_input(), DecodeStatus::Paused);
        assert_eq!(stream.get_buffers(), 0);
        assert!(!stream.is_clear_pending());
        assert_eq!(decoder.events(), vec![VideoEvent::Flush]);

        assert_eq!(stream.decode_input(), DecodeStatus::Paused);
        stream.set_freezed(false);
        assert_eq!(stream.decode_input(), DecodeStatus::Empty);

        stream.request_close();
        stream.request_clear();
        assert!(stream.poll_input());
        assert!(!stream.is_open());
        assert!(!stream.is_close_pending());
        assert_eq!(decoder.events(), vec![VideoEvent::Flush, VideoEvent::Close]);
        assert!(!stream.poll_input());
    }

    #[test]
    fn stream_change_queues_close_command() {
        let (stream, decoder) = opened();
        stream.play_video(&video_pes(None, &MPEG2_PICTURE));
        stream.play_video(&video_pes(None, &MPEG2_PICTURE));
        stream.new_stream();
        stream.play_video(&video_pes(None, &H264_AU));
        assert!(stream.is_closing());
        assert_eq!(stream.get_buffers(), 2);

        while stream.decode_input() == DecodeStatus::Decoded {}
        assert!(!stream.is_closing());
        let events = decoder.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], VideoEvent::Close);
    }

    #[test]
    fn full_ring_asks_for_retry() {
        let (stream, _) = opened();
        for _ in 0..VIDEO_HARD_LIMIT {
            stream.ring().enqueue(None, None, &[1]);
            stream.ring().seal(CodecId::H264);
        }
        assert_eq!(stream.play_video(&video_pes(None, &H264_AU)), 0);
    }

    #[test]
    fn still_picture_ends_with_sequence_end() {
        let (stream, decoder) = opened();
        let stream = Arc::new(stream);
        stream.play_video(&video_pes(None, &MPEG2_PICTURE));
        let worker = DecodeWorker::spawn(stream.clone()).unwrap();

        stream.still_picture(&video_pes(None, &MPEG2_PICTURE));
        drop(worker);

        let decodes: Vec<Vec<u8>> = decoder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                VideoEvent::Decode(_, data, _) => Some(data),
                _ => None,
            })
            .collect();
        let last = decodes.last().unwrap();
        assert!(last.ends_with(&MPEG2_SEQUENCE_END));
        assert_eq!(stream.get_buffers(), 0);
    }
}
