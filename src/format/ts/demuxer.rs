use super::pes::{
    has_start_code, read_timestamp, PES_HEADER_SIZE, PES_MAX_HEADER_SIZE, PES_START_SIZE,
};
use super::types::{STREAM_ID_AUDIO_FIRST, STREAM_ID_AUDIO_LAST, STREAM_ID_PRIVATE_1};
use crate::av::{AudioDecoder, CodecSwitch, ElementaryFrame};
use crate::codec::{self, Probe, TS_SCAN_ORDER};

/// Size of the payload scratch buffer.
pub const PES_MAX_PAYLOAD: usize = 512 * 1024;

/// Smallest window the frame scanner looks at.
const SCAN_MIN_WINDOW: usize = 5;

/// Where the demuxer is inside the current PES packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesState {
    /// Nothing seen yet; payload bytes are scanned anyway.
    Init,
    /// Dropping bytes until the next packet start.
    Skip,
    /// Collecting start code, stream id and length.
    Sync,
    /// Collecting the header and its extension.
    Header,
    /// Payload of private stream 1.
    Start,
    /// Payload of an MPEG audio stream.
    Payload,
}

/// Streaming PES demuxer for TS carried audio.
///
/// Reassembles PES payload from transport packet fragments and carves the
/// payload into compressed audio frames using the codec sniffers. Frames go
/// straight to the [`AudioDecoder`].
pub struct PesDemuxer {
    state: PesState,
    header: [u8; PES_MAX_HEADER_SIZE],
    header_index: usize,
    header_size: usize,
    buffer: Vec<u8>,
    index: usize,
    skip: usize,
    start_code: Option<u8>,
    pts: Option<i64>,
    dts: Option<i64>,
    codec: CodecSwitch,
}

impl Default for PesDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl PesDemuxer {
    pub fn new() -> Self {
        Self {
            state: PesState::Init,
            header: [0; PES_MAX_HEADER_SIZE],
            header_index: 0,
            header_size: 0,
            buffer: vec![0; PES_MAX_PAYLOAD],
            index: 0,
            skip: 0,
            start_code: None,
            pts: None,
            dts: None,
            codec: CodecSwitch::default(),
        }
    }

    pub fn state(&self) -> PesState {
        self.state
    }

    /// Buffered bytes not yet handed to the decoder.
    pub fn pending(&self) -> usize {
        self.index - self.skip
    }

    /// Forgets everything including the codec opened on the decoder.
    pub fn reset(&mut self) {
        self.state = PesState::Init;
        self.header_index = 0;
        self.header_size = 0;
        self.index = 0;
        self.skip = 0;
        self.start_code = None;
        self.pts = None;
        self.dts = None;
        self.codec.reset();
    }

    /// Feeds one payload fragment; `is_start` marks the first fragment of
    /// a PES packet.
    pub fn parse(&mut self, data: &[u8], is_start: bool, decoder: &mut dyn AudioDecoder) {
        if is_start {
            if self.skip > 0 && self.index > 0 {
                self.compact();
            }
            self.state = PesState::Sync;
            self.header_index = 0;
            self.pts = None;
            self.dts = None;
        }

        let mut p = data;
        loop {
            match self.state {
                PesState::Skip => return,
                PesState::Init | PesState::Start | PesState::Payload => {
                    let n = (self.buffer.len() - self.index).min(p.len());
                    self.buffer[self.index..self.index + n].copy_from_slice(&p[..n]);
                    self.index += n;
                    p = &p[n..];

                    let progressed = self.scan(decoder);

                    if self.skip > self.buffer.len() / 2 {
                        self.compact();
                    }
                    if !p.is_empty() && self.index == self.buffer.len() && !progressed {
                        if self.skip > 0 {
                            self.compact();
                        } else {
                            // double sync never confirmed a frame
                            log::warn!(
                                "pes: no audio frame in {} buffered bytes, dropped",
                                self.index
                            );
                            self.index = 0;
                        }
                    }
                }
                PesState::Sync => {
                    let n = (PES_START_SIZE - self.header_index).min(p.len());
                    self.header[self.header_index..self.header_index + n]
                        .copy_from_slice(&p[..n]);
                    self.header_index += n;
                    p = &p[n..];

                    if self.header_index == PES_START_SIZE {
                        if !has_start_code(&self.header) {
                            log::warn!(
                                "pes: bad start code {:02x} {:02x} {:02x}",
                                self.header[0],
                                self.header[1],
                                self.header[2]
                            );
                            self.state = PesState::Skip;
                            return;
                        }
                        let code = self.header[3];
                        if code != STREAM_ID_PRIVATE_1
                            && !(STREAM_ID_AUDIO_FIRST..=STREAM_ID_AUDIO_LAST).contains(&code)
                        {
                            log::debug!("pes: stream id {:02x} is not audio", code);
                        }
                        self.start_code = Some(code);
                        self.state = PesState::Header;
                        self.header_size = PES_HEADER_SIZE;
                    }
                }
                PesState::Header => {
                    let n = (self.header_size - self.header_index).min(p.len());
                    self.header[self.header_index..self.header_index + n]
                        .copy_from_slice(&p[..n]);
                    self.header_index += n;
                    p = &p[n..];

                    if self.header_index == PES_HEADER_SIZE
                        && self.header_size == PES_HEADER_SIZE
                    {
                        if (self.header[6] & 0xC0) != 0x80 {
                            log::error!("pes: mpeg-1 pes packets are not supported");
                            self.state = PesState::Skip;
                            return;
                        }
                        let ext = self.header[8] as usize;
                        if ext > 0 {
                            self.header_size += ext;
                            continue;
                        }
                    }

                    if self.header_index == self.header_size {
                        self.read_timestamps();
                        self.state = if self.start_code == Some(STREAM_ID_PRIVATE_1) {
                            PesState::Start
                        } else {
                            PesState::Payload
                        };
                    }
                }
            }

            if p.is_empty() {
                break;
            }
        }
    }

    fn read_timestamps(&mut self) {
        let h = &self.header;
        let ext = self.header_size - PES_HEADER_SIZE;
        match h[7] & 0xC0 {
            0x80 if ext >= 5 => {
                self.pts = Some(read_timestamp(&h[9..14]) as i64);
            }
            0xC0 if ext >= 10 => {
                self.pts = Some(read_timestamp(&h[9..14]) as i64);
                self.dts = Some(read_timestamp(&h[14..19]) as i64);
            }
            _ => {}
        }
    }

    /// Emits every confirmed frame between `skip` and `index`. Returns true
    /// when anything was consumed.
    fn scan(&mut self, decoder: &mut dyn AudioDecoder) -> bool {
        let mut progressed = false;
        while self.index - self.skip >= SCAN_MIN_WINDOW {
            let window = &self.buffer[self.skip..self.index];
            match codec::probe(window, &TS_SCAN_ORDER) {
                (codec, Probe::Frame(len)) => {
                    let frame = ElementaryFrame::new(codec, &window[..len])
                        .with_pts(self.pts.take())
                        .with_dts(self.dts.take());
                    self.codec.emit(decoder, &frame);
                    self.skip += len;
                }
                (_, Probe::NeedMore(_)) => break,
                (_, Probe::Invalid) => self.skip += 1,
            }
            progressed = true;
        }
        progressed
    }

    fn compact(&mut self) {
        self.buffer.copy_within(self.skip..self.index, 0);
        self.index -= self.skip;
        self.skip = 0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::av::CodecId;
    use crate::codec::ac3::tests::ac3_frame;
    use crate::codec::mpeg::tests::layer2_frame;
    use crate::format::ts::pes::PESHeader;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Open(CodecId),
        Close,
        Decode(CodecId, usize, Option<i64>),
    }

    #[derive(Default)]
    pub(crate) struct RecordingDecoder {
        pub events: Vec<Event>,
    }

    impl AudioDecoder for RecordingDecoder {
        fn open(&mut self, codec: CodecId) {
            self.events.push(Event::Open(codec));
        }
        fn close(&mut self) {
            self.events.push(Event::Close);
        }
        fn decode(&mut self, frame: &ElementaryFrame<'_>) {
            self.events.push(Event::Decode(frame.codec, frame.len(), frame.pts));
        }
    }

    fn pes_header(stream_id: u8, pts: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        PESHeader::new(stream_id).with_pts(pts).write_to(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn frames_split_across_fragments() {
        let mut payload = pes_header(0xC0, 9000);
        for _ in 0..3 {
            payload.extend(layer2_frame());
        }

        let mut demuxer = PesDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        let mut chunks = payload.chunks(184);
        demuxer.parse(chunks.next().unwrap(), true, &mut decoder);
        for chunk in chunks {
            demuxer.parse(chunk, false, &mut decoder);
        }

        // the third frame waits for the next sync
        assert_eq!(
            decoder.events,
            vec![
                Event::Close,
                Event::Open(CodecId::MpegAudio),
                Event::Decode(CodecId::MpegAudio, 576, Some(9000)),
                Event::Decode(CodecId::MpegAudio, 576, None),
            ]
        );
        assert_eq!(demuxer.state(), PesState::Payload);
        assert_eq!(demuxer.pending(), 576);
    }

    #[test]
    fn codec_change_reopens_decoder() {
        let mut payload = pes_header(0xBD, 0);
        for _ in 0..3 {
            payload.extend(ac3_frame(0, 0));
        }
        payload.extend(layer2_frame());
        payload.extend(layer2_frame());

        let mut demuxer = PesDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        demuxer.parse(&payload, true, &mut decoder);

        // the last AC-3 frame has no AC-3 successor and is scanned over
        assert_eq!(
            decoder.events,
            vec![
                Event::Close,
                Event::Open(CodecId::Ac3),
                Event::Decode(CodecId::Ac3, 128, Some(0)),
                Event::Decode(CodecId::Ac3, 128, None),
                Event::Close,
                Event::Open(CodecId::MpegAudio),
                Event::Decode(CodecId::MpegAudio, 576, None),
            ]
        );
        assert_eq!(demuxer.state(), PesState::Start);
    }

    #[test]
    fn bad_start_code_skips_until_next_start() {
        let mut demuxer = PesDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        demuxer.parse(&[0x00, 0x00, 0x02, 0xC0, 0x00, 0x00, 0x80], true, &mut decoder);
        assert_eq!(demuxer.state(), PesState::Skip);

        demuxer.parse(&layer2_frame(), false, &mut decoder);
        assert!(decoder.events.is_empty());
        assert_eq!(demuxer.pending(), 0);

        demuxer.parse(&pes_header(0xC0, 1), true, &mut decoder);
        assert_eq!(demuxer.state(), PesState::Payload);
    }

    #[test]
    fn mpeg1_header_is_skipped() {
        let mut demuxer = PesDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        demuxer.parse(
            &[0x00, 0x00, 0x01, 0xC0, 0x00, 0x00, 0x0F, 0x00, 0x00],
            true,
            &mut decoder,
        );
        assert_eq!(demuxer.state(), PesState::Skip);
    }

    #[test]
    fn header_split_byte_by_byte() {
        let mut payload = pes_header(0xC0, 4242);
        payload.extend(layer2_frame());
        payload.extend(layer2_frame());

        let mut demuxer = PesDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        demuxer.parse(&payload[..1], true, &mut decoder);
        for b in &payload[1..] {
            demuxer.parse(std::slice::from_ref(b), false, &mut decoder);
        }
        assert_eq!(
            decoder.events.last(),
            Some(&Event::Decode(CodecId::MpegAudio, 576, Some(4242)))
        );
    }

    #[test]
    fn garbage_larger_than_buffer_is_scanned_through() {
        let mut demuxer = PesDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        demuxer.parse(&pes_header(0xC0, 0), true, &mut decoder);

        // fake LATM and MPEG headers without a second sync
        let mut junk = vec![0x56, 0xFF, 0xFF];
        junk.resize(PES_MAX_PAYLOAD + 100, 0x56);
        demuxer.parse(&junk, false, &mut decoder);
        assert!(decoder.events.is_empty());
        assert!(demuxer.pending() < SCAN_MIN_WINDOW);
    }
}
