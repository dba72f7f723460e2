//! Audio from whole PES packets, as handed over by replay and DVD sources.
//!
//! Unlike [`PesDemuxer`](super::ts::PesDemuxer) every call carries one
//! complete PES packet, so there is no header state machine; only the bytes
//! after the last complete frame are carried over to the next packet.

use super::ts::demuxer::PES_MAX_PAYLOAD;
use super::ts::pes::{has_start_code, read_timestamp, PES_HEADER_SIZE, TIMESTAMP_MASK};
use super::ts::types::STREAM_ID_PRIVATE_1;
use crate::audio::AudioOutput;
use crate::av::{AudioDecoder, CodecId, CodecSwitch, ElementaryFrame};
use crate::codec::{self, AudioFamily, Probe};

/// Buffer time used for DVD sources.
pub const DVD_BUFFER_TIME_MS: u32 = 400;
/// Size of the LPCM sub header following the PES header.
pub const LPCM_HEADER_SIZE: usize = 7;
/// Size of the DVD audio track header.
pub const DVD_TRACK_HEADER_SIZE: usize = 4;

const LPCM_SAMPLE_RATES: [u32; 4] = [48000, 96000, 44100, 32000];
const SCAN_MIN_WINDOW: usize = 5;

/// Sample format announced by an LPCM sub header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpcmFormat {
    pub bits_per_sample: u32,
    pub rate: u32,
    pub channels: u32,
}

impl LpcmFormat {
    /// Decodes byte 5 of the sub header.
    pub fn from_header_byte(b: u8) -> Self {
        Self {
            bits_per_sample: (((b >> 6) & 3) as u32 + 4) * 4,
            rate: LPCM_SAMPLE_RATES[((b >> 4) & 3) as usize],
            channels: (b & 7) as u32 + 1,
        }
    }
}

/// True for the LPCM track ids of private stream 1.
pub fn is_lpcm(id: u8) -> bool {
    id & 0xF0 == 0xA0
}

/// Sniffer families tried for a stream id, in order.
pub fn scan_order(id: u8) -> Vec<AudioFamily> {
    let private = id == STREAM_ID_PRIVATE_1;
    let ac3 = private || id & 0xF0 == 0x80;
    [
        AudioFamily::Mpeg,
        AudioFamily::Latm,
        AudioFamily::Ac3,
        AudioFamily::Adts,
    ]
    .into_iter()
    .filter(|family| match family {
        AudioFamily::Ac3 => ac3,
        _ => !private,
    })
    .collect()
}

/// Parser for audio carried in whole PES packets.
#[derive(Debug, Default)]
pub struct PesAudioParser {
    buffer: Vec<u8>,
    pts: Option<i64>,
    stream_id: Option<u8>,
    lpcm: Option<LpcmFormat>,
    lpcm_ready: bool,
    codec: CodecSwitch,
}

impl PesAudioParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec currently opened on the decoder, or played without it.
    pub fn codec(&self) -> CodecId {
        self.codec.current()
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Forgets the codec and the stream id.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pts = None;
        self.stream_id = None;
        self.lpcm = None;
        self.lpcm_ready = false;
        self.codec.reset();
    }

    /// Parses one PES packet of stream `id`. Always consumes the packet.
    pub fn parse(
        &mut self,
        data: &[u8],
        id: u8,
        decoder: &mut dyn AudioDecoder,
        output: &AudioOutput,
    ) -> usize {
        let size = data.len();
        if size < PES_HEADER_SIZE || !has_start_code(data) {
            log::error!("audio: invalid PES audio packet");
            return size;
        }
        let header_end = PES_HEADER_SIZE + data[8] as usize;
        if size < header_end + 4 {
            if size == header_end {
                log::warn!("audio: empty audio packet");
            } else {
                log::error!("audio: invalid audio packet {} bytes", size);
            }
            return size;
        }

        if data[7] & 0x80 != 0 && data[8] >= 5 {
            self.pts = Some((read_timestamp(&data[9..14]) & TIMESTAMP_MASK) as i64);
        }

        if self.stream_id != Some(id) {
            log::debug!("audio: new channel id {:#04x}", id);
            self.stream_id = Some(id);
            self.codec.reset();
            self.lpcm = None;
            self.lpcm_ready = false;
        }

        let mut payload = &data[header_end..];
        if is_lpcm(id) {
            self.play_lpcm(payload, decoder, output);
            return size;
        }
        if id & 0xF0 == 0x80 && payload[0] & 0xF0 == 0x80 {
            payload = &payload[DVD_TRACK_HEADER_SIZE..];
            if self.codec.current() == CodecId::None {
                output.set_buffer_time(DVD_BUFFER_TIME_MS);
            }
        }

        if self.buffer.len() + payload.len() > PES_MAX_PAYLOAD {
            log::warn!(
                "audio: no frame in {} buffered bytes, dropped",
                self.buffer.len()
            );
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(payload);
        self.scan(id, decoder);
        size
    }

    fn scan(&mut self, id: u8, decoder: &mut dyn AudioDecoder) {
        let order = scan_order(id);
        let mut pos = 0;
        while self.buffer.len() - pos >= SCAN_MIN_WINDOW {
            let window = &self.buffer[pos..];
            match codec::probe(window, &order) {
                (codec, Probe::Frame(len)) => {
                    let frame =
                        ElementaryFrame::new(codec, &window[..len]).with_pts(self.pts.take());
                    self.codec.emit(decoder, &frame);
                    pos += len;
                }
                (_, Probe::NeedMore(_)) => break,
                (_, Probe::Invalid) => pos += 1,
            }
        }
        self.buffer.drain(..pos);
    }

    fn play_lpcm(
        &mut self,
        payload: &[u8],
        decoder: &mut dyn AudioDecoder,
        output: &AudioOutput,
    ) {
        if payload.len() < LPCM_HEADER_SIZE {
            log::error!("audio: invalid LPCM audio packet {} bytes", payload.len());
            return;
        }

        let format = LpcmFormat::from_header_byte(payload[5]);
        if self.codec.current() != CodecId::PcmDvd || self.lpcm != Some(format) {
            log::debug!(
                "audio: LPCM {} Hz {} bits {} channels",
                format.rate,
                format.bits_per_sample,
                format.channels
            );
            self.codec.bypass(decoder, CodecId::PcmDvd);
            self.lpcm = Some(format);
            self.lpcm_ready = false;
            if format.bits_per_sample != 16 {
                log::error!(
                    "audio: LPCM {} bits per sample aren't supported",
                    format.bits_per_sample
                );
                return;
            }
            output.set_buffer_time(DVD_BUFFER_TIME_MS);
            if let Err(e) = output.setup(format.rate, format.channels, false) {
                log::error!("audio: LPCM {}", e);
                return;
            }
            self.lpcm_ready = true;
        }
        if !self.lpcm_ready {
            return;
        }

        if let Some(pts) = self.pts.take() {
            output.set_clock(pts);
        }
        let samples: Vec<u8> = payload[LPCM_HEADER_SIZE..]
            .chunks_exact(2)
            .flat_map(|s| i16::from_be_bytes([s[0], s[1]]).to_ne_bytes())
            .collect();
        output.enqueue(&samples);
    }
}
