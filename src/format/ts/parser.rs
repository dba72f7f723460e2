use super::demuxer::PesDemuxer;
use super::types::*;
use crate::av::AudioDecoder;

/// Walks 188 byte transport packets and feeds their payload to a
/// [`PesDemuxer`].
///
/// The stream is expected to carry a single audio PID; no PSI tables are
/// looked at.
pub struct TsDemuxer {
    pes: PesDemuxer,
    check_continuity: bool,
    continuity: Option<u8>,
    discontinuities: u64,
    packets: u64,
}

impl Default for TsDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self {
            pes: PesDemuxer::new(),
            check_continuity: false,
            continuity: None,
            discontinuities: 0,
            packets: 0,
        }
    }

    /// Log gaps in the continuity counter.
    pub fn with_continuity_check(mut self, enabled: bool) -> Self {
        self.check_continuity = enabled;
        self
    }

    pub fn pes(&self) -> &PesDemuxer {
        &self.pes
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Continuity gaps seen so far; only counted when the check is enabled.
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    pub fn reset(&mut self) {
        self.pes.reset();
        self.continuity = None;
    }

    /// Demuxes all complete packets in `data` and returns the bytes
    /// consumed. A trailing partial packet is left for the caller.
    ///
    /// A lost sync byte drops the rest of `data`: the caller has to
    /// realign the stream.
    pub fn demux(&mut self, data: &[u8], decoder: &mut dyn AudioDecoder) -> usize {
        let mut consumed = 0;

        for packet in data.chunks_exact(TS_PACKET_SIZE) {
            let header = match TSHeader::parse(packet) {
                Ok(header) => header,
                Err(_) => {
                    log::error!(
                        "tsdemux: transport stream out of sync after {} packets",
                        self.packets
                    );
                    return data.len();
                }
            };
            consumed += TS_PACKET_SIZE;
            self.packets += 1;

            if header.transport_error {
                log::debug!("tsdemux: transport error in pid {:#x}", header.pid);
                continue;
            }
            if self.check_continuity && header.has_payload() {
                self.track_continuity(&header);
            }

            let offset = match header.payload_offset(packet) {
                Some(offset) => offset,
                None => {
                    if header.adaptation == AdaptationControl::AdaptationAndPayload {
                        log::debug!("tsdemux: adaptation field too long");
                    }
                    continue;
                }
            };

            self.pes
                .parse(&packet[offset..], header.payload_unit_start, decoder);
        }

        consumed
    }

    fn track_continuity(&mut self, header: &TSHeader) {
        if let Some(last) = self.continuity {
            let expected = (last + 1) & 0x0F;
            if header.continuity_counter != expected {
                self.discontinuities += 1;
                log::warn!(
                    "tsdemux: continuity gap in pid {:#x}, expected {} got {}",
                    header.pid,
                    expected,
                    header.continuity_counter
                );
            }
        }
        self.continuity = Some(header.continuity_counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecId;
    use crate::codec::mpeg::tests::layer2_frame;
    use crate::format::ts::demuxer::tests::{Event, RecordingDecoder};
    use crate::format::ts::pes::PESHeader;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    fn packetize(payload: &[u8], cc_start: u8) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, chunk) in payload.chunks(TS_PACKET_SIZE - TS_HEADER_SIZE).enumerate() {
            let start = if i == 0 { 0x40 } else { 0x00 };
            let cc = (cc_start + i as u8) & 0x0F;
            if chunk.len() == TS_PACKET_SIZE - TS_HEADER_SIZE {
                out.extend([TS_SYNC_BYTE, start | 0x01, 0x00, 0x10 | cc]);
            } else {
                // stuff the tail through the adaptation field
                let stuffing = TS_PACKET_SIZE - TS_HEADER_SIZE - chunk.len();
                out.extend([TS_SYNC_BYTE, start | 0x01, 0x00, 0x30 | cc]);
                out.push((stuffing - 1) as u8);
                if stuffing > 1 {
                    out.push(0x00);
                    out.extend(std::iter::repeat(0xFF).take(stuffing - 2));
                }
            }
            out.extend(chunk);
        }
        out
    }

    fn audio_pes(frames: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        PESHeader::new(0xC0).with_pts(3600).write_to(&mut buf).unwrap();
        for _ in 0..frames {
            buf.extend_from_slice(&layer2_frame());
        }
        buf.to_vec()
    }

    #[test]
    fn test_demux_mpeg_audio() {
        let stream = packetize(&audio_pes(3), 0);
        let mut demuxer = TsDemuxer::new();
        let mut decoder = RecordingDecoder::default();

        assert_eq!(demuxer.demux(&stream, &mut decoder), stream.len());
        let decodes = decoder
            .events
            .iter()
            .filter(|e| matches!(e, Event::Decode(CodecId::MpegAudio, 576, _)))
            .count();
        assert_eq!(decodes, 2);
    }

    #[test]
    fn test_partial_packet_not_consumed() {
        let stream = packetize(&audio_pes(1), 0);
        let mut demuxer = TsDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        assert_eq!(demuxer.demux(&stream[..200], &mut decoder), TS_PACKET_SIZE);
    }

    #[test]
    fn test_out_of_sync_drops_rest() {
        let mut stream = packetize(&audio_pes(2), 0);
        stream[TS_PACKET_SIZE] = 0x00;
        let mut demuxer = TsDemuxer::new();
        let mut decoder = RecordingDecoder::default();

        assert_eq!(demuxer.demux(&stream, &mut decoder), stream.len());
        assert_eq!(demuxer.packets(), 1);
        assert!(decoder.events.is_empty());
    }

    #[test]
    fn test_transport_error_packet_dropped() {
        let mut stream = packetize(&audio_pes(3), 0);
        // corrupt the first packet: the PES header never arrives
        stream[1] |= 0x80;
        let mut demuxer = TsDemuxer::new();
        let mut decoder = RecordingDecoder::default();
        demuxer.demux(&stream, &mut decoder);
        assert!(decoder
            .events
            .iter()
            .all(|e| !matches!(e, Event::Decode(_, _, Some(_)))));
    }

    #[test]
    fn test_continuity_gap_counted() {
        let mut stream = packetize(&audio_pes(3), 0);
        stream.extend(packetize(&audio_pes(1), 9));
        let mut demuxer = TsDemuxer::new().with_continuity_check(true);
        let mut decoder = RecordingDecoder::default();
        demuxer.demux(&stream, &mut decoder);
        assert_eq!(demuxer.discontinuities(), 1);

        let mut unchecked = TsDemuxer::new();
        unchecked.demux(&stream, &mut decoder);
        assert_eq!(unchecked.discontinuities(), 0);
    }
}
