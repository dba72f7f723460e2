//! Video codec detection from the start codes at the head of a PES payload.

use super::{h264, h265};
use crate::av::CodecId;

/// MPEG-2 picture start code value.
pub const MPEG2_PICTURE_START: u8 = 0x00;
/// MPEG-2 sequence header start code value.
pub const MPEG2_SEQUENCE_HEADER: u8 = 0xB3;
/// MPEG-2 sequence end code, appended after a still picture.
pub const MPEG2_SEQUENCE_END: [u8; 4] = [0x00, 0x00, 0x01, 0xB7];

/// An access unit start found in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessUnitStart {
    pub codec: CodecId,
    /// Offset of the `00 00 01` start code in the payload.
    pub offset: usize,
}

/// Looks for an access unit start at the beginning of `payload`.
///
/// `mpeg2_pes` is true when the PES header carries the MPEG-2 marker bits;
/// H.264 and HEVC are only recognized in MPEG-2 PES packets.
pub fn detect(payload: &[u8], mpeg2_pes: bool) -> Option<AccessUnitStart> {
    let zeros = leading_zeros(payload);
    if zeros < 2 {
        return None;
    }
    let check = &payload[zeros..];
    if check.len() < 2 || check[0] != 0x01 {
        return None;
    }
    let offset = zeros - 2;

    // AUD followed directly by the next start code
    if mpeg2_pes
        && check.len() >= 5
        && check[1] == h264::NALUnitType::AccessUnitDelimiter as u8
        && check[3] == 0
        && check[4] == 0
    {
        return Some(AccessUnitStart {
            codec: CodecId::H264,
            offset,
        });
    }
    if mpeg2_pes && check[1] == h265::AUD_HEADER {
        return Some(AccessUnitStart {
            codec: CodecId::Hevc,
            offset,
        });
    }
    if check[1] == MPEG2_PICTURE_START || check[1] == MPEG2_SEQUENCE_HEADER {
        return Some(AccessUnitStart {
            codec: CodecId::Mpeg2Video,
            offset,
        });
    }
    None
}

/// Zero bytes before the first non-zero byte; 0 when fewer than 3 bytes
/// would remain.
fn leading_zeros(payload: &[u8]) -> usize {
    let mut zeros = 0;
    for &b in payload {
        if b != 0 {
            return zeros;
        }
        if payload.len() - zeros < 3 {
            return 0;
        }
        zeros += 1;
    }
    0
}

/// End of stream marker for `codec`, if the codec has one.
pub fn end_of_stream(codec: CodecId) -> Option<&'static [u8]> {
    match codec {
        CodecId::H264 => Some(&h264::END_OF_STREAM),
        CodecId::Hevc => Some(&h265::END_OF_BITSTREAM),
        CodecId::Mpeg2Video => Some(&MPEG2_SEQUENCE_END),
        _ => None,
    }
}
