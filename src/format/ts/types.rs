use crate::error::{PlayError, Result};

// Constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_SYNC_BYTE: u8 = 0x47;

// PES stream ids
pub const STREAM_ID_PRIVATE_1: u8 = 0xBD;
pub const STREAM_ID_PADDING: u8 = 0xBE;
pub const STREAM_ID_AUDIO_FIRST: u8 = 0xC0;
pub const STREAM_ID_AUDIO_LAST: u8 = 0xDF;
pub const STREAM_ID_VIDEO_FIRST: u8 = 0xE0;
pub const STREAM_ID_VIDEO_LAST: u8 = 0xEF;

/// Payload layout selected by the adaptation field control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationControl {
    Reserved,
    PayloadOnly,
    AdaptationOnly,
    AdaptationAndPayload,
}

impl From<u8> for AdaptationControl {
    fn from(bits: u8) -> Self {
        match bits & 0x03 {
            1 => AdaptationControl::PayloadOnly,
            2 => AdaptationControl::AdaptationOnly,
            3 => AdaptationControl::AdaptationAndPayload,
            _ => AdaptationControl::Reserved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TSHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub pid: u16,
    pub adaptation: AdaptationControl,
    pub continuity_counter: u8,
}

impl TSHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < TS_HEADER_SIZE {
            return Err(PlayError::MalformedStream("TS packet too short".into()));
        }
        if data[0] != TS_SYNC_BYTE {
            return Err(PlayError::MalformedStream("invalid sync byte".into()));
        }

        Ok(TSHeader {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            adaptation: AdaptationControl::from(data[3] >> 4),
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Offset of the payload inside `packet`, `None` when the packet
    /// carries no usable payload.
    pub fn payload_offset(&self, packet: &[u8]) -> Option<usize> {
        match self.adaptation {
            AdaptationControl::PayloadOnly => Some(TS_HEADER_SIZE),
            AdaptationControl::AdaptationAndPayload => {
                let offset = TS_HEADER_SIZE + 1 + *packet.get(TS_HEADER_SIZE)? as usize;
                (offset < TS_PACKET_SIZE).then_some(offset)
            }
            AdaptationControl::Reserved | AdaptationControl::AdaptationOnly => None,
        }
    }

    pub fn has_payload(&self) -> bool {
        matches!(
            self.adaptation,
            AdaptationControl::PayloadOnly | AdaptationControl::AdaptationAndPayload
        )
    }
}
