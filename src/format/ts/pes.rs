use crate::error::{PlayError, Result};
use bytes::{BufMut, BytesMut};

/// Fixed part of a PES header: start code, stream id, length, flags,
/// header data length.
pub const PES_HEADER_SIZE: usize = 9;
/// Fixed header plus the longest possible header extension.
pub const PES_MAX_HEADER_SIZE: usize = PES_HEADER_SIZE + 256;
/// Start code prefix and stream id plus packet length.
pub const PES_START_SIZE: usize = 6;

/// Mask for the 33 bit timestamps.
pub const TIMESTAMP_MASK: u64 = (1 << 33) - 1;

/// Packetized Elementary Stream (PES) header.
///
/// Only the fields the players look at are decoded; the optional fields
/// behind the timestamps are skipped through `header_data_length`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Length of the PES packet after this field, 0 for unbounded video
    pub packet_length: u16,
    /// Marker bits of the first flag byte are `10`
    pub mpeg2: bool,
    /// Data alignment indicator
    pub data_alignment: bool,
    /// Length of the header data following the fixed header
    pub header_data_length: u8,
    /// Presentation Time Stamp (33 bits)
    pub pts: Option<u64>,
    /// Decoding Time Stamp (33 bits)
    pub dts: Option<u64>,
}

/// True when `data` starts with the `00 00 01` start code prefix.
pub fn has_start_code(data: &[u8]) -> bool {
    data.len() >= 3 && data[0] == 0 && data[1] == 0 && data[2] == 1
}

impl PESHeader {
    /// Creates a new PES header with a specific stream ID.
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            mpeg2: true,
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts & TIMESTAMP_MASK);
        self
    }

    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts & TIMESTAMP_MASK);
        self
    }

    /// Parses the fixed header and the timestamps that follow it.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PES_HEADER_SIZE {
            return Err(PlayError::MalformedStream("PES header too short".into()));
        }
        if !has_start_code(data) {
            return Err(PlayError::MalformedStream(format!(
                "invalid PES start code {:02x} {:02x} {:02x}",
                data[0], data[1], data[2]
            )));
        }

        let header_data_length = data[8];
        let mut header = PESHeader {
            stream_id: data[3],
            packet_length: u16::from_be_bytes([data[4], data[5]]),
            mpeg2: (data[6] & 0xC0) == 0x80,
            data_alignment: (data[6] & 0x04) != 0,
            header_data_length,
            pts: None,
            dts: None,
        };

        let ext = &data[PES_HEADER_SIZE..];
        let ext = &ext[..ext.len().min(header_data_length as usize)];
        match data[7] & 0xC0 {
            0x80 if ext.len() >= 5 => {
                header.pts = Some(read_timestamp(&ext[..5]));
            }
            0xC0 if ext.len() >= 10 => {
                header.pts = Some(read_timestamp(&ext[..5]));
                header.dts = Some(read_timestamp(&ext[5..10]));
            }
            _ => {}
        }
        Ok(header)
    }

    /// Bytes from the start of the packet to the first payload byte.
    pub fn payload_offset(&self) -> usize {
        PES_HEADER_SIZE + self.header_data_length as usize
    }

    /// Writes the PES header to a BytesMut buffer.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&[0x00, 0x00, 0x01, self.stream_id]);
        buf.put_u16(self.packet_length);

        let mut flags = if self.mpeg2 { 0x80 } else { 0x00 };
        if self.data_alignment {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let (pts_dts_flags, header_len) = match (self.pts, self.dts) {
            (Some(_), Some(_)) => (0xC0, 10),
            (Some(_), None) => (0x80, 5),
            _ => (0x00, 0),
        };
        buf.put_u8(pts_dts_flags);
        buf.put_u8(header_len.max(self.header_data_length));

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
            if let Some(dts) = self.dts {
                write_timestamp(buf, 0x10, dts);
            }
        }
        // stuffing up to the declared header length
        for _ in header_len..self.header_data_length {
            buf.put_u8(0xFF);
        }
        Ok(())
    }
}

/// Decodes a 33 bit timestamp from its 5 byte marker-bit layout.
pub fn read_timestamp(b: &[u8]) -> u64 {
    ((b[0] as u64 & 0x0E) << 29)
        | ((b[1] as u64) << 22)
        | ((b[2] as u64 & 0xFE) << 14)
        | ((b[3] as u64) << 7)
        | ((b[4] as u64 & 0xFE) >> 1)
}

/// Encodes a 33 bit timestamp; `marker` carries the 4 bit prefix.
pub fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & TIMESTAMP_MASK;
    buf.put_u8(marker | ((ts >> 29) & 0x0E) as u8 | 1);
    buf.put_u16((((ts >> 14) & 0xFFFE) | 1) as u16);
    buf.put_u16((((ts << 1) & 0xFFFE) | 1) as u16);
}
