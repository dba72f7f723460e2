//! MPEG-1/2/2.5 audio (layers I-III) frame headers.

use super::Probe;
use crate::error::{PlayError, Result};
use crate::utils::BitReader;

/// Bitrates in kbit/s by [lsf][layer][index].
const BITRATE_TABLE: [[[u32; 16]; 4]; 2] = [
    // MPEG-1
    [
        [0; 16],
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0],
    ],
    // MPEG-2/2.5
    [
        [0; 16],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
    ],
];

const SAMPLE_RATE_TABLE: [u32; 4] = [44100, 48000, 32000, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpegAudioHeader {
    pub version: MpegVersion,
    pub layer: u8,
    pub bitrate_index: u8,
    pub sample_rate_index: u8,
    pub padding: bool,
    pub channel_mode: u8,
}

impl MpegAudioHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut br = BitReader::new(data);
        if br.read_bits(11)? != 0x7FF {
            return Err(PlayError::MalformedStream("mpeg audio sync".into()));
        }
        let version = match br.read_bits(2)? {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return Err(PlayError::MalformedStream("mpeg audio version".into())),
        };
        let layer = match br.read_bits(2)? {
            0 => return Err(PlayError::MalformedStream("mpeg audio layer".into())),
            l => 4 - l as u8,
        };
        br.skip_bits(1)?; // protection
        let bitrate_index = br.read_bits(4)? as u8;
        let sample_rate_index = br.read_bits(2)? as u8;
        let padding = br.read_bit()?;
        br.skip_bits(1)?; // private
        let channel_mode = br.read_bits(2)? as u8;

        Ok(Self {
            version,
            layer,
            bitrate_index,
            sample_rate_index,
            padding,
            channel_mode,
        })
    }

    /// Bitrate in bit/s; 0 for free format or the reserved index.
    pub fn bitrate(&self) -> u32 {
        let lsf = (self.version != MpegVersion::Mpeg1) as usize;
        BITRATE_TABLE[lsf][self.layer as usize][self.bitrate_index as usize & 0xF] * 1000
    }

    /// Sample rate in Hz; 0 for the reserved index.
    pub fn sample_rate(&self) -> u32 {
        let rate = SAMPLE_RATE_TABLE[self.sample_rate_index as usize & 3];
        match self.version {
            MpegVersion::Mpeg1 => rate,
            MpegVersion::Mpeg2 => rate >> 1,
            MpegVersion::Mpeg25 => rate >> 2,
        }
    }

    /// Frame length in bytes, `None` when the header has no usable size.
    pub fn frame_size(&self) -> Option<usize> {
        let bitrate = self.bitrate() as usize;
        let sample_rate = self.sample_rate() as usize;
        if bitrate == 0 || sample_rate == 0 {
            return None;
        }
        let padding = self.padding as usize;
        let size = match (self.layer, self.version) {
            (1, _) => (12 * bitrate / sample_rate + padding) * 4,
            (3, MpegVersion::Mpeg2) | (3, MpegVersion::Mpeg25) => {
                72 * bitrate / sample_rate + padding
            }
            _ => 144 * bitrate / sample_rate + padding,
        };
        Some(size)
    }
}

/// Rejects positions that cannot start an MPEG audio frame.
pub fn fast_check(p: &[u8]) -> bool {
    if p.len() < 3 || p[0] != 0xFF {
        return false;
    }
    // sync, version not reserved, layer not reserved
    if (p[1] & 0xE0) != 0xE0 || (p[1] & 0x18) == 0x08 || (p[1] & 0x06) == 0 {
        return false;
    }
    // bitrate index 15 and sample rate index 3 are reserved
    (p[2] & 0xF0) != 0xF0 && (p[2] & 0x0C) != 0x0C
}

/// Measures the MPEG audio frame at the start of `data`.
pub fn measure(data: &[u8]) -> Probe {
    let header = match MpegAudioHeader::parse(data) {
        Ok(h) => h,
        Err(_) => return Probe::Invalid,
    };
    let frame_size = match header.frame_size() {
        Some(n) if n > 0 => n,
        _ => return Probe::Invalid,
    };
    if frame_size + 4 > data.len() {
        return Probe::NeedMore(frame_size + 4);
    }
    if fast_check(&data[frame_size..]) {
        Probe::Frame(frame_size)
    } else {
        Probe::Invalid
    }
}
