use crate::error::{PlayError, Result};
use crate::utils::BitReader;

/// Size of an ADTS header without CRC.
pub const ADTS_HEADER_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    Main = 0,
    LC = 1,
    SSR = 2,
    LTP = 3,
}

impl From<u8> for ProfileType {
    fn from(value: u8) -> Self {
        match value & 3 {
            0 => ProfileType::Main,
            1 => ProfileType::LC,
            2 => ProfileType::SSR,
            _ => ProfileType::LTP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsHeader {
    /// ID bit: MPEG-2 rather than MPEG-4.
    pub mpeg2: bool,
    /// No CRC follows the header.
    pub protection_absent: bool,
    pub profile: ProfileType,
    /// 4 bit sampling frequency index.
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
    /// 13 bits, header included.
    pub frame_length: u16,
    pub buffer_fullness: u16,
    /// Raw data blocks in the frame minus one.
    pub number_of_raw_blocks: u8,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ADTS_HEADER_SIZE {
            return Err(PlayError::MalformedStream("ADTS header too short".into()));
        }

        let mut reader = BitReader::new(data);
        if reader.read_bits(12)? != 0xFFF {
            return Err(PlayError::MalformedStream("ADTS sync word".into()));
        }
        let mpeg2 = reader.read_bit()?;
        if reader.read_bits(2)? != 0 {
            return Err(PlayError::MalformedStream("ADTS layer".into()));
        }
        let protection_absent = reader.read_bit()?;
        let profile = ProfileType::from(reader.read_bits(2)? as u8);
        let sample_rate_index = reader.read_bits(4)? as u8;
        reader.skip_bits(1)?; // private
        let channel_configuration = reader.read_bits(3)? as u8;
        reader.skip_bits(4)?; // original/copy, home, copyright bits
        let frame_length = reader.read_bits(13)? as u16;
        let buffer_fullness = reader.read_bits(11)? as u16;
        let number_of_raw_blocks = reader.read_bits(2)? as u8;

        Ok(AdtsHeader {
            mpeg2,
            protection_absent,
            profile,
            sample_rate_index,
            channel_configuration,
            frame_length,
            buffer_fullness,
            number_of_raw_blocks,
        })
    }

    pub fn sample_rate(&self) -> Option<u32> {
        match self.sample_rate_index {
            0 => Some(96000),
            1 => Some(88200),
            2 => Some(64000),
            3 => Some(48000),
            4 => Some(44100),
            5 => Some(32000),
            6 => Some(24000),
            7 => Some(22050),
            8 => Some(16000),
            9 => Some(12000),
            10 => Some(11025),
            11 => Some(8000),
            12 => Some(7350),
            _ => None,
        }
    }
}
