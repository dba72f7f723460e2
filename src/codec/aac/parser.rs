use super::types::{AdtsHeader, ADTS_HEADER_SIZE};
use crate::codec::Probe;

/// ADTS: 12 bit sync, layer 0, sample rate index not 15.
pub fn fast_check_adts(p: &[u8]) -> bool {
    p.len() >= 3 && p[0] == 0xFF && (p[1] & 0xF6) == 0xF0 && (p[2] & 0x3C) != 0x3C
}

/// Measures the ADTS frame at the start of `data`.
pub fn measure_adts(data: &[u8]) -> Probe {
    let header = match AdtsHeader::parse(data) {
        Ok(h) => h,
        Err(_) if data.len() < ADTS_HEADER_SIZE => return Probe::NeedMore(ADTS_HEADER_SIZE),
        Err(_) => return Probe::Invalid,
    };
    let frame_size = header.frame_length as usize;
    if frame_size < ADTS_HEADER_SIZE {
        return Probe::Invalid;
    }
    if frame_size + 3 > data.len() {
        return Probe::NeedMore(frame_size + 3);
    }
    if fast_check_adts(&data[frame_size..]) {
        Probe::Frame(frame_size)
    } else {
        Probe::Invalid
    }
}

/// LOAS/LATM: 11 bit sync word 0x2B7.
pub fn fast_check_latm(p: &[u8]) -> bool {
    p.len() >= 2 && p[0] == 0x56 && (p[1] & 0xE0) == 0xE0
}

/// Measures the LATM frame at the start of `data`.
pub fn measure_latm(data: &[u8]) -> Probe {
    if data.len() < 3 {
        return Probe::NeedMore(3);
    }
    // 13 bit length after the 3 byte sync/length header
    let frame_size = ((((data[1] & 0x1F) as usize) << 8) | data[2] as usize) + 3;
    if frame_size + 2 > data.len() {
        return Probe::NeedMore(frame_size + 2);
    }
    if fast_check_latm(&data[frame_size..]) {
        Probe::Frame(frame_size)
    } else {
        Probe::Invalid
    }
}
