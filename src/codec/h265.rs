//! H.265/HEVC NAL unit types (two byte NAL header).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    TrailN = 0,
    TrailR = 1,
    IdrWRadl = 19,
    IdrNLp = 20,
    Cra = 21,
    Vps = 32,
    Sps = 33,
    Pps = 34,
    Aud = 35,
    Eos = 36,
    Eob = 37,
    PrefixSei = 39,
    SuffixSei = 40,
}

/// First header byte of an access unit delimiter, layer 0.
pub const AUD_HEADER: u8 = (NALUnitType::Aud as u8) << 1;

/// End of bitstream NAL, appended after a still picture.
pub const END_OF_BITSTREAM: [u8; 5] = [0x00, 0x00, 0x01, (NALUnitType::Eob as u8) << 1, 0x01];
