//! # Codec sniffing
//!
//! Broadcast streams carry no out-of-band codec signaling, so the codec is
//! recognized from the bitstream. Every audio family offers the same pair of
//! checks:
//!
//! - a fast check on the first 2-4 bytes that rejects most positions
//! - a measurement that validates one frame and confirms that the next
//!   frame starts right after it (double sync)
//!
//! ```rust
//! use vdkplay::codec::{AudioFamily, Probe};
//!
//! let window = [0x0B, 0x77, 0x00, 0x00, 0x00, 0x40];
//! assert!(AudioFamily::Ac3.fast_check(&window));
//! // one header is not enough to confirm a frame
//! assert!(matches!(AudioFamily::Ac3.measure(&window), Probe::NeedMore(_)));
//! ```

pub mod aac;
pub mod ac3;
pub mod h264;
pub mod h265;
pub mod mpeg;
pub mod video;

use crate::av::CodecId;

/// Outcome of measuring one candidate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// A complete frame of this many bytes, followed by another sync.
    Frame(usize),
    /// At least this many bytes are needed before deciding.
    NeedMore(usize),
    /// Not a frame; advance one byte.
    Invalid,
}

impl Probe {
    /// Signed form: frame length, `-(needed)` or 0.
    pub fn as_raw(self) -> i64 {
        match self {
            Probe::Frame(n) => n as i64,
            Probe::NeedMore(n) => -(n as i64),
            Probe::Invalid => 0,
        }
    }
}

/// Audio codec families the scanners know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFamily {
    Mpeg,
    Ac3,
    Latm,
    Adts,
}

/// Scan order of the TS audio path.
pub const TS_SCAN_ORDER: [AudioFamily; 4] = [
    AudioFamily::Mpeg,
    AudioFamily::Ac3,
    AudioFamily::Latm,
    AudioFamily::Adts,
];

impl AudioFamily {
    pub fn fast_check(self, window: &[u8]) -> bool {
        match self {
            AudioFamily::Mpeg => mpeg::fast_check(window),
            AudioFamily::Ac3 => ac3::fast_check(window),
            AudioFamily::Latm => aac::fast_check_latm(window),
            AudioFamily::Adts => aac::fast_check_adts(window),
        }
    }

    pub fn measure(self, window: &[u8]) -> Probe {
        match self {
            AudioFamily::Mpeg => mpeg::measure(window),
            AudioFamily::Ac3 => ac3::measure(window),
            AudioFamily::Latm => aac::measure_latm(window),
            AudioFamily::Adts => aac::measure_adts(window),
        }
    }

    /// Codec of a frame of this family starting at `window`.
    pub fn codec_id(self, window: &[u8]) -> CodecId {
        match self {
            AudioFamily::Mpeg => CodecId::MpegAudio,
            AudioFamily::Ac3 if ac3::is_eac3(window) => CodecId::Eac3,
            AudioFamily::Ac3 => CodecId::Ac3,
            AudioFamily::Latm => CodecId::AacLatm,
            AudioFamily::Adts => CodecId::AacAdts,
        }
    }
}

/// Tries the families in `order` at the start of `window`.
///
/// The first family whose fast check passes and whose measurement is not
/// [`Probe::Invalid`] decides the result.
pub fn probe(window: &[u8], order: &[AudioFamily]) -> (CodecId, Probe) {
    for family in order {
        if !family.fast_check(window) {
            continue;
        }
        match family.measure(window) {
            Probe::Invalid => continue,
            r => return (family.codec_id(window), r),
        }
    }
    (CodecId::None, Probe::Invalid)
}
