//! AC-3 and E-AC-3 sync frames.

use super::Probe;

/// 16-bit words per frame by [frmsizecod][fscod] (48, 44.1, 32 kHz).
const FRAME_SIZE_TABLE: [[u16; 3]; 38] = [
    [64, 69, 96],
    [64, 70, 96],
    [80, 87, 120],
    [80, 88, 120],
    [96, 104, 144],
    [96, 105, 144],
    [112, 121, 168],
    [112, 122, 168],
    [128, 139, 192],
    [128, 140, 192],
    [160, 174, 240],
    [160, 175, 240],
    [192, 208, 288],
    [192, 209, 288],
    [224, 243, 336],
    [224, 244, 336],
    [256, 278, 384],
    [256, 279, 384],
    [320, 348, 480],
    [320, 349, 480],
    [384, 417, 576],
    [384, 418, 576],
    [448, 487, 672],
    [448, 488, 672],
    [512, 557, 768],
    [512, 558, 768],
    [640, 696, 960],
    [640, 697, 960],
    [768, 835, 1152],
    [768, 836, 1152],
    [896, 975, 1344],
    [896, 976, 1344],
    [1024, 1114, 1536],
    [1024, 1115, 1536],
    [1152, 1253, 1728],
    [1152, 1254, 1728],
    [1280, 1393, 1920],
    [1280, 1394, 1920],
];

/// Bytes needed to read the header fields used here.
const HEADER_SIZE: usize = 6;

/// Frame size in bytes for an AC-3 (fscod, frmsizecod) pair.
pub fn frame_size(fscod: u8, frmsizecod: u8) -> Option<usize> {
    if fscod > 2 {
        return None;
    }
    FRAME_SIZE_TABLE
        .get(frmsizecod as usize)
        .map(|row| row[fscod as usize] as usize * 2)
}

pub fn fast_check(p: &[u8]) -> bool {
    p.len() >= 2 && p[0] == 0x0B && p[1] == 0x77
}

/// bsid above 10 marks an E-AC-3 frame.
pub fn is_eac3(p: &[u8]) -> bool {
    p.len() >= HEADER_SIZE && p[5] > (10 << 3)
}

/// Measures the AC-3 or E-AC-3 frame at the start of `data`.
pub fn measure(data: &[u8]) -> Probe {
    if data.len() < HEADER_SIZE {
        return Probe::NeedMore(HEADER_SIZE);
    }

    let frame_size = if is_eac3(data) {
        // fscod and fscod2 both 3 is reserved
        if (data[4] & 0xF0) == 0xF0 {
            return Probe::Invalid;
        }
        let words = (((data[2] & 0x07) as usize) << 8) | data[3] as usize;
        (words + 1) * 2
    } else {
        match frame_size(data[4] >> 6, data[4] & 0x3F) {
            Some(n) => n,
            None => return Probe::Invalid,
        }
    };

    if frame_size + 5 > data.len() {
        return Probe::NeedMore(frame_size + 5);
    }
    if fast_check(&data[frame_size..]) {
        Probe::Frame(frame_size)
    } else {
        Probe::Invalid
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// AC-3 frame with the given codes; bsid 8.
    pub(crate) fn ac3_frame(fscod: u8, frmsizecod: u8) -> Vec<u8> {
        let size = frame_size(fscod, frmsizecod).unwrap();
        let mut frame = vec![0u8; size];
        frame[..6].copy_from_slice(&[0x0B, 0x77, 0x00, 0x00, (fscod << 6) | frmsizecod, 0x40]);
        frame
    }

    fn eac3_frame(words: usize) -> Vec<u8> {
        let mut frame = vec![0u8; words * 2];
        let frmsiz = words - 1;
        frame[..6].copy_from_slice(&[
            0x0B,
            0x77,
            (frmsiz >> 8) as u8 & 0x07,
            (frmsiz & 0xFF) as u8,
            0x00,
            0x80,
        ]);
        frame
    }

    #[test]
    fn table_lookup() {
        assert_eq!(frame_size(0, 0), Some(128));
        assert_eq!(frame_size(1, 1), Some(140));
        assert_eq!(frame_size(2, 37), Some(3840));
        assert_eq!(frame_size(3, 0), None);
        assert_eq!(frame_size(0, 38), None);
    }

    #[test]
    fn ac3_double_sync() {
        let mut data = ac3_frame(0, 0x0E);
        data.extend(ac3_frame(0, 0x0E));
        assert!(!is_eac3(&data));
        assert_eq!(measure(&data), Probe::Frame(448));
        assert_eq!(measure(&data[..450]), Probe::NeedMore(453));
    }

    #[test]
    fn ac3_reserved_codes() {
        let mut data = ac3_frame(0, 0);
        data.extend(ac3_frame(0, 0));
        data[4] = 0xC0;
        assert_eq!(measure(&data), Probe::Invalid);
        data[4] = 0x26;
        assert_eq!(measure(&data), Probe::Invalid);
    }

    #[test]
    fn eac3_size_from_frmsiz() {
        let mut data = eac3_frame(768);
        data.extend(eac3_frame(768));
        assert!(is_eac3(&data));
        assert_eq!(measure(&data), Probe::Frame(1536));

        data[4] = 0xF0;
        assert_eq!(measure(&data), Probe::Invalid);
    }

    #[test]
    fn short_window_needs_header() {
        assert_eq!(measure(&[0x0B, 0x77, 0x00]), Probe::NeedMore(6));
    }
}
