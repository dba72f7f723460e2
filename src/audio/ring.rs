use crate::error::{PlayError, Result};
use parking_lot::{Mutex, MutexGuard};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of segments (format epochs) in the ring.
pub const AUDIO_RING_MAX: usize = 4;
/// Byte capacity of one segment.
pub const SEGMENT_BUFFER_SIZE: usize = 3 * 5 * 7 * 8 * 1000;
pub const BYTES_PER_SAMPLE: usize = 2;
/// Supported sample rates, ascending.
pub const SAMPLE_RATES: [u32; 3] = [44100, 48000, 192000];
pub const MAX_CHANNELS: usize = 8;

/// Output channel count for every (sample rate, input channels) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMatrix {
    rows: [[u8; MAX_CHANNELS + 1]; SAMPLE_RATES.len()],
}

impl Default for ChannelMatrix {
    fn default() -> Self {
        Self {
            rows: [[0, 2, 2, 4, 4, 6, 6, 8, 8]; SAMPLE_RATES.len()],
        }
    }
}

impl ChannelMatrix {
    /// Everything rendered as stereo.
    pub fn downmix() -> Self {
        Self {
            rows: [[0, 2, 2, 2, 2, 2, 2, 2, 2]; SAMPLE_RATES.len()],
        }
    }

    /// Hardware channel count for `channels` input channels at `rate`.
    pub fn resolve(&self, rate: u32, channels: u32) -> Result<u32> {
        let row = SAMPLE_RATES
            .iter()
            .position(|&r| r == rate)
            .ok_or_else(|| PlayError::UnsupportedFormat(format!("{}Hz sample rate", rate)))?;
        match self.rows[row].get(channels as usize) {
            Some(&hw) if hw > 0 => Ok(hw as u32),
            _ => Err(PlayError::UnsupportedFormat(format!(
                "{} channels at {}Hz",
                channels, rate
            ))),
        }
    }
}

/// Format of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFormat {
    pub in_rate: u32,
    pub in_channels: u32,
    pub hw_rate: u32,
    pub hw_channels: u32,
    pub passthrough: bool,
}

impl SegmentFormat {
    /// A segment that was never set up has no rate.
    pub fn is_ready(&self) -> bool {
        self.hw_rate != 0
    }

    pub fn frame_bytes(&self) -> usize {
        self.hw_channels as usize * BYTES_PER_SAMPLE
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.hw_rate as u64 * self.frame_bytes() as u64
    }

    /// Play time of `bytes` in 90 kHz ticks.
    pub fn bytes_to_ticks(&self, bytes: usize) -> i64 {
        match self.bytes_per_second() {
            0 => 0,
            bps => (bytes as u64 * 90_000 / bps) as i64,
        }
    }
}

/// One format epoch: its format, clock and sample bytes.
pub struct AudioSegment {
    /// Consumer must flush the sink before playing this segment.
    pub flush: bool,
    pub format: SegmentFormat,
    /// Size of the first enqueued packet.
    pub packet_size: usize,
    /// Clock of the next byte written, 90 kHz.
    pub pts: Option<i64>,
    buffer: HeapRb<u8>,
}

impl AudioSegment {
    fn new() -> Self {
        Self {
            flush: false,
            format: SegmentFormat::default(),
            packet_size: 0,
            pts: None,
            buffer: HeapRb::new(SEGMENT_BUFFER_SIZE),
        }
    }

    fn reset(&mut self, format: SegmentFormat) {
        self.flush = false;
        self.format = format;
        self.packet_size = 0;
        self.pts = None;
        self.buffer.clear();
    }

    pub fn used(&self) -> usize {
        self.buffer.occupied_len()
    }

    pub fn free(&self) -> usize {
        self.buffer.vacant_len()
    }

    /// Appends whole frames of `data` that fit; returns bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let frame = self.format.frame_bytes().max(1);
        let n = data.len().min(self.free() / frame * frame);
        self.buffer.push_slice(&data[..n])
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.buffer.pop_slice(out)
    }

    /// Drops up to `n` unread bytes.
    pub fn skip(&mut self, n: usize) -> usize {
        self.buffer.skip(n)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Ring of [`AudioSegment`]s.
///
/// The producer owns the write index, the consumer the read index; `filled`
/// counts the segments queued after the read segment and is updated after
/// the segment it announces is complete.
pub struct AudioRing {
    segments: Vec<Mutex<AudioSegment>>,
    write: AtomicUsize,
    read: AtomicUsize,
    filled: AtomicUsize,
    matrix: ChannelMatrix,
}

impl AudioRing {
    pub fn new(matrix: ChannelMatrix) -> Self {
        Self {
            segments: (0..AUDIO_RING_MAX)
                .map(|_| Mutex::new(AudioSegment::new()))
                .collect(),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            filled: AtomicUsize::new(0),
            matrix,
        }
    }

    pub fn matrix(&self) -> &ChannelMatrix {
        &self.matrix
    }

    pub fn filled(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    pub fn write_index(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    pub fn read_index(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    /// No room for another epoch: the write segment must never wrap onto
    /// the segment being read.
    pub fn is_full(&self) -> bool {
        self.filled() >= AUDIO_RING_MAX - 1
    }

    pub fn segment(&self, index: usize) -> MutexGuard<'_, AudioSegment> {
        self.segments[index % AUDIO_RING_MAX].lock()
    }

    pub fn write_segment(&self) -> MutexGuard<'_, AudioSegment> {
        self.segment(self.write_index())
    }

    pub fn read_segment(&self) -> MutexGuard<'_, AudioSegment> {
        self.segment(self.read_index())
    }

    /// Starts a new format epoch. Unsupported formats and a full ring are
    /// rejected without touching any segment.
    pub fn add_segment(&self, rate: u32, channels: u32, passthrough: bool) -> Result<()> {
        let hw_channels = self.matrix.resolve(rate, channels)?;
        self.push(
            SegmentFormat {
                in_rate: rate,
                in_channels: channels,
                hw_rate: rate,
                hw_channels,
                passthrough,
            },
            false,
        )
    }

    /// Queues a flush epoch that repeats the current write format.
    pub fn push_flush(&self) -> Result<()> {
        let format = self.write_segment().format;
        self.push(format, true)
    }

    fn push(&self, format: SegmentFormat, flush: bool) -> Result<()> {
        if self.is_full() {
            return Err(PlayError::BufferExhaustion("out of audio ring segments".into()));
        }
        let index = (self.write_index() + 1) % AUDIO_RING_MAX;
        {
            let mut segment = self.segment(index);
            segment.reset(format);
            segment.flush = flush;
        }
        self.write.store(index, Ordering::Release);
        self.filled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Consumer: moves on to the next queued segment.
    pub fn advance_read(&self) -> bool {
        if self.filled() == 0 {
            return false;
        }
        let index = (self.read_index() + 1) % AUDIO_RING_MAX;
        self.read.store(index, Ordering::Release);
        self.filled.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Consumer: jumps to the last queued flush segment, dropping everything
    /// queued before it. Returns the segments skipped.
    pub fn take_flush(&self) -> usize {
        let filled = self.filled();
        let read = self.read_index();
        let mut skipped = 0;
        for i in 1..=filled {
            let mut segment = self.segment(read + i);
            if segment.flush {
                segment.flush = false;
                skipped = i;
            }
        }
        if skipped > 0 {
            self.read.store((read + skipped) % AUDIO_RING_MAX, Ordering::Release);
            self.filled.fetch_sub(skipped, Ordering::AcqRel);
        }
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn invariant_holds(ring: &AudioRing) -> bool {
        ring.filled() == (ring.write_index() + AUDIO_RING_MAX - ring.read_index()) % AUDIO_RING_MAX
    }

    #[test]
    fn supported_pairs_resolve_to_even_layouts() {
        for matrix in [ChannelMatrix::default(), ChannelMatrix::downmix()] {
            for &rate in &SAMPLE_RATES {
                for channels in 1..=MAX_CHANNELS as u32 {
                    let ring = AudioRing::new(matrix.clone());
                    ring.add_segment(rate, channels, false).unwrap();
                    let hw = ring.write_segment().format.hw_channels;
                    assert!([2, 4, 6, 8].contains(&hw), "{} -> {}", channels, hw);
                }
            }
        }
    }

    #[test]
    fn unsupported_formats_leave_ring_untouched() {
        let ring = AudioRing::new(ChannelMatrix::default());
        for (rate, channels) in [(32000, 2), (44101, 2), (48000, 0), (48000, 9), (0, 2)] {
            let err = ring.add_segment(rate, channels, false).unwrap_err();
            assert!(matches!(err, PlayError::UnsupportedFormat(_)));
        }
        assert_eq!(ring.filled(), 0);
        assert_eq!(ring.write_index(), 0);
        assert!(!ring.write_segment().format.is_ready());
    }

    #[test]
    fn full_ring_rejects_new_epoch() {
        let ring = AudioRing::new(ChannelMatrix::default());
        for _ in 0..AUDIO_RING_MAX - 1 {
            ring.add_segment(48000, 2, false).unwrap();
        }
        let err = ring.add_segment(44100, 2, false).unwrap_err();
        assert!(matches!(err, PlayError::BufferExhaustion(_)));
        assert_ne!(ring.write_index(), ring.read_index());
        assert_eq!(ring.write_segment().format.hw_rate, 48000);
    }

    #[test]
    fn flush_jumps_over_queued_epochs() {
        let ring = AudioRing::new(ChannelMatrix::default());
        ring.add_segment(48000, 2, false).unwrap();
        ring.write_segment().write(&[1, 2, 3, 4]);
        ring.push_flush().unwrap();
        assert_eq!(ring.filled(), 2);

        assert_eq!(ring.take_flush(), 2);
        assert_eq!(ring.filled(), 0);
        assert_eq!(ring.read_index(), ring.write_index());
        let segment = ring.read_segment();
        assert!(!segment.flush);
        assert_eq!(segment.format.hw_rate, 48000);
        assert_eq!(segment.used(), 0);
    }

    #[test]
    fn writes_keep_frame_alignment() {
        let ring = AudioRing::new(ChannelMatrix::default());
        ring.add_segment(48000, 6, false).unwrap();
        let mut segment = ring.write_segment();
        let big = vec![0u8; SEGMENT_BUFFER_SIZE + 100];
        let n = segment.write(&big);
        assert_eq!(n % 12, 0);
        assert!(segment.free() < 12);
        assert_eq!(segment.skip(n), n);
        assert_eq!(segment.used(), 0);
    }

    #[quickcheck]
    fn fill_counter_matches_indices(ops: Vec<bool>) -> bool {
        let ring = AudioRing::new(ChannelMatrix::default());
        ops.into_iter().all(|add| {
            if add {
                let _ = ring.add_segment(48000, 2, false);
            } else {
                ring.advance_read();
            }
            invariant_holds(&ring)
        })
    }
}
