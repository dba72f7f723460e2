//! Gain stages applied to decoded samples. All factors are in 1/1000.

/// Samples summed into one normalizer bucket.
pub const NORMALIZE_SAMPLES: usize = 4096;
/// Buckets averaged for the long-term level.
pub const NORMALIZE_BUCKETS: usize = 128;
pub const MIN_NORMALIZE: i32 = 100;
/// Upper bound for any configured gain cap.
pub const MAX_GAIN_FACTOR: i32 = 10_000;
/// Gain of a freshly reset compressor, before the configured cap.
const COMPRESSOR_START: i32 = 2000;

fn scale(samples: &mut [i16], factor: i32) {
    for s in samples.iter_mut() {
        let t = *s as i32 * factor / 1000;
        *s = t.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

/// `old * weight + new * (1000 - weight)`, in 1/1000.
fn blend(old: i32, new: i32, weight: i64) -> i32 {
    let mixed = (old as i64 * weight + new as i64 * (1000 - weight)) / 1000;
    mixed.clamp(0, i32::MAX as i64) as i32
}

/// Dynamic range compressor: boosts quiet passages without ever clipping
/// the loudest sample of a block.
#[derive(Debug, Clone)]
pub struct Compressor {
    factor: i32,
    max_factor: i32,
}

impl Compressor {
    pub fn new(max_factor: i32) -> Self {
        let mut compressor = Self {
            factor: 1000,
            max_factor: max_factor.clamp(0, MAX_GAIN_FACTOR),
        };
        compressor.reset();
        compressor
    }

    pub fn factor(&self) -> i32 {
        self.factor
    }

    pub fn reset(&mut self) {
        self.factor = COMPRESSOR_START.min(self.max_factor);
    }

    pub fn set_max_factor(&mut self, max_factor: i32) {
        self.max_factor = max_factor.clamp(0, MAX_GAIN_FACTOR);
        if self.factor == 0 {
            self.factor = 1000;
        }
        self.factor = self.factor.min(self.max_factor);
    }

    pub fn process(&mut self, samples: &mut [i16]) {
        let loudest = samples
            .iter()
            .map(|&s| (s as i32).abs())
            .max()
            .unwrap_or(0);
        if loudest == 0 {
            return;
        }

        let factor = i16::MAX as i32 * 1000 / loudest;
        self.factor = blend(self.factor, factor, 950)
            .min(factor)
            .min(self.max_factor);
        log::trace!(
            "audio/compress: max {} fac={} com={}",
            loudest,
            factor,
            self.factor
        );
        scale(samples, self.factor);
    }
}

/// Loudness normalizer over a rolling RMS history.
#[derive(Debug, Clone)]
pub struct Normalizer {
    factor: i32,
    max_factor: i32,
    average: [u32; NORMALIZE_BUCKETS],
    index: usize,
    ready: usize,
    counter: usize,
}

impl Normalizer {
    pub fn new(max_factor: i32) -> Self {
        Self {
            factor: 1000,
            max_factor: max_factor.clamp(0, MAX_GAIN_FACTOR),
            average: [0; NORMALIZE_BUCKETS],
            index: 0,
            ready: 0,
            counter: 0,
        }
    }

    pub fn factor(&self) -> i32 {
        self.factor
    }

    pub fn set_max_factor(&mut self, max_factor: i32) {
        self.max_factor = max_factor.clamp(0, MAX_GAIN_FACTOR);
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.ready = 0;
        self.average = [0; NORMALIZE_BUCKETS];
        self.factor = 1000;
    }

    pub fn process(&mut self, samples: &mut [i16]) {
        let mut rest = &samples[..];
        while !rest.is_empty() {
            let n = rest.len().min(NORMALIZE_SAMPLES - self.counter);
            let (block, tail) = rest.split_at(n);
            let sum = block.iter().fold(self.average[self.index], |avg, &s| {
                let t = s as i32;
                avg.wrapping_add((t * t) as u32 / NORMALIZE_SAMPLES as u32)
            });
            self.average[self.index] = sum;
            self.counter += n;
            rest = tail;

            if self.counter >= NORMALIZE_SAMPLES {
                self.bucket_done();
            }
        }
        scale(samples, self.factor);
    }

    fn bucket_done(&mut self) {
        if self.ready < NORMALIZE_BUCKETS {
            self.ready += 1;
        } else {
            let avg: u32 = self
                .average
                .iter()
                .map(|&a| a / NORMALIZE_BUCKETS as u32)
                .sum();
            if avg > 0 {
                let root = (avg as f64).sqrt() as i32;
                let factor = (i16::MAX as i32 / 8) * 1000 / root.max(1);
                self.factor = blend(self.factor, factor, 500)
                    .clamp(MIN_NORMALIZE, self.max_factor.max(MIN_NORMALIZE));
            }
            log::trace!("audio/normalize: avg {} norm={}", avg, self.factor);
        }
        self.index = (self.index + 1) % NORMALIZE_BUCKETS;
        self.counter = 0;
        self.average[self.index] = 0;
    }
}

/// Software volume applied while draining. Mute or a zero amplifier
/// silences the block.
pub fn amplify(samples: &mut [i16], amplifier: i32, mute: bool) {
    if mute || amplifier == 0 {
        samples.fill(0);
        return;
    }
    scale(samples, amplifier);
}
