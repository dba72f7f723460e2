//! Audio output backends.
//!
//! The drain worker only talks to the [`AudioSink`] trait; which variant is
//! active is decided once, by name, when the output is created.

use super::ring::BYTES_PER_SAMPLE;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Period the software sinks pretend to have, in milliseconds.
pub const SINK_PERIOD_MS: usize = 24;

/// Hardware parameters reported by a successful [`AudioSink::setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkParams {
    /// Bytes the sink consumes per period.
    pub period_bytes: usize,
}

impl SinkParams {
    fn for_format(rate: u32, channels: u32) -> Self {
        Self {
            period_bytes: rate as usize * channels as usize * BYTES_PER_SAMPLE * SINK_PERIOD_MS
                / 1000,
        }
    }
}

/// Capability interface of an audio output backend.
pub trait AudioSink: Send {
    fn name(&self) -> &str;
    /// Reconfigures the sink for a new format epoch.
    fn setup(&mut self, rate: u32, channels: u32, passthrough: bool) -> Result<SinkParams>;
    fn play(&mut self);
    fn pause(&mut self);
    fn is_playing(&self) -> bool;
    /// Samples queued inside the sink, in 90 kHz ticks.
    fn delay(&self) -> i64;
    /// Hardware volume, 0..1000.
    fn set_volume(&mut self, volume: i32);
    /// Drops everything queued inside the sink.
    fn flush(&mut self);
    /// Waits until the sink can take more data. False on timeout.
    fn wait_ready(&mut self, timeout: Duration) -> bool;
    /// Bytes `write` accepts right now.
    fn available(&self) -> usize;
    /// Returns the bytes accepted.
    fn write(&mut self, data: &[u8]) -> usize;
}

/// Accepts and discards everything.
#[derive(Debug, Default)]
pub struct NoopSink {
    playing: bool,
}

impl NoopSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    fn setup(&mut self, rate: u32, channels: u32, _passthrough: bool) -> Result<SinkParams> {
        Ok(SinkParams::for_format(rate, channels))
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn delay(&self) -> i64 {
        0
    }

    fn set_volume(&mut self, _volume: i32) {}

    fn flush(&mut self) {}

    fn wait_ready(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn available(&self) -> usize {
        usize::MAX
    }

    fn write(&mut self, data: &[u8]) -> usize {
        data.len()
    }
}

#[derive(Debug, Default)]
struct CaptureState {
    data: Mutex<Vec<u8>>,
    formats: Mutex<Vec<(u32, u32, bool)>>,
    closed: AtomicBool,
    flushes: AtomicUsize,
    volume: AtomicI32,
}

/// Observer side of a [`CaptureSink`].
#[derive(Debug, Clone, Default)]
pub struct CaptureHandle {
    state: Arc<CaptureState>,
}

impl CaptureHandle {
    /// Bytes drained so far.
    pub fn captured(&self) -> Vec<u8> {
        self.state.data.lock().clone()
    }

    pub fn captured_len(&self) -> usize {
        self.state.data.lock().len()
    }

    /// Every `(rate, channels, passthrough)` the sink was set up with.
    pub fn formats(&self) -> Vec<(u32, u32, bool)> {
        self.state.formats.lock().clone()
    }

    pub fn flushes(&self) -> usize {
        self.state.flushes.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> i32 {
        self.state.volume.load(Ordering::Acquire)
    }

    /// A closed gate makes the sink refuse data, as a stalled device would.
    pub fn set_gate(&self, open: bool) {
        self.state.closed.store(!open, Ordering::Release);
    }
}

/// Keeps drained bytes in memory.
#[derive(Debug)]
pub struct CaptureSink {
    state: Arc<CaptureState>,
    chunk: usize,
    playing: bool,
}

impl CaptureSink {
    /// A sink accepting at most `chunk` bytes per write.
    pub fn new(chunk: usize) -> (Self, CaptureHandle) {
        let handle = CaptureHandle::default();
        let sink = Self {
            state: handle.state.clone(),
            chunk,
            playing: false,
        };
        (sink, handle)
    }

    fn is_open(&self) -> bool {
        !self.state.closed.load(Ordering::Acquire)
    }
}

impl AudioSink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn setup(&mut self, rate: u32, channels: u32, passthrough: bool) -> Result<SinkParams> {
        self.state.formats.lock().push((rate, channels, passthrough));
        Ok(SinkParams::for_format(rate, channels))
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn delay(&self) -> i64 {
        0
    }

    fn set_volume(&mut self, volume: i32) {
        self.state.volume.store(volume, Ordering::Release);
    }

    fn flush(&mut self) {
        self.state.flushes.fetch_add(1, Ordering::AcqRel);
    }

    fn wait_ready(&mut self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        self.is_open()
    }

    fn available(&self) -> usize {
        if self.is_open() {
            self.chunk
        } else {
            0
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.available());
        self.state.data.lock().extend_from_slice(&data[..n]);
        n
    }
}

/// Selects a sink variant by name; unknown names fall back to noop.
pub fn sink_by_name(name: &str) -> Box<dyn AudioSink> {
    match name.to_ascii_lowercase().as_str() {
        "noop" => Box::new(NoopSink::new()),
        "capture" => Box::new(CaptureSink::new(64 * 1024).0),
        other => {
            log::error!("audio: unknown output module '{}', using noop", other);
            Box::new(NoopSink::new())
        }
    }
}
