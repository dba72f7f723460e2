use super::clock::{self, TICKS_PER_MS};
use super::filter::{amplify, Compressor, Normalizer};
use super::remix::remix;
use super::ring::{AudioRing, AudioSegment, ChannelMatrix, AUDIO_RING_MAX};
use super::sink::AudioSink;
use crate::av::HostClock;
use crate::config::{Config, DEFAULT_AUDIO_BUFFER_TIME_MS};
use crate::error::{PlayError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Largest block handed to the sink in one write.
const DRAIN_CHUNK: usize = 200 * 1024;
/// Sinks accepting less than this are not worth a write.
const MIN_SINK_WRITE: usize = 256;
const SINK_WAIT: Duration = Duration::from_millis(24);
/// Bounded polling used by `flush`.
const FLUSH_POLLS: usize = 24 * 2;
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(1);
const CLOCK_RETRIES: usize = 10;
const CLOCK_RETRY_INTERVAL: Duration = Duration::from_millis(3);
/// Longest silence `insert_silence` accepts.
const MAX_SILENCE_MS: u32 = 5000;

/// Mailbox of the drain worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEvent {
    /// Enough audio is buffered, start draining.
    Start,
    /// A format epoch was queued.
    NewFormat,
    /// A flush epoch was queued.
    Flush,
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    buffer_time_ms: u32,
    fast_switch: bool,
    soft_volume: bool,
    normalize: bool,
    compression: bool,
    stereo_descent: i32,
    video_audio_delay: i64,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            buffer_time_ms: config.buffer_time_ms(),
            fast_switch: config.audio_fast_switch,
            soft_volume: config.audio_soft_volume,
            normalize: config.audio_normalize,
            compression: config.audio_compression,
            stereo_descent: config.audio_stereo_descent as i32,
            video_audio_delay: config.video_audio_delay,
        }
    }
}

/// Producer side sample processing state.
struct Pipeline {
    scratch: Vec<i16>,
    compressor: Compressor,
    normalizer: Normalizer,
}

/// Outcome of one sink drive.
enum Drive {
    /// Samples were written or the sink is busy.
    Playing,
    /// Read segment is empty.
    Underrun,
}

struct Shared {
    ring: AudioRing,
    sink: Mutex<Box<dyn AudioSink>>,
    pipeline: Mutex<Pipeline>,
    settings: Mutex<Settings>,
    host_clock: Option<Arc<dyn HostClock>>,
    events: UnboundedSender<DrainEvent>,
    running: AtomicBool,
    paused: AtomicBool,
    stop: AtomicBool,
    video_ready: AtomicBool,
    threshold: AtomicUsize,
    volume: AtomicI32,
    amplifier: AtomicI32,
    mute: AtomicBool,
}

/// Audio output: the segment ring, the sample pipeline feeding it and the
/// worker thread draining it into an [`AudioSink`].
///
/// All methods except the constructor are called from the producer side.
/// Samples are interleaved native-endian 16 bit.
pub struct AudioOutput {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AudioOutput {
    pub fn new(
        config: &Config,
        sink: Box<dyn AudioSink>,
        host_clock: Option<Arc<dyn HostClock>>,
    ) -> Result<Self> {
        let matrix = if config.audio_downmix {
            ChannelMatrix::downmix()
        } else {
            ChannelMatrix::default()
        };
        let (events, receiver) = mpsc::unbounded_channel();
        log::info!("audio: '{}' output module used", sink.name());

        let shared = Arc::new(Shared {
            ring: AudioRing::new(matrix),
            sink: Mutex::new(sink),
            pipeline: Mutex::new(Pipeline {
                scratch: Vec::new(),
                compressor: Compressor::new(config.audio_max_compression as i32),
                normalizer: Normalizer::new(config.audio_max_normalize as i32),
            }),
            settings: Mutex::new(Settings::from_config(config)),
            host_clock,
            events,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            video_ready: AtomicBool::new(false),
            threshold: AtomicUsize::new(0),
            volume: AtomicI32::new(1000),
            amplifier: AtomicI32::new(1000),
            mute: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("vdkplay audio".into())
            .spawn(move || worker_shared.run(receiver))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn ring(&self) -> &AudioRing {
        &self.shared.ring
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn is_video_ready(&self) -> bool {
        self.shared.video_ready.load(Ordering::Acquire)
    }

    /// Buffered bytes needed before playback starts.
    pub fn start_threshold(&self) -> usize {
        self.shared.threshold.load(Ordering::Acquire)
    }

    /// Effective software gain after stereo descent, 0..1000.
    pub fn amplifier(&self) -> i32 {
        self.shared.amplifier.load(Ordering::Acquire)
    }

    /// Queues a new format epoch.
    pub fn setup(&self, rate: u32, channels: u32, passthrough: bool) -> Result<()> {
        log::debug!(
            "audio: setup channels {} frequency {}Hz{}",
            channels,
            rate,
            if passthrough { " pass-through" } else { "" }
        );
        if rate == 0 || channels == 0 {
            return Err(PlayError::UnsupportedFormat(
                "bad channels or frequency parameters".into(),
            ));
        }
        if let Err(e) = self.shared.ring.add_segment(rate, channels, passthrough) {
            log::error!("audio: {}", e);
            return Err(e);
        }

        if !self.is_running() {
            // provisional until the sink reports its period
            let format = self.shared.ring.write_segment().format;
            let settings = *self.shared.settings.lock();
            let delay = clock::start_delay_ms(settings.buffer_time_ms, settings.video_audio_delay);
            self.shared.threshold.store(
                clock::start_threshold(0, format.hw_rate, format.hw_channels, delay),
                Ordering::Release,
            );
        }
        self.shared.wake(DrainEvent::NewFormat);
        Ok(())
    }

    /// Places samples in the current write segment and returns the bytes
    /// stored. A short count means the segment is full; the rest is lost.
    pub fn enqueue(&self, samples: &[u8]) -> usize {
        let shared = &self.shared;
        let mut segment = shared.ring.write_segment();
        let format = segment.format;
        if !format.is_ready() {
            log::debug!("audio: enqueue not ready");
            return 0;
        }
        if segment.packet_size == 0 {
            segment.packet_size = samples.len();
            log::debug!("audio: a/v packet size {} bytes", samples.len());
        }

        let settings = *shared.settings.lock();
        let mut guard = shared.pipeline.lock();
        let pipeline = &mut *guard;
        let processing = !format.passthrough
            && (settings.compression
                || settings.normalize
                || format.in_channels != format.hw_channels);

        let data: &[u8] = if processing {
            let in_frame = format.in_channels as usize * 2;
            let whole = samples.len() / in_frame * in_frame;
            let input: Vec<i16> = bytemuck::pod_collect_to_vec(&samples[..whole]);
            remix(
                &input,
                format.in_channels as usize,
                &mut pipeline.scratch,
                format.hw_channels as usize,
            );
            if settings.compression {
                pipeline.compressor.process(&mut pipeline.scratch);
            }
            if settings.normalize {
                pipeline.normalizer.process(&mut pipeline.scratch);
            }
            bytemuck::cast_slice(&pipeline.scratch)
        } else {
            samples
        };

        let count = data.len();
        let written = segment.write(data);
        drop(guard);
        if written != count {
            log::warn!(
                "audio: can't place {} bytes in ring buffer, {} dropped",
                count,
                count - written
            );
        }

        let start = shared.check_start(&mut segment, &settings);

        if let Some(pts) = segment.pts {
            segment.pts = Some(pts + format.bytes_to_ticks(count));
        }
        drop(segment);

        if let Some(start_pts) = start {
            shared.hand_over_clock(start_pts, &settings);
            shared.events.send(DrainEvent::Start).ok();
        }
        written
    }

    /// Drops everything buffered by queueing a flush epoch, then waits a
    /// bounded time for the worker to take it.
    pub fn flush(&self) {
        let shared = &self.shared;
        if shared.ring.is_full() {
            for _ in 0..FLUSH_POLLS {
                if !shared.ring.is_full() {
                    break;
                }
                log::debug!("audio: flush out of ring buffers");
                thread::sleep(FLUSH_POLL_INTERVAL);
            }
        }
        if let Err(e) = shared.ring.push_flush() {
            log::error!("audio: flush failed: {}", e);
            return;
        }
        log::debug!("audio: reset video ready");
        shared.video_ready.store(false, Ordering::Release);
        shared.wake(DrainEvent::Flush);

        let mut polls = 0;
        while polls < FLUSH_POLLS {
            if !shared.running.load(Ordering::Acquire) {
                shared.wake(DrainEvent::Flush);
            }
            if shared.ring.filled() == 0 {
                break;
            }
            thread::sleep(FLUSH_POLL_INTERVAL);
            polls += 1;
        }
        log::debug!("audio: audio flush {}ms", polls);
    }

    /// Queued output delay in 90 kHz ticks: sink delay plus unplayed bytes
    /// of the read segment. 0 while not running or while several epochs
    /// are queued.
    pub fn delay(&self) -> i64 {
        self.shared.delay()
    }

    /// Clock of the sample currently playing, `None` when unknown.
    pub fn clock(&self) -> Option<i64> {
        let pts = self.shared.ring.read_segment().pts;
        clock::audio_clock(pts, self.delay())
    }

    /// Sets the clock of the next written byte.
    pub fn set_clock(&self, pts: i64) {
        let mut segment = self.shared.ring.write_segment();
        if segment.pts != Some(pts) {
            log::trace!("audio: set clock {:?} -> {}", segment.pts, pts);
        }
        segment.pts = Some(pts);
    }

    /// Latches the A/V ready state once video and audio both have a clock.
    pub fn video_ready(&self, pts: Option<i64>) {
        let shared = &self.shared;
        if shared.video_ready.load(Ordering::Acquire) {
            return;
        }
        if !matches!(pts, Some(p) if p != 0) {
            log::debug!("audio: a/v start, no valid video");
            return;
        }
        {
            let segment = shared.ring.write_segment();
            if !segment.format.is_ready() || segment.pts.is_none() {
                log::debug!("audio: a/v start, no valid audio");
                return;
            }
        }
        log::debug!("audio: a/v ready");
        shared.video_ready.store(true, Ordering::Release);
    }

    pub fn play(&self) {
        if !self.is_paused() {
            log::debug!("audio: not paused");
        }
        log::debug!("audio: resumed");
        self.shared.paused.store(false, Ordering::Release);
        self.shared.sink.lock().play();

        let settings = *self.shared.settings.lock();
        let start = {
            let mut segment = self.shared.ring.write_segment();
            if !segment.format.is_ready() {
                return;
            }
            self.shared.check_start(&mut segment, &settings)
        };
        if let Some(start_pts) = start {
            self.shared.hand_over_clock(start_pts, &settings);
            self.shared.events.send(DrainEvent::Start).ok();
        }
    }

    pub fn pause(&self) {
        if self.shared.paused.swap(true, Ordering::AcqRel) {
            log::debug!("audio: already paused");
            return;
        }
        log::debug!("audio: paused");
        self.shared.sink.lock().pause();
    }

    /// Volume 0..1000; 0 mutes.
    pub fn set_volume(&self, volume: i32) {
        self.shared.set_volume(volume);
    }

    /// Start buffer in milliseconds; 0 selects the default.
    pub fn set_buffer_time(&self, ms: u32) {
        self.shared.settings.lock().buffer_time_ms = if ms == 0 {
            DEFAULT_AUDIO_BUFFER_TIME_MS
        } else {
            ms
        };
    }

    pub fn set_soft_volume(&self, on: bool) {
        self.shared.settings.lock().soft_volume = on;
    }

    pub fn set_normalize(&self, on: bool, max_factor: i32) {
        self.shared.settings.lock().normalize = on;
        self.shared.pipeline.lock().normalizer.set_max_factor(max_factor);
    }

    pub fn set_compression(&self, on: bool, max_factor: i32) {
        self.shared.settings.lock().compression = on;
        self.shared.pipeline.lock().compressor.set_max_factor(max_factor);
    }

    /// Volume reduction (0..1000) for stereo input.
    pub fn set_stereo_descent(&self, delta: i32) {
        self.shared.settings.lock().stereo_descent = delta;
        self.shared
            .set_volume(self.shared.volume.load(Ordering::Acquire));
    }

    /// Appends `ms` of silence to the write segment. Returns bytes written.
    pub fn insert_silence(&self, ms: u32) -> usize {
        if ms == 0 || ms >= MAX_SILENCE_MS {
            return 0;
        }
        let mut segment = self.shared.ring.write_segment();
        if !segment.format.is_ready() {
            return 0;
        }
        let silence = vec![0u8; clock::ms_to_bytes(&segment.format, ms)];
        log::debug!("audio: delay {}ms, {} bytes", ms, silence.len());
        segment.write(&silence)
    }

    /// Free bytes in the write segment.
    pub fn free_bytes(&self) -> usize {
        self.shared.ring.write_segment().free()
    }

    /// Buffered bytes in the write segment.
    pub fn used_bytes(&self) -> usize {
        self.shared.ring.write_segment().used()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.events.send(DrainEvent::Stop).ok();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("audio: can't stop play thread");
            }
        }
    }
}

impl Shared {
    fn wake(&self, event: DrainEvent) {
        self.running.store(true, Ordering::Release);
        if self.events.send(event).is_err() {
            log::error!("audio: play thread is gone");
        }
    }

    /// Start/skip gating while playback is stopped. Returns the start PTS
    /// (if any) when playback should begin.
    fn check_start(&self, segment: &mut AudioSegment, settings: &Settings) -> Option<Option<i64>> {
        if self.running.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            return None;
        }
        let mut used = segment.used();

        if !settings.fast_switch {
            if let Some(host) = &self.host_clock {
                // audio ahead of the first video frame is never heard
                let skip = match (host.video_start_pts(), segment.pts) {
                    (Some(video), Some(audio)) if video != 0 && audio >= video => 0,
                    _ => used,
                };
                if skip > 0 {
                    segment.skip(skip);
                    used = segment.used();
                }
            }
        }

        let threshold = self.threshold.load(Ordering::Acquire);
        let video_ready = self.video_ready.load(Ordering::Acquire);
        if !clock::should_start(threshold, used, settings.fast_switch, video_ready) {
            return None;
        }
        self.running.store(true, Ordering::Release);
        log::debug!(
            "audio: start on enqueue, threshold {} used {} ready {}",
            threshold,
            used,
            video_ready
        );
        Some(segment.pts)
    }

    fn hand_over_clock(&self, start_pts: Option<i64>, settings: &Settings) {
        let host = match &self.host_clock {
            Some(host) => host,
            None => return,
        };
        host.clear_video_start();
        if settings.fast_switch {
            return;
        }
        if let Some(pts) = start_pts {
            let start = pts - settings.buffer_time_ms as i64 * TICKS_PER_MS
                + settings.video_audio_delay;
            for _ in 0..CLOCK_RETRIES {
                if host.set_audio_start(start) {
                    return;
                }
                thread::sleep(CLOCK_RETRY_INTERVAL);
            }
            log::warn!("audio: video clock did not take the audio start");
        }
    }

    fn delay(&self) -> i64 {
        if !self.running.load(Ordering::Acquire) {
            return 0;
        }
        let (format, used) = {
            let segment = self.ring.read_segment();
            (segment.format, segment.used())
        };
        if !format.is_ready() || self.ring.filled() > 0 {
            return 0;
        }
        let hw = self.sink.lock().delay();
        hw + format.bytes_to_ticks(used)
    }

    fn set_volume(&self, volume: i32) {
        let volume = volume.clamp(0, 1000);
        self.volume.store(volume, Ordering::Release);
        self.mute.store(volume == 0, Ordering::Release);

        let format = self.ring.read_segment().format;
        let settings = *self.settings.lock();
        let mut amplifier = volume;
        if settings.stereo_descent > 0 && format.in_channels == 2 && !format.passthrough {
            amplifier = (volume - settings.stereo_descent).clamp(0, 1000);
        }
        self.amplifier.store(amplifier, Ordering::Release);
        if !settings.soft_volume {
            self.sink.lock().set_volume(amplifier);
        }
    }

    /// Drain worker main loop.
    fn run(self: Arc<Self>, mut events: UnboundedReceiver<DrainEvent>) {
        log::debug!("audio: play thread started");
        let mut scratch = vec![0i16; DRAIN_CHUNK / 2];

        'outer: loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.running.store(false, Ordering::Release);

            match events.blocking_recv() {
                None | Some(DrainEvent::Stop) => break,
                Some(event) => log::trace!("audio: play thread woken by {:?}", event),
            }
            while let Ok(event) = events.try_recv() {
                if event == DrainEvent::Stop {
                    break 'outer;
                }
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.running.store(true, Ordering::Release);
            self.drain(&mut scratch);
        }
        log::debug!("audio: play thread stopped");
    }

    /// One playback session: runs until underrun with nothing queued,
    /// pause, or a format the sink refused.
    fn drain(&self, scratch: &mut [i16]) {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }

            let flushed = self.ring.take_flush();
            if flushed > 0 {
                log::debug!("audio: flush {} ring buffer(s)", flushed);
                self.sink.lock().flush();
                if self.next_ring() {
                    return;
                }
            }

            let has_data = self.ring.read_segment().used() > 0;
            let state = if has_data {
                self.drive(scratch)
            } else {
                Drive::Underrun
            };

            if let Drive::Underrun = state {
                if self.ring.filled() == 0 {
                    log::debug!("audio: underrun with no new data");
                    return;
                }
                let old = self.ring.read_segment().format;
                self.ring.advance_read();
                let new = self.ring.read_segment().format;
                log::debug!(
                    "audio: next ring buffer, {} channels {}Hz{}",
                    new.hw_channels,
                    new.hw_rate,
                    if new.passthrough { " pass-through" } else { "" }
                );
                if (old.passthrough, old.hw_rate, old.hw_channels)
                    != (new.passthrough, new.hw_rate, new.hw_channels)
                {
                    if self.next_ring() {
                        return;
                    }
                } else {
                    let mut pipeline = self.pipeline.lock();
                    pipeline.compressor.reset();
                    pipeline.normalizer.reset();
                }
            }

            if self.paused.load(Ordering::Acquire) {
                return;
            }
            if !self.ring.read_segment().format.is_ready() {
                return;
            }
        }
    }

    /// Reconfigures the sink for the read segment. True when playback
    /// should pause until more is buffered.
    fn next_ring(&self) -> bool {
        let format = self.ring.read_segment().format;
        let rate = if format.hw_rate == 0 { 44100 } else { format.hw_rate };
        let channels = if format.hw_channels == 0 {
            2
        } else {
            format.hw_channels
        };
        let settings = *self.settings.lock();

        let setup = self.sink.lock().setup(rate, channels, format.passthrough);
        match setup {
            Ok(params) => {
                let delay = clock::start_delay_ms(settings.buffer_time_ms, settings.video_audio_delay);
                let threshold = clock::start_threshold(params.period_bytes, rate, channels, delay);
                self.threshold.store(threshold, Ordering::Release);
                log::info!(
                    "audio: start delay {}ms",
                    threshold * 1000 / (rate as usize * channels as usize * 2)
                );
            }
            Err(e) => {
                log::error!(
                    "audio: can't set channels {} sample-rate {}Hz: {}",
                    channels,
                    rate,
                    e
                );
                let mut segment = self.ring.read_segment();
                segment.format.hw_rate = 0;
                segment.format.in_rate = 0;
                return true;
            }
        }

        self.set_volume(self.volume.load(Ordering::Acquire));
        {
            let mut pipeline = self.pipeline.lock();
            pipeline.compressor.reset();
            pipeline.normalizer.reset();
        }

        let used = self.ring.read_segment().used();
        let threshold = self.threshold.load(Ordering::Acquire);
        !clock::can_continue(threshold, used, self.video_ready.load(Ordering::Acquire))
    }

    /// Moves as much of the read segment into the sink as it takes now.
    fn drive(&self, scratch: &mut [i16]) -> Drive {
        if self.paused.load(Ordering::Acquire) {
            return Drive::Playing;
        }
        let mut sink = self.sink.lock();
        if !sink.wait_ready(SINK_WAIT) || self.paused.load(Ordering::Acquire) {
            return Drive::Playing;
        }

        let settings = *self.settings.lock();
        let mute = self.mute.load(Ordering::Acquire);
        let amplifier = self.amplifier.load(Ordering::Acquire);
        let mut first = true;
        loop {
            let available = sink.available();
            if available < MIN_SINK_WRITE {
                return Drive::Playing;
            }

            let (count, passthrough) = {
                let mut segment = self.ring.read_segment();
                let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut scratch[..]);
                let frame = segment.format.frame_bytes().max(2);
                let want = available.min(segment.used()).min(bytes.len()) / frame * frame;
                (segment.read(&mut bytes[..want]), segment.format.passthrough)
            };
            if count == 0 {
                return if first {
                    Drive::Underrun
                } else {
                    Drive::Playing
                };
            }

            let samples = &mut scratch[..count / 2];
            // muting pass-through can produce noise on the receiver
            if mute || (settings.soft_volume && !passthrough) {
                amplify(samples, amplifier, mute);
            }
            let written = sink.write(bytemuck::cast_slice(samples));
            if written < count {
                log::warn!("audio: not all frames written, {} lost", count - written);
            }
            first = false;
        }
    }
}

impl std::fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutput")
            .field("filled", &self.shared.ring.filled())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .field("ring_max", &AUDIO_RING_MAX)
            .finish()
    }
}
