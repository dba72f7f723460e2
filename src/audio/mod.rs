//! Audio output pipeline.
//!
//! Decoded samples enter through [`AudioOutput::enqueue`] and land in the
//! write segment of an [`AudioRing`], a ring of four format epochs. A worker
//! thread drains the read segment into the configured [`AudioSink`],
//! switching the sink format whenever it moves on to the next segment.
//!
//! ```no_run
//! use vdkplay::audio::{sink_by_name, AudioOutput};
//! use vdkplay::config::Config;
//!
//! # fn main() -> vdkplay::Result<()> {
//! let config = Config::default();
//! let output = AudioOutput::new(&config, sink_by_name(&config.audio_sink), None)?;
//! output.setup(48000, 2, false)?;
//! output.set_clock(90_000);
//! output.enqueue(&[0u8; 4 * 1152]);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod filter;
pub mod output;
pub mod remix;
pub mod ring;
pub mod sink;

pub use output::{AudioOutput, DrainEvent};
pub use ring::{AudioRing, AudioSegment, ChannelMatrix, SegmentFormat};
pub use sink::{sink_by_name, AudioSink, CaptureHandle, CaptureSink, NoopSink, SinkParams};
