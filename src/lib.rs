#![cfg_attr(docsrs, feature(doc_cfg))]

//! # vdkplay - broadcast stream playback core
//!
//! `vdkplay` takes the audio and video of a broadcast receiver, delivered as
//! MPEG transport stream packets or whole PES packets, and turns them into
//! decoder calls and timed PCM output:
//!
//! - `codec`: frame sniffers for MPEG audio, AC-3/E-AC-3, AAC ADTS and LATM,
//!   start code detection for MPEG-2, H.264 and HEVC video
//! - `format`: the TS packet walker, the streaming PES demuxer and the
//!   whole-PES audio parser
//! - `audio`: a ring of format epochs, remix, compression, normalization,
//!   start gating against the video clock and the drain worker
//! - `video`: the access unit ring and the stream command protocol
//! - `device`: the facade a player front end talks to
//!
//! Decoders, output devices and the video clock are collaborators supplied
//! by the host through the traits in [`av`] and [`audio::AudioSink`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vdkplay::audio::{sink_by_name, AudioOutput};
//! use vdkplay::av::{AudioDecoder, CodecId, ElementaryFrame};
//! use vdkplay::config::Config;
//! use vdkplay::device::Device;
//!
//! struct Decoder;
//!
//! impl AudioDecoder for Decoder {
//!     fn open(&mut self, codec: CodecId) {
//!         println!("open {}", codec);
//!     }
//!     fn close(&mut self) {}
//!     fn decode(&mut self, frame: &ElementaryFrame<'_>) {
//!         println!("{} bytes at {:?}", frame.len(), frame.pts);
//!     }
//! }
//!
//! fn main() -> vdkplay::Result<()> {
//!     let config = Config::load()?;
//!     let audio = AudioOutput::new(&config, sink_by_name(&config.audio_sink), None)?;
//!     let mut device = Device::new(config, Arc::new(audio), Box::new(Decoder));
//!
//!     let ts = std::fs::read("capture.ts")?;
//!     let mut offset = 0;
//!     while offset < ts.len() {
//!         match device.play_ts_audio(&ts[offset..]) {
//!             0 => {
//!                 device.poll(100);
//!             }
//!             n => offset += n,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

/// Codec ids, packets and the collaborator traits
pub mod av;

/// Audio ring, sample pipeline, sinks and the A/V clock
pub mod audio;

/// Frame sniffers and video codec detection
pub mod codec;

/// Configuration loading
pub mod config;

/// Player facade
pub mod device;

/// Error types
pub mod error;

/// Transport stream and PES input
pub mod format;

/// Bit level helpers
pub mod utils;

/// Video packet ring and stream commands
pub mod video;

pub use error::{PlayError, Result};
