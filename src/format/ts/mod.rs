//! # MPEG Transport Stream (TS) and PES input
//!
//! The input side of the players:
//!
//! - [`TsDemuxer`] strips 188 byte transport packets down to PES fragments
//! - [`PesDemuxer`] reassembles PES payload and cuts it into audio frames
//! - [`PESHeader`] decodes the header of whole PES packets and their
//!   33 bit timestamps
//! - [`TsReader`] drives a [`TsDemuxer`] from an async byte source
//!
//! ## Example
//!
//! ```rust
//! use vdkplay::av::{AudioDecoder, CodecId, ElementaryFrame};
//! use vdkplay::format::ts::{TsDemuxer, TS_PACKET_SIZE};
//!
//! struct Count(usize);
//!
//! impl AudioDecoder for Count {
//!     fn open(&mut self, _codec: CodecId) {}
//!     fn close(&mut self) {}
//!     fn decode(&mut self, _frame: &ElementaryFrame<'_>) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let mut demuxer = TsDemuxer::new();
//! let mut decoder = Count(0);
//! // a stuffing-only packet carries no payload
//! let mut packet = [0xFFu8; TS_PACKET_SIZE];
//! packet[..5].copy_from_slice(&[0x47, 0x00, 0x00, 0x20, 183]);
//! assert_eq!(demuxer.demux(&packet, &mut decoder), TS_PACKET_SIZE);
//! assert_eq!(decoder.0, 0);
//! ```

pub mod demuxer;
pub mod parser;
pub mod pes;
pub mod reader;
pub mod types;

pub use demuxer::*;
pub use parser::*;
pub use pes::*;
pub use reader::*;
pub use types::*;
