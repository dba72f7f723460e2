//! Video packet path.
//!
//! PES packets are cut into access units by start code detection and queued
//! in a [`PacketRing`]; a [`DecodeWorker`] hands sealed units to the
//! [`VideoDecoder`](crate::av::VideoDecoder) and executes the stream
//! commands (close, clear, freeze) in between.

pub mod packet;
pub mod stream;

pub use packet::{PacketRing, VIDEO_BUFFER_SIZE, VIDEO_PACKET_MAX};
pub use stream::{DecodeStatus, DecodeWorker, VideoStream, VIDEO_HARD_LIMIT};
