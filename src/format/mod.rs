//! Stream input formats: transport stream carried PES and whole PES packets.

pub mod pes_audio;
pub mod ts;

pub use self::pes_audio::PesAudioParser;
pub use self::ts::{PesDemuxer, TsDemuxer, TsReader};
