//! AAC in ADTS and LATM (LOAS) framing.

mod parser;
mod types;

pub use parser::*;
pub use types::*;
