//! # Utility Functions and Types
//!
//! Bit-level helpers shared by the codec header parsers.
//!
//! ```rust
//! use vdkplay::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//!
//! let value = reader.read_bits(3)?;
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```

/// Bitstream reading utilities
pub mod bits;

pub use bits::*;
