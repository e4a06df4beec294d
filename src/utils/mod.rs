//! # Utility Functions and Types
//!
//! Byte- and bit-level helpers shared by the transport stream code:
//!
//! - [`BitReader`] for packed fields such as PES timestamps
//! - [`masked_scan_u32`] to locate packet headers in raw bytes
//! - [`Crc32Mpeg2`] to validate PSI sections
//!
//! ```rust
//! use tsdemux::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//! assert_eq!(reader.read_bits(3)?, 0b101);
//! # Ok(())
//! # }
//! ```

/// Bitstream reading
pub mod bits;

/// MPEG-2 CRC32
pub mod crc;

/// Masked word search over raw bytes
pub mod scan;

pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
pub use scan::{masked_scan_all, masked_scan_u32};
