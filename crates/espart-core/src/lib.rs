//! espart-core - ESP-IDF partition table parsing
//!
//! This crate reads the partition table CSV format used by ESP-IDF and the
//! Arduino ESP32 core into a typed, name-keyed [`PartitionTable`]. Image
//! creation and upload tools consume the result; they are not part of this
//! crate.
//!
//! # Features
//!
//! - `serde` (default) - Serde support for the partition types, and RON
//!   rendering of rejected rows in error messages
//!
//! # Example
//!
//! ```
//! use espart_core::{Offset, PartitionTable};
//!
//! let csv = "\
//! ## Name,   Type, SubType, Offset,   Size,    Flags
//! nvs,      data, nvs,     0x9000,   0x5000,
//! coredump, data, coredump,0x3F0000, 0x10000,
//! ";
//! let table = PartitionTable::from_csv_str(csv)?;
//! let coredump = table.get("coredump").unwrap();
//! assert_eq!(coredump.offset, Offset::Fixed(0x3F0000));
//! assert_eq!(coredump.size, 0x10000);
//! # Ok::<(), espart_core::PartitionError>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod partition;

pub use error::{PartitionError, Result, SizeError};
pub use partition::{
    parse_byte_size, Offset, Partition, PartitionFlags, PartitionSubType, PartitionTable,
    PartitionType, MAX_OTA_SLOT,
};
