//! Partition table support
//!
//! This module provides support for ESP-IDF partition tables, which divide
//! a flash chip into named application and data regions. Tables are:
//!
//! - Parsed from partition CSV files or text
//! - Queried by name, type, or subtype
//! - Optionally checked against a flash size
//! - Written back out as CSV
//!
//! # Example
//!
//! ```no_run
//! use espart_core::{PartitionTable, PartitionType};
//!
//! let table = PartitionTable::from_csv_file("partitions.csv")?;
//! for app in table.by_type(PartitionType::App) {
//!     println!("{} at {} ({} bytes)", app.name, app.offset, app.size);
//! }
//! # Ok::<(), espart_core::PartitionError>(())
//! ```

mod csv;
mod size;
mod types;

pub use size::parse_byte_size;
pub use types::*;
