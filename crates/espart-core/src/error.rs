//! Error types for espart-core

use std::io;
use thiserror::Error;

/// A size or offset token that could not be reduced to a byte count
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse raw size into bytes: '{raw}'")]
pub struct SizeError {
    /// The offending token, after trimming
    pub raw: String,
}

/// Partition table errors
#[derive(Debug, Error)]
pub enum PartitionError {
    /// An offset or size field on a line is not a valid byte count
    #[error("line {line_number}: {source}. Could not parse line: '{line}'")]
    MalformedSize {
        /// 1-based line number in the source
        line_number: usize,
        /// The raw line text
        line: String,
        /// The token that failed to parse
        #[source]
        source: SizeError,
    },

    /// A line split into fields that do not form a valid partition
    #[error("line {line_number}: invalid partition record {candidate}. Could not parse line: '{line}'")]
    MalformedRecord {
        /// 1-based line number in the source
        line_number: usize,
        /// The raw line text
        line: String,
        /// The partially assembled record, rendered for diagnostics
        candidate: String,
    },

    /// I/O error while reading or writing a partition table
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Text is not one of the partition type literals
    #[error("unknown partition type: '{0}'")]
    UnknownType(String),

    /// Text is not one of the partition subtype literals
    #[error("unknown partition subtype: '{0}'")]
    UnknownSubType(String),

    /// A partition with a fixed offset ends past the flash size
    #[error("partition '{name}' extends beyond flash size of {flash_size:#x} bytes")]
    OutOfBounds {
        /// Name of the offending partition
        name: String,
        /// Flash size the table was checked against
        flash_size: u64,
    },

    /// Two partitions with fixed offsets share bytes
    #[error("partitions '{first}' and '{second}' overlap")]
    Overlap {
        /// Partition with the lower offset
        first: String,
        /// Partition with the higher offset
        second: String,
    },
}

impl PartitionError {
    /// Line number of the offending line, for errors raised while parsing
    pub fn line_number(&self) -> Option<usize> {
        match self {
            Self::MalformedSize { line_number, .. } | Self::MalformedRecord { line_number, .. } => {
                Some(*line_number)
            }
            _ => None,
        }
    }

    /// Raw text of the offending line, for errors raised while parsing
    pub fn line(&self) -> Option<&str> {
        match self {
            Self::MalformedSize { line, .. } | Self::MalformedRecord { line, .. } => Some(line),
            _ => None,
        }
    }
}

/// Result type for partition table operations
pub type Result<T> = std::result::Result<T, PartitionError>;
