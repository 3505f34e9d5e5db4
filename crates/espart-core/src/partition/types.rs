//! Partition types
//!
//! Typed forms of the fields of a partition table row, and the table itself.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use super::size::parse_byte_size;
use crate::error::{PartitionError, Result, SizeError};

/// Highest OTA slot index an `ota_<N>` subtype may name
pub const MAX_OTA_SLOT: u8 = 15;

/// Top-level partition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum PartitionType {
    /// Application image
    App,
    /// Data store
    Data,
}

impl PartitionType {
    /// The CSV spelling of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Data => "data",
        }
    }
}

impl FromStr for PartitionType {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "app" => Ok(Self::App),
            "data" => Ok(Self::Data),
            other => Err(PartitionError::UnknownType(other.to_string())),
        }
    }
}

/// Partition subtype
///
/// Subtypes belong conceptually to one [`PartitionType`], but a table row is
/// accepted with any subtype from the full set regardless of its type. Use
/// [`PartitionSubType::natural_type`] to check consistency where it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum PartitionSubType {
    /// OTA selection data (`ota`)
    Ota,
    /// Non-volatile storage (`nvs`)
    Nvs,
    /// Core dump storage (`coredump`)
    Coredump,
    /// NVS encryption keys (`nvs_keys`)
    NvsKeys,
    /// FAT filesystem (`fat`)
    Fat,
    /// SPIFFS filesystem (`spiffs`)
    Spiffs,
    /// Factory application image (`factory`)
    Factory,
    /// Test application image (`test`)
    Test,
    /// OTA application slot `ota_0` through `ota_15`
    OtaSlot(u8),
}

impl PartitionSubType {
    /// The type this subtype is defined under
    pub fn natural_type(&self) -> PartitionType {
        match self {
            Self::Ota | Self::Nvs | Self::Coredump | Self::NvsKeys | Self::Fat | Self::Spiffs => {
                PartitionType::Data
            }
            Self::Factory | Self::Test | Self::OtaSlot(_) => PartitionType::App,
        }
    }
}

impl FromStr for PartitionSubType {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self> {
        let sub_type = match s {
            "ota" => Self::Ota,
            "nvs" => Self::Nvs,
            "coredump" => Self::Coredump,
            "nvs_keys" => Self::NvsKeys,
            "fat" => Self::Fat,
            "spiffs" => Self::Spiffs,
            "factory" => Self::Factory,
            "test" => Self::Test,
            other => other
                .strip_prefix("ota_")
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|slot| *slot <= MAX_OTA_SLOT)
                .map(Self::OtaSlot)
                .ok_or_else(|| PartitionError::UnknownSubType(other.to_string()))?,
        };
        Ok(sub_type)
    }
}

/// Start of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum Offset {
    /// Assigned later by the build, after the preceding partition
    Auto,
    /// Absolute byte offset in flash
    Fixed(u64),
}

impl Offset {
    /// The byte offset, if one is fixed
    pub fn fixed(&self) -> Option<u64> {
        match self {
            Self::Fixed(offset) => Some(*offset),
            Self::Auto => None,
        }
    }

    /// Whether the build assigns this offset
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl FromStr for Offset {
    type Err = SizeError;

    /// Parse an offset column: empty is [`Offset::Auto`], anything else is a
    /// size token. The literal `auto` is only accepted by the serde form.
    fn from_str(s: &str) -> std::result::Result<Self, SizeError> {
        match s.trim() {
            "" => Ok(Self::Auto),
            raw => parse_byte_size(raw).map(Self::Fixed),
        }
    }
}

bitflags! {
    /// Flags decoded from the free-form flags column
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartitionFlags: u8 {
        /// Contents are encrypted with flash encryption
        const ENCRYPTED = 1 << 0;
        /// Mounted read-only
        const READONLY  = 1 << 1;
    }
}

impl PartitionFlags {
    /// Decode a flags column such as `encrypted:readonly`
    ///
    /// Words are separated by `:`, `|` or whitespace. Unknown words are
    /// ignored; the raw column stays available on [`Partition::flags`].
    pub fn from_field(field: &str) -> Self {
        field
            .split(|c: char| c == ':' || c == '|' || c.is_whitespace())
            .fold(Self::empty(), |flags, word| match word {
                "encrypted" => flags | Self::ENCRYPTED,
                "readonly" => flags | Self::READONLY,
                _ => flags,
            })
    }
}

/// One row of a partition table
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Partition {
    /// Name, unique within a table
    pub name: String,
    /// Partition type
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: PartitionType,
    /// Partition subtype
    pub sub_type: PartitionSubType,
    /// Start offset
    pub offset: Offset,
    /// Size in bytes
    pub size: u64,
    /// Flags column, verbatim
    pub flags: String,
}

impl Partition {
    /// Exclusive end offset, if the start is fixed
    ///
    /// `None` when the end does not fit in a `u64`.
    pub fn end(&self) -> Option<u64> {
        self.offset
            .fixed()
            .and_then(|start| start.checked_add(self.size))
    }

    /// Check if an address falls inside this partition
    ///
    /// Always false for partitions placed by the build.
    pub fn contains(&self, addr: u64) -> bool {
        match self.offset.fixed() {
            Some(start) => addr >= start && addr - start < self.size,
            None => false,
        }
    }

    /// Check if this partition shares bytes with another
    ///
    /// Only partitions with fixed offsets can overlap.
    pub fn overlaps(&self, other: &Partition) -> bool {
        match (self.offset.fixed(), other.offset.fixed()) {
            (Some(start), Some(other_start)) => {
                // Ends may lie past u64::MAX
                let end = u128::from(start) + u128::from(self.size);
                let other_end = u128::from(other_start) + u128::from(other.size);
                u128::from(start) < other_end && u128::from(other_start) < end
            }
            _ => false,
        }
    }

    /// Whether this is an OTA application slot
    pub fn is_ota_slot(&self) -> bool {
        matches!(self.sub_type, PartitionSubType::OtaSlot(_))
    }

    /// Whether the subtype belongs to the partition's type
    pub fn has_consistent_sub_type(&self) -> bool {
        self.sub_type.natural_type() == self.kind
    }

    /// Decoded flags
    pub fn flag_set(&self) -> PartitionFlags {
        PartitionFlags::from_field(&self.flags)
    }
}

/// A partition table keyed by partition name
///
/// Tables are built by the parsers in this module; iteration is in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: BTreeMap<String, Partition>,
}

impl PartitionTable {
    /// Create an empty table
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a partition, returning the one it replaced under the same name
    pub(crate) fn insert(&mut self, partition: Partition) -> Option<Partition> {
        self.partitions.insert(partition.name.clone(), partition)
    }

    /// Look up a partition by name
    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    /// Check if a partition with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Check if the table has no partitions
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Iterate over partitions in name order
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Iterate over partition names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    /// Partitions of the given type
    pub fn by_type(&self, kind: PartitionType) -> impl Iterator<Item = &Partition> {
        self.iter().filter(move |p| p.kind == kind)
    }

    /// First partition (in name order) with the given subtype
    pub fn find_by_sub_type(&self, sub_type: PartitionSubType) -> Option<&Partition> {
        self.iter().find(|p| p.sub_type == sub_type)
    }

    /// Consume the table, yielding its partitions in name order
    pub fn into_partitions(self) -> Vec<Partition> {
        self.partitions.into_values().collect()
    }

    /// Check fixed-offset partitions against a flash size
    ///
    /// Parsing never applies these checks. Partitions placed by the build are
    /// skipped since their position is not known yet.
    pub fn validate(&self, flash_size: u64) -> Result<()> {
        let mut fixed: Vec<&Partition> = self.iter().filter(|p| !p.offset.is_auto()).collect();

        for partition in &fixed {
            let in_bounds = partition
                .offset
                .fixed()
                .and_then(|start| start.checked_add(partition.size))
                .is_some_and(|end| end <= flash_size);
            if !in_bounds {
                return Err(PartitionError::OutOfBounds {
                    name: partition.name.clone(),
                    flash_size,
                });
            }
        }

        fixed.sort_by_key(|p| p.offset.fixed());
        for (i, first) in fixed.iter().enumerate() {
            for second in fixed.iter().skip(i + 1) {
                if first.overlaps(second) {
                    return Err(PartitionError::Overlap {
                        first: first.name.clone(),
                        second: second.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a Partition;
    type IntoIter = btree_map::Values<'a, String, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.values()
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PartitionSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ota => write!(f, "ota"),
            Self::Nvs => write!(f, "nvs"),
            Self::Coredump => write!(f, "coredump"),
            Self::NvsKeys => write!(f, "nvs_keys"),
            Self::Fat => write!(f, "fat"),
            Self::Spiffs => write!(f, "spiffs"),
            Self::Factory => write!(f, "factory"),
            Self::Test => write!(f, "test"),
            Self::OtaSlot(slot) => write!(f, "ota_{}", slot),
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Fixed(offset) => write!(f, "{:#x}", offset),
        }
    }
}

// String conversions backing the serde representations

impl TryFrom<String> for PartitionType {
    type Error = PartitionError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PartitionType> for String {
    fn from(kind: PartitionType) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for PartitionSubType {
    type Error = PartitionError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PartitionSubType> for String {
    fn from(sub_type: PartitionSubType) -> Self {
        sub_type.to_string()
    }
}

impl TryFrom<String> for Offset {
    type Error = SizeError;

    fn try_from(s: String) -> std::result::Result<Self, SizeError> {
        match s.as_str() {
            "auto" => Ok(Self::Auto),
            raw => raw.parse(),
        }
    }
}

impl From<Offset> for String {
    fn from(offset: Offset) -> Self {
        offset.to_string()
    }
}
