//! ESP-IDF partition CSV parsing
//!
//! Parses partition tables in the format used by ESP-IDF and the Arduino
//! ESP32 core:
//!
//! ```text
//! # Name,   Type, SubType, Offset,  Size, Flags
//! nvs,      data, nvs,     0x9000,  0x5000,
//! otadata,  data, ota,     0xe000,  0x2000,
//! app0,     app,  ota_0,   0x10000, 0x140000,
//! app1,     app,  ota_1,   ,        2M,
//! ```
//!
//! Lines starting with `#` (after optional whitespace) are comments. An empty
//! offset leaves placement to the build. A later row with the same name
//! replaces an earlier one.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use super::size::parse_byte_size;
use super::{Offset, Partition, PartitionTable, PartitionType};
use crate::error::{PartitionError, Result, SizeError};

/// Number of columns in a partition row
const FIELD_COUNT: usize = 6;

/// Column header written by [`PartitionTable::to_csv_string`]
const CSV_HEADER: &str = "# Name, Type, SubType, Offset, Size, Flags";

/// A row split into fields, before validation
///
/// Absent fields stay `None`; the record is only accepted once every field is
/// present and valid.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
struct CandidateRecord<'a> {
    name: Option<&'a str>,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    kind: Option<PartitionType>,
    sub_type: Option<&'a str>,
    offset: Option<Offset>,
    size: Option<u64>,
    flags: Option<&'a str>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    extra: Vec<&'a str>,
}

impl CandidateRecord<'_> {
    fn to_partition(&self) -> Option<Partition> {
        if !self.extra.is_empty() {
            return None;
        }
        let name = self.name.filter(|name| !name.is_empty())?;
        let sub_type = self.sub_type?.parse().ok()?;

        Some(Partition {
            name: name.to_string(),
            kind: self.kind?,
            sub_type,
            offset: self.offset?,
            size: self.size?,
            flags: self.flags?.to_string(),
        })
    }

    /// Render for error messages
    #[cfg(feature = "serde")]
    fn render(&self) -> String {
        ron::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// Render for error messages
    #[cfg(not(feature = "serde"))]
    fn render(&self) -> String {
        format!("{:?}", self)
    }
}

/// Check if a line is a CSV comment
fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Parse one non-comment line into a partition
fn parse_line(line: &str, line_number: usize) -> Result<Partition> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let field = |index: usize| fields.get(index).copied();
    let malformed_size = |source: SizeError| PartitionError::MalformedSize {
        line_number,
        line: line.to_string(),
        source,
    };

    let offset = match field(3) {
        None | Some("") => Offset::Auto,
        Some(raw) => Offset::Fixed(parse_byte_size(raw).map_err(malformed_size)?),
    };
    let size = field(4)
        .map(parse_byte_size)
        .transpose()
        .map_err(malformed_size)?;

    let candidate = CandidateRecord {
        name: field(0),
        kind: field(1).and_then(|raw| raw.parse().ok()),
        sub_type: field(2),
        offset: Some(offset),
        size,
        flags: field(5),
        extra: fields.get(FIELD_COUNT..).unwrap_or_default().to_vec(),
    };

    candidate
        .to_partition()
        .ok_or_else(|| PartitionError::MalformedRecord {
            line_number,
            line: line.to_string(),
            candidate: candidate.render(),
        })
}

impl PartitionTable {
    /// Load a partition table from a CSV file
    pub fn from_csv_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        log::debug!("Reading partition table from {}", path.display());
        Self::from_reader(BufReader::new(file))
    }

    /// Parse a partition table from CSV text
    pub fn from_csv_str(content: &str) -> Result<Self> {
        Self::from_reader(content.as_bytes())
    }

    /// Parse a partition table from a line-oriented reader
    ///
    /// Both `\n` and `\r\n` end a line. Only comment lines are skipped; a
    /// blank line is a row with missing fields. The first invalid line aborts
    /// the parse and no partial table is returned.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut table = PartitionTable::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = index + 1;

            if is_comment(&line) {
                log::trace!("Skipping comment on line {}", line_number);
                continue;
            }

            let partition = parse_line(&line, line_number)?;
            if let Some(previous) = table.insert(partition) {
                log::debug!(
                    "Line {}: partition '{}' redefined, replacing earlier entry",
                    line_number,
                    previous.name
                );
            }
        }

        log::debug!("Parsed partition table with {} partitions", table.len());
        Ok(table)
    }

    /// Save the table to a CSV file
    pub fn to_csv_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_csv_string())?;
        Ok(())
    }

    /// Convert the table to CSV text
    ///
    /// Rows are ordered by offset with build-placed partitions last. Offsets
    /// and sizes are written in hex so the output parses back to the same
    /// table.
    pub fn to_csv_string(&self) -> String {
        let mut rows: Vec<&Partition> = self.iter().collect();
        rows.sort_by_key(|p| match p.offset {
            Offset::Fixed(offset) => (false, offset),
            Offset::Auto => (true, 0),
        });

        let mut output = String::new();
        output.push_str(CSV_HEADER);
        output.push('\n');

        for p in rows {
            let offset = match p.offset {
                Offset::Fixed(offset) => format!("{:#x}", offset),
                Offset::Auto => String::new(),
            };
            output.push_str(&format!(
                "{},{},{},{},{:#x},{}\n",
                p.name, p.kind, p.sub_type, offset, p.size, p.flags
            ));
        }

        output
    }
}

impl FromStr for PartitionTable {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_csv_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionFlags, PartitionSubType};
    use std::path::PathBuf;

    const DEFAULT_CSV: &str = include_str!("../../tests/fixtures/default.csv");
    const FFAT_CSV: &str = include_str!("../../tests/fixtures/default_16MB_ffat.csv");
    const AUTO_CSV: &str = include_str!("../../tests/fixtures/ota_auto.csv");

    fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_parse_default() {
        let table = PartitionTable::from_csv_str(DEFAULT_CSV).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(
            table.names().collect::<Vec<_>>(),
            ["app0", "app1", "coredump", "nvs", "otadata", "spiffs"]
        );

        let coredump = table.get("coredump").unwrap();
        assert_eq!(
            *coredump,
            Partition {
                name: "coredump".to_string(),
                kind: PartitionType::Data,
                sub_type: PartitionSubType::Coredump,
                offset: Offset::Fixed(4128768),
                size: 65536,
                flags: String::new(),
            }
        );
        assert_eq!(table.get("app0").unwrap().sub_type, PartitionSubType::OtaSlot(0));
        assert_eq!(table.get("otadata").unwrap().sub_type, PartitionSubType::Ota);
        assert!(table.validate(4 * 1024 * 1024).is_ok());
    }

    #[test]
    fn test_parse_ffat_with_trailing_comment() {
        let table = PartitionTable::from_csv_str(FFAT_CSV).unwrap();
        let ffat = table.get("ffat").unwrap();
        assert_eq!(ffat.kind, PartitionType::Data);
        assert_eq!(ffat.sub_type, PartitionSubType::Fat);
        assert_eq!(ffat.offset, Offset::Fixed(4259840));
        assert_eq!(ffat.size, 12451840);
        assert_eq!(ffat.flags, "");
        assert!(table.names().all(|name| !name.starts_with('#')));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_parse_auto_offset() {
        let table = PartitionTable::from_csv_str(AUTO_CSV).unwrap();
        let app1 = table.get("app1").unwrap();
        assert_eq!(app1.kind, PartitionType::App);
        assert_eq!(app1.sub_type, PartitionSubType::OtaSlot(1));
        assert_eq!(app1.offset, Offset::Auto);
        assert_eq!(app1.size, 2048);
        assert_eq!(app1.flags, "");
        assert_eq!(table.get("nvs").unwrap().size, 20 * 1024);
    }

    #[test]
    fn test_load_file() {
        let table = PartitionTable::from_csv_file(fixture_path("default.csv")).unwrap();
        assert_eq!(table, PartitionTable::from_csv_str(DEFAULT_CSV).unwrap());
    }

    #[test]
    fn test_missing_file() {
        let err = PartitionTable::from_csv_file(fixture_path("does_not_exist.csv")).unwrap_err();
        assert!(matches!(err, PartitionError::Io(_)));
    }

    #[test]
    fn test_comments() {
        let csv = "# header\n   # indented comment\n\t#tabbed\nnvs,data,nvs,0x9000,0x5000,\n#";
        let table = PartitionTable::from_csv_str(csv).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.contains("nvs"));
    }

    #[test]
    fn test_crlf_line_endings() {
        let csv = "# Name,Type,SubType,Offset,Size,Flags\r\nnvs,data,nvs,0x9000,0x5000,\r\notadata,data,ota,0xe000,0x2000,\r\n";
        let table = PartitionTable::from_csv_str(csv).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("otadata").unwrap().flags, "");
    }

    #[test]
    fn test_blank_line_rejected() {
        let csv = "nvs,data,nvs,0x9000,0x5000,\n   \notadata,data,ota,0xe000,0x2000,\n";
        let err = PartitionTable::from_csv_str(csv).unwrap_err();
        assert!(matches!(err, PartitionError::MalformedRecord { line_number: 2, .. }));
        assert_eq!(err.line(), Some("   "));

        let csv = "nvs,data,nvs,0x9000,0x5000,\r\n\r\notadata,data,ota,0xe000,0x2000,\r\n";
        assert!(matches!(
            PartitionTable::from_csv_str(csv),
            Err(PartitionError::MalformedRecord { line_number: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let csv = "nvs,data,nvs,0x9000,0x5000,\nnvs,data,nvs,0xa000,0x6000,encrypted\n";
        let table = PartitionTable::from_csv_str(csv).unwrap();
        assert_eq!(table.len(), 1);
        let nvs = table.get("nvs").unwrap();
        assert_eq!(nvs.offset, Offset::Fixed(0xA000));
        assert_eq!(nvs.size, 0x6000);
        assert_eq!(nvs.flags, "encrypted");
    }

    #[test]
    fn test_flags_verbatim() {
        let table = PartitionTable::from_csv_str("keys,data,nvs_keys,,4K,encrypted:readonly\n").unwrap();
        let keys = table.get("keys").unwrap();
        assert_eq!(keys.flags, "encrypted:readonly");
        assert!(keys.flag_set().contains(PartitionFlags::ENCRYPTED | PartitionFlags::READONLY));
    }

    #[test]
    fn test_sub_type_not_checked_against_type() {
        let table = PartitionTable::from_csv_str("odd,data,ota_3,0x10000,0x1000,\n").unwrap();
        let odd = table.get("odd").unwrap();
        assert_eq!(odd.sub_type, PartitionSubType::OtaSlot(3));
        assert!(!odd.has_consistent_sub_type());
    }

    #[test]
    fn test_malformed_size() {
        let csv = "nvs,data,nvs,0x9000,0x5000,\nbroken,data,spiffs,0x290000,lots,\n";
        let err = PartitionTable::from_csv_str(csv).unwrap_err();
        assert_eq!(err.line_number(), Some(2));
        assert_eq!(err.line(), Some("broken,data,spiffs,0x290000,lots,"));
        match err {
            PartitionError::MalformedSize { source, .. } => assert_eq!(source.raw, "lots"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_malformed_offset() {
        let err = PartitionTable::from_csv_str("nvs,data,nvs,0xG000,0x5000,\n").unwrap_err();
        assert!(matches!(
            err,
            PartitionError::MalformedSize { ref source, .. } if source.raw == "0xG000"
        ));
    }

    #[test]
    fn test_empty_size() {
        let err = PartitionTable::from_csv_str("nvs,data,nvs,0x9000,,\n").unwrap_err();
        assert!(matches!(
            err,
            PartitionError::MalformedSize { ref source, .. } if source.raw.is_empty()
        ));
    }

    #[test]
    fn test_invalid_type() {
        let err = PartitionTable::from_csv_str("nvs,bin,nvs,0x9000,0x5000,\n").unwrap_err();
        assert!(matches!(err, PartitionError::MalformedRecord { line_number: 1, .. }));
        assert_eq!(err.line(), Some("nvs,bin,nvs,0x9000,0x5000,"));
    }

    #[test]
    fn test_invalid_sub_type() {
        let csv = "# comment\napp9,app,ota_16,,1M,\n";
        let err = PartitionTable::from_csv_str(csv).unwrap_err();
        match err {
            PartitionError::MalformedRecord {
                line_number,
                line,
                candidate,
            } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "app9,app,ota_16,,1M,");
                assert!(candidate.contains("ota_16"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_wrong_field_count() {
        // Flags column missing entirely
        assert!(matches!(
            PartitionTable::from_csv_str("nvs,data,nvs,0x9000,0x5000\n"),
            Err(PartitionError::MalformedRecord { .. })
        ));
        // Size column missing
        assert!(matches!(
            PartitionTable::from_csv_str("nvs,data,nvs\n"),
            Err(PartitionError::MalformedRecord { .. })
        ));
        assert!(matches!(
            PartitionTable::from_csv_str("nvs,data,nvs,0x9000,0x5000,,extra\n"),
            Err(PartitionError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_empty_name() {
        assert!(matches!(
            PartitionTable::from_csv_str(" ,data,nvs,0x9000,0x5000,\n"),
            Err(PartitionError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_empty_input() {
        let table: PartitionTable = "# only comments\n".parse().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_to_csv_string() {
        let table = PartitionTable::from_csv_str(AUTO_CSV).unwrap();
        let csv = table.to_csv_string();
        assert!(csv.starts_with(CSV_HEADER));
        assert!(csv.contains("app1,app,ota_1,,0x800,\n"));
        assert_eq!(PartitionTable::from_csv_str(&csv).unwrap(), table);

        let table = PartitionTable::from_csv_str(DEFAULT_CSV).unwrap();
        let csv = table.to_csv_string();
        let first_row = csv.lines().nth(1).unwrap();
        assert_eq!(first_row, "nvs,data,nvs,0x9000,0x5000,");
        assert_eq!(PartitionTable::from_csv_str(&csv).unwrap(), table);
    }

    #[test]
    fn test_queries() {
        let table = PartitionTable::from_csv_str(DEFAULT_CSV).unwrap();
        assert_eq!(table.by_type(PartitionType::App).count(), 2);
        assert_eq!(table.by_type(PartitionType::Data).count(), 4);
        assert_eq!(
            table.find_by_sub_type(PartitionSubType::Spiffs).map(|p| p.name.as_str()),
            Some("spiffs")
        );
        assert!(table.find_by_sub_type(PartitionSubType::Factory).is_none());
        assert_eq!(table.iter().filter(|p| p.is_ota_slot()).count(), 2);
        assert_eq!((&table).into_iter().count(), 6);
        assert_eq!(table.into_partitions().len(), 6);
    }
}
