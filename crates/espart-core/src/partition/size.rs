//! Byte size tokens
//!
//! Offsets and sizes in a partition table are written either as hex numbers
//! (`0x9000`) or with a unit suffix (`20K`).

use crate::error::SizeError;

const KILO: u64 = 1024;

/// Parse a raw offset/size token into a byte count
///
/// Tokens with a `0x` prefix are read as hex. Every other token goes through
/// the kilo path: its final character is dropped as the unit and the decimal
/// prefix is multiplied by 1024, whatever that character was. `20K` is 20480,
/// but `2M` is 2048 and `8000` is 800 KiB.
///
/// ```
/// use espart_core::parse_byte_size;
///
/// assert_eq!(parse_byte_size("0x9000").unwrap(), 0x9000);
/// assert_eq!(parse_byte_size("20K").unwrap(), 20 * 1024);
/// assert_eq!(parse_byte_size("2M").unwrap(), 2 * 1024);
/// ```
pub fn parse_byte_size(raw: &str) -> Result<u64, SizeError> {
    let malformed = || SizeError {
        raw: raw.to_string(),
    };

    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        return u64::from_str_radix(hex, 16).map_err(|_| malformed());
    }

    let mut chars = raw.chars();
    chars.next_back().ok_or_else(malformed)?;
    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(KILO))
        .ok_or_else(malformed)
}
