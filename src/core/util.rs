//! Common utilities

use std::path::Path;
use std::time::SystemTime;
use xxhash_rust::xxh3::xxh3_128;

/// Compute a 128-bit hash of bytes as 32 lowercase hex digits
pub fn hash_hex128(data: &[u8]) -> String {
    format!("{:032x}", xxh3_128(data))
}

/// Get file modification time, or None if the file cannot be stat'ed
pub fn get_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Check whether a file can be opened for reading
pub fn is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

/// Parse the leading decimal integer of a string.
///
/// Leading whitespace and one sign character are accepted, parsing stops at
/// the first non-digit, and a string without digits yields 0. Cache files are
/// read with this so that garbage numeric fields degrade to defaults.
pub fn parse_leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }

    if negative {
        -value
    } else {
        value
    }
}
