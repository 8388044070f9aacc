//! Byte-size formatting for tables and reports.

/// Format a byte count with binary units, e.g. `1.5K`, `20.0M`, `3.2G`.
///
/// Matches the short form `zfs list` prints, so table output stays aligned
/// with what the backend reports.
#[must_use]
pub fn format_bytes(size: u64) -> String {
    const UNITS: [&str; 7] = ["B", "K", "M", "G", "T", "P", "E"];

    if size < 1024 {
        return format!("{size}B");
    }

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1}{}", UNITS[unit])
}
