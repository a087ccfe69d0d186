//! Human-readable durations for timeouts ("30s", "2m", "1500ms").

use std::time::Duration;

use anyhow::{Context, Result};

/// Parse a duration string like "30s", "2m", "1h", "500ms".
///
/// Supported units are `ms`, `s`, `m`, `h` and `d`. A bare number is read as
/// seconds. The input is case-insensitive and whitespace is trimmed.
///
/// ```
/// use invoice_archiver::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    if num.is_empty() {
        anyhow::bail!("Duration must start with a number");
    }

    let num: u64 = num.parse().context("Invalid number in duration")?;

    let millis_per_unit: u64 = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        "d" => 24 * 60 * 60 * 1_000,
        other => anyhow::bail!("Unknown duration unit {other:?} (use ms, s, m, h or d)"),
    };

    let millis = num
        .checked_mul(millis_per_unit)
        .context("Duration is too large")?;
    Ok(Duration::from_millis(millis))
}

/// Format a duration using the largest unit that divides it evenly.
///
/// ```
/// use invoice_archiver::duration::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(30)), "30s");
/// assert_eq!(format_duration(Duration::from_secs(120)), "2m");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
/// ```
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    let units: [(u128, &str); 4] = [
        (24 * 60 * 60 * 1_000, "d"),
        (60 * 60 * 1_000, "h"),
        (60 * 1_000, "m"),
        (1_000, "s"),
    ];

    for (size, suffix) in units {
        if millis >= size && millis % size == 0 {
            return format!("{}{suffix}", millis / size);
        }
    }
    format!("{millis}ms")
}
