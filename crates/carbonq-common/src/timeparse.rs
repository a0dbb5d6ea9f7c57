//! Time-Parameter Parsing
//!
//! Translates the `from`/`until` request parameters into epoch seconds.
//! Accepted forms:
//!
//! - empty string: the caller's default (now - 24h for `from`, now for
//!   `until`)
//! - `now`
//! - integer epoch seconds
//! - relative offsets: `-{n}{unit}` with units `s`, `min`, `h`, `d`, `w`,
//!   `mon`, `y`
//! - absolute stamps: `15:04 20060102`, `20060102`, `01/02/06`
//!
//! Absolute stamps are interpreted in the configured fixed timezone, or the
//! process-local zone when none was configured. Anything unparsable falls
//! back to the caller's default.

use chrono::{FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone};

use crate::error::{CarbonqError, Result};

/// Interprets time parameters, optionally in a fixed zone.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeParser {
    tz: Option<FixedOffset>,
}

impl TimeParser {
    pub fn new(tz: Option<FixedOffset>) -> Self {
        Self { tz }
    }

    /// The configured fixed zone, if any.
    pub fn tz(&self) -> Option<FixedOffset> {
        self.tz
    }

    /// Parses one `from`/`until` parameter. `now` is passed in so callers
    /// (and tests) pin both parameters to the same instant.
    pub fn parse(&self, s: &str, default: i32, now: i32) -> i32 {
        let s = s.trim();
        if s.is_empty() {
            return default;
        }
        if s == "now" {
            return now;
        }
        if let Some(rel) = s.strip_prefix('-') {
            if let Some(offset) = parse_relative(rel) {
                return now - offset;
            }
            return default;
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            // Bare digits could be an epoch or a yyyymmdd stamp; eight
            // digits starting with 19/20 read as a date, like the original
            // interface.
            if s.len() == 8 && (s.starts_with("19") || s.starts_with("20")) {
                if let Some(ts) = self.parse_absolute(s) {
                    return ts;
                }
            }
            if let Ok(epoch) = s.parse::<i64>() {
                return epoch as i32;
            }
        }
        self.parse_absolute(s).unwrap_or(default)
    }

    fn parse_absolute(&self, s: &str) -> Option<i32> {
        let naive = parse_stamp(s)?;
        let epoch = match self.tz {
            Some(tz) => tz.from_local_datetime(&naive).single()?.timestamp(),
            None => Local.from_local_datetime(&naive).single()?.timestamp(),
        };
        Some(epoch as i32)
    }
}

fn parse_stamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%H:%M %Y%m%d") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%y") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

fn parse_relative(s: &str) -> Option<i32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = &s[digits.len()..];
    let n: i32 = digits.parse().ok()?;
    let unit_secs = match unit {
        "s" => 1,
        "min" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        "mon" => 30 * 86400,
        "y" => 365 * 86400,
        _ => return None,
    };
    Some(n * unit_secs)
}

/// Parses the `-tz name,offsetSeconds` startup flag.
///
/// The name is informational only; the offset drives interpretation.
pub fn parse_tz_flag(s: &str) -> Result<FixedOffset> {
    let (name, offset) = s
        .split_once(',')
        .ok_or_else(|| CarbonqError::InvalidParam(format!("expected name,seconds for tz: {s}")))?;
    let secs: i32 = offset
        .trim()
        .parse()
        .map_err(|_| CarbonqError::InvalidParam(format!("unable to parse tz seconds: {offset}")))?;
    let tz = FixedOffset::east_opt(secs)
        .ok_or_else(|| CarbonqError::InvalidParam(format!("tz offset out of range: {offset}")))?;
    tracing::debug!(name, secs, "using fixed timezone");
    Ok(tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i32 = 1_400_000_000;

    fn parser() -> TimeParser {
        TimeParser::new(Some(FixedOffset::east_opt(0).unwrap()))
    }

    #[test]
    fn test_empty_uses_default() {
        assert_eq!(parser().parse("", 42, NOW), 42);
        assert_eq!(parser().parse("  ", 42, NOW), 42);
    }

    #[test]
    fn test_now() {
        assert_eq!(parser().parse("now", 0, NOW), NOW);
    }

    #[test]
    fn test_epoch_passthrough() {
        assert_eq!(parser().parse("1399999999", 0, NOW), 1_399_999_999);
    }

    #[test]
    fn test_relative_offsets() {
        let p = parser();
        assert_eq!(p.parse("-5s", 0, NOW), NOW - 5);
        assert_eq!(p.parse("-10min", 0, NOW), NOW - 600);
        assert_eq!(p.parse("-2h", 0, NOW), NOW - 7200);
        assert_eq!(p.parse("-1d", 0, NOW), NOW - 86400);
        assert_eq!(p.parse("-1w", 0, NOW), NOW - 7 * 86400);
        assert_eq!(p.parse("-1mon", 0, NOW), NOW - 30 * 86400);
        assert_eq!(p.parse("-1y", 0, NOW), NOW - 365 * 86400);
    }

    #[test]
    fn test_bad_relative_unit_falls_back() {
        assert_eq!(parser().parse("-5fortnights", 42, NOW), 42);
    }

    #[test]
    fn test_absolute_date() {
        // 2014-05-13T00:00:00Z
        assert_eq!(parser().parse("20140513", 0, NOW), 1_399_939_200);
    }

    #[test]
    fn test_absolute_time_and_date() {
        // 2014-05-13T16:53:00Z
        assert_eq!(parser().parse("16:53 20140513", 0, NOW), 1_399_999_980);
    }

    #[test]
    fn test_absolute_slash_date() {
        // 05/13/14 reads as 2014-05-13
        assert_eq!(parser().parse("05/13/14", 0, NOW), 1_399_939_200);
    }

    #[test]
    fn test_fixed_offset_shifts_absolute() {
        let utc = TimeParser::new(Some(FixedOffset::east_opt(0).unwrap()));
        let plus1h = TimeParser::new(Some(FixedOffset::east_opt(3600).unwrap()));
        let a = utc.parse("20140513", 0, NOW);
        let b = plus1h.parse("20140513", 0, NOW);
        assert_eq!(a - b, 3600);
    }

    #[test]
    fn test_garbage_falls_back() {
        assert_eq!(parser().parse("next tuesday", 42, NOW), 42);
    }

    #[test]
    fn test_parse_tz_flag() {
        let tz = parse_tz_flag("EST,-18000").unwrap();
        assert_eq!(tz.local_minus_utc(), -18000);
        assert!(parse_tz_flag("EST").is_err());
        assert!(parse_tz_flag("EST,lots").is_err());
    }
}
