//! ISO 8601 duration parsing
//!
//! Video APIs report durations in the `PT#H#M#S` form (optionally with a
//! leading `P#D` date part). Parsed with a plain character walk.

use crate::error::{Error, Result};

/// Parse an ISO 8601 duration into whole seconds.
///
/// Supports `PT15M`, `PT1H2M3S`, `P1DT2H`, `PT90S` and similar. Fractional
/// seconds are truncated.
pub fn parse_iso8601_duration(value: &str) -> Result<u32> {
    let invalid = || Error::InvalidDuration(value.to_string());

    let rest = value.strip_prefix('P').ok_or_else(invalid)?;
    let mut in_time = false;
    let mut total: u64 = 0;
    let mut num = String::new();
    let mut parsed_any = false;

    for ch in rest.chars() {
        match ch {
            'T' | 't' => {
                if in_time || !num.is_empty() {
                    return Err(invalid());
                }
                in_time = true;
            }
            '0'..='9' | '.' => num.push(ch),
            unit => {
                let quantity: f64 = num.parse().map_err(|_| invalid())?;
                num.clear();
                let factor = match (in_time, unit.to_ascii_uppercase()) {
                    (false, 'D') => 86_400,
                    (true, 'H') => 3_600,
                    (true, 'M') => 60,
                    (true, 'S') => 1,
                    _ => return Err(invalid()),
                };
                total += (quantity * f64::from(factor)) as u64;
                parsed_any = true;
            }
        }
    }

    if !parsed_any || !num.is_empty() {
        return Err(invalid());
    }
    u32::try_from(total).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_seconds() {
        assert_eq!(parse_iso8601_duration("PT15M33S").unwrap(), 933);
        assert_eq!(parse_iso8601_duration("PT8M").unwrap(), 480);
        assert_eq!(parse_iso8601_duration("PT90S").unwrap(), 90);
    }

    #[test]
    fn test_hours() {
        assert_eq!(parse_iso8601_duration("PT1H2M3S").unwrap(), 3723);
        assert_eq!(parse_iso8601_duration("PT2H").unwrap(), 7200);
    }

    #[test]
    fn test_days() {
        assert_eq!(parse_iso8601_duration("P1DT2H").unwrap(), 93_600);
    }

    #[test]
    fn test_fractional_seconds_truncated() {
        assert_eq!(parse_iso8601_duration("PT1.5S").unwrap(), 1);
    }

    #[test]
    fn test_zero() {
        assert_eq!(parse_iso8601_duration("PT0S").unwrap(), 0);
    }

    #[test]
    fn test_invalid() {
        assert!(parse_iso8601_duration("").is_err());
        assert!(parse_iso8601_duration("15M").is_err());
        assert!(parse_iso8601_duration("PT").is_err());
        assert!(parse_iso8601_duration("PT5X").is_err());
        assert!(parse_iso8601_duration("PT5").is_err());
    }
}
