//! Simplified cron evaluation
//!
//! Repeatable jobs carry 5-field cron patterns. Only the interval shapes
//! the pipeline actually schedules are evaluated precisely; anything else
//! falls back to an hourly re-check, which is safe because the tick loop
//! recomputes after every firing.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Calculate the next occurrence of `expression` after `from`.
///
/// Format: `minute hour day month weekday`. Recognized shapes:
/// - `*/N * * * *` — every N minutes
/// - `M */N * * *` — every N hours
/// - `M H * * *` — daily
pub fn next_occurrence(expression: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() < 5 {
        warn!(expression, "invalid cron expression");
        return None;
    }

    let minute = parts[0];
    let hour = parts[1];
    let day = parts[2];

    if minute.starts_with("*/") && hour == "*" && day == "*" {
        if let Ok(interval) = minute.trim_start_matches("*/").parse::<i64>() {
            return Some(from + Duration::minutes(interval.max(1)));
        }
    }

    if minute != "*" && hour.starts_with("*/") && day == "*" {
        if let Ok(interval) = hour.trim_start_matches("*/").parse::<i64>() {
            return Some(from + Duration::hours(interval.max(1)));
        }
    }

    if minute != "*" && hour != "*" && day == "*" {
        return Some(from + Duration::hours(24));
    }

    Some(from + Duration::hours(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_n_minutes() {
        let from = Utc::now();
        let next = next_occurrence("*/15 * * * *", from).unwrap();
        assert_eq!((next - from).num_minutes(), 15);
    }

    #[test]
    fn test_every_n_hours() {
        let from = Utc::now();
        let next = next_occurrence("0 */6 * * *", from).unwrap();
        assert_eq!((next - from).num_hours(), 6);
    }

    #[test]
    fn test_daily() {
        let from = Utc::now();
        let next = next_occurrence("30 3 * * *", from).unwrap();
        assert_eq!((next - from).num_hours(), 24);
    }

    #[test]
    fn test_fallback_hourly() {
        let from = Utc::now();
        let next = next_occurrence("* * 1 1 *", from).unwrap();
        assert_eq!((next - from).num_hours(), 1);
    }

    #[test]
    fn test_invalid_expression() {
        assert!(next_occurrence("bogus", Utc::now()).is_none());
    }
}
