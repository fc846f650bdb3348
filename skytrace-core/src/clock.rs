//! Clock reconciliation.
//!
//! Remote peers record against their own reference clock. Before a remote
//! entry can join the local session it must be rebased: the sender's
//! absolute sample instant is reconstructed from its reference clock plus
//! its relative timestamp, then expressed relative to the local reference
//! clock.

use chrono::{Duration, NaiveDateTime};

use crate::error::FormatError;

/// Parse a reference-clock timestamp (naive UTC, fractional seconds of any
/// precision).
pub fn parse_ref_time(value: &str) -> Result<NaiveDateTime, FormatError> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f").map_err(|e| {
        FormatError::InvalidReferenceTime {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Rebase a sender-relative timestamp onto the local reference clock.
///
/// Returns `(sender_ref + sender_rel) - local_ref` in seconds, reported to
/// two decimal places. Negative results are possible when the sender's
/// session started before the local one and are kept as-is.
pub fn rebase(sender_ref: NaiveDateTime, sender_rel_secs: f64, local_ref: NaiveDateTime) -> f64 {
    let rel_micros = (sender_rel_secs * 1_000_000.0).round() as i64;
    let instant = sender_ref + Duration::microseconds(rel_micros);
    let delta = instant - local_ref;
    let secs = delta.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
    (secs * 100.0).round() / 100.0
}

/// Extract the relative timestamp from an entry line's leading `#<ts>`
/// token.
pub fn parse_leading_timestamp(entry: &str) -> Result<f64, FormatError> {
    let first = entry.lines().next().unwrap_or("");
    let token = first
        .strip_prefix('#')
        .ok_or(FormatError::MissingTimestamp)?;
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| FormatError::InvalidTimestamp(token.to_string()))
}

/// Replace the leading `#<ts>` token of an entry line with a new relative
/// timestamp, leaving the rest of the entry untouched.
pub fn rewrite_timestamp(entry: &str, new_ts: f64) -> Result<String, FormatError> {
    let newline = entry.find('\n').ok_or(FormatError::MissingTimestamp)?;
    let first = &entry[..newline];
    if !first.starts_with('#') {
        return Err(FormatError::MissingTimestamp);
    }
    // Validate the old token so garbled lines get dropped, not forwarded
    parse_leading_timestamp(entry)?;
    Ok(format!("#{:.2}{}", new_ts, &entry[newline..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveDateTime {
        parse_ref_time(s).unwrap()
    }

    #[test]
    fn test_rebase_example() {
        // Sender clock two seconds behind the local clock
        let reconciled = rebase(
            t("2024-01-01T00:00:00.000000"),
            5.00,
            t("2024-01-01T00:00:02.000000"),
        );
        assert_eq!(reconciled, 3.00);
    }

    #[test]
    fn test_rebase_negative_allowed() {
        let reconciled = rebase(
            t("2024-01-01T00:00:00.000000"),
            1.00,
            t("2024-01-01T00:00:02.000000"),
        );
        assert_eq!(reconciled, -1.00);
    }

    #[test]
    fn test_rebase_rounds_to_two_decimals() {
        let reconciled = rebase(
            t("2024-01-01T00:00:00.000000"),
            0.123456,
            t("2024-01-01T00:00:00.000000"),
        );
        assert_eq!(reconciled, 0.12);
    }

    #[test]
    fn test_parse_ref_time_precision_variants() {
        assert!(parse_ref_time("2024-06-01T12:30:00.5").is_ok());
        assert!(parse_ref_time("2024-06-01T12:30:00.000001").is_ok());
        assert!(parse_ref_time("not a time").is_err());
    }

    #[test]
    fn test_rewrite_timestamp() {
        let entry = "#5.00\n3,T=1.0|2.0|300,Throttle=1\n";
        let rewritten = rewrite_timestamp(entry, 3.0).unwrap();
        assert_eq!(rewritten, "#3.00\n3,T=1.0|2.0|300,Throttle=1\n");
    }

    #[test]
    fn test_rewrite_rejects_missing_token() {
        assert_eq!(
            rewrite_timestamp("3,T=1.0|2.0|300\n", 1.0),
            Err(FormatError::MissingTimestamp)
        );
        assert!(matches!(
            rewrite_timestamp("#abc\n3,T=1\n", 1.0),
            Err(FormatError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_parse_leading_timestamp() {
        assert_eq!(parse_leading_timestamp("#12.34\nline").unwrap(), 12.34);
        assert!(parse_leading_timestamp("12.34\nline").is_err());
    }
}
