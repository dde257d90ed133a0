// ABOUTME: Text codec for timestamp-valued fact fields: `YYYY-MM-DDTHH:MM:SS[.fffffffff]`.
// ABOUTME: Knows nothing about sessions; serialization calls it only for timestamp fields.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

const BASE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TARGET_TYPE: &str = "NaiveDateTime";

/// Raised when a string cannot be read back as a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to convert string ({input}) to type ({target})")]
pub struct CodecError {
    pub input: String,
    pub target: &'static str,
}

impl CodecError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
            target: TARGET_TYPE,
        }
    }
}

/// Format a timestamp with the shortest fractional suffix that preserves it.
/// Whole seconds carry no suffix at all.
pub fn format(ts: &NaiveDateTime) -> String {
    let mut out = ts.format(BASE_FORMAT).to_string();
    // chrono encodes a leap second as nanos >= 1e9; fold it back into range.
    let nanos = ts.nanosecond() % 1_000_000_000;
    if nanos > 0 {
        let digits = format!("{nanos:09}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

/// Parse the fixed textual form, accepting 0 to 9 fractional digits.
pub fn parse(input: &str) -> Result<NaiveDateTime, CodecError> {
    let (base, fraction) = match input.split_once('.') {
        Some((base, fraction)) => (base, Some(fraction)),
        None => (input, None),
    };

    // %Y would also accept signs and short years; the wire form is fixed width.
    if base.len() != 19 {
        return Err(CodecError::new(input));
    }

    let ts = NaiveDateTime::parse_from_str(base, BASE_FORMAT).map_err(|_| CodecError::new(input))?;

    // A bare trailing dot is a zero-digit fraction.
    let fraction = match fraction {
        None | Some("") => return Ok(ts),
        Some(fraction) => fraction,
    };

    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CodecError::new(input));
    }

    let scale = 10u32.pow(9 - fraction.len() as u32);
    let nanos = fraction
        .parse::<u32>()
        .map_err(|_| CodecError::new(input))?
        * scale;

    ts.with_nanosecond(nanos).ok_or_else(|| CodecError::new(input))
}

/// Serde adapter so timestamp fields go through this codec.
pub mod serde_text {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32, nanos: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 4, 5)
            .unwrap()
            .and_hms_nano_opt(h, m, s, nanos)
            .unwrap()
    }

    #[test]
    fn whole_seconds_have_no_fraction() {
        assert_eq!(format(&ts(10, 15, 30, 0)), "2023-04-05T10:15:30");
    }

    #[test]
    fn fraction_is_trimmed_to_significant_digits() {
        assert_eq!(format(&ts(10, 15, 30, 500_000_000)), "2023-04-05T10:15:30.5");
        assert_eq!(format(&ts(10, 15, 30, 1)), "2023-04-05T10:15:30.000000001");
        assert_eq!(format(&ts(0, 0, 0, 120_000)), "2023-04-05T00:00:00.00012");
    }

    #[test]
    fn parses_every_fraction_width() {
        assert_eq!(parse("2023-04-05T10:15:30").unwrap(), ts(10, 15, 30, 0));
        assert_eq!(parse("2023-04-05T10:15:30.5").unwrap(), ts(10, 15, 30, 500_000_000));
        assert_eq!(parse("2023-04-05T10:15:30.123456789").unwrap(), ts(10, 15, 30, 123_456_789));
        assert_eq!(parse("2023-04-05T10:15:30.000").unwrap(), ts(10, 15, 30, 0));
    }

    #[test]
    fn trailing_dot_is_zero_nanos() {
        assert_eq!(parse("2023-04-05T10:15:30.").unwrap(), ts(10, 15, 30, 0));
    }

    #[test]
    fn format_then_parse_preserves_value() {
        let original = ts(23, 59, 59, 987_654_321);
        assert_eq!(parse(&format(&original)).unwrap(), original);
    }

    #[test]
    fn malformed_input_names_string_and_type() {
        for bad in [
            "2023-04-05 10:15:30",
            "2023-04-05T10:15",
            "2023-04-05T10:15:30..5",
            "2023-04-05T10:15:30.1234567890",
            "2023-04-05T10:15:30.12a",
            "2023-13-05T10:15:30",
            "not a timestamp",
        ] {
            let err = parse(bad).unwrap_err();
            assert_eq!(err.input, bad);
            let message = err.to_string();
            assert!(message.contains(bad), "message should name input: {message}");
            assert!(message.contains("NaiveDateTime"), "message should name type: {message}");
        }
    }
}
