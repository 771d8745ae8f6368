use std::time::Duration;

use snafu::{ResultExt, Snafu, ensure};

#[derive(Debug, Clone, Snafu)]
pub enum RangeParserError {
    #[snafu(display("Empty range string"))]
    Empty,
    #[snafu(display("Range start {start} is greater than its end {end}"))]
    Reversed { start: u64, end: u64 },
    #[snafu(display("Expected a value or a range like 10-50, got {input:?}"))]
    Malformed { input: String },
    #[snafu(display("Failed to parse {input:?} as milliseconds"))]
    Millis {
        input: String,
        source: std::num::ParseIntError,
    },
}

/// A latency interval in milliseconds, written as `25` or `10-50`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRange {
    pub min: Duration,
    pub max: Duration,
}

impl LatencyRange {
    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }
}

impl std::fmt::Display for LatencyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.min == self.max {
            write!(f, "{}ms", self.min.as_millis())
        } else {
            write!(f, "{}-{}ms", self.min.as_millis(), self.max.as_millis())
        }
    }
}

pub fn parse_latency_range(input: &str) -> Result<LatencyRange, RangeParserError> {
    let input = input.trim();
    ensure!(!input.is_empty(), EmptySnafu);

    let (start, end) = match input.split('-').collect::<Vec<_>>().as_slice() {
        [value] => {
            let value = parse_millis(value)?;
            (value, value)
        }
        [start, end] => (parse_millis(start)?, parse_millis(end)?),
        _ => {
            return MalformedSnafu { input }.fail();
        }
    };

    ensure!(start <= end, ReversedSnafu { start, end });

    Ok(LatencyRange {
        min: Duration::from_millis(start),
        max: Duration::from_millis(end),
    })
}

fn parse_millis(value: &str) -> Result<u64, RangeParserError> {
    let value = value.trim();
    value.parse::<u64>().context(MillisSnafu { input: value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_value() {
        let range = parse_latency_range("10").unwrap();
        assert_eq!(range.min, Duration::from_millis(10));
        assert_eq!(range.max, Duration::from_millis(10));
        assert_eq!(range.to_string(), "10ms");
    }

    #[test]
    fn test_parse_range_with_spaces() {
        let range = parse_latency_range("  5  -  25  ").unwrap();
        assert_eq!(range.min, Duration::from_millis(5));
        assert_eq!(range.max, Duration::from_millis(25));
        assert_eq!(range.to_string(), "5-25ms");
    }

    #[test]
    fn test_zero_latency() {
        assert!(parse_latency_range("0").unwrap().is_zero());
        assert!(!parse_latency_range("0-1").unwrap().is_zero());
    }

    #[test]
    fn test_parse_invalid_input() {
        assert!(matches!(
            parse_latency_range(""),
            Err(RangeParserError::Empty)
        ));
        assert!(matches!(
            parse_latency_range("10-20-30"),
            Err(RangeParserError::Malformed { .. })
        ));
        assert!(matches!(
            parse_latency_range("10-abc"),
            Err(RangeParserError::Millis { .. })
        ));
        assert!(matches!(
            parse_latency_range("100-10"),
            Err(RangeParserError::Reversed {
                start: 100,
                end: 10
            })
        ));
    }
}
