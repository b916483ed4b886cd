//! Durations in the format accepted by Go's `time.ParseDuration`, as used by
//! Gateway API timeout fields (e.g. `10s`, `1h30m`, `250ms`).

use std::{fmt, str::FromStr, time::Duration};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoDuration(Duration);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("negative durations are not supported")]
    Negative,

    #[error("missing unit after {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {0:?}; expected one of ns, us, ms, s, m, or h")]
    UnknownUnit(String),

    #[error("invalid number {0:?}")]
    InvalidNumber(String),
}

impl GoDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<GoDuration> for Duration {
    fn from(GoDuration(d): GoDuration) -> Self {
        d
    }
}

impl From<Duration> for GoDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

fn unit(s: &str) -> Result<Duration, ParseError> {
    Ok(match s {
        "ns" => Duration::from_nanos(1),
        // Both the micro sign and the Greek letter mu are accepted.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(60 * 60),
        _ => return Err(ParseError::UnknownUnit(s.to_string())),
    })
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        let mut rest = s.strip_prefix('+').unwrap_or(s);
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }
        if rest == "0" {
            return Ok(Self::default());
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let num_end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            let (num, tail) = rest.split_at(num_end);
            if num.is_empty() || num == "." {
                return Err(ParseError::InvalidNumber(rest.to_string()));
            }
            let value = num
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidNumber(num.to_string()))?;

            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (u, tail) = tail.split_at(unit_end);
            if u.is_empty() {
                return Err(ParseError::MissingUnit(num.to_string()));
            }
            total += unit(u)?.mul_f64(value);
            rest = tail;
        }
        Ok(Self(total))
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0;
        if d.subsec_nanos() == 0 {
            write!(f, "{}s", d.as_secs())
        } else if d.subsec_nanos() % 1_000_000 == 0 {
            write!(f, "{}ms", d.as_millis())
        } else {
            write!(f, "{}ns", d.as_nanos())
        }
    }
}
