use std::fmt;
use std::time::Duration;

/// Human-readable elapsed time, e.g. `1d2h3m4s`.
///
/// Zero-valued day, hour and minute components are omitted; seconds are
/// always shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub u64);

impl From<Duration> for Elapsed {
    fn from(duration: Duration) -> Self {
        Self(duration.as_secs())
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0;
        let days = secs / 86_400;
        let hours = secs / 3_600 % 24;
        let minutes = secs % 3_600 / 60;

        for (value, unit) in [(days, 'd'), (hours, 'h'), (minutes, 'm')] {
            if value > 0 {
                write!(f, "{value}{unit}")?;
            }
        }
        write!(f, "{}s", secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_only() {
        assert_eq!(Elapsed(0).to_string(), "0s");
        assert_eq!(Elapsed(59).to_string(), "59s");
    }

    #[test]
    fn skips_zero_components() {
        assert_eq!(Elapsed(3_600 + 5).to_string(), "1h5s");
        assert_eq!(Elapsed(90).to_string(), "1m30s");
    }

    #[test]
    fn all_components() {
        assert_eq!(Elapsed(86_400 + 2 * 3_600 + 3 * 60 + 4).to_string(), "1d2h3m4s");
    }
}
