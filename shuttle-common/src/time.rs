//! Utilities to deal with date-time types. (DateTime, Instant, SystemTime, etc)

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from the given system time.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Creates a unix timestamp from the given chrono `DateTime`.
    ///
    /// Returns `None` if the datetime is before the UNIX epoch.
    pub fn from_datetime(date_time: DateTime<impl TimeZone>) -> Option<Self> {
        let timestamp = date_time.timestamp();
        if timestamp >= 0 {
            Some(Self::from_secs(timestamp as u64))
        } else {
            None
        }
    }

    /// Parses an RFC 3339 datetime, such as `2013-06-06T21:41:22Z`.
    ///
    /// Returns `None` if the string is not a valid datetime or before the UNIX epoch.
    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(Self::from_datetime)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Returns the timestamp as chrono datetime.
    pub fn as_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0 as i64, 0)
    }

    /// Truncates the timestamp to the start of the window of the given width in seconds.
    ///
    /// A width of `0` leaves the timestamp unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use shuttle_common::UnixTimestamp;
    ///
    /// let ts = UnixTimestamp::from_secs(125);
    /// assert_eq!(ts.truncate(60), UnixTimestamp::from_secs(120));
    /// ```
    pub fn truncate(self, width: u64) -> Self {
        match width {
            0 => self,
            width => Self(self.0 - self.0 % width),
        }
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

/// Adds _whole_ seconds of the given duration to the timestamp.
impl std::ops::Add<Duration> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_secs()))
    }
}

/// Subtracts _whole_ seconds of the given duration from the timestamp.
impl std::ops::Sub<Duration> for UnixTimestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_sub(rhs.as_secs()))
    }
}

/// Returns the elapsed time between two timestamps, zero if `rhs` is later than `self`.
impl std::ops::Sub for UnixTimestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration::from_secs(self.0.saturating_sub(rhs.0))
    }
}

/// An error returned from parsing [`UnixTimestamp`].
#[derive(Debug)]
pub struct ParseUnixTimestampError(());

impl fmt::Display for ParseUnixTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid unix timestamp")
    }
}

impl std::error::Error for ParseUnixTimestampError {}

impl std::str::FromStr for UnixTimestamp {
    type Err = ParseUnixTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(timestamp) = Self::parse_rfc3339(s) {
            return Ok(timestamp);
        }

        let ts = s.parse().or(Err(ParseUnixTimestampError(())))?;
        Ok(Self(ts))
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self::from_secs)
    }
}

/// A source of wall clock time.
///
/// The receiver observes admission time through this trait, so tests can control it.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time of this clock.
    fn now(&self) -> UnixTimestamp;
}

/// The process-local system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp::now()
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use shuttle_common::{Clock, ManualClock, UnixTimestamp};
///
/// let clock = ManualClock::new(UnixTimestamp::from_secs(10));
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now(), UnixTimestamp::from_secs(15));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Creates a new clock starting at `start`.
    pub fn new(start: UnixTimestamp) -> Self {
        Self(AtomicU64::new(start.as_secs()))
    }

    /// Moves the clock to the given timestamp.
    pub fn set(&self, now: UnixTimestamp) {
        self.0.store(now.as_secs(), Ordering::Relaxed);
    }

    /// Moves the clock forward by whole seconds of `duration`.
    pub fn advance(&self, duration: Duration) {
        self.0.fetch_add(duration.as_secs(), Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp::from_secs(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_int() {
        let ts: UnixTimestamp = "123".parse().unwrap();
        assert_eq!(ts, UnixTimestamp::from_secs(123));
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ts: UnixTimestamp = "2013-06-06T21:41:22Z".parse().unwrap();
        assert_eq!(ts, UnixTimestamp::from_secs(1370554882));
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!("-1".parse::<UnixTimestamp>().is_err());
        assert!("1969-12-31T23:59:59Z".parse::<UnixTimestamp>().is_err());
        assert!("yesterday".parse::<UnixTimestamp>().is_err());
    }

    #[test]
    fn test_sub_saturates() {
        let earlier = UnixTimestamp::from_secs(10);
        let later = UnixTimestamp::from_secs(25);
        assert_eq!(later - earlier, Duration::from_secs(15));
        assert_eq!(earlier - later, Duration::ZERO);
    }

    #[test]
    fn test_truncate() {
        let ts = UnixTimestamp::from_secs(1370554882);
        assert_eq!(ts.truncate(60), UnixTimestamp::from_secs(1370554860));
        assert_eq!(ts.truncate(1), ts);
        assert_eq!(ts.truncate(0), ts);
    }

    #[test]
    fn test_serde_roundtrip_as_integer() {
        let ts = UnixTimestamp::from_secs(42);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "42");
        assert_eq!(serde_json::from_str::<UnixTimestamp>("42").unwrap(), ts);
    }
}
