//! Parsing of log payloads into buckets.
//!
//! The bundled [`LogParser`] understands the l2met conventions. Every line is a list of
//! whitespace separated tokens. `key=value` pairs are recognized as follows:
//!
//!  - `measure#<name>=<value><units>` creates a [`MetricType::Measurement`],
//!  - `sample#<name>=<value><units>` creates a [`MetricType::Sample`],
//!  - `count#<name>[=<value><units>]` creates a [`MetricType::Counter`], defaulting to `1`,
//!  - `source=<name>` sets the source of all measurements on the line,
//!  - `tags=<a>,<b>` adds tags to all measurements on the line.
//!
//! The first token that parses as an RFC 3339 datetime sets the measurement time of the line,
//! which allows syslog framed lines such as:
//!
//! ```text
//! <134>1 2013-06-06T21:41:22+00:00 host app web.1 - measure#db.latency=20ms source=web.1
//! ```
//!
//! Lines without a datetime are timestamped with the time the payload was received.

use std::collections::BTreeSet;
use std::fmt;

use shuttle_common::time::UnixTimestamp;
use shuttle_statsd::metric;

use crate::bucket::{Bucket, BucketId, DEFAULT_RESOLUTION, MetricType};
use crate::statsd::MetricCounters;

/// Request-level options applied to every parsed measurement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseOptions {
    /// The credential token of the destination account.
    pub auth: String,
    /// The bucket width in seconds.
    pub resolution: u64,
    /// Tags added to every bucket.
    pub tags: BTreeSet<String>,
    /// The default source for lines that do not declare one.
    pub source: Option<String>,
    /// The time the payload was received.
    pub received_at: UnixTimestamp,
}

impl ParseOptions {
    /// Creates options with the default resolution.
    pub fn new(auth: impl Into<String>, received_at: UnixTimestamp) -> Self {
        Self {
            auth: auth.into(),
            resolution: DEFAULT_RESOLUTION,
            tags: BTreeSet::new(),
            source: None,
            received_at,
        }
    }

    /// Creates options from request query parameters.
    ///
    /// Recognized keys are `auth`, `resolution` (seconds), `tags` (comma separated), and
    /// `source`. Unknown keys are ignored; an invalid resolution falls back to the default.
    pub fn from_query<'a, I>(pairs: I, received_at: UnixTimestamp) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::new("", received_at);

        for (key, value) in pairs {
            match key {
                "auth" => options.auth = value.to_owned(),
                "resolution" => {
                    options.resolution = match value.parse() {
                        Ok(resolution) if resolution > 0 => resolution,
                        _ => DEFAULT_RESOLUTION,
                    }
                }
                "tags" => options.tags.extend(split_tags(value)),
                "source" if !value.is_empty() => options.source = Some(value.to_owned()),
                _ => (),
            }
        }

        options
    }
}

/// Turns a raw payload into buckets.
///
/// Implementations must be safe to share between accept workers.
pub trait Parser: Send + Sync + fmt::Debug {
    /// Parses `payload` into single-measurement buckets.
    ///
    /// Malformed input is skipped, it never fails the whole payload.
    fn parse(&self, payload: &[u8], options: &ParseOptions) -> Vec<Bucket>;
}

/// Parser for l2met formatted log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogParser;

impl Parser for LogParser {
    fn parse(&self, payload: &[u8], options: &ParseOptions) -> Vec<Bucket> {
        let payload = String::from_utf8_lossy(payload);
        payload
            .lines()
            .flat_map(|line| parse_line(line, options))
            .collect()
    }
}

struct Measurement<'a> {
    ty: MetricType,
    name: &'a str,
    value: f64,
    units: &'a str,
}

fn parse_line(line: &str, options: &ParseOptions) -> Vec<Bucket> {
    let mut time = None;
    let mut source = options.source.as_deref();
    let mut tags = options.tags.clone();
    let mut measurements = Vec::new();

    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            if time.is_none() {
                time = UnixTimestamp::parse_rfc3339(token);
            }
            continue;
        };

        match key {
            "source" if !value.is_empty() => source = Some(value),
            "tags" => tags.extend(split_tags(value)),
            _ => {
                if let Some(measurement) = parse_measurement(key, Some(value)) {
                    measurements.push(measurement);
                }
            }
        }
    }

    // A bare `count#name` token has no `=` and is handled separately.
    for token in line.split_whitespace().filter(|t| !t.contains('=')) {
        if token.starts_with("count#") {
            if let Some(measurement) = parse_measurement(token, None) {
                measurements.push(measurement);
            }
        }
    }

    let time = time.unwrap_or(options.received_at);
    measurements
        .into_iter()
        .map(|m| {
            let id = BucketId::new(m.name, m.ty, time, options.resolution)
                .with_units(m.units)
                .with_source(source.unwrap_or_default())
                .with_auth(options.auth.as_str())
                .with_tags(tags.iter().cloned());

            Bucket::with_value(id, m.value)
        })
        .collect()
}

fn parse_measurement<'a>(key: &'a str, value: Option<&'a str>) -> Option<Measurement<'a>> {
    let (prefix, name) = key.split_once('#')?;
    let ty = MetricType::from_prefix(prefix)?;

    if name.is_empty() {
        metric!(counter(MetricCounters::ParseError) += 1, reason = "empty_name");
        return None;
    }

    let (value, units) = match (ty, value) {
        (MetricType::Counter, None) => (1.0, ""),
        (_, None) => {
            metric!(counter(MetricCounters::ParseError) += 1, reason = "missing_value");
            return None;
        }
        (_, Some(raw)) => match split_value(raw) {
            Some(parsed) => parsed,
            None => {
                metric!(counter(MetricCounters::ParseError) += 1, reason = "invalid_value");
                shuttle_log::trace!(name, raw, "skipping measurement with invalid value");
                return None;
            }
        },
    };

    Some(Measurement {
        ty,
        name,
        value,
        units,
    })
}

/// Splits a raw value such as `20.5ms` into its number and unit suffix.
fn split_value(raw: &str) -> Option<(f64, &str)> {
    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
        .unwrap_or(raw.len());

    let (number, units) = raw.split_at(end);
    let value: f64 = number.parse().ok()?;
    value.is_finite().then_some((value, units))
}

fn split_tags(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const RECEIVED: UnixTimestamp = UnixTimestamp::from_secs(1370554882);

    fn options() -> ParseOptions {
        ParseOptions::new("secret", RECEIVED)
    }

    fn parse(payload: &str) -> Vec<Bucket> {
        LogParser.parse(payload.as_bytes(), &options())
    }

    #[test]
    fn test_parse_measure() {
        let buckets = parse("measure#db.latency=20.5ms source=web.1");
        assert_eq!(buckets.len(), 1);

        let id = buckets[0].id();
        assert_eq!(id.name(), "db.latency");
        assert_eq!(id.ty(), MetricType::Measurement);
        assert_eq!(id.units(), "ms");
        assert_eq!(id.source(), "web.1");
        assert_eq!(id.auth(), "secret");
        assert_eq!(id.time(), UnixTimestamp::from_secs(1370554860));
        assert_eq!(buckets[0].values(), [20.5].as_slice());
    }

    #[test]
    fn test_parse_multiple_per_line() {
        let buckets = parse("count#requests sample#queue=4 measure#db.latency=3 tags=a,b");
        let summary: Vec<_> = buckets
            .iter()
            .map(|b| (b.id().name().to_owned(), b.id().ty(), b.sum()))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("queue".to_owned(), MetricType::Sample, 4.0),
                ("db.latency".to_owned(), MetricType::Measurement, 3.0),
                ("requests".to_owned(), MetricType::Counter, 1.0),
            ]
        );
        assert!(buckets.iter().all(|b| b.id().tags().len() == 2));
    }

    #[test]
    fn test_parse_count_with_value() {
        let buckets = parse("count#bytes=512B");
        assert_eq!(buckets[0].sum(), 512.0);
        assert_eq!(buckets[0].id().units(), "B");
    }

    #[test]
    fn test_parse_syslog_timestamp() {
        let buckets = parse(
            "<134>1 2013-06-06T20:00:05+00:00 host app web.1 - measure#db.latency=1 source=a",
        );
        assert_eq!(buckets[0].id().time(), UnixTimestamp::from_secs(1370548800));
    }

    #[test]
    fn test_parse_skips_invalid() {
        let payload = "measure#db.latency=fast\nmeasure#=3\nsample#queue\nhello world\nfoo=bar";
        assert!(parse(payload).is_empty());
    }

    #[test]
    fn test_parse_error_metric() {
        let captures = shuttle_statsd::with_capturing_test_client(|| {
            parse("measure#db.latency=fast count#requests");
        });
        assert_eq!(
            captures,
            vec!["parser.error:1|c|#reason:invalid_value".to_owned()]
        );
    }

    #[test]
    fn test_parse_multiple_lines() {
        let buckets = parse("measure#a=1\r\nmeasure#a=2\n\nmeasure#b=3\n");
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].id(), buckets[1].id());
    }

    #[test]
    fn test_parse_option_defaults() {
        let mut options = options();
        options.source = Some("router".to_owned());
        options.tags.insert("env:prod".to_owned());
        options.resolution = 1;

        let buckets = LogParser.parse(b"measure#a=1", &options);
        let id = buckets[0].id();

        assert_eq!(id.source(), "router");
        assert_eq!(id.resolution(), 1);
        assert_eq!(id.time(), RECEIVED);
        assert!(id.tags().contains("env:prod"));
    }

    #[test]
    fn test_options_from_query() {
        let options = ParseOptions::from_query(
            [
                ("auth", "key"),
                ("resolution", "10"),
                ("tags", "a, b,,c"),
                ("source", "web"),
                ("other", "ignored"),
            ],
            RECEIVED,
        );

        assert_eq!(options.auth, "key");
        assert_eq!(options.resolution, 10);
        assert_eq!(
            options.tags.into_iter().collect::<Vec<_>>(),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert_eq!(options.source.as_deref(), Some("web"));
    }

    #[test]
    fn test_options_invalid_resolution() {
        for raw in ["0", "-5", "fast"] {
            let options = ParseOptions::from_query([("resolution", raw)], RECEIVED);
            assert_eq!(options.resolution, DEFAULT_RESOLUTION);
        }
    }

    #[test]
    fn test_split_value() {
        assert_eq!(split_value("20ms"), Some((20.0, "ms")));
        assert_eq!(split_value("-1.5"), Some((-1.5, "")));
        assert_eq!(split_value("ms"), None);
        assert_eq!(split_value(""), None);
    }
}
