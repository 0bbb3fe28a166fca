//! Conversion of buckets into the Datadog series format.
//!
//! A bucket is expanded into its statistical views, and every view becomes one
//! [`DatadogSeries`] with a single point at the bucket's window start. Series carry the bucket's
//! credential token so they can be batched per destination account, but the token is never
//! serialized.

use serde::Serialize;

use crate::bucket::Bucket;
use crate::view::ViewKind;

/// The Datadog metric type of a series.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    /// A point-in-time value.
    Gauge,
    /// A count over the series' interval.
    Count,
}

impl From<ViewKind> for SeriesType {
    fn from(kind: ViewKind) -> Self {
        match kind {
            ViewKind::Gauge => SeriesType::Gauge,
            ViewKind::Count => SeriesType::Count,
        }
    }
}

/// A single Datadog series, ready for delivery.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatadogSeries {
    /// The full metric name.
    pub metric: String,
    /// The originating host, taken from the bucket source.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Tags in `key:value` or bare form.
    pub tags: Vec<String>,
    /// The metric type.
    #[serde(rename = "type")]
    pub ty: SeriesType,
    /// The interval of count series in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Pairs of UNIX timestamp and value.
    pub points: Vec<(u64, f64)>,
    /// The credential token used to deliver this series.
    #[serde(skip)]
    pub auth: String,
}

impl DatadogSeries {
    /// Converts a bucket into one series per statistical view.
    pub fn from_bucket(bucket: &Bucket) -> Vec<Self> {
        let id = bucket.id();
        let tags: Vec<String> = id.tags().iter().cloned().collect();

        bucket
            .views()
            .into_iter()
            .map(|view| {
                let ty = SeriesType::from(view.kind);
                Self {
                    metric: view.name.into_owned(),
                    host: id.source().to_owned(),
                    tags: tags.clone(),
                    ty,
                    interval: (ty == SeriesType::Count).then_some(id.resolution()),
                    points: vec![(view.time.as_secs(), view.value)],
                    auth: id.auth().to_owned(),
                }
            })
            .collect()
    }
}

/// The request body of the Datadog series endpoint.
#[derive(Debug, Serialize)]
pub struct DatadogRequest<'a> {
    /// The series to submit, all belonging to the same account.
    pub series: &'a [DatadogSeries],
}

impl<'a> DatadogRequest<'a> {
    /// Creates a request for the given series.
    pub fn new(series: &'a [DatadogSeries]) -> Self {
        Self { series }
    }

    /// Serializes the request into a JSON body.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use shuttle_common::time::UnixTimestamp;

    use crate::bucket::{BucketId, MetricType};

    use super::*;

    fn bucket(ty: MetricType, values: &[f64]) -> Bucket {
        let id = BucketId::new("db.latency", ty, UnixTimestamp::from_secs(1370554882), 60)
            .with_source("web.1")
            .with_auth("secret")
            .with_tags(["env:prod"]);

        let mut bucket = Bucket::new(id);
        for value in values {
            bucket.insert(*value);
        }
        bucket
    }

    #[test]
    fn test_counter_request() {
        let series = DatadogSeries::from_bucket(&bucket(MetricType::Counter, &[2.0, 3.0]));
        let json = serde_json::to_string_pretty(&DatadogRequest::new(&series)).unwrap();

        insta::assert_snapshot!(json, @r###"
        {
          "series": [
            {
              "metric": "db.latency",
              "host": "web.1",
              "tags": [
                "env:prod"
              ],
              "type": "count",
              "interval": 60,
              "points": [
                [
                  1370554860,
                  5.0
                ]
              ]
            }
          ]
        }
        "###);
    }

    #[test]
    fn test_sample_request_compact() {
        let series = DatadogSeries::from_bucket(&bucket(MetricType::Sample, &[1.5, 2.5]));
        let body = DatadogRequest::new(&series).to_json().unwrap();

        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"series":[{"metric":"db.latency","host":"web.1","tags":["env:prod"],"type":"gauge","points":[[1370554860,2.5]]}]}"#
        );
    }

    #[test]
    fn test_measurement_series() {
        let series = DatadogSeries::from_bucket(&bucket(MetricType::Measurement, &[1.0, 2.0]));

        assert_eq!(series.len(), 9);
        assert!(series.iter().all(|s| s.auth == "secret"));
        assert!(series.iter().all(|s| s.tags == ["env:prod"]));
        assert_eq!(series[0].metric, "db.latency.min");
        assert_eq!(series[0].ty, SeriesType::Gauge);
        assert_eq!(series[8].metric, "db.latency.sum");
        assert_eq!(series[8].ty, SeriesType::Count);
        assert_eq!(series[8].points, vec![(1370554860, 3.0)]);
    }

    #[test]
    fn test_auth_not_serialized() {
        let series = DatadogSeries::from_bucket(&bucket(MetricType::Counter, &[1.0]));
        let body = DatadogRequest::new(&series).to_json().unwrap();
        assert!(!String::from_utf8(body).unwrap().contains("secret"));
    }
}
