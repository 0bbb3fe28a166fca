//! The data model of the shuttle metrics pipeline.
//!
//! Measurements are aggregated into [`Bucket`]s, which are keyed by a [`BucketId`]. The identity
//! covers the metric name, its type, the source, the tags, the credential token, and the start
//! of the aggregation window. Buckets with equal identities can be merged in any order.
//!
//! Once a bucket's window is closed, it is expanded into its statistical views and converted
//! into [`DatadogSeries`] for delivery.
//!
//! # Parsing
//!
//! Raw payloads are turned into buckets by a [`Parser`]. The bundled [`LogParser`] reads the
//! l2met log conventions:
//!
//! ```
//! use shuttle_common::UnixTimestamp;
//! use shuttle_metrics::{LogParser, ParseOptions, Parser};
//!
//! let options = ParseOptions::new("api-key", UnixTimestamp::from_secs(1370554882));
//! let buckets = LogParser.parse(b"measure#db.latency=20ms source=web.1", &options);
//!
//! assert_eq!(buckets.len(), 1);
//! assert_eq!(buckets[0].id().name(), "db.latency");
//! ```

#![warn(missing_docs)]

mod bucket;
mod datadog;
mod parser;
mod statsd;
mod view;

pub use crate::bucket::*;
pub use crate::datadog::*;
pub use crate::parser::*;
pub use crate::view::*;
