use shuttle_statsd::CounterMetric;

/// Counter metrics for the bucket model and parsing.
pub enum MetricCounters {
    /// Incremented for every measurement that was skipped while parsing.
    ///
    /// This metric is tagged with:
    ///  - `reason`: why the measurement was skipped, such as `invalid_value`.
    ParseError,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ParseError => "parser.error",
        }
    }
}
