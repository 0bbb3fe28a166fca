//! Configuration for the shuttle CLI and pipeline.
//!
//! The configuration is read from a `config.yml` file in a configuration folder. Every section
//! and every field is optional and falls back to a default, so an empty file is a valid
//! configuration:
//!
//! ```yaml
//! http:
//!   host: 0.0.0.0
//!   port: 3030
//! receiver:
//!   deadline: 2
//! outlet:
//!   url: https://app.datadoghq.com/api/v1/series
//!   batch_capacity: 300
//! metrics:
//!   statsd: 127.0.0.1:8125
//! logging:
//!   level: info
//! ```

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
