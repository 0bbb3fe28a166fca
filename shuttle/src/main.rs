//! Shuttle reads metrics from log lines and delivers them to Datadog.
//!
//! Log lines in the l2met convention are posted to the `/logs` endpoint. Shuttle aggregates the
//! contained measurements into time buckets, keeps them in an intermediate store until their
//! window closes, and then delivers statistical views of every bucket to the Datadog series API.
//!
//! # Workspace Crates
//!
//! Shuttle is split into the following workspace crates:
//!
//!  - `shuttle`: Main entry point and command line interface.
//!  - [`shuttle-common`]: Timestamps and clocks shared by all crates.
//!  - [`shuttle-config`]: Static configuration for the CLI and server.
//!  - [`shuttle-log`]: Logging setup and facade.
//!  - [`shuttle-metrics`]: Buckets, the log line parser, and the Datadog wire format.
//!  - [`shuttle-server`]: Endpoints and pipeline services.
//!  - [`shuttle-statsd`]: High-level StatsD metric client for internal measurements.
//!  - [`shuttle-test`]: Helpers for testing the server and services.
//!
//! [`shuttle-common`]: ../shuttle_common/index.html
//! [`shuttle-config`]: ../shuttle_config/index.html
//! [`shuttle-log`]: ../shuttle_log/index.html
//! [`shuttle-metrics`]: ../shuttle_metrics/index.html
//! [`shuttle-server`]: ../shuttle_server/index.html
//! [`shuttle-statsd`]: ../shuttle_statsd/index.html
//! [`shuttle-test`]: ../shuttle_test/index.html

mod cli;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            shuttle_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
