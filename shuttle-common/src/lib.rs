//! Common functionality for the shuttle metrics pipeline.
#![warn(missing_docs)]

pub mod time;

pub use crate::time::*;
