//! The stages of the metrics pipeline.
//!
//! The [`Receiver`] accepts raw payloads, aggregates them into buckets, and persists closed and
//! open buckets into a [`Store`]. The [`Outlet`] reads buckets from the store once admission no
//! longer accepts data for their window, and delivers them to an [`Upstream`] in batches. Both halves only share the store, so
//! they can run in separate processes against a shared store.

mod outlet;
mod receiver;
mod register;
mod store;
mod upstream;

pub use self::outlet::*;
pub use self::receiver::*;
pub use self::store::*;
pub use self::upstream::*;
