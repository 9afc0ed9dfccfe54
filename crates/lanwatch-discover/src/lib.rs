//! lanwatch-discover: LAN discovery and presence tracking engine.
//!
//! Resolves the local subnet, probes every candidate host with a set of
//! liveness methods under a rate limit and a bounded worker pool, folds the
//! verdicts into the device table, and records one scan record per device
//! per pass. Day timelines are rebuilt from the recorded history on demand.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod probe;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod subnet;
pub mod timeline;
pub mod vendor;

pub use engine::{ScanEngine, ScanRequest};
pub use error::{DiscoverError, Result};
