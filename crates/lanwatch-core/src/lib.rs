//! lanwatch-core: Shared types, scan configuration, and events for LAN Watch.
//!
//! This crate provides the foundational types used by the store and the
//! discovery engine:
//! - Devices, scan records, scan sessions, and derived presence timelines
//! - The scan configuration model with tagged probe methods and presets
//! - Presence events published on state transitions
//! - Configuration errors

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{MethodKind, Preset, ProbeMethod, ScanConfig, ScanConfigPatch};
pub use error::ConfigError;
pub use types::{Device, DeviceId, ScanRecord, ScanSession, SessionId};
