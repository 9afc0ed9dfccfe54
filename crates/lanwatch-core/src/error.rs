use thiserror::Error;

use crate::config::MethodKind;

/// A scan configuration that cannot be used to start a pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid subnet CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid IPv4 address: {0}")]
    InvalidIp(String),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Invalid timeout format: {0} (expected e.g. 3s, 1000ms, 1.5s)")]
    InvalidTimeout(String),

    #[error("Port must be between 1 and 65535: {0}")]
    InvalidPort(u32),

    #[error("Invalid port range: {0}")]
    InvalidPortRange(String),

    #[error("Probe method {0} is enabled but has no ports configured")]
    MissingPorts(MethodKind),

    #[error("At least one probe method must be enabled")]
    NoProbeMethods,

    #[error("No subnet configured and auto-detection is disabled")]
    MissingSubnet,

    #[error("No usable network interface found for subnet auto-detection")]
    NoUsableInterface,

    #[error("Unknown preset: {0} (available: fast, balanced, thorough, stealth)")]
    UnknownPreset(String),

    #[error("Invalid configuration document: {0}")]
    Malformed(String),
}
