//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::net::Ipv4Addr;

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or lease files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP packet received.
    ///
    /// Covers packets that are too short, carry a bad magic cookie,
    /// truncated options, or option values of the wrong length. These are
    /// dropped without a reply.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// The IP address pool is exhausted.
    ///
    /// All addresses are offered, bound, reserved, or declined.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// A lease write would take an address another client actively holds.
    #[error("Address {0} is already held by another client")]
    AllocationConflict(Ipv4Addr),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without privileges,
    /// or when a configured interface doesn't exist.
    #[error("Socket error: {0}")]
    Socket(String),

    /// Address is outside the configured pool.
    #[error("Address {0} is outside the configured pool range")]
    AddressOutOfRange(Ipv4Addr),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
