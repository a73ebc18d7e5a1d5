//! # dhcpcore
//!
//! A DHCPv4 server implementing RFC 2131 (DHCP) and RFC 2132 (DHCP Options).
//!
//! ## Features
//!
//! - DISCOVER, OFFER, REQUEST, ACK, NAK, RELEASE, DECLINE, INFORM
//! - Per-message state machine keyed by client identifier
//! - One lock per pool, so concurrent transactions never share an address
//! - Timed expiry of offers and leases with a pluggable [`Clock`]
//! - Declined-address quarantine until cleared by an operator
//! - Relay agent support (Option 82) and option overload (Option 52)
//! - Lease persistence across restarts
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhcpcore::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> dhcpcore::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`DhcpPacket`] / [`DhcpOption`] - wire codec
//! - [`LeaseStore`] - lease table, keyed by address and client
//! - [`AddressPool`] - address selection and declined addresses
//! - [`Engine`] - transaction state machine
//! - [`DhcpServer`] - UDP sockets, expiry timer, persistence

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod lease;
pub mod options;
pub mod packet;
pub mod persist;
pub mod pool;
pub mod server;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{Engine, PoolUsage};
pub use error::{Error, Result};
pub use lease::{ClientId, Lease, LeaseState, LeaseStore};
pub use options::{DhcpOption, MessageType};
pub use packet::DhcpPacket;
pub use persist::{LeaseFile, LeaseSnapshot};
pub use pool::AddressPool;
pub use server::DhcpServer;
