//! pvesync-client - Proxmox VE REST transport.
//!
//! Implements the engine's [`VmApi`](pvesync_engine::VmApi) and
//! [`IdGenerator`](pvesync_engine::IdGenerator) over `/api2/json`. Calls that
//! start a platform task wait for the task to finish before returning.

mod client;
mod config;
mod error;

pub use client::PveClient;
pub use config::ClientConfig;
pub use error::ClientError;
