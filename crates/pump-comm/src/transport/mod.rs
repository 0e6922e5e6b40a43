//! Transport capability
//!
//! The client never touches a radio. It writes packets to, and waits for
//! notifications from, whatever implements [`PumpTransport`]:
//!
//! - [`SimulatedTransport`] - loops writes through an in-process
//!   [`PumpSimulator`](crate::simulator::PumpSimulator)
//! - [`MockTransport`](crate::test_utils::MockTransport) - scripted replies
//!   for unit tests

mod simulated;

pub use simulated::SimulatedTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pump_protocol::Characteristic;

use crate::error::Result;

/// Trait for pump transports
///
/// Implementations are shared between the sending task and whoever tears
/// the connection down, so every method takes `&self`.
#[async_trait]
pub trait PumpTransport: Send + Sync {
    /// Write one packet to `characteristic`
    async fn write(&self, characteristic: Characteristic, data: Bytes) -> Result<()>;

    /// Next notification on `characteristic`
    ///
    /// Returns `None` if nothing arrived within `timeout`.
    async fn read_or_wait_for_notification(
        &self,
        characteristic: Characteristic,
        timeout: Duration,
    ) -> Result<Option<Bytes>>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Drop the connection
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Get the transport name (for logging)
    fn name(&self) -> &str;
}

/// Connection state for transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected, not paired
    Connected,
    /// Connected with a session key
    Authenticated,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Authenticated => write!(f, "authenticated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Authenticated.to_string(), "authenticated");
    }
}
