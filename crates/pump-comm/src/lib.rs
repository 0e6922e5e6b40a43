//! Async Communication Layer for the Pump BLE Protocol
//!
//! This crate drives the wire protocol from `pump-protocol` over a
//! transport: it sends requests, matches responses by transaction id,
//! pairs with the pump, and decides what to do when the pump says no.
//!
//! # Architecture
//!
//! The crate is split into four layers:
//!
//! 1. **Transport** - [`PumpTransport`] writes packets and waits for
//!    notifications; the radio itself lives outside this crate
//! 2. **Client** - [`PumpClient`] serializes transactions, signs control
//!    requests and routes unsolicited traffic
//! 3. **Faults** - every `ErrorResponse` or timeout becomes a
//!    [`PumpFaultEvent`], classified and handed to the [`RetryPolicy`]
//! 4. **Simulator** - [`PumpSimulator`] plays the pump side of the same
//!    protocol for tests and demos
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pump_comm::{
//!     CommConfigBuilder, FaultRecorder, PumpClient, PumpSimulator, SimulatedTransport,
//!     SimulatorConfig,
//! };
//! use pump_protocol::{SetTempRateRequest, SetTempRateResponse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Simulated pump expecting a 6-digit JPAKE code
//!     let simulator = PumpSimulator::new(SimulatorConfig::new("123456"))?;
//!     let transport = Arc::new(SimulatedTransport::new(simulator));
//!
//!     let config = CommConfigBuilder::new()
//!         .pairing_code("123456")
//!         .max_attempts(3)
//!         .build();
//!     let faults = FaultRecorder::new();
//!     let client = PumpClient::new(transport, config).with_observer(faults.clone());
//!
//!     // Pair; keep the raw secret to skip pairing next time
//!     let outcome = client.authenticate(None).await?;
//!     let secret = outcome.derived_secret;
//!
//!     // Signed control request
//!     let response: SetTempRateResponse =
//!         client.request(SetTempRateRequest::new(30, 120)).await?;
//!     println!("temp rate {} started, {} faults", response.temp_rate_id, faults.len());
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Fault Handling
//!
//! | Category       | Codes                                                   | Default policy |
//! |----------------|---------------------------------------------------------|----------------|
//! | Transient      | CrcMismatch, TransactionIdMismatch, MessageBufferFull, transport timeout/failure | retried with backoff |
//! | Authentication | InvalidAuthenticationError                              | surfaced, re-pair |
//! | Permanent      | BadCargoLength, BadOpcode, InvalidRequiredParameter     | surfaced |
//! | Unknown        | everything else                                         | surfaced |
//!
//! The [`FaultObserver`] sees each fault exactly once, before any backoff.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod transport;

// Orchestration
pub mod client;
pub mod fault;

// Pump side
pub mod simulator;

// Testing utilities
pub mod test_utils;

pub use client::{ClientStats, PumpClient, ReceivedMessage};
pub use config::{
    AuthConfig, CommConfig, CommConfigBuilder, LinkConfig, RetryConfig, SimulatorConfig,
};
pub use error::{PumpCommError, Result};
pub use fault::{
    classify, DefaultRetryPolicy, FaultCategory, FaultObserver, FaultRecorder, FnRetryPolicy,
    NoRetryPolicy, PumpFaultCode, PumpFaultEvent, RetryDecision, RetryPolicy,
};
pub use simulator::PumpSimulator;
pub use transport::{ConnectionState, PumpTransport, SimulatedTransport};
