//! Fault classification and retry policy
//!
//! Every rejected request becomes a [`PumpFaultEvent`]. The event is
//! classified, handed to the [`RetryPolicy`], reported once to the
//! [`FaultObserver`], and only then does any backoff delay start.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pump_protocol::{ErrorCode, MessageKind};
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// What went wrong with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpFaultCode {
    /// Pump answered with an `ErrorResponse`
    Pump(ErrorCode),
    /// No response within the response timeout
    TransportTimeout,
    /// Transport read or write failed
    TransportFailure,
}

impl fmt::Display for PumpFaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpFaultCode::Pump(code) => write!(f, "{code}"),
            PumpFaultCode::TransportTimeout => write!(f, "TransportTimeout"),
            PumpFaultCode::TransportFailure => write!(f, "TransportFailure"),
        }
    }
}

impl From<ErrorCode> for PumpFaultCode {
    fn from(code: ErrorCode) -> Self {
        PumpFaultCode::Pump(code)
    }
}

/// Fault taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    /// Likely to succeed if repeated
    Transient,
    /// Session key rejected; re-pair
    Authentication,
    /// Request is wrong and will keep failing
    Permanent,
    /// Anything else
    Unknown,
}

impl FaultCategory {
    /// Whether the default policy retries this category
    pub fn is_retryable(self) -> bool {
        self == FaultCategory::Transient
    }

    /// Whether this is an authentication fault
    pub fn is_authentication(self) -> bool {
        self == FaultCategory::Authentication
    }
}

/// Map a fault code to its category
pub fn classify(code: PumpFaultCode) -> FaultCategory {
    match code {
        PumpFaultCode::Pump(
            ErrorCode::CrcMismatch | ErrorCode::TransactionIdMismatch | ErrorCode::MessageBufferFull,
        )
        | PumpFaultCode::TransportTimeout
        | PumpFaultCode::TransportFailure => FaultCategory::Transient,
        PumpFaultCode::Pump(ErrorCode::InvalidAuthenticationError) => FaultCategory::Authentication,
        PumpFaultCode::Pump(
            ErrorCode::BadCargoLength | ErrorCode::BadOpcode | ErrorCode::InvalidRequiredParameter,
        ) => FaultCategory::Permanent,
        PumpFaultCode::Pump(ErrorCode::UndefinedError | ErrorCode::Other(_)) => FaultCategory::Unknown,
    }
}

/// One rejected request, as reported to the observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpFaultEvent {
    /// Request that was rejected
    pub request: MessageKind,
    /// Fault code
    pub code: PumpFaultCode,
    /// Category of `code`
    pub category: FaultCategory,
    /// Whether the request will be sent again
    pub will_retry: bool,
    /// 1-based attempt that failed
    pub attempt: u32,
}

/// Retry policy verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send again after `after`
    Retry {
        /// Backoff before the next attempt
        after: Duration,
    },
    /// Give up and surface the fault
    DoNotRetry,
}

impl RetryDecision {
    /// Whether the request will be retried
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Decides whether a faulted request is sent again
pub trait RetryPolicy: Send + Sync {
    /// Verdict for `code` after `attempt` (1-based) failed
    fn decide(&self, code: PumpFaultCode, attempt: u32) -> RetryDecision;
}

/// Retries transient faults with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryPolicy {
    config: RetryConfig,
}

impl DefaultRetryPolicy {
    /// Create a policy from retry settings
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let factor = self.config.backoff_multiplier.max(1.0).powi(exponent);
        // Saturate rather than overflow when the product leaves Duration's range
        Duration::try_from_secs_f64(self.config.initial_delay.as_secs_f64() * factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn decide(&self, code: PumpFaultCode, attempt: u32) -> RetryDecision {
        if !classify(code).is_retryable() || attempt >= self.config.max_attempts {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry {
            after: self.delay_for(attempt),
        }
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn decide(&self, _code: PumpFaultCode, _attempt: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

/// Retry policy backed by a closure
pub struct FnRetryPolicy<F>(F);

impl<F> FnRetryPolicy<F>
where
    F: Fn(PumpFaultCode, u32) -> RetryDecision + Send + Sync,
{
    /// Wrap `decide`
    pub fn new(decide: F) -> Self {
        Self(decide)
    }
}

impl<F> RetryPolicy for FnRetryPolicy<F>
where
    F: Fn(PumpFaultCode, u32) -> RetryDecision + Send + Sync,
{
    fn decide(&self, code: PumpFaultCode, attempt: u32) -> RetryDecision {
        (self.0)(code, attempt)
    }
}

impl<F> fmt::Debug for FnRetryPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRetryPolicy")
    }
}

/// Receives every fault, retried or not
pub trait FaultObserver: Send + Sync {
    /// Called once per fault, before any retry delay
    fn on_fault(&self, event: &PumpFaultEvent);
}

impl<F> FaultObserver for F
where
    F: Fn(&PumpFaultEvent) + Send + Sync,
{
    fn on_fault(&self, event: &PumpFaultEvent) {
        self(event)
    }
}

/// Observer that keeps every event, for tests and diagnostics
#[derive(Debug, Clone, Default)]
pub struct FaultRecorder {
    events: Arc<Mutex<Vec<PumpFaultEvent>>>,
}

impl FaultRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far
    pub fn events(&self) -> Vec<PumpFaultEvent> {
        self.events.lock().clone()
    }

    /// Number of events seen
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no fault was seen
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl FaultObserver for FaultRecorder {
    fn on_fault(&self, event: &PumpFaultEvent) {
        self.events.lock().push(event.clone());
    }
}
