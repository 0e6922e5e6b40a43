//! Configuration types for pump communication
//!
//! This module provides configuration for the client link (timeouts and
//! buffering), the retry policy, pairing, and the peripheral simulator.

use pump_protocol::{ApiVersion, PairingCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PumpCommError, Result};

/// Default time to wait for a response
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default BLE payload size per write
pub const DEFAULT_MAX_PACKET_SIZE: usize = 20;

/// Default app instance id sent during pairing
pub const DEFAULT_APP_INSTANCE_ID: u16 = 1;

/// Main configuration for a pump client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommConfig {
    /// Link settings
    #[serde(default)]
    pub link: LinkConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pairing settings
    #[serde(default)]
    pub auth: AuthConfig,
}

impl CommConfig {
    /// Check values that would make the client unusable
    pub fn validate(&self) -> Result<()> {
        if self.link.response_timeout.is_zero() {
            return Err(PumpCommError::InvalidConfig(
                "link.response_timeout must be non-zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PumpCommError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(PumpCommError::InvalidConfig(
                "retry.backoff_multiplier must be finite and >= 1".into(),
            ));
        }
        if let Some(code) = &self.auth.pairing_code {
            PairingCode::parse(code)?;
        }
        Ok(())
    }
}

/// Link behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long to wait for a response before treating it as a fault
    #[serde(with = "humantime_serde", default = "default_response_timeout")]
    pub response_timeout: Duration,

    /// Capacity of the unsolicited message channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// BLE payload size per write (informational)
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// How long an incomplete incoming message is kept
    #[serde(with = "humantime_serde", default = "default_reassembly_timeout")]
    pub reassembly_timeout: Duration,
}

fn default_response_timeout() -> Duration {
    Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS)
}

fn default_event_buffer() -> usize {
    64
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_reassembly_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: default_response_timeout(),
            event_buffer: default_event_buffer(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            reassembly_timeout: default_reassembly_timeout(),
        }
    }
}

/// Retry behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound on the retry delay
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Factor applied to the delay after each retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Pairing configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Pairing code shown on the pump (16 characters or 6 digits)
    #[serde(default)]
    pub pairing_code: Option<String>,

    /// App instance id echoed by the pump
    #[serde(default = "default_app_instance_id")]
    pub app_instance_id: u16,
}

fn default_app_instance_id() -> u16 {
    DEFAULT_APP_INSTANCE_ID
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            pairing_code: None,
            app_instance_id: DEFAULT_APP_INSTANCE_ID,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("pairing_code", &self.pairing_code.as_ref().map(|_| "<redacted>"))
            .field("app_instance_id", &self.app_instance_id)
            .finish()
    }
}

/// Peripheral simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Pairing code the simulated pump expects
    pub pairing_code: String,

    /// API version reported
    #[serde(default = "default_api_version")]
    pub api_version: ApiVersion,

    /// Pump time since reset at startup, in seconds
    #[serde(default = "default_time_since_reset")]
    pub time_since_reset: u32,

    /// Battery percentage reported
    #[serde(default = "default_battery_percent")]
    pub battery_percent: u8,

    /// Number of history log entries available
    #[serde(default = "default_history_log_count")]
    pub history_log_count: u32,

    /// Raw JPAKE secret retained from an earlier pairing
    #[serde(default, skip_serializing)]
    pub retained_secret: Option<[u8; 32]>,
}

fn default_api_version() -> ApiVersion {
    ApiVersion::V3_2
}

fn default_time_since_reset() -> u32 {
    86_400
}

fn default_battery_percent() -> u8 {
    80
}

fn default_history_log_count() -> u32 {
    100
}

impl SimulatorConfig {
    /// Simulator expecting `pairing_code`
    pub fn new(pairing_code: impl Into<String>) -> Self {
        Self {
            pairing_code: pairing_code.into(),
            api_version: default_api_version(),
            time_since_reset: default_time_since_reset(),
            battery_percent: default_battery_percent(),
            history_log_count: default_history_log_count(),
            retained_secret: None,
        }
    }

    /// Keep a raw JPAKE secret for the reconnect path
    pub fn with_retained_secret(mut self, secret: [u8; 32]) -> Self {
        self.retained_secret = Some(secret);
        self
    }

    /// Set the reported API version
    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = version;
        self
    }
}

/// Builder for CommConfig
#[derive(Debug, Default)]
pub struct CommConfigBuilder {
    config: CommConfig,
}

impl CommConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pairing code
    pub fn pairing_code(mut self, code: impl Into<String>) -> Self {
        self.config.auth.pairing_code = Some(code.into());
        self
    }

    /// Set the app instance id
    pub fn app_instance_id(mut self, id: u16) -> Self {
        self.config.auth.app_instance_id = id;
        self
    }

    /// Set the response timeout
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.link.response_timeout = timeout;
        self
    }

    /// Set the unsolicited message channel capacity
    pub fn event_buffer(mut self, size: usize) -> Self {
        self.config.link.event_buffer = size.max(1);
        self
    }

    /// Set the attempts per request
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts.max(1);
        self
    }

    /// Set the retry backoff bounds
    pub fn retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.retry.initial_delay = initial;
        self.config.retry.max_delay = max;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CommConfig {
        self.config
    }
}

// Helper module for humantime serialization
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CommConfig::default();
        assert_eq!(config.link.response_timeout, Duration::from_secs(5));
        assert_eq!(config.link.event_buffer, 64);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.auth.app_instance_id, DEFAULT_APP_INSTANCE_ID);
        assert!(config.auth.pairing_code.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_builder() {
        let config = CommConfigBuilder::new()
            .pairing_code("123456")
            .app_instance_id(9)
            .response_timeout(Duration::from_millis(750))
            .max_attempts(0)
            .build();

        assert_eq!(config.auth.pairing_code.as_deref(), Some("123456"));
        assert_eq!(config.auth.app_instance_id, 9);
        assert_eq!(config.link.response_timeout, Duration::from_millis(750));
        assert_eq!(config.retry.max_attempts, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_code() {
        let config = CommConfigBuilder::new().pairing_code("12345").build();
        assert!(matches!(
            config.validate(),
            Err(PumpCommError::Authentication(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        for backoff_multiplier in [0.5, f64::NAN, f64::INFINITY] {
            let mut config = CommConfig::default();
            config.retry.backoff_multiplier = backoff_multiplier;
            assert!(matches!(
                config.validate(),
                Err(PumpCommError::InvalidConfig(_))
            ));
        }

        // Huge but finite is accepted; the policy caps it at max_delay
        let mut config = CommConfig::default();
        config.retry.backoff_multiplier = 1e300;
        config.validate().unwrap();
    }

    #[test]
    fn test_serde_humantime() {
        let json = r#"{
            "link": { "response_timeout": "1s 500ms" },
            "retry": { "initial_delay": "100ms", "max_attempts": 5 },
            "auth": { "pairing_code": "ABCD-EFGH-IJKL-MNOP" }
        }"#;
        let config: CommConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.link.response_timeout, Duration::from_millis(1500));
        assert_eq!(config.link.event_buffer, 64);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, Duration::from_secs(2));
        assert_eq!(config.retry.max_attempts, 5);
        config.validate().unwrap();

        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"1s 500ms\""));
        let back: CommConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.link.response_timeout, config.link.response_timeout);
    }

    #[test]
    fn test_auth_debug_redacts_code() {
        let config = CommConfigBuilder::new().pairing_code("654321").build();
        assert!(!format!("{:?}", config.auth).contains("654321"));
    }

    #[test]
    fn test_simulator_config_defaults() {
        let config: SimulatorConfig = serde_json::from_str(r#"{"pairing_code":"123456"}"#).unwrap();
        assert_eq!(config.api_version, ApiVersion::V3_2);
        assert!(config.retained_secret.is_none());
    }
}
