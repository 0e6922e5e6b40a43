//! Pairing handshakes
//!
//! Two schemes exist, chosen by the shape of the pairing code:
//!
//! - **Legacy**: 16 alphanumeric characters, HMAC-SHA1 challenge/response
//!   ([`legacy`]). The code itself becomes the signing key.
//! - **JPAKE**: 6 digits, EC-JPAKE over P-256 followed by HKDF key
//!   derivation and key confirmation ([`jpake`]).
//!
//! Both are explicit state machines. Each step consumes the peer's last
//! message and yields the next message to send plus the new state; nothing
//! here touches the transport.

use std::fmt;

use crate::error::AuthError;
use crate::message::Message;
use crate::session::SessionSecret;

pub mod ecjpake;
pub mod jpake;
pub mod kdf;
pub mod legacy;

pub use jpake::{decide_initial_step, JpakeHandshake, JpakeResponder, JpakeState};
pub use legacy::{LegacyHandshake, LegacyResponder, LegacyState};

/// Length of a legacy pairing code
pub const LEGACY_CODE_LEN: usize = 16;

/// Length of a JPAKE pairing code
pub const JPAKE_CODE_LEN: usize = 6;

/// Result of one handshake step
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    /// Message to send next, if any
    pub outgoing: Option<Message>,
    /// State after the step
    pub state: S,
}

impl<S> Transition<S> {
    /// Step that sends `message`
    pub fn send(message: impl Into<Message>, state: S) -> Self {
        Self {
            outgoing: Some(message.into()),
            state,
        }
    }

    /// Step with nothing left to send
    pub fn done(state: S) -> Self {
        Self {
            outgoing: None,
            state,
        }
    }
}

/// Pairing scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// 16-character challenge/response
    Legacy,
    /// 6-digit EC-JPAKE
    Jpake,
}

/// A normalized pairing code
#[derive(Clone, PartialEq, Eq)]
pub enum PairingCode {
    /// 16 alphanumeric characters
    Legacy(String),
    /// 6 digits
    Jpake(String),
}

impl PairingCode {
    /// Parse a user-entered code, ignoring dashes and whitespace
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        let code: String = input
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .collect();

        if code.len() == JPAKE_CODE_LEN && code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(PairingCode::Jpake(code));
        }
        if code.len() == LEGACY_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(PairingCode::Legacy(code));
        }
        Err(AuthError::InvalidPairingCode(format!(
            "expected {JPAKE_CODE_LEN} digits or {LEGACY_CODE_LEN} alphanumeric characters, got {} characters",
            code.chars().count()
        )))
    }

    /// Scheme this code selects
    pub fn scheme(&self) -> AuthScheme {
        match self {
            PairingCode::Legacy(_) => AuthScheme::Legacy,
            PairingCode::Jpake(_) => AuthScheme::Jpake,
        }
    }

    /// Normalized code
    pub fn as_str(&self) -> &str {
        match self {
            PairingCode::Legacy(code) | PairingCode::Jpake(code) => code,
        }
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingCode::{:?}(<redacted>)", self.scheme())
    }
}

impl std::str::FromStr for PairingCode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// What a completed handshake produced
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Scheme used
    pub scheme: AuthScheme,
    /// Key for signing messages
    pub signing_key: SessionSecret,
    /// Raw JPAKE secret, for a later reconnect without re-pairing
    pub derived_secret: Option<[u8; ecjpake::SECRET_LEN]>,
}

/// Central-side handshake for either scheme
#[derive(Debug)]
pub enum Handshake {
    /// Legacy challenge/response
    Legacy(LegacyHandshake),
    /// EC-JPAKE
    Jpake(JpakeHandshake),
}

impl Handshake {
    /// Handshake matching `code`
    ///
    /// `stored_secret` enables the JPAKE reconnect path and is ignored for
    /// legacy codes.
    pub fn for_code(
        code: &PairingCode,
        app_instance_id: u16,
        stored_secret: Option<&[u8]>,
    ) -> Result<Self, AuthError> {
        Ok(match code {
            PairingCode::Legacy(code) => {
                Handshake::Legacy(LegacyHandshake::new(code, app_instance_id))
            }
            PairingCode::Jpake(code) => {
                Handshake::Jpake(JpakeHandshake::new(code, app_instance_id, stored_secret)?)
            }
        })
    }

    /// Scheme in use
    pub fn scheme(&self) -> AuthScheme {
        match self {
            Handshake::Legacy(_) => AuthScheme::Legacy,
            Handshake::Jpake(_) => AuthScheme::Jpake,
        }
    }

    /// Feed the pump's last message (`None` to start), get the next request
    pub fn advance(&mut self, incoming: Option<&Message>) -> Result<Option<Message>, AuthError> {
        match self {
            Handshake::Legacy(h) => h.advance(incoming).map(|t| t.outgoing),
            Handshake::Jpake(h) => h.advance(incoming).map(|t| t.outgoing),
        }
    }

    /// Current state name
    pub fn state_name(&self) -> &'static str {
        match self {
            Handshake::Legacy(h) => h.state().name(),
            Handshake::Jpake(h) => h.state().name(),
        }
    }

    /// Whether the handshake succeeded
    pub fn is_complete(&self) -> bool {
        match self {
            Handshake::Legacy(h) => h.state() == LegacyState::Authenticated,
            Handshake::Jpake(h) => h.state() == JpakeState::Confirmed,
        }
    }

    /// Whether the handshake failed for good
    pub fn is_failed(&self) -> bool {
        match self {
            Handshake::Legacy(h) => h.state() == LegacyState::Rejected,
            Handshake::Jpake(h) => h.state() == JpakeState::Failed,
        }
    }

    /// Keys produced by a completed handshake
    pub fn outcome(&self) -> Result<AuthOutcome, AuthError> {
        let signing_key = match self {
            Handshake::Legacy(h) => h.signing_key(),
            Handshake::Jpake(h) => h.signing_key(),
        };
        let signing_key = signing_key.ok_or(AuthError::HandshakeTerminated(self.state_name()))?;
        let derived_secret = match self {
            Handshake::Legacy(_) => None,
            Handshake::Jpake(h) => h.derived_secret(),
        };
        Ok(AuthOutcome {
            scheme: self.scheme(),
            signing_key,
            derived_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairing_code() {
        assert_eq!(
            PairingCode::parse("123-456").unwrap(),
            PairingCode::Jpake("123456".into())
        );
        assert_eq!(
            PairingCode::parse("abcd efgh ijkl mnop").unwrap(),
            PairingCode::Legacy("abcdefghijklmnop".into())
        );
        assert_eq!(PairingCode::parse("123456").unwrap().scheme(), AuthScheme::Jpake);

        assert!(matches!(
            PairingCode::parse("12345"),
            Err(AuthError::InvalidPairingCode(_))
        ));
        assert!(PairingCode::parse("12345a").is_err());
        assert!(PairingCode::parse("ABCDEFGHIJKLMNO!").is_err());
        assert!(PairingCode::parse("").is_err());
    }

    #[test]
    fn test_pairing_code_debug_redacted() {
        let code: PairingCode = "987654".parse().unwrap();
        let debug = format!("{code:?}");
        assert!(!debug.contains("987654"));
        assert!(debug.contains("Jpake"));
    }

    #[test]
    fn test_handshake_dispatch() {
        let code = PairingCode::parse("ABCDEFGHIJKLMNOP").unwrap();
        let mut handshake = Handshake::for_code(&code, 1, Some(&[0u8; 32])).unwrap();
        assert_eq!(handshake.scheme(), AuthScheme::Legacy);

        let first = handshake.advance(None).unwrap().unwrap();
        assert!(matches!(first, Message::CentralChallengeRequest(_)));
        assert!(!handshake.is_complete());
        assert!(handshake.outcome().is_err());

        let code = PairingCode::parse("123456").unwrap();
        let mut handshake = Handshake::for_code(&code, 1, None).unwrap();
        let first = handshake.advance(None).unwrap().unwrap();
        assert!(matches!(first, Message::Jpake1aRequest(_)));
        assert_eq!(handshake.state_name(), "Round1aSent");
    }

    #[test]
    fn test_jpake_outcome_carries_secret() {
        let code = PairingCode::parse("111222").unwrap();
        let mut handshake = Handshake::for_code(&code, 7, None).unwrap();
        let mut pump = JpakeResponder::new("111222", None);

        let mut outgoing = handshake.advance(None).unwrap();
        while let Some(request) = outgoing {
            let reply = pump.advance(&request).unwrap().outgoing.unwrap();
            outgoing = handshake.advance(Some(&reply)).unwrap();
        }

        assert!(handshake.is_complete());
        let outcome = handshake.outcome().unwrap();
        assert_eq!(outcome.scheme, AuthScheme::Jpake);
        assert_eq!(outcome.derived_secret, pump.derived_secret());
        assert_eq!(
            outcome.signing_key.as_bytes(),
            pump.signing_key().unwrap().as_bytes()
        );
    }
}
