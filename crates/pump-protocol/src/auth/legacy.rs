//! Legacy challenge/response pairing (16-character codes)
//!
//! ```text
//! central                                   pump
//!   CentralChallengeRequest(challenge)  ->
//!                                       <-  CentralChallengeResponse(HMAC(code, challenge), hmac_key)
//!   PumpChallengeRequest(HMAC(code, hmac_key)) ->
//!                                       <-  PumpChallengeResponse(success)
//! ```
//!
//! Both sides then sign with the pairing code itself.

use rand::RngCore;
use tracing::{debug, info, warn};

use super::Transition;
use crate::error::AuthError;
use crate::message::{
    CentralChallengeRequest, CentralChallengeResponse, Message, PumpChallengeRequest,
    PumpChallengeResponse,
};
use crate::session::SessionSecret;
use crate::signing::{hmac_sha1, verify_hmac_sha1};

/// Legacy handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyState {
    /// Nothing sent yet
    Initial,
    /// Central challenge sent (or, on the pump, answered)
    CentralChallengeSent,
    /// Pump challenge sent (or, on the pump, answered)
    PumpChallengeSent,
    /// Pairing accepted
    Authenticated,
    /// Pairing failed
    Rejected,
}

impl LegacyState {
    /// State name for errors and logs
    pub fn name(self) -> &'static str {
        match self {
            LegacyState::Initial => "Initial",
            LegacyState::CentralChallengeSent => "CentralChallengeSent",
            LegacyState::PumpChallengeSent => "PumpChallengeSent",
            LegacyState::Authenticated => "Authenticated",
            LegacyState::Rejected => "Rejected",
        }
    }

    /// Whether the handshake is over
    pub fn is_terminal(self) -> bool {
        matches!(self, LegacyState::Authenticated | LegacyState::Rejected)
    }
}

fn hash(code: &[u8], data: &[u8]) -> Result<[u8; 20], AuthError> {
    hmac_sha1(code, data).map_err(|e| AuthError::Crypto(e.to_string()))
}

/// Central side of the legacy handshake
#[derive(Debug)]
pub struct LegacyHandshake {
    code: SessionSecret,
    app_instance_id: u16,
    central_challenge: [u8; 8],
    state: LegacyState,
}

impl LegacyHandshake {
    /// Start a handshake for a normalized 16-character code
    pub fn new(code: &str, app_instance_id: u16) -> Self {
        Self {
            code: SessionSecret::new(code.as_bytes()),
            app_instance_id,
            central_challenge: [0u8; 8],
            state: LegacyState::Initial,
        }
    }

    /// Current state
    pub fn state(&self) -> LegacyState {
        self.state
    }

    /// Feed the pump's last message (`None` to start)
    pub fn advance(&mut self, incoming: Option<&Message>) -> Result<Transition<LegacyState>, AuthError> {
        let result = self.step(incoming);
        if let Err(err) = &result {
            if *err != AuthError::HandshakeNotInitialized && !self.state.is_terminal() {
                self.state = LegacyState::Rejected;
            }
        }
        result
    }

    fn step(&mut self, incoming: Option<&Message>) -> Result<Transition<LegacyState>, AuthError> {
        match (self.state, incoming) {
            (state, _) if state.is_terminal() => Err(AuthError::HandshakeTerminated(state.name())),

            (LegacyState::Initial, None) => {
                rand::thread_rng().fill_bytes(&mut self.central_challenge);
                self.state = LegacyState::CentralChallengeSent;
                debug!("Legacy pairing: sending central challenge");
                Ok(Transition::send(
                    CentralChallengeRequest {
                        app_instance_id: self.app_instance_id,
                        central_challenge: self.central_challenge,
                    },
                    self.state,
                ))
            }
            (LegacyState::Initial, Some(_)) => Err(AuthError::HandshakeNotInitialized),

            (LegacyState::CentralChallengeSent, Some(Message::CentralChallengeResponse(response))) => {
                self.check_app_instance(response.app_instance_id)?;
                let code = self.code.as_bytes();
                if !verify_hmac_sha1(code, &self.central_challenge, &response.central_challenge_hash) {
                    warn!("Legacy pairing: pump challenge hash does not match pairing code");
                    return Err(AuthError::ChallengeHashMismatch);
                }

                let pump_challenge_hash = hash(code, &response.hmac_key)?;
                self.state = LegacyState::PumpChallengeSent;
                Ok(Transition::send(
                    PumpChallengeRequest {
                        app_instance_id: self.app_instance_id,
                        pump_challenge_hash,
                    },
                    self.state,
                ))
            }

            (LegacyState::PumpChallengeSent, Some(Message::PumpChallengeResponse(response))) => {
                self.check_app_instance(response.app_instance_id)?;
                if !response.success {
                    warn!("Legacy pairing rejected by pump");
                    return Err(AuthError::Rejected);
                }
                self.state = LegacyState::Authenticated;
                info!("Legacy pairing complete");
                Ok(Transition::done(self.state))
            }

            (state, incoming) => Err(AuthError::UnknownAuthMessage {
                got: incoming.map(Message::name).unwrap_or("none"),
                state: state.name(),
            }),
        }
    }

    fn check_app_instance(&self, got: u16) -> Result<(), AuthError> {
        if got != self.app_instance_id {
            return Err(AuthError::AppInstanceMismatch {
                expected: self.app_instance_id,
                got,
            });
        }
        Ok(())
    }

    /// Signing key, available once authenticated
    pub fn signing_key(&self) -> Option<SessionSecret> {
        (self.state == LegacyState::Authenticated).then(|| self.code.clone())
    }
}

/// Pump side of the legacy handshake
#[derive(Debug)]
pub struct LegacyResponder {
    code: SessionSecret,
    hmac_key: [u8; 8],
    state: LegacyState,
}

impl LegacyResponder {
    /// Responder for a normalized 16-character code
    pub fn new(code: &str) -> Self {
        Self {
            code: SessionSecret::new(code.as_bytes()),
            hmac_key: [0u8; 8],
            state: LegacyState::Initial,
        }
    }

    /// Current state
    pub fn state(&self) -> LegacyState {
        self.state
    }

    /// Answer one central request
    ///
    /// A wrong pump challenge still produces a reply (`success = false`).
    pub fn advance(&mut self, incoming: &Message) -> Result<Transition<LegacyState>, AuthError> {
        match incoming {
            // A new central challenge restarts pairing from any state
            Message::CentralChallengeRequest(request) => {
                rand::thread_rng().fill_bytes(&mut self.hmac_key);
                let central_challenge_hash = hash(self.code.as_bytes(), &request.central_challenge)?;
                self.state = LegacyState::CentralChallengeSent;
                Ok(Transition::send(
                    CentralChallengeResponse {
                        app_instance_id: request.app_instance_id,
                        central_challenge_hash,
                        hmac_key: self.hmac_key,
                    },
                    self.state,
                ))
            }

            Message::PumpChallengeRequest(request) if self.state == LegacyState::CentralChallengeSent => {
                let success = verify_hmac_sha1(
                    self.code.as_bytes(),
                    &self.hmac_key,
                    &request.pump_challenge_hash,
                );
                self.state = if success {
                    LegacyState::Authenticated
                } else {
                    LegacyState::Rejected
                };
                debug!("Legacy pairing answered: success={}", success);
                Ok(Transition::send(
                    PumpChallengeResponse {
                        app_instance_id: request.app_instance_id,
                        success,
                    },
                    self.state,
                ))
            }

            other => Err(AuthError::UnknownAuthMessage {
                got: other.name(),
                state: self.state.name(),
            }),
        }
    }

    /// Signing key, available once the central proved the code
    pub fn signing_key(&self) -> Option<SessionSecret> {
        (self.state == LegacyState::Authenticated).then(|| self.code.clone())
    }
}
