//! JPAKE pairing (6-digit codes)
//!
//! Rounds 1a, 1b and 2 run EC-JPAKE; round 3 fetches the pump's nonce and
//! both sides derive the signing key from it; round 4 exchanges key
//! confirmations. A client holding the raw secret from an earlier pairing
//! skips straight to round 3.

use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::ecjpake::{EcJpake, Role, SECRET_LEN};
use super::kdf::{confirmation_hash, derive_auth_key, verify_confirmation, AUTH_KEY_LEN};
use super::Transition;
use crate::error::AuthError;
use crate::message::{
    Jpake1aRequest, Jpake1aResponse, Jpake1bRequest, Jpake1bResponse, Jpake2Request,
    Jpake2Response, Jpake3SessionKeyRequest, Jpake3SessionKeyResponse,
    Jpake4KeyConfirmationRequest, Jpake4KeyConfirmationResponse, Message,
};
use crate::session::SessionSecret;

/// JPAKE handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpakeState {
    /// Full pairing, nothing sent yet
    BootstrapInitial,
    /// Reconnection with a stored secret, nothing sent yet
    ConfirmInitial,
    /// Round 1a sent (or answered, on the pump)
    Round1aSent,
    /// Round 1b sent
    Round1bSent,
    /// Round 2 sent
    Round2Sent,
    /// Session key nonce requested
    Round3Sent,
    /// Key confirmation sent
    Round4Sent,
    /// Both sides hold the same key
    Confirmed,
    /// Terminal failure; pairing must restart
    Failed,
}

impl JpakeState {
    /// State name for errors and logs
    pub fn name(self) -> &'static str {
        match self {
            JpakeState::BootstrapInitial => "BootstrapInitial",
            JpakeState::ConfirmInitial => "ConfirmInitial",
            JpakeState::Round1aSent => "Round1aSent",
            JpakeState::Round1bSent => "Round1bSent",
            JpakeState::Round2Sent => "Round2Sent",
            JpakeState::Round3Sent => "Round3Sent",
            JpakeState::Round4Sent => "Round4Sent",
            JpakeState::Confirmed => "Confirmed",
            JpakeState::Failed => "Failed",
        }
    }

    /// Whether the handshake is over
    pub fn is_terminal(self) -> bool {
        matches!(self, JpakeState::Confirmed | JpakeState::Failed)
    }
}

/// Pick the starting state: reconnect with a stored secret, else pair
pub fn decide_initial_step(derived_secret: Option<&[u8]>) -> JpakeState {
    match derived_secret {
        Some(_) => JpakeState::ConfirmInitial,
        None => JpakeState::BootstrapInitial,
    }
}

fn stored_secret(secret: &[u8]) -> Result<Zeroizing<[u8; SECRET_LEN]>, AuthError> {
    let secret: [u8; SECRET_LEN] = secret.try_into().map_err(|_| {
        AuthError::KeyDerivation(format!(
            "stored secret must be {SECRET_LEN} bytes, got {}",
            secret.len()
        ))
    })?;
    Ok(Zeroizing::new(secret))
}

fn random_nonce() -> [u8; 8] {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Central side of the JPAKE handshake
#[derive(Debug)]
pub struct JpakeHandshake {
    app_instance_id: u16,
    state: JpakeState,
    jpake: EcJpake,
    raw_secret: Option<Zeroizing<[u8; SECRET_LEN]>>,
    auth_key: Option<Zeroizing<[u8; AUTH_KEY_LEN]>>,
    client_nonce: [u8; 8],
}

impl JpakeHandshake {
    /// Start a handshake for a 6-digit code
    ///
    /// With `derived_secret` from an earlier pairing the handshake starts in
    /// [`JpakeState::ConfirmInitial`].
    pub fn new(code: &str, app_instance_id: u16, derived_secret: Option<&[u8]>) -> Result<Self, AuthError> {
        let raw_secret = derived_secret.map(stored_secret).transpose()?;
        Ok(Self {
            app_instance_id,
            state: decide_initial_step(derived_secret),
            jpake: EcJpake::new(Role::Client, code.as_bytes()),
            raw_secret,
            auth_key: None,
            client_nonce: [0u8; 8],
        })
    }

    /// Current state
    pub fn state(&self) -> JpakeState {
        self.state
    }

    /// Feed the pump's last message (`None` to start)
    ///
    /// Any error moves the handshake to [`JpakeState::Failed`].
    pub fn advance(&mut self, incoming: Option<&Message>) -> Result<Transition<JpakeState>, AuthError> {
        let result = self.step(incoming);
        if let Err(err) = &result {
            if !self.state.is_terminal() && *err != AuthError::HandshakeNotInitialized {
                warn!("JPAKE pairing failed in {}: {}", self.state.name(), err);
                self.state = JpakeState::Failed;
                self.auth_key = None;
            }
        }
        result
    }

    fn step(&mut self, incoming: Option<&Message>) -> Result<Transition<JpakeState>, AuthError> {
        let app = self.app_instance_id;
        match (self.state, incoming) {
            (state, _) if state.is_terminal() => Err(AuthError::HandshakeTerminated(state.name())),

            (JpakeState::BootstrapInitial, None) => {
                debug!("JPAKE pairing: round 1a");
                self.state = JpakeState::Round1aSent;
                Ok(Transition::send(
                    Jpake1aRequest::new(app, &self.jpake.round_one_first()),
                    self.state,
                ))
            }
            (JpakeState::ConfirmInitial, None) => {
                debug!("JPAKE reconnect: skipping to session key");
                self.state = JpakeState::Round3Sent;
                Ok(Transition::send(
                    Jpake3SessionKeyRequest { challenge_param: 0 },
                    self.state,
                ))
            }
            (JpakeState::BootstrapInitial | JpakeState::ConfirmInitial, Some(_)) => {
                Err(AuthError::HandshakeNotInitialized)
            }

            (JpakeState::Round1aSent, Some(Message::Jpake1aResponse(response))) => {
                self.jpake.read_round_one_first(&response.payload)?;
                self.state = JpakeState::Round1bSent;
                Ok(Transition::send(
                    Jpake1bRequest::new(app, &self.jpake.round_one_second()),
                    self.state,
                ))
            }

            (JpakeState::Round1bSent, Some(Message::Jpake1bResponse(response))) => {
                self.jpake.read_round_one_second(&response.payload)?;
                let round_two = self.jpake.round_two()?;
                self.state = JpakeState::Round2Sent;
                Ok(Transition::send(Jpake2Request::new(app, &round_two), self.state))
            }

            (JpakeState::Round2Sent, Some(Message::Jpake2Response(response))) => {
                self.jpake.read_round_two(&response.payload)?;
                self.raw_secret = Some(Zeroizing::new(self.jpake.derive_secret()?));
                self.state = JpakeState::Round3Sent;
                Ok(Transition::send(
                    Jpake3SessionKeyRequest { challenge_param: 0 },
                    self.state,
                ))
            }

            (JpakeState::Round3Sent, Some(Message::Jpake3SessionKeyResponse(response))) => {
                let secret = self
                    .raw_secret
                    .as_ref()
                    .ok_or_else(|| AuthError::KeyDerivation("no shared secret".into()))?;
                let auth_key = derive_auth_key(&response.device_key_nonce, &secret[..])?;

                self.client_nonce = random_nonce();
                let hash_digest = confirmation_hash(&auth_key, &self.client_nonce)?;
                self.auth_key = Some(Zeroizing::new(auth_key));
                self.state = JpakeState::Round4Sent;
                Ok(Transition::send(
                    Jpake4KeyConfirmationRequest {
                        app_instance_id: app,
                        nonce: self.client_nonce,
                        reserved: [0u8; 8],
                        hash_digest,
                    },
                    self.state,
                ))
            }

            (JpakeState::Round4Sent, Some(Message::Jpake4KeyConfirmationResponse(response))) => {
                let auth_key = self
                    .auth_key
                    .as_ref()
                    .ok_or_else(|| AuthError::KeyDerivation("no auth key".into()))?;
                // A reflected request carries our own nonce and verifies trivially
                if response.nonce == self.client_nonce
                    || !verify_confirmation(&auth_key[..], &response.nonce, &response.hash_digest)
                {
                    return Err(AuthError::NotConfirmed);
                }
                self.state = JpakeState::Confirmed;
                info!("JPAKE pairing confirmed");
                Ok(Transition::done(self.state))
            }

            (state, incoming) => Err(AuthError::UnknownAuthMessage {
                got: incoming.map(Message::name).unwrap_or("none"),
                state: state.name(),
            }),
        }
    }

    /// Derived signing key, only once confirmed
    pub fn signing_key(&self) -> Option<SessionSecret> {
        match (self.state, &self.auth_key) {
            (JpakeState::Confirmed, Some(key)) => Some(SessionSecret::new(key.to_vec())),
            _ => None,
        }
    }

    /// Raw shared secret for the caller's secret store, only once confirmed
    pub fn derived_secret(&self) -> Option<[u8; SECRET_LEN]> {
        match (self.state, &self.raw_secret) {
            (JpakeState::Confirmed, Some(secret)) => Some(**secret),
            _ => None,
        }
    }
}

/// Pump side of the JPAKE handshake
#[derive(Debug)]
pub struct JpakeResponder {
    code: SessionSecret,
    state: JpakeState,
    jpake: EcJpake,
    raw_secret: Option<Zeroizing<[u8; SECRET_LEN]>>,
    auth_key: Option<Zeroizing<[u8; AUTH_KEY_LEN]>>,
}

impl JpakeResponder {
    /// Responder for a 6-digit code, optionally retaining an earlier secret
    pub fn new(code: &str, retained_secret: Option<[u8; SECRET_LEN]>) -> Self {
        let state = decide_initial_step(retained_secret.as_ref().map(|s| &s[..]));
        Self {
            code: SessionSecret::new(code.as_bytes()),
            state,
            jpake: EcJpake::new(Role::Server, code.as_bytes()),
            raw_secret: retained_secret.map(Zeroizing::new),
            auth_key: None,
        }
    }

    /// Current state
    pub fn state(&self) -> JpakeState {
        self.state
    }

    /// Answer one central request
    pub fn advance(&mut self, incoming: &Message) -> Result<Transition<JpakeState>, AuthError> {
        let result = self.step(incoming);
        if result.is_err() && !self.state.is_terminal() {
            self.state = JpakeState::Failed;
            self.auth_key = None;
        }
        result
    }

    fn step(&mut self, incoming: &Message) -> Result<Transition<JpakeState>, AuthError> {
        match (self.state, incoming) {
            // Round 1a restarts pairing from any state with fresh keys
            (_, Message::Jpake1aRequest(request)) => {
                self.jpake = EcJpake::new(Role::Server, self.code.as_bytes());
                self.raw_secret = None;
                self.auth_key = None;
                self.jpake.read_round_one_first(&request.payload)?;
                self.state = JpakeState::Round1aSent;
                Ok(Transition::send(
                    Jpake1aResponse::new(request.app_instance_id, &self.jpake.round_one_first()),
                    self.state,
                ))
            }

            (JpakeState::Round1aSent, Message::Jpake1bRequest(request)) => {
                self.jpake.read_round_one_second(&request.payload)?;
                self.state = JpakeState::Round1bSent;
                Ok(Transition::send(
                    Jpake1bResponse::new(request.app_instance_id, &self.jpake.round_one_second()),
                    self.state,
                ))
            }

            (JpakeState::Round1bSent, Message::Jpake2Request(request)) => {
                self.jpake.read_round_two(&request.payload)?;
                let round_two = self.jpake.round_two()?;
                self.raw_secret = Some(Zeroizing::new(self.jpake.derive_secret()?));
                self.state = JpakeState::Round2Sent;
                Ok(Transition::send(
                    Jpake2Response::new(request.app_instance_id, &round_two),
                    self.state,
                ))
            }

            (
                JpakeState::Round2Sent | JpakeState::ConfirmInitial | JpakeState::Confirmed,
                Message::Jpake3SessionKeyRequest(_),
            ) => {
                let secret = self
                    .raw_secret
                    .as_ref()
                    .ok_or_else(|| AuthError::KeyDerivation("no shared secret".into()))?;
                let nonce = random_nonce();
                let auth_key = derive_auth_key(&nonce, &secret[..])?;
                self.auth_key = Some(Zeroizing::new(auth_key));
                self.state = JpakeState::Round3Sent;
                Ok(Transition::send(
                    Jpake3SessionKeyResponse {
                        app_instance_id: 0,
                        device_key_nonce: nonce,
                        device_key_reserved: [0u8; 8],
                    },
                    self.state,
                ))
            }

            (JpakeState::Round3Sent, Message::Jpake4KeyConfirmationRequest(request)) => {
                let auth_key = self
                    .auth_key
                    .as_ref()
                    .ok_or_else(|| AuthError::KeyDerivation("no auth key".into()))?;
                if !verify_confirmation(&auth_key[..], &request.nonce, &request.hash_digest) {
                    return Err(AuthError::NotConfirmed);
                }

                let nonce = random_nonce();
                let hash_digest = confirmation_hash(&auth_key[..], &nonce)?;
                self.state = JpakeState::Confirmed;
                Ok(Transition::send(
                    Jpake4KeyConfirmationResponse {
                        app_instance_id: request.app_instance_id,
                        nonce,
                        reserved: [0u8; 8],
                        hash_digest,
                    },
                    self.state,
                ))
            }

            (state, other) => Err(AuthError::UnknownAuthMessage {
                got: other.name(),
                state: state.name(),
            }),
        }
    }

    /// Derived signing key, only once confirmed
    pub fn signing_key(&self) -> Option<SessionSecret> {
        match (self.state, &self.auth_key) {
            (JpakeState::Confirmed, Some(key)) => Some(SessionSecret::new(key.to_vec())),
            _ => None,
        }
    }

    /// Raw shared secret to retain for reconnection, only once confirmed
    pub fn derived_secret(&self) -> Option<[u8; SECRET_LEN]> {
        match (self.state, &self.raw_secret) {
            (JpakeState::Confirmed, Some(secret)) => Some(**secret),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        client: &mut JpakeHandshake,
        pump: &mut JpakeResponder,
    ) -> Result<(), AuthError> {
        let mut outgoing = client.advance(None)?.outgoing;
        while let Some(request) = outgoing {
            let reply = pump.advance(&request)?.outgoing.expect("pump reply");
            outgoing = client.advance(Some(&reply))?.outgoing;
        }
        Ok(())
    }

    #[test]
    fn test_decide_initial_step() {
        assert_eq!(decide_initial_step(None), JpakeState::BootstrapInitial);
        assert_eq!(decide_initial_step(Some(&[1, 2, 3])), JpakeState::ConfirmInitial);
    }

    #[test]
    fn test_full_pairing() {
        let mut client = JpakeHandshake::new("123456", 1, None).unwrap();
        let mut pump = JpakeResponder::new("123456", None);
        run(&mut client, &mut pump).unwrap();

        assert_eq!(client.state(), JpakeState::Confirmed);
        assert_eq!(pump.state(), JpakeState::Confirmed);

        let client_key = client.signing_key().unwrap();
        let pump_key = pump.signing_key().unwrap();
        assert_eq!(client_key.as_bytes(), pump_key.as_bytes());
        assert_eq!(client_key.len(), AUTH_KEY_LEN);

        // The signing key is derived, never the raw secret
        let raw = client.derived_secret().unwrap();
        assert_eq!(Some(raw), pump.derived_secret());
        assert_ne!(client_key.as_bytes(), &raw[..]);
    }

    #[test]
    fn test_fast_path_reconnect() {
        let mut client = JpakeHandshake::new("123456", 1, None).unwrap();
        let mut pump = JpakeResponder::new("123456", None);
        run(&mut client, &mut pump).unwrap();
        let stored = client.derived_secret().unwrap();
        let first_key = client.signing_key().unwrap();

        let mut client = JpakeHandshake::new("123456", 1, Some(&stored)).unwrap();
        assert_eq!(client.state(), JpakeState::ConfirmInitial);
        let first = client.advance(None).unwrap();
        assert_eq!(first.state, JpakeState::Round3Sent);
        assert!(matches!(first.outgoing, Some(Message::Jpake3SessionKeyRequest(_))));

        let mut pump = JpakeResponder::new("123456", Some(stored));
        let reply = pump.advance(first.outgoing.as_ref().unwrap()).unwrap().outgoing.unwrap();
        let next = client.advance(Some(&reply)).unwrap().outgoing.unwrap();
        let reply = pump.advance(&next).unwrap().outgoing.unwrap();
        client.advance(Some(&reply)).unwrap();

        assert_eq!(client.state(), JpakeState::Confirmed);
        // Fresh nonce, fresh key
        assert_ne!(client.signing_key().unwrap().as_bytes(), first_key.as_bytes());
        assert_eq!(
            client.signing_key().unwrap().as_bytes(),
            pump.signing_key().unwrap().as_bytes()
        );
    }

    #[test]
    fn test_wrong_code_fails_at_confirmation() {
        let mut client = JpakeHandshake::new("123456", 1, None).unwrap();
        let mut pump = JpakeResponder::new("000000", None);
        let err = run(&mut client, &mut pump).unwrap_err();
        assert_eq!(err, AuthError::NotConfirmed);
        assert_eq!(pump.state(), JpakeState::Failed);
        assert!(pump.signing_key().is_none());
        assert!(client.signing_key().is_none());
    }

    #[test]
    fn test_client_rejects_bad_confirmation() {
        let mut client = JpakeHandshake::new("123456", 1, Some(&[9u8; 32])).unwrap();
        client.advance(None).unwrap();
        client
            .advance(Some(&Message::from(Jpake3SessionKeyResponse {
                app_instance_id: 0,
                device_key_nonce: [1; 8],
                device_key_reserved: [0; 8],
            })))
            .unwrap();

        let err = client
            .advance(Some(&Message::from(Jpake4KeyConfirmationResponse::default())))
            .unwrap_err();
        assert_eq!(err, AuthError::NotConfirmed);
        assert_eq!(client.state(), JpakeState::Failed);
        assert!(client.signing_key().is_none());
        assert!(client.derived_secret().is_none());

        // Terminal: no silent retry with the same keys
        assert_eq!(
            client.advance(None).unwrap_err(),
            AuthError::HandshakeTerminated("Failed")
        );
    }

    #[test]
    fn test_unexpected_message_fails() {
        let mut client = JpakeHandshake::new("123456", 1, None).unwrap();
        client.advance(None).unwrap();
        let err = client
            .advance(Some(&Message::from(Jpake2Response::default())))
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownAuthMessage { state: "Round1aSent", .. }));
        assert_eq!(client.state(), JpakeState::Failed);
    }

    #[test]
    fn test_client_rejects_reflected_confirmation() {
        let mut client = JpakeHandshake::new("123456", 1, Some(&[9u8; 32])).unwrap();
        client.advance(None).unwrap();
        let request = client
            .advance(Some(&Message::from(Jpake3SessionKeyResponse {
                app_instance_id: 0,
                device_key_nonce: [1; 8],
                device_key_reserved: [0; 8],
            })))
            .unwrap()
            .outgoing
            .unwrap();
        let Message::Jpake4KeyConfirmationRequest(request) = request else {
            panic!("expected round 4 request");
        };

        let echoed = Jpake4KeyConfirmationResponse {
            app_instance_id: request.app_instance_id,
            nonce: request.nonce,
            reserved: request.reserved,
            hash_digest: request.hash_digest,
        };
        let err = client.advance(Some(&Message::from(echoed))).unwrap_err();
        assert_eq!(err, AuthError::NotConfirmed);
        assert!(client.signing_key().is_none());
    }

    #[test]
    fn test_not_initialized() {
        let mut client = JpakeHandshake::new("123456", 1, None).unwrap();
        let err = client
            .advance(Some(&Message::from(Jpake1aResponse::default())))
            .unwrap_err();
        assert_eq!(err, AuthError::HandshakeNotInitialized);
        assert_eq!(client.state(), JpakeState::BootstrapInitial);
    }

    #[test]
    fn test_bad_stored_secret_length() {
        assert!(matches!(
            JpakeHandshake::new("123456", 1, Some(&[1, 2, 3])),
            Err(AuthError::KeyDerivation(_))
        ));
    }
}
