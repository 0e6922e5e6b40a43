//! PumpClient - request/response orchestration over a transport
//!
//! The client owns one logical transaction pipeline per connection:
//!
//! - Outgoing: allocate a txId, frame (signing when the message requires
//!   it), write every packet
//! - Incoming: reassemble notifications, hand back the response whose txId
//!   matches, route everything else to subscribers
//! - Faults: `ErrorResponse`s and transport timeouts are classified, shown
//!   to the [`FaultObserver`], then retried or surfaced
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         PumpClient                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  send_message ──► send_lock ──► packetize ──► transport      │
//! │       ▲                                          │           │
//! │       │                                          ▼           │
//! │  RetryPolicy ◄── fault ◄── PacketAssembler ◄── notifications │
//! │  FaultObserver                    │                          │
//! │                                   └──► broadcast (other txId)│
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pump_comm::{CommConfigBuilder, PumpClient, PumpSimulator, SimulatedTransport, SimulatorConfig};
//! use pump_protocol::SuspendPumpingRequest;
//!
//! let simulator = PumpSimulator::new(SimulatorConfig::new("123456"))?;
//! let transport = Arc::new(SimulatedTransport::new(simulator));
//! let config = CommConfigBuilder::new().pairing_code("123456").build();
//!
//! let client = PumpClient::new(transport, config);
//! let outcome = client.authenticate(None).await?;
//! client.send_message(SuspendPumpingRequest).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use pump_protocol::{
    packetize, AuthError, AuthOutcome, Characteristic, Handshake, JpakeState, Message, MessageKind,
    Packet, PacketAssembler, PairingCode, ProtocolError, SessionContext, SessionSecret, SigningParams,
    TimeSinceResetRequest, TimeSinceResetResponse, Validation,
};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::CommConfig;
use crate::error::{PumpCommError, Result};
use crate::fault::{
    classify, DefaultRetryPolicy, FaultObserver, PumpFaultCode, PumpFaultEvent, RetryDecision,
    RetryPolicy,
};
use crate::transport::{ConnectionState, PumpTransport};

/// A complete message that was not the response to a pending request
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Characteristic it arrived on
    pub characteristic: Characteristic,
    /// Transaction id from the header
    pub tx_id: u8,
    /// Decoded message
    pub message: Message,
    /// Integrity check result
    pub validation: Validation,
}

/// Client statistics
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Requests handed to the transport, retries included
    pub requests_sent: u64,
    /// Packets written
    pub packets_written: u64,
    /// Responses matched to a request
    pub responses_received: u64,
    /// Complete messages routed to subscribers
    pub unsolicited_messages: u64,
    /// Faults seen (pump errors and timeouts)
    pub faults: u64,
    /// Faults followed by a retry
    pub retries: u64,
    /// Transactions dropped for framing or integrity errors
    pub dropped_transactions: u64,
}

/// Async client for one pump connection
pub struct PumpClient {
    transport: Arc<dyn PumpTransport>,
    config: CommConfig,
    session: SessionContext,
    assembler: Mutex<PacketAssembler>,
    send_lock: tokio::sync::Mutex<()>,
    retry_policy: Arc<dyn RetryPolicy>,
    observer: Option<Arc<dyn FaultObserver>>,
    events: broadcast::Sender<ReceivedMessage>,
    closed: watch::Sender<bool>,
    stats: Mutex<ClientStats>,
}

impl std::fmt::Debug for PumpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpClient")
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PumpClient {
    /// Create a client with the default retry policy from `config.retry`
    pub fn new(transport: Arc<dyn PumpTransport>, config: CommConfig) -> Self {
        let (events, _) = broadcast::channel(config.link.event_buffer.max(1));
        let (closed, _) = watch::channel(false);
        let assembler = PacketAssembler::new().with_timeout(config.link.reassembly_timeout);
        let retry_policy = Arc::new(DefaultRetryPolicy::new(config.retry.clone()));

        Self {
            transport,
            config,
            session: SessionContext::new(),
            assembler: Mutex::new(assembler),
            send_lock: tokio::sync::Mutex::new(()),
            retry_policy,
            observer: None,
            events,
            closed,
            stats: Mutex::new(ClientStats::default()),
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    /// Report every fault to `observer`
    pub fn with_observer(mut self, observer: impl FaultObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Client configuration
    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    /// Session state (signing key, txId counter, pump clock)
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        if *self.closed.borrow() || !self.transport.is_connected() {
            ConnectionState::Disconnected
        } else if self.session.is_authenticated() {
            ConnectionState::Authenticated
        } else {
            ConnectionState::Connected
        }
    }

    /// Snapshot of the client statistics
    pub fn stats(&self) -> ClientStats {
        self.stats.lock().clone()
    }

    /// Receive unsolicited messages
    pub fn subscribe(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.events.subscribe()
    }

    /// Unsolicited messages as a stream
    ///
    /// Messages missed because the subscriber lagged are skipped.
    pub fn notifications(&self) -> impl Stream<Item = ReceivedMessage> + Send + 'static {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Notification subscriber lagged, skipped {} messages", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Send a request and wait for its response
    ///
    /// Faults are retried according to the retry policy. Returns
    /// [`PumpCommError::PumpFault`] once the policy gives up.
    pub async fn send_message(&self, request: impl Into<Message>) -> Result<Message> {
        let request = request.into();
        let _guard = self.send_lock.lock().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let code = match self.transact(&request).await {
                Ok(Message::ErrorResponse(error)) => {
                    if error.request_code_id != request.op_code() {
                        warn!(
                            "ErrorResponse for opcode {} while waiting on {}",
                            error.request_code_id,
                            request.name()
                        );
                    }
                    PumpFaultCode::Pump(error.error_code)
                }
                Ok(response) => return Ok(response),
                Err(PumpCommError::Timeout { .. }) => PumpFaultCode::TransportTimeout,
                Err(PumpCommError::WriteFailed { .. } | PumpCommError::ReadFailed { .. }) => {
                    PumpFaultCode::TransportFailure
                }
                Err(err) => return Err(err),
            };

            let decision = self.retry_policy.decide(code, attempt);
            let event = PumpFaultEvent {
                request: request.kind(),
                code,
                category: classify(code),
                will_retry: decision.is_retry(),
                attempt,
            };
            warn!(
                "{} failed with {} ({:?}) on attempt {}{}",
                event.request,
                event.code,
                event.category,
                attempt,
                if event.will_retry { ", retrying" } else { "" }
            );

            {
                let mut stats = self.stats.lock();
                stats.faults += 1;
                if event.will_retry {
                    stats.retries += 1;
                }
            }
            if let Some(observer) = &self.observer {
                observer.on_fault(&event);
            }

            match decision {
                RetryDecision::Retry { after } => self.backoff(after).await?,
                RetryDecision::DoNotRetry => return Err(PumpCommError::PumpFault(event)),
            }
        }
    }

    /// Send a request and convert the response to `R`
    pub async fn request<R>(&self, request: impl Into<Message>) -> Result<R>
    where
        R: TryFrom<Message, Error = ProtocolError>,
    {
        let response = self.send_message(request).await?;
        Ok(R::try_from(response)?)
    }

    /// Pair with the pump using the configured pairing code
    ///
    /// `stored_secret` is the raw JPAKE secret from an earlier pairing; with
    /// it the handshake skips straight to key confirmation and falls back to
    /// full pairing if the pump no longer accepts it. On success the signing
    /// key is installed and the pump clock synced.
    pub async fn authenticate(&self, stored_secret: Option<&[u8]>) -> Result<AuthOutcome> {
        let code = self
            .config
            .auth
            .pairing_code
            .as_deref()
            .ok_or(PumpCommError::MissingPairingCode)?;
        let code = PairingCode::parse(code)?;

        let outcome = match self.run_handshake(&code, stored_secret).await {
            Err(err) if stored_secret.is_some() && err.is_authentication_failure() => {
                warn!("Stored pairing secret rejected ({}), pairing from scratch", err);
                self.run_handshake(&code, None).await?
            }
            result => result?,
        };

        self.sync_time().await?;
        info!(
            "Authenticated with {:?} pairing on {}",
            outcome.scheme,
            self.transport.name()
        );
        Ok(outcome)
    }

    /// Collect unsolicited messages on `characteristic`
    ///
    /// Reads until nothing arrives for `timeout`. Every message is also
    /// routed to subscribers.
    pub async fn poll_notifications(
        &self,
        characteristic: Characteristic,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let _guard = self.send_lock.lock().await;
        self.ensure_open()?;

        let mut closed = self.closed.subscribe();
        let mut received = Vec::new();
        loop {
            let data = tokio::select! {
                read = self.transport.read_or_wait_for_notification(characteristic, timeout) => read?,
                _ = wait_closed(&mut closed) => return Err(PumpCommError::ConnectionClosed),
            };
            let Some(data) = data else { break };
            if let Some(message) = self.ingest(characteristic, &data) {
                self.route(message.clone());
                received.push(message);
            }
        }

        debug!(
            "Polled {} messages from {}",
            received.len(),
            characteristic
        );
        Ok(received)
    }

    /// Close the connection
    ///
    /// Pending sends resolve with [`PumpCommError::ConnectionClosed`].
    pub async fn disconnect(&self) -> Result<()> {
        self.closed.send_replace(true);
        self.assembler.lock().reset();
        self.session.clear();
        info!("Disconnecting from {}", self.transport.name());
        self.transport.disconnect().await
    }

    async fn run_handshake(
        &self,
        code: &PairingCode,
        stored_secret: Option<&[u8]>,
    ) -> Result<AuthOutcome> {
        self.session.clear();
        let mut handshake =
            Handshake::for_code(code, self.config.auth.app_instance_id, stored_secret)?;
        debug!("Starting {:?} handshake", handshake.scheme());

        let mut outgoing = handshake.advance(None)?;
        while let Some(request) = outgoing {
            let response = match self.send_message(request).await {
                Ok(response) => response,
                Err(PumpCommError::PumpFault(event)) if event.category.is_authentication() => {
                    debug!("Pump rejected {} in {}", event.request, handshake.state_name());
                    return Err(rejection(&handshake).into());
                }
                Err(err) => return Err(err),
            };
            outgoing = handshake.advance(Some(&response))?;
        }

        let outcome = handshake.outcome()?;
        self.session.install_secret(outcome.signing_key.clone());
        Ok(outcome)
    }

    async fn sync_time(&self) -> Result<()> {
        let response: TimeSinceResetResponse = self.request(TimeSinceResetRequest).await?;
        self.session
            .set_time_since_reset(response.pump_time_since_reset);
        debug!("Pump time since reset: {}s", response.pump_time_since_reset);
        Ok(())
    }

    /// One attempt: write the request, wait for the matching response
    async fn transact(&self, request: &Message) -> Result<Message> {
        self.ensure_open()?;

        let descriptor = request.descriptor();
        let characteristic = descriptor.characteristic;
        let tx_id = {
            let assembler = self.assembler.lock();
            self.session
                .next_free_tx_id(|id| assembler.in_flight(characteristic) == Some(id))
        };

        let key = self.session.signing_key();
        let signing = match (descriptor.signed, key.as_deref()) {
            (true, None) => return Err(PumpCommError::NotAuthenticated(descriptor.name)),
            (true, Some(key)) => Some(SigningParams::new(
                key.as_bytes(),
                self.session.time_since_reset(),
            )),
            (false, _) => None,
        };
        let packets = packetize(request, tx_id, signing)?;

        trace!(
            "Sending {} (txId {}) as {} packets on {}",
            descriptor.name,
            tx_id,
            packets.len(),
            characteristic
        );
        for packet in &packets {
            self.transport.write(characteristic, packet.to_bytes()).await?;
        }
        {
            let mut stats = self.stats.lock();
            stats.requests_sent += 1;
            stats.packets_written += packets.len() as u64;
        }

        let response = self.await_response(characteristic, tx_id, descriptor.name).await?;
        self.stats.lock().responses_received += 1;

        let got = response.kind();
        match descriptor.response {
            Some(expected) if got != expected && got != MessageKind::ErrorResponse => {
                Err(PumpCommError::UnexpectedResponse {
                    request: request.kind(),
                    got,
                })
            }
            _ => Ok(response),
        }
    }

    async fn await_response(
        &self,
        characteristic: Characteristic,
        tx_id: u8,
        waiting_for: &'static str,
    ) -> Result<Message> {
        let timeout = self.config.link.response_timeout;
        let deadline = Instant::now() + timeout;
        let mut closed = self.closed.subscribe();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PumpCommError::timeout(waiting_for, timeout));
            }

            let data = tokio::select! {
                read = self.transport.read_or_wait_for_notification(characteristic, remaining) => read?,
                _ = wait_closed(&mut closed) => return Err(PumpCommError::ConnectionClosed),
            };
            let Some(data) = data else { continue };
            let Some(received) = self.ingest(characteristic, &data) else {
                continue;
            };

            if received.tx_id == tx_id {
                return Ok(received.message);
            }
            self.route(received);
        }
    }

    /// Feed one notification to the assembler
    fn ingest(&self, characteristic: Characteristic, data: &[u8]) -> Option<ReceivedMessage> {
        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("Dropping packet on {}: {}", characteristic, err);
                self.stats.lock().dropped_transactions += 1;
                return None;
            }
        };

        let key = self.session.signing_key();
        let pushed = self.assembler.lock().push(
            characteristic,
            &packet,
            key.as_deref().map(SessionSecret::as_bytes),
        );
        let assembled = match pushed {
            Ok(Some(assembled)) => assembled,
            Ok(None) => return None,
            Err(err) => {
                warn!("Dropping transaction on {}: {}", characteristic, err);
                self.stats.lock().dropped_transactions += 1;
                return None;
            }
        };

        match assembled.validation {
            Validation::Valid => {}
            Validation::Unverified if !self.session.is_authenticated() => {
                debug!(
                    "Accepting signed {} without a session key",
                    assembled.descriptor.name
                );
            }
            other => {
                warn!(
                    "Dropping {} (txId {}): {:?}",
                    assembled.descriptor.name, assembled.tx_id, other
                );
                self.stats.lock().dropped_transactions += 1;
                return None;
            }
        }

        Some(ReceivedMessage {
            characteristic,
            tx_id: assembled.tx_id,
            message: assembled.decode(),
            validation: assembled.validation,
        })
    }

    fn route(&self, message: ReceivedMessage) {
        trace!(
            "Unsolicited {} (txId {}) on {}",
            message.message.name(),
            message.tx_id,
            message.characteristic
        );
        self.stats.lock().unsolicited_messages += 1;
        if self.events.send(message).is_err() {
            trace!("No subscribers for unsolicited message");
        }
    }

    async fn backoff(&self, after: Duration) -> Result<()> {
        if after.is_zero() {
            return self.ensure_open();
        }
        let mut closed = self.closed.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(after) => Ok(()),
            _ = wait_closed(&mut closed) => Err(PumpCommError::ConnectionClosed),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.borrow() || !self.transport.is_connected() {
            return Err(PumpCommError::ConnectionClosed);
        }
        Ok(())
    }
}

/// Error for a handshake the pump refused
fn rejection(handshake: &Handshake) -> AuthError {
    match handshake {
        Handshake::Jpake(h) if h.state() == JpakeState::Round4Sent => AuthError::NotConfirmed,
        _ => AuthError::Rejected,
    }
}

/// Resolves once the client is marked closed
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommConfigBuilder;
    use crate::fault::{FaultRecorder, FnRetryPolicy, NoRetryPolicy};
    use crate::test_utils::MockTransport;
    use pump_protocol::{
        ApiVersionRequest, ApiVersionResponse, ErrorCode, ErrorResponse, SuspendPumpingRequest,
    };

    fn client(transport: &Arc<MockTransport>) -> PumpClient {
        let config = CommConfigBuilder::new()
            .response_timeout(Duration::from_millis(50))
            .retry_delays(Duration::ZERO, Duration::ZERO)
            .build();
        PumpClient::new(transport.clone(), config)
    }

    fn buffer_full() -> ErrorResponse {
        ErrorResponse {
            request_code_id: 32,
            error_code: ErrorCode::MessageBufferFull,
        }
    }

    #[tokio::test]
    async fn test_send_message_matches_response() {
        let transport = Arc::new(MockTransport::new());
        transport.script_response(ApiVersionResponse { major: 2, minor: 5 });
        let client = client(&transport);

        let response: ApiVersionResponse = client.request(ApiVersionRequest).await.unwrap();
        assert_eq!(response, ApiVersionResponse { major: 2, minor: 5 });
        assert_eq!(client.stats().responses_received, 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_transient_fault_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.script_response(buffer_full());
        transport.script_response(ApiVersionResponse { major: 1, minor: 0 });
        let recorder = FaultRecorder::new();
        let client = client(&transport).with_observer(recorder.clone());

        let response = client.send_message(ApiVersionRequest).await.unwrap();
        assert_eq!(response, Message::from(ApiVersionResponse { major: 1, minor: 0 }));
        assert_eq!(transport.write_count(), 2);

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].will_retry);
        assert_eq!(events[0].code, PumpFaultCode::Pump(ErrorCode::MessageBufferFull));

        // Each attempt gets a fresh txId
        let requests = transport.requests();
        assert_ne!(requests[0].1, requests[1].1);
    }

    #[tokio::test]
    async fn test_fault_surfaces_without_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.script_response(buffer_full());
        let client = client(&transport).with_retry_policy(NoRetryPolicy);

        let err = client.send_message(ApiVersionRequest).await.unwrap_err();
        match err {
            PumpCommError::PumpFault(event) => {
                assert_eq!(event.request, MessageKind::ApiVersionRequest);
                assert!(!event.will_retry);
                assert_eq!(event.attempt, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_fault() {
        let transport = Arc::new(MockTransport::new());
        transport.script_silence();
        transport.script_response(ApiVersionResponse { major: 1, minor: 0 });
        let recorder = FaultRecorder::new();
        let client = client(&transport)
            .with_retry_policy(FnRetryPolicy::new(|_, attempt| {
                if attempt < 2 {
                    RetryDecision::Retry { after: Duration::ZERO }
                } else {
                    RetryDecision::DoNotRetry
                }
            }))
            .with_observer(recorder.clone());

        client.send_message(ApiVersionRequest).await.unwrap();
        assert_eq!(recorder.events()[0].code, PumpFaultCode::TransportTimeout);
    }

    #[tokio::test]
    async fn test_unsolicited_routed_to_subscribers() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        let mut events = client.subscribe();

        // Stray message under another txId arrives before the response
        transport.queue_message(
            Characteristic::CurrentStatus,
            200,
            TimeSinceResetResponse {
                current_time: 1,
                pump_time_since_reset: 2,
            },
        );
        transport.script_response(ApiVersionResponse { major: 1, minor: 0 });

        client.send_message(ApiVersionRequest).await.unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.tx_id, 200);
        assert_eq!(event.message.kind(), MessageKind::TimeSinceResetResponse);
    }

    #[tokio::test]
    async fn test_signed_request_needs_session() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        assert!(matches!(
            client.send_message(SuspendPumpingRequest).await,
            Err(PumpCommError::NotAuthenticated("SuspendPumpingRequest"))
        ));
        assert_eq!(transport.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_response_kind() {
        let transport = Arc::new(MockTransport::new());
        transport.script_response(TimeSinceResetResponse {
            current_time: 1,
            pump_time_since_reset: 2,
        });
        let client = client(&transport);
        assert!(matches!(
            client.send_message(ApiVersionRequest).await,
            Err(PumpCommError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_pairing_code() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        assert!(matches!(
            client.authenticate(None).await,
            Err(PumpCommError::MissingPairingCode)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_closes_client() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.send_message(ApiVersionRequest).await,
            Err(PumpCommError::ConnectionClosed)
        ));
    }
}
