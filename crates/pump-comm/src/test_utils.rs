//! Test utilities
//!
//! [`MockTransport`] records every write and answers from a script instead
//! of a simulated pump. Scripted replies are framed with the transaction id
//! of the request they answer, so tests only state *what* the pump says.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pump_comm::test_utils::MockTransport;
//! use pump_comm::{CommConfig, PumpClient};
//! use pump_protocol::{ApiVersionRequest, ApiVersionResponse, Message};
//!
//! # tokio_test_runtime();
//! # fn tokio_test_runtime() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let transport = Arc::new(MockTransport::new());
//! transport.script_response(ApiVersionResponse { major: 1, minor: 0 });
//!
//! let client = PumpClient::new(transport.clone(), CommConfig::default());
//! let response = client.send_message(ApiVersionRequest).await.unwrap();
//! assert_eq!(response, Message::from(ApiVersionResponse { major: 1, minor: 0 }));
//! assert_eq!(transport.write_count(), 1);
//! # });
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pump_protocol::{
    packetize, Characteristic, Message, MessageKind, Packet, PacketAssembler, SigningParams,
};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{PumpCommError, Result};
use crate::transport::PumpTransport;

/// What the mock pump does with the next complete request
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Answer with this message
    Message(Message),
    /// Say nothing, so the client times out
    Silence,
}

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<(Characteristic, Bytes)>,
    requests: Vec<(MessageKind, u8)>,
    notifications: HashMap<Characteristic, VecDeque<Bytes>>,
    script: VecDeque<ScriptedReply>,
    assembler: PacketAssembler,
    signing_key: Option<Vec<u8>>,
    failed_writes: usize,
}

/// Mock transport for testing without a simulator
///
/// Unscripted requests get no reply.
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    notify: Notify,
    connected: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a connected mock transport
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            notify: Notify::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Answer the next request with `message`
    pub fn script_response(&self, message: impl Into<Message>) {
        self.state
            .lock()
            .script
            .push_back(ScriptedReply::Message(message.into()));
    }

    /// Let the next request go unanswered
    pub fn script_silence(&self) {
        self.state.lock().script.push_back(ScriptedReply::Silence);
    }

    /// Key used to sign scripted replies that must be signed
    pub fn set_signing_key(&self, key: impl Into<Vec<u8>>) {
        self.state.lock().signing_key = Some(key.into());
    }

    /// Queue a raw notification
    pub fn queue_notification(&self, characteristic: Characteristic, data: impl Into<Bytes>) {
        self.state
            .lock()
            .notifications
            .entry(characteristic)
            .or_default()
            .push_back(data.into());
        self.notify.notify_waiters();
    }

    /// Queue `message` framed under `tx_id`, unprompted
    pub fn queue_message(&self, characteristic: Characteristic, tx_id: u8, message: impl Into<Message>) {
        let message = message.into();
        let mut state = self.state.lock();
        let packets = frame(&message, tx_id, state.signing_key.as_deref());
        state
            .notifications
            .entry(characteristic)
            .or_default()
            .extend(packets.iter().map(Packet::to_bytes));
        drop(state);
        self.notify.notify_waiters();
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failed_writes = count;
    }

    /// Every packet written, in order
    pub fn writes(&self) -> Vec<(Characteristic, Bytes)> {
        self.state.lock().writes.clone()
    }

    /// Number of packets written
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Complete requests seen, with their transaction ids
    pub fn requests(&self) -> Vec<(MessageKind, u8)> {
        self.state.lock().requests.clone()
    }

    fn pop(&self, characteristic: Characteristic) -> Option<Bytes> {
        self.state
            .lock()
            .notifications
            .get_mut(&characteristic)
            .and_then(VecDeque::pop_front)
    }
}

fn frame(message: &Message, tx_id: u8, key: Option<&[u8]>) -> Vec<Packet> {
    let signing = key.map(|key| SigningParams::new(key, 0));
    match packetize(message, tx_id, signing) {
        Ok(packets) => packets,
        Err(err) => {
            warn!("Mock transport cannot frame {}: {}", message.name(), err);
            Vec::new()
        }
    }
}

#[async_trait]
impl PumpTransport for MockTransport {
    async fn write(&self, characteristic: Characteristic, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(PumpCommError::ConnectionClosed);
        }

        let mut state = self.state.lock();
        if state.failed_writes > 0 {
            state.failed_writes -= 1;
            return Err(PumpCommError::WriteFailed {
                characteristic,
                reason: "simulated write failure".into(),
            });
        }
        state.writes.push((characteristic, data.clone()));

        let packet = Packet::from_bytes(&data)?;
        let assembled = match state.assembler.push(characteristic, &packet, None) {
            Ok(Some(assembled)) => assembled,
            Ok(None) => return Ok(()),
            Err(err) => {
                debug!("Mock transport ignoring packet: {}", err);
                return Ok(());
            }
        };
        state.requests.push((assembled.descriptor.kind, assembled.tx_id));

        let reply = match state.script.pop_front() {
            Some(ScriptedReply::Message(reply)) => reply,
            Some(ScriptedReply::Silence) | None => return Ok(()),
        };
        let reply_on = if reply.descriptor().universal {
            characteristic
        } else {
            reply.descriptor().characteristic
        };
        let packets = frame(&reply, assembled.tx_id, state.signing_key.as_deref());
        state
            .notifications
            .entry(reply_on)
            .or_default()
            .extend(packets.iter().map(Packet::to_bytes));
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn read_or_wait_for_notification(
        &self,
        characteristic: Characteristic,
        timeout: Duration,
    ) -> Result<Option<Bytes>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so a notification in between is not lost
            let notified = self.notify.notified();
            if !self.is_connected() {
                return Err(PumpCommError::ConnectionClosed);
            }
            if let Some(data) = self.pop(characteristic) {
                return Ok(Some(data));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        self.state.lock().assembler.reset();
        self.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pump_protocol::{ApiVersionRequest, ApiVersionResponse, ErrorCode, ErrorResponse};

    async fn write_request(transport: &MockTransport, message: Message, tx_id: u8) {
        let characteristic = message.descriptor().characteristic;
        for packet in packetize(&message, tx_id, None).unwrap() {
            transport.write(characteristic, packet.to_bytes()).await.unwrap();
        }
    }

    async fn read_message(transport: &MockTransport, characteristic: Characteristic) -> Option<(u8, Message)> {
        let mut assembler = PacketAssembler::new();
        loop {
            let data = transport
                .read_or_wait_for_notification(characteristic, Duration::from_millis(20))
                .await
                .unwrap()?;
            let packet = Packet::from_bytes(&data).unwrap();
            if let Some(assembled) = assembler.push(characteristic, &packet, None).unwrap() {
                return Some((assembled.tx_id, assembled.decode()));
            }
        }
    }

    #[tokio::test]
    async fn test_scripted_reply_uses_request_tx_id() {
        let transport = MockTransport::new();
        transport.script_response(ApiVersionResponse { major: 1, minor: 0 });

        write_request(&transport, ApiVersionRequest.into(), 42).await;
        let (tx_id, reply) = read_message(&transport, Characteristic::CurrentStatus)
            .await
            .unwrap();
        assert_eq!(tx_id, 42);
        assert_eq!(reply, Message::from(ApiVersionResponse { major: 1, minor: 0 }));
        assert_eq!(transport.requests(), vec![(MessageKind::ApiVersionRequest, 42)]);
    }

    #[tokio::test]
    async fn test_error_response_on_request_characteristic() {
        let transport = MockTransport::new();
        transport.script_response(ErrorResponse {
            request_code_id: 32,
            error_code: ErrorCode::BadOpcode,
        });
        write_request(&transport, ApiVersionRequest.into(), 1).await;
        let (_, reply) = read_message(&transport, Characteristic::CurrentStatus)
            .await
            .unwrap();
        assert!(matches!(reply, Message::ErrorResponse(_)));
    }

    #[tokio::test]
    async fn test_silence_and_unscripted() {
        let transport = MockTransport::new();
        transport.script_silence();
        write_request(&transport, ApiVersionRequest.into(), 1).await;
        write_request(&transport, ApiVersionRequest.into(), 2).await;
        assert!(read_message(&transport, Characteristic::CurrentStatus).await.is_none());
        assert_eq!(transport.write_count(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_and_disconnect() {
        let transport = MockTransport::new();
        transport.fail_next_writes(1);
        assert!(matches!(
            transport.write(Characteristic::CurrentStatus, Bytes::from_static(&[0, 0])).await,
            Err(PumpCommError::WriteFailed { .. })
        ));

        transport.disconnect().await.unwrap();
        assert!(matches!(
            transport
                .read_or_wait_for_notification(Characteristic::CurrentStatus, Duration::from_millis(5))
                .await,
            Err(PumpCommError::ConnectionClosed)
        ));
    }
}
