//! Peripheral-role pump simulator
//!
//! Plays the pump side of the protocol with the same framing, signing and
//! handshake code the client uses: packets are collected with a
//! [`PacketAssembler`], pairing runs the legacy or JPAKE responder, and
//! signed requests are checked against the pump's copy of the session key.
//!
//! Replies are returned as `(characteristic, packet)` pairs for the caller
//! to deliver as notifications.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use pump_protocol::message::Direction;
use pump_protocol::{
    packetize, ApiVersionResponse, AssembledMessage, AuthError, Characteristic,
    CurrentBatteryV1Response, CurrentBatteryV2Response, ErrorCode, ErrorResponse, FramingError,
    HandlerContext, HistoryLogRecord, HistoryLogRequest, HistoryLogResponse,
    HistoryLogStreamResponse, JpakeResponder, JpakeState, LegacyResponder, LegacyState, Message,
    MessageKind, Packet, PacketAssembler, PairingCode, ResumePumpingResponse, SessionContext,
    SessionSecret, SetTempRateRequest, SetTempRateResponse, SigningParams, SuspendPumpingResponse,
    TimeSinceResetResponse, Validation,
};
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::error::Result;

/// Records per history stream message
const RECORDS_PER_STREAM_MESSAGE: usize = 8;

/// Highest temp rate percentage accepted
const MAX_TEMP_RATE_PERCENT: u16 = 250;

/// Shortest temp rate accepted, in minutes
const MIN_TEMP_RATE_MINUTES: u32 = 15;

/// Pump-side pairing state
#[derive(Debug)]
enum Responder {
    Legacy(LegacyResponder),
    Jpake(JpakeResponder),
}

impl Responder {
    fn for_code(code: &PairingCode, retained_secret: Option<[u8; 32]>) -> Self {
        match code {
            PairingCode::Legacy(code) => Responder::Legacy(LegacyResponder::new(code)),
            PairingCode::Jpake(code) => Responder::Jpake(JpakeResponder::new(code, retained_secret)),
        }
    }

    fn advance(&mut self, request: &Message) -> std::result::Result<Option<Message>, AuthError> {
        match self {
            Responder::Legacy(r) => r.advance(request).map(|t| t.outgoing),
            Responder::Jpake(r) => r.advance(request).map(|t| t.outgoing),
        }
    }

    fn signing_key(&self) -> Option<SessionSecret> {
        match self {
            Responder::Legacy(r) => r.signing_key(),
            Responder::Jpake(r) => r.signing_key(),
        }
    }

    fn derived_secret(&self) -> Option<[u8; 32]> {
        match self {
            Responder::Legacy(_) => None,
            Responder::Jpake(r) => r.derived_secret(),
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            Responder::Legacy(r) => r.state() == LegacyState::Authenticated,
            Responder::Jpake(r) => r.state() == JpakeState::Confirmed,
        }
    }
}

/// In-process pump
#[derive(Debug)]
pub struct PumpSimulator {
    config: SimulatorConfig,
    code: PairingCode,
    assembler: PacketAssembler,
    session: SessionContext,
    responder: Responder,
    retained_secret: Option<[u8; 32]>,
    faults: HashMap<u8, (ErrorCode, u32)>,
    handled: Vec<MessageKind>,
    suspended: bool,
    next_temp_rate_id: u8,
    next_stream_id: u8,
}

impl PumpSimulator {
    /// Create a simulator from its configuration
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        let code = PairingCode::parse(&config.pairing_code)?;
        let retained_secret = config.retained_secret;
        let session = SessionContext::new();
        session.set_time_since_reset(config.time_since_reset);

        info!(
            "Simulated pump ready ({:?} pairing, API {})",
            code.scheme(),
            config.api_version
        );
        Ok(Self {
            responder: Responder::for_code(&code, retained_secret),
            code,
            config,
            assembler: PacketAssembler::new(),
            session,
            retained_secret,
            faults: HashMap::new(),
            handled: Vec::new(),
            suspended: false,
            next_temp_rate_id: 1,
            next_stream_id: 1,
        })
    }

    /// Answer the next `times` requests with `op_code` with `error`
    pub fn inject_fault(&mut self, op_code: u8, error: ErrorCode, times: u32) {
        if times == 0 {
            self.faults.remove(&op_code);
            return;
        }
        debug!("Injecting {} x{} for opcode {}", error, times, op_code);
        self.faults.insert(op_code, (error, times));
    }

    /// Requests handled so far, in order
    pub fn handled(&self) -> &[MessageKind] {
        &self.handled
    }

    /// Whether pairing completed on this connection
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Whether insulin delivery is suspended
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Raw JPAKE secret from the last completed pairing
    pub fn derived_secret(&self) -> Option<[u8; 32]> {
        self.responder.derived_secret().or(self.retained_secret)
    }

    /// Forget the connection: in-flight packets, session key, pairing progress
    ///
    /// A completed JPAKE secret is kept so the next connection can use the
    /// reconnect path.
    pub fn on_disconnect(&mut self) {
        if let Some(secret) = self.responder.derived_secret() {
            self.retained_secret = Some(secret);
        }
        self.assembler.reset();
        self.session.clear();
        self.session.set_time_since_reset(self.config.time_since_reset);
        self.responder = Responder::for_code(&self.code, self.retained_secret);
    }

    /// Feed one packet written by the central
    pub fn handle_packet(&mut self, characteristic: Characteristic, data: &[u8]) -> Vec<(Characteristic, Bytes)> {
        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("Simulator dropping packet on {}: {}", characteristic, err);
                return Vec::new();
            }
        };

        let key = self.session.signing_key();
        let pushed = self
            .assembler
            .push(characteristic, &packet, key.as_deref().map(SessionSecret::as_bytes));
        match pushed {
            Ok(Some(assembled)) => self.respond(assembled),
            Ok(None) => Vec::new(),
            Err(FramingError::UnknownOpcode { op_code, .. }) => {
                self.reply_error(characteristic, packet.tx_id, op_code, ErrorCode::BadOpcode)
            }
            Err(err) => {
                warn!("Simulator dropping transaction on {}: {}", characteristic, err);
                Vec::new()
            }
        }
    }

    fn respond(&mut self, assembled: AssembledMessage) -> Vec<(Characteristic, Bytes)> {
        let AssembledMessage {
            characteristic,
            op_code,
            tx_id,
            descriptor,
            ..
        } = assembled;

        match assembled.validation {
            Validation::Valid => {}
            Validation::CrcMismatch { .. } => {
                return self.reply_error(characteristic, tx_id, op_code, ErrorCode::CrcMismatch)
            }
            Validation::HmacMismatch | Validation::Unverified => {
                warn!("Simulator rejecting {}: bad or missing signature", descriptor.name);
                return self.reply_error(
                    characteristic,
                    tx_id,
                    op_code,
                    ErrorCode::InvalidAuthenticationError,
                );
            }
        }

        if descriptor.direction != Direction::Request {
            warn!("Simulator ignoring {} from central", descriptor.name);
            return Vec::new();
        }
        if descriptor.min_api > self.config.api_version {
            return self.reply_error(characteristic, tx_id, op_code, ErrorCode::BadOpcode);
        }
        if !descriptor.is_variable() && assembled.cargo.len() != descriptor.size as usize {
            return self.reply_error(characteristic, tx_id, op_code, ErrorCode::BadCargoLength);
        }
        if let Some(error) = self.take_fault(op_code) {
            debug!("Simulator injecting {} for {}", error, descriptor.name);
            return self.reply_error(characteristic, tx_id, op_code, error);
        }

        let request = assembled.decode();
        self.handled.push(request.kind());
        let ctx = self.session.handler_context(tx_id, characteristic);

        match self.handle_request(&ctx, request) {
            Ok(replies) => replies
                .into_iter()
                .flat_map(|(reply_on, reply)| self.encode(reply_on, tx_id, &reply))
                .collect(),
            Err(error) => self.reply_error(characteristic, tx_id, op_code, error),
        }
    }

    fn take_fault(&mut self, op_code: u8) -> Option<ErrorCode> {
        let (error, remaining) = self.faults.get_mut(&op_code)?;
        let error = *error;
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.faults.remove(&op_code);
        }
        Some(error)
    }

    fn handle_request(
        &mut self,
        ctx: &HandlerContext,
        request: Message,
    ) -> std::result::Result<Vec<(Characteristic, Message)>, ErrorCode> {
        let reply: Message = match request {
            Message::CentralChallengeRequest(_)
            | Message::PumpChallengeRequest(_)
            | Message::Jpake1aRequest(_)
            | Message::Jpake1bRequest(_)
            | Message::Jpake2Request(_)
            | Message::Jpake3SessionKeyRequest(_)
            | Message::Jpake4KeyConfirmationRequest(_) => return self.handle_auth(&request),

            Message::ApiVersionRequest(_) => ApiVersionResponse {
                major: self.config.api_version.major,
                minor: self.config.api_version.minor,
            }
            .into(),

            Message::CurrentBatteryV1Request(_) => CurrentBatteryV1Response {
                current_battery_abc: self.config.battery_percent,
                current_battery_ibc: self.config.battery_percent,
            }
            .into(),

            Message::CurrentBatteryV2Request(_) => CurrentBatteryV2Response {
                current_battery_abc: self.config.battery_percent,
                current_battery_ibc: self.config.battery_percent,
                ..Default::default()
            }
            .into(),

            Message::TimeSinceResetRequest(_) => TimeSinceResetResponse {
                current_time: unix_time(),
                pump_time_since_reset: ctx.time_since_reset,
            }
            .into(),

            Message::HistoryLogRequest(request) => return self.handle_history(&request),

            Message::SuspendPumpingRequest(_) => {
                self.suspended = true;
                info!("Simulated pump suspended");
                SuspendPumpingResponse { status: 0 }.into()
            }

            Message::ResumePumpingRequest(_) => {
                self.suspended = false;
                info!("Simulated pump resumed");
                ResumePumpingResponse { status: 0 }.into()
            }

            Message::SetTempRateRequest(request) => self.handle_temp_rate(&request)?.into(),

            other => {
                warn!("Simulator has no handler for {}", other.name());
                return Err(ErrorCode::BadOpcode);
            }
        };

        Ok(vec![(reply.descriptor().characteristic, reply)])
    }

    fn handle_auth(
        &mut self,
        request: &Message,
    ) -> std::result::Result<Vec<(Characteristic, Message)>, ErrorCode> {
        match self.responder.advance(request) {
            Ok(Some(reply)) => {
                if self.responder.is_complete() {
                    if let Some(key) = self.responder.signing_key() {
                        self.session.install_secret(key);
                        info!("Simulated pump paired");
                    }
                }
                Ok(vec![(Characteristic::Authorization, reply)])
            }
            Ok(None) => Ok(Vec::new()),
            Err(err) => {
                warn!("Simulated pump rejecting pairing: {}", err);
                self.session.clear();
                self.session.set_time_since_reset(self.config.time_since_reset);
                Err(ErrorCode::InvalidAuthenticationError)
            }
        }
    }

    fn handle_history(
        &mut self,
        request: &HistoryLogRequest,
    ) -> std::result::Result<Vec<(Characteristic, Message)>, ErrorCode> {
        let available = self.config.history_log_count;
        if request.number_of_logs == 0 || request.start_log >= available {
            return Err(ErrorCode::InvalidRequiredParameter);
        }

        let end = request
            .start_log
            .saturating_add(request.number_of_logs as u32)
            .min(available);
        let stream_id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(1);

        let records: Vec<HistoryLogRecord> = (request.start_log..end)
            .map(|sequence| HistoryLogRecord {
                type_id: 3,
                timestamp: self.config.time_since_reset.saturating_sub(end - sequence),
                sequence,
                data: [(sequence & 0xFF) as u8; 16],
            })
            .collect();

        let mut replies: Vec<(Characteristic, Message)> = vec![(
            Characteristic::CurrentStatus,
            HistoryLogResponse {
                status: 0,
                stream_id,
            }
            .into(),
        )];
        replies.extend(records.chunks(RECORDS_PER_STREAM_MESSAGE).map(|chunk| {
            (
                Characteristic::HistoryLog,
                HistoryLogStreamResponse {
                    number_of_logs: chunk.len() as u8,
                    stream_id,
                    records: chunk.to_vec(),
                }
                .into(),
            )
        }));
        debug!(
            "Streaming {} history records (stream {})",
            records.len(),
            stream_id
        );
        Ok(replies)
    }

    fn handle_temp_rate(&mut self, request: &SetTempRateRequest) -> std::result::Result<SetTempRateResponse, ErrorCode> {
        let minutes = request.time_ms / 60_000;
        if request.percent > MAX_TEMP_RATE_PERCENT || minutes < MIN_TEMP_RATE_MINUTES {
            return Err(ErrorCode::InvalidRequiredParameter);
        }
        let temp_rate_id = self.next_temp_rate_id;
        self.next_temp_rate_id = self.next_temp_rate_id.wrapping_add(1);
        info!(
            "Simulated temp rate {}% for {} minutes",
            request.percent, minutes
        );
        Ok(SetTempRateResponse {
            status: 0,
            temp_rate_id,
            unknown: 0,
        })
    }

    fn reply_error(
        &self,
        characteristic: Characteristic,
        tx_id: u8,
        op_code: u8,
        error: ErrorCode,
    ) -> Vec<(Characteristic, Bytes)> {
        let reply = Message::from(ErrorResponse {
            request_code_id: op_code,
            error_code: error,
        });
        self.encode(characteristic, tx_id, &reply)
    }

    fn encode(&self, characteristic: Characteristic, tx_id: u8, reply: &Message) -> Vec<(Characteristic, Bytes)> {
        let key = self.session.signing_key();
        let signing = key
            .as_deref()
            .map(|key| SigningParams::new(key.as_bytes(), self.session.time_since_reset()));

        match packetize(reply, tx_id, signing) {
            Ok(packets) => packets
                .into_iter()
                .map(|packet| (characteristic, packet.to_bytes()))
                .collect(),
            Err(err) => {
                warn!("Simulator failed to frame {}: {}", reply.name(), err);
                Vec::new()
            }
        }
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pump_protocol::{ApiVersionRequest, SuspendPumpingRequest};

    /// Deliver every reply through a fresh assembler
    fn collect(replies: Vec<(Characteristic, Bytes)>, key: Option<&[u8]>) -> Vec<Message> {
        let mut assembler = PacketAssembler::new();
        let mut messages = Vec::new();
        for (characteristic, data) in replies {
            let packet = Packet::from_bytes(&data).unwrap();
            if let Some(assembled) = assembler.push(characteristic, &packet, key).unwrap() {
                assert!(assembled.is_valid(), "{:?}", assembled.validation);
                messages.push(assembled.decode());
            }
        }
        messages
    }

    fn send(sim: &mut PumpSimulator, message: Message, tx_id: u8, key: Option<&[u8]>) -> Vec<Message> {
        let signing = key.map(|key| SigningParams::new(key, 100));
        let mut replies = Vec::new();
        for packet in packetize(&message, tx_id, signing).unwrap() {
            replies.extend(sim.handle_packet(message.descriptor().characteristic, &packet.to_bytes()));
        }
        collect(replies, key)
    }

    #[test]
    fn test_api_version() {
        let mut sim = PumpSimulator::new(SimulatorConfig::new("123456")).unwrap();
        let replies = send(&mut sim, ApiVersionRequest.into(), 3, None);
        assert_eq!(
            replies,
            vec![Message::from(ApiVersionResponse { major: 3, minor: 2 })]
        );
        assert_eq!(sim.handled(), &[MessageKind::ApiVersionRequest]);
    }

    #[test]
    fn test_injected_fault() {
        let mut sim = PumpSimulator::new(SimulatorConfig::new("123456")).unwrap();
        sim.inject_fault(32, ErrorCode::MessageBufferFull, 1);

        let replies = send(&mut sim, ApiVersionRequest.into(), 1, None);
        assert_eq!(
            replies,
            vec![Message::from(ErrorResponse {
                request_code_id: 32,
                error_code: ErrorCode::MessageBufferFull,
            })]
        );

        let replies = send(&mut sim, ApiVersionRequest.into(), 2, None);
        assert!(matches!(replies[0], Message::ApiVersionResponse(_)));
    }

    #[test]
    fn test_zero_fault_count_is_ignored() {
        let mut sim = PumpSimulator::new(SimulatorConfig::new("123456")).unwrap();
        sim.inject_fault(32, ErrorCode::MessageBufferFull, 0);

        for tx_id in 1..=2 {
            let replies = send(&mut sim, ApiVersionRequest.into(), tx_id, None);
            assert!(matches!(replies[0], Message::ApiVersionResponse(_)));
        }
    }

    #[test]
    fn test_unsigned_control_rejected() {
        let mut sim = PumpSimulator::new(SimulatorConfig::new("123456")).unwrap();
        let replies = send(&mut sim, SuspendPumpingRequest.into(), 1, Some(b"not-the-key"));
        assert_eq!(
            replies,
            vec![Message::from(ErrorResponse {
                request_code_id: 156,
                error_code: ErrorCode::InvalidAuthenticationError,
            })]
        );
        assert!(!sim.is_suspended());
    }

    #[test]
    fn test_history_stream() {
        let mut config = SimulatorConfig::new("123456");
        config.history_log_count = 20;
        let mut sim = PumpSimulator::new(config).unwrap();

        let replies = send(
            &mut sim,
            HistoryLogRequest {
                start_log: 5,
                number_of_logs: 10,
            }
            .into(),
            1,
            None,
        );
        assert_eq!(replies.len(), 3);
        assert_eq!(
            replies[0],
            Message::from(HistoryLogResponse {
                status: 0,
                stream_id: 1
            })
        );

        let sequences: Vec<u32> = replies[1..]
            .iter()
            .flat_map(|m| match m {
                Message::HistoryLogStreamResponse(HistoryLogStreamResponse { records, .. }) => {
                    records.iter().map(|r| r.sequence).collect::<Vec<_>>()
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sequences, (5..15).collect::<Vec<_>>());
    }

    #[test]
    fn test_history_out_of_range() {
        let mut sim = PumpSimulator::new(SimulatorConfig::new("123456")).unwrap();
        let replies = send(
            &mut sim,
            HistoryLogRequest {
                start_log: 1000,
                number_of_logs: 1,
            }
            .into(),
            1,
            None,
        );
        assert_eq!(
            replies,
            vec![Message::from(ErrorResponse {
                request_code_id: 60,
                error_code: ErrorCode::InvalidRequiredParameter,
            })]
        );
    }

    #[test]
    fn test_old_api_rejects_jpake() {
        let config = SimulatorConfig::new("123456").with_api_version(pump_protocol::ApiVersion::V2_5);
        let mut sim = PumpSimulator::new(config).unwrap();
        let request = pump_protocol::Jpake1aRequest::new(1, &[0u8; 165]);
        let replies = send(&mut sim, request.into(), 1, None);
        assert_eq!(
            replies,
            vec![Message::from(ErrorResponse {
                request_code_id: 32,
                error_code: ErrorCode::BadOpcode,
            })]
        );
    }

    #[test]
    fn test_invalid_code_rejected() {
        assert!(PumpSimulator::new(SimulatorConfig::new("12")).is_err());
    }
}
