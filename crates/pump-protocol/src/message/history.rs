//! History log request and stream

use super::{Descriptor, MessageKind, PumpMessage};
use crate::characteristic::Characteristic;
use crate::codec::{CargoReader, CargoWriter};

/// Size of one history log record on the stream
pub const HISTORY_LOG_RECORD_LEN: usize = 26;

/// Asks the pump to stream `number_of_logs` records starting at `start_log`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLogRequest {
    /// Sequence number of the first record
    pub start_log: u32,
    /// Record count
    pub number_of_logs: u8,
}

impl PumpMessage for HistoryLogRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::HistoryLogRequest,
        "HistoryLogRequest",
        60,
        5,
        Characteristic::CurrentStatus,
    )
    .responds_with(MessageKind::HistoryLogResponse);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            start_log: r.u32(),
            number_of_logs: r.u8(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(5)
            .u32(self.start_log)
            .u8(self.number_of_logs)
            .finish()
    }
}

/// Acknowledges a history request; records follow on the history stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLogResponse {
    /// Zero on success
    pub status: u8,
    /// Identifies the stream the records will carry
    pub stream_id: u8,
}

impl PumpMessage for HistoryLogResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::HistoryLogResponse,
        "HistoryLogResponse",
        61,
        2,
        Characteristic::CurrentStatus,
    );

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            status: r.u8(),
            stream_id: r.u8(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        vec![self.status, self.stream_id]
    }
}

/// One raw history record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLogRecord {
    /// Event type
    pub type_id: u16,
    /// Pump time of the event
    pub timestamp: u32,
    /// Record sequence number
    pub sequence: u32,
    /// Type-specific payload
    pub data: [u8; 16],
}

impl HistoryLogRecord {
    fn read(r: &mut CargoReader<'_>) -> Self {
        Self {
            type_id: r.u16(),
            timestamp: r.u32(),
            sequence: r.u32(),
            data: r.array(),
        }
    }

    fn write(&self, w: CargoWriter) -> CargoWriter {
        w.u16(self.type_id)
            .u32(self.timestamp)
            .u32(self.sequence)
            .bytes(&self.data)
    }
}

/// Batch of history records pushed on the history log characteristic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLogStreamResponse {
    /// Count announced by the pump
    pub number_of_logs: u8,
    /// Stream this batch belongs to
    pub stream_id: u8,
    /// Complete records; a trailing partial record is dropped
    pub records: Vec<HistoryLogRecord>,
}

impl PumpMessage for HistoryLogStreamResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::HistoryLogStreamResponse,
        "HistoryLogStreamResponse",
        129,
        0,
        Characteristic::HistoryLog,
    )
    .stream();

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        let number_of_logs = r.u8();
        let stream_id = r.u8();
        let count = r.remaining() / HISTORY_LOG_RECORD_LEN;
        let records = (0..count).map(|_| HistoryLogRecord::read(&mut r)).collect();
        Self {
            number_of_logs,
            stream_id,
            records,
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        let w = CargoWriter::with_capacity(2 + self.records.len() * HISTORY_LOG_RECORD_LEN)
            .u8(self.number_of_logs)
            .u8(self.stream_id);
        self.records
            .iter()
            .fold(w, |w, record| record.write(w))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u32) -> HistoryLogRecord {
        HistoryLogRecord {
            type_id: 3,
            timestamp: 1000 + sequence,
            sequence,
            data: [sequence as u8; 16],
        }
    }

    #[test]
    fn test_stream_cargo_layout() {
        let stream = HistoryLogStreamResponse {
            number_of_logs: 2,
            stream_id: 9,
            records: vec![record(1), record(2)],
        };
        let cargo = stream.to_cargo();
        assert_eq!(cargo.len(), 2 + 2 * HISTORY_LOG_RECORD_LEN);
        assert_eq!(HistoryLogStreamResponse::from_cargo(&cargo), stream);
    }

    #[test]
    fn test_partial_record_dropped() {
        let mut cargo = HistoryLogStreamResponse {
            number_of_logs: 1,
            stream_id: 0,
            records: vec![record(7)],
        }
        .to_cargo();
        cargo.extend_from_slice(&[0xFF; 5]);

        let decoded = HistoryLogStreamResponse::from_cargo(&cargo);
        assert_eq!(decoded.records, vec![record(7)]);
    }

    #[test]
    fn test_request_layout() {
        let request = HistoryLogRequest {
            start_log: 0x0102_0304,
            number_of_logs: 10,
        };
        assert_eq!(request.to_cargo(), vec![0x04, 0x03, 0x02, 0x01, 10]);
    }
}
