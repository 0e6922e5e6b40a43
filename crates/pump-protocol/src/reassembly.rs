//! Packet reassembly
//!
//! Collects packets per characteristic until `packets_remaining` reaches
//! zero, then checks the CRC and (for signed messages) the HMAC trailer.
//! Each characteristic has at most one transaction in flight; the
//! characteristics themselves are independent.
//!
//! Validation failures are reported on the [`AssembledMessage`] instead of
//! as errors so the caller decides whether to drop the message or, before
//! a session key exists, accept it unverified.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::characteristic::Characteristic;
use crate::crc::{split_crc, CRC_LEN};
use crate::error::FramingError;
use crate::framing::MESSAGE_HEADER_LEN;
use crate::message::{Descriptor, Message};
use crate::packet::Packet;
use crate::registry::MessageRegistry;
use crate::signing::{trailer_time_since_reset, verify, SIGNATURE_TRAILER_LEN};

/// Outcome of integrity checks on a complete message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// CRC matched and, if signed, the HMAC matched
    Valid,
    /// CRC did not match
    CrcMismatch {
        /// Checksum carried by the message
        expected: u16,
        /// Checksum computed over the body
        actual: u16,
    },
    /// Signed message whose HMAC did not verify
    HmacMismatch,
    /// Signed message received without a key to check it
    Unverified,
}

impl Validation {
    /// CRC and HMAC (if any) both checked out
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// A fully collected message
#[derive(Debug, Clone)]
pub struct AssembledMessage {
    /// Characteristic it arrived on
    pub characteristic: Characteristic,
    /// Opcode from the header
    pub op_code: u8,
    /// Transaction id
    pub tx_id: u8,
    /// Catalog entry resolved from the first packet
    pub descriptor: &'static Descriptor,
    /// Cargo without header or trailers
    pub cargo: Bytes,
    /// Complete framed buffer, CRC included
    pub raw: Bytes,
    /// Time since reset from the signed trailer
    pub time_since_reset: Option<u32>,
    /// Integrity check result
    pub validation: Validation,
}

impl AssembledMessage {
    /// Decode the cargo as the resolved message type
    pub fn decode(&self) -> Message {
        self.descriptor.kind.decode(&self.cargo)
    }

    /// Whether integrity checks passed
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }
}

/// In-progress transaction on one characteristic
#[derive(Debug)]
struct Collector {
    tx_id: u8,
    descriptor: &'static Descriptor,
    declared_len: usize,
    /// Expected packets_remaining of the next packet
    next_remaining: u8,
    buf: BytesMut,
    started_at: Instant,
}

/// Per-characteristic packet collector
#[derive(Debug)]
pub struct PacketAssembler {
    registry: &'static MessageRegistry,
    collectors: HashMap<Characteristic, Collector>,
    timeout: Duration,
}

impl PacketAssembler {
    /// Create an assembler over the global registry
    pub fn new() -> Self {
        Self::with_registry(MessageRegistry::global())
    }

    /// Create an assembler over a specific registry
    pub fn with_registry(registry: &'static MessageRegistry) -> Self {
        Self {
            registry,
            collectors: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set how long an incomplete transaction is kept
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Feed one packet received on `characteristic`
    ///
    /// Returns `Some` once the final packet arrives. Any error discards the
    /// collector for that characteristic; other characteristics are not
    /// touched.
    pub fn push(
        &mut self,
        characteristic: Characteristic,
        packet: &Packet,
        signing_key: Option<&[u8]>,
    ) -> Result<Option<AssembledMessage>, FramingError> {
        self.expire_stale();

        let collector = match self.collectors.remove(&characteristic) {
            Some(collector) => self.continue_collector(characteristic, collector, packet)?,
            None => self.start_collector(characteristic, packet)?,
        };

        if !packet.is_last() {
            self.collectors.insert(characteristic, collector);
            return Ok(None);
        }

        finish(characteristic, collector, signing_key).map(Some)
    }

    fn start_collector(
        &self,
        characteristic: Characteristic,
        packet: &Packet,
    ) -> Result<Collector, FramingError> {
        let (op_code, header_tx_id, declared_len) = header(packet)?;
        if header_tx_id != packet.tx_id {
            return Err(FramingError::HeaderTransactionMismatch {
                header: header_tx_id,
                packet: packet.tx_id,
            });
        }

        let descriptor = self
            .registry
            .resolve_frame(op_code, characteristic, declared_len as usize)
            .ok_or(FramingError::UnknownOpcode {
                op_code,
                characteristic,
                declared_len,
            })?;

        debug!(
            "Collecting {} on {} (txId {}, {} more packets)",
            descriptor.name, characteristic, packet.tx_id, packet.packets_remaining
        );

        let total = MESSAGE_HEADER_LEN + declared_len as usize + CRC_LEN;
        let mut buf = BytesMut::with_capacity(total);
        buf.extend_from_slice(&packet.cargo);

        Ok(Collector {
            tx_id: packet.tx_id,
            descriptor,
            declared_len: declared_len as usize,
            next_remaining: packet.packets_remaining.saturating_sub(1),
            buf,
            started_at: Instant::now(),
        })
    }

    fn continue_collector(
        &self,
        characteristic: Characteristic,
        mut collector: Collector,
        packet: &Packet,
    ) -> Result<Collector, FramingError> {
        if packet.tx_id != collector.tx_id {
            warn!(
                "Dropping {} on {}: txId {} arrived while {} incomplete",
                collector.descriptor.name, characteristic, packet.tx_id, collector.tx_id
            );
            // A fresh header for the new txId means a second transaction
            // started, otherwise the packet belongs to nothing we know.
            return Err(match header(packet) {
                Ok((_, header_tx_id, _)) if header_tx_id == packet.tx_id => {
                    FramingError::InterleavedTransaction {
                        characteristic,
                        active: collector.tx_id,
                        incoming: packet.tx_id,
                    }
                }
                _ => FramingError::TransactionIdMismatch {
                    expected: collector.tx_id,
                    got: packet.tx_id,
                },
            });
        }

        if packet.packets_remaining != collector.next_remaining {
            warn!(
                "Dropping {} on {}: expected {} remaining, got {}",
                collector.descriptor.name,
                characteristic,
                collector.next_remaining,
                packet.packets_remaining
            );
            return Err(FramingError::PacketOrder {
                expected: collector.next_remaining,
                got: packet.packets_remaining,
            });
        }

        collector.buf.extend_from_slice(&packet.cargo);
        collector.next_remaining = packet.packets_remaining.saturating_sub(1);

        trace!(
            "Packet for {} (txId {}), {} remaining, {} bytes so far",
            collector.descriptor.name,
            collector.tx_id,
            packet.packets_remaining,
            collector.buf.len()
        );
        Ok(collector)
    }

    /// Drop every in-flight transaction
    pub fn reset(&mut self) {
        if !self.collectors.is_empty() {
            debug!("Discarding {} incomplete transactions", self.collectors.len());
        }
        self.collectors.clear();
    }

    /// Drop the in-flight transaction on one characteristic
    pub fn reset_characteristic(&mut self, characteristic: Characteristic) {
        self.collectors.remove(&characteristic);
    }

    /// Transaction id in flight on `characteristic`, if any
    pub fn in_flight(&self, characteristic: Characteristic) -> Option<u8> {
        self.collectors.get(&characteristic).map(|c| c.tx_id)
    }

    /// Number of characteristics with an incomplete transaction
    pub fn pending_count(&self) -> usize {
        self.collectors.len()
    }

    /// Expire incomplete transactions older than the timeout
    fn expire_stale(&mut self) {
        let now = Instant::now();
        let timeout = self.timeout;
        self.collectors.retain(|characteristic, collector| {
            let keep = now.duration_since(collector.started_at) < timeout;
            if !keep {
                warn!(
                    "Expiring incomplete {} on {} (txId {}, {} bytes)",
                    collector.descriptor.name,
                    characteristic,
                    collector.tx_id,
                    collector.buf.len()
                );
            }
            keep
        });
    }
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn header(packet: &Packet) -> Result<(u8, u8, u8), FramingError> {
    match packet.cargo.get(..MESSAGE_HEADER_LEN) {
        Some(&[op_code, tx_id, declared_len]) => Ok((op_code, tx_id, declared_len)),
        _ => Err(FramingError::MissingHeader {
            len: packet.cargo.len(),
        }),
    }
}

fn finish(
    characteristic: Characteristic,
    collector: Collector,
    signing_key: Option<&[u8]>,
) -> Result<AssembledMessage, FramingError> {
    let Collector {
        tx_id,
        descriptor,
        declared_len,
        buf,
        ..
    } = collector;

    let expected_total = MESSAGE_HEADER_LEN + declared_len + CRC_LEN;
    if buf.len() != expected_total {
        warn!(
            "Dropping {} on {}: {} bytes assembled, {} expected",
            descriptor.name,
            characteristic,
            buf.len(),
            expected_total
        );
        return Err(FramingError::LengthMismatch {
            declared: declared_len,
            assembled: buf.len(),
        });
    }

    let raw = buf.freeze();
    let (body, received, computed) = split_crc(&raw).ok_or(FramingError::LengthMismatch {
        declared: declared_len,
        assembled: raw.len(),
    })?;

    let trailer = if descriptor.signed { SIGNATURE_TRAILER_LEN } else { 0 };
    let cargo_len = declared_len.saturating_sub(trailer);
    let cargo = raw.slice(MESSAGE_HEADER_LEN..MESSAGE_HEADER_LEN + cargo_len);

    let validation = if received != computed {
        Validation::CrcMismatch {
            expected: received,
            actual: computed,
        }
    } else if !descriptor.signed {
        Validation::Valid
    } else {
        match signing_key {
            Some(key) if verify(body, key, None) => Validation::Valid,
            Some(_) => Validation::HmacMismatch,
            None => Validation::Unverified,
        }
    };

    let time_since_reset = if descriptor.signed && declared_len >= SIGNATURE_TRAILER_LEN {
        trailer_time_since_reset(body)
    } else {
        None
    };

    if validation.is_valid() {
        debug!(
            "Reassembled {} on {} (txId {}, {} bytes)",
            descriptor.name,
            characteristic,
            tx_id,
            raw.len()
        );
    } else {
        warn!(
            "Reassembled {} on {} (txId {}) failed validation: {:?}",
            descriptor.name, characteristic, tx_id, validation
        );
    }

    Ok(AssembledMessage {
        characteristic,
        op_code: descriptor.op_code,
        tx_id,
        descriptor,
        cargo,
        raw,
        time_since_reset,
        validation,
    })
}
