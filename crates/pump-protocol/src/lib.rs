//! Binary Message Protocol for BLE Insulin Pumps
//!
//! This crate implements the wire protocol spoken between a pump and its
//! controlling app over six GATT characteristics: the message catalog,
//! packet framing and reassembly, CRC16 integrity, HMAC-SHA1 signing of
//! insulin-affecting commands, and the two pairing handshakes. It does no
//! I/O; `pump-comm` drives it over a transport.
//!
//! # Architecture
//!
//! 1. **Codec** - little-endian cargo readers/writers ([`codec`])
//! 2. **Catalog** - typed messages and their descriptors ([`message`], [`registry`])
//! 3. **Framing** - message buffers, CRC, signing, packets ([`framing`], [`reassembly`])
//! 4. **Pairing** - legacy and EC-JPAKE handshakes ([`auth`], [`session`])
//!
//! # Quick Start
//!
//! ```rust
//! use pump_protocol::{
//!     packetize, ApiVersionRequest, Characteristic, Message, PacketAssembler,
//! };
//!
//! let request = Message::from(ApiVersionRequest);
//! let packets = packetize(&request, 7, None).unwrap();
//!
//! let mut assembler = PacketAssembler::new();
//! let mut assembled = None;
//! for packet in &packets {
//!     assembled = assembler
//!         .push(Characteristic::CurrentStatus, packet, None)
//!         .unwrap();
//! }
//! let assembled = assembled.unwrap();
//! assert!(assembled.is_valid());
//! assert_eq!(assembled.decode(), request);
//! ```
//!
//! # Wire Format
//!
//! A message buffer is
//!
//! ```text
//! opCode(1) | txId(1) | declaredLen(1) | cargo | [timeSinceReset(4) | HMAC-SHA1(20)] | CRC16(2)
//! ```
//!
//! where the bracketed trailer is present only on signed messages and
//! counts toward `declaredLen`. The buffer is cut into packets of 18
//! (unsigned) or 40 (signed) bytes, each prefixed with
//! `packetsRemaining | txId`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Byte layer
pub mod characteristic;
pub mod codec;
pub mod error;

// Message catalog
pub mod message;
pub mod registry;

// Framing
pub mod crc;
pub mod framing;
pub mod packet;
pub mod reassembly;
pub mod signing;

// Pairing and session state
pub mod auth;
pub mod session;

pub use auth::{
    AuthOutcome, AuthScheme, Handshake, JpakeHandshake, JpakeResponder, JpakeState,
    LegacyHandshake, LegacyResponder, LegacyState, PairingCode, Transition,
};
pub use characteristic::{Characteristic, PUMP_SERVICE_UUID};
pub use error::{AuthError, CodecError, FramingError, ProtocolError, Result};
pub use framing::{frame, packetize, SigningParams};
pub use message::*;
pub use packet::Packet;
pub use reassembly::{AssembledMessage, PacketAssembler, Validation};
pub use registry::MessageRegistry;
pub use session::{HandlerContext, SessionContext, SessionSecret};
