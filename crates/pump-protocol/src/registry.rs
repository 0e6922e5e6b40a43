//! Message registry
//!
//! Resolves `(opcode, characteristic)` plus an observed length to a catalog
//! entry. Built once from [`MessageKind::ALL`] and read-only afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::{debug, trace};

use crate::characteristic::Characteristic;
use crate::error::{FramingError, Result};
use crate::message::{Descriptor, Message, MessageKind};

/// Lookup table from `(opcode, characteristic)` to candidate descriptors
#[derive(Debug, Default)]
pub struct MessageRegistry {
    entries: HashMap<(u8, Characteristic), Vec<&'static Descriptor>>,
}

impl MessageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the whole catalog
    pub fn with_catalog() -> Self {
        let mut registry = Self::new();
        for kind in MessageKind::ALL {
            registry.register(kind.descriptor());
        }
        registry
    }

    /// Process-wide registry
    pub fn global() -> &'static MessageRegistry {
        static REGISTRY: OnceLock<MessageRegistry> = OnceLock::new();
        REGISTRY.get_or_init(MessageRegistry::with_catalog)
    }

    /// Add a descriptor; universal descriptors land on every characteristic
    pub fn register(&mut self, descriptor: &'static Descriptor) {
        let characteristics: &[Characteristic] = if descriptor.universal {
            &Characteristic::ALL
        } else {
            std::slice::from_ref(&descriptor.characteristic)
        };

        for &characteristic in characteristics {
            let candidates = self
                .entries
                .entry((descriptor.op_code, characteristic))
                .or_default();
            if !candidates.iter().any(|c| c.kind == descriptor.kind) {
                candidates.push(descriptor);
            }
        }
    }

    /// All candidates for an opcode on a characteristic, in registration order
    pub fn lookup(&self, op_code: u8, characteristic: Characteristic) -> &[&'static Descriptor] {
        self.entries
            .get(&(op_code, characteristic))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Pick the candidate matching an observed cargo length
    ///
    /// Exact fixed-size match wins, then the unique variable/stream
    /// candidate, then the only candidate if there is exactly one.
    pub fn best_match(
        &self,
        op_code: u8,
        characteristic: Characteristic,
        observed_len: usize,
    ) -> Option<&'static Descriptor> {
        select(self.lookup(op_code, characteristic), |d| d.size as usize, observed_len)
    }

    /// Like [`best_match`](Self::best_match) but against the declared length
    /// from a message header, which includes the signed trailer
    pub fn resolve_frame(
        &self,
        op_code: u8,
        characteristic: Characteristic,
        declared_len: usize,
    ) -> Option<&'static Descriptor> {
        select(
            self.lookup(op_code, characteristic),
            |d| d.declared_len(d.size as usize),
            declared_len,
        )
    }

    /// Decode cargo received on `characteristic`
    pub fn decode(&self, op_code: u8, characteristic: Characteristic, cargo: &[u8]) -> Result<Message> {
        match self.best_match(op_code, characteristic, cargo.len()) {
            Some(descriptor) => {
                trace!(message = descriptor.name, len = cargo.len(), "Decoding cargo");
                Ok(descriptor.kind.decode(cargo))
            }
            None => {
                debug!(op_code, %characteristic, len = cargo.len(), "No catalog entry");
                Err(FramingError::UnknownOpcode {
                    op_code,
                    characteristic,
                    declared_len: cargo.len().min(u8::MAX as usize) as u8,
                }
                .into())
            }
        }
    }

    /// Number of `(opcode, characteristic)` keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn select(
    candidates: &[&'static Descriptor],
    expected_len: impl Fn(&Descriptor) -> usize,
    observed: usize,
) -> Option<&'static Descriptor> {
    if let Some(exact) = candidates
        .iter()
        .find(|d| !d.is_variable() && expected_len(**d) == observed)
    {
        return Some(*exact);
    }

    let mut variable = candidates.iter().filter(|d| d.is_variable());
    if let (Some(only), None) = (variable.next(), variable.next()) {
        return Some(*only);
    }

    match candidates {
        [only] => Some(*only),
        _ => None,
    }
}
