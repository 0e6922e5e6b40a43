//! Per-connection session state
//!
//! Holds the signing key derived by the handshake, the transaction id
//! counter and the pump clock anchor. The key slot is swapped as a whole,
//! so readers see either the previous key or the new one.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::characteristic::Characteristic;

/// Signing key material, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret {
    key: Vec<u8>,
}

impl SessionSecret {
    /// Wrap key bytes
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Key length
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSecret")
            .field("len", &self.key.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockAnchor {
    time_since_reset: u32,
    observed_at: Instant,
}

/// Shared state for one connection
#[derive(Debug, Default)]
pub struct SessionContext {
    secret: RwLock<Option<Arc<SessionSecret>>>,
    tx_counter: AtomicU8,
    clock: Mutex<Option<ClockAnchor>>,
}

impl SessionContext {
    /// Create an unauthenticated session
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the signing key produced by a completed handshake
    pub fn install_secret(&self, secret: SessionSecret) {
        debug!("Installing session key ({} bytes)", secret.len());
        *self.secret.write() = Some(Arc::new(secret));
    }

    /// Current signing key
    pub fn signing_key(&self) -> Option<Arc<SessionSecret>> {
        self.secret.read().clone()
    }

    /// Whether a signing key is installed
    pub fn is_authenticated(&self) -> bool {
        self.secret.read().is_some()
    }

    /// Forget the signing key and clock
    pub fn clear(&self) {
        if self.secret.write().take().is_some() {
            debug!("Session key cleared");
        }
        *self.clock.lock() = None;
    }

    /// Next transaction id, wrapping at 256
    pub fn next_tx_id(&self) -> u8 {
        self.tx_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Next transaction id not rejected by `in_use`
    ///
    /// Gives up after a full cycle and returns the plain next id.
    pub fn next_free_tx_id(&self, in_use: impl Fn(u8) -> bool) -> u8 {
        let first = self.next_tx_id();
        if !in_use(first) {
            return first;
        }
        for _ in 0..u8::MAX {
            let candidate = self.next_tx_id();
            if !in_use(candidate) {
                return candidate;
            }
        }
        first
    }

    /// Record the pump's time since reset as of now
    pub fn set_time_since_reset(&self, time_since_reset: u32) {
        *self.clock.lock() = Some(ClockAnchor {
            time_since_reset,
            observed_at: Instant::now(),
        });
    }

    /// Pump time since reset, advanced by the local elapsed time
    ///
    /// Zero until the clock has been synced.
    pub fn time_since_reset(&self) -> u32 {
        match *self.clock.lock() {
            Some(anchor) => {
                let elapsed = anchor.observed_at.elapsed().as_secs();
                anchor
                    .time_since_reset
                    .saturating_add(elapsed.min(u32::MAX as u64) as u32)
            }
            None => 0,
        }
    }

    /// Whether the pump clock has been synced
    pub fn has_clock(&self) -> bool {
        self.clock.lock().is_some()
    }

    /// Build the context for one incoming message
    pub fn handler_context(&self, tx_id: u8, characteristic: Characteristic) -> HandlerContext {
        HandlerContext::for_message(self, tx_id, characteristic)
    }
}

/// Snapshot handed to whoever processes one incoming message
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Transaction id of the message
    pub tx_id: u8,
    /// Characteristic it arrived on
    pub characteristic: Characteristic,
    /// Whether a session key was installed
    pub is_authenticated: bool,
    /// The installed key, if any
    pub derived_secret: Option<Arc<SessionSecret>>,
    /// Pump time since reset when the message was handled
    pub time_since_reset: u32,
}

impl HandlerContext {
    /// Snapshot `session` for a message
    pub fn for_message(session: &SessionContext, tx_id: u8, characteristic: Characteristic) -> Self {
        let derived_secret = session.signing_key();
        Self {
            tx_id,
            characteristic,
            is_authenticated: derived_secret.is_some(),
            derived_secret,
            time_since_reset: session.time_since_reset(),
        }
    }

    /// Key bytes for verification, if authenticated
    pub fn key(&self) -> Option<&[u8]> {
        self.derived_secret.as_deref().map(SessionSecret::as_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_swap() {
        let session = SessionContext::new();
        assert!(!session.is_authenticated());
        assert!(session.signing_key().is_none());

        session.install_secret(SessionSecret::new(b"first".to_vec()));
        let held = session.signing_key().unwrap();
        session.install_secret(SessionSecret::new(b"second".to_vec()));

        // Readers keep the key they already hold
        assert_eq!(held.as_bytes(), b"first");
        assert_eq!(session.signing_key().unwrap().as_bytes(), b"second");

        session.clear();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_tx_id_wraps() {
        let session = SessionContext::new();
        for expected in 0..=u8::MAX {
            assert_eq!(session.next_tx_id(), expected);
        }
        assert_eq!(session.next_tx_id(), 0);
    }

    #[test]
    fn test_tx_id_skips_in_use() {
        let session = SessionContext::new();
        let id = session.next_free_tx_id(|id| id < 3);
        assert_eq!(id, 3);
        assert_eq!(session.next_tx_id(), 4);
    }

    #[test]
    fn test_time_since_reset() {
        let session = SessionContext::new();
        assert_eq!(session.time_since_reset(), 0);
        assert!(!session.has_clock());

        session.set_time_since_reset(1000);
        let now = session.time_since_reset();
        assert!((1000..1002).contains(&now));

        session.clear();
        assert!(!session.has_clock());
    }

    #[test]
    fn test_handler_context() {
        let session = SessionContext::new();
        let ctx = session.handler_context(4, Characteristic::Control);
        assert!(!ctx.is_authenticated);
        assert!(ctx.key().is_none());

        session.install_secret(SessionSecret::new(vec![1, 2, 3]));
        let ctx = HandlerContext::for_message(&session, 5, Characteristic::Control);
        assert!(ctx.is_authenticated);
        assert_eq!(ctx.key(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_debug_redacts_key() {
        let secret = SessionSecret::new(b"supersecret".to_vec());
        assert!(!format!("{secret:?}").contains("supersecret"));
    }
}
