//! Transport backed by an in-process simulator
//!
//! Every write is handed to the [`PumpSimulator`]; its replies are queued
//! per characteristic and handed out as notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use pump_protocol::Characteristic;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::PumpTransport;
use crate::error::{PumpCommError, Result};
use crate::simulator::PumpSimulator;

#[derive(Debug)]
struct NotificationQueue {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl NotificationQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

/// Loopback transport to a [`PumpSimulator`]
#[derive(Debug)]
pub struct SimulatedTransport {
    simulator: Mutex<PumpSimulator>,
    queues: HashMap<Characteristic, NotificationQueue>,
    connected: AtomicBool,
    writes: AtomicUsize,
    dropped_replies: AtomicUsize,
}

impl SimulatedTransport {
    /// Connect to `simulator`
    pub fn new(simulator: PumpSimulator) -> Self {
        Self {
            simulator: Mutex::new(simulator),
            queues: Characteristic::ALL
                .iter()
                .map(|c| (*c, NotificationQueue::new()))
                .collect(),
            connected: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
            dropped_replies: AtomicUsize::new(0),
        }
    }

    /// Access the simulator, e.g. to inject faults
    pub fn simulator(&self) -> MutexGuard<'_, PumpSimulator> {
        self.simulator.lock()
    }

    /// Packets written so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Swallow the replies to the next `count` complete requests
    pub fn drop_next_replies(&self, count: usize) {
        self.dropped_replies.store(count, Ordering::Relaxed);
    }

    /// Reconnect after [`PumpTransport::disconnect`]
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::Release);
        debug!("Simulated link reconnected");
    }

    fn queue(&self, characteristic: Characteristic) -> Result<&NotificationQueue> {
        self.queues
            .get(&characteristic)
            .ok_or(PumpCommError::ReadFailed {
                characteristic,
                reason: "unknown characteristic".into(),
            })
    }

    fn take_drop(&self) -> bool {
        self.dropped_replies
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PumpTransport for SimulatedTransport {
    async fn write(&self, characteristic: Characteristic, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(PumpCommError::ConnectionClosed);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        let replies = self.simulator.lock().handle_packet(characteristic, &data);
        if replies.is_empty() {
            return Ok(());
        }
        if self.take_drop() {
            debug!("Dropping {} reply packets", replies.len());
            return Ok(());
        }

        for (reply_on, packet) in replies {
            trace!("Notification on {} ({} bytes)", reply_on, packet.len());
            self.queue(reply_on)?.tx.send(packet)?;
        }
        Ok(())
    }

    async fn read_or_wait_for_notification(
        &self,
        characteristic: Characteristic,
        timeout: Duration,
    ) -> Result<Option<Bytes>> {
        if !self.is_connected() {
            return Err(PumpCommError::ConnectionClosed);
        }
        let mut rx = self.queue(characteristic)?.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => Err(PumpCommError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.simulator.lock().on_disconnect();
            for queue in self.queues.values() {
                let mut rx = queue.rx.lock().await;
                while rx.try_recv().is_ok() {}
            }
            debug!("Simulated link disconnected");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use pump_protocol::{packetize, ApiVersionRequest, Message};

    fn transport() -> SimulatedTransport {
        SimulatedTransport::new(PumpSimulator::new(SimulatorConfig::new("123456")).unwrap())
    }

    #[tokio::test]
    async fn test_loopback() {
        let transport = transport();
        let request = Message::from(ApiVersionRequest);
        for packet in packetize(&request, 1, None).unwrap() {
            transport
                .write(Characteristic::CurrentStatus, packet.to_bytes())
                .await
                .unwrap();
        }
        assert_eq!(transport.write_count(), 1);

        let reply = transport
            .read_or_wait_for_notification(Characteristic::CurrentStatus, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(reply.is_some());

        let nothing = transport
            .read_or_wait_for_notification(Characteristic::Control, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(nothing.is_none());
    }

    #[tokio::test]
    async fn test_dropped_reply() {
        let transport = transport();
        transport.drop_next_replies(1);
        let packet = packetize(&ApiVersionRequest.into(), 1, None).unwrap().remove(0);
        transport
            .write(Characteristic::CurrentStatus, packet.to_bytes())
            .await
            .unwrap();
        let reply = transport
            .read_or_wait_for_notification(Characteristic::CurrentStatus, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let transport = transport();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.write(Characteristic::CurrentStatus, Bytes::new()).await,
            Err(PumpCommError::ConnectionClosed)
        ));

        transport.reconnect();
        assert!(transport.is_connected());
    }
}
