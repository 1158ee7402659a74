use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::outbox::record::ContactPayload;
use crate::outbox::transport::{ContactTransport, DeliveryError};

/// Transport whose reachability is flipped by the test.
#[derive(Debug, Default)]
pub struct SwitchTransport {
    online: AtomicBool,
    calls: AtomicUsize,
    delivered: Mutex<Vec<ContactPayload>>,
}

impl SwitchTransport {
    pub fn online() -> Self {
        let transport = Self::default();
        transport.set_online(true);
        transport
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered_subjects(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|payload| payload.subject.clone())
            .collect()
    }
}

impl ContactTransport for SwitchTransport {
    fn deliver(&self, payload: &ContactPayload) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            self.delivered.lock().push(payload.clone());
            Ok(())
        } else {
            Err(DeliveryError::Transport("connection refused".into()))
        }
    }
}

/// Transport that holds every attempt until the test opens the gate, then
/// succeeds. A gate left shut fails the attempt after a while.
#[derive(Debug)]
pub struct GatedTransport {
    gate: Receiver<()>,
}

impl GatedTransport {
    pub fn new() -> (Self, Sender<()>) {
        let (open, gate) = bounded(1);
        (Self { gate }, open)
    }
}

impl ContactTransport for GatedTransport {
    fn deliver(&self, _payload: &ContactPayload) -> Result<(), DeliveryError> {
        self.gate
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| DeliveryError::Transport("gate closed".into()))
    }
}
