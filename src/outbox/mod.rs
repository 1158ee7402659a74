//! Contact submissions that survive an unreachable endpoint.
//!
//! [`Outbox::submit`] tries the endpoint once. When that fails the form is
//! appended to the persisted queue and one background attempt is handed to
//! the [`OutboxWorker`], which also drains the queue whenever a
//! [`RetryTrigger`] fires.

pub mod probe;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};

use crate::config::AppConfig;
use crate::storage::LocalStore;

pub use probe::ReachabilityProbe;
pub use queue::{QueueStore, QUEUE_KEY};
pub use reconcile::{DeliveryOutcome, ReconcileReport};
pub use record::{ContactForm, ContactPayload, PendingSubmission};
pub use transport::{ContactTransport, DeliveryError, HttpTransport};
pub use worker::{
    DeliveryPath, OutboxEvent, OutboxWorker, RetryTrigger, TriggerSender, WorkerOptions,
};

/// What the user is told right after pressing send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    Sent,
    Queued { id: String },
    Failed,
}

impl SubmitStatus {
    pub fn message(&self) -> &'static str {
        match self {
            SubmitStatus::Sent => "Message sent successfully.",
            SubmitStatus::Queued { .. } => {
                "Message is not sent. It was saved and will be retried automatically."
            }
            SubmitStatus::Failed => "Failed to send or save message. Please try again later.",
        }
    }

    pub fn queued_id(&self) -> Option<&str> {
        match self {
            SubmitStatus::Queued { id } => Some(id),
            _ => None,
        }
    }
}

/// Status of a submission whose first attempt runs off the caller's thread.
#[derive(Debug)]
pub struct SubmitTicket {
    reply: Receiver<SubmitStatus>,
}

impl SubmitTicket {
    /// `None` while the attempt is still in flight. A worker that vanished
    /// without answering counts as `Failed`.
    pub fn poll(&self) -> Option<SubmitStatus> {
        match self.reply.try_recv() {
            Ok(status) => Some(status),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("submission dropped without a status");
                Some(SubmitStatus::Failed)
            }
        }
    }

    pub fn wait(&self, timeout: Duration) -> Option<SubmitStatus> {
        match self.reply.recv_timeout(timeout) {
            Ok(status) => Some(status),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(SubmitStatus::Failed),
        }
    }
}

impl WorkerOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let probe = match config.outbox.probe_interval() {
            Some(interval) => Some(ReachabilityProbe::new(
                config.contact.endpoint_url()?,
                interval,
            )),
            None => None,
        };
        Ok(Self {
            retry_interval: config.outbox.retry_interval(),
            reconcile_on_mount: true,
            probe,
        })
    }
}

pub struct Outbox {
    queue: QueueStore,
    transport: Arc<dyn ContactTransport>,
    worker: Option<OutboxWorker>,
    background_retry: bool,
}

impl Outbox {
    /// Outbox without a worker: submissions that fail stay queued until
    /// someone calls [`Outbox::sync_now`].
    pub fn detached(store: Arc<dyn LocalStore>, transport: Arc<dyn ContactTransport>) -> Self {
        Self {
            queue: QueueStore::new(store),
            transport,
            worker: None,
            background_retry: false,
        }
    }

    /// Outbox with a running worker. Retry sources stop when the outbox is
    /// dropped.
    pub fn start(
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn ContactTransport>,
        options: WorkerOptions,
        background_retry: bool,
    ) -> Result<Self> {
        let queue = QueueStore::new(store);
        let worker = OutboxWorker::spawn(queue.clone(), transport.clone(), options)?;
        Ok(Self {
            queue,
            transport,
            worker: Some(worker),
            background_retry,
        })
    }

    pub fn from_config(
        store: Arc<dyn LocalStore>,
        config: &AppConfig,
        options: WorkerOptions,
    ) -> Result<Self> {
        let transport: Arc<dyn ContactTransport> = Arc::new(HttpTransport::new(&config.contact)?);
        Self::start(store, transport, options, config.outbox.background_retry)
    }

    /// Sends the form once. The form is cleared only on `Sent`; otherwise it
    /// is left exactly as the user typed it.
    pub fn submit(&self, form: &mut ContactForm) -> SubmitStatus {
        let status = reconcile::submit_once(&self.queue, self.transport.as_ref(), form);
        match &status {
            SubmitStatus::Sent => form.clear(),
            SubmitStatus::Queued { id } if self.background_retry => {
                if let Some(worker) = &self.worker {
                    worker.deliver_in_background(id.clone());
                }
            }
            _ => {}
        }
        status
    }

    /// Same attempt as [`Outbox::submit`] without blocking the caller: the
    /// worker runs it, or a short-lived thread when there is no worker.
    /// The caller clears its own form once the ticket reports `Sent`.
    pub fn begin_submit(&self, form: ContactForm) -> Result<SubmitTicket> {
        if let Some(worker) = &self.worker {
            return Ok(SubmitTicket {
                reply: worker.submit(form, self.background_retry),
            });
        }

        let (reply, status) = bounded(1);
        let queue = self.queue.clone();
        let transport = self.transport.clone();
        thread::Builder::new()
            .name("folio-submit".into())
            .spawn(move || {
                let _ = reply.send(reconcile::submit_once(&queue, transport.as_ref(), &form));
            })
            .context("spawning submission thread")?;
        Ok(SubmitTicket { reply: status })
    }

    pub fn notify(&self, trigger: RetryTrigger) {
        if let Some(worker) = &self.worker {
            worker.notify(trigger);
        }
    }

    pub fn poll_event(&self) -> Option<OutboxEvent> {
        self.worker.as_ref()?.events().try_recv().ok()
    }

    pub fn events(&self) -> Option<&Receiver<OutboxEvent>> {
        self.worker.as_ref().map(OutboxWorker::events)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.len()
    }

    pub fn pending(&self) -> Result<Vec<PendingSubmission>> {
        self.queue.load()
    }

    /// One reconciliation pass on the calling thread. Only valid without a
    /// worker, which otherwise owns every pass.
    pub fn sync_now(&self) -> Result<ReconcileReport> {
        if self.worker.is_some() {
            bail!("reconciliation is owned by the outbox worker");
        }
        reconcile::reconcile(&self.queue, self.transport.as_ref())
    }

    /// Waits for outstanding background work, then stops the worker.
    pub fn shutdown(mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker.shutdown(),
            None => Ok(()),
        }
    }
}
