use std::collections::HashSet;

use anyhow::Result;
use time::OffsetDateTime;

use crate::outbox::queue::QueueStore;
use crate::outbox::record::ContactForm;
use crate::outbox::transport::ContactTransport;
use crate::outbox::SubmitStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub delivered: Vec<String>,
    pub remaining: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.attempted == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
    /// The record was no longer queued when the attempt started.
    Missing,
}

/// Attempts every queued record once, in stored order, and drops the ones
/// that went through. An empty or unreadable queue is left untouched.
pub fn reconcile(queue: &QueueStore, transport: &dyn ContactTransport) -> Result<ReconcileReport> {
    let snapshot = queue.load()?;
    if snapshot.is_empty() {
        return Ok(ReconcileReport::default());
    }

    let mut delivered = Vec::new();
    for record in &snapshot {
        match transport.deliver(&record.payload()) {
            Ok(()) => delivered.push(record.id.clone()),
            Err(err) => {
                tracing::debug!(id = %record.id, %err, "queued submission still undeliverable");
            }
        }
    }

    let remaining = if delivered.is_empty() {
        snapshot.len()
    } else {
        let ids: HashSet<String> = delivered.iter().cloned().collect();
        queue.retain_undelivered(&ids)?
    };

    let report = ReconcileReport {
        attempted: snapshot.len(),
        delivered,
        remaining,
    };
    tracing::info!(
        attempted = report.attempted,
        delivered = report.delivered.len(),
        remaining = report.remaining,
        "contact queue reconciled"
    );
    Ok(report)
}

/// Tries the endpoint once and queues the form when that fails. The form
/// itself is never touched.
pub fn submit_once(
    queue: &QueueStore,
    transport: &dyn ContactTransport,
    form: &ContactForm,
) -> SubmitStatus {
    let payload = form.payload();
    match transport.deliver(&payload) {
        Ok(()) => {
            tracing::info!(subject = %payload.subject, "contact submission sent");
            return SubmitStatus::Sent;
        }
        Err(err) => {
            tracing::info!(%err, "contact submission failed, queueing");
        }
    }

    match queue.enqueue(form, OffsetDateTime::now_utc()) {
        Ok(record) => SubmitStatus::Queued { id: record.id },
        Err(err) => {
            tracing::error!(?err, "failed to queue contact submission");
            SubmitStatus::Failed
        }
    }
}

/// Attempts the single record `id`, removing it from the queue on success.
pub fn deliver_one(
    queue: &QueueStore,
    transport: &dyn ContactTransport,
    id: &str,
) -> Result<DeliveryOutcome> {
    let Some(record) = queue.find(id)? else {
        return Ok(DeliveryOutcome::Missing);
    };
    match transport.deliver(&record.payload()) {
        Ok(()) => {
            queue.remove(id)?;
            tracing::info!(%id, "queued submission delivered in background");
            Ok(DeliveryOutcome::Delivered)
        }
        Err(err) => {
            tracing::debug!(%id, %err, "background delivery failed, leaving queued");
            Ok(DeliveryOutcome::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::queue::QUEUE_KEY;
    use crate::outbox::record::{ContactForm, ContactPayload};
    use crate::outbox::testing::SwitchTransport;
    use crate::outbox::transport::DeliveryError;
    use crate::storage::{LocalStore, MemoryStore};
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn queue_store() -> (MemoryStore, QueueStore) {
        let store = MemoryStore::new();
        let queue = QueueStore::new(Arc::new(store.clone()));
        (store, queue)
    }

    fn enqueue(queue: &QueueStore, subject: &str) -> anyhow::Result<String> {
        let form = ContactForm::new("Ada", "ada@example.com", subject, "Hello");
        Ok(queue.enqueue(&form, OffsetDateTime::now_utc())?.id)
    }

    /// Rejects one subject, accepts everything else.
    struct RejectSubject(&'static str);

    impl ContactTransport for RejectSubject {
        fn deliver(&self, payload: &ContactPayload) -> Result<(), DeliveryError> {
            if payload.subject == self.0 {
                Err(DeliveryError::Rejected { status: 500 })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn empty_or_absent_queue_writes_nothing() -> anyhow::Result<()> {
        let (store, queue) = queue_store();
        let transport = SwitchTransport::online();

        let report = reconcile(&queue, &transport)?;
        assert!(report.is_noop());
        assert_eq!(store.get_item(QUEUE_KEY)?, None);

        store.set_item(QUEUE_KEY, "[]")?;
        reconcile(&queue, &transport)?;
        assert_eq!(store.get_item(QUEUE_KEY)?.as_deref(), Some("[]"));

        store.set_item(QUEUE_KEY, "garbage")?;
        reconcile(&queue, &transport)?;
        assert_eq!(store.get_item(QUEUE_KEY)?.as_deref(), Some("garbage"));
        assert_eq!(transport.calls(), 0);
        Ok(())
    }

    #[test]
    fn failed_records_survive_in_original_order() -> anyhow::Result<()> {
        let (_store, queue) = queue_store();
        let a = enqueue(&queue, "a")?;
        let b = enqueue(&queue, "b")?;
        let c = enqueue(&queue, "c")?;
        let d = enqueue(&queue, "b")?;

        let report = reconcile(&queue, &RejectSubject("b"))?;
        assert_eq!(report.attempted, 4);
        assert_eq!(report.delivered, vec![a, c]);
        assert_eq!(report.remaining, 2);

        let ids: Vec<_> = queue.load()?.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b, d]);
        Ok(())
    }

    #[test]
    fn full_drain_removes_the_key() -> anyhow::Result<()> {
        let (store, queue) = queue_store();
        enqueue(&queue, "one")?;
        enqueue(&queue, "two")?;

        let transport = SwitchTransport::online();
        let report = reconcile(&queue, &transport)?;
        assert_eq!(report.remaining, 0);
        assert_eq!(transport.delivered_subjects(), vec!["one", "two"]);
        assert_eq!(store.get_item(QUEUE_KEY)?, None);
        Ok(())
    }

    #[test]
    fn reconciling_twice_matches_reconciling_once() -> anyhow::Result<()> {
        let (store, queue) = queue_store();
        enqueue(&queue, "keep")?;
        enqueue(&queue, "send")?;

        let transport = RejectSubject("keep");
        reconcile(&queue, &transport)?;
        let once = store.get_item(QUEUE_KEY)?;
        reconcile(&queue, &transport)?;
        assert_eq!(store.get_item(QUEUE_KEY)?, once);
        Ok(())
    }

    /// On its first call, lets a second reconciliation pass run to
    /// completion against a reachable endpoint, then reports failure for
    /// its own attempt.
    struct OverlappingPass {
        queue: QueueStore,
        inner: SwitchTransport,
        fired: std::sync::atomic::AtomicBool,
    }

    impl ContactTransport for OverlappingPass {
        fn deliver(&self, _payload: &ContactPayload) -> Result<(), DeliveryError> {
            if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                reconcile(&self.queue, &self.inner).expect("inner pass");
            }
            Err(DeliveryError::Transport("flaky network".into()))
        }
    }

    #[test]
    fn overlapping_pass_does_not_resurrect_delivered_record() -> anyhow::Result<()> {
        let (store, queue) = queue_store();
        enqueue(&queue, "raced")?;

        let transport = OverlappingPass {
            queue: queue.clone(),
            inner: SwitchTransport::online(),
            fired: Default::default(),
        };
        let report = reconcile(&queue, &transport)?;

        // The inner pass delivered and removed the record; the outer pass's
        // failed attempt must not write its stale snapshot back.
        assert_eq!(transport.inner.delivered_subjects(), vec!["raced"]);
        assert_eq!(report.delivered.len(), 0);
        assert_eq!(store.get_item(QUEUE_KEY)?, None);
        Ok(())
    }

    /// Appends a fresh submission while the pass is in flight.
    struct AppendDuringPass {
        queue: QueueStore,
    }

    impl ContactTransport for AppendDuringPass {
        fn deliver(&self, payload: &ContactPayload) -> Result<(), DeliveryError> {
            if payload.subject == "old" {
                enqueue(&self.queue, "new").expect("append");
            }
            Ok(())
        }
    }

    #[test]
    fn submission_queued_mid_pass_is_kept() -> anyhow::Result<()> {
        let (_store, queue) = queue_store();
        enqueue(&queue, "old")?;

        let report = reconcile(
            &queue,
            &AppendDuringPass {
                queue: queue.clone(),
            },
        )?;
        assert_eq!(report.delivered.len(), 1);
        let subjects: Vec<_> = queue.load()?.into_iter().map(|r| r.subject).collect();
        assert_eq!(subjects, vec!["new"]);
        Ok(())
    }

    #[test]
    fn deliver_one_only_touches_its_record() -> anyhow::Result<()> {
        let (_store, queue) = queue_store();
        let first = enqueue(&queue, "first")?;
        let second = enqueue(&queue, "second")?;

        let transport = SwitchTransport::offline();
        assert_eq!(
            deliver_one(&queue, &transport, &second)?,
            DeliveryOutcome::Failed
        );
        assert_eq!(queue.len()?, 2);

        transport.set_online(true);
        assert_eq!(
            deliver_one(&queue, &transport, &second)?,
            DeliveryOutcome::Delivered
        );
        assert_eq!(transport.delivered_subjects(), vec!["second"]);
        let ids: Vec<_> = queue.load()?.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first]);

        assert_eq!(
            deliver_one(&queue, &transport, &second)?,
            DeliveryOutcome::Missing
        );
        Ok(())
    }
}
