use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, never, select, tick, unbounded, Receiver, Sender};
use strum::Display;

use crate::outbox::probe::ReachabilityProbe;
use crate::outbox::queue::QueueStore;
use crate::outbox::reconcile::{
    deliver_one, reconcile, submit_once, DeliveryOutcome, ReconcileReport,
};
use crate::outbox::record::ContactForm;
use crate::outbox::transport::ContactTransport;
use crate::outbox::SubmitStatus;

const EVENT_CAPACITY: usize = 64;

/// Event sources that ask for the queue to be drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RetryTrigger {
    Mount,
    Focus,
    Visibility { visible: bool },
    Online,
    Interval,
}

impl RetryTrigger {
    /// Becoming hidden is the only trigger that does not reconcile.
    pub fn wants_reconcile(self) -> bool {
        !matches!(self, RetryTrigger::Visibility { visible: false })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Background,
    Reconcile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    Delivered { id: String, path: DeliveryPath },
    Reconciled(ReconcileReport),
    Error { message: String },
}

#[derive(Debug)]
enum Command {
    Trigger(RetryTrigger),
    Deliver(String),
    Submit {
        form: ContactForm,
        background_retry: bool,
        reply: Sender<SubmitStatus>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub retry_interval: Duration,
    pub reconcile_on_mount: bool,
    pub probe: Option<ReachabilityProbe>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(10),
            reconcile_on_mount: true,
            probe: None,
        }
    }
}

/// Cloneable handle for raising triggers from other threads (signal
/// handlers, UI event loops).
#[derive(Debug, Clone)]
pub struct TriggerSender {
    commands: Sender<Command>,
}

impl TriggerSender {
    pub fn notify(&self, trigger: RetryTrigger) {
        if self.commands.send(Command::Trigger(trigger)).is_err() {
            tracing::debug!(%trigger, "outbox worker gone, dropping trigger");
        }
    }
}

/// Owns the contact queue's delivery side: every reconciliation pass and
/// background delivery runs on this one thread, in arrival order. Triggers
/// that arrive while a pass is pending are folded into it.
///
/// Dropping the worker stops the timer, the probe and the thread.
pub struct OutboxWorker {
    commands: Sender<Command>,
    events: Receiver<OutboxEvent>,
    thread: Option<JoinHandle<()>>,
}

impl OutboxWorker {
    pub fn spawn(
        queue: QueueStore,
        transport: Arc<dyn ContactTransport>,
        options: WorkerOptions,
    ) -> Result<Self> {
        let (commands_tx, commands_rx) = unbounded();
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        let runner = Runner {
            queue,
            transport,
            commands: commands_rx,
            events: events_tx,
        };
        let thread = thread::Builder::new()
            .name("folio-outbox".into())
            .spawn(move || runner.run(options))
            .context("spawning outbox worker thread")?;
        Ok(Self {
            commands: commands_tx,
            events: events_rx,
            thread: Some(thread),
        })
    }

    pub fn notify(&self, trigger: RetryTrigger) {
        self.trigger_sender().notify(trigger);
    }

    pub fn trigger_sender(&self) -> TriggerSender {
        TriggerSender {
            commands: self.commands.clone(),
        }
    }

    /// Fire-and-forget delivery of one queued record. The outcome lands in
    /// the store and on the event channel only.
    pub fn deliver_in_background(&self, id: impl Into<String>) {
        let id = id.into();
        if self.commands.send(Command::Deliver(id.clone())).is_err() {
            tracing::warn!(%id, "outbox worker gone, background delivery skipped");
        }
    }

    /// Runs the first attempt for `form` on the worker thread. The status
    /// arrives on the returned channel; a queued record then gets its one
    /// background attempt when `background_retry` is set.
    pub fn submit(&self, form: ContactForm, background_retry: bool) -> Receiver<SubmitStatus> {
        let (reply, status) = bounded(1);
        let command = Command::Submit {
            form,
            background_retry,
            reply,
        };
        if self.commands.send(command).is_err() {
            tracing::warn!("outbox worker gone, submission not attempted");
        }
        status
    }

    pub fn events(&self) -> &Receiver<OutboxEvent> {
        &self.events
    }

    /// Stops after every command sent so far has been handled, including a
    /// reconciliation that triggers already asked for.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Shutdown);
        thread
            .join()
            .map_err(|_| anyhow::anyhow!("outbox worker thread panicked"))
    }
}

impl Drop for OutboxWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(?err, "failed to stop outbox worker");
        }
    }
}

struct Runner {
    queue: QueueStore,
    transport: Arc<dyn ContactTransport>,
    commands: Receiver<Command>,
    events: Sender<OutboxEvent>,
}

impl Runner {
    fn run(self, options: WorkerOptions) {
        let ticker = tick(options.retry_interval);
        let mut probe = options.probe;
        let probe_ticker = probe
            .as_ref()
            .map(|probe| tick(probe.interval()))
            .unwrap_or_else(never);

        let mut pending = options.reconcile_on_mount.then_some(RetryTrigger::Mount);
        tracing::debug!("outbox worker started");
        loop {
            if let Some(trigger) = pending.take() {
                self.reconcile(trigger);
            }

            let keep_running = select! {
                recv(self.commands) -> msg => match msg {
                    Ok(command) => self.apply(command, &mut pending),
                    Err(_) => false,
                },
                recv(ticker) -> _ => {
                    pending.get_or_insert(RetryTrigger::Interval);
                    true
                },
                recv(probe_ticker) -> _ => {
                    if probe.as_mut().map(ReachabilityProbe::came_online).unwrap_or(false) {
                        tracing::info!("contact endpoint reachable again");
                        pending.get_or_insert(RetryTrigger::Online);
                    }
                    true
                },
            };
            if !keep_running {
                break;
            }

            let mut keep_running = true;
            while let Ok(command) = self.commands.try_recv() {
                if !self.apply(command, &mut pending) {
                    keep_running = false;
                    break;
                }
            }
            if !keep_running {
                break;
            }
        }
        if let Some(trigger) = pending.take() {
            self.reconcile(trigger);
        }
        tracing::debug!("outbox worker stopped");
    }

    fn apply(&self, command: Command, pending: &mut Option<RetryTrigger>) -> bool {
        match command {
            Command::Trigger(trigger) => {
                if trigger.wants_reconcile() {
                    if pending.is_some() {
                        tracing::trace!(%trigger, "coalesced into pending reconciliation");
                    }
                    pending.get_or_insert(trigger);
                }
                true
            }
            Command::Deliver(id) => {
                self.deliver(id);
                true
            }
            Command::Submit {
                form,
                background_retry,
                reply,
            } => {
                let status = submit_once(&self.queue, self.transport.as_ref(), &form);
                let queued = status.queued_id().map(str::to_owned);
                if reply.send(status).is_err() {
                    tracing::debug!("submitter went away before the status arrived");
                }
                if let (true, Some(id)) = (background_retry, queued) {
                    self.deliver(id);
                }
                true
            }
            Command::Shutdown => false,
        }
    }

    fn reconcile(&self, trigger: RetryTrigger) {
        tracing::debug!(%trigger, "reconciling contact queue");
        match reconcile(&self.queue, self.transport.as_ref()) {
            Ok(report) => {
                for id in &report.delivered {
                    self.emit(OutboxEvent::Delivered {
                        id: id.clone(),
                        path: DeliveryPath::Reconcile,
                    });
                }
                if !report.is_noop() {
                    self.emit(OutboxEvent::Reconciled(report));
                }
            }
            Err(err) => {
                tracing::warn!(?err, %trigger, "contact queue reconciliation failed");
                self.emit(OutboxEvent::Error {
                    message: format!("{err:#}"),
                });
            }
        }
    }

    fn deliver(&self, id: String) {
        match deliver_one(&self.queue, self.transport.as_ref(), &id) {
            Ok(DeliveryOutcome::Delivered) => self.emit(OutboxEvent::Delivered {
                id,
                path: DeliveryPath::Background,
            }),
            Ok(DeliveryOutcome::Failed) | Ok(DeliveryOutcome::Missing) => {}
            Err(err) => {
                tracing::warn!(?err, %id, "background delivery errored");
                self.emit(OutboxEvent::Error {
                    message: format!("{err:#}"),
                });
            }
        }
    }

    fn emit(&self, event: OutboxEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("outbox event dropped, nobody is listening");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::queue::QUEUE_KEY;
    use crate::outbox::record::ContactForm;
    use crate::outbox::testing::SwitchTransport;
    use crate::storage::{LocalStore, MemoryStore};
    use assert_matches::assert_matches;
    use std::net::TcpListener;
    use time::OffsetDateTime;
    use url::Url;

    const WAIT: Duration = Duration::from_secs(5);

    fn quiet_options() -> WorkerOptions {
        WorkerOptions {
            retry_interval: Duration::from_secs(3600),
            reconcile_on_mount: false,
            probe: None,
        }
    }

    fn seeded(subjects: &[&str]) -> anyhow::Result<(MemoryStore, QueueStore, Vec<String>)> {
        let store = MemoryStore::new();
        let queue = QueueStore::new(Arc::new(store.clone()));
        let mut ids = Vec::new();
        for subject in subjects {
            let form = ContactForm::new("Ada", "ada@example.com", *subject, "Hello");
            ids.push(queue.enqueue(&form, OffsetDateTime::now_utc())?.id);
        }
        Ok((store, queue, ids))
    }

    fn next_report(worker: &OutboxWorker) -> anyhow::Result<ReconcileReport> {
        loop {
            match worker.events().recv_timeout(WAIT)? {
                OutboxEvent::Reconciled(report) => return Ok(report),
                OutboxEvent::Delivered { .. } => continue,
                other => anyhow::bail!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn hidden_visibility_does_not_reconcile() {
        assert!(!RetryTrigger::Visibility { visible: false }.wants_reconcile());
        assert!(RetryTrigger::Visibility { visible: true }.wants_reconcile());
        assert!(RetryTrigger::Focus.wants_reconcile());
        assert_eq!(RetryTrigger::Interval.to_string(), "interval");
    }

    #[test]
    fn visible_trigger_drains_queue_when_online() -> anyhow::Result<()> {
        let (store, queue, _ids) = seeded(&["first", "second"])?;
        let transport = Arc::new(SwitchTransport::online());
        let worker = OutboxWorker::spawn(queue, transport.clone(), quiet_options())?;

        worker.notify(RetryTrigger::Visibility { visible: true });
        let report = next_report(&worker)?;
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(transport.delivered_subjects(), vec!["first", "second"]);
        assert_eq!(store.get_item(QUEUE_KEY)?, None);
        worker.shutdown()
    }

    #[test]
    fn focus_while_offline_keeps_record_intact() -> anyhow::Result<()> {
        let (_store, queue, ids) = seeded(&["waiting"])?;
        let before = queue.load()?;
        let worker = OutboxWorker::spawn(
            queue.clone(),
            Arc::new(SwitchTransport::offline()),
            quiet_options(),
        )?;

        worker.notify(RetryTrigger::Focus);
        let report = next_report(&worker)?;
        assert_eq!(report.attempted, 1);
        assert!(report.delivered.is_empty());
        worker.shutdown()?;

        let after = queue.load()?;
        assert_eq!(after, before);
        assert_eq!(after[0].id, ids[0]);
        Ok(())
    }

    #[test]
    fn mount_reconciles_without_a_trigger() -> anyhow::Result<()> {
        let (_store, queue, ids) = seeded(&["left over"])?;
        let options = WorkerOptions {
            reconcile_on_mount: true,
            ..quiet_options()
        };
        let worker = OutboxWorker::spawn(queue, Arc::new(SwitchTransport::online()), options)?;

        let event = worker.events().recv_timeout(WAIT)?;
        assert_eq!(
            event,
            OutboxEvent::Delivered {
                id: ids[0].clone(),
                path: DeliveryPath::Reconcile,
            }
        );
        Ok(())
    }

    #[test]
    fn interval_retries_until_endpoint_recovers() -> anyhow::Result<()> {
        let (store, queue, _ids) = seeded(&["patient"])?;
        let transport = Arc::new(SwitchTransport::offline());
        let options = WorkerOptions {
            retry_interval: Duration::from_millis(20),
            ..quiet_options()
        };
        let worker = OutboxWorker::spawn(queue, transport.clone(), options)?;

        let report = next_report(&worker)?;
        assert!(report.delivered.is_empty());

        transport.set_online(true);
        loop {
            let report = next_report(&worker)?;
            if !report.delivered.is_empty() {
                break;
            }
        }
        assert_eq!(store.get_item(QUEUE_KEY)?, None);
        worker.shutdown()
    }

    #[test]
    fn background_delivery_reports_its_id() -> anyhow::Result<()> {
        let (_store, queue, ids) = seeded(&["one", "two"])?;
        let transport = Arc::new(SwitchTransport::online());
        let worker = OutboxWorker::spawn(queue.clone(), transport.clone(), quiet_options())?;

        worker.deliver_in_background(ids[1].clone());
        assert_matches!(
            worker.events().recv_timeout(WAIT)?,
            OutboxEvent::Delivered { id, path: DeliveryPath::Background } if id == ids[1]
        );
        worker.shutdown()?;

        assert_eq!(transport.delivered_subjects(), vec!["two"]);
        let remaining: Vec<_> = queue.load()?.into_iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec![ids[0].clone()]);
        Ok(())
    }

    #[test]
    fn shutdown_after_hidden_visibility_never_calls_transport() -> anyhow::Result<()> {
        let (_store, queue, _ids) = seeded(&["idle"])?;
        let transport = Arc::new(SwitchTransport::online());
        let worker = OutboxWorker::spawn(queue, transport.clone(), quiet_options())?;

        worker.notify(RetryTrigger::Visibility { visible: false });
        worker.shutdown()?;
        assert_eq!(transport.calls(), 0);
        Ok(())
    }

    #[test]
    fn reachable_endpoint_triggers_online_reconcile() -> anyhow::Result<()> {
        let (store, queue, ids) = seeded(&["stranded"])?;
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let endpoint = Url::parse(&format!("http://{addr}/api/contact"))?;
        let transport = Arc::new(SwitchTransport::online());
        let options = WorkerOptions {
            probe: Some(ReachabilityProbe::new(endpoint, Duration::from_millis(20))),
            ..quiet_options()
        };
        let worker = OutboxWorker::spawn(queue, transport.clone(), options)?;

        // Several reachability checks see the port closed first.
        thread::sleep(Duration::from_millis(150));
        assert_eq!(transport.calls(), 0);

        let _listener = TcpListener::bind(addr)?;
        assert_eq!(
            worker.events().recv_timeout(WAIT)?,
            OutboxEvent::Delivered {
                id: ids[0].clone(),
                path: DeliveryPath::Reconcile,
            }
        );
        worker.shutdown()?;
        assert_eq!(store.get_item(QUEUE_KEY)?, None);
        Ok(())
    }

    #[test]
    fn shutdown_runs_a_reconcile_already_asked_for() -> anyhow::Result<()> {
        let (store, queue, _ids) = seeded(&["last call"])?;
        let transport = Arc::new(SwitchTransport::online());
        let worker = OutboxWorker::spawn(queue, transport.clone(), quiet_options())?;

        worker.notify(RetryTrigger::Focus);
        worker.shutdown()?;
        assert_eq!(transport.calls(), 1);
        assert_eq!(store.get_item(QUEUE_KEY)?, None);
        Ok(())
    }

    #[test]
    fn submit_replies_then_retries_in_background() -> anyhow::Result<()> {
        let (store, queue, _ids) = seeded(&[])?;
        let transport = Arc::new(SwitchTransport::offline());
        let worker = OutboxWorker::spawn(queue.clone(), transport.clone(), quiet_options())?;

        let form = ContactForm::new("Ada", "ada@example.com", "Hi", "Hello");
        let status = worker.submit(form, true).recv_timeout(WAIT)?;
        let id = status.queued_id().map(str::to_owned);
        assert!(id.is_some());
        worker.shutdown()?;

        // First attempt plus the background one, both offline.
        assert_eq!(transport.calls(), 2);
        let queued: Vec<_> = queue.load()?.into_iter().map(|r| Some(r.id)).collect();
        assert_eq!(queued, vec![id]);
        assert!(store.get_item(QUEUE_KEY)?.is_some());
        Ok(())
    }

    #[test]
    fn dropping_worker_joins_its_thread() -> anyhow::Result<()> {
        let (_store, queue, _ids) = seeded(&[])?;
        let transport = Arc::new(SwitchTransport::online());
        let worker = OutboxWorker::spawn(queue, transport.clone(), quiet_options())?;
        let triggers = worker.trigger_sender();
        assert_eq!(Arc::strong_count(&transport), 2);

        drop(worker);
        assert_eq!(Arc::strong_count(&transport), 1);
        // Senders outliving the worker are harmless.
        triggers.notify(RetryTrigger::Online);
        Ok(())
    }
}
