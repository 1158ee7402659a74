use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use time::OffsetDateTime;

use crate::outbox::record::{ContactForm, PendingSubmission};
use crate::storage::{LocalStore, SlotUpdate};

pub const QUEUE_KEY: &str = "contact_messages";

/// The persisted queue of submissions that still need delivery.
///
/// Every mutation is a single atomic read-modify-write on the store slot,
/// so appends, removals and reconciliation write-backs from different
/// threads or processes never overwrite each other.
#[derive(Clone)]
pub struct QueueStore {
    store: Arc<dyn LocalStore>,
}

impl QueueStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Current queue contents in stored order. Absent or malformed values
    /// read as empty.
    pub fn load(&self) -> Result<Vec<PendingSubmission>> {
        let raw = self.store.get_item(QUEUE_KEY)?;
        Ok(parse_queue(raw.as_deref()))
    }

    pub fn len(&self) -> Result<usize> {
        self.load().map(|queue| queue.len())
    }

    pub fn find(&self, id: &str) -> Result<Option<PendingSubmission>> {
        Ok(self.load()?.into_iter().find(|record| record.id == id))
    }

    /// Appends a record built from `form`, assigning an id derived from
    /// `now` that no other queued record carries.
    pub fn enqueue(&self, form: &ContactForm, now: OffsetDateTime) -> Result<PendingSubmission> {
        let mut appended = None;
        self.store.update_item(QUEUE_KEY, &mut |current| {
            let mut queue = parse_queue(current.as_deref());
            let id = next_id(now, &queue);
            let record = PendingSubmission::from_form(id, form, now);
            queue.push(record.clone());
            appended = Some(record);
            Ok(SlotUpdate::Set(encode_queue(&queue)?))
        })?;
        let record = appended.context("queue update did not run")?;
        tracing::info!(id = %record.id, "queued contact submission");
        Ok(record)
    }

    /// Drops the record with `id`. Returns whether it was still queued.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let (removed, _) = self.drop_ids(&HashSet::from([id.to_string()]))?;
        Ok(removed > 0)
    }

    /// Removes every record whose id is in `delivered` from the value
    /// currently stored (not from an earlier snapshot) and returns how
    /// many records remain. The key is removed once nothing is left.
    pub fn retain_undelivered(&self, delivered: &HashSet<String>) -> Result<usize> {
        let (_, remaining) = self.drop_ids(delivered)?;
        Ok(remaining)
    }

    fn drop_ids(&self, ids: &HashSet<String>) -> Result<(usize, usize)> {
        let mut removed = 0;
        let mut remaining = 0;
        self.store.update_item(QUEUE_KEY, &mut |current| {
            let mut queue = parse_queue(current.as_deref());
            let before = queue.len();
            queue.retain(|record| !ids.contains(&record.id));
            removed = before - queue.len();
            remaining = queue.len();
            if removed == 0 {
                return Ok(SlotUpdate::Keep);
            }
            if queue.is_empty() {
                Ok(SlotUpdate::Remove)
            } else {
                Ok(SlotUpdate::Set(encode_queue(&queue)?))
            }
        })?;
        Ok((removed, remaining))
    }
}

fn parse_queue(raw: Option<&str>) -> Vec<PendingSubmission> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<PendingSubmission>>(raw) {
        Ok(queue) => queue,
        Err(err) => {
            tracing::warn!(%err, "stored contact queue is malformed, treating as empty");
            Vec::new()
        }
    }
}

fn encode_queue(queue: &[PendingSubmission]) -> Result<String> {
    serde_json::to_string(queue).context("serialising contact queue")
}

fn next_id(now: OffsetDateTime, queue: &[PendingSubmission]) -> String {
    let taken: HashSet<&str> = queue.iter().map(|record| record.id.as_str()).collect();
    let mut millis = now.unix_timestamp_nanos() / 1_000_000;
    loop {
        let candidate = millis.to_string();
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        millis += 1;
    }
}
