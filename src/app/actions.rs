use anyhow::Result;

use crate::config::ThemeFlag;
use crate::outbox::{ContactForm, Outbox, RetryTrigger, SubmitTicket};
use crate::storage::LocalStore;

pub struct ActionDispatcher<'a> {
    store: &'a dyn LocalStore,
    outbox: &'a Outbox,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(store: &'a dyn LocalStore, outbox: &'a Outbox) -> Self {
        Self { store, outbox }
    }

    pub fn toggle_theme(&self, current: ThemeFlag) -> Result<ThemeFlag> {
        current.toggle(self.store)
    }

    pub fn submit(&self, form: ContactForm) -> Result<SubmitTicket> {
        self.outbox.begin_submit(form)
    }

    pub fn retry_now(&self) {
        self.outbox.notify(RetryTrigger::Focus);
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.outbox.pending_count()
    }
}
