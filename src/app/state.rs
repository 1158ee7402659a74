use strum::{Display, EnumIter, IntoEnumIterator};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::config::ThemeFlag;
use crate::content::Profile;
use crate::outbox::{ContactForm, DeliveryPath, SubmitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum Section {
    #[default]
    Home,
    About,
    Skills,
    Projects,
    Experience,
    Contact,
}

impl Section {
    pub fn index(self) -> usize {
        Section::iter().position(|s| s == self).unwrap_or(0)
    }

    /// Sections are numbered from 1 in the navbar.
    pub fn from_hotkey(ch: char) -> Option<Self> {
        let n = ch.to_digit(10)? as usize;
        n.checked_sub(1).and_then(|idx| Section::iter().nth(idx))
    }

    pub fn offset(self, delta: isize) -> Self {
        let count = Section::iter().count() as isize;
        let idx = (self.index() as isize + delta).rem_euclid(count) as usize;
        Section::iter().nth(idx).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum FormField {
    #[default]
    Name,
    Email,
    Subject,
    Message,
}

impl FormField {
    pub fn next(self) -> Self {
        match self {
            FormField::Name => FormField::Email,
            FormField::Email => FormField::Subject,
            FormField::Subject => FormField::Message,
            FormField::Message => FormField::Name,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            FormField::Name => FormField::Message,
            FormField::Email => FormField::Name,
            FormField::Subject => FormField::Email,
            FormField::Message => FormField::Subject,
        }
    }

    pub fn is_multiline(self) -> bool {
        matches!(self, FormField::Message)
    }
}

/// Single text input with a byte cursor kept on grapheme boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInput {
    buffer: String,
    cursor: usize,
}

impl FieldInput {
    pub fn value(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set(&mut self, value: impl Into<String>) {
        self.buffer = value.into();
        self.cursor = self.buffer.len();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        self.buffer.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    pub fn delete(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.buffer.drain(self.cursor..next);
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = prev_grapheme_boundary(&self.buffer, self.cursor);
        true
    }

    pub fn move_right(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.cursor = next;
        true
    }

    pub fn move_home(&mut self) -> bool {
        let moved = self.cursor != 0;
        self.cursor = 0;
        moved
    }

    pub fn move_end(&mut self) -> bool {
        let moved = self.cursor != self.buffer.len();
        self.cursor = self.buffer.len();
        moved
    }

    /// Display column of the cursor on its own line, plus the line index.
    pub fn cursor_position(&self) -> (usize, usize) {
        let before = &self.buffer[..self.cursor];
        let row = before.matches('\n').count();
        let line = before.rsplit('\n').next().unwrap_or("");
        (row, UnicodeWidthStr::width(line))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContactFormState {
    name: FieldInput,
    email: FieldInput,
    subject: FieldInput,
    message: FieldInput,
    pub focused: FormField,
    revision: u64,
}

impl ContactFormState {
    pub fn field(&self, field: FormField) -> &FieldInput {
        match field {
            FormField::Name => &self.name,
            FormField::Email => &self.email,
            FormField::Subject => &self.subject,
            FormField::Message => &self.message,
        }
    }

    fn field_mut(&mut self, field: FormField) -> &mut FieldInput {
        match field {
            FormField::Name => &mut self.name,
            FormField::Email => &mut self.email,
            FormField::Subject => &mut self.subject,
            FormField::Message => &mut self.message,
        }
    }

    pub fn focused_input(&self) -> &FieldInput {
        self.field(self.focused)
    }

    /// Applies an edit to the focused field, bumping the revision when the
    /// text changed.
    pub fn edit<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut FieldInput) -> bool,
    {
        let focused = self.focused;
        let input = self.field_mut(focused);
        let snapshot = input.value().to_owned();
        let changed = f(input) && input.value() != snapshot;
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Cursor-only movement never touches the revision.
    pub fn navigate<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut FieldInput) -> bool,
    {
        let focused = self.focused;
        f(self.field_mut(focused))
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn to_form(&self) -> ContactForm {
        ContactForm::new(
            self.name.value(),
            self.email.value(),
            self.subject.value(),
            self.message.value(),
        )
    }

    pub fn clear(&mut self) {
        for field in FormField::iter() {
            self.field_mut(field).clear();
        }
        self.focused = FormField::Name;
        self.revision += 1;
    }
}

/// The queued submission whose background delivery would still be news to
/// the user.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AwaitingDelivery {
    id: String,
    revision: u64,
}

pub struct AppState {
    pub section: Section,
    pub theme: ThemeFlag,
    pub profile: Profile,
    pub form: ContactFormState,
    form_active: bool,
    submit_status: Option<SubmitStatus>,
    /// Form revision the in-flight submission was taken from.
    submitting: Option<u64>,
    awaiting: Option<AwaitingDelivery>,
    pending_count: usize,
    status_message: Option<String>,
}

impl AppState {
    pub fn new(profile: Profile, theme: ThemeFlag) -> Self {
        Self {
            section: Section::default(),
            theme,
            profile,
            form: ContactFormState::default(),
            form_active: false,
            submit_status: None,
            submitting: None,
            awaiting: None,
            pending_count: 0,
            status_message: None,
        }
    }

    pub fn select_section(&mut self, section: Section) {
        self.section = section;
        if section != Section::Contact {
            self.form_active = false;
        }
    }

    pub fn move_section(&mut self, delta: isize) {
        self.select_section(self.section.offset(delta));
    }

    pub fn is_form_active(&self) -> bool {
        self.form_active
    }

    pub fn begin_form(&mut self) {
        self.section = Section::Contact;
        self.form_active = true;
    }

    pub fn leave_form(&mut self) {
        self.form_active = false;
    }

    /// Returns the form when every field is filled in, otherwise reports
    /// the blanks in the status line.
    pub fn validated_form(&mut self) -> Option<ContactForm> {
        let form = self.form.to_form();
        let missing = form.missing_fields();
        if missing.is_empty() {
            return Some(form);
        }
        self.set_status_message(Some(format!("Please fill in: {}", missing.join(", "))));
        if let Some(first) = FormField::iter().find(|f| missing.contains(&field_label(*f))) {
            self.form.focused = first;
        }
        None
    }

    pub fn begin_submit(&mut self) {
        self.awaiting = None;
        self.submitting = Some(self.form.revision());
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.is_some()
    }

    /// Edits made while the attempt was in flight survive a `Sent`.
    pub fn apply_submit(&mut self, status: SubmitStatus) {
        self.awaiting = None;
        let revision = self.submitting.take().unwrap_or(self.form.revision());
        match &status {
            SubmitStatus::Sent if revision == self.form.revision() => self.form.clear(),
            SubmitStatus::Sent => {
                tracing::debug!("form edited while sending, keeping the new text");
            }
            SubmitStatus::Queued { id } => {
                self.awaiting = Some(AwaitingDelivery {
                    id: id.clone(),
                    revision,
                });
                self.pending_count += 1;
            }
            SubmitStatus::Failed => {}
        }
        self.submit_status = Some(status);
    }

    /// A background delivery only updates the visible status while the form
    /// still shows the submission that was queued.
    pub fn on_delivered(&mut self, id: &str, path: DeliveryPath) -> bool {
        let current = self
            .awaiting
            .as_ref()
            .map(|a| a.id == id && a.revision == self.form.revision())
            .unwrap_or(false);
        if !current {
            tracing::debug!(%id, ?path, "delivery of stale submission, status untouched");
            return false;
        }
        self.awaiting = None;
        self.form.clear();
        self.submit_status = Some(SubmitStatus::Sent);
        true
    }

    pub fn submit_status(&self) -> Option<&SubmitStatus> {
        self.submit_status.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    pub fn set_pending_count(&mut self, count: usize) {
        self.pending_count = count;
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }
}

pub fn field_label(field: FormField) -> &'static str {
    match field {
        FormField::Name => "name",
        FormField::Email => "email",
        FormField::Subject => "subject",
        FormField::Message => "message",
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in text[..cursor].grapheme_indices(true) {
        last = idx;
    }
    last
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor >= text.len() {
        return text.len();
    }
    text[cursor..]
        .graphemes(true)
        .next()
        .map(|g| cursor + g.len())
        .unwrap_or(text.len())
}
