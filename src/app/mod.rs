use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::config::ThemeFlag;
use crate::content::Profile;
use crate::outbox::{Outbox, OutboxEvent, RetryTrigger, SubmitStatus, SubmitTicket};
use crate::storage::LocalStore;
use crate::ui;

mod actions;
pub mod state;

pub use state::{AppState, ContactFormState, FieldInput, FormField, Section};

enum Action {
    Quit,
    NextSection,
    PreviousSection,
    GoTo(Section),
    ToggleTheme,
    OpenForm,
    Submit,
    RetryNow,
}

pub struct App {
    store: Arc<dyn LocalStore>,
    outbox: Outbox,
    state: AppState,
    in_flight: Option<SubmitTicket>,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(
        store: Arc<dyn LocalStore>,
        outbox: Outbox,
        profile: Profile,
        default_theme: ThemeFlag,
    ) -> Result<Self> {
        let theme = ThemeFlag::load(store.as_ref(), default_theme)
            .context("loading persisted theme")?;
        let mut state = AppState::new(profile, theme);
        state.set_pending_count(outbox.pending_count().context("counting queued messages")?);
        Ok(Self {
            store,
            outbox,
            state,
            in_flight: None,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    /// Stops the outbox worker once outstanding deliveries have finished.
    pub fn shutdown(self) -> Result<()> {
        self.outbox.shutdown()
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| ui::draw_app(frame, &self.state))
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                let event = event::read().context("reading terminal event")?;
                self.handle_event(event);
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Key(key) => self.handle_key(key),
            Event::FocusGained => {
                self.outbox.notify(RetryTrigger::Visibility { visible: true });
                self.outbox.notify(RetryTrigger::Focus);
            }
            Event::FocusLost => {
                self.outbox
                    .notify(RetryTrigger::Visibility { visible: false });
            }
            _ => {}
        }
    }

    fn on_tick(&mut self) {
        let mut refresh = self.poll_submission();
        while let Some(event) = self.outbox.poll_event() {
            self.handle_outbox_event(event);
            refresh = true;
        }
        if refresh {
            self.refresh_pending();
        }
    }

    fn handle_outbox_event(&mut self, event: OutboxEvent) {
        match event {
            OutboxEvent::Delivered { id, path } => {
                if self.state.on_delivered(&id, path) {
                    self.state.set_status_message(None::<String>);
                }
            }
            OutboxEvent::Reconciled(report) => {
                if !report.delivered.is_empty() {
                    self.state.set_status_message(Some(format!(
                        "Delivered {} queued message(s), {} still waiting",
                        report.delivered.len(),
                        report.remaining
                    )));
                }
            }
            OutboxEvent::Error { message } => {
                tracing::warn!(%message, "outbox error");
                self.state
                    .set_status_message(Some("Retrying queued messages failed; see logs"));
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.state.is_form_active() && self.handle_form_key(key) {
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Char('q') if plain => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Submit)
            }
            KeyCode::Char(ch @ '1'..='9') if plain => Section::from_hotkey(ch).map(Action::GoTo),
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('l') => Some(Action::NextSection),
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('h') => Some(Action::PreviousSection),
            KeyCode::Char('t') if plain => Some(Action::ToggleTheme),
            KeyCode::Char('r') if plain => Some(Action::RetryNow),
            KeyCode::Char('c') | KeyCode::Char('i') if plain => Some(Action::OpenForm),
            KeyCode::Enter if self.state.section == Section::Contact => Some(Action::OpenForm),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        let dispatcher = actions::ActionDispatcher::new(self.store.as_ref(), &self.outbox);
        match action {
            Action::Quit => self.should_quit = true,
            Action::NextSection => self.state.move_section(1),
            Action::PreviousSection => self.state.move_section(-1),
            Action::GoTo(section) => self.state.select_section(section),
            Action::ToggleTheme => match dispatcher.toggle_theme(self.state.theme) {
                Ok(theme) => self.state.theme = theme,
                Err(err) => {
                    tracing::error!(?err, "failed to persist theme");
                    self.state
                        .set_status_message(Some("Could not save theme preference"));
                }
            },
            Action::OpenForm => {
                self.state.begin_form();
                self.state
                    .set_status_message(Some("Editing message: Ctrl-s to send, Esc to leave"));
            }
            Action::Submit => self.handle_submit(),
            Action::RetryNow => {
                dispatcher.retry_now();
                self.state.set_status_message(Some("Retrying queued messages"));
            }
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('s') => {
                    self.handle_submit();
                    true
                }
                _ => false,
            };
        }

        let form = &mut self.state.form;
        match key.code {
            KeyCode::Esc => {
                self.state.leave_form();
                self.state.set_status_message(None::<String>);
            }
            KeyCode::Tab | KeyCode::Down => form.focused = form.focused.next(),
            KeyCode::BackTab | KeyCode::Up => form.focused = form.focused.previous(),
            KeyCode::Enter if form.focused.is_multiline() => {
                form.edit(|input| input.insert_char('\n'));
            }
            KeyCode::Enter => form.focused = form.focused.next(),
            KeyCode::Backspace => {
                form.edit(FieldInput::backspace);
            }
            KeyCode::Delete => {
                form.edit(FieldInput::delete);
            }
            KeyCode::Left => {
                form.navigate(FieldInput::move_left);
            }
            KeyCode::Right => {
                form.navigate(FieldInput::move_right);
            }
            KeyCode::Home => {
                form.navigate(FieldInput::move_home);
            }
            KeyCode::End => {
                form.navigate(FieldInput::move_end);
            }
            KeyCode::Char(ch) if !key.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SUPER) => {
                form.edit(|input| input.insert_char(ch));
            }
            _ => return false,
        }
        true
    }

    fn handle_submit(&mut self) {
        if self.in_flight.is_some() {
            self.state
                .set_status_message(Some("Still sending the previous message"));
            return;
        }
        let Some(form) = self.state.validated_form() else {
            self.state.begin_form();
            return;
        };
        let dispatcher = actions::ActionDispatcher::new(self.store.as_ref(), &self.outbox);
        match dispatcher.submit(form) {
            Ok(ticket) => {
                self.state.begin_submit();
                self.state.set_status_message(Some("Sending message..."));
                self.in_flight = Some(ticket);
            }
            Err(err) => {
                tracing::error!(?err, "could not start contact submission");
                self.state.set_status_message(None::<String>);
                self.state.apply_submit(SubmitStatus::Failed);
            }
        }
    }

    /// Picks up the first attempt's status once it has settled.
    fn poll_submission(&mut self) -> bool {
        let Some(status) = self.in_flight.as_ref().and_then(SubmitTicket::poll) else {
            return false;
        };
        self.in_flight = None;
        tracing::debug!(?status, "contact form submitted");
        self.state.set_status_message(None::<String>);
        self.state.apply_submit(status);
        true
    }

    fn refresh_pending(&mut self) {
        let dispatcher = actions::ActionDispatcher::new(self.store.as_ref(), &self.outbox);
        match dispatcher.pending_count() {
            Ok(count) => self.state.set_pending_count(count),
            Err(err) => tracing::warn!(?err, "failed to count queued messages"),
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableFocusChange
    )
    .context("restoring screen state")?;
    Ok(())
}
