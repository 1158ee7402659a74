use std::fmt::Write as _;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use crossbeam_channel::{bounded, never, select};
use time::format_description::well_known::Rfc3339;

use crate::app::App;
use crate::config::{AppConfig, ThemeFlag};
use crate::content::Profile;
use crate::outbox::{
    ContactForm, HttpTransport, Outbox, OutboxEvent, PendingSubmission, QueueStore,
    SubmitStatus, WorkerOptions,
};
use crate::storage::LocalStore;

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Sender name
    #[arg(long)]
    pub name: String,
    /// Reply-to address
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub subject: String,
    /// Message body inline. If omitted, reads from stdin.
    #[arg(long)]
    pub message: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ThemeCommand {
    /// Print the current theme (default)
    Show,
    /// Switch between dark and light
    Toggle,
    /// Set the theme explicitly
    Set {
        /// dark or light
        theme: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ThemeArgs {
    #[command(subcommand)]
    pub command: Option<ThemeCommand>,
}

pub fn run_tui(config: Arc<AppConfig>, store: Arc<dyn LocalStore>) -> Result<()> {
    let profile = Profile::load(config.profile_path.as_deref()).context("loading profile")?;
    let outbox = Outbox::from_config(store.clone(), &config, WorkerOptions::from_config(&config)?)
        .context("starting contact outbox")?;
    let mut app = App::new(store, outbox, profile, config.default_theme)?;
    let result = app.run();
    app.shutdown()?;
    result
}

pub fn send_message(
    config: &AppConfig,
    store: Arc<dyn LocalStore>,
    args: SendArgs,
) -> Result<String> {
    let message = match args.message {
        Some(message) => message,
        None => read_stdin()?.unwrap_or_default(),
    };
    let mut form = ContactForm::new(args.name, args.email, args.subject, message);
    let missing = form.missing_fields();
    if !missing.is_empty() {
        bail!("missing required field(s): {}", missing.join(", "));
    }

    // One background attempt after queueing; no mount pass or timers.
    let options = WorkerOptions {
        reconcile_on_mount: false,
        probe: None,
        ..WorkerOptions::from_config(config)?
    };
    let outbox = Outbox::from_config(store, config, options)?;
    let status = outbox.submit(&mut form);
    outbox.shutdown()?;

    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", status.message());
    match &status {
        SubmitStatus::Queued { id } => {
            let _ = writeln!(&mut out, "Queued as {id}.");
        }
        SubmitStatus::Failed => bail!("{}", out.trim_end()),
        SubmitStatus::Sent => {}
    }
    Ok(out)
}

pub fn sync_queue(config: &AppConfig, store: Arc<dyn LocalStore>) -> Result<String> {
    let transport = Arc::new(HttpTransport::new(&config.contact)?);
    let outbox = Outbox::detached(store, transport);
    let report = outbox.sync_now().context("reconciling contact queue")?;
    if report.is_noop() {
        return Ok("No queued messages.\n".to_string());
    }
    Ok(format!(
        "Delivered {} of {} queued message(s); {} remaining.\n",
        report.delivered.len(),
        report.attempted,
        report.remaining
    ))
}

pub fn list_queue(store: Arc<dyn LocalStore>) -> Result<String> {
    let records = QueueStore::new(store).load()?;
    Ok(format_queue(&records))
}

fn format_queue(records: &[PendingSubmission]) -> String {
    if records.is_empty() {
        return "No queued messages.\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let created = record
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let _ = writeln!(&mut out, "{}  {}", record.id, record.subject);
        let _ = writeln!(&mut out, "    from    {} <{}>", record.name, record.email);
        let _ = writeln!(&mut out, "    queued  {created}");
    }
    out
}

pub fn handle_theme_command(
    config: &AppConfig,
    store: Arc<dyn LocalStore>,
    args: ThemeArgs,
) -> Result<String> {
    let current = ThemeFlag::load(store.as_ref(), config.default_theme)?;
    let theme = match args.command.unwrap_or(ThemeCommand::Show) {
        ThemeCommand::Show => current,
        ThemeCommand::Toggle => current.toggle(store.as_ref())?,
        ThemeCommand::Set { theme } => {
            let theme = ThemeFlag::parse_arg(&theme)?;
            theme.persist(store.as_ref())?;
            theme
        }
    };
    Ok(format!("{theme}\n"))
}

pub fn watch(config: Arc<AppConfig>, store: Arc<dyn LocalStore>) -> Result<()> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;

    let outbox = Outbox::from_config(store, &config, WorkerOptions::from_config(&config)?)?;
    let pending = outbox.pending_count()?;
    eprintln!(
        "Watching {} ({} queued); press Ctrl-C to stop.",
        config.contact.endpoint, pending
    );

    let events = outbox.events().cloned().unwrap_or_else(never);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(events) -> event => match event {
                Ok(OutboxEvent::Reconciled(report)) => {
                    if !report.delivered.is_empty() {
                        println!(
                            "Delivered {} queued message(s); {} remaining.",
                            report.delivered.len(),
                            report.remaining
                        );
                    }
                }
                Ok(OutboxEvent::Error { message }) => {
                    tracing::warn!(%message, "outbox error while watching");
                }
                Ok(OutboxEvent::Delivered { .. }) => {}
                Err(_) => break,
            },
        }
    }

    tracing::info!("stopping watch");
    outbox.shutdown()
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
