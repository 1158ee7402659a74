pub mod app;
pub mod cli;
pub mod config;
pub mod content;
pub mod outbox;
pub mod storage;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use outbox::{Outbox, SubmitStatus};
