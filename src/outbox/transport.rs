use anyhow::{Context, Result};
use reqwest::blocking::Client;
use thiserror::Error;
use url::Url;

use crate::config::ContactConfig;
use crate::outbox::record::ContactPayload;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("endpoint rejected submission with status {status}")]
    Rejected { status: u16 },
}

/// One best-effort delivery of a contact submission.
pub trait ContactTransport: Send + Sync {
    fn deliver(&self, payload: &ContactPayload) -> Result<(), DeliveryError>;
}

/// Posts submissions as JSON to the configured endpoint. Any 2xx status
/// counts as delivered.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(config: &ContactConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, endpoint })
    }
}

impl ContactTransport for HttpTransport {
    fn deliver(&self, payload: &ContactPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(%status, endpoint = %self.endpoint, "contact submission accepted");
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
