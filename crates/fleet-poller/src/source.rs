use std::{future::Future, time::Duration};

use fleet_types::StatusResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("status request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("supervisor answered HTTP {0}")]
    Status(u16),
}

/// Where the poller gets fleet status from.
pub trait StatusSource: Send + Sync + 'static {
    /// `since` is the token of the last successful poll, if any.
    fn fetch(
        &self,
        since: Option<&str>,
    ) -> impl Future<Output = Result<StatusResponse, FetchError>> + Send;
}

/// `GET {base_url}/status` on a running supervisor.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    status_url: String,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent("fleet-poller")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            status_url: format!("{}/status", base_url.trim_end_matches('/')),
        })
    }
}

impl StatusSource for HttpStatusSource {
    async fn fetch(&self, since: Option<&str>) -> Result<StatusResponse, FetchError> {
        let mut req = self.client.get(&self.status_url);
        if let Some(since) = since {
            req = req.query(&[("since", since)]);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(resp.json::<StatusResponse>().await?)
    }
}
