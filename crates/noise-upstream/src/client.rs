//! HTTP client for the Sonitus sensor API.
//!
//! Every call is a form-encoded POST carrying the static account credentials.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use noise_types::MonitorId;
//! use noise_upstream::{Credentials, SonitusClient, Upstream};
//! use time::OffsetDateTime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SonitusClient::new(
//!     "https://data.smartdublin.ie/sonitus-api",
//!     Credentials::new("user", "secret"),
//!     Duration::from_secs(30),
//! )?;
//!
//! let monitors = client.list_monitors().await?;
//! println!("{} monitors upstream", monitors.len());
//!
//! let id = MonitorId::parse("10.1.1.1")?;
//! let end = OffsetDateTime::now_utc();
//! let records = client
//!     .fetch_readings(&id, end - time::Duration::hours(1), end)
//!     .await?;
//! println!("{} records", records.len());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::debug;

use noise_types::{MonitorId, ReadingRecord, UpstreamMonitor};

use crate::error::{Result, UpstreamError};
use crate::traits::Upstream;

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "https://data.smartdublin.ie/sonitus-api";

/// Static account credentials forwarded on every request.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// reqwest-backed [`Upstream`] implementation.
#[derive(Debug, Clone)]
pub struct SonitusClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl SonitusClient {
    /// Create a client with the given per-request timeout.
    pub fn new(base_url: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::from_reqwest(base_url, e))?;

        Self::with_client(base_url, credentials, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(base_url: &str, credentials: Credentials, client: Client) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(UpstreamError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let mut form: Vec<(&str, &str)> = vec![
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        form.extend(fields.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&url, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());

            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Upstream for SonitusClient {
    async fn list_monitors(&self) -> Result<Vec<UpstreamMonitor>> {
        let monitors: Vec<UpstreamMonitor> = self.post_form("/api/monitors", &[]).await?;
        debug!("Upstream listed {} monitors", monitors.len());
        Ok(monitors)
    }

    async fn fetch_readings(
        &self,
        monitor: &MonitorId,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingRecord>> {
        let fields = [
            ("monitor", monitor.as_str().to_string()),
            ("start", start.unix_timestamp().to_string()),
            ("end", end.unix_timestamp().to_string()),
        ];
        let records: Vec<ReadingRecord> = self.post_form("/api/data", &fields).await?;
        debug!(
            "Upstream returned {} records for {} in [{}, {}]",
            records.len(),
            monitor,
            start.unix_timestamp(),
            end.unix_timestamp()
        );
        Ok(records)
    }
}
