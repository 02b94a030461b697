//! HTTP client for the lab information service (`nglims`) run details API.
//!
//! Wraps `GET /nglims/api_run_details?key=..&run=..` using [`reqwest`].

use std::time::Duration;

use serde::Deserialize;

use seqrun_core::{FlowcellId, LaneInfo, PipelineError};

const RUN_DETAILS_PATH: &str = "/nglims/api_run_details";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the run details API.
#[derive(Debug, thiserror::Error)]
pub enum LimsError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Run details API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The service answered but reported the run as unknown.
    #[error("Run details unavailable for {run}: {message}")]
    UnknownRun { run: String, message: String },

    #[error("Unexpected run details payload: {0}")]
    Decode(String),
}

impl From<LimsError> for PipelineError {
    fn from(err: LimsError) -> Self {
        PipelineError::UpstreamUnavailable(err.to_string())
    }
}

/// Run details as returned by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct RunDetails {
    #[serde(default)]
    pub run_id: Option<serde_json::Value>,
    pub details: Vec<LaneInfo>,
}

impl RunDetails {
    pub fn run_id(&self) -> String {
        match &self.run_id {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// HTTP client for one lab information service.
pub struct LimsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LimsClient {
    /// * `base_url` - Service root, e.g. `http://galaxy.example.org`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, LimsError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Fetch lane details for a flowcell.
    ///
    /// Runs are looked up by flowcell name first. When the service reports
    /// an error for the name, the lookup is retried once by run date.
    pub async fn run_details(&self, flowcell: &FlowcellId) -> Result<RunDetails, LimsError> {
        let mut body = self.fetch(&flowcell.name).await?;

        if body.get("error").is_some() {
            tracing::info!(
                flowcell = %flowcell.name,
                date = %flowcell.date,
                "Run not found by flowcell name, retrying by date",
            );
            body = self.fetch(&flowcell.date).await?;
        }

        if let Some(message) = body.get("error") {
            return Err(LimsError::UnknownRun {
                run: flowcell.label(),
                message: message
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| message.to_string()),
            });
        }

        serde_json::from_value(body).map_err(|e| LimsError::Decode(e.to_string()))
    }

    // ---- private helpers ----

    async fn fetch(&self, run: &str) -> Result<serde_json::Value, LimsError> {
        let response = self
            .client
            .get(format!("{}{RUN_DETAILS_PATH}", self.base_url))
            .query(&[("key", self.api_key.as_str()), ("run", run)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(LimsError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
