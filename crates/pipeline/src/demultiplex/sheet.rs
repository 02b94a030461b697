//! Destinations for report worksheets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ReportError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One titled table of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Where a worksheet is written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetTarget {
    /// Spreadsheet title.
    pub spreadsheet: String,
    /// Folder holding the spreadsheet, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Append to an existing worksheet instead of replacing it.
    pub append: bool,
}

#[async_trait]
pub trait SheetSink: Send + Sync {
    async fn write(&self, target: &SheetTarget, sheet: &Worksheet) -> Result<(), ReportError>;
}

// ---------------------------------------------------------------------------
// Directory sink
// ---------------------------------------------------------------------------

/// Writes each worksheet as `<root>/[<folder>/]<spreadsheet>/<title>.tsv`.
#[derive(Debug, Clone)]
pub struct DirectorySheetSink {
    root: PathBuf,
}

impl DirectorySheetSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sheet_path(&self, target: &SheetTarget, title: &str) -> PathBuf {
        let mut path = self.root.clone();
        if let Some(folder) = target.folder.as_deref().filter(|f| !f.is_empty()) {
            path.push(file_name(folder));
        }
        path.push(file_name(&target.spreadsheet));
        path.push(format!("{}.tsv", file_name(title)));
        path
    }
}

#[async_trait]
impl SheetSink for DirectorySheetSink {
    async fn write(&self, target: &SheetTarget, sheet: &Worksheet) -> Result<(), ReportError> {
        let path = self.sheet_path(target, &sheet.title);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io(parent, e))?;
        }

        let append = target.append && tokio::fs::try_exists(&path).await.unwrap_or(false);
        let mut text = String::new();
        if !append {
            text.push_str(&tsv_line(&sheet.header));
        }
        for row in &sheet.rows {
            text.push_str(&tsv_line(row));
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io(&path, e))?;
            file.write_all(text.as_bytes()).await.map_err(|e| io(&path, e))?;
        } else {
            tokio::fs::write(&path, text).await.map_err(|e| io(&path, e))?;
        }

        tracing::info!(
            path = %path.display(),
            rows = sheet.rows.len(),
            append,
            "Wrote worksheet",
        );
        Ok(())
    }
}

fn tsv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| f.replace(['\t', '\n'], " "))
        .collect::<Vec<_>>()
        .join("\t");
    line.push('\n');
    line
}

fn file_name(title: &str) -> String {
    title.replace(['/', '\\'], "_")
}

fn io(path: &Path, source: std::io::Error) -> ReportError {
    ReportError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ---------------------------------------------------------------------------
// HTTP sink
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WriteRequest<'a> {
    #[serde(flatten)]
    target: &'a SheetTarget,
    worksheet: &'a Worksheet,
}

/// Posts worksheets to a spreadsheet service at
/// `POST {endpoint}/worksheets` with bearer credentials.
pub struct HttpSheetSink {
    client: reqwest::Client,
    endpoint: String,
    credentials: String,
}

impl HttpSheetSink {
    pub fn new(endpoint: &str, credentials: &str) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, endpoint, credentials))
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str, credentials: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials: credentials.to_string(),
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ReportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ReportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SheetSink for HttpSheetSink {
    async fn write(&self, target: &SheetTarget, sheet: &Worksheet) -> Result<(), ReportError> {
        let response = self
            .client
            .post(format!("{}/worksheets", self.endpoint))
            .bearer_auth(&self.credentials)
            .json(&WriteRequest { target, worksheet: sheet })
            .send()
            .await?;
        Self::ensure_success(response).await?;
        tracing::info!(
            spreadsheet = %target.spreadsheet,
            worksheet = %sheet.title,
            rows = sheet.rows.len(),
            "Uploaded worksheet",
        );
        Ok(())
    }
}
