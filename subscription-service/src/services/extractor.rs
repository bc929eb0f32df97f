//! Client for the spreadsheet extraction service.

use crate::config::ExtractorConfig;
use crate::models::ExtractorResponse;
use crate::services::metrics::record_extractor_call;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, instrument, warn};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLSM_MIME: &str = "application/vnd.ms-excel.sheet.macroEnabled.12";

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Unsupported file type: {0}. Only .xlsx and .xlsm files are accepted")]
    UnsupportedFileType(String),

    #[error("Extractor request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Extractor returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid extractor response: {0}")]
    InvalidResponse(String),
}

impl ExtractorError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorError::UnsupportedFileType(_) => "unsupported_file_type",
            ExtractorError::Request(e) if e.is_timeout() => "timeout",
            ExtractorError::Request(_) => "request",
            ExtractorError::Status { .. } => "status",
            ExtractorError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// An uploaded workbook, accepted only with an Excel extension.
#[derive(Debug, Clone)]
pub struct SpreadsheetFile {
    file_name: String,
    content: Vec<u8>,
}

impl SpreadsheetFile {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Result<Self, ExtractorError> {
        let file_name = file_name.into();
        let lower = file_name.to_ascii_lowercase();
        if !(lower.ends_with(".xlsx") || lower.ends_with(".xlsm")) {
            return Err(ExtractorError::UnsupportedFileType(file_name));
        }
        Ok(Self { file_name, content })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    fn mime_type(&self) -> &'static str {
        if self.file_name.to_ascii_lowercase().ends_with(".xlsm") {
            XLSM_MIME
        } else {
            XLSX_MIME
        }
    }
}

/// Converts a workbook into sheet/record JSON.
#[async_trait]
pub trait SpreadsheetExtractor: Send + Sync {
    /// `request_id` is forwarded so both sides log the same correlation ID.
    async fn extract(
        &self,
        file: &SpreadsheetFile,
        request_id: Option<&str>,
    ) -> Result<ExtractorResponse, ExtractorError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`SpreadsheetExtractor`] over HTTP: one multipart POST per workbook.
#[derive(Clone)]
pub struct HttpExtractorClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpExtractorClient {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self::with_client(reqwest::Client::new(), &config.url, config.timeout())
    }

    pub fn with_client(client: reqwest::Client, url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            timeout,
        }
    }

    async fn post(
        &self,
        file: &SpreadsheetFile,
        request_id: Option<&str>,
    ) -> Result<ExtractorResponse, ExtractorError> {
        let part = Part::bytes(file.content().to_vec())
            .file_name(file.file_name().to_string())
            .mime_str(file.mime_type())?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .traced_post(&self.url)
            .multipart(form)
            .timeout(self.timeout)
            .request_id(request_id)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(ExtractorError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|e| ExtractorError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl SpreadsheetExtractor for HttpExtractorClient {
    #[instrument(skip(self, file), fields(file_name = %file.file_name(), size = file.len()))]
    async fn extract(
        &self,
        file: &SpreadsheetFile,
        request_id: Option<&str>,
    ) -> Result<ExtractorResponse, ExtractorError> {
        let started = Instant::now();
        let result = self.post(file, request_id).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(response) => {
                record_extractor_call("ok", elapsed);
                info!(
                    sheets = response.len(),
                    records = response.record_count(),
                    elapsed_secs = elapsed,
                    "Spreadsheet extracted"
                );
            }
            Err(e) => {
                record_extractor_call(e.kind(), elapsed);
                warn!(error = %e, elapsed_secs = elapsed, "Spreadsheet extraction failed");
            }
        }

        result
    }
}
