//! Google Sheets source reader.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::google_auth::GoogleAuth;
use crate::{Error, Result};

/// Reads rows of upcoming events from an external tabular source.
///
/// Rows are re-fetched fresh on every invocation; implementations must not
/// cache between runs.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn fetch(&self, source_id: &str, range: &str) -> Result<Vec<Vec<String>>>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Source reader backed by the Google Sheets v4 `values.get` endpoint.
pub struct SheetsClient {
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, auth: Arc<GoogleAuth>) -> Self {
        Self { http, auth }
    }
}

#[async_trait]
impl SourceReader for SheetsClient {
    async fn fetch(&self, source_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let token = self.auth.access_token().await?;

        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}",
            source_id,
            urlencoding::encode(range)
        );

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("Sheets request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SourceUnavailable(format!(
                "Sheets API error ({}): {}",
                status, body
            )));
        }

        let value_range: ValueRange = response
            .json()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("Invalid sheets response: {}", e)))?;

        info!(
            sheet_id = source_id,
            rows = value_range.values.len(),
            "Fetched sheet rows"
        );

        Ok(value_range.values)
    }
}
