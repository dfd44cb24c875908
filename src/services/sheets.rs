// src/services/sheets.rs

//! Google Sheets values API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{SourceConfig, SpreadsheetConfig};
use crate::services::TabularStore;
use crate::utils::http::{check_status, create_async_client};

/// Appends rows to one worksheet of one spreadsheet.
pub struct SheetsClient {
    client: Client,
    base_url: Url,
    spreadsheet_id: String,
    worksheet: String,
    access_token: String,
}

impl SheetsClient {
    /// Build a client; the HTTP settings (timeout, user agent) are shared
    /// with the comment source.
    pub fn from_config(sheets: &SpreadsheetConfig, http: &SourceConfig) -> Result<Self> {
        let spreadsheet_id = sheets
            .spreadsheet_id
            .clone()
            .ok_or_else(|| AppError::config("spreadsheet.spreadsheet_id is not set"))?;
        let access_token = sheets
            .access_token
            .clone()
            .ok_or_else(|| AppError::config("spreadsheet.access_token is not set"))?;

        Ok(Self {
            client: create_async_client(http)?,
            base_url: Url::parse(&sheets.base_url)?,
            spreadsheet_id,
            worksheet: sheets.worksheet.clone(),
            access_token,
        })
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}{suffix}`
    fn values_url(&self, range: &str, suffix: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::config("spreadsheet.base_url cannot be a base"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values"])
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }
}

/// A1 notation with the sheet name quoted; embedded quotes are doubled.
fn a1_range(worksheet: &str, cells: &str) -> String {
    format!("'{}'!{cells}", worksheet.replace('\'', "''"))
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[async_trait]
impl TabularStore for SheetsClient {
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let url = self.values_url(&a1_range(&self.worksheet, "A1"), ":append")?;
        let response = self
            .client
            .post(url)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        check_status("sheets:append", response).await?;

        log::debug!("Appended {} row(s) to {}", rows.len(), self.worksheet);
        Ok(())
    }

    async fn ensure_header(&self, header: &[&str]) -> Result<()> {
        let url = self.values_url(&a1_range(&self.worksheet, "A1:H1"), "")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let existing: ValueRange = check_status("sheets:header", response).await?.json().await?;

        if existing.values.iter().any(|row| !row.is_empty()) {
            return Ok(());
        }

        log::info!("Worksheet {} is empty, writing header", self.worksheet);
        let row = header.iter().map(|h| h.to_string()).collect::<Vec<_>>();
        self.append_rows(&[row]).await
    }
}
