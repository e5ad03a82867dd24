// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Google Sheets REST backend
//!
//! Maps the backend operations onto the Sheets v4 API:
//!
//! - batch updates -> `POST /v4/spreadsheets/{id}:batchUpdate` with
//!   `deleteDimension`, `appendCells` and `sortRange` requests
//! - range reads -> `GET /v4/spreadsheets/{id}/values/{range}`
//!
//! Authentication is not handled here: the caller supplies an OAuth access
//! token obtained elsewhere.
//!
//! # Example
//!
//! ```ignore
//! use sheetsink::{SheetsApi, SheetsApiConfig};
//!
//! let api = SheetsApi::new(SheetsApiConfig::new("1AbC..."), token)?;
//! ```

use crate::backend::{SheetBackend, SheetOp};
use crate::config::SheetsApiConfig;
use crate::error::BackendError;
use crate::rows::{CellValue, Row};
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};

/// Sheets v4 API client for one spreadsheet.
#[derive(Debug, Clone)]
pub struct SheetsApi {
    client: Client,
    config: SheetsApiConfig,
    access_token: String,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl SheetsApi {
    /// Create a client with a bearer access token.
    pub fn new(
        config: SheetsApiConfig,
        access_token: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, config, access_token))
    }

    /// Create a client reusing an existing HTTP client.
    pub fn with_client(
        client: Client,
        config: SheetsApiConfig,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            access_token: access_token.into(),
        }
    }

    /// Replace the access token (e.g. after a refresh).
    pub fn set_access_token(&mut self, access_token: impl Into<String>) {
        self.access_token = access_token.into();
    }

    /// Backend settings.
    pub fn config(&self) -> &SheetsApiConfig {
        &self.config
    }

    fn batch_update_url(&self) -> Result<Url, BackendError> {
        self.url(&[&format!("{}:batchUpdate", self.config.spreadsheet_id)])
    }

    fn values_url(&self, range: &str) -> Result<Url, BackendError> {
        self.url(&[&self.config.spreadsheet_id, "values", range])
    }

    fn url(&self, tail: &[&str]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| BackendError::Transport(format!("invalid api_base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport("api_base cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(tail);
        Ok(url)
    }
}

impl SheetBackend for SheetsApi {
    async fn batch_update(&self, ops: Vec<SheetOp>) -> Result<(), BackendError> {
        let body = batch_update_body(self.config.sheet_id, &ops);
        let url = self.batch_update_url()?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, BackendError> {
        let url = self.values_url(range)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let response = check_status(response).await?;
        let range: ValueRange = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(range
            .values
            .into_iter()
            .map(|row| row.iter().map(value_to_text).collect())
            .collect())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(parse_error_body(status.as_u16(), &text))
}

/// Decode a `{"error": {"code", "message"}}` body, falling back to the raw text.
fn parse_error_body(status: u16, body: &str) -> BackendError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => BackendError::Api {
            code: if envelope.error.code == 0 {
                status
            } else {
                envelope.error.code
            },
            message: envelope.error.message,
        },
        Err(_) => BackendError::Api {
            code: status,
            message: body.trim().to_string(),
        },
    }
}

/// Build the JSON body of a `batchUpdate` call.
fn batch_update_body(sheet_id: i64, ops: &[SheetOp]) -> Value {
    let requests: Vec<Value> = ops
        .iter()
        .map(|op| match op {
            SheetOp::DeleteRows { start, end } => json!({
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": end,
                    }
                }
            }),
            SheetOp::AppendRows(rows) => json!({
                "appendCells": {
                    "sheetId": sheet_id,
                    "fields": "*",
                    "rows": rows.iter().map(row_data).collect::<Vec<_>>(),
                }
            }),
            SheetOp::SortByFirstColumn => json!({
                "sortRange": {
                    "range": { "sheetId": sheet_id },
                    "sortSpecs": [
                        { "dimensionIndex": 0, "sortOrder": "ASCENDING" }
                    ],
                }
            }),
        })
        .collect();

    json!({
        "requests": requests,
        "includeSpreadsheetInResponse": false,
    })
}

fn row_data(row: &Row) -> Value {
    let values: Vec<Value> = row
        .iter()
        .map(|cell| match cell {
            CellValue::String(s) => json!({ "userEnteredValue": { "stringValue": s } }),
            CellValue::Number(n) => json!({ "userEnteredValue": { "numberValue": n } }),
            CellValue::Empty => json!({}),
        })
        .collect();
    json!({ "values": values })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
