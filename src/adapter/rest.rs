//! Table operations over the service's REST endpoint (`/rest/v1/{table}`).
//!
//! Filters and ordering use PostgREST query syntax. A bulk delete must
//! carry a filter, so clear-all sends `id=not.is.null`, which every row
//! matches.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;

use super::RemoteError;
use crate::config::{ChatConfig, ConfigError};
use crate::types::{ChatMessage, NewMessage};

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    table_url: String,
}

impl RestClient {
    /// Build a client that authenticates every request with the anon key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &ChatConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key).map_err(|_| ConfigError::InvalidApiKey)?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|_| ConfigError::InvalidApiKey)?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self { http, table_url: format!("{}/rest/v1/{}", config.url, config.table) })
    }

    /// `SELECT *` ordered by `created_at` ascending, limited to `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or an
    /// undecodable body.
    pub async fn select_ordered(&self, limit: usize) -> Result<Vec<ChatMessage>, RemoteError> {
        let limit = limit.to_string();
        let response = self
            .http
            .get(&self.table_url)
            .query(&[("select", "*"), ("order", "created_at.asc"), ("limit", limit.as_str())])
            .send()
            .await?;
        let rows = check_status(response).await?.json::<Vec<ChatMessage>>().await?;
        debug!(count = rows.len(), "snapshot loaded");
        Ok(rows)
    }

    /// Insert one row.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or when the row is rejected.
    pub async fn insert(&self, row: &NewMessage) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Delete every row.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or when the delete is rejected.
    pub async fn delete_all(&self) -> Result<(), RemoteError> {
        let response = self
            .http
            .delete(&self.table_url)
            .query(&[("id", "not.is.null")])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Rejected { status: status.as_u16(), message: error_message(status, &body) })
}

/// The `message` field of an error body, else the raw body, else the
/// status reason.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(ToOwned::to_owned));
    if let Some(message) = from_json {
        return message;
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_owned();
    }

    status
        .canonical_reason()
        .map_or_else(|| format!("HTTP {}", status.as_u16()), ToOwned::to_owned)
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
