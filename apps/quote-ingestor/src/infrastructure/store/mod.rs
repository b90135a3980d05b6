//! REST Store Client
//!
//! [`QuoteStore`] over the store's REST interface. Every record is a single
//! `POST /rest/v1/{table}?on_conflict=symbol` with a merge-duplicates
//! preference, so the server inserts new symbols and overwrites existing
//! ones in place. Any 2xx answer is success. There is no retry: a failed
//! record is logged and the caller moves on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::application::ports::{QuoteStore, StoreError, UpsertAck};
use crate::domain::category::Category;
use crate::domain::normalize::{NormalizedRecord, UpsertPayload};
use crate::infrastructure::config::StoreSettings;

/// Conflict target for every table.
pub const CONFLICT_KEY: &str = "symbol";

/// Merge directive understood by the store.
pub const MERGE_PREFERENCE: &str = "resolution=merge-duplicates";

/// Upserts records through the store's REST API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    rest_url: String,
}

impl RestStore {
    /// Build a client with static credentials attached to every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(settings.api_key())
            .map_err(|e| StoreError::Encode(format!("api key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key()))
            .map_err(|e| StoreError::Encode(format!("api key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static(MERGE_PREFERENCE));

        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout.min(Duration::from_secs(10)))
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", settings.base_url.trim_end_matches('/')),
        })
    }

    /// Endpoint for one category's table.
    #[must_use]
    pub fn endpoint(&self, category: Category) -> String {
        format!("{}/{}", self.rest_url, category.table())
    }
}

#[async_trait]
impl QuoteStore for RestStore {
    async fn upsert(
        &self,
        category: Category,
        record: &NormalizedRecord,
    ) -> Result<UpsertAck, StoreError> {
        let table = category.table();
        let symbol = record.symbol();
        let body = serde_json::to_vec(&UpsertPayload::stamped_now(record))
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(self.endpoint(category))
            .query(&[("on_conflict", CONFLICT_KEY)])
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(table, symbol, error = %e, "Upsert request failed");
                StoreError::Network(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(table, symbol, status = status.as_u16(), "Upserted");
            return Ok(UpsertAck {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(table, symbol, status = status.as_u16(), body = %body, "Upsert rejected");
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
