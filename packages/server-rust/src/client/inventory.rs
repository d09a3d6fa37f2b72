//! Inventory stock lookup: live HTTP client and its fallback.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION};
use http::StatusCode;
use relay_core::{OutboundRequest, RemoteOperation, TransportError};
use reqwest::Url;
use tracing::debug;

use super::{join_segments, parse_base_url};
use crate::service::contract_names;

// ---------------------------------------------------------------------------
// HttpInventoryClient
// ---------------------------------------------------------------------------

/// Live implementation of the `inventory.stock` contract.
///
/// `GET {base}/books/stock/{id}` answering `text/plain` `true` or `false`.
/// A `404` means the item is unknown to the inventory, which is reported as
/// absent rather than as a failure.
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpInventoryClient {
    /// # Errors
    ///
    /// Fails if `base_url` is not a usable base URL or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            timeout,
        })
    }

    fn classify(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
            TransportError::Timeout { timeout_ms }
        } else if err.is_decode() || err.is_body() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteOperation for HttpInventoryClient {
    fn contract(&self) -> &'static str {
        contract_names::INVENTORY_STOCK
    }

    async fn call(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError> {
        let url = join_segments(&self.base_url, &["books", "stock", request.id()]);
        let mut builder = self.http.get(url).header(ACCEPT, "text/plain");
        if let Some(bearer) = request.bearer_header() {
            builder = builder.header(AUTHORIZATION, bearer);
        }

        let response = builder.send().await.map_err(|err| self.classify(&err))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|err| self.classify(&err))?;
        match body.trim() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(TransportError::Malformed(format!(
                "expected `true` or `false`, got `{other}`"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// InventoryFallback
// ---------------------------------------------------------------------------

/// Recovery implementation of `inventory.stock`: stock is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryFallback;

#[async_trait]
impl RemoteOperation for InventoryFallback {
    fn contract(&self) -> &'static str {
        contract_names::INVENTORY_STOCK
    }

    async fn call(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError> {
        debug!(id = request.id(), "inventory fallback answering absent");
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
