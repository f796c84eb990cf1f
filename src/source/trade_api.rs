//! Trade API REST client
//!
//! Every endpoint is a JSON POST. Failures are classified once here so the
//! retry layer only has to look at `FetchError::is_transient`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{EnrichmentSource, PageSource};
use crate::{
    config::ClientConfig,
    error::FetchError,
    models::{CompaniesPage, CompaniesQuery, CompanyEnrichment},
    query::QueryFamily,
};

const COMPANIES_LIST_PATH: &str = "/companies/list";
const ENRICHMENT_PATH: &str = "/companies/enrichment";

#[derive(Clone)]
pub struct TradeApiClient {
    client: Client,
    base_url: String,
}

/// Filter fields plus the 1-based page number.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageRequest<'a, F: Serialize> {
    #[serde(flatten)]
    filter: &'a F,
    page_no: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnrichmentRequest<'a> {
    company_name: &'a str,
}

impl TradeApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent("tradescope/0.1")
            .build()
            .context("Failed to build TradeApiClient")?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| FetchError::missing("TRADE_API_URL"))?;
        Self::new(base_url, config.request_timeout)
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Single page of the company search. Not aggregated and not cached.
    pub async fn list_companies(&self, query: &CompaniesQuery) -> Result<CompaniesPage, FetchError> {
        if query.company_name.trim().is_empty() {
            return Err(FetchError::missing("companyName"));
        }
        self.post_json(COMPANIES_LIST_PATH, query).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::transport(format!("POST {} failed: {}", path, e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| FetchError::transport(format!("POST {} body read failed: {}", path, e)))?;

        if !status.is_success() {
            return Err(classify_status(path, status, &text));
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| {
            FetchError::upstream(Some(status.as_u16()), format!("malformed response: {}", e))
        })?;

        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(FetchError::upstream(Some(status.as_u16()), message));
        }

        serde_json::from_value(value).map_err(|e| {
            FetchError::upstream(
                Some(status.as_u16()),
                format!("unexpected response shape for {}: {}", path, e),
            )
        })
    }
}

/// 5xx and 429 are transport-level and retryable; everything else is the
/// upstream telling us no.
fn classify_status(path: &str, status: StatusCode, body: &str) -> FetchError {
    let message = error_message(body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::transport(format!("POST {} {}: {}", path, status, message))
    } else {
        FetchError::upstream(Some(status.as_u16()), message)
    }
}

/// Prefer the body's `error` field, fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl<Q: QueryFamily> PageSource<Q> for TradeApiClient {
    async fn fetch_page(&self, filter: &Q::Filter, page_no: u32) -> Result<Q::Page, FetchError> {
        debug!(kind = Q::KIND.as_str(), page_no, "POST {}", Q::ENDPOINT);
        let body = PageRequest { filter, page_no };
        self.post_json(Q::ENDPOINT, &body).await
    }
}

#[async_trait]
impl EnrichmentSource for TradeApiClient {
    async fn fetch_enrichment(
        &self,
        company_name: &str,
    ) -> Result<Option<CompanyEnrichment>, FetchError> {
        let body = EnrichmentRequest { company_name };
        match self.post_json(ENRICHMENT_PATH, &body).await {
            Ok(enrichment) => Ok(Some(enrichment)),
            Err(FetchError::UpstreamError {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
