//! Company enrichment lookup
//!
//! Single request per company name, cached for the enrichment staleness
//! window and retried once on transient failure. Not part of the paginated
//! aggregation: there is one page and nothing to fold.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    cache::{CacheConfig, TtlCache},
    config::ClientConfig,
    error::FetchError,
    models::CompanyEnrichment,
    retry::RetryPolicy,
    source::EnrichmentSource,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "enrichment", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Found(CompanyEnrichment),
    /// Upstream has no entity for this name.
    NotFound,
}

impl EnrichmentOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

pub struct EnrichmentLookup {
    source: Arc<dyn EnrichmentSource>,
    cache: TtlCache<String, EnrichmentOutcome>,
    retry: RetryPolicy,
}

impl EnrichmentLookup {
    pub fn new(source: Arc<dyn EnrichmentSource>, cache: CacheConfig, retry: RetryPolicy) -> Self {
        Self {
            source,
            cache: TtlCache::new(cache),
            retry,
        }
    }

    pub fn from_config(source: Arc<dyn EnrichmentSource>, config: &ClientConfig) -> Self {
        Self::new(
            source,
            CacheConfig::new(config.enrichment_stale, config.cache_max_entries),
            config.enrichment_retry(),
        )
    }

    /// Look up enrichment for `company_name`. Blank names never reach upstream.
    pub async fn lookup(&self, company_name: &str) -> Result<EnrichmentOutcome, FetchError> {
        let name = company_name.trim();
        if name.is_empty() {
            return Err(FetchError::missing("companyName"));
        }

        let key = name.to_string();
        if let Some(outcome) = self.cache.get(&key) {
            debug!(company = name, "Enrichment cache hit");
            return Ok(outcome);
        }

        let source = self.source.as_ref();
        let found = self
            .retry
            .run("enrichment", move || source.fetch_enrichment(name))
            .await?;

        let outcome = match found {
            Some(enrichment) if !enrichment.entities.is_empty() => {
                EnrichmentOutcome::Found(enrichment)
            }
            _ => EnrichmentOutcome::NotFound,
        };
        info!(company = name, found = outcome.is_found(), "Enrichment fetched");

        self.cache.insert(key, outcome.clone());
        Ok(outcome)
    }
}
