//! Remote sources the fetch layer talks to.
//!
//! The controller and the enrichment lookup only see these traits; the
//! reqwest-backed implementation lives in `trade_api`.

pub mod trade_api;

use async_trait::async_trait;

use crate::{error::FetchError, models::CompanyEnrichment, query::QueryFamily};

pub use trade_api::TradeApiClient;

/// Fetches one page of a query family.
#[async_trait]
pub trait PageSource<Q: QueryFamily>: Send + Sync {
    async fn fetch_page(&self, filter: &Q::Filter, page_no: u32) -> Result<Q::Page, FetchError>;
}

/// Fetches contact/registry enrichment for a company name.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// `Ok(None)` when upstream has no record for the name.
    async fn fetch_enrichment(
        &self,
        company_name: &str,
    ) -> Result<Option<CompanyEnrichment>, FetchError>;
}
