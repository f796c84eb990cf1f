//! Tradescope
//!
//! Client-side paginated aggregation over the trade records API. Pages of a
//! company-detail or product-insight query are fetched one at a time and
//! folded into a single running aggregate that callers observe as it grows.

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod controller;
pub mod enrichment;
pub mod error;
pub mod models;
pub mod progress;
pub mod query;
pub mod retry;
pub mod source;

pub use aggregation::{fold, fold_next, CompanyDetailAggregate, ProductInsightAggregate};
pub use config::ClientConfig;
pub use controller::{CompletionReason, ControllerConfig, FetchState, PageFetchController, Snapshot};
pub use enrichment::{EnrichmentLookup, EnrichmentOutcome};
pub use error::{FetchError, FoldError};
pub use progress::Progress;
pub use query::{CompanyDetailQuery, PageCache, ProductInsightQuery, QueryFamily};
pub use source::{EnrichmentSource, PageSource, TradeApiClient};
