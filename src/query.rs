//! The two query families and how their pages are identified and cached.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::{
    aggregation::TradePage,
    cache::{FilterKey, PageKey, QueryKind, TtlCache},
    error::FetchError,
    models::{CompanyDetailPage, CompanyFilter, ProductFilter, ProductInsightPage},
};

/// A cached page of either family.
#[derive(Debug, Clone)]
pub enum CachedPage {
    Company(Arc<CompanyDetailPage>),
    Product(Arc<ProductInsightPage>),
}

/// Process-wide page cache shared by every controller.
pub type PageCache = TtlCache<PageKey, CachedPage>;

/// A paginated query family: its filter, page type, endpoint and cache mapping.
pub trait QueryFamily: Send + Sync + 'static {
    type Filter: Clone + PartialEq + Eq + Hash + Debug + Serialize + Send + Sync + 'static;
    type Page: TradePage + DeserializeOwned + Debug;

    const KIND: QueryKind;
    const ENDPOINT: &'static str;

    /// Minimal-completeness check run before any fetch.
    fn validate(filter: &Self::Filter) -> Result<(), FetchError>;

    fn filter_key(filter: &Self::Filter) -> FilterKey;

    fn into_cached(page: Arc<Self::Page>) -> CachedPage;

    fn from_cached(page: CachedPage) -> Option<Arc<Self::Page>>;

    fn page_key(filter: &Self::Filter, page_no: u32) -> PageKey {
        PageKey {
            kind: Self::KIND,
            filter: Self::filter_key(filter),
            page_no,
        }
    }
}

fn has_text(values: &[String]) -> bool {
    values.iter().any(|v| !v.trim().is_empty())
}

/// Company-centric detail query (partners/products/countries/ports).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompanyDetailQuery;

impl QueryFamily for CompanyDetailQuery {
    type Filter = CompanyFilter;
    type Page = CompanyDetailPage;

    const KIND: QueryKind = QueryKind::CompanyDetail;
    const ENDPOINT: &'static str = "/companies/detail";

    fn validate(filter: &CompanyFilter) -> Result<(), FetchError> {
        if filter.company_name.trim().is_empty() {
            return Err(FetchError::missing("companyName"));
        }
        Ok(())
    }

    fn filter_key(filter: &CompanyFilter) -> FilterKey {
        FilterKey::Company(filter.clone())
    }

    fn into_cached(page: Arc<CompanyDetailPage>) -> CachedPage {
        CachedPage::Company(page)
    }

    fn from_cached(page: CachedPage) -> Option<Arc<CompanyDetailPage>> {
        match page {
            CachedPage::Company(p) => Some(p),
            CachedPage::Product(_) => None,
        }
    }
}

/// Product-centric insight query (buyers/suppliers/countries/ports).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductInsightQuery;

impl QueryFamily for ProductInsightQuery {
    type Filter = ProductFilter;
    type Page = ProductInsightPage;

    const KIND: QueryKind = QueryKind::ProductInsight;
    const ENDPOINT: &'static str = "/products/insight";

    fn validate(filter: &ProductFilter) -> Result<(), FetchError> {
        if !has_text(&filter.goods_desc) && !has_text(&filter.hs_code) {
            return Err(FetchError::missing("goodsDesc or hsCode"));
        }
        Ok(())
    }

    fn filter_key(filter: &ProductFilter) -> FilterKey {
        FilterKey::Product(filter.clone())
    }

    fn into_cached(page: Arc<ProductInsightPage>) -> CachedPage {
        CachedPage::Product(page)
    }

    fn from_cached(page: CachedPage) -> Option<Arc<ProductInsightPage>> {
        match page {
            CachedPage::Product(p) => Some(p),
            CachedPage::Company(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompanyType;

    #[test]
    fn test_company_filter_requires_name() {
        let blank = CompanyFilter::new("   ", CompanyType::Buyer);
        assert_eq!(
            CompanyDetailQuery::validate(&blank),
            Err(FetchError::missing("companyName"))
        );
        let ok = CompanyFilter::new("ACME", CompanyType::Buyer);
        assert!(CompanyDetailQuery::validate(&ok).is_ok());
    }

    #[test]
    fn test_product_filter_requires_goods_or_hs() {
        let empty = ProductFilter::new(vec![], vec!["".into()]);
        assert!(ProductInsightQuery::validate(&empty).is_err());

        let by_hs = ProductFilter::new(vec![], vec!["8501".into()]);
        assert!(ProductInsightQuery::validate(&by_hs).is_ok());

        let by_desc = ProductFilter::new(vec!["WIDGET".into()], vec![]);
        assert!(ProductInsightQuery::validate(&by_desc).is_ok());
    }

    #[test]
    fn test_page_keys_differ_by_page_and_filter() {
        let a = CompanyFilter::new("ACME", CompanyType::Buyer);
        let b = CompanyFilter::new("ACME", CompanyType::Supplier);

        assert_eq!(
            CompanyDetailQuery::page_key(&a, 1),
            CompanyDetailQuery::page_key(&a.clone(), 1)
        );
        assert_ne!(
            CompanyDetailQuery::page_key(&a, 1),
            CompanyDetailQuery::page_key(&a, 2)
        );
        assert_ne!(
            CompanyDetailQuery::page_key(&a, 1),
            CompanyDetailQuery::page_key(&b, 1)
        );
    }
}
