//! Aggregation engine: folds an ordered run of pages into one cumulative view.
//!
//! - Summary totals are plain sums over pages (never deduplicated)
//! - Keyed collections hold one entry per distinct key; metrics are summed and
//!   list fields unioned across every page the key appeared in
//! - Cardinality counts are the number of distinct keys, not a sum of page counts
//! - Raw trades are concatenated in page order
//! - Header fields come from the first folded page
//!
//! The fold is synchronous and pure. `fold_next` returns a new aggregate and
//! leaves the previous one untouched, so a published aggregate is never seen
//! half-merged.

use serde::{Serialize, Serializer};
use std::collections::HashMap;

use crate::{
    error::FoldError,
    models::{
        CompanyDetailPage, CompanyHeader, CompanySummary, CountryEntry, Pagination, PartyEntry,
        PortEntry, ProductEntry, ProductHeader, ProductInsightPage, ProductSummary, TradeMetrics,
        TradeRecord, Units,
    },
};

// =============================================================================
// KEYED COLLECTIONS
// =============================================================================

/// An entry with a natural key whose metrics can be merged.
pub trait KeyedEntry: Clone {
    fn key(&self) -> String;

    /// Copy of this entry with zeroed metrics and empty list fields.
    fn blank(&self) -> Self;

    fn absorb(&mut self, other: &Self);
}

/// Insertion-ordered map from natural key to merged entry.
///
/// Serializes as a plain list of entries in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedCollection<E> {
    entries: Vec<E>,
    index: HashMap<String, usize>,
}

impl<E> Default for KeyedCollection<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<E: KeyedEntry> KeyedCollection<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, entry: &E) {
        let key = entry.key();
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.entries.push(entry.blank());
                let i = self.entries.len() - 1;
                self.index.insert(key, i);
                i
            }
        };
        self.entries[slot].absorb(entry);
    }

    pub fn get(&self, key: &str) -> Option<&E> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.entries.iter()
    }
}

impl<E: KeyedEntry> FromIterator<E> for KeyedCollection<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        let mut collection = Self::new();
        for entry in iter {
            collection.merge(&entry);
        }
        collection
    }
}

impl<E: Serialize> Serialize for KeyedCollection<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// Append values not already present, keeping first-seen order.
fn union_into(acc: &mut Vec<String>, values: &[String]) {
    for v in values {
        if !acc.contains(v) {
            acc.push(v.clone());
        }
    }
}

impl KeyedEntry for ProductEntry {
    fn key(&self) -> String {
        self.goods_desc.clone()
    }

    fn blank(&self) -> Self {
        Self {
            goods_desc: self.goods_desc.clone(),
            hs_codes: Vec::new(),
            metrics: TradeMetrics::zero(),
            units: Units::default(),
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.metrics.absorb(&other.metrics);
        self.units.fill_from(&other.units);
        union_into(&mut self.hs_codes, &other.hs_codes);
    }
}

impl KeyedEntry for PartyEntry {
    fn key(&self) -> String {
        self.company_name.clone()
    }

    fn blank(&self) -> Self {
        Self {
            company_name: self.company_name.clone(),
            country: None,
            metrics: TradeMetrics::zero(),
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.metrics.absorb(&other.metrics);
        if self.country.is_none() {
            self.country = other.country.clone();
        }
    }
}

impl KeyedEntry for CountryEntry {
    fn key(&self) -> String {
        self.country.clone()
    }

    fn blank(&self) -> Self {
        Self {
            country: self.country.clone(),
            metrics: TradeMetrics::zero(),
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.metrics.absorb(&other.metrics);
    }
}

impl KeyedEntry for PortEntry {
    fn key(&self) -> String {
        format!("{}-{}", self.country, self.port.as_deref().unwrap_or_default())
    }

    fn blank(&self) -> Self {
        Self {
            country: self.country.clone(),
            port: self.port.clone(),
            metrics: TradeMetrics::zero(),
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.metrics.absorb(&other.metrics);
    }
}

// =============================================================================
// FOLD CONTRACT
// =============================================================================

/// Read-only view over a folded aggregate.
pub trait FoldedView: Clone + Send + Sync + 'static {
    /// Sum of every folded page's summary trade count.
    fn trade_count(&self) -> u64;

    /// Concatenated raw trades, in page order.
    fn trades(&self) -> &[TradeRecord];

    /// `page_no` is the number of folded pages, `total_rows` the last seen.
    fn pagination(&self) -> &Pagination;
}

/// One fetched page that knows how to fold itself into its aggregate.
pub trait TradePage: Clone + Send + Sync + 'static {
    type Aggregate: FoldedView;

    fn pagination(&self) -> &Pagination;

    /// Empty aggregate carrying this page's header fields.
    fn seed(&self) -> Self::Aggregate;

    /// Add this page into `acc` in place.
    fn merge_into(&self, acc: &mut Self::Aggregate);
}

/// Fold an ordered, non-empty run of pages.
pub fn fold<P: TradePage>(pages: &[P]) -> Result<P::Aggregate, FoldError> {
    let first = pages.first().ok_or(FoldError::NoPages)?;
    let mut acc = first.seed();
    for page in pages {
        page.merge_into(&mut acc);
    }
    Ok(acc)
}

/// Fold one more page onto a previous result, producing a new aggregate.
/// With no previous result the page starts a new aggregate.
pub fn fold_next<P: TradePage>(prev: Option<&P::Aggregate>, page: &P) -> P::Aggregate {
    let mut acc = match prev {
        Some(prev) => prev.clone(),
        None => page.seed(),
    };
    page.merge_into(&mut acc);
    acc
}

fn seed_pagination(first: &Pagination) -> Pagination {
    Pagination {
        page_no: 0,
        page_size: first.page_size,
        total_rows: first.total_rows,
    }
}

fn advance_pagination(acc: &mut Pagination, page: &Pagination) {
    acc.page_no += 1;
    acc.total_rows = page.total_rows;
}

// =============================================================================
// COMPANY DETAIL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyDetailAggregate {
    pub company: CompanyHeader,
    pub summary: CompanySummary,
    pub products: KeyedCollection<ProductEntry>,
    pub partners: KeyedCollection<PartyEntry>,
    pub countries: KeyedCollection<CountryEntry>,
    pub ports: KeyedCollection<PortEntry>,
    pub trades: Vec<TradeRecord>,
    pub pagination: Pagination,
}

impl TradePage for CompanyDetailPage {
    type Aggregate = CompanyDetailAggregate;

    fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    fn seed(&self) -> CompanyDetailAggregate {
        CompanyDetailAggregate {
            company: self.company.clone(),
            summary: CompanySummary {
                metrics: TradeMetrics::zero(),
                ..Default::default()
            },
            products: KeyedCollection::new(),
            partners: KeyedCollection::new(),
            countries: KeyedCollection::new(),
            ports: KeyedCollection::new(),
            trades: Vec::new(),
            pagination: seed_pagination(&self.pagination),
        }
    }

    fn merge_into(&self, acc: &mut CompanyDetailAggregate) {
        acc.summary.metrics.absorb(&self.summary.metrics);
        acc.summary.units.fill_from(&self.summary.units);

        for entry in &self.products {
            acc.products.merge(entry);
        }
        for entry in &self.partners {
            acc.partners.merge(entry);
        }
        for entry in &self.countries {
            acc.countries.merge(entry);
        }
        for entry in &self.ports {
            acc.ports.merge(entry);
        }

        acc.summary.products = acc.products.len();
        acc.summary.partners = acc.partners.len();
        acc.summary.countries = acc.countries.len();
        acc.summary.ports = acc.ports.len();

        acc.trades.extend(self.trades.iter().cloned());
        advance_pagination(&mut acc.pagination, &self.pagination);
    }
}

impl FoldedView for CompanyDetailAggregate {
    fn trade_count(&self) -> u64 {
        self.summary.metrics.trade_count
    }

    fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    fn pagination(&self) -> &Pagination {
        &self.pagination
    }
}

// =============================================================================
// PRODUCT INSIGHT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductInsightAggregate {
    pub product: ProductHeader,
    pub summary: ProductSummary,
    pub buyers: KeyedCollection<PartyEntry>,
    pub suppliers: KeyedCollection<PartyEntry>,
    pub countries: KeyedCollection<CountryEntry>,
    pub ports: KeyedCollection<PortEntry>,
    pub trades: Vec<TradeRecord>,
    pub pagination: Pagination,
}

impl TradePage for ProductInsightPage {
    type Aggregate = ProductInsightAggregate;

    fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    fn seed(&self) -> ProductInsightAggregate {
        ProductInsightAggregate {
            product: self.product.clone(),
            summary: ProductSummary {
                metrics: TradeMetrics::zero(),
                ..Default::default()
            },
            buyers: KeyedCollection::new(),
            suppliers: KeyedCollection::new(),
            countries: KeyedCollection::new(),
            ports: KeyedCollection::new(),
            trades: Vec::new(),
            pagination: seed_pagination(&self.pagination),
        }
    }

    fn merge_into(&self, acc: &mut ProductInsightAggregate) {
        acc.summary.metrics.absorb(&self.summary.metrics);
        acc.summary.units.fill_from(&self.summary.units);

        for entry in &self.buyers {
            acc.buyers.merge(entry);
        }
        for entry in &self.suppliers {
            acc.suppliers.merge(entry);
        }
        for entry in &self.countries {
            acc.countries.merge(entry);
        }
        for entry in &self.ports {
            acc.ports.merge(entry);
        }

        acc.summary.buyers = acc.buyers.len();
        acc.summary.suppliers = acc.suppliers.len();
        acc.summary.countries = acc.countries.len();
        acc.summary.ports = acc.ports.len();

        acc.trades.extend(self.trades.iter().cloned());
        advance_pagination(&mut acc.pagination, &self.pagination);
    }
}

impl FoldedView for ProductInsightAggregate {
    fn trade_count(&self) -> u64 {
        self.summary.metrics.trade_count
    }

    fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    fn pagination(&self) -> &Pagination {
        &self.pagination
    }
}
