//! Query filters and wire types shared by both query families.
//!
//! Field names follow the upstream trade API (camelCase JSON). Page types
//! describe exactly one fetched page; the accumulated views live in
//! `crate::aggregation`.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// FILTER VALUES
// =============================================================================

/// Trade direction requested from upstream ("0" all, "1" import, "2" export).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeDirection {
    #[serde(rename = "0")]
    All,
    #[serde(rename = "1")]
    Import,
    #[serde(rename = "2")]
    Export,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::All => "all",
            TradeDirection::Import => "import",
            TradeDirection::Export => "export",
        }
    }
}

impl std::str::FromStr for TradeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "all" => Ok(TradeDirection::All),
            "1" | "import" => Ok(TradeDirection::Import),
            "2" | "export" => Ok(TradeDirection::Export),
            other => Err(format!("unknown trade direction: {other}")),
        }
    }
}

/// Which side of the trade the queried company is on.
/// Buyer maps to CONSIGNEE, supplier to SHIPPER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompanyType {
    #[serde(rename = "1")]
    Buyer,
    #[serde(rename = "2")]
    Supplier,
}

impl std::str::FromStr for CompanyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "buyer" | "consignee" => Ok(CompanyType::Buyer),
            "2" | "supplier" | "shipper" => Ok(CompanyType::Supplier),
            other => Err(format!("unknown company type: {other}")),
        }
    }
}

/// Inclusive date range. Defaults to the current calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn current_year() -> Self {
        Self::year(Utc::now().year())
    }

    pub fn year(year: i32) -> Self {
        // Jan 1 and Dec 31 exist in every year chrono can represent.
        let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN);
        let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::current_year()
    }
}

/// Filter for the company-centric detail query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyFilter {
    pub company_name: String,
    pub company_type: CompanyType,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<TradeDirection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goods_desc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hs_code: Vec<String>,
}

impl CompanyFilter {
    pub fn new(company_name: impl Into<String>, company_type: CompanyType) -> Self {
        let range = DateRange::current_year();
        Self {
            company_name: company_name.into(),
            company_type,
            date_start: range.start,
            date_end: range.end,
            data_type: None,
            goods_desc: Vec::new(),
            hs_code: Vec::new(),
        }
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_start = range.start;
        self.date_end = range.end;
        self
    }

    pub fn with_direction(mut self, direction: TradeDirection) -> Self {
        self.data_type = Some(direction);
        self
    }

    pub fn with_goods_desc(mut self, goods_desc: Vec<String>) -> Self {
        self.goods_desc = goods_desc;
        self
    }

    pub fn with_hs_codes(mut self, hs_code: Vec<String>) -> Self {
        self.hs_code = hs_code;
        self
    }
}

/// Filter for the product-centric insight query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goods_desc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hs_code: Vec<String>,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<TradeDirection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origin_country_tc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dest_country_tc: Vec<String>,
}

impl ProductFilter {
    pub fn new(goods_desc: Vec<String>, hs_code: Vec<String>) -> Self {
        let range = DateRange::current_year();
        Self {
            goods_desc,
            hs_code,
            date_start: range.start,
            date_end: range.end,
            data_type: None,
            origin_country_tc: Vec::new(),
            dest_country_tc: Vec::new(),
        }
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_start = range.start;
        self.date_end = range.end;
        self
    }

    pub fn with_direction(mut self, direction: TradeDirection) -> Self {
        self.data_type = Some(direction);
        self
    }

    pub fn with_countries(mut self, origin: Vec<String>, dest: Vec<String>) -> Self {
        self.origin_country_tc = origin;
        self.dest_country_tc = dest;
        self
    }
}

// =============================================================================
// PAGE BUILDING BLOCKS
// =============================================================================

/// Pagination descriptor returned with every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page_no: u32,
    pub page_size: u32,
    pub total_rows: u64,
}

/// Summable per-key metrics. Missing totals count as zero when summed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMetrics {
    pub trade_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_value: Option<f64>,
}

impl TradeMetrics {
    /// Accumulator starting point: every total present and zero.
    pub fn zero() -> Self {
        Self {
            trade_count: 0,
            total_quantity: Some(0.0),
            total_weight: Some(0.0),
            total_value: Some(0.0),
        }
    }

    pub fn absorb(&mut self, other: &TradeMetrics) {
        self.trade_count += other.trade_count;
        self.total_quantity = Some(sum_opt(self.total_quantity, other.total_quantity));
        self.total_weight = Some(sum_opt(self.total_weight, other.total_weight));
        self.total_value = Some(sum_opt(self.total_value, other.total_value));
    }
}

#[inline]
fn sum_opt(a: Option<f64>, b: Option<f64>) -> f64 {
    a.unwrap_or(0.0) + b.unwrap_or(0.0)
}

/// Unit labels attached to quantity/weight/value totals.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Units {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_unit: Option<String>,
}

impl Units {
    /// Keep the first unit seen for each total.
    pub fn fill_from(&mut self, other: &Units) {
        if self.quantity_unit.is_none() {
            self.quantity_unit = other.quantity_unit.clone();
        }
        if self.weight_unit.is_none() {
            self.weight_unit = other.weight_unit.clone();
        }
        if self.value_unit.is_none() {
            self.value_unit = other.value_unit.clone();
        }
    }
}

/// One raw trade record. Never merged or deduplicated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub goods_desc: String,
    pub hs_code: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_imp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipper: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rowkey: Option<String>,
}

// =============================================================================
// KEYED ENTRIES
// =============================================================================

/// Per-product line, keyed by goods description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEntry {
    pub goods_desc: String,
    #[serde(default)]
    pub hs_codes: Vec<String>,
    #[serde(flatten)]
    pub metrics: TradeMetrics,
    #[serde(flatten)]
    pub units: Units,
}

/// Counterparty line (partner, buyer or supplier), keyed by company name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyEntry {
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(flatten)]
    pub metrics: TradeMetrics,
}

/// Country line, keyed by country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryEntry {
    pub country: String,
    #[serde(flatten)]
    pub metrics: TradeMetrics,
}

/// Port line, keyed by country and port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortEntry {
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(flatten)]
    pub metrics: TradeMetrics,
}

// =============================================================================
// COMPANY DETAIL PAGE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyRole {
    Buyer,
    Supplier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyHeader {
    pub name: String,
    pub role: CompanyRole,
    #[serde(rename = "dateRange")]
    pub date_range: DateRange,
}

/// Page-level summary for the company family. Counts describe this page only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySummary {
    #[serde(flatten)]
    pub metrics: TradeMetrics,
    #[serde(flatten)]
    pub units: Units,
    #[serde(default)]
    pub products: usize,
    #[serde(default)]
    pub partners: usize,
    #[serde(default)]
    pub countries: usize,
    #[serde(default)]
    pub ports: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDetailPage {
    pub company: CompanyHeader,
    pub summary: CompanySummary,
    #[serde(default)]
    pub products: Vec<ProductEntry>,
    #[serde(default)]
    pub partners: Vec<PartyEntry>,
    #[serde(default)]
    pub countries: Vec<CountryEntry>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    pub pagination: Pagination,
}

// =============================================================================
// PRODUCT INSIGHT PAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goods_desc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<Vec<String>>,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    #[serde(flatten)]
    pub metrics: TradeMetrics,
    #[serde(flatten)]
    pub units: Units,
    #[serde(default)]
    pub buyers: usize,
    #[serde(default)]
    pub suppliers: usize,
    #[serde(default)]
    pub countries: usize,
    #[serde(default)]
    pub ports: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInsightPage {
    pub product: ProductHeader,
    pub summary: ProductSummary,
    #[serde(default)]
    pub buyers: Vec<PartyEntry>,
    #[serde(default)]
    pub suppliers: Vec<PartyEntry>,
    #[serde(default)]
    pub countries: Vec<CountryEntry>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    pub pagination: Pagination,
}

// =============================================================================
// COMPANY LIST (single page search)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompaniesQuery {
    pub page_no: u32,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub company_name: String,
    pub company_type: CompanyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<TradeDirection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goods_desc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hs_code: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyListing {
    pub company_name: String,
    pub company_type: String,
    pub trade_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_quantity: Option<f64>,
    #[serde(default)]
    pub hs_codes: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub origin_countries: Vec<String>,
    #[serde(default)]
    pub dest_countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_trade_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_trade_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompaniesPage {
    pub total_in_page: u64,
    #[serde(default)]
    pub list: Vec<CompanyListing>,
    pub page_no: u32,
    pub page_size: u32,
}

// =============================================================================
// ENRICHMENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryDetails {
    #[serde(rename = "registeredAddress", default, skip_serializing_if = "Option::is_none")]
    pub registered_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dateinc: Option<String>,
    // Upstream spells these inconsistently ("Indury"); keep its names on the wire.
    #[serde(rename = "nAICSMainIndustryName", default, skip_serializing_if = "Option::is_none")]
    pub naics_industry_name: Option<String>,
    #[serde(rename = "nAICSMainInduryCode", default, skip_serializing_if = "Option::is_none")]
    pub naics_industry_code: Option<String>,
    #[serde(rename = "uSSICMainIndustryName", default, skip_serializing_if = "Option::is_none")]
    pub us_sic_industry_name: Option<String>,
    #[serde(rename = "uSSICMainIndustryCode", default, skip_serializing_if = "Option::is_none")]
    pub us_sic_industry_code: Option<String>,
    #[serde(rename = "nACECMainIndustryName", default, skip_serializing_if = "Option::is_none")]
    pub nace_industry_name: Option<String>,
    #[serde(rename = "nACECMainInduryCode", default, skip_serializing_if = "Option::is_none")]
    pub nace_industry_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEntity {
    pub company_name_internat: String,
    #[serde(default)]
    pub company_name_native: String,
    pub company_ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_category: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub company_scale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<RegistryDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyEnrichment {
    pub company_name: String,
    #[serde(default)]
    pub entities: Vec<EnrichedEntity>,
}
