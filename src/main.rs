//! Tradescope CLI
//!
//! Runs one aggregation against the trade API and prints the result as JSON.
//!
//! ```bash
//! TRADE_API_URL=http://localhost:4000 tradescope company "ACME LTD" --role buyer
//! tradescope product --hs 8501 --from 2024-01-01 --to 2024-12-31 --max-pages 5
//! tradescope enrich "ACME LTD"
//! tradescope companies "ACME" --page 2
//! ```

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradescope::{
    cache::CacheConfig,
    controller::AggregateOf,
    models::{CompaniesQuery, CompanyFilter, CompanyType, DateRange, ProductFilter, TradeDirection},
    ClientConfig, CompanyDetailQuery, ControllerConfig, EnrichmentLookup, FetchState, PageCache,
    PageFetchController, PageSource, ProductInsightQuery, QueryFamily, Snapshot, TradeApiClient,
};

#[derive(Parser, Debug)]
#[command(name = "tradescope")]
#[command(about = "Aggregate paginated trade-record queries into one view")]
struct Cli {
    /// Trade API base URL
    #[arg(long, env = "TRADE_API_URL", global = true)]
    api_url: Option<String>,

    /// Stop after this many pages (overrides TRADE_MAX_PAGES)
    #[arg(long, global = true)]
    max_pages: Option<u32>,

    /// First day of the date range (YYYY-MM-DD)
    #[arg(long, global = true)]
    from: Option<NaiveDate>,

    /// Last day of the date range (YYYY-MM-DD)
    #[arg(long, global = true)]
    to: Option<NaiveDate>,

    /// all, import or export
    #[arg(long, global = true)]
    direction: Option<TradeDirection>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Company detail: products, partners, countries and ports
    Company {
        name: String,
        #[arg(long, default_value = "buyer")]
        role: CompanyType,
        #[arg(long)]
        goods: Vec<String>,
        #[arg(long)]
        hs: Vec<String>,
    },
    /// Product insight: buyers, suppliers, countries and ports
    Product {
        #[arg(long)]
        goods: Vec<String>,
        #[arg(long)]
        hs: Vec<String>,
        #[arg(long)]
        origin: Vec<String>,
        #[arg(long)]
        dest: Vec<String>,
    },
    /// Registry and contact enrichment for one company
    Enrich { name: String },
    /// One page of the company search
    Companies {
        name: String,
        #[arg(long, default_value = "buyer")]
        role: CompanyType,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        config.base_url = Some(url.trim_end_matches('/').to_string());
    }
    if let Some(max_pages) = cli.max_pages {
        config.max_pages = max_pages;
    }
    let config = config.normalized();

    let client = Arc::new(TradeApiClient::from_config(&config)?);
    let range = date_range(cli.from, cli.to)?;

    match cli.command {
        Command::Company {
            name,
            role,
            goods,
            hs,
        } => {
            let mut filter = CompanyFilter::new(name, role)
                .with_date_range(range)
                .with_goods_desc(goods)
                .with_hs_codes(hs);
            if let Some(direction) = cli.direction {
                filter = filter.with_direction(direction);
            }
            let snapshot = run_query::<CompanyDetailQuery>(client, &config, filter).await?;
            emit_snapshot(&snapshot)?;
        }
        Command::Product {
            goods,
            hs,
            origin,
            dest,
        } => {
            let mut filter = ProductFilter::new(goods, hs)
                .with_date_range(range)
                .with_countries(origin, dest);
            if let Some(direction) = cli.direction {
                filter = filter.with_direction(direction);
            }
            let snapshot = run_query::<ProductInsightQuery>(client, &config, filter).await?;
            emit_snapshot(&snapshot)?;
        }
        Command::Enrich { name } => {
            let lookup = EnrichmentLookup::from_config(client, &config);
            let outcome = lookup.lookup(&name).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Companies { name, role, page } => {
            let query = CompaniesQuery {
                page_no: page.max(1),
                date_start: range.start,
                date_end: range.end,
                company_name: name,
                company_type: role,
                data_type: cli.direction,
                goods_desc: Vec::new(),
                hs_code: Vec::new(),
            };
            let listing = client.list_companies(&query).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
    }

    Ok(())
}

/// Drive one query to completion, logging progress after every fold.
async fn run_query<Q>(
    client: Arc<TradeApiClient>,
    config: &ClientConfig,
    filter: Q::Filter,
) -> Result<Snapshot<Q>>
where
    Q: QueryFamily,
    TradeApiClient: PageSource<Q>,
{
    let cache = Arc::new(PageCache::new(CacheConfig::new(
        config.page_stale,
        config.cache_max_entries,
    )));
    let controller = PageFetchController::<Q>::new(client, cache, ControllerConfig::from(config));

    let mut rx = controller.subscribe();
    let reporter = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let (state, progress) = {
                let snapshot = rx.borrow_and_update();
                (snapshot.state, snapshot.progress)
            };
            if let FetchState::Fetching { .. } = state {
                info!(
                    %state,
                    fetched = progress.fetched_pages,
                    total = progress.total_pages,
                    "Progress"
                );
            }
        }
    });

    controller.start_or_update(filter)?;
    let snapshot = controller.settled().await;
    reporter.abort();

    Ok(snapshot)
}

/// Print the aggregate (partial on error) and fail if the run errored.
fn emit_snapshot<Q>(snapshot: &Snapshot<Q>) -> Result<()>
where
    Q: QueryFamily,
    AggregateOf<Q>: Serialize,
{
    let report = json!({
        "state": snapshot.state.to_string(),
        "truncated": snapshot.is_truncated(),
        "progress": snapshot.progress,
        "error": snapshot.error.as_ref().map(|e| e.to_string()),
        "aggregate": snapshot.aggregate.as_deref(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(e) = &snapshot.error {
        bail!("query stopped at {}: {}", snapshot.state, e);
    }
    Ok(())
}

fn date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<DateRange> {
    let default = DateRange::current_year();
    let range = DateRange::new(from.unwrap_or(default.start), to.unwrap_or(default.end));
    if range.start > range.end {
        bail!("--from {} is after --to {}", range.start, range.end);
    }
    Ok(range)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradescope=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
