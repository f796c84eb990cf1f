//! Page fetch controller
//!
//! Drives one filter's pages strictly in order with a single fetch in flight:
//!
//! ```text
//! Idle -> Fetching(n) -> Folding(n) -> Fetching(n+1) | Complete | Errored
//! ```
//!
//! - Fetching starts only on `start_or_update` with a complete filter
//! - After each fold the loop decides synchronously whether to continue:
//!   `page_no < total_pages && page_no < max_pages`
//! - A new filter supersedes the running task; its late results are dropped
//! - Transient failures are retried within the budget, then the run halts in
//!   `Errored` and keeps the aggregate folded so far; `retry` resumes at the
//!   failed page on top of it
//! - Pages are cached by `(kind, filter, page_no)` for the staleness window
//!
//! State is published through a `watch` channel. Every published aggregate
//! is a finished fold, never a partially merged one.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    aggregation::{fold_next, FoldedView, TradePage},
    config::ClientConfig,
    error::FetchError,
    models::TradeRecord,
    progress::{total_pages, Progress},
    query::{PageCache, QueryFamily},
    retry::RetryPolicy,
    source::PageSource,
};

pub type AggregateOf<Q> = <<Q as QueryFamily>::Page as TradePage>::Aggregate;

// =============================================================================
// STATE
// =============================================================================

/// Why a run finished successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Every page upstream reported has been folded.
    Exhausted,
    /// Stopped at `max_pages` with more pages available upstream.
    Capped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching { page_no: u32 },
    Folding { page_no: u32 },
    Complete(CompletionReason),
    Errored { page_no: u32 },
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Fetching { page_no } => write!(f, "FETCHING({})", page_no),
            Self::Folding { page_no } => write!(f, "FOLDING({})", page_no),
            Self::Complete(CompletionReason::Exhausted) => write!(f, "COMPLETE(exhausted)"),
            Self::Complete(CompletionReason::Capped) => write!(f, "COMPLETE(capped)"),
            Self::Errored { page_no } => write!(f, "ERRORED({})", page_no),
        }
    }
}

/// Everything a caller can observe about the current run.
pub struct Snapshot<Q: QueryFamily> {
    pub filter: Option<Q::Filter>,
    pub state: FetchState,
    pub aggregate: Option<Arc<AggregateOf<Q>>>,
    pub progress: Progress,
    pub error: Option<FetchError>,
    generation: u64,
}

impl<Q: QueryFamily> Clone for Snapshot<Q> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            state: self.state,
            aggregate: self.aggregate.clone(),
            progress: self.progress,
            error: self.error.clone(),
            generation: self.generation,
        }
    }
}

impl<Q: QueryFamily> std::fmt::Debug for Snapshot<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("filter", &self.filter)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .field("error", &self.error)
            .field("has_aggregate", &self.aggregate.is_some())
            .finish()
    }
}

impl<Q: QueryFamily> Snapshot<Q> {
    fn idle(generation: u64) -> Self {
        Self {
            filter: None,
            state: FetchState::Idle,
            aggregate: None,
            progress: Progress::default(),
            error: None,
            generation,
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(
            self.state,
            FetchState::Fetching { .. } | FetchState::Folding { .. }
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, FetchState::Complete(_))
    }

    /// Complete, but upstream has more pages than were fetched.
    pub fn is_truncated(&self) -> bool {
        self.state == FetchState::Complete(CompletionReason::Capped)
    }

    /// Concatenated raw trades folded so far.
    pub fn trades(&self) -> &[TradeRecord] {
        match &self.aggregate {
            Some(agg) => agg.trades(),
            None => &[],
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub page_size: u32,
    pub max_pages: u32,
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ControllerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            retry: config.page_retry(),
        }
    }
}

/// Outcome of the continue-or-stop decision after a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Next(u32),
    Done(CompletionReason),
}

pub(crate) fn next_step(page_no: u32, total_rows: u64, page_size: u32, max_pages: u32) -> Step {
    if page_no >= total_pages(total_rows, page_size) {
        Step::Done(CompletionReason::Exhausted)
    } else if page_no >= max_pages {
        Step::Done(CompletionReason::Capped)
    } else {
        Step::Next(page_no + 1)
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct PageFetchController<Q: QueryFamily> {
    source: Arc<dyn PageSource<Q>>,
    cache: Arc<PageCache>,
    config: ControllerConfig,
    tx: Arc<watch::Sender<Snapshot<Q>>>,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<Q: QueryFamily> PageFetchController<Q> {
    pub fn new(
        source: Arc<dyn PageSource<Q>>,
        cache: Arc<PageCache>,
        config: ControllerConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(Snapshot::idle(0));
        Self {
            source,
            cache,
            config,
            tx: Arc::new(tx),
            generation: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Apply a filter. Starts fetching unless the same filter is already
    /// running or finished; a different filter discards the current run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_or_update(&self, filter: Q::Filter) -> Result<(), FetchError> {
        let mut task = self.task.lock();

        if let Err(e) = Q::validate(&filter) {
            warn!(kind = Q::KIND.as_str(), error = %e, "Filter incomplete, not fetching");
            let generation = self.supersede(&mut task);
            self.tx.send_replace(Snapshot {
                filter: Some(filter),
                error: Some(e.clone()),
                ..Snapshot::idle(generation)
            });
            return Err(e);
        }

        {
            let current = self.tx.borrow();
            let same = current.filter.as_ref() == Some(&filter);
            let restartable = matches!(current.state, FetchState::Idle | FetchState::Errored { .. });
            if same && !restartable {
                debug!(kind = Q::KIND.as_str(), state = %current.state, "Filter unchanged, keeping run");
                return Ok(());
            }
        }

        self.launch(&mut task, filter, None, 1);
        Ok(())
    }

    /// Resume an errored run at the page that failed. The aggregate folded so
    /// far stays visible while the remaining pages are fetched. Returns false
    /// when there is nothing to retry.
    pub fn retry(&self) -> bool {
        let mut task = self.task.lock();

        let (filter, aggregate, page_no) = {
            let current = self.tx.borrow();
            match (&current.state, &current.filter) {
                (FetchState::Errored { page_no }, Some(filter)) => {
                    (filter.clone(), current.aggregate.clone(), *page_no)
                }
                _ => return false,
            }
        };
        // Without a folded page there is nothing to resume from.
        let page_no = if aggregate.is_some() { page_no } else { 1 };

        self.launch(&mut task, filter, aggregate, page_no);
        true
    }

    /// Drop the current run and return to `Idle` with nothing accumulated.
    pub fn cancel(&self) {
        let mut task = self.task.lock();
        let generation = self.supersede(&mut task);
        info!(kind = Q::KIND.as_str(), "Run cancelled");
        self.tx.send_replace(Snapshot::idle(generation));
    }

    pub fn snapshot(&self) -> Snapshot<Q> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<Q>> {
        self.tx.subscribe()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.tx.borrow().trades().to_vec()
    }

    /// Wait until the current run is no longer fetching.
    pub async fn settled(&self) -> Snapshot<Q> {
        let mut rx = self.tx.subscribe();
        let settled = match rx.wait_for(|s| !s.is_fetching()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    /// Invalidate the running task. Returns the new generation.
    ///
    /// Takes the held task slot so that superseding, publishing and storing
    /// the next handle happen under one lock.
    fn supersede(&self, task: &mut Option<JoinHandle<()>>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(handle) = task.take() {
            handle.abort();
        }
        generation
    }

    fn launch(
        &self,
        task: &mut Option<JoinHandle<()>>,
        filter: Q::Filter,
        seed: Option<Arc<AggregateOf<Q>>>,
        page_no: u32,
    ) {
        let generation = self.supersede(task);
        info!(kind = Q::KIND.as_str(), generation, page_no, filter = ?filter, "Starting run");

        self.tx.send_replace(Snapshot {
            filter: Some(filter.clone()),
            state: FetchState::Fetching { page_no },
            aggregate: seed.clone(),
            progress: Progress::of(seed.as_deref(), self.config.page_size),
            ..Snapshot::idle(generation)
        });

        let run = Run::<Q> {
            source: self.source.clone(),
            cache: self.cache.clone(),
            config: self.config,
            tx: self.tx.clone(),
            generation,
            filter,
            seed,
            page_no,
        };
        *task = Some(tokio::spawn(run.execute()));
    }
}

impl<Q: QueryFamily> Drop for PageFetchController<Q> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// RUN LOOP
// =============================================================================

/// One filter's fetch loop. Owns everything it needs so the task is 'static.
struct Run<Q: QueryFamily> {
    source: Arc<dyn PageSource<Q>>,
    cache: Arc<PageCache>,
    config: ControllerConfig,
    tx: Arc<watch::Sender<Snapshot<Q>>>,
    generation: u64,
    filter: Q::Filter,
    /// Aggregate of pages `1..page_no` when resuming.
    seed: Option<Arc<AggregateOf<Q>>>,
    page_no: u32,
}

impl<Q: QueryFamily> Run<Q> {
    async fn execute(mut self) {
        let mut aggregate = self.seed.take();
        let mut page_no = self.page_no;

        loop {
            let page = match self.fetch(page_no).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(kind = Q::KIND.as_str(), page_no, error = %e, "Page fetch failed, halting run");
                    self.publish(|s| {
                        s.state = FetchState::Errored { page_no };
                        s.error = Some(e);
                    });
                    return;
                }
            };

            if !self.publish(|s| s.state = FetchState::Folding { page_no }) {
                debug!(kind = Q::KIND.as_str(), page_no, "Run superseded, dropping page");
                return;
            }

            // Fold and decide without yielding.
            let folded = Arc::new(fold_next(aggregate.as_deref(), &*page));
            let step = next_step(
                page_no,
                page.pagination().total_rows,
                self.config.page_size,
                self.config.max_pages,
            );
            let progress = Progress::of(Some(&*folded), self.config.page_size);
            let state = match step {
                Step::Next(next) => FetchState::Fetching { page_no: next },
                Step::Done(reason) => FetchState::Complete(reason),
            };
            aggregate = Some(folded.clone());

            let published = self.publish(|s| {
                s.aggregate = Some(folded);
                s.progress = progress;
                s.state = state;
            });
            if !published {
                return;
            }

            debug!(
                kind = Q::KIND.as_str(),
                page_no,
                fetched = progress.fetched_pages,
                total = progress.total_pages,
                "Page folded"
            );

            match step {
                Step::Next(next) => page_no = next,
                Step::Done(reason) => {
                    info!(
                        kind = Q::KIND.as_str(),
                        pages = progress.fetched_pages,
                        total_pages = progress.total_pages,
                        ?reason,
                        "Run complete"
                    );
                    return;
                }
            }
        }
    }

    /// Cached page if fresh, otherwise fetch with retry and cache the result.
    async fn fetch(&self, page_no: u32) -> Result<Arc<Q::Page>, FetchError> {
        let key = Q::page_key(&self.filter, page_no);
        if let Some(page) = self.cache.get(&key).and_then(Q::from_cached) {
            debug!(kind = Q::KIND.as_str(), page_no, "Page cache hit");
            return Ok(page);
        }

        let source = self.source.as_ref();
        let filter = &self.filter;
        let page = self
            .config
            .retry
            .run(Q::KIND.as_str(), move || source.fetch_page(filter, page_no))
            .await?;

        let page = Arc::new(page);
        self.cache.insert(key, Q::into_cached(page.clone()));
        Ok(page)
    }

    /// Apply `update` only if this run is still current.
    fn publish(&self, update: impl FnOnce(&mut Snapshot<Q>)) -> bool {
        let generation = self.generation;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            update(snapshot);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{
        fold,
        tests::{company_page, product},
    };
    use crate::cache::CacheConfig;
    use crate::models::{CompanyDetailPage, CompanyFilter, CompanyType};
    use crate::query::CompanyDetailQuery;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Serves `total_rows` worth of pages per company name. Errors queued for a
    /// page are returned (in order) before it succeeds. Names in `blocked`
    /// wait on `release` before answering.
    struct ScriptedSource {
        total_rows: u64,
        failures: Mutex<HashMap<u32, Vec<FetchError>>>,
        requests: Mutex<Vec<(String, u32)>>,
        blocked: Vec<String>,
        release: Notify,
        delay: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(total_rows: u64) -> Self {
            Self {
                total_rows,
                failures: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                blocked: Vec::new(),
                release: Notify::new(),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn fail_next(&self, page_no: u32, errors: Vec<FetchError>) {
            self.failures.lock().insert(page_no, errors);
        }

        fn failing(self, page_no: u32, errors: Vec<FetchError>) -> Self {
            self.failures.lock().insert(page_no, errors);
            self
        }

        fn blocking(mut self, name: &str) -> Self {
            self.blocked.push(name.to_string());
            self
        }

        fn requests(&self) -> Vec<(String, u32)> {
            self.requests.lock().clone()
        }

        fn page_requests(&self) -> Vec<u32> {
            self.requests().into_iter().map(|(_, p)| p).collect()
        }
    }

    fn scripted_page(name: &str, page_no: u32, total_rows: u64) -> CompanyDetailPage {
        let trade_id = format!("{name}-{page_no}");
        let mut page = company_page(
            page_no,
            total_rows,
            2,
            vec![product("WIDGET", &["8501"], 1), product(&format!("ITEM-{page_no}"), &[], 1)],
            &[trade_id.as_str()],
        );
        page.company.name = name.to_string();
        page
    }

    #[async_trait]
    impl PageSource<CompanyDetailQuery> for ScriptedSource {
        async fn fetch_page(
            &self,
            filter: &CompanyFilter,
            page_no: u32,
        ) -> Result<CompanyDetailPage, FetchError> {
            self.requests
                .lock()
                .push((filter.company_name.clone(), page_no));

            if self.blocked.contains(&filter.company_name) {
                self.release.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let queued = {
                let mut failures = self.failures.lock();
                failures.get_mut(&page_no).and_then(|errs| {
                    if errs.is_empty() {
                        None
                    } else {
                        Some(errs.remove(0))
                    }
                })
            };
            if let Some(e) = queued {
                return Err(e);
            }

            Ok(scripted_page(&filter.company_name, page_no, self.total_rows))
        }
    }

    fn new_cache() -> Arc<PageCache> {
        Arc::new(PageCache::new(CacheConfig::new(Duration::from_secs(300), 64)))
    }

    fn config(max_pages: u32) -> ControllerConfig {
        ControllerConfig {
            page_size: 200,
            max_pages,
            retry: RetryPolicy::immediate(2),
        }
    }

    fn controller(
        source: Arc<ScriptedSource>,
        cache: Arc<PageCache>,
        max_pages: u32,
    ) -> PageFetchController<CompanyDetailQuery> {
        PageFetchController::new(source, cache, config(max_pages))
    }

    fn filter(name: &str) -> CompanyFilter {
        CompanyFilter::new(name, CompanyType::Buyer)
    }

    #[test]
    fn test_next_step_rules() {
        assert_eq!(next_step(1, 450, 200, 200), Step::Next(2));
        assert_eq!(next_step(3, 450, 200, 200), Step::Done(CompletionReason::Exhausted));
        assert_eq!(next_step(2, 450, 200, 2), Step::Done(CompletionReason::Capped));
        // Exhausted wins when both limits coincide
        assert_eq!(next_step(3, 450, 200, 3), Step::Done(CompletionReason::Exhausted));
        assert_eq!(next_step(1, 0, 200, 200), Step::Done(CompletionReason::Exhausted));
    }

    #[tokio::test]
    async fn test_runs_to_exhaustion_in_page_order() {
        let source = Arc::new(ScriptedSource::new(450));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert_eq!(snap.state, FetchState::Complete(CompletionReason::Exhausted));
        assert!(!snap.is_truncated());
        assert_eq!(snap.progress, Progress { fetched_pages: 3, total_pages: 3 });
        assert_eq!(source.page_requests(), vec![1, 2, 3]);

        let ids: Vec<_> = snap.trades().iter().filter_map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["ACME-1", "ACME-2", "ACME-3"]);

        let agg = snap.aggregate.unwrap();
        assert_eq!(agg.summary.metrics.trade_count, 6);
        // WIDGET on every page, ITEM-n once each
        assert_eq!(agg.summary.products, 4);
        assert_eq!(agg.products.get("WIDGET").unwrap().metrics.trade_count, 3);
    }

    #[tokio::test]
    async fn test_stops_at_page_ceiling() {
        let source = Arc::new(ScriptedSource::new(450));
        let ctl = controller(source.clone(), new_cache(), 2);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert_eq!(snap.state, FetchState::Complete(CompletionReason::Capped));
        assert!(snap.is_truncated());
        assert_eq!(snap.progress, Progress { fetched_pages: 2, total_pages: 3 });
        assert_eq!(source.page_requests(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_zero_rows_completes_after_first_page() {
        let source = Arc::new(ScriptedSource::new(0));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert_eq!(snap.state, FetchState::Complete(CompletionReason::Exhausted));
        assert_eq!(snap.progress, Progress { fetched_pages: 1, total_pages: 0 });
    }

    #[tokio::test]
    async fn test_incomplete_filter_never_fetches() {
        let source = Arc::new(ScriptedSource::new(450));
        let ctl = controller(source.clone(), new_cache(), 200);

        let err = ctl.start_or_update(filter("  ")).unwrap_err();
        assert_eq!(err, FetchError::missing("companyName"));

        let snap = ctl.snapshot();
        assert_eq!(snap.state, FetchState::Idle);
        assert_eq!(snap.error, Some(FetchError::missing("companyName")));
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = Arc::new(ScriptedSource::new(450).failing(
            2,
            vec![FetchError::transport("reset"), FetchError::transport("timeout")],
        ));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert!(snap.is_complete());
        assert_eq!(snap.error, None);
        assert_eq!(source.page_requests(), vec![1, 2, 2, 2, 3]);
    }

    #[tokio::test]
    async fn test_error_after_budget_keeps_partial_aggregate() {
        let source = Arc::new(ScriptedSource::new(450).failing(
            2,
            vec![
                FetchError::transport("reset"),
                FetchError::transport("reset"),
                FetchError::transport("reset"),
            ],
        ));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert_eq!(snap.state, FetchState::Errored { page_no: 2 });
        assert!(matches!(snap.error, Some(FetchError::TransportFailure { .. })));
        assert_eq!(snap.progress.fetched_pages, 1);

        let expected = fold(&[scripted_page("ACME", 1, 450)]).unwrap();
        assert_eq!(snap.aggregate.as_deref(), Some(&expected));
        // No auto-continuation past the failed page
        assert_eq!(source.page_requests(), vec![1, 2, 2, 2]);
    }

    #[tokio::test]
    async fn test_upstream_error_is_not_retried() {
        let source = Arc::new(
            ScriptedSource::new(450).failing(1, vec![FetchError::upstream(Some(400), "bad range")]),
        );
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert_eq!(snap.state, FetchState::Errored { page_no: 1 });
        assert_eq!(snap.error, Some(FetchError::upstream(Some(400), "bad range")));
        assert!(snap.aggregate.is_none());
        assert_eq!(source.page_requests(), vec![1]);
    }

    #[tokio::test]
    async fn test_retry_resumes_at_failed_page() {
        let source = Arc::new(ScriptedSource::new(450).failing(
            2,
            vec![
                FetchError::transport("reset"),
                FetchError::transport("reset"),
                FetchError::transport("reset"),
            ],
        ));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        assert!(matches!(ctl.settled().await.state, FetchState::Errored { .. }));

        assert!(ctl.retry());
        let snap = ctl.settled().await;

        assert_eq!(snap.state, FetchState::Complete(CompletionReason::Exhausted));
        assert_eq!(snap.progress.fetched_pages, 3);
        // Page 1 is not fetched again
        assert_eq!(source.page_requests(), vec![1, 2, 2, 2, 2, 3]);
    }

    fn resets(n: usize) -> Vec<FetchError> {
        (0..n).map(|_| FetchError::transport("reset")).collect()
    }

    #[tokio::test]
    async fn test_retry_keeps_partial_aggregate_without_cache() {
        let source = Arc::new(ScriptedSource::new(450).failing(2, resets(6)));
        let cache = Arc::new(PageCache::new(CacheConfig::new(Duration::ZERO, 64)));
        let ctl = controller(source.clone(), cache, 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let errored = ctl.settled().await;
        assert_eq!(errored.state, FetchState::Errored { page_no: 2 });
        let partial = errored.aggregate.clone().unwrap();

        // A refetch of page 1 would fail now
        source.fail_next(1, resets(3));

        assert!(ctl.retry());
        let resumed = ctl.snapshot();
        assert_eq!(resumed.state, FetchState::Fetching { page_no: 2 });
        assert_eq!(resumed.aggregate.as_deref(), Some(&*partial));
        assert_eq!(resumed.progress.fetched_pages, 1);
        assert_eq!(resumed.error, None);

        // Page 2 still failing: the partial result survives a failed retry
        let snap = ctl.settled().await;
        assert_eq!(snap.state, FetchState::Errored { page_no: 2 });
        assert_eq!(snap.aggregate.as_deref(), Some(&*partial));
        assert_eq!(snap.progress.fetched_pages, 1);

        assert!(ctl.retry());
        let snap = ctl.settled().await;
        assert_eq!(snap.state, FetchState::Complete(CompletionReason::Exhausted));
        assert_eq!(snap.progress.fetched_pages, 3);

        let expected = fold(&[
            scripted_page("ACME", 1, 450),
            scripted_page("ACME", 2, 450),
            scripted_page("ACME", 3, 450),
        ])
        .unwrap();
        assert_eq!(snap.aggregate.as_deref(), Some(&expected));
        assert_eq!(source.page_requests().iter().filter(|&&p| p == 1).count(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_first_page_failure_starts_over() {
        let source = Arc::new(ScriptedSource::new(100).failing(1, resets(3)));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;
        assert_eq!(snap.state, FetchState::Errored { page_no: 1 });
        assert!(snap.aggregate.is_none());

        assert!(ctl.retry());
        assert_eq!(ctl.snapshot().state, FetchState::Fetching { page_no: 1 });
        let snap = ctl.settled().await;
        assert!(snap.is_complete());
        assert_eq!(snap.progress.fetched_pages, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_updates_leave_no_orphan_run() {
        // 50 pages, each taking a millisecond
        let source = Arc::new(ScriptedSource::new(200 * 50).with_delay(Duration::from_millis(1)));
        let ctl = controller(source.clone(), new_cache(), 200);
        let handle = tokio::runtime::Handle::current();

        std::thread::scope(|s| {
            for i in 0..8 {
                let ctl = &ctl;
                let handle = &handle;
                s.spawn(move || {
                    let _guard = handle.enter();
                    for j in 0..20 {
                        ctl.start_or_update(filter(&format!("ACME-{i}-{j}"))).unwrap();
                    }
                });
            }
        });

        ctl.cancel();
        // A poll already in progress on another worker may still record one request
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_cancel = source.requests().len();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(source.requests().len(), after_cancel);
        assert_eq!(ctl.snapshot().state, FetchState::Idle);
    }

    #[tokio::test]
    async fn test_retry_without_error_is_noop() {
        let source = Arc::new(ScriptedSource::new(100));
        let ctl = controller(source.clone(), new_cache(), 200);
        assert!(!ctl.retry());

        ctl.start_or_update(filter("ACME")).unwrap();
        ctl.settled().await;
        assert!(!ctl.retry());
    }

    #[tokio::test]
    async fn test_same_filter_within_staleness_window_uses_cache() {
        let source = Arc::new(ScriptedSource::new(450));
        let cache = new_cache();

        let first = controller(source.clone(), cache.clone(), 200);
        first.start_or_update(filter("ACME")).unwrap();
        let a = first.settled().await;

        let second = controller(source.clone(), cache, 200);
        second.start_or_update(filter("ACME")).unwrap();
        let b = second.settled().await;

        assert_eq!(source.page_requests().len(), 3);
        assert_eq!(a.aggregate, b.aggregate);
    }

    #[tokio::test]
    async fn test_stale_cache_is_refetched() {
        let source = Arc::new(ScriptedSource::new(100));
        let cache = Arc::new(PageCache::new(CacheConfig::new(Duration::ZERO, 64)));
        let ctl = controller(source.clone(), cache, 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        ctl.settled().await;
        ctl.cancel();
        ctl.start_or_update(filter("ACME")).unwrap();
        ctl.settled().await;

        assert_eq!(source.page_requests(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_unchanged_filter_does_not_restart() {
        let source = Arc::new(ScriptedSource::new(100));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        ctl.settled().await;
        ctl.start_or_update(filter("ACME")).unwrap();
        let snap = ctl.settled().await;

        assert!(snap.is_complete());
        assert_eq!(source.page_requests(), vec![1]);
    }

    #[tokio::test]
    async fn test_filter_change_discards_in_flight_run() {
        let source = Arc::new(ScriptedSource::new(450).blocking("SLOW"));
        let ctl = controller(source.clone(), new_cache(), 200);
        let mut rx = ctl.subscribe();

        ctl.start_or_update(filter("SLOW")).unwrap();
        // Wait until the slow fetch is actually outstanding
        while source.requests().is_empty() {
            tokio::task::yield_now().await;
        }

        ctl.start_or_update(filter("FAST")).unwrap();
        {
            let snap = rx.borrow_and_update();
            assert_eq!(snap.filter.as_ref().map(|f| f.company_name.as_str()), Some("FAST"));
            assert_eq!(snap.progress.fetched_pages, 0);
            assert!(snap.aggregate.is_none());
        }
        source.release.notify_waiters();

        let snap = ctl.settled().await;
        assert_eq!(snap.state, FetchState::Complete(CompletionReason::Exhausted));
        assert_eq!(snap.progress.fetched_pages, 3);
        assert!(snap.trades().iter().all(|t| t
            .id
            .as_deref()
            .is_some_and(|id| id.starts_with("FAST-"))));
        assert_eq!(snap.aggregate.unwrap().company.name, "FAST");
    }

    #[tokio::test]
    async fn test_cancel_resets_to_idle() {
        let source = Arc::new(ScriptedSource::new(450).blocking("ACME"));
        let ctl = controller(source.clone(), new_cache(), 200);

        ctl.start_or_update(filter("ACME")).unwrap();
        assert!(ctl.snapshot().is_fetching());

        ctl.cancel();
        source.release.notify_waiters();
        tokio::task::yield_now().await;

        let snap = ctl.snapshot();
        assert_eq!(snap.state, FetchState::Idle);
        assert!(snap.filter.is_none());
        assert!(snap.aggregate.is_none());
        assert_eq!(snap.progress, Progress::default());
    }

    #[tokio::test]
    async fn test_progress_observed_after_every_fold() {
        let source = Arc::new(ScriptedSource::new(450));
        let ctl = controller(source.clone(), new_cache(), 200);
        let mut rx = ctl.subscribe();

        ctl.start_or_update(filter("ACME")).unwrap();

        let mut seen = Vec::new();
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let snap = rx.borrow_and_update().clone();
            seen.push(snap.progress.fetched_pages);
            // Aggregate and progress always agree
            let folded = snap.aggregate.as_ref().map(|a| a.pagination.page_no).unwrap_or(0);
            assert_eq!(folded, snap.progress.fetched_pages);
            if !snap.is_fetching() {
                break;
            }
        }

        assert_eq!(seen.last(), Some(&3));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
