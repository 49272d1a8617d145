//! Per-store scrape lifecycle and the run over every registered store.
//!
//! Each store moves `Idle → Discovering → (Counting) → Fetching → Done`, or
//! to `Failed` when discovery fails. Stores run concurrently with their own
//! limiter and share one cancellation token armed with the run deadline.

use std::sync::Arc;
use std::time::Duration;

use grocer_core::{CategoryRef, NormalizedRecord};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ScraperError;
use crate::fanout::{record_channel, BoundedFanout, Emitter, FanoutSummary, RequestLimiter};
use crate::registry::SourceRegistry;
use crate::source::{FetchContext, PagePlan, PageToken, SourceAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Idle,
    Discovering,
    Counting,
    Fetching,
    Done,
    Failed,
}

impl std::fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScrapeState::Idle => "idle",
            ScrapeState::Discovering => "discovering",
            ScrapeState::Counting => "counting",
            ScrapeState::Fetching => "fetching",
            ScrapeState::Done => "done",
            ScrapeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct StoreOutcome {
    pub store: String,
    pub state: ScrapeState,
    /// Records in arrival order. Partial when `cancelled` is set.
    pub records: Vec<NormalizedRecord>,
    pub categories: usize,
    pub pages_failed: usize,
    /// The run was cancelled (deadline or caller) while this store was active.
    pub cancelled: bool,
    pub error: Option<ScraperError>,
}

impl StoreOutcome {
    fn failed(store: &str, error: ScraperError, cancelled: bool) -> Self {
        Self {
            store: store.to_owned(),
            state: ScrapeState::Failed,
            records: Vec::new(),
            categories: 0,
            pages_failed: 0,
            cancelled,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == ScrapeState::Failed
    }
}

struct Lifecycle {
    store: &'static str,
    state: ScrapeState,
}

impl Lifecycle {
    fn advance(&mut self, next: ScrapeState) {
        tracing::info!(store = self.store, from = %self.state, to = %next, "scrape state");
        self.state = next;
    }
}

/// Runs one store to completion.
///
/// Discovery failure ends the store in `Failed`. Page failures are logged
/// and counted in `pages_failed`; they never fail the store.
pub async fn scrape_store(adapter: Arc<dyn SourceAdapter>, ctx: FetchContext) -> StoreOutcome {
    let store = adapter.store_code();
    let mut lifecycle = Lifecycle {
        store,
        state: ScrapeState::Idle,
    };

    lifecycle.advance(ScrapeState::Discovering);
    let categories = match adapter.discover_categories(&ctx).await {
        Ok(categories) => categories,
        Err(e) => {
            tracing::warn!(store, error = %e, "category discovery failed, skipping store");
            lifecycle.advance(ScrapeState::Failed);
            return StoreOutcome::failed(store, e, ctx.limiter.is_cancelled());
        }
    };

    let categories = if adapter.requires_count() {
        lifecycle.advance(ScrapeState::Counting);
        count_categories(&adapter, &ctx, categories).await
    } else {
        categories
    };
    let category_count = categories.len();

    lifecycle.advance(ScrapeState::Fetching);
    let (emitter, mut rx) = record_channel(ctx.limiter.cancel_token().clone());
    let drain = async move {
        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        records
    };
    let (pages, records) = tokio::join!(
        fetch_categories(Arc::clone(&adapter), ctx.clone(), categories, emitter),
        drain
    );

    let cancelled = ctx.limiter.is_cancelled();
    lifecycle.advance(ScrapeState::Done);
    tracing::info!(
        store,
        categories = category_count,
        records = records.len(),
        pages_fetched = pages.completed,
        pages_failed = pages.failed,
        pages_skipped = pages.skipped,
        cancelled,
        "store scrape finished"
    );

    StoreOutcome {
        store: store.to_owned(),
        state: lifecycle.state,
        records,
        categories: category_count,
        pages_failed: pages.failed,
        cancelled,
        error: None,
    }
}

/// One bounded pass filling `item_count` for every category. A failed
/// count leaves the category unsized; its plan then covers the first page.
async fn count_categories(
    adapter: &Arc<dyn SourceAdapter>,
    ctx: &FetchContext,
    categories: Vec<CategoryRef>,
) -> Vec<CategoryRef> {
    let units: Vec<(usize, CategoryRef)> = categories.iter().cloned().enumerate().collect();
    let count_adapter = Arc::clone(adapter);
    let count_ctx = ctx.clone();
    let counted = ctx
        .fanout()
        .collect_bounded(units, move |(index, category)| {
            let adapter = Arc::clone(&count_adapter);
            let ctx = count_ctx.clone();
            async move {
                let total = adapter
                    .count_items(&ctx, &category)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(
                            store = adapter.store_code(),
                            category = %category.slug,
                            error = %e,
                            "item count failed"
                        );
                    })?;
                Ok::<_, ScraperError>((index, total))
            }
        })
        .await;

    let mut categories = categories;
    let mut total = 0u64;
    for (index, count) in counted.outputs {
        categories[index].item_count = Some(count);
        total += count;
    }
    tracing::info!(
        store = adapter.store_code(),
        categories = categories.len(),
        counted = counted.summary.completed,
        items = total,
        "item counts collected"
    );
    categories
}

/// Outer fanout over categories. Category units hold no permit; their page
/// calls do.
async fn fetch_categories(
    adapter: Arc<dyn SourceAdapter>,
    ctx: FetchContext,
    categories: Vec<CategoryRef>,
    emitter: Emitter<NormalizedRecord>,
) -> FanoutSummary {
    let fanout = ctx.fanout();
    let inner = fanout.clone();
    let results = fanout
        .run_unbounded(categories, move |category| {
            let adapter = Arc::clone(&adapter);
            let ctx = ctx.clone();
            let inner = inner.clone();
            let emitter = emitter.clone();
            async move {
                Ok::<_, ScraperError>(fetch_category(adapter, ctx, inner, category, emitter).await)
            }
        })
        .await;

    let mut pages = FanoutSummary::default();
    for summary in results.outputs {
        pages.absorb(summary);
    }
    pages
}

async fn fetch_category(
    adapter: Arc<dyn SourceAdapter>,
    ctx: FetchContext,
    fanout: BoundedFanout,
    category: CategoryRef,
    emitter: Emitter<NormalizedRecord>,
) -> FanoutSummary {
    match adapter.page_plan(&category) {
        PagePlan::Fixed(tokens) => {
            let category = Arc::new(category);
            fanout
                .collect_bounded(tokens, move |token| {
                    let adapter = Arc::clone(&adapter);
                    let ctx = ctx.clone();
                    let category = Arc::clone(&category);
                    let emitter = emitter.clone();
                    async move {
                        let page = adapter
                            .fetch_page(&ctx, &category, token)
                            .await
                            .inspect_err(|e| log_page_failure(&*adapter, &category, token, e))?;
                        if let Some((planned, reported)) =
                            total_drift(category.item_count, page.total)
                        {
                            tracing::debug!(
                                store = adapter.store_code(),
                                category = %category.slug,
                                page = ?token,
                                planned,
                                reported,
                                "listing total changed since planning"
                            );
                        }
                        Ok::<_, ScraperError>(emitter.emit_page(page.items))
                    }
                })
                .await
                .summary
        }
        PagePlan::Chained(first) => fetch_chain(&*adapter, &ctx, &category, first, &emitter).await,
    }
}

/// Follows `next` tokens one page at a time. A failed page ends the chain:
/// the next token only exists in the page that failed.
async fn fetch_chain(
    adapter: &dyn SourceAdapter,
    ctx: &FetchContext,
    category: &CategoryRef,
    first: PageToken,
    emitter: &Emitter<NormalizedRecord>,
) -> FanoutSummary {
    let mut summary = FanoutSummary::default();
    let mut token = first;
    loop {
        summary.submitted += 1;
        match ctx.limiter.run(adapter.fetch_page(ctx, category, token)).await {
            None | Some(Err(ScraperError::Cancelled)) => {
                summary.skipped += 1;
                break;
            }
            Some(Err(e)) => {
                log_page_failure(adapter, category, token, &e);
                summary.failed += 1;
                break;
            }
            Some(Ok(page)) => {
                summary.completed += 1;
                if page.items.is_empty() {
                    break;
                }
                emitter.emit_page(page.items);
                match page.next {
                    Some(next) if advances(token, next) => token = next,
                    _ => break,
                }
            }
        }
    }
    summary
}

/// `(planned, reported)` when a page reports a different total than the one
/// its plan was built from. The plan is not revised mid-run.
fn total_drift(planned: Option<u64>, reported: Option<u64>) -> Option<(u64, u64)> {
    match (planned, reported) {
        (Some(planned), Some(reported)) if planned != reported => Some((planned, reported)),
        _ => None,
    }
}

/// Guards chained pagination against tokens that do not move forward.
fn advances(from: PageToken, to: PageToken) -> bool {
    match (from, to) {
        (PageToken::Page(a), PageToken::Page(b)) => b > a,
        (PageToken::Offset(a), PageToken::Offset(b)) => b > a,
        _ => false,
    }
}

fn log_page_failure(
    adapter: &dyn SourceAdapter,
    category: &CategoryRef,
    token: PageToken,
    error: &ScraperError,
) {
    tracing::warn!(
        store = adapter.store_code(),
        category = %category.slug,
        page = ?token,
        error = %error,
        "page fetch failed, continuing"
    );
}

/// Scrapes every registered store concurrently under one deadline.
///
/// `concurrency` caps in-flight calls per store (further capped by each
/// source's own ceiling). Outcomes come back in registry order.
pub async fn run_all_sources(
    registry: &SourceRegistry,
    deadline: Duration,
    concurrency: usize,
) -> Vec<StoreOutcome> {
    run_all_sources_with_token(registry, deadline, concurrency, CancellationToken::new()).await
}

/// Like [`run_all_sources`], with a caller-owned token that cancels the
/// whole run when triggered (e.g. on Ctrl-C).
pub async fn run_all_sources_with_token(
    registry: &SourceRegistry,
    deadline: Duration,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<StoreOutcome> {
    let deadline_at = Instant::now() + deadline;

    let watchdog = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep_until(deadline_at) => {
                    tracing::warn!("run deadline reached, cancelling in-flight requests");
                    cancel.cancel();
                }
                () = cancel.cancelled() => {}
            }
        })
    };

    let handles: Vec<_> = registry
        .sources()
        .iter()
        .map(|source| {
            let limiter =
                RequestLimiter::new(concurrency.min(source.max_in_flight), cancel.clone());
            let ctx = FetchContext::new(limiter, deadline_at);
            let adapter = Arc::clone(&source.adapter);
            (source.code, tokio::spawn(scrape_store(adapter, ctx)))
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (code, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(store = code, error = %e, "store task failed");
                StoreOutcome::failed(code, ScraperError::Join(e), cancel.is_cancelled())
            }
        };
        outcomes.push(outcome);
    }

    watchdog.abort();
    outcomes
}
