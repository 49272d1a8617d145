//! The capability set every store adapter implements.

use async_trait::async_trait;
use grocer_core::{CategoryRef, NormalizedRecord};
use tokio::time::Instant;

use crate::error::ScraperError;
use crate::fanout::{BoundedFanout, RequestLimiter};

/// Position inside a category's listing. Opaque to the engine: only the
/// adapter that produced it interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageToken {
    Offset(u64),
    Page(u32),
}

/// How the engine walks a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePlan {
    /// Every token is known up front; pages are fetched concurrently.
    Fixed(Vec<PageToken>),
    /// Only the first token is known; each page names the next one.
    Chained(PageToken),
}

/// One decoded response.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<NormalizedRecord>,
    pub next: Option<PageToken>,
    /// Total reported by the source alongside the page, if any.
    pub total: Option<u64>,
}

/// Per-store context threaded through every adapter call.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub limiter: RequestLimiter,
    pub deadline: Instant,
}

impl FetchContext {
    #[must_use]
    pub fn new(limiter: RequestLimiter, deadline: Instant) -> Self {
        Self { limiter, deadline }
    }

    #[must_use]
    pub fn fanout(&self) -> BoundedFanout {
        BoundedFanout::new(self.limiter.clone())
    }

    /// Runs one network call under a permit.
    ///
    /// # Errors
    ///
    /// Whatever `fut` returns, or [`ScraperError::Cancelled`] if the run is
    /// cancelled first.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ScraperError>
    where
        F: std::future::Future<Output = Result<T, ScraperError>>,
    {
        self.limiter
            .run(fut)
            .await
            .unwrap_or(Err(ScraperError::Cancelled))
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Store code stamped on every record, e.g. `"silpo"`.
    fn store_code(&self) -> &'static str;

    /// Lists the store's categories, in source order.
    ///
    /// May issue several requests; each one goes through `ctx`.
    async fn discover_categories(
        &self,
        ctx: &FetchContext,
    ) -> Result<Vec<CategoryRef>, ScraperError>;

    /// `true` when discovery leaves `item_count` empty and page plans need a
    /// count pass first.
    fn requires_count(&self) -> bool {
        false
    }

    /// Number of items in `category`. Called under one permit.
    async fn count_items(
        &self,
        _ctx: &FetchContext,
        _category: &CategoryRef,
    ) -> Result<u64, ScraperError> {
        Err(ScraperError::CountUnsupported {
            store: self.store_code().to_owned(),
        })
    }

    fn page_plan(&self, category: &CategoryRef) -> PagePlan;

    /// Fetches and normalizes one page. Called under one permit.
    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
        token: PageToken,
    ) -> Result<Page, ScraperError>;
}

/// Number of requests covering `total` items at `page_size` per request:
/// `total / page_size + 1`. The final request may come back empty.
#[must_use]
pub fn request_count(total: u64, page_size: u64) -> u64 {
    total / page_size.max(1) + 1
}

/// Offsets `0, size, 2*size, …` covering `item_count`; a single first-page
/// request when the count is unknown.
#[must_use]
pub fn offset_plan(item_count: Option<u64>, page_size: u64) -> PagePlan {
    let Some(total) = item_count else {
        return PagePlan::Fixed(vec![PageToken::Offset(0)]);
    };
    let size = page_size.max(1);
    let tokens = (0..request_count(total, size))
        .map(|i| PageToken::Offset(i * size))
        .collect();
    PagePlan::Fixed(tokens)
}

/// One-based page indexes covering `item_count`; page 1 only when the count
/// is unknown.
#[must_use]
pub fn page_index_plan(item_count: Option<u64>, page_size: u64) -> PagePlan {
    let Some(total) = item_count else {
        return PagePlan::Fixed(vec![PageToken::Page(1)]);
    };
    let pages = u32::try_from(request_count(total, page_size)).unwrap_or(u32::MAX);
    PagePlan::Fixed((1..=pages).map(PageToken::Page).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_count_covers_total_plus_terminal_page() {
        assert_eq!(request_count(30, 30), 2);
        assert_eq!(request_count(5, 30), 1);
        assert_eq!(request_count(0, 30), 1);
        assert_eq!(request_count(61, 30), 3);
    }

    #[test]
    fn offset_plan_steps_by_page_size() {
        assert_eq!(
            offset_plan(Some(250), 100),
            PagePlan::Fixed(vec![
                PageToken::Offset(0),
                PageToken::Offset(100),
                PageToken::Offset(200),
            ])
        );
    }

    #[test]
    fn offset_plan_without_count_fetches_first_page() {
        assert_eq!(
            offset_plan(None, 100),
            PagePlan::Fixed(vec![PageToken::Offset(0)])
        );
    }

    #[test]
    fn page_index_plan_is_one_based() {
        assert_eq!(
            page_index_plan(Some(30), 30),
            PagePlan::Fixed(vec![PageToken::Page(1), PageToken::Page(2)])
        );
        assert_eq!(
            page_index_plan(Some(5), 30),
            PagePlan::Fixed(vec![PageToken::Page(1)])
        );
    }
}
