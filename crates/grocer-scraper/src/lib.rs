pub mod client;
pub mod error;
pub mod fanout;
pub mod html;
pub mod orchestrator;
pub(crate) mod rate_limit;
pub mod registry;
pub mod request;
pub mod source;
pub mod sources;

pub use client::{CatalogClient, ClientSettings};
pub use error::ScraperError;
pub use fanout::{BoundedFanout, FanoutResults, FanoutSummary, RequestLimiter};
pub use orchestrator::{
    run_all_sources, run_all_sources_with_token, scrape_store, ScrapeState, StoreOutcome,
};
pub use registry::{build_adapter, SourceRegistry, StoreKind};
pub use request::RequestSpec;
pub use source::{FetchContext, Page, PagePlan, PageToken, SourceAdapter};
pub use sources::SourceConfig;
