//! ATB server-rendered catalog. No API: categories come from the site menu
//! and each listing page links to the next one through its pagination
//! widget, so pages are fetched one after another.

use async_trait::async_trait;
use grocer_core::{normalize_name, CategoryRef, NormalizedRecord};

use super::SourceConfig;
use crate::client::CatalogClient;
use crate::error::ScraperError;
use crate::html::{self, Document, PaginationWidget};
use crate::request::RequestSpec;
use crate::source::{FetchContext, Page, PagePlan, PageToken, SourceAdapter};

const STORE_CODE: &str = "atb";

const PAGINATION: PaginationWidget<'static> = PaginationWidget {
    list_tag: "ul",
    list_class: "product-pagination__list",
    item_tag: "li",
    item_class: "product-pagination__item",
};

pub struct AtbSource {
    client: CatalogClient,
    config: SourceConfig,
}

impl AtbSource {
    #[must_use]
    pub fn new(client: CatalogClient, config: SourceConfig) -> Self {
        Self { client, config }
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_owned()
        } else if href.starts_with('/') {
            self.config.endpoint(href)
        } else {
            self.config.endpoint(&format!("/{href}"))
        }
    }
}

/// Categories listed in the site menu, in menu order.
fn parse_category_menu(markup: &str, url: &str) -> Result<Vec<CategoryRef>, ScraperError> {
    let doc = Document::parse(markup);
    let menu = doc
        .find_first("ul", "category-menu")
        .ok_or_else(|| ScraperError::Markup {
            url: url.to_owned(),
            reason: "category menu not found".to_owned(),
        })?;

    Ok(html::find_all(menu, "li", "category-menu__item")
        .into_iter()
        .filter_map(|item| {
            let link = html::href(item)?;
            let title = html::find_first(item, "a", "")
                .map(html::text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| link.clone());
            Some(CategoryRef::new(title, link))
        })
        .collect())
}

#[derive(Debug)]
struct ListingPage {
    items: Vec<NormalizedRecord>,
    next: Option<u32>,
}

/// Extracts one listing page. A page without the catalog container is an
/// error: the chain cannot continue without it.
fn parse_listing(
    markup: &str,
    url: &str,
    fallback_title: &str,
    absolute: impl Fn(&str) -> String,
) -> Result<ListingPage, ScraperError> {
    let doc = Document::parse(markup);
    let catalog = doc
        .find_first("div", "catalog-list")
        .ok_or_else(|| ScraperError::Markup {
            url: url.to_owned(),
            reason: "catalog list not found".to_owned(),
        })?;

    let category = doc
        .find_first("h1", "page-title")
        .map(html::text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_title.to_owned());

    let items = html::find_all(catalog, "article", "catalog-item")
        .into_iter()
        .filter_map(|item| {
            let title = html::find_first(item, "div", "catalog-item__title")?;
            let link = html::href(title)?;
            let value =
                html::attr_value(item, "data", "product-price__top", "value").unwrap_or_default();
            let currency = html::find_first(item, "abbr", "product-price__currency-abbr")
                .map(html::text)
                .unwrap_or_default();
            Some(NormalizedRecord {
                name: normalize_name(&html::text(title)),
                product_ref: absolute(&link),
                price: format!("{value} {currency}").trim().to_owned(),
                category: category.clone(),
                store: STORE_CODE.to_owned(),
            })
        })
        .collect();

    Ok(ListingPage {
        items,
        next: html::next_page(doc.root(), &PAGINATION),
    })
}

#[async_trait]
impl SourceAdapter for AtbSource {
    fn store_code(&self) -> &'static str {
        STORE_CODE
    }

    async fn discover_categories(
        &self,
        ctx: &FetchContext,
    ) -> Result<Vec<CategoryRef>, ScraperError> {
        let spec = self.config.request("/", ctx);
        let url = self.config.endpoint("/");
        let markup = ctx.call(self.client.get_text(&spec)).await?;
        let categories = parse_category_menu(&markup, &url)?;
        tracing::info!(
            store = STORE_CODE,
            categories = categories.len(),
            "categories discovered"
        );
        Ok(categories)
    }

    fn page_plan(&self, _category: &CategoryRef) -> PagePlan {
        PagePlan::Chained(PageToken::Page(1))
    }

    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
        token: PageToken,
    ) -> Result<Page, ScraperError> {
        let page = match token {
            PageToken::Page(n) => n,
            PageToken::Offset(_) => 1,
        };
        let category_url = self.absolute(&category.slug);
        let mut spec = RequestSpec::get(category_url)
            .headers(&self.config.headers)
            .deadline(ctx.deadline);
        if page > 1 {
            spec = spec.query("page", page);
        }
        let url = spec.url()?.to_string();
        let markup = self.client.get_text(&spec).await?;

        let listing = parse_listing(&markup, &url, &category.title, |href| self.absolute(href))?;
        Ok(Page {
            items: listing.items,
            next: listing.next.map(PageToken::Page),
            total: None,
        })
    }
}
