//! Silpo storefront API: offset pagination, counts from the category tree,
//! display titles from a second per-category lookup.

use std::sync::Arc;

use async_trait::async_trait;
use grocer_core::{normalize_name, CategoryRef, NormalizedRecord};
use serde::Deserialize;

use super::{log_incomplete_item, SourceConfig};
use crate::client::CatalogClient;
use crate::error::ScraperError;
use crate::source::{offset_plan, FetchContext, Page, PagePlan, PageToken, SourceAdapter};

const STORE_CODE: &str = "silpo";
const DEFAULT_BRANCH: &str = "00000000-0000-0000-0000-000000000000";
const DELIVERY_TYPE: &str = "DeliveryHome";
const PRODUCT_BASE_URL: &str = "https://silpo.ua/product";
const LISTING_PARAMS: [(&str, &str); 4] = [
    ("includeChildCategories", "true"),
    ("sortBy", "popularity"),
    ("sortDirection", "desc"),
    ("inStock", "false"),
];

#[derive(Debug, Deserialize)]
struct CategoryTree {
    #[serde(default)]
    items: Vec<TreeItem>,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    slug: String,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct CategoryDetails {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SilpoProducts {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    items: Vec<SilpoProduct>,
}

/// Fields are optional so one malformed item does not sink its page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SilpoProduct {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    section_slug: Option<String>,
    #[serde(default)]
    display_price: Option<f64>,
    #[serde(default)]
    display_ratio: Option<String>,
}

struct Inner {
    client: CatalogClient,
    config: SourceConfig,
    branch: String,
}

pub struct SilpoSource {
    inner: Arc<Inner>,
}

impl SilpoSource {
    #[must_use]
    pub fn new(client: CatalogClient, config: SourceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                branch: DEFAULT_BRANCH.to_owned(),
            }),
        }
    }
}

impl Inner {
    async fn category_title(&self, ctx: &FetchContext, slug: &str) -> Result<String, ScraperError> {
        let spec = self.config.request(
            &format!("/v1/uk/branches/{}/categories/{slug}", self.branch),
            ctx,
        );
        let details: CategoryDetails = self
            .client
            .get_json(&spec, &format!("silpo category {slug}"))
            .await?;
        Ok(details.title)
    }
}

/// `None` when the item has no slug to build its ref from. A missing price
/// reads as zero.
fn normalize(product: SilpoProduct, category: &CategoryRef) -> Option<NormalizedRecord> {
    let Some(slug) = product.section_slug.filter(|s| !s.is_empty()) else {
        log_incomplete_item(STORE_CODE, category, "sectionSlug");
        return None;
    };
    let ratio = product.display_ratio.unwrap_or_default();
    Some(NormalizedRecord {
        name: normalize_name(&product.title.unwrap_or_default()),
        product_ref: format!("{PRODUCT_BASE_URL}/{slug}"),
        price: format!("{:.2} грн/{ratio}", product.display_price.unwrap_or_default()),
        category: category.title.clone(),
        store: STORE_CODE.to_owned(),
    })
}

#[async_trait]
impl SourceAdapter for SilpoSource {
    fn store_code(&self) -> &'static str {
        STORE_CODE
    }

    /// Reads the category tree, then resolves every display title in one
    /// bounded pass. The pass is joined before returning so no record is
    /// built against a missing title; a failed lookup keeps the slug.
    async fn discover_categories(
        &self,
        ctx: &FetchContext,
    ) -> Result<Vec<CategoryRef>, ScraperError> {
        let inner = &self.inner;
        let spec = inner
            .config
            .request(
                &format!("/v1/branches/{}/categories/tree", inner.branch),
                ctx,
            )
            .query("deliveryType", DELIVERY_TYPE)
            .query("depth", 1);
        let tree: CategoryTree = ctx
            .call(inner.client.get_json(&spec, "silpo category tree"))
            .await?;

        let total: u64 = tree.items.iter().map(|c| c.total).sum();
        tracing::info!(
            store = STORE_CODE,
            categories = tree.items.len(),
            items = total,
            "categories discovered"
        );

        let slugs: Vec<(usize, String)> = tree
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (i, item.slug.clone()))
            .collect();
        let title_ctx = ctx.clone();
        let lookup = Arc::clone(inner);
        let titles = ctx
            .fanout()
            .collect_bounded(slugs, move |(index, slug)| {
                let ctx = title_ctx.clone();
                let lookup = Arc::clone(&lookup);
                async move {
                    let title = lookup
                        .category_title(&ctx, &slug)
                        .await
                        .inspect_err(|e| {
                            tracing::warn!(
                                store = STORE_CODE,
                                category = %slug,
                                error = %e,
                                "category title lookup failed, keeping slug"
                            );
                        })?;
                    Ok::<_, ScraperError>((index, title))
                }
            })
            .await;
        if ctx.limiter.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }

        let mut resolved: Vec<Option<String>> = vec![None; tree.items.len()];
        for (index, title) in titles.outputs {
            resolved[index] = Some(title);
        }

        Ok(tree
            .items
            .into_iter()
            .zip(resolved)
            .map(|(item, title)| {
                let title = title.unwrap_or_else(|| item.slug.clone());
                CategoryRef::new(title, item.slug).with_item_count(item.total)
            })
            .collect())
    }

    fn page_plan(&self, category: &CategoryRef) -> PagePlan {
        offset_plan(category.item_count, self.inner.config.page_size)
    }

    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
        token: PageToken,
    ) -> Result<Page, ScraperError> {
        let inner = &self.inner;
        let page_size = inner.config.page_size.max(1);
        let offset = match token {
            PageToken::Offset(offset) => offset,
            PageToken::Page(n) => u64::from(n.saturating_sub(1)) * page_size,
        };
        let spec = inner
            .config
            .request(&format!("/v1/uk/branches/{}/products", inner.branch), ctx)
            .query("deliveryType", DELIVERY_TYPE)
            .query("category", &category.slug)
            .query_pairs(LISTING_PARAMS)
            .query("limit", page_size)
            .query("offset", offset);
        let body: SilpoProducts = inner
            .client
            .get_json(
                &spec,
                &format!("silpo products {} offset {offset}", category.slug),
            )
            .await?;

        Ok(Page {
            items: body
                .items
                .into_iter()
                .filter_map(|p| normalize(p, category))
                .collect(),
            next: None,
            total: body.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_normalizes_price_with_ratio() {
        let product: SilpoProduct = serde_json::from_value(serde_json::json!({
            "title": "Банани",
            "sectionSlug": "banany-123",
            "displayPrice": 69.9,
            "displayRatio": "кг"
        }))
        .unwrap();
        let category = CategoryRef::new("Фрукти", "frukty");
        let record = normalize(product, &category).unwrap();
        assert_eq!(record.product_ref, "https://silpo.ua/product/banany-123");
        assert_eq!(record.price, "69.90 грн/кг");
        assert_eq!(record.category, "Фрукти");
        assert_eq!(record.store, "silpo");
    }

    #[test]
    fn product_tolerates_null_ratio() {
        let product: SilpoProduct = serde_json::from_value(serde_json::json!({
            "title": "Хліб",
            "sectionSlug": "khlib",
            "displayPrice": 25,
            "displayRatio": null
        }))
        .unwrap();
        let record = normalize(product, &CategoryRef::new("Хліб", "khlib")).unwrap();
        assert_eq!(record.price, "25.00 грн/");
    }

    #[test]
    fn page_with_null_price_keeps_every_item() {
        let body: SilpoProducts = serde_json::from_value(serde_json::json!({
            "total": 3,
            "items": [
                {"title": "Банани", "sectionSlug": "banany", "displayPrice": 69.9, "displayRatio": "кг"},
                {"title": "Ківі", "sectionSlug": "kivi", "displayPrice": null, "displayRatio": "шт"},
                {"title": "Лимони", "sectionSlug": "lymony", "displayPrice": 89.0, "displayRatio": "кг"}
            ]
        }))
        .unwrap();
        let category = CategoryRef::new("Фрукти", "frukty");
        let records: Vec<_> = body
            .items
            .into_iter()
            .filter_map(|p| normalize(p, &category))
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].price, "0.00 грн/шт");
    }

    #[test]
    fn item_without_slug_is_dropped_alone() {
        let body: SilpoProducts = serde_json::from_value(serde_json::json!({
            "items": [
                {"title": "Банани", "sectionSlug": "banany", "displayPrice": 69.9},
                {"title": "Без посилання", "sectionSlug": null, "displayPrice": 10.0}
            ]
        }))
        .unwrap();
        let category = CategoryRef::new("Фрукти", "frukty");
        let records: Vec<_> = body
            .items
            .into_iter()
            .filter_map(|p| normalize(p, &category))
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product_ref, "https://silpo.ua/product/banany");
    }
}
