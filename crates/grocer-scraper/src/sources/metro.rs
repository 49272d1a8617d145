//! Metro catalog on the zakaz.ua stores API: page-index pagination, item
//! counts reported by discovery, prices in kopecks.

use async_trait::async_trait;
use grocer_core::{normalize_name, CategoryRef, NormalizedRecord};
use serde::Deserialize;

use super::{format_uah, log_incomplete_item, SourceConfig};
use crate::client::CatalogClient;
use crate::error::ScraperError;
use crate::source::{page_index_plan, FetchContext, Page, PagePlan, PageToken, SourceAdapter};

const STORE_CODE: &str = "metro";

#[derive(Debug, Deserialize)]
struct MetroCategory {
    id: String,
    title: String,
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct MetroProducts {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    results: Vec<MetroProduct>,
}

#[derive(Debug, Deserialize)]
struct MetroProduct {
    #[serde(default)]
    title: Option<String>,
    /// Minor units (kopecks).
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    web_url: Option<String>,
}

pub struct MetroSource {
    client: CatalogClient,
    config: SourceConfig,
}

impl MetroSource {
    #[must_use]
    pub fn new(client: CatalogClient, config: SourceConfig) -> Self {
        Self { client, config }
    }
}

fn normalize(product: MetroProduct, category: &CategoryRef) -> Option<NormalizedRecord> {
    let Some(web_url) = product.web_url.filter(|u| !u.is_empty()) else {
        log_incomplete_item(STORE_CODE, category, "web_url");
        return None;
    };
    Some(NormalizedRecord {
        name: normalize_name(&product.title.unwrap_or_default()),
        product_ref: web_url,
        price: format_uah(product.price.unwrap_or_default() / 100.0),
        category: category.title.clone(),
        store: STORE_CODE.to_owned(),
    })
}

#[async_trait]
impl SourceAdapter for MetroSource {
    fn store_code(&self) -> &'static str {
        STORE_CODE
    }

    async fn discover_categories(
        &self,
        ctx: &FetchContext,
    ) -> Result<Vec<CategoryRef>, ScraperError> {
        let spec = self
            .config
            .request("/categories", ctx)
            .query("only_parents", "true");
        let categories: Vec<MetroCategory> = ctx
            .call(self.client.get_json(&spec, "metro categories"))
            .await?;

        let total: u64 = categories.iter().map(|c| c.count).sum();
        tracing::info!(
            store = STORE_CODE,
            categories = categories.len(),
            items = total,
            "categories discovered"
        );

        Ok(categories
            .into_iter()
            .map(|c| CategoryRef::new(c.title, c.id).with_item_count(c.count))
            .collect())
    }

    fn page_plan(&self, category: &CategoryRef) -> PagePlan {
        page_index_plan(category.item_count, self.config.page_size)
    }

    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
        token: PageToken,
    ) -> Result<Page, ScraperError> {
        let page = match token {
            PageToken::Page(n) => n,
            PageToken::Offset(offset) => {
                u32::try_from(offset / self.config.page_size.max(1) + 1).unwrap_or(u32::MAX)
            }
        };
        let spec = self
            .config
            .request(&format!("/categories/{}/products", category.slug), ctx)
            .query("page", page);
        let body: MetroProducts = self
            .client
            .get_json(&spec, &format!("metro products {} page {page}", category.slug))
            .await?;

        Ok(Page {
            items: body
                .results
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
    fn product_price_is_converted_from_kopecks() {
        let product: MetroProduct = serde_json::from_value(serde_json::json!({
            "title": " Сир «Комо» ",
            "price": 18990,
            "web_url": "https://metro.zakaz.ua/uk/products/syr-komo"
        }))
        .unwrap();
        let category = CategoryRef::new("Сири", "cheese-metro");
        let record = normalize(product, &category).unwrap();
        assert_eq!(record.name, "Сир Комо");
        assert_eq!(record.price, "189.90 грн");
        assert_eq!(record.product_ref, "https://metro.zakaz.ua/uk/products/syr-komo");
        assert_eq!(record.category, "Сири");
        assert_eq!(record.store, "metro");
    }

    #[test]
    fn null_price_and_missing_url_affect_only_their_items() {
        let body: MetroProducts = serde_json::from_value(serde_json::json!({
            "total": 3,
            "results": [
                {"title": "Кефір", "price": 4590, "web_url": "https://metro.zakaz.ua/uk/products/kefir"},
                {"title": "Ряжанка", "price": null, "web_url": "https://metro.zakaz.ua/uk/products/riazhanka"},
                {"title": "Йогурт", "price": 3290}
            ]
        }))
        .unwrap();
        let category = CategoryRef::new("Молочні", "dairy-metro");
        let records: Vec<_> = body
            .results
            .into_iter()
            .filter_map(|p| normalize(p, &category))
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].price, "45.90 грн");
        assert_eq!(records[1].price, "0.00 грн");
    }

    #[test]
    fn categories_decode_with_missing_count() {
        let categories: Vec<MetroCategory> = serde_json::from_value(serde_json::json!([
            {"id": "bread-metro", "title": "Хліб"}
        ]))
        .unwrap();
        assert_eq!(categories[0].count, 0);
    }
}
