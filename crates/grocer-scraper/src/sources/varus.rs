//! Varus storefront search API. Category banners carry no item counts, so
//! plans wait for a count pass over the product search.

use async_trait::async_trait;
use grocer_core::{normalize_name, CategoryRef, NormalizedRecord};
use serde::Deserialize;
use serde_json::json;

use super::{format_uah, log_incomplete_item, SourceConfig};
use crate::client::CatalogClient;
use crate::error::ScraperError;
use crate::request::RequestSpec;
use crate::source::{offset_plan, FetchContext, Page, PagePlan, PageToken, SourceAdapter};

const STORE_CODE: &str = "varus";
const BANNER_PATH: &str = "/api/catalog/vue_storefront_catalog_2/banner/_search";
const PRODUCT_PATH: &str = "/api/catalog/vue_storefront_catalog_2/product_v2/_search";
const PRODUCT_BASE_URL: &str = "https://varus.ua";
const SHOP_ID: &str = "3";
const BANNER_PAGE_SIZE: u32 = 50;

const SOURCE_INCLUDE: &str = "brand_data.name,description,category,category_ids,stock.is_in_stock,\
forNewPost,stock.qty,stock.max,stock.manage_stock,stock.is_qty_decimal,sku,id,name,image,\
regular_price,special_price_discount,special_price_to_date,slug,url_key,url_path,product_label,\
type_id,volume,weight,wghweigh,packingtype,is_new,is_18_plus,news_from_date,news_to_date,\
varus_perfect,productquantityunit,productquantityunitstep,productminsalablequantity,\
productquantitysteprecommended,markdown_id,markdown_title,markdown_discount,\
markdown_description,online_promotion_in_stores,boardProduct,fv_image_timestamp,\
sqpp_data_region_default";

const AVAILABILITY_SCRIPT: &str = "int score = 0;\n\
score = doc['sqpp_data_region_default.availability.shipping'].value ? 2 : score;\n\
score = doc['sqpp_data_region_default.availability.other_regions'].value ? 2 : score;\n\
score = doc['sqpp_data_region_default.availability.pickup'].value ? 2 : score;\n\
score = doc['sqpp_data_region_default.availability.other_market'].value ? 2 : score;\n\
score = doc['sqpp_data_region_default.availability.delivery'].value ? 4: score;\n\
score += doc['sqpp_data_region_default.in_stock'].value ? 1 : 0;\n\
if (doc.containsKey('markdown_id') && !doc['markdown_id'].empty && score > 2) { score = 3; }\n\
return score;";

#[derive(Debug, Deserialize)]
struct BannerHits {
    #[serde(default)]
    hits: Vec<Banner>,
}

#[derive(Debug, Deserialize)]
struct Banner {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    category_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct ProductCount {
    total: CountValue,
}

#[derive(Debug, Deserialize)]
struct CountValue {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct ProductHits {
    #[serde(default)]
    hits: Vec<VarusProduct>,
}

#[derive(Debug, Deserialize)]
struct VarusProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url_key: Option<String>,
    #[serde(default)]
    sqpp_data_region_default: Option<RegionPrice>,
}

#[derive(Debug, Deserialize)]
struct RegionPrice {
    #[serde(default)]
    price: Option<f64>,
}

pub struct VarusSource {
    client: CatalogClient,
    config: SourceConfig,
}

impl VarusSource {
    #[must_use]
    pub fn new(client: CatalogClient, config: SourceConfig) -> Self {
        Self { client, config }
    }

    fn banner_filter() -> String {
        json!({
            "_availableFilters": [],
            "_appliedFilters": [
                {"attribute": "datetime_from", "value": {"lt": "now"}, "scope": "default"},
                {"attribute": "datetime_to", "value": {"gt": "now-1d"}, "scope": "default"},
                {"attribute": "status", "value": {"eq": "1"}, "scope": "default"},
                {"attribute": "position", "value": {"eq": "3"}, "scope": "default"}
            ],
            "_appliedSort": [],
            "_searchText": ""
        })
        .to_string()
    }

    fn product_filter(category_ids: &[i64]) -> String {
        json!({
            "_availableFilters": [
                {"field": "pim_brand_id", "scope": "catalog", "options": {}},
                {"field": "countrymanufacturerforsite", "scope": "catalog", "options": {}},
                {"field": "promotion_banner_ids", "scope": "catalog", "options": {}},
                {"field": "price", "scope": "catalog", "options": {"shop_id": 3, "version": "2"}},
                {"field": "has_promotion_in_stores", "scope": "catalog", "options": {"size": 10000}},
                {"field": "markdown_id", "scope": "catalog", "options": {}}
            ],
            "_appliedFilters": [
                {"attribute": "visibility", "value": {"in": [2, 4]}, "scope": "default"},
                {"attribute": "status", "value": {"in": [0, 1]}, "scope": "default"},
                {"attribute": "category_ids", "value": {"in": category_ids}, "scope": "default"},
                {"attribute": "markdown_id", "value": {"or": null}, "scope": "default"},
                {"attribute": "sqpp_data_3.in_stock", "value": {"or": true}, "scope": "default"},
                {"attribute": "markdown_id", "value": {"nin": null}, "scope": "default"}
            ],
            "_appliedSort": [
                {
                    "field": "_script",
                    "options": {
                        "type": "number",
                        "order": "desc",
                        "script": {"lang": "painless", "source": AVAILABILITY_SCRIPT}
                    }
                },
                {"field": "category_position_2", "options": {"order": "desc"}},
                {"field": "sqpp_score", "options": {"order": "desc"}}
            ],
            "_searchText": ""
        })
        .to_string()
    }

    fn product_search(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
        from: u64,
    ) -> RequestSpec {
        self.config
            .request(PRODUCT_PATH, ctx)
            .query("_source_exclude", "")
            .query("_source_include", SOURCE_INCLUDE)
            .query("from", from)
            .query("request_format", "search-query")
            .query("response_format", "compact")
            .query("shop_id", SHOP_ID)
            .query("size", self.config.page_size)
            .query("sort", "")
            .query("request", Self::product_filter(&category.source_ids))
    }
}

fn normalize(product: VarusProduct, category: &CategoryRef) -> Option<NormalizedRecord> {
    let Some(url_key) = product.url_key.filter(|k| !k.is_empty()) else {
        log_incomplete_item(STORE_CODE, category, "url_key");
        return None;
    };
    let price = product
        .sqpp_data_region_default
        .and_then(|region| region.price)
        .unwrap_or_default();
    Some(NormalizedRecord {
        name: normalize_name(&product.name.unwrap_or_default()),
        product_ref: format!("{PRODUCT_BASE_URL}/{url_key}"),
        price: format_uah(price),
        category: category.title.clone(),
        store: STORE_CODE.to_owned(),
    })
}

fn banners_to_categories(banners: Vec<Banner>) -> Vec<CategoryRef> {
    banners
        .into_iter()
        .filter_map(|banner| {
            let link = banner.link.filter(|l| !l.is_empty())?;
            if banner.category_ids.is_empty() {
                return None;
            }
            Some(CategoryRef::new(link.clone(), link).with_source_ids(banner.category_ids))
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for VarusSource {
    fn store_code(&self) -> &'static str {
        STORE_CODE
    }

    async fn discover_categories(
        &self,
        ctx: &FetchContext,
    ) -> Result<Vec<CategoryRef>, ScraperError> {
        let spec = self
            .config
            .request(BANNER_PATH, ctx)
            .query("_source_exclude", "tms,tsk,sgn,paths,created_time,update_time")
            .query("from", 0)
            .query("request", Self::banner_filter())
            .query("request_format", "search-query")
            .query("response_format", "compact")
            .query("size", BANNER_PAGE_SIZE)
            .query("sort", "");
        let body: BannerHits = ctx
            .call(self.client.get_json(&spec, "varus banners"))
            .await?;

        let found = body.hits.len();
        let categories = banners_to_categories(body.hits);
        tracing::info!(
            store = STORE_CODE,
            banners = found,
            categories = categories.len(),
            "categories discovered"
        );
        Ok(categories)
    }

    fn requires_count(&self) -> bool {
        true
    }

    async fn count_items(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
    ) -> Result<u64, ScraperError> {
        let spec = self.product_search(ctx, category, 0);
        let count: ProductCount = self
            .client
            .get_json(&spec, &format!("varus count {}", category.slug))
            .await?;
        Ok(count.total.value)
    }

    fn page_plan(&self, category: &CategoryRef) -> PagePlan {
        offset_plan(category.item_count, self.config.page_size)
    }

    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        category: &CategoryRef,
        token: PageToken,
    ) -> Result<Page, ScraperError> {
        let from = match token {
            PageToken::Offset(offset) => offset,
            PageToken::Page(n) => u64::from(n.saturating_sub(1)) * self.config.page_size,
        };
        let spec = self.product_search(ctx, category, from);
        let body: ProductHits = self
            .client
            .get_json(&spec, &format!("varus products {} from {from}", category.slug))
            .await?;

        Ok(Page {
            items: body
                .hits
                .into_iter()
                .filter_map(|p| normalize(p, category))
                .collect(),
            next: None,
            total: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banners_without_link_or_ids_are_skipped() {
        let hits: BannerHits = serde_json::from_value(json!({
            "hits": [
                {"link": "ovochi-ta-frukty", "category_ids": [10, 11]},
                {"link": null, "category_ids": [12]},
                {"link": "napoi", "category_ids": []},
                {"category_ids": [13]}
            ]
        }))
        .unwrap();
        let categories = banners_to_categories(hits.hits);
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].slug, "ovochi-ta-frukty");
        assert_eq!(categories[0].title, "ovochi-ta-frukty");
        assert_eq!(categories[0].source_ids, vec![10, 11]);
        assert_eq!(categories[0].item_count, None);
    }

    #[test]
    fn product_filter_targets_category_ids() {
        let filter: serde_json::Value =
            serde_json::from_str(&VarusSource::product_filter(&[10, 11])).unwrap();
        let category_filter = filter["_appliedFilters"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["attribute"] == "category_ids")
            .unwrap();
        assert_eq!(category_filter["value"]["in"], json!([10, 11]));
    }

    #[test]
    fn product_normalizes_url_and_price() {
        let product: VarusProduct = serde_json::from_value(json!({
            "name": "Яблука Голден",
            "url_key": "yabluka-golden",
            "sqpp_data_region_default": {"price": 54.5}
        }))
        .unwrap();
        let category = CategoryRef::new("ovochi-ta-frukty", "ovochi-ta-frukty");
        let record = normalize(product, &category).unwrap();
        assert_eq!(record.product_ref, "https://varus.ua/yabluka-golden");
        assert_eq!(record.price, "54.50 грн");
        assert_eq!(record.category, "ovochi-ta-frukty");
    }

    #[test]
    fn null_region_price_reads_as_zero() {
        let body: ProductHits = serde_json::from_value(json!({
            "hits": [
                {"name": "Морква", "url_key": "morkva", "sqpp_data_region_default": null},
                {"name": "Буряк", "url_key": "buriak", "sqpp_data_region_default": {"price": null}},
                {"name": "Цибуля", "url_key": null}
            ]
        }))
        .unwrap();
        let category = CategoryRef::new("ovochi", "ovochi");
        let records: Vec<_> = body
            .hits
            .into_iter()
            .filter_map(|p| normalize(p, &category))
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.price == "0.00 грн"));
    }
}
