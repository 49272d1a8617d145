use serde::{Deserialize, Serialize};

/// Currency every persisted price observation is recorded in.
pub const PRICE_CURRENCY: &str = "UAH";

/// Header row of the CSV sink, in column order.
pub const CSV_HEADER: [&str; 5] = ["Name", "Ref", "Price", "Category", "Shop"];

/// One category of a store's catalog, as discovered by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRef {
    pub title: String,
    /// Source-side identity of the category: a URL slug, a numeric id
    /// rendered as a string, or a catalog link path.
    pub slug: String,
    /// Number of items in the category, when the source reports it.
    pub item_count: Option<u64>,
    /// Extra numeric ids some search backends filter by.
    pub source_ids: Vec<i64>,
}

impl CategoryRef {
    #[must_use]
    pub fn new(title: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: slug.into(),
            item_count: None,
            source_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_item_count(mut self, count: u64) -> Self {
        self.item_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_source_ids(mut self, ids: Vec<i64>) -> Self {
        self.source_ids = ids;
        self
    }
}

/// A product listing normalized across every source.
///
/// Serialized field names match the [`CSV_HEADER`] column titles. The CSV
/// sink and reader themselves work by column position in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(rename = "Name")]
    pub name: String,
    /// Canonical product key within the store, usually the product URL.
    #[serde(rename = "Ref")]
    pub product_ref: String,
    /// Price exactly as scraped, currency suffix included, e.g. `"41.90 грн"`.
    #[serde(rename = "Price")]
    pub price: String,
    #[serde(rename = "Category")]
    pub category: String,
    /// Store code, e.g. `"silpo"`.
    #[serde(rename = "Shop")]
    pub store: String,
}

/// Category slug derived from a display title: lowercased, spaces replaced
/// with `-`.
#[must_use]
pub fn slugify(title: &str) -> String {
    title.trim().replace(' ', "-").to_lowercase()
}

/// Cleans a scraped product name: trims whitespace and drops straight and
/// guillemet quotes.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '"' | '«' | '»'))
        .collect::<String>()
        .trim()
        .to_string()
}
