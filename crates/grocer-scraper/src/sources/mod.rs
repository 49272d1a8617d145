//! Store adapters and their per-source settings.

mod atb;
mod metro;
mod silpo;
mod varus;

pub use atb::AtbSource;
pub use metro::MetroSource;
pub use silpo::SilpoSource;
pub use varus::VarusSource;

use grocer_core::CategoryRef;

use crate::registry::StoreKind;
use crate::request::RequestSpec;
use crate::source::FetchContext;

/// Endpoint and request shape of one source, fixed at startup.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Scheme and host, plus any fixed path prefix. No trailing slash.
    pub base_url: String,
    pub headers: Vec<(String, String)>,
    pub page_size: u64,
    /// In-flight ceiling for this store. The run-wide limit still applies.
    pub max_in_flight: usize,
}

impl SourceConfig {
    #[must_use]
    pub fn defaults(kind: StoreKind) -> Self {
        match kind {
            StoreKind::Silpo => Self {
                base_url: "https://sf-ecom-api.silpo.ua".to_owned(),
                headers: header_set(&[
                    ("Accept", "application/json"),
                    ("Origin", "https://silpo.ua"),
                    ("Referer", "https://silpo.ua/"),
                    ("Accept-Language", "en-GB,en;q=0.5"),
                    ("Sec-Fetch-Mode", "cors"),
                    ("Sec-Fetch-Site", "same-site"),
                    ("Sec-Fetch-Dest", "empty"),
                    ("Sec-GPC", "1"),
                ]),
                page_size: 100,
                max_in_flight: 35,
            },
            StoreKind::Metro => Self {
                base_url: "https://stores-api.zakaz.ua/stores/48215614".to_owned(),
                headers: header_set(&[
                    ("Accept", "*/*"),
                    ("Accept-Language", "uk"),
                    ("Referer", "https://metro.zakaz.ua/uk/"),
                    ("Origin", "https://metro.zakaz.ua"),
                    ("Content-Type", "application/json"),
                    ("x-chain", "metro"),
                    ("X-Delivery-Type", "plan"),
                    ("x-version", "65"),
                    ("content-language", "uk"),
                    ("Sec-Fetch-Mode", "cors"),
                    ("Sec-Fetch-Site", "same-site"),
                    ("Sec-Fetch-Dest", "empty"),
                ]),
                page_size: 30,
                max_in_flight: 35,
            },
            StoreKind::Varus => Self {
                base_url: "https://varus.ua".to_owned(),
                headers: header_set(&[
                    ("Accept", "application/json"),
                    ("Accept-Language", "en-GB,en;q=0.5"),
                    ("Referer", "https://varus.ua/"),
                    ("Content-Type", "application/json"),
                    ("Sec-Fetch-Mode", "cors"),
                    ("Sec-Fetch-Site", "same-origin"),
                    ("Sec-Fetch-Dest", "empty"),
                    ("Priority", "u=4"),
                ]),
                page_size: 100,
                max_in_flight: 35,
            },
            StoreKind::Atb => Self {
                base_url: "https://www.atbmarket.com".to_owned(),
                headers: header_set(&[
                    ("Accept", "*/*"),
                    ("Accept-Language", "en-GB,en;q=0.5"),
                    ("Referer", "https://www.atbmarket.com/"),
                    ("Sec-Fetch-Mode", "cors"),
                    ("Sec-Fetch-Site", "same-site"),
                    ("Sec-Fetch-Dest", "empty"),
                ]),
                page_size: 0,
                max_in_flight: 35,
            },
        }
    }

    /// Same defaults, pointed at another host. Used to aim adapters at a
    /// local mock server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// `{base_url}{path}`; `path` must start with `/`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GET for `path` carrying this source's headers and the run deadline.
    #[must_use]
    pub fn request(&self, path: &str, ctx: &FetchContext) -> RequestSpec {
        RequestSpec::get(self.endpoint(path))
            .headers(&self.headers)
            .deadline(ctx.deadline)
    }
}

// User-Agent is left to the client so GROCER_SCRAPER_USER_AGENT applies.
fn header_set(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

/// Logs an item dropped from an otherwise usable page.
pub(crate) fn log_incomplete_item(store: &str, category: &CategoryRef, missing: &str) {
    tracing::warn!(
        store,
        category = %category.slug,
        missing,
        "item without identity skipped"
    );
}

/// Price in hryvnias with two decimals, e.g. `41.9` → `"41.90 грн"`.
pub(crate) fn format_uah(amount: f64) -> String {
    format!("{amount:.2} грн")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_source_page_sizes() {
        assert_eq!(SourceConfig::defaults(StoreKind::Silpo).page_size, 100);
        assert_eq!(SourceConfig::defaults(StoreKind::Metro).page_size, 30);
        assert_eq!(SourceConfig::defaults(StoreKind::Varus).page_size, 100);
    }

    #[test]
    fn with_base_url_strips_trailing_slash() {
        let config =
            SourceConfig::defaults(StoreKind::Metro).with_base_url("http://127.0.0.1:9000/");
        assert_eq!(
            config.endpoint("/categories"),
            "http://127.0.0.1:9000/categories"
        );
    }

    #[test]
    fn header_sets_carry_a_referer() {
        for kind in StoreKind::ALL {
            let config = SourceConfig::defaults(kind);
            assert!(
                config.headers.iter().any(|(k, _)| k == "Referer"),
                "{kind:?} has no Referer"
            );
        }
    }

    #[test]
    fn format_uah_rounds_to_two_places() {
        assert_eq!(format_uah(41.9), "41.90 грн");
        assert_eq!(format_uah(12.5), "12.50 грн");
    }
}
