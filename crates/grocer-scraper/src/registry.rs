//! Explicit table of the stores a run scrapes.

use std::sync::Arc;

use crate::client::{CatalogClient, ClientSettings};
use crate::error::ScraperError;
use crate::source::SourceAdapter;
use crate::sources::{AtbSource, MetroSource, SilpoSource, SourceConfig, VarusSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Silpo,
    Metro,
    Varus,
    Atb,
}

impl StoreKind {
    pub const ALL: [StoreKind; 4] = [
        StoreKind::Silpo,
        StoreKind::Metro,
        StoreKind::Varus,
        StoreKind::Atb,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            StoreKind::Silpo => "silpo",
            StoreKind::Metro => "metro",
            StoreKind::Varus => "varus",
            StoreKind::Atb => "atb",
        }
    }

    /// Case-insensitive lookup by store code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code.trim()))
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Builds the adapter for `kind` on its own HTTP client.
///
/// # Errors
///
/// Returns [`ScraperError::Http`] if the client cannot be constructed.
pub fn build_adapter(
    kind: StoreKind,
    settings: &ClientSettings,
    config: SourceConfig,
) -> Result<Arc<dyn SourceAdapter>, ScraperError> {
    let client = CatalogClient::new(settings)?;
    Ok(match kind {
        StoreKind::Silpo => Arc::new(SilpoSource::new(client, config)),
        StoreKind::Metro => Arc::new(MetroSource::new(client, config)),
        StoreKind::Varus => Arc::new(VarusSource::new(client, config)),
        StoreKind::Atb => Arc::new(AtbSource::new(client, config)),
    })
}

pub struct RegisteredSource {
    pub code: &'static str,
    pub adapter: Arc<dyn SourceAdapter>,
    /// Per-store in-flight ceiling; the run-wide limit still applies.
    pub max_in_flight: usize,
}

#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known store with its default endpoint settings.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if an HTTP client cannot be built.
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ScraperError> {
        Self::with_configs(
            settings,
            StoreKind::ALL
                .into_iter()
                .map(|kind| (kind, SourceConfig::defaults(kind))),
        )
    }

    /// Registers one adapter per `(kind, config)` pair, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if an HTTP client cannot be built.
    pub fn with_configs(
        settings: &ClientSettings,
        configs: impl IntoIterator<Item = (StoreKind, SourceConfig)>,
    ) -> Result<Self, ScraperError> {
        let mut registry = Self::new();
        for (kind, config) in configs {
            let max_in_flight = config.max_in_flight;
            let adapter = build_adapter(kind, settings, config)?;
            registry.register(adapter, max_in_flight);
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, max_in_flight: usize) {
        self.sources.push(RegisteredSource {
            code: adapter.store_code(),
            adapter,
            max_in_flight: max_in_flight.max(1),
        });
    }

    /// Keeps only the stores named in `codes`, in registry order. An empty
    /// list keeps everything.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::UnknownSource`] for a code no registered
    /// store answers to.
    pub fn select<S: AsRef<str>>(self, codes: &[S]) -> Result<Self, ScraperError> {
        if codes.is_empty() {
            return Ok(self);
        }
        let mut wanted = Vec::with_capacity(codes.len());
        for code in codes {
            let code = code.as_ref();
            let kind = StoreKind::from_code(code)
                .filter(|kind| self.sources.iter().any(|s| s.code == kind.code()))
                .ok_or_else(|| ScraperError::UnknownSource {
                    code: code.to_owned(),
                })?;
            wanted.push(kind.code());
        }
        let sources = self
            .sources
            .into_iter()
            .filter(|s| wanted.contains(&s.code))
            .collect();
        Ok(Self { sources })
    }

    #[must_use]
    pub fn sources(&self) -> &[RegisteredSource] {
        &self.sources
    }

    #[must_use]
    pub fn codes(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.code).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_code_is_case_insensitive() {
        assert_eq!(StoreKind::from_code("ATB"), Some(StoreKind::Atb));
        assert_eq!(StoreKind::from_code(" silpo "), Some(StoreKind::Silpo));
        assert_eq!(StoreKind::from_code("novus"), None);
    }

    #[test]
    fn default_registry_lists_every_store_in_order() {
        let registry = SourceRegistry::from_settings(&ClientSettings::default()).unwrap();
        assert_eq!(registry.codes(), vec!["silpo", "metro", "varus", "atb"]);
    }

    #[test]
    fn select_narrows_and_keeps_registry_order() {
        let registry = SourceRegistry::from_settings(&ClientSettings::default())
            .unwrap()
            .select(&["atb", "Metro"])
            .unwrap();
        assert_eq!(registry.codes(), vec!["metro", "atb"]);
    }

    #[test]
    fn select_with_no_codes_keeps_everything() {
        let registry = SourceRegistry::from_settings(&ClientSettings::default())
            .unwrap()
            .select::<&str>(&[])
            .unwrap();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn select_rejects_known_store_missing_from_registry() {
        let registry = SourceRegistry::with_configs(
            &ClientSettings::default(),
            [(StoreKind::Atb, SourceConfig::defaults(StoreKind::Atb))],
        )
        .unwrap();
        let result = registry.select(&["silpo"]);
        assert!(
            matches!(result, Err(ScraperError::UnknownSource { ref code }) if code == "silpo"),
            "expected UnknownSource"
        );
    }

    #[test]
    fn select_rejects_unknown_code() {
        let result = SourceRegistry::from_settings(&ClientSettings::default())
            .unwrap()
            .select(&["novus"]);
        assert!(
            matches!(result, Err(ScraperError::UnknownSource { ref code }) if code == "novus"),
            "expected UnknownSource"
        );
    }
}
