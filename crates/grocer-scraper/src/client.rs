//! HTTP client shared by every source adapter.

use std::time::Duration;

use grocer_core::AppConfig;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::ScraperError;
use crate::rate_limit::retry_with_backoff;
use crate::request::RequestSpec;

/// Connection and retry settings for a [`CatalogClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Extra attempts after a 429 or transport failure. `0` disables retries.
    pub max_retries: u32,
    pub retry_backoff_base_secs: u64,
}

impl ClientSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            request_timeout_secs: config.scraper_request_timeout_secs,
            user_agent: config.scraper_user_agent.clone(),
            max_retries: config.scraper_max_retries,
            retry_backoff_base_secs: config.scraper_retry_backoff_base_secs,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            user_agent: "grocer/0.1".to_owned(),
            max_retries: 0,
            retry_backoff_base_secs: 2,
        }
    }
}

/// Thin wrapper over `reqwest::Client` that turns HTTP outcomes into typed
/// [`ScraperError`]s.
///
/// 429 becomes [`ScraperError::RateLimited`], any other non-2xx becomes
/// [`ScraperError::UnexpectedStatus`].
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    request_timeout: Duration,
    max_retries: u32,
    backoff_base_secs: u64,
}

impl CatalogClient {
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(settings: &ClientSettings) -> Result<Self, ScraperError> {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs);
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&settings.user_agent)
            .build()?;
        Ok(Self {
            client,
            request_timeout,
            max_retries: settings.max_retries,
            backoff_base_secs: settings.retry_backoff_base_secs,
        })
    }

    /// Issues `spec` and decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Any transport or status error from [`CatalogClient::get_text`], or
    /// [`ScraperError::Deserialize`] when the body does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        context: &str,
    ) -> Result<T, ScraperError> {
        let body = self.get_text(spec).await?;
        serde_json::from_str::<T>(&body).map_err(|e| ScraperError::Deserialize {
            context: context.to_owned(),
            source: e,
        })
    }

    /// Issues `spec` and returns the raw body.
    ///
    /// # Errors
    ///
    /// - [`ScraperError::RateLimited`]: HTTP 429 after all retries.
    /// - [`ScraperError::UnexpectedStatus`]: any other non-2xx status.
    /// - [`ScraperError::Http`]: connect, TLS, timeout or body read failure.
    /// - [`ScraperError::Cancelled`]: the run deadline has already passed.
    pub async fn get_text(&self, spec: &RequestSpec) -> Result<String, ScraperError> {
        retry_with_backoff(self.max_retries, self.backoff_base_secs, || {
            self.send_once(spec)
        })
        .await
    }

    async fn send_once(&self, spec: &RequestSpec) -> Result<String, ScraperError> {
        let url = spec.url()?;
        let request = spec.clone().into_request(&self.client, self.request_timeout)?;
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ScraperError::RateLimited {
                domain: url.host_str().unwrap_or_default().to_owned(),
                retry_after_secs,
            });
        }

        if !status.is_success() {
            return Err(ScraperError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}
