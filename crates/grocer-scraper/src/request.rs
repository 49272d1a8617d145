//! Pure construction of outbound catalog requests.
//!
//! A [`RequestSpec`] carries everything needed to issue one GET: base URL,
//! query parameters, the source's header set and the run deadline. Nothing
//! touches the network until the spec is turned into a
//! `reqwest::RequestBuilder`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use reqwest::{Client, Url};
use tokio::time::Instant;

use crate::error::ScraperError;

#[derive(Debug, Clone)]
pub struct RequestSpec {
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    deadline: Option<Instant>,
}

impl RequestSpec {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    #[must_use]
    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend_from_slice(headers);
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fully encoded request URL, query string included.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidUrl`] if the base URL does not parse.
    pub fn url(&self) -> Result<Url, ScraperError> {
        let mut url = Url::parse(&self.url).map_err(|e| ScraperError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }

    /// Header set as a `HeaderMap`. `Host` is dropped: the client derives it
    /// from the URL.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidHeader`] if a name or value is not a
    /// legal HTTP header.
    pub fn header_map(&self) -> Result<HeaderMap, ScraperError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ScraperError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            if header_name == HOST {
                continue;
            }
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ScraperError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    /// Time budget for this request: the default timeout, capped by whatever
    /// is left before the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Cancelled`] once the deadline has passed.
    pub fn effective_timeout(&self, default_timeout: Duration) -> Result<Duration, ScraperError> {
        let Some(deadline) = self.deadline else {
            return Ok(default_timeout);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ScraperError::Cancelled);
        }
        Ok(default_timeout.min(remaining))
    }

    /// Builds the `reqwest` request for this spec.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidUrl`], [`ScraperError::InvalidHeader`]
    /// or, past the deadline, [`ScraperError::Cancelled`].
    pub fn into_request(
        self,
        client: &Client,
        default_timeout: Duration,
    ) -> Result<reqwest::RequestBuilder, ScraperError> {
        let url = self.url()?;
        let headers = self.header_map()?;
        let timeout = self.effective_timeout(default_timeout)?;
        Ok(client.get(url).headers(headers).timeout(timeout))
    }
}
