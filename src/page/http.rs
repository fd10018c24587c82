//! Static-HTML page driver
//!
//! `HttpPage` fetches documents with `reqwest` and answers queries with
//! `scraper`. There is no script execution: clicking an element follows its
//! `href`, and scrolling does nothing, so load-more and infinite-scroll
//! listings end after their first page.

use crate::config::Config;
use crate::page::{Browser, ElementHandle, Page, PageError};
use crate::robots::RobotsCache;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Builds an HTTP client identifying the crawler
///
/// # Arguments
///
/// * `config` - The configuration holding the user agent section
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(Duration::from_millis(
            config.pagination.navigation_timeout_ms.saturating_mul(2),
        ))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Opens [`HttpPage`]s that share one client and one robots cache
pub struct HttpBrowser {
    client: Client,
    robots: Option<Arc<RobotsCache>>,
    click_timeout: Duration,
}

impl HttpBrowser {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config)?;
        let robots = config.http.respect_robots.then(|| {
            Arc::new(RobotsCache::new(
                client.clone(),
                &config.user_agent.crawler_name,
            ))
        });

        Ok(Self {
            client,
            robots,
            click_timeout: Duration::from_millis(config.pagination.navigation_timeout_ms),
        })
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open_page(&self) -> Result<Box<dyn Page>, PageError> {
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            robots: self.robots.clone(),
            click_timeout: self.click_timeout,
            url: None,
            body: String::new(),
        }))
    }
}

/// A page backed by the last fetched HTML document
pub struct HttpPage {
    client: Client,
    robots: Option<Arc<RobotsCache>>,
    click_timeout: Duration,
    url: Option<Url>,
    // Parsed on demand: scraper's document type cannot be held across an await
    body: String,
}

impl HttpPage {
    fn with_document<T>(&self, f: impl FnOnce(&Html) -> T) -> T {
        let document = Html::parse_document(&self.body);
        f(&document)
    }

    fn select_nth<T>(
        &self,
        element: &ElementHandle,
        f: impl FnOnce(scraper::ElementRef<'_>) -> T,
    ) -> Result<T, PageError> {
        let selector = parse_selector(&element.selector)?;
        self.with_document(|doc| doc.select(&selector).nth(element.index).map(f))
            .ok_or_else(|| {
                PageError::Interaction(format!(
                    "no element #{} for '{}'",
                    element.index, element.selector
                ))
            })
    }

    async fn fetch(&mut self, url: Url, timeout: Duration) -> Result<(), PageError> {
        let url_str = url.to_string();

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(&url).await {
                return Err(PageError::Disallowed(url_str));
            }
        }

        let request = async {
            let response = self.client.get(url).send().await.map_err(|e| {
                PageError::Navigation {
                    url: url_str.clone(),
                    status: None,
                    message: e.to_string(),
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(PageError::Navigation {
                    url: url_str.clone(),
                    status: Some(status.as_u16()),
                    message: format!("HTTP {}", status.as_u16()),
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            if !content_type.contains("text/html") {
                return Err(PageError::Navigation {
                    url: url_str.clone(),
                    status: Some(status.as_u16()),
                    message: format!("not an HTML document: '{}'", content_type),
                });
            }

            let final_url = response.url().clone();
            let body = response.text().await.map_err(|e| PageError::Navigation {
                url: url_str.clone(),
                status: Some(status.as_u16()),
                message: e.to_string(),
            })?;
            Ok((final_url, body))
        };

        let (final_url, body) = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| PageError::Timeout(timeout))??;

        tracing::debug!("Loaded {} ({} bytes)", final_url, body.len());
        self.url = Some(final_url);
        self.body = body;
        Ok(())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, PageError> {
    Selector::parse(selector).map_err(|_| PageError::Selector(selector.to_string()))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Page for HttpPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), PageError> {
        let parsed = Url::parse(url).map_err(|e| PageError::Navigation {
            url: url.to_string(),
            status: None,
            message: e.to_string(),
        })?;
        self.fetch(parsed, timeout).await
    }

    fn current_url(&self) -> Option<String> {
        self.url.as_ref().map(|u| u.to_string())
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, PageError> {
        let count = self.count_matching(selector).await?;
        Ok((0..count)
            .map(|index| ElementHandle::new(selector, index))
            .collect())
    }

    async fn count_matching(&mut self, selector: &str) -> Result<usize, PageError> {
        let parsed = parse_selector(selector)?;
        Ok(self.with_document(|doc| doc.select(&parsed).count()))
    }

    async fn text_of(&mut self, element: &ElementHandle) -> Result<String, PageError> {
        self.select_nth(element, |el| {
            normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
        })
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PageError> {
        self.select_nth(element, |el| el.value().attr(name).map(str::to_string))
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), PageError> {
        let href = self
            .select_nth(element, |el| el.value().attr("href").map(str::to_string))?
            .ok_or_else(|| {
                PageError::Interaction(format!(
                    "'{}' has no link target to follow",
                    element.selector
                ))
            })?;

        let base = self
            .url
            .clone()
            .ok_or_else(|| PageError::Interaction("no page loaded".to_string()))?;
        let target = base
            .join(&href)
            .map_err(|e| PageError::Interaction(format!("bad href '{}': {}", href, e)))?;

        self.fetch(target, self.click_timeout).await
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), PageError> {
        Ok(())
    }
}
