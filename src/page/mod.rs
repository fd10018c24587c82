//! The page interaction surface
//!
//! Pagination and catalog logic talk to a page only through the [`Page`]
//! trait. Every category task owns its own page, opened through a
//! [`Browser`]. [`HttpBrowser`] is the reference driver for server-rendered
//! storefronts.

mod http;
#[cfg(test)]
pub(crate) mod script;

pub use http::{build_http_client, HttpBrowser, HttpPage};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a page driver
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Page interaction failed: {0}")]
    Interaction(String),

    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Disallowed by robots.txt: {0}")]
    Disallowed(String),
}

impl PageError {
    /// HTTP status carried by a failed navigation
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Navigation { status, .. } => *status,
            _ => None,
        }
    }

    /// Short machine-readable code recorded in error details
    pub fn code(&self) -> &'static str {
        match self {
            Self::Navigation { .. } => "navigation",
            Self::Interaction(_) => "interaction",
            Self::Selector(_) => "selector",
            Self::Timeout(_) => "timeout",
            Self::Disallowed(_) => "robots",
        }
    }
}

/// A reference to the `index`-th element matching `selector` on the current page
///
/// Handles are invalidated by navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(selector: &str, index: usize) -> Self {
        Self {
            selector: selector.to_string(),
            index,
        }
    }
}

/// Narrow interface over a live page
#[async_trait]
pub trait Page: Send {
    // ===== Navigation =====

    /// Loads `url`, failing if it does not complete within `timeout`
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), PageError>;

    /// URL of the loaded document, after redirects
    fn current_url(&self) -> Option<String>;

    // ===== Queries =====

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, PageError>;

    async fn count_matching(&mut self, selector: &str) -> Result<usize, PageError>;

    /// Whitespace-normalized text content of an element
    async fn text_of(&mut self, element: &ElementHandle) -> Result<String, PageError>;

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PageError>;

    // ===== Interaction =====

    async fn click(&mut self, element: &ElementHandle) -> Result<(), PageError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), PageError>;
}

/// Factory for pages
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn Page>, PageError>;
}
