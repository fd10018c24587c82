//! Navigation and listing collaborators
//!
//! The orchestrator discovers categories through a [`NavigationDiscovery`]
//! and extracts listing items through a [`ListingExtractor`]. Both operate
//! on a [`Page`] the caller owns; the caller acquires a throttle slot before
//! every call that navigates. [`SelectorCatalog`] implements both from
//! configured CSS selectors.

mod selectors;

pub use selectors::SelectorCatalog;

use crate::page::{Page, PageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A category link found in navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLink {
    pub name: String,
    pub url: String,
}

/// A child category found while expanding a category page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredCategory {
    pub name: String,
    pub url: String,
    /// Whether the child is known to list products itself
    pub has_products: bool,
}

impl From<&DiscoveredCategory> for CategoryLink {
    fn from(category: &DiscoveredCategory) -> Self {
        Self {
            name: category.name.clone(),
            url: category.url.clone(),
        }
    }
}

/// One product extracted from a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingItem {
    /// Dedup key, unique per product within a site
    pub item_key: String,
    pub url: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ListingItem {
    /// Display name, if the extractor found a non-empty one
    pub fn name(&self) -> Option<&str> {
        self.fields
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[async_trait]
pub trait NavigationDiscovery: Send + Sync {
    /// Navigates to `root_url` and returns its top-level categories
    async fn discover_top_level(
        &self,
        page: &mut dyn Page,
        root_url: &str,
    ) -> Result<Vec<CategoryLink>, PageError>;

    /// Navigates to `category` and returns its child categories
    async fn expand_category(
        &self,
        page: &mut dyn Page,
        category: &CategoryLink,
        depth: u32,
    ) -> Result<Vec<DiscoveredCategory>, PageError>;
}

#[async_trait]
pub trait ListingExtractor: Send + Sync {
    /// Extracts the items visible on the loaded listing page
    async fn extract_listing_page(&self, page: &mut dyn Page)
        -> Result<Vec<ListingItem>, PageError>;
}
