//! Selector-driven catalog
//!
//! # Link Rules
//!
//! **Include:**
//! - Elements matching the configured selectors with an `href`
//! - Same-origin targets only, canonicalized
//!
//! **Exclude:**
//! - `javascript:`, `mailto:`, `tel:` and `data:` targets
//! - In-page anchors and links back to the current page
//! - `<a download>` links
//! - Repeats of a URL already collected

use crate::catalog::{
    CategoryLink, DiscoveredCategory, ListingExtractor, ListingItem, NavigationDiscovery,
};
use crate::config::CatalogConfig;
use crate::page::{ElementHandle, Page, PageError};
use crate::url::{resolve_link, same_origin};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Catalog collaborator backed by [`CatalogConfig`] selector lists
#[derive(Debug, Clone)]
pub struct SelectorCatalog {
    config: CatalogConfig,
    navigation_timeout: Duration,
}

impl SelectorCatalog {
    pub fn new(config: CatalogConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            navigation_timeout,
        }
    }

    async fn collect_links(
        &self,
        page: &mut dyn Page,
        selectors: &[String],
    ) -> Result<Vec<CategoryLink>, PageError> {
        let Some(base) = loaded_url(page) else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        seen.insert(base.to_string());
        let mut links = Vec::new();

        for selector in selectors {
            for handle in page.query_all(selector).await? {
                let Some(url) = link_target(page, &base, &handle).await? else {
                    continue;
                };
                if !seen.insert(url.to_string()) {
                    continue;
                }

                let text = page.text_of(&handle).await?;
                links.push(CategoryLink {
                    name: display_name(&text, &url),
                    url: url.to_string(),
                });
            }
        }

        Ok(links)
    }

    async fn product_titles(&self, page: &mut dyn Page) -> Result<Vec<String>, PageError> {
        for selector in &self.config.product_title {
            let handles = page.query_all(selector).await?;
            if handles.is_empty() {
                continue;
            }
            let mut titles = Vec::with_capacity(handles.len());
            for handle in &handles {
                titles.push(page.text_of(handle).await?);
            }
            return Ok(titles);
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl NavigationDiscovery for SelectorCatalog {
    async fn discover_top_level(
        &self,
        page: &mut dyn Page,
        root_url: &str,
    ) -> Result<Vec<CategoryLink>, PageError> {
        page.navigate(root_url, self.navigation_timeout).await?;
        let links = self.collect_links(page, &self.config.navigation).await?;
        tracing::debug!("Found {} top-level categories on {}", links.len(), root_url);
        Ok(links)
    }

    async fn expand_category(
        &self,
        page: &mut dyn Page,
        category: &CategoryLink,
        depth: u32,
    ) -> Result<Vec<DiscoveredCategory>, PageError> {
        page.navigate(&category.url, self.navigation_timeout).await?;
        let children = self.collect_links(page, &self.config.subcategory).await?;
        tracing::debug!(
            "Category '{}' at depth {} has {} children",
            category.name,
            depth,
            children.len()
        );

        // Whether a child lists products is only known once it is visited
        Ok(children
            .into_iter()
            .map(|link| DiscoveredCategory {
                name: link.name,
                url: link.url,
                has_products: false,
            })
            .collect())
    }
}

#[async_trait]
impl ListingExtractor for SelectorCatalog {
    async fn extract_listing_page(
        &self,
        page: &mut dyn Page,
    ) -> Result<Vec<ListingItem>, PageError> {
        let Some(base) = loaded_url(page) else {
            return Ok(Vec::new());
        };

        for selector in &self.config.product_link {
            let handles = page.query_all(selector).await?;
            if handles.is_empty() {
                continue;
            }

            let titles = self.product_titles(page).await?;
            let titles_align = titles.len() == handles.len();
            let mut items = Vec::with_capacity(handles.len());

            for (index, handle) in handles.iter().enumerate() {
                let Some(url) = link_target(page, &base, handle).await? else {
                    continue;
                };
                let name = if titles_align {
                    titles[index].clone()
                } else {
                    page.text_of(handle).await?
                };

                let mut fields = Map::new();
                fields.insert("name".to_string(), Value::String(name));
                items.push(ListingItem {
                    item_key: url.to_string(),
                    url: url.to_string(),
                    fields,
                });
            }

            return Ok(items);
        }

        Ok(Vec::new())
    }
}

fn loaded_url(page: &dyn Page) -> Option<Url> {
    page.current_url().and_then(|u| Url::parse(&u).ok())
}

/// Canonical same-origin URL an element links to
async fn link_target(
    page: &mut dyn Page,
    base: &Url,
    handle: &ElementHandle,
) -> Result<Option<Url>, PageError> {
    if page.attribute(handle, "download").await?.is_some() {
        return Ok(None);
    }
    let Some(href) = page.attribute(handle, "href").await? else {
        return Ok(None);
    };

    Ok(resolve_link(base, &href).filter(|url| same_origin(base, url) && url != base))
}

/// Link text, or the last path segment when the text is blank
fn display_name(text: &str, url: &Url) -> String {
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
