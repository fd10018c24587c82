//! Single-step advancement strategies

use crate::config::PaginationConfig;
use crate::page::{ElementHandle, Page, PageError};
use crate::pagination::probe::{find_enabled, find_first, find_page_number, ProbeOutcome};
use crate::url::{resolve_link, same_origin};
use std::time::Duration;
use url::Url;

/// Query keys recognized as a page counter
const PAGE_PARAMS: &[&str] = &["page", "p", "pg", "pagenum", "page_number", "pageNumber"];

/// Returns the URL of the page after `url`, if it carries a page counter
///
/// Recognizes a numeric query parameter such as `?page=3` and a `/page/3`
/// path segment.
pub fn next_page_url(url: &Url) -> Option<Url> {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if let Some(index) = pairs
        .iter()
        .position(|(k, v)| PAGE_PARAMS.contains(&k.as_str()) && v.parse::<u32>().is_ok())
    {
        let mut next = url.clone();
        let mut rewritten = pairs;
        let current: u32 = rewritten[index].1.parse().ok()?;
        rewritten[index].1 = current.checked_add(1)?.to_string();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(rewritten.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        return Some(next);
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    let position = segments.iter().rposition(|s| *s == "page")?;
    let current: u32 = segments.get(position + 1)?.parse().ok()?;

    let mut rewritten: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
    rewritten[position + 1] = current.checked_add(1)?.to_string();
    let mut next = url.clone();
    next.set_path(&format!("/{}", rewritten.join("/")));
    Some(next)
}

pub(crate) struct Stepper<'a> {
    pub config: &'a PaginationConfig,
}

impl Stepper<'_> {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.navigation_timeout_ms)
    }

    /// Numbered pagination: `rel=next`, URL increment, page-number link, page-number click
    pub async fn numbered(
        &self,
        page: &mut dyn Page,
        current_page: u32,
    ) -> Result<bool, PageError> {
        let selectors = &self.config.selectors;

        if self.follow_link(page, &selectors.next_link).await? {
            tracing::debug!("Advanced past page {} via rel=next", current_page);
            return Ok(true);
        }

        // Only step past controls the listing actually advertises
        let target = current_page.saturating_add(1);
        let has_later_page =
            find_page_number(page, &selectors.numbered, |n| n >= target).await?;
        let control = match find_page_number(page, &selectors.numbered, |n| n == target).await? {
            ProbeOutcome::Found(handle) => Some(handle),
            ProbeOutcome::NotFound => None,
        };

        if has_later_page == ProbeOutcome::NotFound {
            tracing::debug!("No page after {} advertised", current_page);
            return Ok(false);
        }

        if let Some(current) = current_url(page) {
            if let Some(next) = next_page_url(&current) {
                tracing::debug!("Advancing to {} by URL increment", next);
                page.navigate(next.as_str(), self.timeout()).await?;
                return Ok(true);
            }
        }

        let Some(control) = control else {
            return Ok(false);
        };

        if let Some(url) = self.link_target(page, &control).await? {
            tracing::debug!("Advancing to {} via page-number link", url);
            page.navigate(url.as_str(), self.timeout()).await?;
            return Ok(true);
        }

        tracing::debug!("Clicking page-number control for page {}", target);
        page.click(&control).await?;
        Ok(true)
    }

    /// Next control: resolved URL first, click otherwise
    pub async fn next_button(&self, page: &mut dyn Page) -> Result<bool, PageError> {
        let selectors = &self.config.selectors;

        if self.follow_link(page, &selectors.next_link).await? {
            return Ok(true);
        }

        let ProbeOutcome::Found(control) = find_enabled(page, &selectors.next).await? else {
            return Ok(false);
        };

        if let Some(url) = self.link_target(page, &control).await? {
            tracing::debug!("Advancing to {} via next control", url);
            page.navigate(url.as_str(), self.timeout()).await?;
        } else {
            page.click(&control).await?;
        }
        Ok(true)
    }

    /// Load-more control: click and report whether the listing grew
    pub async fn load_more(&self, page: &mut dyn Page) -> Result<bool, PageError> {
        let ProbeOutcome::Found(control) =
            find_enabled(page, &self.config.selectors.load_more).await?
        else {
            return Ok(false);
        };

        let before = self.count_items(page).await?;
        page.click(&control).await?;
        self.settle().await;
        let after = self.count_items(page).await?;

        tracing::debug!("Load-more grew listing from {} to {}", before, after);
        Ok(after > before)
    }

    /// Infinite scroll: scroll and report whether the listing grew
    pub async fn infinite_scroll(&self, page: &mut dyn Page) -> Result<bool, PageError> {
        let before = self.count_items(page).await?;
        page.scroll_to_bottom().await?;
        self.settle().await;
        let after = self.count_items(page).await?;

        tracing::debug!("Scroll grew listing from {} to {}", before, after);
        Ok(after > before)
    }

    /// Item count under the first item selector that matches anything
    async fn count_items(&self, page: &mut dyn Page) -> Result<usize, PageError> {
        for selector in &self.config.selectors.item {
            let count = page.count_matching(selector).await?;
            if count > 0 {
                return Ok(count);
            }
        }
        Ok(0)
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.scroll_delay_ms)).await;
    }

    async fn follow_link(&self, page: &mut dyn Page, selectors: &[String]) -> Result<bool, PageError> {
        let ProbeOutcome::Found(handle) = find_first(page, selectors).await? else {
            return Ok(false);
        };
        match self.link_target(page, &handle).await? {
            Some(url) => {
                page.navigate(url.as_str(), self.timeout()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Same-origin URL an element points at, if any
    async fn link_target(
        &self,
        page: &mut dyn Page,
        handle: &ElementHandle,
    ) -> Result<Option<Url>, PageError> {
        let Some(current) = current_url(page) else {
            return Ok(None);
        };
        let Some(href) = page.attribute(handle, "href").await? else {
            return Ok(None);
        };

        Ok(resolve_link(&current, &href)
            .filter(|target| same_origin(&current, target) && !is_same_page(&current, target)))
    }
}

fn current_url(page: &dyn Page) -> Option<Url> {
    page.current_url().and_then(|u| Url::parse(&u).ok())
}

fn is_same_page(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    a.set_fragment(None);
    a.as_str() == b.as_str()
}
