//! Typed pagination probes
//!
//! Each probe looks for one kind of pagination control. Absence is an
//! ordinary [`ProbeOutcome::NotFound`]; only a failing page interaction
//! produces an error.

use crate::config::PaginationSelectors;
use crate::page::{ElementHandle, Page, PageError};
use crate::pagination::PaginationType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found(ElementHandle),
    NotFound,
}

/// The probes, in detection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    NumberedLinks,
    LoadMore,
    InfiniteScroll,
    NextControl,
}

impl Probe {
    pub const ORDER: [Probe; 4] = [
        Probe::NumberedLinks,
        Probe::LoadMore,
        Probe::InfiniteScroll,
        Probe::NextControl,
    ];

    /// Pagination type reported when this probe matches
    pub fn pagination_type(self) -> PaginationType {
        match self {
            Probe::NumberedLinks => PaginationType::Numbered,
            Probe::LoadMore => PaginationType::LoadMore,
            Probe::InfiniteScroll => PaginationType::InfiniteScroll,
            Probe::NextControl => PaginationType::NextButton,
        }
    }

    pub async fn run(
        self,
        page: &mut dyn Page,
        selectors: &PaginationSelectors,
    ) -> Result<ProbeOutcome, PageError> {
        match self {
            Probe::NumberedLinks => find_page_number(page, &selectors.numbered, |n| n >= 1).await,
            Probe::LoadMore => find_enabled(page, &selectors.load_more).await,
            Probe::InfiniteScroll => find_first(page, &selectors.infinite_scroll).await,
            Probe::NextControl => {
                if let found @ ProbeOutcome::Found(_) =
                    find_enabled(page, &selectors.next_link).await?
                {
                    return Ok(found);
                }
                find_enabled(page, &selectors.next).await
            }
        }
    }
}

/// First element matching any selector
pub async fn find_first(
    page: &mut dyn Page,
    selectors: &[String],
) -> Result<ProbeOutcome, PageError> {
    for selector in selectors {
        if let Some(handle) = page.query_all(selector).await?.into_iter().next() {
            return Ok(ProbeOutcome::Found(handle));
        }
    }
    Ok(ProbeOutcome::NotFound)
}

/// First element matching any selector that is not marked disabled
pub async fn find_enabled(
    page: &mut dyn Page,
    selectors: &[String],
) -> Result<ProbeOutcome, PageError> {
    for selector in selectors {
        for handle in page.query_all(selector).await? {
            if !is_disabled(page, &handle).await? {
                return Ok(ProbeOutcome::Found(handle));
            }
        }
    }
    Ok(ProbeOutcome::NotFound)
}

/// First page-number control whose number satisfies `accept`
pub async fn find_page_number(
    page: &mut dyn Page,
    selectors: &[String],
    accept: impl Fn(u32) -> bool + Send,
) -> Result<ProbeOutcome, PageError> {
    for selector in selectors {
        for handle in page.query_all(selector).await? {
            let text = page.text_of(&handle).await?;
            if let Ok(number) = text.trim().parse::<u32>() {
                if accept(number) {
                    return Ok(ProbeOutcome::Found(handle));
                }
            }
        }
    }
    Ok(ProbeOutcome::NotFound)
}

async fn is_disabled(page: &mut dyn Page, handle: &ElementHandle) -> Result<bool, PageError> {
    if page.attribute(handle, "disabled").await?.is_some() {
        return Ok(true);
    }
    if page.attribute(handle, "aria-disabled").await?.as_deref() == Some("true") {
        return Ok(true);
    }
    let class = page.attribute(handle, "class").await?.unwrap_or_default();
    Ok(class.split_whitespace().any(|c| c == "disabled"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::script::{ScriptedDoc, ScriptedElement, ScriptedPage, ScriptedSite};
    use std::sync::Arc;
    use std::time::Duration;

    const URL: &str = "https://shop.test/c/shoes";

    async fn page_with(doc: ScriptedDoc) -> ScriptedPage {
        let site = Arc::new(ScriptedSite::new().page(URL, doc));
        let mut page = ScriptedPage::new(site);
        page.navigate(URL, Duration::from_secs(1)).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_numbered_requires_numeric_text() {
        let selectors = PaginationSelectors::default();
        let mut page = page_with(ScriptedDoc::new().with(
            ".pagination a",
            vec![ScriptedElement::link("Prev", "/c/shoes?page=0")],
        ))
        .await;
        assert_eq!(
            Probe::NumberedLinks.run(&mut page, &selectors).await.unwrap(),
            ProbeOutcome::NotFound
        );

        let mut page = page_with(ScriptedDoc::new().with(
            ".pagination a",
            vec![
                ScriptedElement::link("Prev", "/c/shoes?page=0"),
                ScriptedElement::link(" 2 ", "/c/shoes?page=2"),
            ],
        ))
        .await;
        assert_eq!(
            Probe::NumberedLinks.run(&mut page, &selectors).await.unwrap(),
            ProbeOutcome::Found(ElementHandle::new(".pagination a", 1))
        );
    }

    #[tokio::test]
    async fn test_disabled_controls_ignored() {
        let selectors = PaginationSelectors::default();
        let mut page = page_with(
            ScriptedDoc::new()
                .with("a.next", vec![ScriptedElement::link("Next", "/x").attr("class", "next disabled")])
                .with("button.next", vec![ScriptedElement::text("Next").attr("disabled", "")]),
        )
        .await;
        assert_eq!(
            Probe::NextControl.run(&mut page, &selectors).await.unwrap(),
            ProbeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_next_link_preferred() {
        let selectors = PaginationSelectors::default();
        let mut page = page_with(
            ScriptedDoc::new()
                .with("a.next", vec![ScriptedElement::link("Next", "/c/shoes/2")])
                .with("link[rel='next']", vec![ScriptedElement::link("", "/c/shoes/2")]),
        )
        .await;
        assert_eq!(
            Probe::NextControl.run(&mut page, &selectors).await.unwrap(),
            ProbeOutcome::Found(ElementHandle::new("link[rel='next']", 0))
        );
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let selectors = PaginationSelectors {
            infinite_scroll: vec!["!broken".to_string()],
            ..PaginationSelectors::default()
        };
        let mut page = page_with(ScriptedDoc::new()).await;
        assert!(Probe::InfiniteScroll.run(&mut page, &selectors).await.is_err());
    }
}
