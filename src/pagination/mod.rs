//! Pagination detection and stepping
//!
//! [`PaginationController::detect_type`] runs an ordered list of typed probes
//! against a listing page and reports the first mechanism found.
//! [`PaginationController::advance`] then moves the page forward by exactly
//! one step using the strategy for that mechanism. The controller holds no
//! per-listing state; that lives in a caller-owned [`PaginationSession`].

mod advance;
mod probe;
mod session;

pub use advance::next_page_url;
pub use probe::{Probe, ProbeOutcome};
pub use session::{PaginationLimits, PaginationSession, StopReason};

use crate::config::PaginationConfig;
use crate::page::{Page, PageError};
use advance::Stepper;
use serde::{Deserialize, Serialize};

/// Pagination mechanism of a listing page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationType {
    Numbered,
    LoadMore,
    InfiniteScroll,
    NextButton,
    SinglePage,
    Unknown,
}

impl PaginationType {
    /// Whether advancing can ever produce another page
    pub fn is_paginated(self) -> bool {
        !matches!(self, Self::SinglePage | Self::Unknown)
    }
}

impl std::fmt::Display for PaginationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Numbered => "numbered",
            Self::LoadMore => "load-more",
            Self::InfiniteScroll => "infinite-scroll",
            Self::NextButton => "next-button",
            Self::SinglePage => "single-page",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Stateless pagination decision logic over the [`Page`] surface
#[derive(Debug, Clone)]
pub struct PaginationController {
    config: PaginationConfig,
}

impl PaginationController {
    pub fn new(config: PaginationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Detects the pagination mechanism of the loaded page
    ///
    /// Probes run in order: numbered links, load-more control,
    /// infinite-scroll marker, next control. The first match wins and a page
    /// with none of them is single-page. `Unknown` is returned only when the
    /// page itself fails.
    pub async fn detect_type(&self, page: &mut dyn Page) -> PaginationType {
        for probe in Probe::ORDER {
            match probe.run(page, &self.config.selectors).await {
                Ok(ProbeOutcome::Found(handle)) => {
                    tracing::debug!("{:?} probe matched {:?}", probe, handle);
                    return probe.pagination_type();
                }
                Ok(ProbeOutcome::NotFound) => {}
                Err(e) => {
                    tracing::warn!("Pagination detection failed: {}", e);
                    return PaginationType::Unknown;
                }
            }
        }
        PaginationType::SinglePage
    }

    /// Advances the page by one step, failing closed
    ///
    /// Any page error is logged and reported as `false`.
    pub async fn advance(&self, page: &mut dyn Page, session: &mut PaginationSession) -> bool {
        match self.try_advance(page, session).await {
            Ok(has_more) => has_more,
            Err(e) => {
                tracing::warn!(
                    "Advancing past page {} failed: {}",
                    session.current_page,
                    e
                );
                false
            }
        }
    }

    /// Advances the page by one step
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A further page is loaded; `session.current_page` was incremented
    /// * `Ok(false)` - The listing has no further page
    /// * `Err(PageError)` - Navigation or interaction failed
    pub async fn try_advance(
        &self,
        page: &mut dyn Page,
        session: &mut PaginationSession,
    ) -> Result<bool, PageError> {
        let stepper = Stepper {
            config: &self.config,
        };

        let has_more = match session.pagination_type {
            PaginationType::Numbered => stepper.numbered(page, session.current_page).await?,
            PaginationType::NextButton => stepper.next_button(page).await?,
            PaginationType::LoadMore => stepper.load_more(page).await?,
            PaginationType::InfiniteScroll => stepper.infinite_scroll(page).await?,
            PaginationType::SinglePage | PaginationType::Unknown => false,
        };

        if has_more {
            session.current_page += 1;
        }
        Ok(has_more)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::script::{ScriptedDoc, ScriptedElement, ScriptedPage, ScriptedSite};
    use std::sync::Arc;
    use std::time::Duration;

    const BASE: &str = "https://shop.test/c/shoes";

    fn controller() -> PaginationController {
        PaginationController::new(PaginationConfig {
            scroll_delay_ms: 10,
            ..PaginationConfig::default()
        })
    }

    async fn open(site: ScriptedSite, url: &str) -> (Arc<ScriptedSite>, ScriptedPage) {
        let site = Arc::new(site);
        let mut page = ScriptedPage::new(site.clone());
        page.navigate(url, Duration::from_secs(1)).await.unwrap();
        (site, page)
    }

    fn numbered_doc(page: u32, last: u32) -> ScriptedDoc {
        let links = (1..=last)
            .map(|n| ScriptedElement::link(&n.to_string(), &format!("/c/shoes?page={}", n)))
            .collect();
        ScriptedDoc::new()
            .with(".pagination a", links)
            .with_items(".product-item", &format!("p{}", page), 3)
    }

    fn numbered_site(last: u32) -> ScriptedSite {
        let mut site = ScriptedSite::new().page(BASE, numbered_doc(1, last));
        for n in 1..=last {
            site = site.page(&format!("{}?page={}", BASE, n), numbered_doc(n, last));
        }
        site
    }

    #[tokio::test]
    async fn test_detect_numbered() {
        let (_, mut page) = open(numbered_site(3), BASE).await;
        assert_eq!(
            controller().detect_type(&mut page).await,
            PaginationType::Numbered
        );
    }

    #[tokio::test]
    async fn test_detect_order_prefers_numbered_over_next() {
        let doc = numbered_doc(1, 2).with("a.next", vec![ScriptedElement::link("Next", "/c/shoes?page=2")]);
        let (_, mut page) = open(ScriptedSite::new().page(BASE, doc), BASE).await;
        assert_eq!(
            controller().detect_type(&mut page).await,
            PaginationType::Numbered
        );
    }

    #[tokio::test]
    async fn test_detect_load_more_scroll_next_single() {
        let cases = vec![
            (
                ScriptedDoc::new().with("button.load-more", vec![ScriptedElement::text("More")]),
                PaginationType::LoadMore,
            ),
            (
                ScriptedDoc::new().with("[data-infinite-scroll]", vec![ScriptedElement::text("")]),
                PaginationType::InfiniteScroll,
            ),
            (
                ScriptedDoc::new().with("a.next", vec![ScriptedElement::link("Next", "/n")]),
                PaginationType::NextButton,
            ),
            (
                ScriptedDoc::new().with_items(".product-item", "p", 4),
                PaginationType::SinglePage,
            ),
        ];

        for (doc, expected) in cases {
            let (_, mut page) = open(ScriptedSite::new().page(BASE, doc), BASE).await;
            assert_eq!(controller().detect_type(&mut page).await, expected);
        }
    }

    #[tokio::test]
    async fn test_detect_unknown_on_page_error() {
        let config = PaginationConfig {
            selectors: crate::config::PaginationSelectors {
                numbered: vec!["!broken".to_string()],
                ..Default::default()
            },
            ..PaginationConfig::default()
        };
        let (_, mut page) = open(ScriptedSite::new().page(BASE, ScriptedDoc::new()), BASE).await;
        assert_eq!(
            PaginationController::new(config).detect_type(&mut page).await,
            PaginationType::Unknown
        );
    }

    #[tokio::test]
    async fn test_numbered_walks_to_last_page() {
        let (site, mut page) = open(numbered_site(3), BASE).await;
        let controller = controller();
        let mut session = PaginationSession::new(PaginationType::Numbered);

        assert!(controller.advance(&mut page, &mut session).await);
        assert_eq!(page.current_url().unwrap(), format!("{}?page=2", BASE));
        assert!(controller.advance(&mut page, &mut session).await);
        assert_eq!(page.current_url().unwrap(), format!("{}?page=3", BASE));
        assert!(!controller.advance(&mut page, &mut session).await);

        assert_eq!(session.current_page, 3);
        assert_eq!(site.visit_count(&format!("{}?page=4", BASE)), 0);
    }

    #[tokio::test]
    async fn test_numbered_prefers_rel_next() {
        let doc = numbered_doc(1, 3).with(
            "link[rel='next']",
            vec![ScriptedElement::link("", "/c/shoes/page/2")],
        );
        let site = ScriptedSite::new()
            .page(BASE, doc)
            .page("https://shop.test/c/shoes/page/2", ScriptedDoc::new());
        let (_, mut page) = open(site, BASE).await;
        let mut session = PaginationSession::new(PaginationType::Numbered);

        assert!(controller().advance(&mut page, &mut session).await);
        assert_eq!(page.current_url().unwrap(), "https://shop.test/c/shoes/page/2");
    }

    #[tokio::test]
    async fn test_numbered_clicks_control_without_href() {
        let doc = ScriptedDoc::new().with(
            ".pagination a",
            vec![
                ScriptedElement::text("1"),
                ScriptedElement::text("2").attr("data-state", "second"),
            ],
        );
        let site = ScriptedSite::new()
            .page(BASE, doc)
            .state("second", ScriptedDoc::new().with_items(".product-item", "b", 2));
        let (_, mut page) = open(site, BASE).await;
        let mut session = PaginationSession::new(PaginationType::Numbered);

        assert!(controller().advance(&mut page, &mut session).await);
        assert_eq!(page.count_matching(".product-item").await.unwrap(), 2);
        assert_eq!(session.current_page, 2);
    }

    #[tokio::test]
    async fn test_numbered_navigation_failure_fails_closed() {
        let site = numbered_site(3).fail(&format!("{}?page=2", BASE), 503);
        let (_, mut page) = open(site, BASE).await;
        let controller = controller();
        let mut session = PaginationSession::new(PaginationType::Numbered);

        let err = controller.try_advance(&mut page, &mut session).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(!controller.advance(&mut page, &mut session).await);
        assert_eq!(session.current_page, 1);
    }

    #[tokio::test]
    async fn test_next_button_prefers_url() {
        let doc = ScriptedDoc::new().with(
            "a.next",
            vec![ScriptedElement::link("Next", "/c/shoes/2").attr("data-state", "clicked")],
        );
        let site = ScriptedSite::new()
            .page(BASE, doc)
            .page("https://shop.test/c/shoes/2", ScriptedDoc::new())
            .state("clicked", ScriptedDoc::new());
        let (site, mut page) = open(site, BASE).await;
        let mut session = PaginationSession::new(PaginationType::NextButton);

        assert!(controller().advance(&mut page, &mut session).await);
        assert_eq!(site.visit_count("https://shop.test/c/shoes/2"), 1);
    }

    #[tokio::test]
    async fn test_next_button_missing() {
        let (_, mut page) = open(ScriptedSite::new().page(BASE, ScriptedDoc::new()), BASE).await;
        let mut session = PaginationSession::new(PaginationType::NextButton);
        assert!(!controller().advance(&mut page, &mut session).await);
    }

    #[tokio::test]
    async fn test_load_more_grows_then_stops() {
        let button = |state: &str| ScriptedElement::text("More").attr("data-state", state);
        let site = ScriptedSite::new()
            .page(
                BASE,
                ScriptedDoc::new()
                    .with("button.load-more", vec![button("more")])
                    .with_items(".product-item", "a", 2),
            )
            .state(
                "more",
                ScriptedDoc::new()
                    .with("button.load-more", vec![button("same")])
                    .with_items(".product-item", "a", 4),
            )
            .state(
                "same",
                ScriptedDoc::new()
                    .with("button.load-more", vec![button("same")])
                    .with_items(".product-item", "a", 4),
            );
        let (_, mut page) = open(site, BASE).await;
        let controller = controller();
        let mut session = PaginationSession::new(PaginationType::LoadMore);

        assert!(controller.advance(&mut page, &mut session).await);
        assert!(!controller.advance(&mut page, &mut session).await);
        assert_eq!(session.current_page, 2);
    }

    #[tokio::test]
    async fn test_infinite_scroll() {
        let site = ScriptedSite::new()
            .page(
                BASE,
                ScriptedDoc::new()
                    .with_items(".product-card", "a", 3)
                    .on_scroll("loaded"),
            )
            .state("loaded", ScriptedDoc::new().with_items(".product-card", "a", 6));
        let (_, mut page) = open(site, BASE).await;
        let controller = controller();
        let mut session = PaginationSession::new(PaginationType::InfiniteScroll);

        assert!(controller.advance(&mut page, &mut session).await);
        assert!(!controller.advance(&mut page, &mut session).await);
    }

    #[tokio::test]
    async fn test_single_page_never_advances() {
        let (_, mut page) = open(numbered_site(3), BASE).await;
        let controller = controller();
        for pagination_type in [PaginationType::SinglePage, PaginationType::Unknown] {
            let mut session = PaginationSession::new(pagination_type);
            assert!(!controller.advance(&mut page, &mut session).await);
            assert_eq!(session.current_page, 1);
        }
    }

    #[tokio::test]
    async fn test_max_pages_respected_while_has_more() {
        let (_, mut page) = open(numbered_site(10), BASE).await;
        let controller = controller();
        let limits = PaginationLimits {
            max_pages: 4,
            max_items: 1000,
            empty_page_threshold: 1,
        };
        let mut session = PaginationSession::new(PaginationType::Numbered);

        loop {
            let keys: Vec<String> = (0..3)
                .map(|i| format!("{}-{}", session.current_page, i))
                .collect();
            session.record_items(keys, |k| k.as_str(), limits.max_items);
            if let Some(reason) = session.limit_reached(&limits) {
                session.stop(reason);
                break;
            }
            if !controller.advance(&mut page, &mut session).await {
                session.stop(StopReason::NoMorePages);
                break;
            }
        }

        assert_eq!(session.current_page, 4);
        assert_eq!(session.stop_reason, Some(StopReason::MaxPages));
    }
}
