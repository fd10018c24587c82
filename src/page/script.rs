//! Scripted in-memory site for exercising page logic without a network
//!
//! A [`ScriptedSite`] maps URLs to documents, and a document maps exact
//! selector strings to elements. Elements with an `href` navigate when
//! clicked; elements with a `data-state` attribute swap the current document
//! in place, as a load-more button would. A document's `on_scroll` state is
//! applied by `scroll_to_bottom`.

use crate::page::{Browser, ElementHandle, Page, PageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct ScriptedElement {
    pub text: String,
    pub attrs: HashMap<String, String>,
}

impl ScriptedElement {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            attrs: HashMap::new(),
        }
    }

    pub fn link(text: &str, href: &str) -> Self {
        Self::text(text).attr("href", href)
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedDoc {
    elements: HashMap<String, Vec<ScriptedElement>>,
    on_scroll: Option<String>,
}

impl ScriptedDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, selector: &str, elements: Vec<ScriptedElement>) -> Self {
        self.elements
            .entry(selector.to_string())
            .or_default()
            .extend(elements);
        self
    }

    /// `count` plain elements under `selector`, keyed `prefix-0..count`
    pub fn with_items(self, selector: &str, prefix: &str, count: usize) -> Self {
        let items = (0..count)
            .map(|i| ScriptedElement::link(&format!("{} {}", prefix, i), &format!("/p/{}-{}", prefix, i)))
            .collect();
        self.with(selector, items)
    }

    pub fn on_scroll(mut self, state: &str) -> Self {
        self.on_scroll = Some(state.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub struct ScriptedSite {
    docs: HashMap<String, ScriptedDoc>,
    states: HashMap<String, ScriptedDoc>,
    failures: HashMap<String, u16>,
    visits: Mutex<Vec<String>>,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, doc: ScriptedDoc) -> Self {
        self.docs.insert(url.to_string(), doc);
        self
    }

    /// A document reachable only through `data-state` or `on_scroll`
    pub fn state(mut self, name: &str, doc: ScriptedDoc) -> Self {
        self.states.insert(name.to_string(), doc);
        self
    }

    pub fn fail(mut self, url: &str, status: u16) -> Self {
        self.failures.insert(url.to_string(), status);
        self
    }

    /// Every URL navigated to, in order
    pub fn visits(&self) -> Vec<String> {
        self.visits
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn visit_count(&self, url: &str) -> usize {
        self.visits().iter().filter(|v| v.as_str() == url).count()
    }
}

pub struct ScriptedBrowser {
    pub site: Arc<ScriptedSite>,
}

impl ScriptedBrowser {
    pub fn new(site: ScriptedSite) -> Self {
        Self {
            site: Arc::new(site),
        }
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn open_page(&self) -> Result<Box<dyn Page>, PageError> {
        Ok(Box::new(ScriptedPage::new(self.site.clone())))
    }
}

pub struct ScriptedPage {
    site: Arc<ScriptedSite>,
    url: Option<String>,
    doc: ScriptedDoc,
}

impl ScriptedPage {
    pub fn new(site: Arc<ScriptedSite>) -> Self {
        Self {
            site,
            url: None,
            doc: ScriptedDoc::default(),
        }
    }

    fn element(&self, handle: &ElementHandle) -> Result<&ScriptedElement, PageError> {
        self.doc
            .elements
            .get(&handle.selector)
            .and_then(|els| els.get(handle.index))
            .ok_or_else(|| PageError::Interaction(format!("no element {:?}", handle)))
    }

    fn load(&mut self, url: &str) -> Result<(), PageError> {
        if let Ok(mut visits) = self.site.visits.lock() {
            visits.push(url.to_string());
        }

        if let Some(status) = self.site.failures.get(url) {
            return Err(PageError::Navigation {
                url: url.to_string(),
                status: Some(*status),
                message: format!("HTTP {}", status),
            });
        }

        let doc = self.site.docs.get(url).cloned().ok_or_else(|| PageError::Navigation {
            url: url.to_string(),
            status: Some(404),
            message: "HTTP 404".to_string(),
        })?;

        self.url = Some(url.to_string());
        self.doc = doc;
        Ok(())
    }

    fn switch_state(&mut self, name: &str) -> Result<(), PageError> {
        self.doc = self
            .site
            .states
            .get(name)
            .cloned()
            .ok_or_else(|| PageError::Interaction(format!("unknown state '{}'", name)))?;
        Ok(())
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), PageError> {
        self.load(url)
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, PageError> {
        let count = self.count_matching(selector).await?;
        Ok((0..count).map(|i| ElementHandle::new(selector, i)).collect())
    }

    async fn count_matching(&mut self, selector: &str) -> Result<usize, PageError> {
        if selector == "!broken" {
            return Err(PageError::Interaction("page crashed".to_string()));
        }
        Ok(self.doc.elements.get(selector).map_or(0, Vec::len))
    }

    async fn text_of(&mut self, element: &ElementHandle) -> Result<String, PageError> {
        Ok(self.element(element)?.text.clone())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PageError> {
        Ok(self.element(element)?.attrs.get(name).cloned())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), PageError> {
        let el = self.element(element)?.clone();

        if let Some(state) = el.attrs.get("data-state") {
            return self.switch_state(state);
        }

        let href = el
            .attrs
            .get("href")
            .ok_or_else(|| PageError::Interaction("nothing to click".to_string()))?;
        let base = self
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .ok_or_else(|| PageError::Interaction("no page loaded".to_string()))?;
        let target = base
            .join(href)
            .map_err(|e| PageError::Interaction(e.to_string()))?;
        self.load(target.as_str())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), PageError> {
        match self.doc.on_scroll.clone() {
            Some(state) => self.switch_state(&state),
            None => Ok(()),
        }
    }
}
