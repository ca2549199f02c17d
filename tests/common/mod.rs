//! Shared fakes for integration tests: an in-memory page, a recording
//! navigator and a scripted image fetcher.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reposter_lib::browser::{ElementHandle, Locator, PageCapabilities, UploadFile};
use reposter_lib::config::AppConfig;
use reposter_lib::controller::Navigator;
use reposter_lib::error::{ReposterError, Result};
use reposter_lib::images::{FetchedImage, ImageFetcher};
use reposter_lib::job::PageId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const PAGE: &str = "page-1";
pub const SOURCE_URL: &str = "https://www.marktplaats.nl/seller/view/m2087654321";
pub const DELETE_SUCCESS_URL: &str =
    "https://www.marktplaats.nl/my-account/sell/index.html?previousAction=deleteAdSuccess";
pub const CREATE_FORM_URL: &str = "https://www.marktplaats.nl/plaats";

pub fn page_id() -> PageId {
    PageId::new(PAGE)
}

/// Defaults with zero settle times, short waits, and plain selectors the
/// fake page can serve.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    let t = &mut config.timing;
    t.page_settle_ms = 0;
    t.action_settle_ms = 0;
    t.upload_settle_ms = 0;
    t.element_timeout_ms = 200;
    t.poll_interval_ms = 10;
    t.reply_timeout_ms = 2000;
    t.navigation_retry_ms = 10;
    t.rich_text_min_len = 5;

    let l = &mut config.site.locators;
    l.title = vec![Locator::css("h1")];
    l.description = vec![Locator::css("#description")];
    l.price = vec![Locator::css("#price")];
    l.category_items = vec![Locator::css(".crumb")];
    l.location = vec![Locator::css("#location")];
    l.attribute_rows = vec![Locator::css(".attr")];
    l.images = vec![Locator::css("img.hero"), Locator::css("img.thumb")];
    l.page_body = vec![Locator::css("body")];
    l.edit_rich_text = vec![Locator::css(".editor")];
    l.delete_button = vec![Locator::css("#delete-missing"), Locator::text("button", "verwijder")];
    l.delete_confirm = vec![Locator::text("button", "niet verkocht").visible()];
    l.form_title = vec![Locator::css("#title")];
    l.form_description = vec![Locator::css("#desc-editor")];
    l.file_input = vec![Locator::css("input[type=file]")];
    l.upload_previews = vec![Locator::css(".preview")];
    l.price_kind = vec![Locator::css("#price-kind")];
    l.price_input = vec![Locator::css("#price-input")];
    l.postcode_input = vec![Locator::css("#postcode")];
    l.delivery_pickup = vec![Locator::css("#pickup")];
    l.free_bundle = vec![Locator::css("#free-bundle")];
    l.submit = vec![Locator::css("#submit")];
    config
}

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub text: String,
    pub html: String,
    pub attrs: HashMap<String, String>,
    pub value: String,
    pub hidden: bool,
    pub disabled: bool,
}

impl FakeElement {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            html: text.to_string(),
            ..Default::default()
        }
    }

    pub fn html(text: &str, html: &str) -> Self {
        Self {
            text: text.to_string(),
            html: html.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

#[derive(Default)]
struct PageState {
    url: String,
    history: Vec<String>,
    dom: HashMap<String, Vec<FakeElement>>,
    actions: Vec<String>,
    uploads: Vec<UploadFile>,
}

/// A page whose DOM is a map from CSS selector to elements.
pub struct FakePage {
    id: PageId,
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            id: page_id(),
            state: Mutex::new(PageState {
                url: url.to_string(),
                ..Default::default()
            }),
        })
    }

    pub fn with_id(id: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            id: PageId::new(id),
            state: Mutex::new(PageState {
                url: url.to_string(),
                ..Default::default()
            }),
        })
    }

    pub fn add(&self, css: &str, element: FakeElement) {
        self.state
            .lock()
            .dom
            .entry(css.to_string())
            .or_default()
            .push(element);
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().actions.clone()
    }

    pub fn uploads(&self) -> Vec<UploadFile> {
        self.state.lock().uploads.clone()
    }

    pub fn value_of(&self, css: &str) -> Option<String> {
        self.state
            .lock()
            .dom
            .get(css)
            .and_then(|els| els.first())
            .map(|el| el.value.clone())
    }

    pub fn text_of(&self, css: &str) -> Option<String> {
        self.state
            .lock()
            .dom
            .get(css)
            .and_then(|els| els.first())
            .map(|el| el.text.clone())
    }

    fn matching(state: &PageState, locator: &Locator) -> Vec<usize> {
        let Some(elements) = state.dom.get(&locator.css) else {
            return Vec::new();
        };
        elements
            .iter()
            .enumerate()
            .filter(|(_, el)| !(locator.visible && el.hidden))
            .filter(|(_, el)| match &locator.text {
                Some(needle) => el.text.to_lowercase().contains(&needle.to_lowercase()),
                None => true,
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn with_element<T>(
        &self,
        handle: &ElementHandle,
        f: impl FnOnce(&mut FakeElement) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let index = Self::matching(&state, &handle.locator)
            .get(handle.index)
            .copied()
            .ok_or_else(|| ReposterError::Browser(format!("element {} is gone", handle.locator)))?;
        let element = state
            .dom
            .get_mut(&handle.locator.css)
            .and_then(|els| els.get_mut(index))
            .ok_or_else(|| ReposterError::Browser("element vanished".to_string()))?;
        Ok(f(element))
    }

    fn log(&self, action: String) {
        self.state.lock().actions.push(action);
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[async_trait]
impl PageCapabilities for FakePage {
    fn id(&self) -> &PageId {
        &self.id
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().url.clone())
    }

    async fn locate(&self, chain: &[Locator]) -> Result<Option<ElementHandle>> {
        Ok(self.locate_all(chain).await?.into_iter().next())
    }

    async fn locate_all(&self, chain: &[Locator]) -> Result<Vec<ElementHandle>> {
        let state = self.state.lock();
        for locator in chain {
            let count = Self::matching(&state, locator).len();
            if count > 0 {
                return Ok((0..count)
                    .map(|i| ElementHandle::new(locator.clone(), i))
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String> {
        self.with_element(element, |el| el.text.clone())
    }

    async fn read_html(&self, element: &ElementHandle) -> Result<String> {
        self.with_element(element, |el| el.html.clone())
    }

    async fn read_attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.with_element(element, |el| el.attrs.get(name).cloned())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.with_element(element, |el| el.value = value.to_string())?;
        self.log(format!("fill {} = {}", element.locator.css, value));
        Ok(())
    }

    async fn fill_rich_text(&self, element: &ElementHandle, html: &str) -> Result<()> {
        self.with_element(element, |el| {
            el.html = html.to_string();
            el.text = strip_tags(html);
        })?;
        self.log(format!("rich {}", element.locator.css));
        Ok(())
    }

    async fn select_value(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.with_element(element, |el| el.value = value.to_string())?;
        self.log(format!("select {} = {}", element.locator.css, value));
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.with_element(element, |_| ())?;
        self.log(format!("click {}", element.locator));
        Ok(())
    }

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool> {
        self.with_element(element, |el| !el.disabled)
    }

    async fn upload_files(&self, element: &ElementHandle, files: &[UploadFile]) -> Result<()> {
        self.with_element(element, |_| ())?;
        let mut state = self.state.lock();
        state.uploads.extend_from_slice(files);
        state.actions.push(format!("upload {}", files.len()));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.url, url.to_string());
        state.history.push(previous);
        state.actions.push(format!("navigate {}", url));
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        let mut state = self.state.lock();
        let previous = state
            .history
            .pop()
            .ok_or_else(|| ReposterError::Browser("no history".to_string()))?;
        state.url = previous;
        state.actions.push("back".to_string());
        Ok(())
    }
}

/// Records every navigation; the first `failures` calls fail.
#[derive(Default)]
pub struct FakeNavigator {
    calls: Mutex<Vec<String>>,
    failures: Mutex<usize>,
}

impl FakeNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        let nav = Self::default();
        *nav.failures.lock() = failures;
        Arc::new(nav)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().push(call);
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(ReposterError::Cdp("net::ERR_CONNECTION_RESET".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Navigator for FakeNavigator {
    async fn navigate(&self, _page: &PageId, url: &str) -> Result<()> {
        self.record(format!("navigate {}", url))
    }

    async fn reload(&self, _page: &PageId) -> Result<()> {
        self.record("reload".to_string())
    }
}

/// Serves a few bytes for every URL except those listed as failing.
#[derive(Default)]
pub struct FakeFetcher {
    failing: HashSet<String>,
}

impl FakeFetcher {
    pub fn failing(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        if self.failing.contains(url) {
            return Err(ReposterError::Image(format!("404 for {}", url)));
        }
        Ok(FetchedImage {
            bytes: url.as_bytes().to_vec(),
            mime_type: Some("image/png".to_string()),
        })
    }
}
