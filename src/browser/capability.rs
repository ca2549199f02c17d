use crate::error::Result;
use crate::job::PageId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One element-location strategy. A fallback chain is a `&[Locator]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// CSS selector
    pub css: String,
    /// Case-insensitive substring the element's text must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Only match rendered elements
    #[serde(default)]
    pub visible: bool,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            css: selector.into(),
            text: None,
            visible: false,
        }
    }

    pub fn text(selector: impl Into<String>, contains: impl Into<String>) -> Self {
        Self {
            css: selector.into(),
            text: Some(contains.into()),
            visible: false,
        }
    }

    pub fn visible(mut self) -> Self {
        self.visible = true;
        self
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.css)?;
        if let Some(text) = &self.text {
            write!(f, " ~ {:?}", text)?;
        }
        if self.visible {
            write!(f, " :visible")?;
        }
        Ok(())
    }
}

/// The `index`-th element matched by `locator`. Handles are re-resolved on
/// every call, so they stay valid only as long as the DOM does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub locator: Locator,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(locator: Locator, index: usize) -> Self {
        Self { locator, index }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Per-page primitives the page agents are written against.
#[async_trait]
pub trait PageCapabilities: Send + Sync {
    fn id(&self) -> &PageId;

    async fn current_url(&self) -> Result<String>;

    /// First element of the first locator in `chain` that matches anything.
    async fn locate(&self, chain: &[Locator]) -> Result<Option<ElementHandle>>;

    /// All elements of the first locator in `chain` that matches anything.
    async fn locate_all(&self, chain: &[Locator]) -> Result<Vec<ElementHandle>>;

    async fn read_text(&self, element: &ElementHandle) -> Result<String>;

    async fn read_html(&self, element: &ElementHandle) -> Result<String>;

    async fn read_attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()>;

    /// Replace the content of a contenteditable editor.
    async fn fill_rich_text(&self, element: &ElementHandle, html: &str) -> Result<()>;

    async fn select_value(&self, element: &ElementHandle, value: &str) -> Result<()>;

    async fn click(&self, element: &ElementHandle) -> Result<()>;

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool>;

    async fn upload_files(&self, element: &ElementHandle, files: &[UploadFile]) -> Result<()>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn go_back(&self) -> Result<()>;
}
