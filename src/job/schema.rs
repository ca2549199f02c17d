//! Job record and event data structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bumped whenever the persisted record layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

/// Workflow phase. IDLE is never persisted; it is the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "SCRAPING")]
    Scraping,
    #[serde(rename = "PENDING_DELETE")]
    PendingDelete,
    #[serde(rename = "POSTING_1_DETAILS")]
    Posting1Details,
    #[serde(rename = "POSTING_2_IMAGES")]
    Posting2Images,
    #[serde(rename = "POSTING_3_PRICE")]
    Posting3Price,
    #[serde(rename = "POSTING_4_LOCATION")]
    Posting4Location,
    #[serde(rename = "POSTING_5_ATTRIBUTES")]
    Posting5Attributes,
    #[serde(rename = "POSTING_6_FINAL")]
    Posting6Final,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "ERROR")]
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 11] = [
        JobStatus::Idle,
        JobStatus::Scraping,
        JobStatus::PendingDelete,
        JobStatus::Posting1Details,
        JobStatus::Posting2Images,
        JobStatus::Posting3Price,
        JobStatus::Posting4Location,
        JobStatus::Posting5Attributes,
        JobStatus::Posting6Final,
        JobStatus::Done,
        JobStatus::Error,
    ];

    /// Form-filling phases in execution order.
    pub const POSTING: [JobStatus; 6] = [
        JobStatus::Posting1Details,
        JobStatus::Posting2Images,
        JobStatus::Posting3Price,
        JobStatus::Posting4Location,
        JobStatus::Posting5Attributes,
        JobStatus::Posting6Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "IDLE",
            JobStatus::Scraping => "SCRAPING",
            JobStatus::PendingDelete => "PENDING_DELETE",
            JobStatus::Posting1Details => "POSTING_1_DETAILS",
            JobStatus::Posting2Images => "POSTING_2_IMAGES",
            JobStatus::Posting3Price => "POSTING_3_PRICE",
            JobStatus::Posting4Location => "POSTING_4_LOCATION",
            JobStatus::Posting5Attributes => "POSTING_5_ATTRIBUTES",
            JobStatus::Posting6Final => "POSTING_6_FINAL",
            JobStatus::Done => "DONE",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn is_posting(&self) -> bool {
        self.posting_index().is_some()
    }

    /// 1-based index into the posting phases.
    pub fn posting_index(&self) -> Option<usize> {
        Self::POSTING.iter().position(|s| s == self).map(|i| i + 1)
    }

    /// The only status a completed posting phase may hand over to.
    pub fn next_posting(&self) -> Option<JobStatus> {
        let idx = self.posting_index()?;
        Some(
            Self::POSTING
                .get(idx)
                .copied()
                .unwrap_or(JobStatus::Done),
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a browser page (the CDP target id of the tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    #[default]
    Fixed,
    Bidding,
    Free,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Description {
    /// Plain text as shown on the listing page
    #[serde(default)]
    pub text: String,
    /// Inner HTML of the listing page description block
    #[serde(default)]
    pub html: String,
    /// Editor markup copied from the edit form, preferred when posting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_html: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Price text as displayed, e.g. "€ 12,50"
    #[serde(default)]
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub kind: PriceKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(default)]
    pub category_path: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Image URLs in display order, de-duplicated
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Unix ms
    #[serde(default)]
    pub scraped_at: u64,
}

impl ListingData {
    /// Nothing usable was read from the page.
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.description.text.trim().is_empty()
    }
}

/// A fetched image, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlob {
    pub source_url: String,
    pub data: String,
    pub mime_type: String,
    /// Decoded byte length
    pub size: usize,
}

/// The single persisted aggregate describing the in-progress repost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub schema_version: u32,
    pub id: String,
    pub status: JobStatus,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ListingData>,
    #[serde(default)]
    pub images: Vec<ImageBlob>,
    pub bound_page: PageId,
    /// Unix ms
    pub started_at: u64,
    /// Rich text captured from the edit form before extraction finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_rich_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<u64>,
}

impl JobRecord {
    pub fn new(source_url: impl Into<String>, bound_page: PageId) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Scraping,
            source_url: source_url.into(),
            extracted: None,
            images: Vec::new(),
            bound_page,
            started_at: now_ms(),
            captured_rich_text: None,
            error_message: None,
            error_at: None,
        }
    }
}

/// Inputs to the transition function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JobEvent {
    Start { url: String, page: PageId },
    DataExtracted { page: PageId, listing: ListingData },
    RichTextCaptured { page: PageId, html: String },
    NavigationObserved { page: PageId, url: String },
    StepCompleted { page: PageId, next: JobStatus },
    /// `phase` is the status the failing work was started in
    PhaseFailed { page: PageId, phase: JobStatus, message: String },
    /// Operator reset from the HTTP API or MCP; accepted in any live state
    /// and the only way out of ERROR
    Cleanup,
}

/// Event kind without payload; the key of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    DataExtracted,
    RichTextCaptured,
    NavigationObserved,
    StepCompleted,
    PhaseFailed,
    Cleanup,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Start => "start",
            Trigger::DataExtracted => "data_extracted",
            Trigger::RichTextCaptured => "rich_text_captured",
            Trigger::NavigationObserved => "navigation_observed",
            Trigger::StepCompleted => "step_completed",
            Trigger::PhaseFailed => "phase_failed",
            Trigger::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

impl JobEvent {
    pub fn trigger(&self) -> Trigger {
        match self {
            JobEvent::Start { .. } => Trigger::Start,
            JobEvent::DataExtracted { .. } => Trigger::DataExtracted,
            JobEvent::RichTextCaptured { .. } => Trigger::RichTextCaptured,
            JobEvent::NavigationObserved { .. } => Trigger::NavigationObserved,
            JobEvent::StepCompleted { .. } => Trigger::StepCompleted,
            JobEvent::PhaseFailed { .. } => Trigger::PhaseFailed,
            JobEvent::Cleanup => Trigger::Cleanup,
        }
    }

    /// The page that produced this event, if any.
    pub fn page(&self) -> Option<&PageId> {
        match self {
            JobEvent::Start { page, .. }
            | JobEvent::DataExtracted { page, .. }
            | JobEvent::RichTextCaptured { page, .. }
            | JobEvent::NavigationObserved { page, .. }
            | JobEvent::StepCompleted { page, .. }
            | JobEvent::PhaseFailed { page, .. } => Some(page),
            JobEvent::Cleanup => None,
        }
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
