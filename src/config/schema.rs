use crate::browser::Locator;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Master switch; when off, page agents stay idle and new jobs are refused
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Browser launch / attach settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Local HTTP API
    #[serde(default)]
    pub api: ApiConfig,

    /// Durable job store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Target site URLs, markers and locator fallback chains
    #[serde(default)]
    pub site: SiteConfig,

    /// Waits, polls and timeouts
    #[serde(default)]
    pub timing: TimingConfig,

    /// Image fetch and upload recompression
    #[serde(default)]
    pub images: ImageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            browser: BrowserConfig::default(),
            api: ApiConfig::default(),
            store: StoreConfig::default(),
            site: SiteConfig::default(),
            timing: TimingConfig::default(),
            images: ImageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chrome executable path
    #[serde(default = "default_chrome_path")]
    pub chrome_path: PathBuf,

    /// Dedicated user data directory (one browser profile, one job)
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: PathBuf,

    /// Remote debugging port
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,

    #[serde(default)]
    pub headless: bool,

    /// Attach to an already running Chrome instead of launching one
    #[serde(default)]
    pub attach_only: bool,

    /// Custom launch arguments
    #[serde(default)]
    pub custom_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: default_chrome_path(),
            user_data_dir: default_user_data_dir(),
            cdp_port: default_cdp_port(),
            headless: false,
            attach_only: false,
            custom_args: Vec::new(),
        }
    }
}

/// Get default Chrome path based on platform
fn default_chrome_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        PathBuf::from("C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe")
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        PathBuf::from("/usr/bin/google-chrome")
    }
}

fn default_user_data_dir() -> PathBuf {
    reposter_home().join("chrome-profile")
}

fn default_cdp_port() -> u16 {
    9222
}

/// `~/.reposter`, or `./.reposter` when no home directory is known.
pub fn reposter_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reposter")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// When set, every route except /api/health requires `X-API-Key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            api_key: None,
        }
    }
}

fn default_api_port() -> u16 {
    38480
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    reposter_home().join("job_store.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Origin of the marketplace, no trailing slash
    pub base_url: String,

    /// Path of the listing creation form
    pub create_form_path: String,

    /// Edit form path; `{id}` is replaced by the listing id
    pub edit_path_template: String,

    /// Path segments that precede the listing id in a source URL
    pub listing_id_markers: Vec<String>,

    /// Every marker must appear in the URL the site redirects to after a delete
    pub delete_success_markers: Vec<String>,

    /// Lower-cased page text keywords used to infer the price kind
    pub free_keyword: String,
    pub bidding_keyword: String,

    /// Values of the price kind dropdown on the creation form
    pub price_kind_values: PriceKindValues,

    /// Attribute input locator; `{key}` is replaced by the attribute name
    pub attribute_field_template: String,

    pub locators: SiteLocators,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.marktplaats.nl".to_string(),
            create_form_path: "/plaats".to_string(),
            edit_path_template: "/plaats/{id}/edit".to_string(),
            listing_id_markers: vec!["/seller/view/".to_string()],
            delete_success_markers: vec![
                "my-account/sell".to_string(),
                "previousAction=deleteAdSuccess".to_string(),
            ],
            free_keyword: "gratis".to_string(),
            bidding_keyword: "bieden".to_string(),
            price_kind_values: PriceKindValues::default(),
            attribute_field_template: "[name=\"{key}\"]".to_string(),
            locators: SiteLocators::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriceKindValues {
    pub fixed: String,
    pub bidding: String,
    pub free: String,
}

impl Default for PriceKindValues {
    fn default() -> Self {
        Self {
            fixed: "FIXED".to_string(),
            bidding: "FAST_BID".to_string(),
            free: "FREE".to_string(),
        }
    }
}

/// Ordered fallback chains. The first locator that resolves wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteLocators {
    // Listing page (extraction)
    pub title: Vec<Locator>,
    pub description: Vec<Locator>,
    pub price: Vec<Locator>,
    pub category_items: Vec<Locator>,
    pub location: Vec<Locator>,
    pub attribute_rows: Vec<Locator>,
    pub images: Vec<Locator>,
    pub page_body: Vec<Locator>,

    // Edit form (rich text capture)
    pub edit_rich_text: Vec<Locator>,

    // Listing page (deletion)
    pub delete_button: Vec<Locator>,
    pub delete_confirm: Vec<Locator>,

    // Creation form (posting)
    pub form_title: Vec<Locator>,
    pub form_description: Vec<Locator>,
    pub file_input: Vec<Locator>,
    pub upload_previews: Vec<Locator>,
    pub price_kind: Vec<Locator>,
    pub price_input: Vec<Locator>,
    pub postcode_input: Vec<Locator>,
    pub delivery_pickup: Vec<Locator>,
    pub free_bundle: Vec<Locator>,
    pub submit: Vec<Locator>,
}

impl Default for SiteLocators {
    fn default() -> Self {
        Self {
            title: vec![Locator::css("h1.Listing-title"), Locator::css("h1")],
            description: vec![
                Locator::css(".Description-description"),
                Locator::css("[class*=\"Description\"]"),
            ],
            price: vec![
                Locator::css(".Listing-price"),
                Locator::css("span[class*=\"price\"]"),
            ],
            category_items: vec![Locator::css(".CategoryInformation-categoryInformation p")],
            location: vec![
                Locator::css(".SellerLocationSection-locationName"),
                Locator::css("[class*=\"location\"]"),
            ],
            attribute_rows: vec![Locator::css(".Attributes-item")],
            images: vec![
                Locator::css(".HeroImage-image"),
                Locator::css(".Gallery-root img"),
                Locator::css("img[src*=\"marktplaats\"]"),
            ],
            page_body: vec![Locator::css("body")],
            edit_rich_text: vec![
                Locator::css(".RichTextEditor-module-editorInput[data-testid=\"text-editor-input_nl-NL\"]"),
                Locator::css("[contenteditable=\"true\"]"),
            ],
            delete_button: vec![
                Locator::css("button.deleteButton"),
                Locator::css("button.hz-Button--destructive"),
                Locator::css("button[class*=\"delete\"]"),
                Locator::css("button[class*=\"Delete\"]"),
                Locator::text("button", "verwijder"),
            ],
            delete_confirm: vec![
                Locator::text("button.hz-Button--secondary", "niet verkocht").visible(),
                Locator::css("button[data-testid=\"confirm-delete\"]").visible(),
            ],
            form_title: vec![
                Locator::css("input[name=\"title\"]"),
                Locator::css("#TextField-vulEenTitelIn"),
                Locator::css("input[id*=\"title\"]"),
            ],
            form_description: vec![
                Locator::css(".RichTextEditor-module-editorInput[data-testid=\"text-editor-input_nl-NL\"]"),
                Locator::css("[contenteditable=\"true\"]"),
            ],
            file_input: vec![
                Locator::css("input[type=\"file\"][accept*=\".jpg\"]"),
                Locator::css("input[type=\"file\"]"),
            ],
            upload_previews: vec![Locator::css("[class*=\"ImageUpload\"] img")],
            price_kind: vec![Locator::css("#Dropdown-prijstype")],
            price_input: vec![
                Locator::css("input[type=\"text\"][name*=\"price\"]"),
                Locator::css("input[id*=\"price\"]"),
            ],
            postcode_input: vec![
                Locator::css("input[name*=\"postcode\"]"),
                Locator::css("input[id*=\"postcode\"]"),
            ],
            delivery_pickup: vec![Locator::css("#Ophalen")],
            free_bundle: vec![Locator::css("button[data-testid=\"bundle-option-FREE\"]")],
            submit: vec![
                Locator::css("#syi-place-ad-button"),
                Locator::text("button", "plaats je advertentie"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Grace period after a page load before a phase starts
    #[serde(default = "default_page_settle_ms")]
    pub page_settle_ms: u64,

    /// Upper bound when waiting for an element to appear
    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Visual settle after a click or fill
    #[serde(default = "default_action_settle_ms")]
    pub action_settle_ms: u64,

    /// Settle after an upload before the phase reports completion
    #[serde(default = "default_upload_settle_ms")]
    pub upload_settle_ms: u64,

    /// Upper bound for a controller reply to an agent request
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Delay before the single navigation retry
    #[serde(default = "default_navigation_retry_ms")]
    pub navigation_retry_ms: u64,

    /// Rich text is considered loaded once it reaches this many characters
    #[serde(default = "default_rich_text_min_len")]
    pub rich_text_min_len: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            page_settle_ms: default_page_settle_ms(),
            element_timeout_ms: default_element_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            action_settle_ms: default_action_settle_ms(),
            upload_settle_ms: default_upload_settle_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            navigation_retry_ms: default_navigation_retry_ms(),
            rich_text_min_len: default_rich_text_min_len(),
        }
    }
}

fn default_page_settle_ms() -> u64 {
    1500
}

fn default_element_timeout_ms() -> u64 {
    10000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_action_settle_ms() -> u64 {
    500
}

fn default_upload_settle_ms() -> u64 {
    3000
}

fn default_reply_timeout_ms() -> u64 {
    60000
}

fn default_navigation_retry_ms() -> u64 {
    1000
}

fn default_rich_text_min_len() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    /// Uploads above this size get recompressed
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Longest side after downscaling
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_initial_quality")]
    pub initial_quality: u8,

    #[serde(default = "default_quality_step")]
    pub quality_step: u8,

    /// Below this quality the best effort result is accepted regardless of size
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            max_dimension: default_max_dimension(),
            initial_quality: default_initial_quality(),
            quality_step: default_quality_step(),
            min_quality: default_min_quality(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_max_upload_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_dimension() -> u32 {
    2048
}

fn default_initial_quality() -> u8 {
    90
}

fn default_quality_step() -> u8 {
    10
}

fn default_min_quality() -> u8 {
    40
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_true() -> bool {
    true
}
