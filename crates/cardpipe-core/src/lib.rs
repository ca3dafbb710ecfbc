use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix marking a keyword card's `source`.
pub const KEYWORD_SOURCE_PREFIX: &str = "keyword:";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("browser endpoint unreachable: {0}")]
    Connection(String),
    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("required page element missing: {0}")]
    ExtractionEmpty(String),
    #[error("browser automation failed: {0}")]
    Automation(String),
    #[error("credential missing: {0}")]
    CredentialMissing(String),
    #[error("completion call failed: {0}")]
    Completion(String),
    #[error("malformed completion: {0}")]
    MalformedCompletion(String),
    #[error("card store error: {0}")]
    Store(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl Error {
    /// Browser-layer faults. These count against the attempt budget; everything else
    /// surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::NavigationTimeout(_)
                | Error::Navigation(_)
                | Error::ExtractionEmpty(_)
                | Error::Automation(_)
        )
    }

    /// Whether the failure is generic enough that the caller should see remediation hints.
    pub fn wants_automation_hints(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::NavigationTimeout(_)
                | Error::Navigation(_)
                | Error::Automation(_)
        )
    }

    /// Stable machine-readable code (used in CLI error envelopes).
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidUrl(_) => "invalid_url",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Connection(_) => "connection_fault",
            Error::NavigationTimeout(_) => "navigation_timeout",
            Error::Navigation(_) => "navigation_failed",
            Error::ExtractionEmpty(_) => "extraction_empty",
            Error::Automation(_) => "automation_failed",
            Error::CredentialMissing(_) => "credential_missing",
            Error::Completion(_) => "completion_call_error",
            Error::MalformedCompletion(_) => "malformed_completion",
            Error::Store(_) => "store_error",
            Error::NotFound(_) => "not_found",
            Error::NotConfigured(_) => "not_configured",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Likely causes shown to the user when a browser-layer failure carries no better detail.
pub const AUTOMATION_HINTS: [&str; 3] = [
    "the browser automation endpoint is not running (start Chrome with --remote-debugging-port=9222)",
    "the network is unreachable",
    "the target site cannot be reached",
];

/// `message` plus numbered remediation hints, when the error class warrants them.
pub fn user_facing_message(err: &Error) -> String {
    let msg = err.to_string();
    if !err.wants_automation_hints() {
        return msg;
    }
    let mut out = msg;
    out.push_str("\nPlease check that:");
    for (i, h) in AUTOMATION_HINTS.iter().enumerate() {
        out.push_str(&format!("\n{}. {h}", i + 1));
    }
    out
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Website,
    #[default]
    Keyword,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFrequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl std::str::FromStr for UpdateFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(UpdateFrequency::Daily),
            "weekly" => Ok(UpdateFrequency::Weekly),
            "monthly" => Ok(UpdateFrequency::Monthly),
            other => Err(Error::InvalidRequest(format!(
                "unknown update frequency {other:?} (allowed: daily, weekly, monthly)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KnowledgeItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// A persisted knowledge card.
///
/// Every field is defaulted on read: stored documents carry no schema version, so older
/// or hand-edited shapes must still load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeCard {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub items: Vec<KnowledgeItem>,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "type", default)]
    pub card_type: CardType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub update_frequency: UpdateFrequency,
    /// Epoch milliseconds.
    #[serde(default)]
    pub last_updated: u64,
}

impl KnowledgeCard {
    /// The search keyword behind a keyword card (`source` minus its marker).
    pub fn keyword(&self) -> &str {
        self.source
            .strip_prefix(KEYWORD_SOURCE_PREFIX)
            .unwrap_or(&self.source)
    }
}

/// One search-engine hit. All fields are non-empty when produced by extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub content: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArticleLink {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// What the content extractor harvests from one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteBundle {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub navigation: String,
    #[serde(default)]
    pub main_text: String,
    #[serde(default)]
    pub articles: Vec<ArticleLink>,
}

/// Website-mode acquisition output. `content` is a JSON-encoded [`WebsiteBundle`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebsiteContent {
    pub title: String,
    pub content: String,
    pub url: String,
}

impl WebsiteContent {
    pub fn from_bundle(title: String, bundle: &WebsiteBundle, url: String) -> Result<Self> {
        let content = serde_json::to_string(bundle)
            .map_err(|e| Error::Automation(format!("serialize website bundle: {e}")))?;
        Ok(Self {
            title,
            content,
            url,
        })
    }

    /// Parse `content` back into a bundle.
    ///
    /// A content string that is not a JSON object yields an empty bundle: the payload came
    /// from a browser process and is treated as untrusted.
    pub fn bundle(&self) -> WebsiteBundle {
        serde_json::from_str::<WebsiteBundle>(&self.content).unwrap_or_default()
    }
}

/// Acquisition request, wire shape `{"keyword": ..., "type": "search" | "website"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AcquireRequest {
    Search(AcquireSearch),
    Website(AcquireWebsite),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireSearch {
    pub keyword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireWebsite {
    /// The page url (named `keyword` on the wire).
    #[serde(rename = "keyword")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AcquireResponse {
    Search(Vec<SearchResult>),
    Website(WebsiteContent),
}

/// Acquired material handed to synthesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SourceMaterial {
    Search(Vec<SearchResult>),
    Website(WebsiteContent),
}

impl SourceMaterial {
    pub fn card_type(&self) -> CardType {
        match self {
            SourceMaterial::Search(_) => CardType::Keyword,
            SourceMaterial::Website(_) => CardType::Website,
        }
    }

    /// Page title, when the material came from a single page.
    pub fn page_title(&self) -> Option<&str> {
        match self {
            SourceMaterial::Website(w) => Some(w.title.as_str()),
            SourceMaterial::Search(_) => None,
        }
    }
}

impl From<AcquireResponse> for SourceMaterial {
    fn from(r: AcquireResponse) -> Self {
        match r {
            AcquireResponse::Search(rs) => SourceMaterial::Search(rs),
            AcquireResponse::Website(w) => SourceMaterial::Website(w),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesizeGenerate {
    pub keyword: String,
    #[serde(rename = "searchResults")]
    pub material: SourceMaterial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesizeUpdate {
    pub card: KnowledgeCard,
    #[serde(rename = "searchResults")]
    pub material: SourceMaterial,
}

/// Synthesis request, wire shape `{"action": "generate" | "update", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SynthesisRequest {
    Generate(SynthesizeGenerate),
    Update(SynthesizeUpdate),
}

/// Normalized completion output. `summary`, `items` and `tags` are always populated
/// (see the normalization policy in `cardpipe-local::synthesis`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SynthesisResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub summary: String,
    pub items: Vec<KnowledgeItem>,
    pub tags: Vec<String>,
}

/// Default timeouts for one browser attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageTimeouts {
    pub navigation_ms: u64,
    pub selector_ms: u64,
    pub settle_ms: u64,
}

impl Default for PageTimeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            selector_ms: 10_000,
            settle_ms: 2_000,
        }
    }
}

impl PageTimeouts {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }
}

/// What one attempt asks the browser to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTask {
    /// Navigate, wait for load, then settle.
    Website { url: String },
    /// Navigate, then wait (bounded) for `wait_selector`.
    Search { url: String, wait_selector: String },
}

impl PageTask {
    pub fn url(&self) -> &str {
        match self {
            PageTask::Website { url } | PageTask::Search { url, .. } => url,
        }
    }
}

/// The settled DOM of one page, as returned by the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PageSnapshot {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub final_url: String,
}

/// One browsing context + page, owned by a single attempt.
#[async_trait::async_trait]
pub trait AutomationSession: Send {
    async fn load(&mut self, task: &PageTask, timeouts: &PageTimeouts) -> Result<PageSnapshot>;
    /// Release the context and the browser connection. Called on every exit path.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BrowserEndpoint: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn AutomationSession>>;
}

/// Website/search acquisition, as seen by the orchestrator.
#[async_trait::async_trait]
pub trait Acquirer: Send + Sync {
    async fn search(&self, keyword: &str) -> Result<Vec<SearchResult>>;
    async fn scrape_website(&self, url: &str) -> Result<WebsiteContent>;

    async fn acquire(&self, req: &AcquireRequest) -> Result<AcquireResponse> {
        match req {
            AcquireRequest::Search(s) => Ok(AcquireResponse::Search(self.search(&s.keyword).await?)),
            AcquireRequest::Website(w) => {
                Ok(AcquireResponse::Website(self.scrape_website(&w.url).await?))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u64,
    pub json_mode: bool,
}

/// A chat-completions endpoint returning the first choice's message content.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<String>;
}

/// Keyed card persistence (the core only needs these three).
#[async_trait::async_trait]
pub trait CardStore: Send + Sync {
    async fn save(&self, card: &KnowledgeCard) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<KnowledgeCard>>;
    async fn update(&self, card: &KnowledgeCard) -> Result<()>;
    /// Remove a card. Unknown ids are `NotFound`.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Require an absolute http(s) url.
pub fn parse_http_url(s: &str) -> Result<url::Url> {
    let u = url::Url::parse(s.trim()).map_err(|e| Error::InvalidUrl(format!("{s}: {e}")))?;
    match u.scheme() {
        "http" | "https" => Ok(u),
        other => Err(Error::InvalidUrl(format!(
            "{s}: unsupported scheme {other:?}"
        ))),
    }
}
