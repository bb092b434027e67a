//! Source connector contract, the source registry and the connectors themselves.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobdigest_core::{normalize_text, truncate_chars, RawPosting, SUMMARY_MAX_CHARS};
use jobdigest_storage::{FetchError, HttpFetcher};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub mod ats;
pub mod boards;
pub mod feeds;
pub mod html_board;
pub mod linkedin;

pub use ats::{AshbyConnector, GreenhouseConnector, LeverConnector, SmartRecruitersConnector};
pub use boards::JsonBoardConnector;
pub use feeds::RssConnector;
pub use html_board::HtmlBoardConnector;
pub use linkedin::LinkedInConnector;

pub const CRATE_NAME: &str = "jobdigest-adapters";

/// Registry shipped with the binary, used when the workspace has no `sources.yaml`.
pub const BUNDLED_SOURCES_YAML: &str = include_str!("../../../sources.yaml");

/// API boards only search the first few board keywords.
pub const API_BOARD_KEYWORD_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Linkedin,
    Greenhouse,
    Lever,
    Ashby,
    Smartrecruiters,
    Remotive,
    Remoteok,
    Jobicy,
    Meetfrank,
    Adzuna,
    Jooble,
    Reed,
    Cvlibrary,
    Rss,
    HtmlBoard,
}

impl SourceKind {
    pub fn is_ats(self) -> bool {
        matches!(
            self,
            Self::Greenhouse | Self::Lever | Self::Ashby | Self::Smartrecruiters
        )
    }

    pub fn is_job_board(self) -> bool {
        !self.is_ats() && self != Self::Linkedin
    }
}

/// API keys a credentialed source needs before it can be polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Adzuna,
    Jooble,
    Reed,
    Cvlibrary,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub adzuna_app_id: Option<String>,
    pub adzuna_app_key: Option<String>,
    pub jooble_api_key: Option<String>,
    pub reed_api_key: Option<String>,
    pub cvlibrary_api_key: Option<String>,
}

impl Credentials {
    pub fn has(&self, credential: Credential) -> bool {
        match credential {
            Credential::Adzuna => self.adzuna_app_id.is_some() && self.adzuna_app_key.is_some(),
            Credential::Jooble => self.jooble_api_key.is_some(),
            Credential::Reed => self.reed_api_key.is_some(),
            Credential::Cvlibrary => self.cvlibrary_api_key.is_some(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("adzuna_app_id", &mask(&self.adzuna_app_id))
            .field("adzuna_app_key", &mask(&self.adzuna_app_key))
            .field("jooble_api_key", &mask(&self.jooble_api_key))
            .field("reed_api_key", &mask(&self.reed_api_key))
            .field("cvlibrary_api_key", &mask(&self.cvlibrary_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// ATS board slugs or SmartRecruiters company identifiers.
    #[serde(default)]
    pub boards: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    /// LinkedIn company-focused searches: every company is combined with every term.
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub company_terms: Vec<String>,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_excluded_companies() -> Vec<String> {
    vec!["ebury".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default = "default_excluded_companies")]
    pub exclude_companies: Vec<String>,
    /// Fallback keywords for board sources that declare none of their own.
    #[serde(default)]
    pub board_keywords: Vec<String>,
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut registry: Self = serde_yaml::from_str(text).context("parsing source registry")?;
        for source in &mut registry.sources {
            source.boards = dedupe_keep_order(std::mem::take(&mut source.boards));
        }
        Ok(registry)
    }

    pub fn bundled() -> Result<Self> {
        Self::from_yaml(BUNDLED_SOURCES_YAML)
    }

    /// Loads `<workspace_root>/sources.yaml`, falling back to the bundled registry when the
    /// file does not exist. A file that exists but does not parse is an error.
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let path = workspace_root.as_ref().join("sources.yaml");
        if !path.exists() {
            info!(path = %path.display(), "no sources.yaml in workspace; using bundled registry");
            return Self::bundled();
        }
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Appends extra boards to every source of `kind`, keeping first-seen order.
    pub fn append_boards(&mut self, kind: SourceKind, extra: &[String]) {
        if extra.is_empty() {
            return;
        }
        for source in self.sources.iter_mut().filter(|s| s.kind == kind) {
            let mut boards = std::mem::take(&mut source.boards);
            boards.extend(extra.iter().cloned());
            source.boards = dedupe_keep_order(boards);
        }
    }

    /// Keywords a board source searches: its own list, else the shared list capped for APIs.
    pub fn keywords_for(&self, source: &SourceConfig) -> Vec<String> {
        if !source.keywords.is_empty() {
            return source.keywords.clone();
        }
        self.board_keywords
            .iter()
            .take(API_BOARD_KEYWORD_LIMIT)
            .cloned()
            .collect()
    }

    /// Number of boards (or companies) polled for one ATS kind across enabled sources.
    pub fn board_count(&self, kind: SourceKind) -> usize {
        self.enabled_sources()
            .filter(|s| s.kind == kind)
            .map(|s| s.boards.len())
            .sum()
    }
}

pub fn dedupe_keep_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Splits a comma-separated board list, dropping blanks.
pub fn parse_board_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Predicate deciding whether a listing is worth a follow-up detail request.
pub type DetailFilter = Arc<dyn Fn(&RawPosting) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    /// Lower-cased company names whose postings are dropped.
    pub exclude_companies: Vec<String>,
    pub credentials: Credentials,
    detail_filter: DetailFilter,
}

impl AdapterContext {
    pub fn new(run_id: Uuid, fetched_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            fetched_at,
            exclude_companies: default_excluded_companies(),
            credentials: Credentials::default(),
            detail_filter: Arc::new(|_| true),
        }
    }

    pub fn with_exclude_companies(mut self, companies: &[String]) -> Self {
        self.exclude_companies = companies.iter().map(|c| c.trim().to_lowercase()).collect();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_detail_filter(mut self, filter: DetailFilter) -> Self {
        self.detail_filter = filter;
        self
    }

    pub fn wants_detail(&self, posting: &RawPosting) -> bool {
        (self.detail_filter)(posting)
    }

    pub fn is_excluded_company(&self, company: &str) -> bool {
        let company = company.trim().to_lowercase();
        self.exclude_companies.iter().any(|c| *c == company)
    }

    /// Connector boundary: validates every posting and drops excluded companies.
    pub fn finalize(&self, postings: Vec<RawPosting>) -> Vec<RawPosting> {
        postings
            .into_iter()
            .filter_map(RawPosting::validated)
            .filter(|p| !self.is_excluded_company(&p.company))
            .collect()
    }
}

impl fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterContext")
            .field("run_id", &self.run_id)
            .field("fetched_at", &self.fetched_at)
            .field("exclude_companies", &self.exclude_companies)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("source {source_id}: all {attempted} requests failed (last error: {last_error})")]
    AllRequestsFailed {
        source_id: String,
        attempted: usize,
        last_error: String,
    },
    #[error("source {source_id} has no url configured")]
    MissingUrl { source_id: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source_id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn kind(&self) -> SourceKind;

    /// Polls the upstream once. Individual request failures shrink the result; an `Err` means
    /// nothing at all could be fetched.
    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError>;
}

pub fn connector_for_source(
    source: &SourceConfig,
    registry: &SourceRegistry,
) -> Option<Box<dyn SourceConnector>> {
    if !source.enabled {
        return None;
    }
    let source = source.clone();
    Some(match source.kind {
        SourceKind::Linkedin => Box::new(LinkedInConnector::new(source)),
        SourceKind::Greenhouse => Box::new(GreenhouseConnector::new(source)),
        SourceKind::Lever => Box::new(LeverConnector::new(source)),
        SourceKind::Ashby => Box::new(AshbyConnector::new(source)),
        SourceKind::Smartrecruiters => Box::new(SmartRecruitersConnector::new(source)),
        SourceKind::Rss => Box::new(RssConnector::new(source)),
        SourceKind::HtmlBoard => {
            let keywords = registry.keywords_for(&source);
            Box::new(HtmlBoardConnector::new(source, keywords))
        }
        SourceKind::Remotive
        | SourceKind::Remoteok
        | SourceKind::Jobicy
        | SourceKind::Meetfrank
        | SourceKind::Adzuna
        | SourceKind::Jooble
        | SourceKind::Reed
        | SourceKind::Cvlibrary => {
            let keywords = registry.keywords_for(&source);
            Box::new(JsonBoardConnector::new(source, keywords))
        }
    })
}

/// Counts fanned-out requests so a connector can tell "some pages failed" from "nothing worked".
#[derive(Debug, Default)]
pub(crate) struct RequestTally {
    attempted: usize,
    failed: usize,
    last_error: Option<String>,
}

impl RequestTally {
    pub(crate) fn record<T>(
        &mut self,
        source_id: &str,
        url: &str,
        result: Result<T, FetchError>,
    ) -> Option<T> {
        self.attempted += 1;
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.failed += 1;
                debug!(source_id, url, error = %err, "request failed; continuing");
                self.last_error = Some(err.to_string());
                None
            }
        }
    }

    pub(crate) fn finish(
        self,
        source_id: &str,
        postings: Vec<RawPosting>,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        if self.attempted > 0 && self.failed == self.attempted {
            return Err(AdapterError::AllRequestsFailed {
                source_id: source_id.to_string(),
                attempted: self.attempted,
                last_error: self.last_error.unwrap_or_default(),
            });
        }
        Ok(postings)
    }
}

static RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(reposted\s+\d+\s+days?\s+ago|\d+\s+days?\s+ago|\d+\s+hours?\s+ago|\d+\s+minutes?\s+ago|yesterday|today|new)",
    )
    .expect("relative date pattern")
});

/// Finds a relative posting age ("3 days ago", "yesterday", ...) inside arbitrary card text.
/// A bare "new" badge reads as "today".
pub fn extract_relative_posted_text(text: &str) -> String {
    let Some(found) = RELATIVE_DATE.find(text) else {
        return String::new();
    };
    let value = found.as_str().trim();
    if value.eq_ignore_ascii_case("new") {
        "today".to_string()
    } else {
        value.to_string()
    }
}

/// Title-cases a board slug the way company names are displayed: "thought-machine" becomes
/// "Thought Machine".
pub fn company_from_slug(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    let mut boundary = true;
    for ch in slug.replace('-', " ").chars() {
        if ch.is_alphabetic() {
            if boundary {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(ch);
            boundary = true;
        }
    }
    out
}

pub const REMOTE_LOCATION: &str = "Remote";

/// Location fallback for API boards and Ashby, whose listings omit it for remote roles.
pub(crate) fn or_remote(mut posting: RawPosting) -> RawPosting {
    if posting.location.trim().is_empty() {
        posting.location = REMOTE_LOCATION.to_string();
    }
    posting
}

/// Plain text of an HTML description, truncated to the summary limit.
pub(crate) fn summary_from_html(raw: &str) -> String {
    let text = if raw.contains('<') {
        let fragment = Html::parse_fragment(raw);
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        raw.to_string()
    };
    truncate_chars(&normalize_text(&text), SUMMARY_MAX_CHARS)
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = normalize_text(&value);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(format!("selector {selector}: {e}")))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    normalize_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn select_first_text(root: ElementRef<'_>, selector: &Selector) -> Option<String> {
    root.select(selector)
        .next()
        .and_then(|n| text_or_none(element_text(n)))
}

pub(crate) fn select_first_attr(
    root: ElementRef<'_>,
    selector: &Selector,
    attr: &str,
) -> Option<String> {
    root.select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

pub(crate) fn json_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_path(value, path)?.as_str()
}

/// First non-empty string among several candidate fields.
pub(crate) fn json_first_str(value: &JsonValue, paths: &[&[&str]]) -> String {
    paths
        .iter()
        .filter_map(|path| json_str(value, path))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// The first of `keys` holding an array, else an empty slice.
pub(crate) fn json_array<'a>(value: &'a JsonValue, keys: &[&str]) -> &'a [JsonValue] {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(JsonValue::as_array))
        .find(|arr| !arr.is_empty())
        .map(Vec::as_slice)
        .unwrap_or_default()
}
