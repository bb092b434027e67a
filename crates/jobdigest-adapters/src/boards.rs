//! JSON job-board APIs. Remotive, RemoteOK and Jobicy are open; Adzuna, Jooble, Reed and
//! CV-Library need keys and are skipped without them.

use async_trait::async_trait;
use chrono::NaiveDate;
use jobdigest_core::RawPosting;
use jobdigest_storage::{FetchError, HttpFetcher};
use serde_json::{json, Value as JsonValue};
use tracing::{info, info_span, Instrument};

use crate::{
    json_array, json_first_str, or_remote, summary_from_html, AdapterContext, AdapterError,
    Credentials, RequestTally, SourceConfig, SourceConnector, SourceKind,
};

const SEARCH_LOCATION: &str = "London";

fn default_url(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Remotive => "https://remotive.com/api/remote-jobs",
        SourceKind::Remoteok => "https://remoteok.com/api",
        SourceKind::Jobicy => "https://jobicy.com/api/v2/remote-jobs",
        SourceKind::Meetfrank => "https://api.meetfrank.com/ai/jobs",
        SourceKind::Adzuna => "https://api.adzuna.com/v1/api/jobs/gb/search/1",
        SourceKind::Jooble => "https://jooble.org/api",
        SourceKind::Reed => "https://www.reed.co.uk/api/1.0/search",
        SourceKind::Cvlibrary => "https://www.cv-library.co.uk/search-jobs-json",
        _ => "",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BoardRequest {
    Get {
        url: String,
        query: Vec<(&'static str, String)>,
    },
    GetBasicAuth {
        url: String,
        query: Vec<(&'static str, String)>,
        username: String,
    },
    Post {
        url: String,
        body: JsonValue,
    },
}

impl BoardRequest {
    fn url(&self) -> &str {
        match self {
            Self::Get { url, .. } | Self::GetBasicAuth { url, .. } | Self::Post { url, .. } => url,
        }
    }

    async fn send(&self, http: &HttpFetcher, source_id: &str) -> Result<JsonValue, FetchError> {
        match self {
            Self::Get { url, query } => http.get_json(source_id, url, query).await,
            Self::GetBasicAuth {
                url,
                query,
                username,
            } => http.get_json_basic_auth(source_id, url, query, username).await,
            Self::Post { url, body } => http.post_json(source_id, url, body).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonBoardConnector {
    source: SourceConfig,
    keywords: Vec<String>,
}

impl JsonBoardConnector {
    pub fn new(source: SourceConfig, keywords: Vec<String>) -> Self {
        Self { source, keywords }
    }

    fn url(&self) -> String {
        self.source
            .url
            .clone()
            .unwrap_or_else(|| default_url(self.source.kind).to_string())
    }

    /// Requests for one run. `None` means the source cannot run (missing keys).
    fn requests(&self, credentials: &Credentials) -> Option<Vec<BoardRequest>> {
        let url = self.url();
        let per_keyword = |build: &dyn Fn(&str) -> BoardRequest| {
            self.keywords.iter().map(|k| build(k.as_str())).collect::<Vec<_>>()
        };
        let requests = match self.source.kind {
            SourceKind::Remotive | SourceKind::Remoteok => vec![BoardRequest::Get {
                url,
                query: Vec::new(),
            }],
            SourceKind::Jobicy => vec![BoardRequest::Get {
                url,
                query: vec![("tag", "product".into()), ("geo", "uk".into())],
            }],
            SourceKind::Meetfrank => per_keyword(&|keyword| BoardRequest::Get {
                url: url.clone(),
                query: vec![
                    ("q", keyword.into()),
                    ("country", "United Kingdom".into()),
                    ("location", SEARCH_LOCATION.into()),
                    ("pageSize", "100".into()),
                    ("language", "en".into()),
                ],
            }),
            SourceKind::Adzuna => {
                let app_id = credentials.adzuna_app_id.clone()?;
                let app_key = credentials.adzuna_app_key.clone()?;
                per_keyword(&|keyword| BoardRequest::Get {
                    url: url.clone(),
                    query: vec![
                        ("app_id", app_id.clone()),
                        ("app_key", app_key.clone()),
                        ("what", keyword.into()),
                        ("where", SEARCH_LOCATION.into()),
                        ("results_per_page", "50".into()),
                        ("sort_by", "date".into()),
                        ("content-type", "application/json".into()),
                    ],
                })
            }
            SourceKind::Jooble => {
                let key = credentials.jooble_api_key.clone()?;
                let endpoint = format!("{}/{key}", url.trim_end_matches('/'));
                per_keyword(&|keyword| BoardRequest::Post {
                    url: endpoint.clone(),
                    body: json!({
                        "keywords": keyword,
                        "location": SEARCH_LOCATION,
                        "page": 1,
                        "radius": 20,
                    }),
                })
            }
            SourceKind::Reed => {
                let key = credentials.reed_api_key.clone()?;
                per_keyword(&|keyword| BoardRequest::GetBasicAuth {
                    url: url.clone(),
                    query: vec![
                        ("keywords", keyword.into()),
                        ("locationName", SEARCH_LOCATION.into()),
                        ("distanceFromLocation", "25".into()),
                        ("resultsToTake", "50".into()),
                        ("resultsToSkip", "0".into()),
                    ],
                    username: key.clone(),
                })
            }
            SourceKind::Cvlibrary => {
                let key = credentials.cvlibrary_api_key.clone()?;
                per_keyword(&|keyword| BoardRequest::Get {
                    url: url.clone(),
                    query: vec![
                        ("key", key.clone()),
                        ("q", keyword.into()),
                        ("geo", SEARCH_LOCATION.into()),
                        ("distance", "20".into()),
                        ("tempperm", "Permanent".into()),
                        ("perpage", "50".into()),
                        ("orderby", "date".into()),
                    ],
                })
            }
            _ => Vec::new(),
        };
        Some(requests)
    }

    fn parse(&self, body: &JsonValue) -> Vec<RawPosting> {
        let name = self.source.display_name.as_str();
        match self.source.kind {
            SourceKind::Remotive => parse_remotive(name, body),
            SourceKind::Remoteok => parse_remoteok(name, body),
            SourceKind::Jobicy => parse_jobicy(name, body),
            SourceKind::Meetfrank => parse_meetfrank(name, body),
            SourceKind::Adzuna => parse_adzuna(name, body),
            SourceKind::Jooble => parse_jooble(name, body),
            SourceKind::Reed => parse_reed(name, body),
            SourceKind::Cvlibrary => parse_cvlibrary(name, body),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl SourceConnector for JsonBoardConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        self.source.kind
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let source_id = self.source.source_id.as_str();
        let span = info_span!("source_fetch", source_id);
        async {
            let Some(requests) = self.requests(&ctx.credentials) else {
                info!(source_id, "credentials missing; source skipped");
                return Ok(Vec::new());
            };
            let mut tally = RequestTally::default();
            let mut postings = Vec::new();
            for (idx, request) in requests.iter().enumerate() {
                if idx > 0 {
                    http.pause().await;
                }
                let result = request.send(http, source_id).await;
                if let Some(body) = tally.record(source_id, request.url(), result) {
                    postings.extend(self.parse(&body));
                }
            }
            tally.finish(source_id, ctx.finalize(postings))
        }
        .instrument(span)
        .await
    }
}

type Paths = &'static [&'static [&'static str]];

/// Candidate JSON paths for each posting field, tried in order.
struct FieldMap {
    title: Paths,
    company: Paths,
    location: Paths,
    link: Paths,
    posted: Paths,
    summary: Paths,
}

impl FieldMap {
    fn posting(&self, source_name: &str, job: &JsonValue) -> Option<RawPosting> {
        let title = json_first_str(job, self.title);
        if title.is_empty() {
            return None;
        }
        Some(
            RawPosting::new(source_name, title, json_first_str(job, self.company))
                .with_location(json_first_str(job, self.location))
                .with_link(json_first_str(job, self.link))
                .with_posted_date(json_first_str(job, self.posted))
                .with_summary(summary_from_html(&json_first_str(job, self.summary))),
        )
    }
}

const REMOTIVE: FieldMap = FieldMap {
    title: &[&["title"]],
    company: &[&["company_name"]],
    location: &[&["candidate_required_location"]],
    link: &[&["url"]],
    posted: &[&["publication_date"]],
    summary: &[&["description"]],
};

const REMOTEOK: FieldMap = FieldMap {
    title: &[&["position"]],
    company: &[&["company"]],
    location: &[&["location"]],
    link: &[&["url"]],
    posted: &[&["date"]],
    summary: &[&["description"]],
};

const JOBICY: FieldMap = FieldMap {
    title: &[&["jobTitle"], &["title"]],
    company: &[&["companyName"], &["company"]],
    location: &[&["jobGeo"], &["location"]],
    link: &[&["url"], &["jobUrl"]],
    posted: &[&["pubDate"], &["postedDate"]],
    summary: &[&["jobExcerpt"], &["description"]],
};

const MEETFRANK: FieldMap = FieldMap {
    title: &[&["title"]],
    company: &[&["company"], &["company", "name"]],
    location: &[&["location"]],
    link: &[&["applyUrl"], &["url"]],
    posted: &[&["publishedAt"]],
    summary: &[&["description"]],
};

const ADZUNA: FieldMap = FieldMap {
    title: &[&["title"]],
    company: &[&["company", "display_name"]],
    location: &[&["location", "display_name"]],
    link: &[&["redirect_url"]],
    posted: &[&["created"]],
    summary: &[&["description"]],
};

const JOOBLE: FieldMap = FieldMap {
    title: &[&["title"]],
    company: &[&["company"]],
    location: &[&["location"]],
    link: &[&["link"], &["url"]],
    posted: &[&["updated"], &["date"]],
    summary: &[&["snippet"], &["description"]],
};

const REED: FieldMap = FieldMap {
    title: &[&["jobTitle"], &["job_title"], &["title"]],
    company: &[&["employerName"]],
    location: &[&["locationName"]],
    link: &[&["jobUrl"]],
    posted: &[&["date"]],
    summary: &[&["jobDescription"]],
};

const CVLIBRARY: FieldMap = FieldMap {
    title: &[&["title"], &["job_title"]],
    company: &[&["company"], &["company_name"]],
    location: &[&["location"], &["geo"]],
    link: &[&["job_url"], &["joburl"], &["url"]],
    posted: &[&["date"], &["posted"], &["date_posted"]],
    summary: &[&["description"], &["short_description"]],
};

/// Board listings without a location are treated as remote.
fn map_jobs(jobs: &[JsonValue], fields: &FieldMap, source_name: &str) -> Vec<RawPosting> {
    jobs.iter()
        .filter_map(|job| fields.posting(source_name, job))
        .map(or_remote)
        .collect()
}

pub fn parse_remotive(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["jobs"]), &REMOTIVE, source_name)
}

/// RemoteOK answers with a bare array whose first element is a legal notice without a
/// `position`; it falls out with the other title-less entries.
pub fn parse_remoteok(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    let jobs = body.as_array().map(Vec::as_slice).unwrap_or_default();
    map_jobs(jobs, &REMOTEOK, source_name)
}

pub fn parse_jobicy(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["jobs", "data"]), &JOBICY, source_name)
}

pub fn parse_meetfrank(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["jobs"]), &MEETFRANK, source_name)
}

pub fn parse_adzuna(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["results"]), &ADZUNA, source_name)
}

pub fn parse_jooble(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["jobs"]), &JOOBLE, source_name)
}

/// Reed dates arrive as `dd/mm/yyyy`; they are rewritten to ISO dates so the recency gate can
/// read them.
pub fn parse_reed(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["results"]), &REED, source_name)
        .into_iter()
        .map(|mut posting| {
            if let Ok(date) = NaiveDate::parse_from_str(&posting.posted_date, "%d/%m/%Y") {
                posting.posted_date = date.format("%Y-%m-%d").to_string();
            }
            posting
        })
        .collect()
}

pub fn parse_cvlibrary(source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    map_jobs(json_array(body, &["jobs", "results"]), &CVLIBRARY, source_name)
}
