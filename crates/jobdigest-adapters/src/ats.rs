//! Public applicant-tracking-system job boards: Greenhouse, Lever, Ashby and SmartRecruiters.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use jobdigest_core::RawPosting;
use jobdigest_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::{info_span, Instrument};

use crate::{
    company_from_slug, json_array, json_first_str, json_str, or_remote, summary_from_html,
    AdapterContext, AdapterError, RequestTally, SourceConfig, SourceConnector, SourceKind,
};

const GREENHOUSE_API: &str = "https://boards-api.greenhouse.io/v1/boards";
const LEVER_API: &str = "https://api.lever.co/v0/postings";
const ASHBY_API: &str = "https://api.ashbyhq.com/posting-api/job-board";
const SMARTRECRUITERS_API: &str = "https://api.smartrecruiters.com/v1/companies";
const SMARTRECRUITERS_JOBS: &str = "https://jobs.smartrecruiters.com";
const SMARTRECRUITERS_PAGE_SIZE: u64 = 100;

fn base_url<'a>(source: &'a SourceConfig, default: &'a str) -> &'a str {
    source
        .url
        .as_deref()
        .map(|u| u.trim_end_matches('/'))
        .unwrap_or(default)
}

pub fn parse_greenhouse_board(board: &str, source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    let company = company_from_slug(board);
    json_array(body, &["jobs"])
        .iter()
        .filter_map(|job| {
            let title = json_str(job, &["title"]).filter(|t| !t.is_empty())?;
            Some(
                RawPosting::new(source_name, title, company.clone())
                    .with_location(json_str(job, &["location", "name"]).unwrap_or_default())
                    .with_link(json_str(job, &["absolute_url"]).unwrap_or_default())
                    .with_posted_date(json_str(job, &["updated_at"]).unwrap_or_default()),
            )
        })
        .collect()
}

pub fn parse_lever_board(board: &str, source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    let Some(jobs) = body.as_array() else {
        return Vec::new();
    };
    let company = company_from_slug(board);
    jobs.iter()
        .filter_map(|job| {
            let title = json_first_str(job, &[&["text"], &["title"]]);
            if title.is_empty() {
                return None;
            }
            let posted_date = job
                .get("createdAt")
                .and_then(JsonValue::as_i64)
                .and_then(DateTime::from_timestamp_millis)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false))
                .unwrap_or_default();
            Some(
                RawPosting::new(source_name, title, company.clone())
                    .with_location(json_str(job, &["categories", "location"]).unwrap_or_default())
                    .with_link(json_first_str(job, &[&["hostedUrl"], &["applyUrl"]]))
                    .with_posted_date(posted_date)
                    .with_summary(summary_from_html(
                        json_str(job, &["descriptionPlain"]).unwrap_or_default(),
                    )),
            )
        })
        .collect()
}

pub fn parse_ashby_board(board: &str, source_name: &str, body: &JsonValue) -> Vec<RawPosting> {
    let fallback_company = company_from_slug(board);
    json_array(body, &["jobs", "postings"])
        .iter()
        .filter_map(|job| {
            let title = json_str(job, &["title"]).filter(|t| !t.is_empty())?;
            let company = match json_first_str(job, &[&["companyName"]]) {
                c if c.is_empty() => fallback_company.clone(),
                c => c,
            };
            Some(
                RawPosting::new(source_name, title, company)
                    .with_location(json_first_str(
                        job,
                        &[&["location"], &["locationText"], &["locationName"]],
                    ))
                    .with_link(json_first_str(
                        job,
                        &[&["jobUrl"], &["jobPageUrl"], &["applyUrl"]],
                    ))
                    .with_posted_date(json_first_str(job, &[&["publishedAt"], &["createdAt"]])),
            )
        })
        .map(or_remote)
        .collect()
}

/// One page of SmartRecruiters postings plus the reported total, if any.
pub fn parse_smartrecruiters_page(
    company: &str,
    source_name: &str,
    body: &JsonValue,
) -> (Vec<RawPosting>, Option<u64>) {
    let postings = json_array(body, &["content"])
        .iter()
        .filter_map(|job| {
            let title = json_str(job, &["name"]).filter(|t| !t.is_empty())?;
            let company_name = match json_first_str(job, &[&["company", "name"]]) {
                c if c.is_empty() => company_from_slug(company),
                c => c,
            };
            let identifier = match json_first_str(job, &[&["company", "identifier"]]) {
                c if c.is_empty() => company.to_string(),
                c => c,
            };
            let location = job.get("location").map(smartrecruiters_location).unwrap_or_default();
            let link = match json_str(job, &["id"]) {
                Some(id) if !id.is_empty() => format!("{SMARTRECRUITERS_JOBS}/{identifier}/{id}"),
                _ => String::new(),
            };
            Some(
                RawPosting::new(source_name, title, company_name)
                    .with_location(location)
                    .with_link(link)
                    .with_posted_date(json_str(job, &["releasedDate"]).unwrap_or_default()),
            )
        })
        .collect();
    let total = body.get("totalFound").and_then(JsonValue::as_u64);
    (postings, total)
}

fn smartrecruiters_location(location: &JsonValue) -> String {
    if location.get("remote").and_then(JsonValue::as_bool).unwrap_or(false) {
        return "Remote".to_string();
    }
    ["city", "region", "country"]
        .iter()
        .filter_map(|key| json_str(location, &[*key]))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shared fan-out over `source.boards`: one GET per board, parsed by `parse`.
async fn fetch_boards(
    source: &SourceConfig,
    http: &HttpFetcher,
    ctx: &AdapterContext,
    url_for: impl Fn(&str) -> (String, Vec<(&'static str, String)>),
    parse: impl Fn(&str, &str, &JsonValue) -> Vec<RawPosting>,
) -> Result<Vec<RawPosting>, AdapterError> {
    let source_id = source.source_id.as_str();
    let mut tally = RequestTally::default();
    let mut postings = Vec::new();
    for (idx, board) in source.boards.iter().enumerate() {
        if idx > 0 {
            http.pause().await;
        }
        let (url, query) = url_for(board);
        let result = http.get_json::<JsonValue>(source_id, &url, &query).await;
        if let Some(body) = tally.record(source_id, &url, result) {
            postings.extend(parse(board, &source.display_name, &body));
        }
    }
    tally.finish(source_id, ctx.finalize(postings))
}

macro_rules! board_connector {
    ($name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            source: SourceConfig,
        }

        impl $name {
            pub fn new(source: SourceConfig) -> Self {
                Self { source }
            }
        }
    };
}

board_connector!(GreenhouseConnector);
board_connector!(LeverConnector);
board_connector!(AshbyConnector);
board_connector!(SmartRecruitersConnector);

#[async_trait]
impl SourceConnector for GreenhouseConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Greenhouse
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let base = base_url(&self.source, GREENHOUSE_API);
        fetch_boards(
            &self.source,
            http,
            ctx,
            |board| (format!("{base}/{board}/jobs"), Vec::new()),
            parse_greenhouse_board,
        )
        .instrument(info_span!("source_fetch", source_id = %self.source.source_id))
        .await
    }
}

#[async_trait]
impl SourceConnector for LeverConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Lever
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let base = base_url(&self.source, LEVER_API);
        fetch_boards(
            &self.source,
            http,
            ctx,
            |board| (format!("{base}/{board}"), vec![("mode", "json".to_string())]),
            parse_lever_board,
        )
        .instrument(info_span!("source_fetch", source_id = %self.source.source_id))
        .await
    }
}

#[async_trait]
impl SourceConnector for AshbyConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Ashby
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let base = base_url(&self.source, ASHBY_API);
        fetch_boards(
            &self.source,
            http,
            ctx,
            |board| (format!("{base}/{board}"), Vec::new()),
            parse_ashby_board,
        )
        .instrument(info_span!("source_fetch", source_id = %self.source.source_id))
        .await
    }
}

#[async_trait]
impl SourceConnector for SmartRecruitersConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Smartrecruiters
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let span = info_span!("source_fetch", source_id = %self.source.source_id);
        async {
            let source_id = self.source.source_id.as_str();
            let base = base_url(&self.source, SMARTRECRUITERS_API);
            let mut tally = RequestTally::default();
            let mut postings = Vec::new();
            for company in &self.source.boards {
                let url = format!("{base}/{company}/postings");
                let mut offset = 0u64;
                loop {
                    let query = [
                        ("limit", SMARTRECRUITERS_PAGE_SIZE.to_string()),
                        ("offset", offset.to_string()),
                        ("q", "product".to_string()),
                    ];
                    let result = http.get_json::<JsonValue>(source_id, &url, &query).await;
                    let Some(body) = tally.record(source_id, &url, result) else {
                        break;
                    };
                    let (page, total) =
                        parse_smartrecruiters_page(company, &self.source.display_name, &body);
                    if json_array(&body, &["content"]).is_empty() {
                        break;
                    }
                    postings.extend(page);
                    let Some(total) = total else {
                        break;
                    };
                    offset += SMARTRECRUITERS_PAGE_SIZE;
                    if offset >= total {
                        break;
                    }
                    http.pause().await;
                }
            }
            tally.finish(source_id, ctx.finalize(postings))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn greenhouse_jobs_use_board_name_as_company() {
        let body = json!({
            "jobs": [
                {
                    "title": "Senior Product Manager, Onboarding",
                    "location": {"name": "London, UK"},
                    "absolute_url": "https://boards.greenhouse.io/thought-machine/jobs/1?gh_src=x",
                    "updated_at": "2026-02-23T10:00:00-05:00"
                },
                {"title": "", "location": {"name": "London"}},
                {"location": {"name": "London"}}
            ]
        });
        let postings = parse_greenhouse_board("thought-machine", "Greenhouse", &body);
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].company, "Thought Machine");
        assert_eq!(postings[0].location, "London, UK");
        assert_eq!(postings[0].posted_date, "2026-02-23T10:00:00-05:00");
        let validated = postings[0].clone().validated().unwrap();
        assert_eq!(
            validated.link,
            "https://boards.greenhouse.io/thought-machine/jobs/1"
        );
    }

    #[test]
    fn lever_created_at_millis_become_iso_dates() {
        let body = json!([
            {
                "text": "Product Owner KYC",
                "categories": {"location": "London"},
                "hostedUrl": "https://jobs.lever.co/monzo/abc",
                "createdAt": 1704067200000i64,
                "descriptionPlain": "Own onboarding."
            },
            {"text": "Engineer", "applyUrl": "https://jobs.lever.co/monzo/def/apply"}
        ]);
        let postings = parse_lever_board("monzo", "Lever", &body);
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].company, "Monzo");
        assert_eq!(postings[0].posted_date, "2024-01-01T00:00:00+00:00");
        assert_eq!(postings[0].summary, "Own onboarding.");
        assert_eq!(postings[1].link, "https://jobs.lever.co/monzo/def/apply");
        assert!(parse_lever_board("monzo", "Lever", &json!({"ok": false})).is_empty());
    }

    #[test]
    fn ashby_reads_either_jobs_or_postings() {
        let body = json!({
            "postings": [{
                "title": "Product Lead, Identity",
                "locationName": "Remote (UK)",
                "jobPageUrl": "https://jobs.ashbyhq.com/ramp/1",
                "createdAt": "2026-02-24T08:00:00Z"
            }]
        });
        let postings = parse_ashby_board("ramp", "Ashby", &body);
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].company, "Ramp");
        assert_eq!(postings[0].location, "Remote (UK)");
        assert_eq!(postings[0].link, "https://jobs.ashbyhq.com/ramp/1");
        assert_eq!(postings[0].posted_date, "2026-02-24T08:00:00Z");
    }

    #[test]
    fn ashby_listing_without_location_reads_as_remote() {
        let body = json!({
            "jobs": [{
                "title": "Senior Product Manager, KYC onboarding",
                "companyName": "Fenergo",
                "jobUrl": "https://jobs.ashbyhq.com/fenergo/7",
                "publishedAt": "2026-02-24T08:00:00Z"
            }]
        });
        let postings = parse_ashby_board("fenergo", "Ashby", &body);
        assert_eq!(postings[0].location, "Remote");
        let kept = postings[0].clone().validated().unwrap();
        assert_eq!(kept.location, "Remote");
    }

    #[test]
    fn smartrecruiters_builds_links_and_locations() {
        let body = json!({
            "totalFound": 150,
            "content": [
                {
                    "id": "744000012345",
                    "name": "Product Manager - Screening",
                    "company": {"name": "Visa", "identifier": "Visa"},
                    "location": {"city": "London", "region": "England", "country": "gb"},
                    "releasedDate": "2026-02-24T09:00:00.000Z"
                },
                {
                    "id": "744000099999",
                    "name": "Product Director",
                    "location": {"remote": true, "city": "Paris"}
                }
            ]
        });
        let (postings, total) = parse_smartrecruiters_page("NICE", "SmartRecruiters", &body);
        assert_eq!(total, Some(150));
        assert_eq!(
            postings[0].link,
            "https://jobs.smartrecruiters.com/Visa/744000012345"
        );
        assert_eq!(postings[0].location, "London, England, gb");
        assert_eq!(postings[1].company, "Nice");
        assert_eq!(postings[1].location, "Remote");
        assert_eq!(
            postings[1].link,
            "https://jobs.smartrecruiters.com/NICE/744000099999"
        );
    }
}
