//! Generic HTML job boards: keyword search pages are scanned for job links, then a bounded
//! number of detail pages are read for their JSON-LD `JobPosting` block.

use std::collections::HashSet;

use async_trait::async_trait;
use jobdigest_core::{clean_link, RawPosting};
use jobdigest_storage::HttpFetcher;
use scraper::Html;
use serde_json::Value as JsonValue;
use tracing::{debug, info_span, Instrument};

use crate::{
    element_text, extract_relative_posted_text, json_str, parse_selector, summary_from_html,
    AdapterContext, AdapterError, RequestTally, SourceConfig, SourceConnector, SourceKind,
};

pub const MAX_DETAIL_PAGES: usize = 12;
const BOARD_LOCATION: &str = "London";
const MIN_LINK_TITLE_CHARS: usize = 4;

#[derive(Debug, Clone)]
pub struct HtmlBoardConnector {
    source: SourceConfig,
    keywords: Vec<String>,
}

impl HtmlBoardConnector {
    pub fn new(source: SourceConfig, keywords: Vec<String>) -> Self {
        Self { source, keywords }
    }
}

#[async_trait]
impl SourceConnector for HtmlBoardConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::HtmlBoard
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let source_id = self.source.source_id.as_str();
        let Some(base_url) = self.source.url.as_deref().map(|u| u.trim_end_matches('/')) else {
            return Err(AdapterError::MissingUrl {
                source_id: source_id.to_string(),
            });
        };
        let name = self.source.display_name.as_str();
        let span = info_span!("source_fetch", source_id);
        async {
            let mut tally = RequestTally::default();
            let mut seen = HashSet::new();
            let mut postings: Vec<RawPosting> = Vec::new();

            for (idx, keyword) in self.keywords.iter().enumerate() {
                if idx > 0 {
                    http.pause().await;
                }
                let url = search_url(base_url, keyword);
                let result = http.get_text(source_id, &url, &[]).await;
                let Some(resp) = tally.record(source_id, &url, result) else {
                    continue;
                };
                for link in extract_job_links(&resp.body, base_url)? {
                    if !seen.insert(link.href.clone()) {
                        continue;
                    }
                    postings.push(
                        RawPosting::new(name, link.title, name)
                            .with_location(BOARD_LOCATION)
                            .with_link(link.href)
                            .with_posted_text(link.posted_text),
                    );
                }
            }

            let wanted: Vec<usize> = postings
                .iter()
                .enumerate()
                .filter(|(_, p)| ctx.wants_detail(p))
                .map(|(i, _)| i)
                .take(MAX_DETAIL_PAGES)
                .collect();
            for idx in wanted {
                http.pause().await;
                let link = postings[idx].link.clone();
                let detail = match http.get_text(source_id, &link, &[]).await {
                    Ok(resp) => parse_job_detail_jsonld(&resp.body)?,
                    Err(err) => {
                        debug!(source_id, url = %link, error = %err, "detail page failed; keeping listing");
                        None
                    }
                };
                if let Some(detail) = detail {
                    detail.merge_into(&mut postings[idx]);
                }
            }

            tally.finish(source_id, ctx.finalize(postings))
        }
        .instrument(span)
        .await
    }
}

/// Lower-cases and joins alphanumeric runs with hyphens: "Product Manager KYC" becomes
/// "product-manager-kyc".
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn search_url(base_url: &str, keyword: &str) -> String {
    format!("{}/jobs/{}/in-london", base_url.trim_end_matches('/'), slugify(keyword))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLink {
    pub href: String,
    pub title: String,
    pub posted_text: String,
}

/// Anchors whose href looks like a job page, made absolute and canonical, first occurrence
/// wins. Anchor texts shorter than four characters are navigation, not titles.
pub fn extract_job_links(html: &str, base_url: &str) -> Result<Vec<JobLink>, AdapterError> {
    let document = Html::parse_document(html);
    let anchor_sel = parse_selector("a[href]")?;
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !(href.contains("/job/") || href.contains("/jobs/") || href.contains("jobid=")) {
            continue;
        }
        let href = clean_link(&absolutize(base_url, href.trim()));
        if href.is_empty() || seen.contains(&href) {
            continue;
        }
        let title = element_text(anchor);
        if title.chars().count() < MIN_LINK_TITLE_CHARS {
            continue;
        }
        let posted_text = anchor
            .parent()
            .and_then(scraper::ElementRef::wrap)
            .map(|card| extract_relative_posted_text(&element_text(card)))
            .unwrap_or_default();
        seen.insert(href.clone());
        links.push(JobLink {
            href,
            title,
            posted_text,
        });
    }
    Ok(links)
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    let base = base_url.trim_end_matches('/');
    if href.starts_with('/') {
        let origin_end = base
            .find("://")
            .and_then(|scheme| base[scheme + 3..].find('/').map(|i| scheme + 3 + i))
            .unwrap_or(base.len());
        return format!("{}{href}", &base[..origin_end]);
    }
    format!("{base}/{href}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPostingDetails {
    pub title: String,
    pub company: String,
    pub location: String,
    pub posted_date: String,
    pub summary: String,
}

impl JobPostingDetails {
    /// Overwrites listing fields with the non-empty detail values.
    pub fn merge_into(self, posting: &mut RawPosting) {
        let replace = |slot: &mut String, value: String| {
            if !value.is_empty() {
                *slot = value;
            }
        };
        replace(&mut posting.title, self.title);
        replace(&mut posting.company, self.company);
        replace(&mut posting.location, self.location);
        replace(&mut posting.posted_date, self.posted_date);
        replace(&mut posting.summary, self.summary);
    }
}

/// First schema.org `JobPosting` found in the page's JSON-LD scripts, searched recursively
/// (including `@graph` containers).
pub fn parse_job_detail_jsonld(html: &str) -> Result<Option<JobPostingDetails>, AdapterError> {
    let document = Html::parse_document(html);
    let script_sel = parse_selector(r#"script[type="application/ld+json"]"#)?;
    for script in document.select(&script_sel) {
        let raw = script.text().collect::<String>();
        let Ok(payload) = serde_json::from_str::<JsonValue>(raw.trim()) else {
            continue;
        };
        let mut nodes = Vec::new();
        collect_job_postings(&payload, &mut nodes);
        if let Some(node) = nodes.first() {
            return Ok(Some(details_from_node(node)));
        }
    }
    Ok(None)
}

fn is_job_posting(value: &JsonValue) -> bool {
    match value.get("@type") {
        Some(JsonValue::String(t)) => t == "JobPosting",
        Some(JsonValue::Array(types)) => types.iter().any(|t| t.as_str() == Some("JobPosting")),
        _ => false,
    }
}

fn collect_job_postings<'a>(value: &'a JsonValue, out: &mut Vec<&'a JsonValue>) {
    match value {
        JsonValue::Object(map) => {
            if is_job_posting(value) {
                out.push(value);
            }
            for child in map.values() {
                collect_job_postings(child, out);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_job_postings(item, out);
            }
        }
        _ => {}
    }
}

fn details_from_node(node: &JsonValue) -> JobPostingDetails {
    let job_location = match node.get("jobLocation") {
        Some(JsonValue::Array(items)) => items.first(),
        other => other,
    };
    let location = job_location
        .and_then(|loc| loc.get("address"))
        .map(|address| {
            ["addressLocality", "addressRegion", "addressCountry"]
                .iter()
                .filter_map(|key| json_str(address, &[*key]))
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    JobPostingDetails {
        title: json_str(node, &["title"]).unwrap_or_default().trim().to_string(),
        company: json_str(node, &["hiringOrganization", "name"])
            .unwrap_or_default()
            .trim()
            .to_string(),
        location,
        posted_date: json_str(node, &["datePosted"]).unwrap_or_default().to_string(),
        summary: summary_from_html(json_str(node, &["description"]).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
<html><body>
  <nav><a href="/jobs/">All</a></nav>
  <article class="job-card">
    <a href="/job/senior-product-manager-kyc/acme-job123?src=search">Senior Product Manager - KYC</a>
    <span>London · 2 days ago</span>
  </article>
  <article class="job-card">
    <a href="https://www.totaljobs.com/job/product-owner/beta-job456">Product Owner</a>
  </article>
  <a href="/job/senior-product-manager-kyc/acme-job123">Senior Product Manager - KYC</a>
  <a href="/about-us">About us and our values</a>
</body></html>"#;

    const DETAIL_PAGE: &str = r#"
<html><head>
<script type="application/ld+json">{"@context": "https://schema.org", "@type": "Organization", "name": "Totaljobs"}</script>
<script type="application/ld+json">
{"@graph": [{
  "@type": ["JobPosting"],
  "title": "Senior Product Manager, KYC",
  "hiringOrganization": {"@type": "Organization", "name": "Acme Bank"},
  "jobLocation": [{"address": {"addressLocality": "London", "addressCountry": "GB"}}],
  "datePosted": "2026-02-24T09:00:00Z",
  "description": "<p>Own client onboarding.</p>"
}]}
</script>
</head><body></body></html>"#;

    #[test]
    fn slugify_joins_alphanumeric_runs() {
        assert_eq!(slugify("Product Manager: KYC/AML"), "product-manager-kyc-aml");
        assert_eq!(
            search_url("https://www.cwjobs.co.uk/", "product manager onboarding"),
            "https://www.cwjobs.co.uk/jobs/product-manager-onboarding/in-london"
        );
    }

    #[test]
    fn job_links_are_absolute_canonical_and_unique() {
        let links = extract_job_links(SEARCH_PAGE, "https://www.totaljobs.com").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].href,
            "https://www.totaljobs.com/job/senior-product-manager-kyc/acme-job123"
        );
        assert_eq!(links[0].title, "Senior Product Manager - KYC");
        assert_eq!(links[0].posted_text, "2 days ago");
        assert_eq!(links[1].title, "Product Owner");
        assert_eq!(links[1].posted_text, "");
    }

    #[test]
    fn jsonld_job_posting_is_found_inside_graph() {
        let details = parse_job_detail_jsonld(DETAIL_PAGE).unwrap().unwrap();
        assert_eq!(details.title, "Senior Product Manager, KYC");
        assert_eq!(details.company, "Acme Bank");
        assert_eq!(details.location, "London, GB");
        assert_eq!(details.posted_date, "2026-02-24T09:00:00Z");
        assert_eq!(details.summary, "Own client onboarding.");

        let mut posting = RawPosting::new("Totaljobs", "Senior PM", "Totaljobs")
            .with_location("London")
            .with_posted_text("2 days ago");
        details.merge_into(&mut posting);
        assert_eq!(posting.company, "Acme Bank");
        assert_eq!(posting.posted_text, "2 days ago");
    }

    #[test]
    fn pages_without_job_postings_yield_none() {
        assert!(parse_job_detail_jsonld("<html><body><p>Gone</p></body></html>")
            .unwrap()
            .is_none());
        let broken = r#"<script type="application/ld+json">{not json</script>"#;
        assert!(parse_job_detail_jsonld(broken).unwrap().is_none());
    }

    #[test]
    fn relative_hrefs_resolve_against_the_origin() {
        assert_eq!(
            absolutize("https://jobserve.com/gb/en/Job-Search", "/job/1"),
            "https://jobserve.com/job/1"
        );
        assert_eq!(absolutize("https://x.test", "//cdn.x.test/job/2"), "https://cdn.x.test/job/2");
        assert_eq!(absolutize("https://x.test/", "job/3"), "https://x.test/job/3");
    }
}
