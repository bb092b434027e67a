//! LinkedIn guest job search. There is no public API: the guest endpoints return HTML card
//! fragments, and a per-job detail fragment carries the description.

use std::collections::HashMap;

use async_trait::async_trait;
use jobdigest_core::RawPosting;
use jobdigest_storage::HttpFetcher;
use scraper::Html;
use tracing::{debug, info, info_span, Instrument};

use crate::{
    element_text, extract_relative_posted_text, parse_selector, select_first_attr,
    select_first_text, AdapterContext, AdapterError, RequestTally, SourceConfig, SourceConnector,
    SourceKind,
};

pub const SEARCH_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";
pub const DETAIL_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/jobPosting";
/// Restricts guest search to postings from the last week.
const POSTED_WITHIN: &str = "r604800";
const KEYWORD_PAGE_STARTS: [u32; 2] = [0, 25];
const COMPANY_PAGE_STARTS: [u32; 1] = [0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedInCard {
    pub job_id: String,
    pub posting: RawPosting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedInDetail {
    pub description: String,
    pub posted_text: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct LinkedInConnector {
    source: SourceConfig,
}

impl LinkedInConnector {
    pub fn new(source: SourceConfig) -> Self {
        Self { source }
    }

    /// Every (keywords, location, start) search the connector issues: the keyword list over
    /// two pages, then each company paired with each company term over one page.
    pub fn search_plan(&self) -> Vec<(String, String, u32)> {
        let mut plan = Vec::new();
        for keywords in &self.source.keywords {
            for location in &self.source.locations {
                for start in KEYWORD_PAGE_STARTS {
                    plan.push((keywords.clone(), location.clone(), start));
                }
            }
        }
        for company in &self.source.companies {
            for term in &self.source.company_terms {
                for location in &self.source.locations {
                    for start in COMPANY_PAGE_STARTS {
                        plan.push((format!("{term} {company}"), location.clone(), start));
                    }
                }
            }
        }
        plan
    }
}

#[async_trait]
impl SourceConnector for LinkedInConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Linkedin
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let source_id = self.source.source_id.as_str();
        let search_url = self.source.url.as_deref().unwrap_or(SEARCH_URL);
        let span = info_span!("source_fetch", source_id);
        async {
            let mut tally = RequestTally::default();
            let mut order: Vec<String> = Vec::new();
            let mut cards: HashMap<String, RawPosting> = HashMap::new();

            let plan = self.search_plan();
            info!(source_id, searches = plan.len(), "starting guest search");
            for (idx, (keywords, location, start)) in plan.into_iter().enumerate() {
                if idx > 0 {
                    http.pause().await;
                }
                let query = [
                    ("keywords", keywords),
                    ("location", location),
                    ("f_TPR", POSTED_WITHIN.to_string()),
                    ("start", start.to_string()),
                ];
                let result = http.get_text(source_id, search_url, &query).await;
                let Some(resp) = tally.record(source_id, search_url, result) else {
                    continue;
                };
                for card in parse_search_cards(&self.source.display_name, &resp.body)? {
                    if ctx.is_excluded_company(&card.posting.company) {
                        continue;
                    }
                    if cards.insert(card.job_id.clone(), card.posting).is_none() {
                        order.push(card.job_id);
                    }
                }
            }

            let mut postings = Vec::with_capacity(order.len());
            for job_id in order {
                let Some(mut posting) = cards.remove(&job_id) else {
                    continue;
                };
                if ctx.wants_detail(&posting) {
                    http.pause().await;
                    let url = format!("{DETAIL_URL}/{job_id}");
                    match http.get_text(source_id, &url, &[]).await {
                        Ok(resp) => parse_job_detail(&resp.body)?.merge_into(&mut posting),
                        Err(err) => {
                            debug!(source_id, job_id, error = %err, "detail fetch failed; using card");
                        }
                    }
                }
                postings.push(posting);
            }

            tally.finish(source_id, ctx.finalize(postings))
        }
        .instrument(span)
        .await
    }
}

impl LinkedInDetail {
    /// Detail location and relative posted text win over the card's; the description
    /// becomes the summary.
    pub fn merge_into(self, posting: &mut RawPosting) {
        if !self.location.is_empty() {
            posting.location = self.location;
        }
        if !self.posted_text.is_empty() {
            posting.posted_text = self.posted_text;
        }
        posting.summary = self.description;
    }
}

/// Parses the guest search fragment. Cards without a job id, title or company are skipped.
pub fn parse_search_cards(source_name: &str, html: &str) -> Result<Vec<LinkedInCard>, AdapterError> {
    let document = Html::parse_fragment(html);
    let card_sel = parse_selector("div.base-search-card")?;
    let title_sel = parse_selector("h3.base-search-card__title")?;
    let company_sel = parse_selector("h4.base-search-card__subtitle")?;
    let location_sel = parse_selector("span.job-search-card__location")?;
    let time_sel = parse_selector("time")?;
    let link_sel = parse_selector("a.base-card__full-link")?;

    let mut cards = Vec::new();
    for card in document.select(&card_sel) {
        let job_id = card
            .value()
            .attr("data-entity-urn")
            .and_then(|urn| urn.rsplit(':').next())
            .unwrap_or_default()
            .trim()
            .to_string();
        if job_id.is_empty() {
            continue;
        }
        let (Some(title), Some(company)) = (
            select_first_text(card, &title_sel),
            select_first_text(card, &company_sel),
        ) else {
            continue;
        };
        let posted_text = select_first_text(card, &time_sel)
            .unwrap_or_else(|| extract_relative_posted_text(&element_text(card)));
        let posting = RawPosting::new(source_name, title, company)
            .with_location(select_first_text(card, &location_sel).unwrap_or_default())
            .with_link(select_first_attr(card, &link_sel, "href").unwrap_or_default())
            .with_posted_text(posted_text)
            .with_posted_date(select_first_attr(card, &time_sel, "datetime").unwrap_or_default());
        cards.push(LinkedInCard { job_id, posting });
    }
    Ok(cards)
}

pub fn parse_job_detail(html: &str) -> Result<LinkedInDetail, AdapterError> {
    let document = Html::parse_fragment(html);
    let root = document.root_element();
    let description_sel = parse_selector("div.show-more-less-html__markup")?;
    let posted_sel = parse_selector("span.posted-time-ago__text")?;
    let location_sel = parse_selector("span.topcard__flavor--bullet")?;
    Ok(LinkedInDetail {
        description: select_first_text(root, &description_sel).unwrap_or_default(),
        posted_text: select_first_text(root, &posted_sel).unwrap_or_default(),
        location: select_first_text(root, &location_sel).unwrap_or_default(),
    })
}
