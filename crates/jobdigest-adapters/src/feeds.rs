//! RSS 2.0 and Atom job feeds.
//!
//! Feeds go through the HTML parser. `<link>` is a void element in HTML, so RSS links are renamed
//! before parsing, and CDATA sections are escaped into plain text.

use async_trait::async_trait;
use jobdigest_core::RawPosting;
use jobdigest_storage::HttpFetcher;
use scraper::Html;
use tracing::{info_span, Instrument};

use crate::{
    parse_selector, select_first_attr, select_first_text, summary_from_html, AdapterContext,
    AdapterError, RequestTally, SourceConfig, SourceConnector, SourceKind,
};

const FEED_LOCATION: &str = "Remote";

#[derive(Debug, Clone)]
pub struct RssConnector {
    source: SourceConfig,
}

impl RssConnector {
    pub fn new(source: SourceConfig) -> Self {
        Self { source }
    }
}

#[async_trait]
impl SourceConnector for RssConnector {
    fn source_id(&self) -> &str {
        &self.source.source_id
    }

    fn display_name(&self) -> &str {
        &self.source.display_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let source_id = self.source.source_id.as_str();
        let Some(url) = self.source.url.as_deref() else {
            return Err(AdapterError::MissingUrl {
                source_id: source_id.to_string(),
            });
        };
        let span = info_span!("source_fetch", source_id);
        async {
            let mut tally = RequestTally::default();
            let mut postings = Vec::new();
            if let Some(resp) = tally.record(source_id, url, http.get_text(source_id, url, &[]).await) {
                postings = parse_feed(&self.source.display_name, &resp.body)?;
            }
            tally.finish(source_id, ctx.finalize(postings))
        }
        .instrument(span)
        .await
    }
}

/// Parses every `<item>` (RSS) or `<entry>` (Atom). Feed entries carry no location, so they
/// are treated as remote. A missing author falls back to a "Role at Company" title split,
/// then to the feed's own name.
pub fn parse_feed(source_name: &str, xml: &str) -> Result<Vec<RawPosting>, AdapterError> {
    let document = Html::parse_document(&prepare_feed_markup(xml));
    let item_sel = parse_selector("item, entry")?;
    let title_sel = parse_selector("title")?;
    let link_text_sel = parse_selector("feed-link")?;
    let link_attr_sel = parse_selector("link[href]")?;
    let summary_sel = parse_selector("description, summary, content")?;
    let date_sel = parse_selector("pubdate, published, updated")?;
    let author_sel = parse_selector("author")?;

    let mut postings = Vec::new();
    for item in document.select(&item_sel) {
        let Some(mut title) = select_first_text(item, &title_sel) else {
            continue;
        };
        let link = select_first_text(item, &link_text_sel)
            .or_else(|| select_first_attr(item, &link_attr_sel, "href"))
            .unwrap_or_default();
        let summary = select_first_text(item, &summary_sel)
            .map(|raw| summary_from_html(&raw))
            .unwrap_or_default();
        let posted_date = select_first_text(item, &date_sel).unwrap_or_default();

        let mut company = select_first_text(item, &author_sel).unwrap_or_default();
        if company.is_empty() && title.to_lowercase().contains(" at ") {
            let parts: Vec<&str> = title.split(" at ").collect();
            if let [role, employer] = parts.as_slice() {
                company = employer.trim().to_string();
                title = role.trim().to_string();
            }
        }
        if company.is_empty() {
            company = source_name.to_string();
        }

        postings.push(
            RawPosting::new(source_name, title, company)
                .with_location(FEED_LOCATION)
                .with_link(link)
                .with_posted_date(posted_date)
                .with_summary(summary),
        );
    }
    Ok(postings)
}

fn prepare_feed_markup(xml: &str) -> String {
    escape_cdata(xml)
        .replace("<link>", "<feed-link>")
        .replace("</link>", "</feed-link>")
}

fn escape_cdata(xml: &str) -> String {
    const OPEN: &str = "<![CDATA[";
    const CLOSE: &str = "]]>";
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let (inner, tail) = match after.find(CLOSE) {
            Some(end) => (&after[..end], &after[end + CLOSE.len()..]),
            None => (after, ""),
        };
        out.push_str(
            &inner
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;"),
        );
        rest = tail;
    }
    out.push_str(rest);
    out
}
