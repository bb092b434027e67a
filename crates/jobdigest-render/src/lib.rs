//! Email bodies for a finished digest: an HTML table and a plain-text fallback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use askama::Template;
use async_trait::async_trait;
use jobdigest_core::JobRecord;
use jobdigest_pipeline::{Digest, DigestSink};
use tokio::fs;
use tracing::info;

pub const CRATE_NAME: &str = "jobdigest-render";

pub const FIT_STRONG: &str = "#1B7F5D";
pub const FIT_GOOD: &str = "#2B6CB0";
pub const FIT_FAIR: &str = "#8A5A0B";

const ROW_EVEN: &str = "#FFFFFF";
const ROW_ODD: &str = "#F9FBFD";
const ROW_TOP_PICK: &str = "#FFF3D6";

/// Badge colour for a fit score: 85 and up, 75 and up, everything else.
pub fn fit_colour(score: u32) -> &'static str {
    if score >= 85 {
        FIT_STRONG
    } else if score >= 75 {
        FIT_GOOD
    } else {
        FIT_FAIR
    }
}

pub fn subject(local_date: &str) -> String {
    format!("Daily Job Digest - {local_date}")
}

struct DigestRow<'a> {
    record: &'a JobRecord,
    fit_colour: &'static str,
    background: &'static str,
    top_pick: bool,
}

fn rows(digest: &Digest) -> Vec<DigestRow<'_>> {
    digest
        .delivered
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let top_pick = digest.is_top_pick(record);
            let background = match (top_pick, idx % 2) {
                (true, _) => ROW_TOP_PICK,
                (false, 0) => ROW_EVEN,
                (false, _) => ROW_ODD,
            };
            DigestRow {
                record,
                fit_colour: fit_colour(record.fit_score),
                background,
                top_pick,
            }
        })
        .collect()
}

#[derive(Template)]
#[template(path = "digest.html")]
struct DigestHtmlTemplate<'a> {
    window_hours: i64,
    preferences: &'a str,
    sources_summary: &'a str,
    top_pick: Option<&'a JobRecord>,
    rows: Vec<DigestRow<'a>>,
}

#[derive(Template)]
#[template(path = "digest.txt")]
struct DigestTextTemplate<'a> {
    window_hours: i64,
    preferences: &'a str,
    sources_summary: &'a str,
    total_roles: usize,
    top_pick: Option<&'a JobRecord>,
    rows: Vec<DigestRow<'a>>,
}

pub fn render_html(digest: &Digest) -> Result<String> {
    DigestHtmlTemplate {
        window_hours: digest.window_hours,
        preferences: &digest.preferences,
        sources_summary: &digest.sources_summary,
        top_pick: digest.top_pick.as_ref(),
        rows: rows(digest),
    }
    .render()
    .context("rendering html digest")
}

/// Plain-text body. "Roles found" counts every new role, not just the delivered ones.
pub fn render_text(digest: &Digest) -> Result<String> {
    DigestTextTemplate {
        window_hours: digest.window_hours,
        preferences: &digest.preferences,
        sources_summary: &digest.sources_summary,
        total_roles: digest.records.len(),
        top_pick: digest.top_pick.as_ref(),
        rows: rows(digest),
    }
    .render()
    .context("rendering text digest")
}

/// Writes `digest_<date>.html` and `digest_<date>.txt`, ready to hand to a mailer.
#[derive(Debug, Clone)]
pub struct EmailBodySink {
    dir: PathBuf,
}

impl EmailBodySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DigestSink for EmailBodySink {
    fn name(&self) -> &str {
        "email_body"
    }

    async fn deliver(&self, digest: &Digest) -> Result<Vec<PathBuf>> {
        let html = render_html(digest)?;
        let text = render_text(digest)?;
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let html_path = self.dir.join(format!("digest_{}.html", digest.local_date));
        let text_path = self.dir.join(format!("digest_{}.txt", digest.local_date));
        fs::write(&html_path, html)
            .await
            .with_context(|| format!("writing {}", html_path.display()))?;
        fs::write(&text_path, text)
            .await
            .with_context(|| format!("writing {}", text_path.display()))?;
        info!(
            subject = %subject(&digest.local_date),
            roles = digest.delivered.len(),
            "email bodies rendered"
        );
        Ok(vec![html_path, text_path])
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use jobdigest_pipeline::DigestMeta;

    use super::*;

    fn record(role: &str, link: &str, fit_score: u32) -> JobRecord {
        JobRecord {
            role: role.to_string(),
            company: "Monzo".into(),
            location: "London".into(),
            link: link.to_string(),
            posted: "today".into(),
            source: "Lever".into(),
            fit_score,
            preference_match: "London · KYC".into(),
            why_fit: "KYC domain aligns.".into(),
            cv_gap: "No obvious gaps.".into(),
            notes: String::new(),
            prep_questions: Vec::new(),
            apply_tips: String::new(),
        }
    }

    fn digest(records: Vec<JobRecord>, max_roles: usize) -> Digest {
        Digest::assemble(
            records,
            max_roles,
            DigestMeta {
                generated_at: Utc.with_ymd_and_hms(2026, 2, 24, 9, 0, 0).single().unwrap(),
                local_date: "2026-02-24".into(),
                window_hours: 24,
                preferences: "London or remote UK".into(),
                sources_summary: "LinkedIn".into(),
            },
        )
    }

    #[test]
    fn fit_colour_bands() {
        assert_eq!(fit_colour(90), FIT_STRONG);
        assert_eq!(fit_colour(85), FIT_STRONG);
        assert_eq!(fit_colour(84), FIT_GOOD);
        assert_eq!(fit_colour(75), FIT_GOOD);
        assert_eq!(fit_colour(74), FIT_FAIR);
    }

    #[test]
    fn empty_digest_renders_the_waiting_message() {
        let empty = digest(Vec::new(), 12);
        let html = render_html(&empty).unwrap();
        assert!(html.contains("Daily Job Digest · Last 24 hours"));
        assert!(html.contains("No roles matched in this window."));
        assert!(!html.contains("<table"));
        assert!(!html.contains("Top Pick"));

        let text = render_text(&empty).unwrap();
        assert!(text.contains("Roles found: 0"));
        assert!(text.contains("No roles matched in this window."));
        assert!(!text.contains("Top pick:"));
    }

    #[test]
    fn html_marks_the_top_pick_row() {
        let rendered = render_html(&digest(
            vec![
                record("Product Manager, KYC", "https://x/1", 78),
                record("Senior Product Owner", "https://x/2", 88),
                record("Product Lead", "https://x/3", 71),
            ],
            12,
        ))
        .unwrap();
        assert!(rendered.contains("Matches found: 3"));
        assert_eq!(rendered.matches(ROW_TOP_PICK).count(), 1);
        assert_eq!(rendered.matches(">Top Pick</span>").count(), 1);
        assert!(rendered.contains(FIT_STRONG));
        assert!(rendered.contains(FIT_GOOD));
        assert!(rendered.contains(FIT_FAIR));
        assert!(rendered.find("Senior Product Owner") < rendered.find("Product Manager, KYC"));
    }

    #[test]
    fn html_escapes_posting_text() {
        let rendered =
            render_html(&digest(vec![record("Product Lead <b>R&D</b>", "https://x/1", 80)], 12))
                .unwrap();
        assert!(!rendered.contains("<b>R&D</b>"));
        assert!(rendered.contains("&lt;b&gt;R&amp;D&lt;/b&gt;"));
    }

    #[test]
    fn text_counts_all_roles_but_lists_delivered_ones() {
        let records = (0..5)
            .map(|i| record(&format!("Product Manager {i}"), &format!("https://x/{i}"), 70 + i))
            .collect();
        let text = render_text(&digest(records, 2)).unwrap();
        assert!(text.starts_with("Daily job digest (last 24 hours).\n"));
        assert!(text.contains("Roles found: 5"));
        assert!(text.contains(
            "\n\nTop pick:\n- Product Manager 4 | Monzo | today | Source Lever | Fit 74%\n"
        ));
        assert!(text.contains("  Link: https://x/3"));
        assert!(!text.contains("Product Manager 2 |"));
    }

    #[tokio::test]
    async fn sink_writes_both_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EmailBodySink::new(dir.path())
            .deliver(&digest(vec![record("Product Manager", "https://x/1", 80)], 12))
            .await
            .unwrap();
        assert_eq!(
            paths,
            vec![
                dir.path().join("digest_2026-02-24.html"),
                dir.path().join("digest_2026-02-24.txt"),
            ]
        );
        assert!(std::fs::read_to_string(&paths[1]).unwrap().contains("Fit 80%"));
        assert_eq!(subject("2026-02-24"), "Daily Job Digest - 2026-02-24");
    }
}
