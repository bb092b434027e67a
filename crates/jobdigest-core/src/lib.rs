//! Core domain model for the job digest: raw connector postings and scored job records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "jobdigest-core";

/// Placeholder used when a connector cannot supply a location. It never matches the
/// location allow-list, so postings without a best-effort location are filtered out.
pub const UNKNOWN_LOCATION: &str = "Unspecified";

/// Maximum characters kept from a posting description.
pub const SUMMARY_MAX_CHARS: usize = 500;

/// Common shape every connector produces, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawPosting {
    pub title: String,
    pub company: String,
    pub location: String,
    /// Canonical URL with the query string stripped.
    pub link: String,
    /// Free-form relative time such as "3 hours ago". May be empty.
    pub posted_text: String,
    /// ISO-8601, RFC-2822 or epoch timestamp as supplied by the source. May be empty.
    pub posted_date: String,
    pub summary: String,
    pub source_name: String,
}

impl RawPosting {
    pub fn new(
        source_name: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            title: title.into(),
            company: company.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    pub fn with_posted_text(mut self, posted_text: impl Into<String>) -> Self {
        self.posted_text = posted_text.into();
        self
    }

    pub fn with_posted_date(mut self, posted_date: impl Into<String>) -> Self {
        self.posted_date = posted_date.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Normalizes whitespace, canonicalizes the link and enforces the connector-boundary
    /// invariant: postings without a title or company are rejected.
    pub fn validated(self) -> Option<Self> {
        let title = normalize_text(&self.title);
        let company = normalize_text(&self.company);
        if title.is_empty() || company.is_empty() {
            return None;
        }
        let location = match normalize_text(&self.location) {
            loc if loc.is_empty() => UNKNOWN_LOCATION.to_string(),
            loc => loc,
        };
        Some(Self {
            title,
            company,
            location,
            link: clean_link(self.link.trim()),
            posted_text: normalize_text(&self.posted_text),
            posted_date: self.posted_date.trim().to_string(),
            summary: truncate_chars(&normalize_text(&self.summary), SUMMARY_MAX_CHARS),
            source_name: self.source_name.trim().to_string(),
        })
    }

    /// Text the scorer and explanation builders look at.
    pub fn full_text(&self) -> String {
        format!("{} {} {}", self.title, self.company, self.summary)
    }

    /// Display value for the "posted" column: relative text when present, else the raw date.
    pub fn posted_display(&self) -> String {
        if self.posted_text.is_empty() {
            self.posted_date.clone()
        } else {
            self.posted_text.clone()
        }
    }
}

/// A posting that passed every gate, with its score and derived explanations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub role: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub posted: String,
    pub source: String,
    pub fit_score: u32,
    pub preference_match: String,
    pub why_fit: String,
    pub cv_gap: String,
    pub notes: String,
    #[serde(default)]
    pub prep_questions: Vec<String>,
    #[serde(default)]
    pub apply_tips: String,
}

impl JobRecord {
    pub fn has_link(&self) -> bool {
        !self.link.is_empty()
    }
}

/// Strips the query string (and fragment) from a URL.
pub fn clean_link(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or_default().to_string()
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Values above this are epoch milliseconds rather than seconds.
pub const EPOCH_MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Parses the timestamp formats sources hand us: ISO-8601 (with or without offset, naive
/// values are UTC), then RFC-2822, then Unix epoch seconds or milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    parse_iso8601(raw)
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| parse_epoch(raw))
}

fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let normalized = raw.replace('Z', "+00:00");
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%:z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: i64 = raw.parse().ok()?;
    if value > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validated_rejects_missing_title_or_company() {
        assert!(RawPosting::new("Lever", "", "Acme").validated().is_none());
        assert!(RawPosting::new("Lever", "Product Manager", "  ").validated().is_none());
    }

    #[test]
    fn validated_cleans_link_and_defaults_location() {
        let posting = RawPosting::new("Lever", "  Senior   Product Manager ", "Acme")
            .with_link("https://jobs.example.com/123?utm_source=x")
            .validated()
            .unwrap();
        assert_eq!(posting.title, "Senior Product Manager");
        assert_eq!(posting.link, "https://jobs.example.com/123");
        assert_eq!(posting.location, UNKNOWN_LOCATION);
    }

    #[test]
    fn summary_is_truncated_on_char_boundary() {
        let long = "é".repeat(SUMMARY_MAX_CHARS + 20);
        let posting = RawPosting::new("Remotive", "Product Lead", "Acme")
            .with_summary(long)
            .validated()
            .unwrap();
        assert_eq!(posting.summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn parses_iso_rfc2822_and_epoch_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T01:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01"), Some(expected));
        assert_eq!(
            parse_timestamp("Mon, 01 Jan 2024 00:00:00 +0000"),
            Some(expected)
        );
        assert_eq!(parse_timestamp("1704067200"), Some(expected));
        assert_eq!(parse_timestamp("1704067200000"), Some(expected));
        assert_eq!(parse_timestamp("last tuesday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
