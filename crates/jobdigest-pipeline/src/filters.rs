//! Relevance and recency gates applied to every raw posting.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use jobdigest_core::parse_timestamp;
use regex::Regex;

pub const EXCLUDE_TITLE_TERMS: &[&str] = &["growth"];

pub const ROLE_TITLE_REQUIREMENTS: &[&str] = &[
    "manager",
    "owner",
    "lead",
    "principal",
    "head",
    "director",
    "specialist",
    "strategy",
    "operations",
    "management",
    "vp",
];

pub const LOCATION_TERMS: &[&str] = &["london", "united kingdom", "remote", "hybrid"];

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("number pattern"));

/// A title qualifies only if it names a product role, avoids every excluded term and carries
/// at least one seniority or function token.
pub fn is_relevant_title(title: &str) -> bool {
    let title = title.to_lowercase();
    title.contains("product")
        && !EXCLUDE_TITLE_TERMS.iter().any(|term| title.contains(term))
        && ROLE_TITLE_REQUIREMENTS.iter().any(|term| title.contains(term))
}

pub fn is_relevant_location(location: &str) -> bool {
    let location = location.to_lowercase();
    LOCATION_TERMS.iter().any(|term| location.contains(term))
}

/// Decides whether a posting is fresh enough. Relative text wins over the absolute date; a
/// posting with neither a recognised phrase nor a parseable date is treated as stale.
pub fn within_window(
    posted_text: &str,
    posted_date: &str,
    window_hours: i64,
    now: DateTime<Utc>,
) -> bool {
    let text = posted_text.trim().to_lowercase();
    if text.contains("just now") || text.contains("today") {
        return true;
    }
    if text.contains("yesterday") {
        return window_hours >= 24;
    }

    let number = FIRST_NUMBER
        .find(&text)
        .and_then(|m| m.as_str().parse::<i64>().ok());

    // "min" also covers "mins ago" and "30 min".
    if text.contains("minute") || text.contains("min") {
        return true;
    }
    if let Some(n) = number {
        if text.contains("hour") {
            return n <= window_hours;
        }
        if text.contains("day") {
            return n.saturating_mul(24) <= window_hours;
        }
        if text.contains("week") {
            return n.saturating_mul(7 * 24) <= window_hours;
        }
    }

    match parse_timestamp(posted_date) {
        // A window too large to represent covers every date.
        Some(posted_at) => Duration::try_hours(window_hours)
            .map_or(true, |window| now - posted_at <= window),
        None => false,
    }
}
