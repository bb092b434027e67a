//! Final ranking, top pick and the payload handed to sinks.

use chrono::{DateTime, Utc};
use jobdigest_adapters::{Credentials, SourceKind, SourceRegistry};
use jobdigest_core::JobRecord;
use serde::Serialize;

use crate::dedup::rank_by_score;

/// Everything a renderer or exporter needs; no further pipeline state is required.
#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub generated_at: DateTime<Utc>,
    /// Calendar date in the display timezone, used in output file names.
    pub local_date: String,
    pub window_hours: i64,
    pub preferences: String,
    pub sources_summary: String,
    /// Full ranked set of new roles for this run.
    pub records: Vec<JobRecord>,
    /// Ranked, capped list for outward delivery. Always contains the top pick when there is one.
    pub delivered: Vec<JobRecord>,
    pub top_pick: Option<JobRecord>,
}

pub struct DigestMeta {
    pub generated_at: DateTime<Utc>,
    pub local_date: String,
    pub window_hours: i64,
    pub preferences: String,
    pub sources_summary: String,
}

impl Digest {
    pub fn assemble(mut records: Vec<JobRecord>, max_roles: usize, meta: DigestMeta) -> Self {
        rank_by_score(&mut records);
        let top_pick = select_top_pick(&records).cloned();
        let delivered = truncate_with_top_pick(&records, top_pick.as_ref(), max_roles);
        Self {
            generated_at: meta.generated_at,
            local_date: meta.local_date,
            window_hours: meta.window_hours,
            preferences: meta.preferences,
            sources_summary: meta.sources_summary,
            records,
            delivered,
            top_pick,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_top_pick(&self, record: &JobRecord) -> bool {
        self.top_pick.as_ref() == Some(record)
    }
}

/// Highest fit score; the first maximum wins ties.
pub fn select_top_pick(records: &[JobRecord]) -> Option<&JobRecord> {
    records.iter().fold(None, |best: Option<&JobRecord>, record| match best {
        Some(b) if b.fit_score >= record.fit_score => Some(b),
        _ => Some(record),
    })
}

/// First `max_roles` records, with the top pick prepended when it fell outside the cut.
pub fn truncate_with_top_pick(
    records: &[JobRecord],
    top_pick: Option<&JobRecord>,
    max_roles: usize,
) -> Vec<JobRecord> {
    let mut delivered: Vec<JobRecord> = records.iter().take(max_roles).cloned().collect();
    if let Some(pick) = top_pick {
        if !delivered.contains(pick) {
            delivered.insert(0, pick.clone());
            delivered.truncate(max_roles);
        }
    }
    delivered
}

/// One-line description of what was polled, plus credentialed APIs still waiting on keys.
pub fn build_sources_summary(
    registry: &SourceRegistry,
    credentials: &Credentials,
    override_summary: Option<&str>,
) -> String {
    if let Some(summary) = override_summary.filter(|s| !s.trim().is_empty()) {
        return summary.to_string();
    }

    let mut parts = Vec::new();
    if registry
        .enabled_sources()
        .any(|s| s.kind == SourceKind::Linkedin)
    {
        parts.push("LinkedIn (guest search + company search)".to_string());
    }

    let boards: Vec<&str> = registry
        .enabled_sources()
        .filter(|s| s.kind.is_job_board())
        .map(|s| s.display_name.as_str())
        .collect();
    parts.push(format!("Job boards ({}): {}", boards.len(), boards.join(", ")));

    let ats = [
        ("Greenhouse", SourceKind::Greenhouse),
        ("Lever", SourceKind::Lever),
        ("SmartRecruiters", SourceKind::Smartrecruiters),
        ("Ashby", SourceKind::Ashby),
    ]
    .iter()
    .map(|(name, kind)| format!("{name} ({})", registry.board_count(*kind)))
    .collect::<Vec<_>>();
    parts.push(format!("ATS boards: {}", ats.join(", ")));

    let mut summary = parts.join(" · ");
    let pending: Vec<&str> = registry
        .enabled_sources()
        .filter(|s| s.credential.is_some_and(|c| !credentials.has(c)))
        .map(|s| s.display_name.as_str())
        .collect();
    if !pending.is_empty() {
        summary.push_str(&format!(" · APIs pending: {}", pending.join(", ")));
    }
    summary
}
