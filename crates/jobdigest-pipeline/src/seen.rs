//! Links delivered in earlier digests, kept for a retention window to suppress resends.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jobdigest_core::{parse_timestamp, JobRecord};
use jobdigest_storage::{load_string_map, write_json_atomic, StateError};

/// Canonical link to the RFC 3339 time it was last delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenCache {
    entries: BTreeMap<String, String>,
}

impl SeenCache {
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// A missing or malformed file yields an empty cache; non-string entries are dropped.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        Self::from_entries(load_string_map(path).await)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StateError> {
        write_json_atomic(path, &self.entries).await
    }

    /// Drops entries older than `max_age_days` or with an unparseable timestamp. Surviving
    /// timestamps are normalized to UTC. A retention too large to represent keeps every
    /// parseable entry.
    pub fn prune(self, max_age_days: i64, now: DateTime<Utc>) -> Self {
        let cutoff = Duration::try_days(max_age_days).and_then(|age| now.checked_sub_signed(age));
        let entries = self
            .entries
            .into_iter()
            .filter_map(|(link, ts)| {
                let delivered_at = parse_timestamp(&ts)?;
                cutoff
                    .map_or(true, |cutoff| delivered_at >= cutoff)
                    .then(|| (link, delivered_at.to_rfc3339()))
            })
            .collect();
        Self { entries }
    }

    /// Records whose link was already delivered are dropped; linkless records always pass.
    pub fn filter_new(&self, records: Vec<JobRecord>) -> Vec<JobRecord> {
        records
            .into_iter()
            .filter(|record| !record.has_link() || !self.entries.contains_key(&record.link))
            .collect()
    }

    pub fn record_delivered<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a JobRecord>,
        now: DateTime<Utc>,
    ) {
        let stamp = now.to_rfc3339();
        for record in records.into_iter().filter(|r| r.has_link()) {
            self.entries.insert(record.link.clone(), stamp.clone());
        }
    }

    pub fn contains(&self, link: &str) -> bool {
        self.entries.contains_key(link)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::dedup::tests::record;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap()
    }

    fn cache(pairs: &[(&str, String)]) -> SeenCache {
        SeenCache::from_entries(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn retention_window_decides_survival() {
        let eleven_days_ago = (now() - Duration::days(11)).to_rfc3339();
        let seen = cache(&[("https://x/1", eleven_days_ago)]);
        assert!(seen.clone().prune(14, now()).contains("https://x/1"));
        assert!(seen.prune(10, now()).is_empty());
    }

    #[test]
    fn prune_drops_unparseable_and_assumes_utc_for_naive() {
        let seen = cache(&[
            ("https://x/bad", "yesterday-ish".to_string()),
            ("https://x/naive", "2026-02-23T12:00:00".to_string()),
            ("https://x/offset", "2026-02-23T13:00:00+01:00".to_string()),
        ]);
        let pruned = seen.prune(14, now());
        assert_eq!(pruned.len(), 2);
        assert_eq!(pruned.entries()["https://x/naive"], "2026-02-23T12:00:00+00:00");
        assert_eq!(pruned.entries()["https://x/offset"], "2026-02-23T12:00:00+00:00");
    }

    #[test]
    fn oversized_retention_keeps_every_parseable_entry() {
        let seen = cache(&[
            ("https://x/old", "2001-01-01T00:00:00Z".to_string()),
            ("https://x/bad", "not a time".to_string()),
        ]);
        for days in [i64::MAX, 200_000_000] {
            let pruned = seen.clone().prune(days, now());
            assert_eq!(pruned.len(), 1, "{days}");
            assert!(pruned.contains("https://x/old"));
        }
    }

    #[test]
    fn filter_new_drops_seen_links_but_keeps_linkless() {
        let seen = cache(&[("https://x/1", now().to_rfc3339())]);
        let out = seen.filter_new(vec![
            record("https://x/1", 80, "a"),
            record("https://x/2", 80, "b"),
            record("", 80, "c"),
        ]);
        assert_eq!(
            out.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[tokio::test]
    async fn save_then_load_round_trips_without_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digests").join("sent_links.json");

        let mut seen = SeenCache::default();
        let delivered = [record("https://x/1", 80, "a"), record("https://x/2", 75, "b"), record("", 70, "c")];
        seen.record_delivered(&delivered, now());
        assert_eq!(seen.len(), 2);
        seen.save(&path).await.unwrap();

        let loaded = SeenCache::load(&path).await;
        assert_eq!(loaded, seen.clone().prune(36_500, now()));
        assert_eq!(loaded.clone().prune(14, now()), loaded);
    }

    #[tokio::test]
    async fn missing_or_malformed_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SeenCache::load(dir.path().join("absent.json")).await.is_empty());

        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(SeenCache::load(&path).await.is_empty());

        tokio::fs::write(&path, r#"{"https://x/1": "2026-02-24T00:00:00+00:00", "n": 5}"#)
            .await
            .unwrap();
        assert_eq!(SeenCache::load(&path).await.len(), 1);
    }
}
