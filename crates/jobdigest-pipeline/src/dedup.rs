//! Cross-source identity resolution by canonical link.

use std::collections::HashSet;

use jobdigest_core::JobRecord;

/// Stable descending sort by fit score; ties keep their input order.
pub fn rank_by_score(records: &mut [JobRecord]) {
    records.sort_by(|a, b| b.fit_score.cmp(&a.fit_score));
}

/// Keeps one record per canonical link, the highest-scoring one. Records without a link cannot
/// be identified and are always kept. The output is ranked.
pub fn dedupe_by_link(mut records: Vec<JobRecord>) -> Vec<JobRecord> {
    rank_by_score(&mut records);
    let mut seen = HashSet::new();
    records.retain(|record| !record.has_link() || seen.insert(record.link.clone()));
    records
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(link: &str, score: u32, source: &str) -> JobRecord {
        JobRecord {
            role: "Senior Product Manager".into(),
            company: "Acme".into(),
            location: "London".into(),
            link: link.into(),
            posted: "today".into(),
            source: source.into(),
            fit_score: score,
            preference_match: String::new(),
            why_fit: String::new(),
            cv_gap: String::new(),
            notes: String::new(),
            prep_questions: Vec::new(),
            apply_tips: String::new(),
        }
    }

    #[test]
    fn highest_score_wins_on_collision() {
        let out = dedupe_by_link(vec![
            record("https://x/1", 72, "Lever"),
            record("https://x/1", 88, "LinkedIn"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fit_score, 88);
        assert_eq!(out[0].source, "LinkedIn");
    }

    #[test]
    fn ties_keep_first_seen() {
        let out = dedupe_by_link(vec![
            record("https://x/1", 80, "Greenhouse"),
            record("https://x/2", 90, "Ashby"),
            record("https://x/1", 80, "LinkedIn"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].link, "https://x/2");
        assert_eq!(out[1].source, "Greenhouse");
    }

    #[test]
    fn empty_links_are_never_merged() {
        let out = dedupe_by_link(vec![
            record("", 75, "Reed"),
            record("", 75, "Jooble"),
            record("https://x/1", 70, "Lever"),
        ]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            record("https://x/1", 72, "a"),
            record("https://x/2", 81, "b"),
            record("https://x/1", 88, "c"),
            record("", 70, "d"),
            record("https://x/3", 81, "e"),
            record("https://x/2", 90, "f"),
        ];
        let once = dedupe_by_link(input);
        let twice = dedupe_by_link(once.clone());
        assert_eq!(once, twice);
        assert_eq!(
            once.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
            vec!["f", "c", "e", "d"]
        );
    }
}
