//! Run configuration, read once from the environment and passed down by reference.

use std::path::PathBuf;

use chrono_tz::Tz;
use jobdigest_adapters::{parse_board_list, Credentials, SourceKind};
use jobdigest_storage::DEFAULT_USER_AGENT;
use tracing::warn;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::London;
pub const DEFAULT_SCHEDULE_CRON: &str = "0 */5 * * * *";
pub const DEFAULT_PREFERENCES: &str = "London or remote UK · Product/Platform roles · \
     KYC/AML/Onboarding/Sanctions/Screening · Min fit 70%";
pub const DEFAULT_PROFILE: &str = "Global product/process owner with KYC, onboarding, screening, \
     financial crime, and compliance transformation experience across banks and RegTech platforms.";

#[derive(Debug, Clone)]
pub struct DigestConfig {
    pub base_dir: PathBuf,
    pub digest_dir: PathBuf,
    pub timezone: Tz,
    pub window_hours: i64,
    pub min_score: u32,
    pub max_email_roles: usize,
    pub preferences: String,
    pub profile: String,
    pub sources_summary_override: Option<String>,
    pub seen_cache_path: PathBuf,
    pub seen_cache_days: i64,
    pub run_at: Option<String>,
    pub run_window_minutes: i64,
    pub run_state_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub enrich_max_jobs: usize,
    pub schedule_cron: String,
    pub workspace_root: PathBuf,
    pub credentials: Credentials,
    /// Boards appended to the registry's ATS sources, per kind.
    pub extra_boards: Vec<(SourceKind, Vec<String>)>,
}

impl DigestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset and unparseable
    /// numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let first = |keys: &[&str]| keys.iter().find_map(|key| get(*key));

        let base_dir = get("JOB_DIGEST_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./roles"));
        let digest_dir = base_dir.join("digests");

        let timezone = match get("JOB_DIGEST_TZ") {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                warn!(timezone = %name, fallback = %DEFAULT_TIMEZONE, "unknown timezone; using default");
                DEFAULT_TIMEZONE
            }),
            None => DEFAULT_TIMEZONE,
        };

        let credentials = Credentials {
            adzuna_app_id: first(&["ADZUNA_APP_ID", "JOB_DIGEST_ADZUNA_APP_ID"]),
            adzuna_app_key: first(&["ADZUNA_APP_KEY", "JOB_DIGEST_ADZUNA_APP_KEY"]),
            jooble_api_key: first(&["JOOBLE_API_KEY", "JOB_DIGEST_JOOBLE_KEY"]),
            reed_api_key: first(&["REED_API_KEY", "JOB_DIGEST_REED_KEY"]),
            cvlibrary_api_key: first(&["CV_LIBRARY_API_KEY", "JOB_DIGEST_CVLIB_KEY"]),
        };

        let extra_boards = [
            (SourceKind::Greenhouse, &["JOB_DIGEST_GREENHOUSE_BOARDS"][..]),
            (SourceKind::Lever, &["JOB_DIGEST_LEVER_BOARDS"][..]),
            (
                SourceKind::Smartrecruiters,
                &["JOB_DIGEST_SMARTRECRUITERS_BOARDS", "JOB_DIGEST_SMARTRECRUITERS"][..],
            ),
            (SourceKind::Ashby, &["JOB_DIGEST_ASHBY_BOARDS"][..]),
        ]
        .into_iter()
        .filter_map(|(kind, keys)| {
            let boards = parse_board_list(&first(keys)?);
            (!boards.is_empty()).then_some((kind, boards))
        })
        .collect();

        Self {
            seen_cache_path: get("JOB_DIGEST_SEEN_CACHE")
                .map(PathBuf::from)
                .unwrap_or_else(|| digest_dir.join("sent_links.json")),
            run_state_path: get("JOB_DIGEST_RUN_STATE")
                .map(PathBuf::from)
                .unwrap_or_else(|| digest_dir.join("run_state.json")),
            base_dir,
            digest_dir,
            timezone,
            window_hours: parse_or(get("JOB_DIGEST_WINDOW_HOURS"), 24),
            min_score: parse_or(get("JOB_DIGEST_MIN_SCORE"), 70),
            max_email_roles: parse_or(get("JOB_DIGEST_MAX_EMAIL_ROLES"), 12),
            preferences: get("JOB_DIGEST_PREFERENCES")
                .unwrap_or_else(|| DEFAULT_PREFERENCES.to_string()),
            profile: get("JOB_DIGEST_PROFILE").unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            sources_summary_override: get("JOB_DIGEST_SOURCES"),
            seen_cache_days: parse_or(get("JOB_DIGEST_SEEN_CACHE_DAYS"), 14),
            run_at: get("JOB_DIGEST_RUN_AT"),
            run_window_minutes: parse_or(get("JOB_DIGEST_RUN_WINDOW_MINUTES"), 20),
            user_agent: get("JOB_DIGEST_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: parse_or(get("JOB_DIGEST_HTTP_TIMEOUT_SECS"), 20),
            enrich_max_jobs: parse_or(get("JOB_DIGEST_ENRICH_MAX_JOBS"), 20),
            schedule_cron: get("JOB_DIGEST_SCHEDULE_CRON")
                .unwrap_or_else(|| DEFAULT_SCHEDULE_CRON.to_string()),
            workspace_root: get("JOB_DIGEST_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            credentials,
            extra_boards,
        }
    }

    /// Points every output path at `base_dir`, keeping other settings.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self.digest_dir = self.base_dir.join("digests");
        self.seen_cache_path = self.digest_dir.join("sent_links.json");
        self.run_state_path = self.digest_dir.join("run_state.json");
        self
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> DigestConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DigestConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = DigestConfig::default();
        assert_eq!(config.base_dir, PathBuf::from("./roles"));
        assert_eq!(config.seen_cache_path, PathBuf::from("./roles/digests/sent_links.json"));
        assert_eq!(config.run_state_path, PathBuf::from("./roles/digests/run_state.json"));
        assert_eq!(config.timezone, chrono_tz::Europe::London);
        assert_eq!(config.window_hours, 24);
        assert_eq!(config.min_score, 70);
        assert_eq!(config.max_email_roles, 12);
        assert_eq!(config.seen_cache_days, 14);
        assert_eq!(config.run_window_minutes, 20);
        assert_eq!(config.enrich_max_jobs, 20);
        assert_eq!(config.schedule_cron, DEFAULT_SCHEDULE_CRON);
        assert!(config.run_at.is_none());
        assert!(config.extra_boards.is_empty());
    }

    #[test]
    fn unparseable_numbers_and_timezones_fall_back() {
        let config = config_from(&[
            ("JOB_DIGEST_WINDOW_HOURS", "a day"),
            ("JOB_DIGEST_MIN_SCORE", "75"),
            ("JOB_DIGEST_TZ", "Mars/Olympus"),
            ("JOB_DIGEST_RUN_AT", "  "),
        ]);
        assert_eq!(config.window_hours, 24);
        assert_eq!(config.min_score, 75);
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert!(config.run_at.is_none());
    }

    #[test]
    fn credentials_accept_prefixed_aliases() {
        let config = config_from(&[
            ("JOB_DIGEST_ADZUNA_APP_ID", "id"),
            ("ADZUNA_APP_KEY", "key"),
            ("JOB_DIGEST_REED_KEY", "reed"),
        ]);
        assert_eq!(config.credentials.adzuna_app_id.as_deref(), Some("id"));
        assert_eq!(config.credentials.adzuna_app_key.as_deref(), Some("key"));
        assert_eq!(config.credentials.reed_api_key.as_deref(), Some("reed"));
        assert!(config.credentials.jooble_api_key.is_none());
    }

    #[test]
    fn extra_boards_are_parsed_per_kind() {
        let config = config_from(&[
            ("JOB_DIGEST_LEVER_BOARDS", "acme, beta,,acme"),
            ("JOB_DIGEST_SMARTRECRUITERS", "Visa"),
        ]);
        assert_eq!(
            config.extra_boards,
            vec![
                (SourceKind::Lever, vec!["acme".to_string(), "beta".into(), "acme".into()]),
                (SourceKind::Smartrecruiters, vec!["Visa".to_string()]),
            ]
        );
    }

    #[test]
    fn base_dir_moves_state_paths() {
        let config = config_from(&[("JOB_DIGEST_BASE_DIR", "/tmp/jd")]);
        assert_eq!(config.digest_dir, PathBuf::from("/tmp/jd/digests"));
        assert_eq!(config.seen_cache_path, PathBuf::from("/tmp/jd/digests/sent_links.json"));
    }
}
