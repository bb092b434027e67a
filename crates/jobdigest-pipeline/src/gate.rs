//! Once-per-day run guard keyed on a configured local run time.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use jobdigest_storage::{load_string_map, write_json_atomic, StateError};
use serde::Serialize;

pub const LAST_RUN_DATE_KEY: &str = "last_run_date";
const LOCAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Persisted run bookkeeping. Unknown keys are preserved on save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    entries: BTreeMap<String, String>,
}

impl RunState {
    pub async fn load(path: impl AsRef<Path>) -> Self {
        Self {
            entries: load_string_map(path).await,
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StateError> {
        write_json_atomic(path, &self.entries).await
    }

    pub fn last_run_date(&self) -> Option<&str> {
        self.entries.get(LAST_RUN_DATE_KEY).map(String::as_str)
    }

    pub fn mark_ran(&mut self, local_date: impl Into<String>) {
        self.entries
            .insert(LAST_RUN_DATE_KEY.to_string(), local_date.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// No run time configured: every invocation runs.
    Unscheduled,
    /// The configured run time does not parse; runs are never blocked by misconfiguration.
    InvalidRunAt { run_at: String },
    Due { local_date: String },
    OutsideWindow { minutes_away: i64 },
    AlreadyRan { local_date: String },
}

impl GateDecision {
    pub fn should_run(&self) -> bool {
        matches!(
            self,
            Self::Unscheduled | Self::InvalidRunAt { .. } | Self::Due { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunGate {
    run_at: Option<String>,
    window_minutes: i64,
    timezone: Tz,
}

impl RunGate {
    pub fn new(run_at: Option<String>, window_minutes: i64, timezone: Tz) -> Self {
        Self {
            run_at,
            window_minutes,
            timezone,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.run_at.is_some()
    }

    /// Calendar date in the configured timezone, as stored in `last_run_date`.
    pub fn local_date(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.timezone)
            .format(LOCAL_DATE_FORMAT)
            .to_string()
    }

    pub fn decide(&self, now: DateTime<Utc>, state: &RunState) -> GateDecision {
        let Some(run_at) = self.run_at.as_deref() else {
            return GateDecision::Unscheduled;
        };
        let Some(target) = parse_run_at(run_at) else {
            return GateDecision::InvalidRunAt {
                run_at: run_at.to_string(),
            };
        };

        // Wall-clock difference against today's target, as a person reading the clock would.
        let local_now = now.with_timezone(&self.timezone).naive_local();
        let target_today = local_now.date().and_time(target);
        let seconds_away = (local_now - target_today).num_seconds().abs();
        if seconds_away > self.window_minutes.saturating_mul(60) {
            return GateDecision::OutsideWindow {
                minutes_away: seconds_away / 60,
            };
        }

        let local_date = self.local_date(now);
        if state.last_run_date() == Some(local_date.as_str()) {
            return GateDecision::AlreadyRan { local_date };
        }
        GateDecision::Due { local_date }
    }

    pub fn should_run_at(&self, now: DateTime<Utc>, state: &RunState) -> bool {
        self.decide(now, state).should_run()
    }
}

/// Parses `HH:MM` (24h). Anything else is rejected.
pub fn parse_run_at(raw: &str) -> Option<NaiveTime> {
    let (hour, minute) = raw.trim().split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn london(h: u32, m: u32) -> DateTime<Utc> {
        chrono_tz::Europe::London
            .with_ymd_and_hms(2026, 7, 14, h, m, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn gate(run_at: Option<&str>) -> RunGate {
        RunGate::new(run_at.map(String::from), 20, chrono_tz::Europe::London)
    }

    #[test]
    fn unscheduled_always_runs() {
        let mut state = RunState::default();
        state.mark_ran("2026-07-14");
        assert_eq!(gate(None).decide(london(3, 0), &state), GateDecision::Unscheduled);
        assert!(gate(None).should_run_at(london(3, 0), &state));
    }

    #[test]
    fn inside_window_without_prior_run_is_due() {
        let decision = gate(Some("09:00")).decide(london(9, 15), &RunState::default());
        assert_eq!(
            decision,
            GateDecision::Due {
                local_date: "2026-07-14".into()
            }
        );
        assert!(gate(Some("09:00")).should_run_at(london(8, 41), &RunState::default()));
    }

    #[test]
    fn already_ran_today_blocks() {
        let mut state = RunState::default();
        state.mark_ran("2026-07-14");
        assert!(!gate(Some("09:00")).should_run_at(london(9, 15), &state));

        state.mark_ran("2026-07-13");
        assert!(gate(Some("09:00")).should_run_at(london(9, 15), &state));
    }

    #[test]
    fn outside_window_blocks() {
        assert_eq!(
            gate(Some("09:00")).decide(london(9, 21), &RunState::default()),
            GateDecision::OutsideWindow { minutes_away: 21 }
        );
        assert!(!gate(Some("09:00")).should_run_at(london(17, 0), &RunState::default()));
    }

    #[test]
    fn local_time_uses_configured_timezone() {
        // 09:10 in London during BST is 08:10 UTC.
        let now = Utc.with_ymd_and_hms(2026, 7, 14, 8, 10, 0).single().unwrap();
        assert!(gate(Some("09:00")).should_run_at(now, &RunState::default()));
        let utc_gate = RunGate::new(Some("09:00".into()), 20, chrono_tz::UTC);
        assert!(!utc_gate.should_run_at(now, &RunState::default()));
    }

    #[test]
    fn malformed_run_at_fails_open() {
        for raw in ["9am", "25:00", "09:00:00", ""] {
            let decision = gate(Some(raw)).decide(london(3, 0), &RunState::default());
            assert!(decision.should_run(), "{raw}");
        }
    }

    #[tokio::test]
    async fn run_state_round_trips_and_keeps_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");
        tokio::fs::write(&path, r#"{"last_run_date": "2026-07-13", "note": "manual"}"#)
            .await
            .unwrap();

        let mut state = RunState::load(&path).await;
        assert_eq!(state.last_run_date(), Some("2026-07-13"));
        state.mark_ran("2026-07-14");
        state.save(&path).await.unwrap();

        let reloaded = RunState::load(&path).await;
        assert_eq!(reloaded.last_run_date(), Some("2026-07-14"));
        assert_eq!(reloaded.entries.get("note").map(String::as_str), Some("manual"));
    }
}
