//! Optional re-scoring pass over the best records, driven by an external text model.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use jobdigest_core::JobRecord;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::config::DigestConfig;
use crate::scoring::ENRICHED_SCORE_CAP;

#[async_trait]
pub trait EnrichmentHook: Send + Sync {
    async fn apply(&self, records: Vec<JobRecord>) -> Result<Vec<JobRecord>>;
}

#[derive(Default)]
pub struct NoopEnrichmentHook;

#[async_trait]
impl EnrichmentHook for NoopEnrichmentHook {
    async fn apply(&self, records: Vec<JobRecord>) -> Result<Vec<JobRecord>> {
        Ok(records)
    }
}

/// Anything that turns a prompt into free text: a hosted model, a local one, a test double.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Asks a completion model to re-score each record and fill in notes. A record whose call
/// fails or whose reply holds no JSON object is left as it was.
pub struct ModelEnrichmentHook<C> {
    client: C,
    profile: String,
    preferences: String,
    pause: Duration,
}

impl<C: CompletionClient> ModelEnrichmentHook<C> {
    pub fn new(client: C, profile: impl Into<String>, preferences: impl Into<String>) -> Self {
        Self {
            client,
            profile: profile.into(),
            preferences: preferences.into(),
            pause: Duration::from_millis(250),
        }
    }

    /// Uses the configured candidate profile and preferences.
    pub fn from_config(client: C, config: &DigestConfig) -> Self {
        Self::new(client, config.profile.clone(), config.preferences.clone())
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

#[async_trait]
impl<C: CompletionClient> EnrichmentHook for ModelEnrichmentHook<C> {
    async fn apply(&self, mut records: Vec<JobRecord>) -> Result<Vec<JobRecord>> {
        let mut enriched = 0usize;
        for (idx, record) in records.iter_mut().enumerate() {
            if idx > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            let prompt = build_enrichment_prompt(record, &self.profile, &self.preferences);
            let reply = match self.client.complete(&prompt).await {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(link = %record.link, error = %err, "enrichment call failed; keeping heuristic notes");
                    continue;
                }
            };
            match extract_json_object(&reply) {
                Some(payload) => {
                    apply_enrichment_payload(record, &payload);
                    enriched += 1;
                }
                None => debug!(link = %record.link, "enrichment reply held no json object"),
            }
        }
        info!(enriched, total = records.len(), "enrichment pass finished");
        Ok(records)
    }
}

pub fn build_enrichment_prompt(record: &JobRecord, profile: &str, preferences: &str) -> String {
    format!(
        "You are a senior UK fintech product recruiter. Given the candidate profile and job \
         summary, score fit 0-100 and produce concise notes. Return JSON ONLY with keys: \
         fit_score (int), why_fit (string), cv_gap (string), prep_questions (array of 3-5 \
         strings), apply_tips (string).\n\n\
         Candidate profile: {profile}\n\
         Preferences: {preferences}\n\n\
         Job:\n\
         Title: {}\n\
         Company: {}\n\
         Location: {}\n\
         Posted: {}\n\
         Notes: {}\n",
        record.role, record.company, record.location, record.posted, record.notes
    )
}

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json object pattern"));

/// Pulls the outermost `{...}` span out of free text and parses it.
pub fn extract_json_object(text: &str) -> Option<JsonValue> {
    let span = JSON_OBJECT.find(text)?;
    match serde_json::from_str::<JsonValue>(span.as_str()) {
        Ok(value @ JsonValue::Object(_)) => Some(value),
        _ => None,
    }
}

/// Merges a model reply into `record`. Missing, blank or mistyped fields keep the current
/// value; the score is clamped to 0-100.
pub fn apply_enrichment_payload(record: &mut JobRecord, payload: &JsonValue) {
    if let Some(score) = payload.get("fit_score").and_then(score_value) {
        record.fit_score = score.clamp(0, i64::from(ENRICHED_SCORE_CAP)) as u32;
    }
    if let Some(text) = non_blank(payload.get("why_fit")) {
        record.why_fit = text;
    }
    if let Some(text) = non_blank(payload.get("cv_gap")) {
        record.cv_gap = text;
    }
    match payload.get("prep_questions") {
        Some(JsonValue::String(question)) => {
            record.prep_questions = clean_questions(std::iter::once(question.clone()));
        }
        Some(JsonValue::Array(items)) => {
            record.prep_questions = clean_questions(items.iter().map(|item| match item {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            }));
        }
        _ => {}
    }
    if let Some(text) = non_blank(payload.get("apply_tips")) {
        record.apply_tips = text;
    }
}

fn score_value(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_blank(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(ToString::to_string)
}

fn clean_questions(items: impl Iterator<Item = String>) -> Vec<String> {
    items
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}
