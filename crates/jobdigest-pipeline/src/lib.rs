//! Digest pipeline orchestration: poll every source, filter, score, dedupe, suppress resends,
//! rank and deliver, then commit state only when delivery succeeded.

pub mod config;
pub mod dedup;
pub mod digest;
pub mod enrichment;
pub mod export;
pub mod filters;
pub mod gate;
pub mod scoring;
pub mod seen;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobdigest_adapters::{
    connector_for_source, AdapterContext, SourceConnector, SourceKind, SourceRegistry,
};
use jobdigest_core::{JobRecord, RawPosting};
use jobdigest_storage::{HttpClientConfig, HttpFetcher};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use config::DigestConfig;
pub use dedup::{dedupe_by_link, rank_by_score};
pub use digest::{build_sources_summary, select_top_pick, truncate_with_top_pick, Digest, DigestMeta};
pub use enrichment::{
    apply_enrichment_payload, extract_json_object, CompletionClient, EnrichmentHook,
    ModelEnrichmentHook, NoopEnrichmentHook,
};
pub use export::{DigestSink, JsonReportSink, ParquetSink};
pub use filters::{is_relevant_location, is_relevant_title, within_window};
pub use gate::{GateDecision, RunGate, RunState};
pub use scoring::{build_gaps, build_preference_match, build_reasons, score_fit, FitScore};
pub use seen::SeenCache;

pub const CRATE_NAME: &str = "jobdigest-pipeline";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run every stage and sink but never commit the seen cache or run state.
    pub dry_run: bool,
    /// Bypass the run gate.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub display_name: String,
    pub kind: SourceKind,
    pub status: SourceStatus,
    pub postings: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run gate or an in-flight run prevented this one.
    Skipped,
    Delivered,
    /// At least one sink failed; state was not committed.
    DeliveryFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub gate: GateDecision,
    pub sources: Vec<SourceOutcome>,
    pub fetched_postings: usize,
    pub qualified_records: usize,
    pub unique_records: usize,
    pub new_records: usize,
    pub delivered_records: usize,
    pub top_pick: Option<String>,
    pub outputs: Vec<String>,
    pub sink_failures: Vec<String>,
    pub state_committed: bool,
}

pub struct DigestPipeline {
    config: DigestConfig,
    registry: SourceRegistry,
    http: HttpFetcher,
    connectors: Vec<Box<dyn SourceConnector>>,
    enrichment: Box<dyn EnrichmentHook>,
    sinks: Vec<Box<dyn DigestSink>>,
    run_lock: Mutex<()>,
}

impl DigestPipeline {
    /// Loads the source registry from the workspace root, appends configured extra boards and
    /// builds a connector for every enabled source. Sinks default to the JSON report and the
    /// Parquet export in the digest directory.
    pub fn new(config: DigestConfig) -> Result<Self> {
        let mut registry = SourceRegistry::load(&config.workspace_root)?;
        for (kind, boards) in &config.extra_boards {
            registry.append_boards(*kind, boards);
        }
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let connectors: Vec<Box<dyn SourceConnector>> = registry
            .enabled_sources()
            .filter_map(|source| connector_for_source(source, &registry))
            .collect();
        let sinks: Vec<Box<dyn DigestSink>> = vec![
            Box::new(JsonReportSink::new(config.digest_dir.clone())),
            Box::new(ParquetSink::new(config.digest_dir.clone())),
        ];
        Ok(Self {
            config,
            registry,
            http,
            connectors,
            enrichment: Box::<NoopEnrichmentHook>::default(),
            sinks,
            run_lock: Mutex::new(()),
        })
    }

    pub fn with_enrichment(mut self, enrichment: Box<dyn EnrichmentHook>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn DigestSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_sinks(mut self, sinks: Vec<Box<dyn DigestSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_connectors(mut self, connectors: Vec<Box<dyn SourceConnector>>) -> Self {
        self.connectors = connectors;
        self
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn sources_summary(&self) -> String {
        build_sources_summary(
            &self.registry,
            &self.config.credentials,
            self.config.sources_summary_override.as_deref(),
        )
    }

    pub fn run_gate(&self) -> RunGate {
        RunGate::new(
            self.config.run_at.clone(),
            self.config.run_window_minutes,
            self.config.timezone,
        )
    }

    pub async fn run_once(&self, options: RunOptions) -> Result<RunSummary> {
        self.run_at(options, Utc::now()).await
    }

    /// One full pipeline pass evaluated as of `now`.
    pub async fn run_at(&self, options: RunOptions, now: DateTime<Utc>) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let mut summary = RunSummary::new(run_id, now);

        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!(%run_id, "a digest run is already in progress; skipping");
            return Ok(summary.finish(RunStatus::Skipped));
        };

        let gate = self.run_gate();
        let run_state = RunState::load(&self.config.run_state_path).await;
        summary.gate = gate.decide(now, &run_state);
        if !options.force && !summary.gate.should_run() {
            info!(%run_id, gate = ?summary.gate, "run gate closed; skipping");
            return Ok(summary.finish(RunStatus::Skipped));
        }

        let ctx = self.adapter_context(run_id, now, true);
        let (postings, outcomes) = self.collect_postings(&ctx).await;
        summary.sources = outcomes;
        summary.fetched_postings = postings.len();

        let qualified: Vec<JobRecord> = postings
            .iter()
            .filter_map(|posting| {
                evaluate_posting(posting, self.config.window_hours, self.config.min_score, now)
            })
            .collect();
        summary.qualified_records = qualified.len();

        let unique = dedupe_by_link(qualified);
        summary.unique_records = unique.len();

        let mut seen = SeenCache::load(&self.config.seen_cache_path)
            .await
            .prune(self.config.seen_cache_days, now);
        let mut records = seen.filter_new(unique);
        rank_by_score(&mut records);
        summary.new_records = records.len();

        let mut records = self.enrich(records).await;
        rank_by_score(&mut records);

        let digest = Digest::assemble(
            records,
            self.config.max_email_roles,
            DigestMeta {
                generated_at: now,
                local_date: gate.local_date(now),
                window_hours: self.config.window_hours,
                preferences: self.config.preferences.clone(),
                sources_summary: self.sources_summary(),
            },
        );
        summary.delivered_records = digest.delivered.len();
        summary.top_pick = digest
            .top_pick
            .as_ref()
            .map(|r| format!("{} @ {} ({}%)", r.role, r.company, r.fit_score));

        for sink in &self.sinks {
            match sink.deliver(&digest).await {
                Ok(paths) => summary
                    .outputs
                    .extend(paths.iter().map(|p| p.display().to_string())),
                Err(err) => {
                    error!(%run_id, sink = sink.name(), error = %format!("{err:#}"), "digest delivery failed");
                    summary.sink_failures.push(format!("{}: {err:#}", sink.name()));
                }
            }
        }
        if !summary.sink_failures.is_empty() {
            warn!(%run_id, "delivery incomplete; seen cache and run state left untouched");
            return Ok(summary.finish(RunStatus::DeliveryFailed));
        }

        if options.dry_run {
            info!(%run_id, "dry run; state not committed");
        } else {
            summary.state_committed = self
                .commit_state(&mut seen, &digest, run_state, &gate, now)
                .await;
        }

        info!(
            %run_id,
            fetched = summary.fetched_postings,
            qualified = summary.qualified_records,
            new = summary.new_records,
            delivered = summary.delivered_records,
            "digest run complete"
        );
        Ok(summary.finish(RunStatus::Delivered))
    }

    /// Polls every connector once without filtering and reports raw counts.
    pub async fn smoke_test(&self) -> Vec<SourceOutcome> {
        let ctx = self.adapter_context(Uuid::new_v4(), Utc::now(), false);
        let (_, outcomes) = self.collect_postings(&ctx).await;
        outcomes
    }

    /// Cron job that triggers a gated run; the gate decides whether anything happens.
    pub async fn build_scheduler(pipeline: Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = pipeline.config.schedule_cron.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once(RunOptions::default()).await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        status = ?summary.status,
                        "scheduled digest run finished"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled digest run failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }

    fn adapter_context(&self, run_id: Uuid, now: DateTime<Utc>, fetch_details: bool) -> AdapterContext {
        let ctx = AdapterContext::new(run_id, now)
            .with_exclude_companies(&self.registry.exclude_companies)
            .with_credentials(self.config.credentials.clone());
        if fetch_details {
            ctx.with_detail_filter(Arc::new(|posting: &RawPosting| {
                is_relevant_title(&posting.title) && is_relevant_location(&posting.location)
            }))
        } else {
            ctx.with_detail_filter(Arc::new(|_: &RawPosting| false))
        }
    }

    /// Sources are polled one after another; a failing source contributes nothing and the run
    /// carries on. Nothing downstream starts until every source has answered.
    async fn collect_postings(&self, ctx: &AdapterContext) -> (Vec<RawPosting>, Vec<SourceOutcome>) {
        let mut postings = Vec::new();
        let mut outcomes = Vec::with_capacity(self.connectors.len());
        for connector in &self.connectors {
            let source_id = connector.source_id().to_string();
            let outcome = match connector.fetch(&self.http, ctx).await {
                Ok(found) => {
                    info!(source_id = %source_id, postings = found.len(), "source polled");
                    let count = found.len();
                    postings.extend(found);
                    SourceOutcome {
                        source_id,
                        display_name: connector.display_name().to_string(),
                        kind: connector.kind(),
                        status: SourceStatus::Ok,
                        postings: count,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(source_id = %source_id, error = %err, "source failed; continuing without it");
                    SourceOutcome {
                        source_id,
                        display_name: connector.display_name().to_string(),
                        kind: connector.kind(),
                        status: SourceStatus::Failed,
                        postings: 0,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        (postings, outcomes)
    }

    /// Runs the enrichment hook over the best `enrich_max_jobs` records. A failing hook leaves
    /// the heuristic records in place.
    async fn enrich(&self, mut records: Vec<JobRecord>) -> Vec<JobRecord> {
        let limit = self.config.enrich_max_jobs.min(records.len());
        if limit == 0 {
            return records;
        }
        let rest = records.split_off(limit);
        let head = match self.enrichment.apply(records.clone()).await {
            Ok(enriched) => enriched,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "enrichment failed; keeping heuristic scores");
                records
            }
        };
        head.into_iter().chain(rest).collect()
    }

    /// Commits the seen cache and, for scheduled runs, the run date. Failures are logged and
    /// reported as "not committed"; they never fail the run.
    async fn commit_state(
        &self,
        seen: &mut SeenCache,
        digest: &Digest,
        mut run_state: RunState,
        gate: &RunGate,
        now: DateTime<Utc>,
    ) -> bool {
        seen.record_delivered(&digest.records, now);
        let mut committed = match seen.save(&self.config.seen_cache_path).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "seen cache not committed");
                false
            }
        };
        if gate.is_scheduled() {
            run_state.mark_ran(gate.local_date(now));
            if let Err(err) = run_state.save(&self.config.run_state_path).await {
                warn!(error = %err, "run state not committed");
                committed = false;
            }
        }
        committed
    }
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            status: RunStatus::Skipped,
            gate: GateDecision::Unscheduled,
            sources: Vec::new(),
            fetched_postings: 0,
            qualified_records: 0,
            unique_records: 0,
            new_records: 0,
            delivered_records: 0,
            top_pick: None,
            outputs: Vec::new(),
            sink_failures: Vec::new(),
            state_committed: false,
        }
    }

    fn finish(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.finished_at = Utc::now().max(self.started_at);
        self
    }
}

/// Applies the relevance, recency and minimum-score gates, then scores and explains the
/// posting. `None` means the posting is excluded.
pub fn evaluate_posting(
    posting: &RawPosting,
    window_hours: i64,
    min_score: u32,
    now: DateTime<Utc>,
) -> Option<JobRecord> {
    if !is_relevant_title(&posting.title) || !is_relevant_location(&posting.location) {
        return None;
    }
    if !within_window(&posting.posted_text, &posting.posted_date, window_hours, now) {
        return None;
    }
    let full_text = posting.full_text();
    let fit = score_fit(&full_text, &posting.company);
    if fit.score < min_score {
        return None;
    }
    Some(JobRecord {
        role: posting.title.clone(),
        company: posting.company.clone(),
        location: posting.location.clone(),
        link: posting.link.clone(),
        posted: posting.posted_display(),
        source: posting.source_name.clone(),
        fit_score: fit.score,
        preference_match: build_preference_match(&full_text, &posting.company, &posting.location),
        why_fit: build_reasons(&full_text),
        cv_gap: build_gaps(&full_text),
        notes: posting.summary.clone(),
        prep_questions: Vec::new(),
        apply_tips: String::new(),
    })
}

pub async fn run_digest_once_from_env(options: RunOptions) -> Result<RunSummary> {
    let pipeline = DigestPipeline::new(DigestConfig::from_env())?;
    pipeline.run_once(options).await
}
