use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobdigest_pipeline::{DigestConfig, DigestPipeline, RunOptions};
use jobdigest_render::EmailBodySink;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobdigest")]
#[command(about = "Daily job digest: poll job sources, score, dedupe and deliver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline once (the default command).
    Run {
        /// Produce every output but leave the seen cache and run state untouched.
        #[arg(long)]
        dry_run: bool,
        /// Ignore the daily run gate.
        #[arg(long)]
        force: bool,
    },
    /// Poll every enabled source once and report raw counts.
    SmokeTest,
    /// Keep running and trigger a gated run on the configured cron schedule.
    Schedule,
    /// Print the source registry and the sources summary line.
    Sources,
}

fn build_pipeline() -> Result<DigestPipeline> {
    let config = DigestConfig::from_env();
    let digest_dir = config.digest_dir.clone();
    Ok(DigestPipeline::new(config)?.with_sink(Box::new(EmailBodySink::new(digest_dir))))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        force: false,
    });

    match command {
        Commands::Run { dry_run, force } => {
            let summary = build_pipeline()?
                .run_once(RunOptions { dry_run, force })
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::SmokeTest => {
            let outcomes = build_pipeline()?.smoke_test().await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        Commands::Schedule => {
            let pipeline = Arc::new(build_pipeline()?);
            let cron = pipeline.config().schedule_cron.clone();
            let mut sched = DigestPipeline::build_scheduler(pipeline).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler started; press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
            info!("scheduler stopped");
        }
        Commands::Sources => {
            let pipeline = build_pipeline()?;
            let report = json!({
                "summary": pipeline.sources_summary(),
                "exclude_companies": pipeline.registry().exclude_companies,
                "sources": pipeline.registry().sources,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
