//! # Hacker Podcast
//!
//! A daily pipeline that turns the Hacker News front page into a spoken
//! podcast episode, a blog post and a short introduction.
//!
//! ## Features
//!
//! - Lists the day's top stories and fetches each article and discussion
//!   through a page-rendering proxy
//! - Summarizes every story, then writes a podcast script, a blog post and an
//!   intro through an OpenAI-compatible completion API
//! - Synthesizes the script to MP3 and verifies the upload before publishing
//! - Durable steps: a crashed or failed run resumes where it stopped
//! - Small HTTP API to trigger runs, inspect instances and read records
//!
//! ## Usage
//!
//! ```sh
//! hacker_podcast run --date 2025-05-06
//! hacker_podcast status
//! hacker_podcast serve --every 24h
//! ```
//!
//! ## Architecture
//!
//! 1. **Listing**: top stories for the date, capped at `max_stories`
//! 2. **Per story**: fetch content, summarize, pause
//! 3. **Aggregate**: podcast script, blog post, intro
//! 4. **Publish**: audio blob first, Run Record last

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod history;
mod llm;
mod models;
mod prompts;
mod proxy;
mod server;
mod sources;
mod storage;
mod tts;
mod utils;
mod workflow;

use cli::{Cli, Command};
use config::Settings;
use storage::{FsKvStore, KvStore};
use utils::{parse_duration, today, validate_date};
use workflow::PodcastWorkflow;
use workflow::instances::Instances;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("hacker_podcast starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if let Some(env) = args.env {
        settings.run_env = env;
    }
    info!(
        env = %settings.run_env,
        data_dir = %settings.data_dir.display(),
        "Settings resolved"
    );

    match args.command {
        Command::Run {
            date,
            source,
            instance,
            dry_run,
        } => {
            let workflow = if dry_run {
                PodcastWorkflow::dry_run(settings)?
            } else {
                PodcastWorkflow::from_settings(settings)?
            };
            let params = workflow.params(date.unwrap_or_else(today), source);
            let record = workflow.run(params, instance).await?;
            info!(
                date = %record.date,
                stories = record.stories.len(),
                audio = %record.audio,
                "Episode published"
            );
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Resume { instance } => {
            let workflow = PodcastWorkflow::from_settings(settings)?;
            let record = workflow.resume(&instance).await?;
            info!(date = %record.date, audio = %record.audio, "Episode published");
        }
        Command::Status => {
            let kv: Arc<dyn KvStore> = Arc::new(FsKvStore::new(&settings.data_dir));
            let instances = Instances::new(kv).list().await?;
            println!("{}", serde_json::to_string_pretty(&instances)?);
        }
        Command::History { days } => {
            let kv = FsKvStore::new(&settings.data_dir);
            let from = validate_date(&today())?;
            let records = history::recent_records(
                &kv,
                &settings.run_env,
                &settings.default_source,
                from,
                days.unwrap_or(settings.keep_days),
            )
            .await?;
            for record in &records {
                println!(
                    "{}  {}  {} stories  {}",
                    record.date,
                    record.title,
                    record.stories.len(),
                    record.audio
                );
            }
            info!(records = records.len(), "History listed");
        }
        Command::Serve { addr, every } => {
            let every = every.as_deref().map(parse_duration).transpose()?;
            let workflow = Arc::new(PodcastWorkflow::from_settings(settings)?);
            server::serve(workflow, addr, every).await?;
        }
    }

    info!(
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        finished_at = %Utc::now().to_rfc3339(),
        "hacker_podcast finished"
    );
    Ok(())
}
