//! Command-line interface definitions for Hacker Podcast.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. Global options can also be provided via environment variables.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line arguments for the Hacker Podcast application.
///
/// # Examples
///
/// ```sh
/// # Build today's episode
/// hacker_podcast run
///
/// # Rebuild a past day in development mode
/// hacker_podcast --env development run --date 2025-05-06
///
/// # Serve the diagnostic API and build an episode every 24 hours
/// hacker_podcast serve --addr 0.0.0.0:8787 --every 24h
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, global = true, env = "PODCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the key-value records and audio blobs
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Run environment, part of every storage key (development, production)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the pipeline once and wait for it to finish
    Run {
        /// Date to build, YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        date: Option<String>,

        /// Source key (defaults to hacker-news)
        #[arg(long)]
        source: Option<String>,

        /// Reuse this instance id; completed steps are replayed. The id must
        /// belong to the same date and source
        #[arg(long)]
        instance: Option<String>,

        /// Keep records and audio in memory and print the record only
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-run a stored instance, skipping its completed steps
    Resume {
        /// Instance id as printed by `run` or `status`
        instance: String,
    },

    /// List run instances, newest first
    Status,

    /// Print the Run Records of recent days
    History {
        /// Number of days to look back (defaults to keep_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Serve the diagnostic HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: SocketAddr,

        /// Also start a run on this interval, e.g. `24h`
        #[arg(long)]
        every: Option<String>,
    },
}
