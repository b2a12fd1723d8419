#![forbid(unsafe_code)]

//! Command-line tool that finds the newest archived broadcast of a Twitch
//! channel and captures it with streamlink.
//!
//! Configuration comes from flags, the environment, `.env` and an optional
//! `config.toml`. Exit status: configuration problems and every failure of
//! the download itself exit non-zero. A channel that does not exist or has
//! no archived VODs is reported and exits zero, since there is simply
//! nothing to do.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use twitch_vod_tools::api::{HelixClient, UreqTransport};
use twitch_vod_tools::auth::TokenManager;
use twitch_vod_tools::config::{ConfigOverrides, resolve_settings};
use twitch_vod_tools::error::VodError;
use twitch_vod_tools::logging;
use twitch_vod_tools::orchestrator::{Orchestrator, RunFailure, RunOutcome};
use twitch_vod_tools::progress::ProgressReporter;
use twitch_vod_tools::supervisor::CaptureTool;

#[derive(Debug, Parser)]
#[command(
    name = "download_vod",
    version,
    about = "Download the latest archived VOD of a Twitch channel"
)]
struct DownloaderArgs {
    /// Channel login name (overrides TWITCH_CHANNEL)
    #[arg(long)]
    channel: Option<String>,

    /// best, 720p, 480p or worst (overrides DOWNLOAD_QUALITY)
    #[arg(long)]
    quality: Option<String>,

    /// Target directory (overrides OUTPUT_DIRECTORY)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Stop the capture after 30 seconds (overrides TEST_MODE)
    #[arg(long)]
    test_mode: bool,

    /// Path of the .env file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Path of the TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl DownloaderArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            channel: self.channel.clone(),
            quality: self.quality.clone(),
            output_dir: self.output_dir.clone(),
            test_mode: self.test_mode.then_some(true),
            env_path: self.env_file.clone(),
            config_path: self.config.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DownloaderArgs::parse();
    logging::init(args.verbose);

    // Fatal configuration problems stop here, before any request is sent.
    let config = resolve_settings(args.overrides())?.into_download_config()?;
    let tool = CaptureTool::from_env();

    println!("===================================");
    println!("Twitch VOD Downloader");
    println!("===================================");
    println!("Channel: {}", config.channel);
    println!("Quality: {}", config.quality);
    println!("Output directory: {}", config.output_dir.display());
    if config.test_mode {
        println!(
            "TEST MODE: the capture stops after {} seconds",
            tool.test_limit.as_secs()
        );
    }
    println!();

    let client = HelixClient::new(
        UreqTransport::default(),
        TokenManager::new(config.credentials.clone()),
    );
    let mut orchestrator = Orchestrator::new(&config, client, tool);
    let mut reporter = ProgressReporter::stderr();

    match orchestrator.run(&mut reporter).await {
        RunOutcome::Done(report) => {
            println!();
            println!("===================================");
            println!("Download complete!");
            println!("===================================");
            println!("Video: {}", report.media_path.display());
            println!("Title: {}", report.metadata_path.display());
            if report.stopped_early {
                println!("TEST MODE: capture was stopped at the time limit");
            }
            Ok(())
        }
        RunOutcome::Failed(failure) if failure.is_nothing_to_do() => {
            println!("{failure}");
            Ok(())
        }
        RunOutcome::Failed(RunFailure::Error(err)) => {
            eprintln!();
            eprintln!("Download failed!");
            if let VodError::ToolNotInstalled { .. } = err {
                eprintln!("Install streamlink (`pip install streamlink`) or set STREAMLINK_PATH.");
            }
            Err(err.into())
        }
        RunOutcome::Failed(failure) => bail!("{failure}"),
    }
}
