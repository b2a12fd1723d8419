#![forbid(unsafe_code)]

//! Credential and connectivity check for the VOD downloader.
//!
//! Prints the configured credentials in masked form, fetches an app access
//! token and resolves one channel login, so a broken setup can be told apart
//! from a broken download.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use twitch_vod_tools::api::{HelixClient, UreqTransport, VodLookup};
use twitch_vod_tools::auth::{TokenManager, mask_client_id, mask_secret};
use twitch_vod_tools::config::{ConfigOverrides, resolve_settings};
use twitch_vod_tools::logging;

#[derive(Debug, Parser)]
#[command(
    name = "vod_diag",
    version,
    about = "Check Twitch credentials and resolve a channel login"
)]
struct DiagArgs {
    /// Login to resolve (defaults to TWITCH_CHANNEL)
    #[arg(long)]
    login: Option<String>,

    #[arg(long)]
    env_file: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = DiagArgs::parse();
    logging::init(args.verbose);

    let settings = resolve_settings(ConfigOverrides {
        env_path: args.env_file.clone(),
        config_path: args.config.clone(),
        ..ConfigOverrides::default()
    })?;

    println!("ENV check:");
    println!(
        "  TWITCH_CLIENT_ID: {}",
        mask_client_id(settings.client_id.as_deref())
    );
    println!(
        "  TWITCH_CLIENT_SECRET: {}",
        mask_secret(settings.client_secret.as_deref())
    );

    let credentials = settings.credentials()?;
    let mut client = HelixClient::new(UreqTransport::default(), TokenManager::new(credentials));

    let token = client.ensure_token()?;
    println!("Token endpoint: {}", token.endpoint_status());
    println!("Token fetched (len {})", token.access_token().len());

    let Some(login) = args.login.or(settings.channel) else {
        bail!("no login to resolve; pass --login or set TWITCH_CHANNEL");
    };
    match client.resolve_user_id(&login)? {
        Some(id) => println!("User {login}: id {id}"),
        None => println!("User {login}: not found"),
    }
    Ok(())
}
