#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::auth::ClientCredentials;
use crate::supervisor::Quality;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_QUALITY: &str = "720p";
pub const DEFAULT_OUTPUT_DIR: &str = "./downloads";

const CHANNEL_KEYS: &[&str] = &["TWITCH_CHANNEL"];
const QUALITY_KEYS: &[&str] = &["DOWNLOAD_QUALITY"];
const OUTPUT_DIR_KEYS: &[&str] = &["OUTPUT_DIRECTORY"];
const TEST_MODE_KEYS: &[&str] = &["TEST_MODE"];
const CLIENT_ID_KEYS: &[&str] = &["TWITCH_CLIENT_ID", "CLIENT_ID"];
const CLIENT_SECRET_KEYS: &[&str] = &[
    "TWITCH_CLIENT_SECRET",
    "CLIENT_SECRET",
    "TWITCH_ACCESS_TOKEN",
];

/// Everything the configuration sources provided, before the run-specific
/// requirements are checked.
#[derive(Debug, Clone)]
pub struct Settings {
    pub channel: Option<String>,
    pub quality: String,
    pub output_dir: PathBuf,
    pub test_mode: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Immutable configuration for one download run.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub channel: String,
    /// Tier as configured; unknown tiers resolve to `best`.
    pub quality: String,
    pub output_dir: PathBuf,
    pub test_mode: bool,
    pub credentials: ClientCredentials,
}

/// Values given on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub channel: Option<String>,
    pub quality: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub test_mode: Option<bool>,
    pub env_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

/// Optional `config.toml`. Keys mirror the environment variables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    channel: Option<String>,
    quality: Option<String>,
    output_directory: Option<String>,
    test_mode: Option<bool>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl FileSettings {
    fn into_vars(self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(key.to_string(), value);
            }
        };
        put(CHANNEL_KEYS[0], self.channel);
        put(QUALITY_KEYS[0], self.quality);
        put(OUTPUT_DIR_KEYS[0], self.output_directory);
        put(TEST_MODE_KEYS[0], self.test_mode.map(|flag| flag.to_string()));
        put(CLIENT_ID_KEYS[0], self.client_id);
        put(CLIENT_SECRET_KEYS[0], self.client_secret);
        vars
    }
}

/// Layers overrides, process environment, `.env` and `config.toml` (in that
/// order of precedence) on top of the defaults.
pub fn resolve_settings(overrides: ConfigOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let config_path = overrides
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut file_vars = read_config_file(&config_path)?;
    file_vars.extend(read_env_file(&env_path)?);
    Ok(build_settings(&file_vars, env_var_string, overrides))
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Settings {
    let channel = overrides
        .channel
        .and_then(non_blank)
        .or_else(|| lookup_value(CHANNEL_KEYS, file_vars, &env_lookup));
    let quality = overrides
        .quality
        .and_then(non_blank)
        .or_else(|| lookup_value(QUALITY_KEYS, file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_QUALITY.to_string());
    let output_dir = overrides
        .output_dir
        .or_else(|| lookup_value(OUTPUT_DIR_KEYS, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let test_mode = overrides
        .test_mode
        .or_else(|| lookup_value(TEST_MODE_KEYS, file_vars, &env_lookup).map(|v| parse_flag(&v)))
        .unwrap_or(false);

    Settings {
        channel,
        quality,
        output_dir,
        test_mode,
        client_id: lookup_value(CLIENT_ID_KEYS, file_vars, &env_lookup),
        client_secret: lookup_value(CLIENT_SECRET_KEYS, file_vars, &env_lookup),
    }
}

impl Settings {
    pub fn credentials(&self) -> Result<ClientCredentials> {
        ClientCredentials::new(self.client_id.as_deref(), self.client_secret.as_deref())
            .context("check TWITCH_CLIENT_ID and TWITCH_CLIENT_SECRET in your .env file")
    }

    /// Requires a channel and plausible credentials.
    pub fn into_download_config(self) -> Result<DownloadConfig> {
        let credentials = self.credentials()?;
        let channel = self
            .channel
            .ok_or_else(|| anyhow!("TWITCH_CHANNEL not set"))?;
        if Quality::from_tier(&self.quality).is_none() {
            tracing::warn!(
                "unknown quality {:?}, falling back to best available",
                self.quality
            );
        }
        Ok(DownloadConfig {
            channel,
            quality: self.quality,
            output_dir: self.output_dir,
            test_mode: self.test_mode,
            credentials,
        })
    }
}

/// `true`, `1`, `yes` and `on` (any case) enable a flag.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

/// Any alias set in the process environment beats every alias in the files.
fn lookup_value(
    keys: &[&str],
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    keys.iter()
        .find_map(|key| env_lookup(*key))
        .or_else(|| {
            keys.iter()
                .find_map(|key| file_vars.get(*key).cloned().and_then(non_blank))
        })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Reads the optional TOML settings file. A missing file yields no values.
pub fn read_config_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let settings: FileSettings =
        toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))?;
    Ok(settings.into_vars())
}
