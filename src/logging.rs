#![forbid(unsafe_code)]

//! Diagnostic logging for the binaries. User-facing output stays on plain
//! stdout; logs go to stderr.

use tracing_subscriber::EnvFilter;

const VERBOSE_FILTER: &str = "twitch_vod_tools=debug,download_vod=debug,vod_diag=debug";
const DEFAULT_FILTER: &str = "warn";

/// Honours `RUST_LOG` unless `verbose` forces debug output for this crate.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
