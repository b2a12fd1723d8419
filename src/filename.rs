#![forbid(unsafe_code)]

//! Filesystem-safe names for captured VODs.
//!
//! Names only depend on the channel, the VOD creation time and its title, so
//! re-running against the same VOD always produces the same paths.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::api::VodDescriptor;
use crate::error::VodError;

const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Titles are cut to this many characters after sanitizing.
pub const MAX_TITLE_CHARS: usize = 50;

const MEDIA_EXTENSION: &str = "mp4";
const TEST_SUFFIX: &str = "_TEST";

/// Replaces characters that are invalid in file names with `_`. The output
/// has exactly as many characters as the input.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// First `max` characters of `value`, never splitting a code point.
pub fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

/// `YYYYMMDD_HHMMSS` in UTC for an ISO-8601 creation time.
pub fn vod_timestamp(created_at: &str) -> Result<String, VodError> {
    let parsed =
        DateTime::parse_from_rfc3339(created_at).map_err(|err| VodError::InvalidTimestamp {
            value: created_at.to_string(),
            message: err.to_string(),
        })?;
    Ok(parsed
        .with_timezone(&Utc)
        .format("%Y%m%d_%H%M%S")
        .to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub media: PathBuf,
    pub metadata: PathBuf,
}

/// `<dir>/<channel>_<timestamp>_<title>[_TEST].mp4` and
/// `<dir>/<channel>_<timestamp>_title.txt`.
pub fn output_paths(
    output_dir: &Path,
    channel: &str,
    vod: &VodDescriptor,
    test_mode: bool,
) -> Result<OutputPaths, VodError> {
    let timestamp = vod_timestamp(&vod.created_at)?;
    let sanitized = sanitize(&vod.title);
    let title = truncate_chars(&sanitized, MAX_TITLE_CHARS);
    let suffix = if test_mode { TEST_SUFFIX } else { "" };

    let media = output_dir.join(format!(
        "{channel}_{timestamp}_{title}{suffix}.{MEDIA_EXTENSION}"
    ));
    let metadata = output_dir.join(format!("{channel}_{timestamp}_title.txt"));
    Ok(OutputPaths { media, metadata })
}
