#![forbid(unsafe_code)]

//! Sidecar text file written next to each capture.
//!
//! The file is written before the download starts and is left in place if
//! the download fails, so it always records what was attempted.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::api::VodDescriptor;
use crate::error::VodError;

/// Everything recorded about one capture.
#[derive(Debug, Clone)]
pub struct VodMetadata<'a> {
    pub channel: &'a str,
    pub vod: &'a VodDescriptor,
    /// Set for test-mode runs; the capture is cut after this long.
    pub test_capture: Option<Duration>,
}

impl VodMetadata<'_> {
    pub fn render(&self) -> String {
        let mut text = format!(
            "Channel: {}\nTitle: {}\nCreated: {}\nDuration: {}\nVOD-ID: {}\nURL: {}\n",
            self.channel,
            self.vod.title,
            self.vod.created_at,
            self.vod.duration,
            self.vod.id,
            self.vod.url,
        );
        if let Some(limit) = self.test_capture {
            text.push_str(&format!(
                "Test Mode: yes ({} second capture)\n",
                limit.as_secs()
            ));
        }
        text
    }

    /// Writes through a temporary file so readers never see a partial file.
    pub fn write_to(&self, path: &Path) -> Result<(), VodError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("txt.tmp");
        fs::write(&tmp_path, self.render())?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
