#![forbid(unsafe_code)]

//! One download run: channel -> latest archived VOD -> output paths ->
//! sidecar metadata -> supervised capture.
//!
//! Every failure is turned into [`RunOutcome::Failed`] here; nothing escapes
//! as an error. Lookups that come back empty are failures of the run but not
//! errors of the program, see [`RunFailure::is_nothing_to_do`].

use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::api::{VodDescriptor, VodLookup};
use crate::config::DownloadConfig;
use crate::error::VodError;
use crate::filename::output_paths;
use crate::metadata::VodMetadata;
use crate::progress::{ProgressReporter, ProgressSummary};
use crate::supervisor::{
    CaptureTool, DownloadJob, DownloadOutcome, operator_interrupt, resolve_selector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ResolvingUser,
    ResolvingVod,
    PreparingOutput,
    Downloading,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum RunFailure {
    ChannelNotFound { channel: String },
    NoArchivedVideo { channel: String },
    Error(VodError),
}

impl RunFailure {
    /// Empty lookups mean there is nothing to download, not that something
    /// is broken.
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(
            self,
            RunFailure::ChannelNotFound { .. } | RunFailure::NoArchivedVideo { .. }
        )
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::ChannelNotFound { channel } => {
                write!(f, "Channel '{channel}' not found")
            }
            RunFailure::NoArchivedVideo { channel } => {
                write!(f, "No archived VODs found for '{channel}'")
            }
            RunFailure::Error(err) => write!(f, "{err}"),
        }
    }
}

impl From<VodError> for RunFailure {
    fn from(err: VodError) -> Self {
        RunFailure::Error(err)
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub vod: VodDescriptor,
    pub media_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Test mode cut the capture short.
    pub stopped_early: bool,
    pub summary: ProgressSummary,
}

#[derive(Debug)]
pub enum RunOutcome {
    Done(RunReport),
    Failed(RunFailure),
}

pub struct Orchestrator<'a, L> {
    config: &'a DownloadConfig,
    lookup: L,
    tool: CaptureTool,
    state: RunState,
}

impl<'a, L: VodLookup> Orchestrator<'a, L> {
    pub fn new(config: &'a DownloadConfig, lookup: L, tool: CaptureTool) -> Self {
        Self {
            config,
            lookup,
            tool,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Derives the capture job for `vod`. Pure: the same VOD and
    /// configuration always give the same paths.
    pub fn plan(&self, vod: &VodDescriptor) -> Result<DownloadJob, VodError> {
        let paths = output_paths(
            &self.config.output_dir,
            &self.config.channel,
            vod,
            self.config.test_mode,
        )?;
        Ok(DownloadJob {
            source_url: vod.url.clone(),
            selector: resolve_selector(&self.config.quality),
            media_path: paths.media,
            metadata_path: paths.metadata,
        })
    }

    /// Runs to completion; Ctrl-C during the capture stops the tool.
    pub async fn run<W: Write>(&mut self, reporter: &mut ProgressReporter<W>) -> RunOutcome {
        self.run_until(reporter, operator_interrupt()).await
    }

    /// Like [`Orchestrator::run`], but the capture stops when `interrupt`
    /// resolves.
    pub async fn run_until<W, F>(
        &mut self,
        reporter: &mut ProgressReporter<W>,
        interrupt: F,
    ) -> RunOutcome
    where
        W: Write,
        F: Future<Output = ()>,
    {
        match self.execute(reporter, interrupt).await {
            Ok(report) => {
                self.transition(RunState::Done);
                RunOutcome::Done(report)
            }
            Err(failure) => {
                self.transition(RunState::Failed);
                RunOutcome::Failed(failure)
            }
        }
    }

    async fn execute<W, F>(
        &mut self,
        reporter: &mut ProgressReporter<W>,
        interrupt: F,
    ) -> Result<RunReport, RunFailure>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        let channel = self.config.channel.clone();

        self.transition(RunState::ResolvingUser);
        println!("Looking for the latest VOD of channel: {channel}");
        let user_id = self
            .lookup
            .resolve_user_id(&channel)?
            .ok_or_else(|| RunFailure::ChannelNotFound {
                channel: channel.clone(),
            })?;

        self.transition(RunState::ResolvingVod);
        let vod = self
            .lookup
            .latest_archived_video(&user_id)?
            .ok_or_else(|| RunFailure::NoArchivedVideo {
                channel: channel.clone(),
            })?;

        println!();
        println!("Found VOD:");
        println!("Title: {}", vod.title);
        println!("Created: {}", vod.created_at);
        println!("Duration: {}", vod.duration);
        println!("URL: {}", vod.url);

        self.transition(RunState::PreparingOutput);
        let job = self.plan(&vod)?;
        std::fs::create_dir_all(&self.config.output_dir).map_err(VodError::from)?;
        VodMetadata {
            channel: &channel,
            vod: &vod,
            test_capture: self.config.test_mode.then_some(self.tool.test_limit),
        }
        .write_to(&job.metadata_path)?;
        println!();
        println!("Title information saved to: {}", job.metadata_path.display());

        self.transition(RunState::Downloading);
        println!("Starting download with quality: {}", self.config.quality);
        println!("Output file: {}", job.media_path.display());
        let outcome = self
            .tool
            .run_until(&job, self.config.test_mode, reporter, interrupt)
            .await?;

        Ok(RunReport {
            vod,
            media_path: job.media_path,
            metadata_path: job.metadata_path,
            stopped_early: matches!(outcome, DownloadOutcome::StoppedEarly(_)),
            summary: outcome.summary(),
        })
    }

    fn transition(&mut self, next: RunState) {
        debug!("run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
