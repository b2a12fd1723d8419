#![forbid(unsafe_code)]

//! Runs the external capture tool (streamlink) and watches it.
//!
//! While the child runs, one loop does three things without letting any of
//! them block the others:
//!
//! * polls the size of the growing output file and feeds the progress line,
//! * waits for the child to exit,
//! * enforces the test-mode wall-clock limit and operator interrupts.
//!
//! Both output pipes are drained by background tasks for the whole lifetime
//! of the child so a chatty tool can never stall on a full pipe. Only the
//! tail of each stream is kept for error reports.

use std::ffi::OsString;
use std::future::{self, Future};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::VodError;
use crate::progress::{ProgressReporter, ProgressSummary};

pub const DEFAULT_TOOL: &str = "streamlink";
/// Overrides the capture tool executable.
pub const TOOL_ENV_VAR: &str = "STREAMLINK_PATH";

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const TEST_MODE_LIMIT: Duration = Duration::from_secs(30);

const RETRY_STREAMS: u32 = 5;
const RETRY_MAX: u32 = 3;
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const DRAIN_GRACE: Duration = Duration::from_secs(2);
const DIAGNOSTIC_TAIL_BYTES: usize = 16 * 1024;

/// Quality tiers understood by the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Best,
    P720,
    P480,
    Worst,
}

impl Quality {
    /// Exact, case-sensitive tier names.
    pub fn from_tier(tier: &str) -> Option<Self> {
        match tier {
            "best" => Some(Quality::Best),
            "720p" => Some(Quality::P720),
            "480p" => Some(Quality::P480),
            "worst" => Some(Quality::Worst),
            _ => None,
        }
    }

    /// Stream preference list handed to the capture tool.
    pub fn selector(self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::P720 => "720p60,720p,worst",
            Quality::P480 => "480p,worst",
            Quality::Worst => "worst",
        }
    }
}

/// Unknown tiers fall back to `best`.
pub fn resolve_selector(tier: &str) -> &'static str {
    Quality::from_tier(tier).unwrap_or(Quality::Best).selector()
}

/// What to capture and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub source_url: String,
    pub selector: &'static str,
    pub media_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadOutcome {
    /// The tool exited with status zero.
    Completed(ProgressSummary),
    /// Test mode cut the capture at the wall-clock limit.
    StoppedEarly(ProgressSummary),
}

impl DownloadOutcome {
    pub fn summary(&self) -> ProgressSummary {
        match self {
            DownloadOutcome::Completed(summary) | DownloadOutcome::StoppedEarly(summary) => {
                *summary
            }
        }
    }
}

/// Capture tool invocation settings.
#[derive(Debug, Clone)]
pub struct CaptureTool {
    pub program: PathBuf,
    pub retry_streams: u32,
    pub retry_max: u32,
    /// Wall-clock bound for test-mode runs; also passed as the tool's own
    /// stream timeout.
    pub test_limit: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptureTool {
    fn default() -> Self {
        Self::with_program(DEFAULT_TOOL)
    }
}

impl CaptureTool {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            retry_streams: RETRY_STREAMS,
            retry_max: RETRY_MAX,
            test_limit: TEST_MODE_LIMIT,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Honours [`TOOL_ENV_VAR`] when set.
    pub fn from_env() -> Self {
        match std::env::var_os(TOOL_ENV_VAR) {
            Some(program) if !program.is_empty() => Self::with_program(program),
            _ => Self::default(),
        }
    }

    pub fn tool_name(&self) -> String {
        self.program.display().to_string()
    }

    /// `<url> <selector> --output <path> --retry-streams N --retry-max N
    /// [--stream-timeout S]`
    pub fn arguments(&self, job: &DownloadJob, test_mode: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            job.source_url.clone().into(),
            job.selector.into(),
            "--output".into(),
            job.media_path.clone().into_os_string(),
            "--retry-streams".into(),
            self.retry_streams.to_string().into(),
            "--retry-max".into(),
            self.retry_max.to_string().into(),
        ];
        if test_mode {
            args.push("--stream-timeout".into());
            args.push(self.test_limit.as_secs().max(1).to_string().into());
        }
        args
    }

    /// Runs the job, treating Ctrl-C as an interrupt.
    pub async fn run<W: Write>(
        &self,
        job: &DownloadJob,
        test_mode: bool,
        reporter: &mut ProgressReporter<W>,
    ) -> Result<DownloadOutcome, VodError> {
        self.run_until(job, test_mode, reporter, operator_interrupt())
            .await
    }

    /// Runs the job until it exits, the test-mode limit passes, or
    /// `interrupt` resolves. The reporter is finished exactly once on every
    /// path that started the child.
    pub async fn run_until<W, F>(
        &self,
        job: &DownloadJob,
        test_mode: bool,
        reporter: &mut ProgressReporter<W>,
        interrupt: F,
    ) -> Result<DownloadOutcome, VodError>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        if let Some(parent) = job.media_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.arguments(job, test_mode);
        debug!("spawning {} {:?}", self.program.display(), args);

        let mut child = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VodError::ToolNotInstalled {
                    tool: self.tool_name(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        reporter.restart_at(started);
        let limit = test_mode.then_some(self.test_limit);
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(interrupt);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = ticker.tick() => {
                    reporter.observe(file_size(&job.media_path).await);
                    if let Some(limit) = limit
                        && started.elapsed() >= limit
                    {
                        info!("test mode limit of {}s reached, stopping capture", limit.as_secs());
                        terminate(&mut child).await;
                        stdout.abort();
                        stderr.abort();
                        reporter.observe(file_size(&job.media_path).await);
                        return Ok(DownloadOutcome::StoppedEarly(reporter.finish()));
                    }
                }
                () = &mut interrupt => {
                    warn!("interrupt received, stopping capture tool");
                    terminate(&mut child).await;
                    stdout.abort();
                    stderr.abort();
                    reporter.finish();
                    return Err(VodError::Interrupted);
                }
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        reporter.observe(file_size(&job.media_path).await);
        let summary = reporter.finish();

        if status.success() {
            debug!("capture tool exited cleanly after {:?}", started.elapsed());
            Ok(DownloadOutcome::Completed(summary))
        } else {
            Err(VodError::DownloadFailed {
                status: status.to_string(),
                diagnostics: diagnostics(&stderr, &stdout),
            })
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
pub async fn operator_interrupt() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("could not listen for Ctrl-C: {err}");
        future::pending::<()>().await;
    }
}

/// A missing file simply means nothing has been written yet.
async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let Some(mut pipe) = pipe else {
            return tail;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    tail.extend_from_slice(&chunk[..read]);
                    if tail.len() > DIAGNOSTIC_TAIL_BYTES {
                        let excess = tail.len() - DIAGNOSTIC_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        tail
    })
}

/// Grandchildren can keep a pipe open after the tool itself exited, so
/// collection is bounded.
async fn collect(mut handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(err)) => {
            debug!("output drain task failed: {err}");
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

fn diagnostics(stderr: &[u8], stdout: &[u8]) -> String {
    [stderr, stdout]
        .into_iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| "no output from capture tool".to_string())
}

/// SIGTERM first so the tool can close its output file, SIGKILL if it does
/// not exit within the grace period.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(Ok(status)) = time::timeout(TERMINATE_GRACE, child.wait()).await {
                        debug!("capture tool stopped with {status}");
                        return;
                    }
                    warn!("capture tool ignored SIGTERM, killing it");
                }
                Err(err) => debug!("SIGTERM failed: {err}"),
            }
        }
    }

    if let Err(err) = child.start_kill() {
        debug!("kill failed: {err}");
    }
    if let Err(err) = child.wait().await {
        debug!("waiting for killed capture tool failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn job_in(dir: &Path) -> DownloadJob {
        DownloadJob {
            source_url: "https://www.twitch.tv/videos/2096361128".into(),
            selector: resolve_selector("720p"),
            media_path: dir.join("out").join("chan_20240301_180405_title.mp4"),
            metadata_path: dir.join("out").join("chan_20240301_180405_title.txt"),
        }
    }

    /// Bash stand-in for streamlink. Records its arguments next to the
    /// output file, then behaves according to `body`.
    #[cfg(unix)]
    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("streamlink");
        let script = format!(
            r#"#!/usr/bin/env bash
set -u
args=("$@")
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output)
      shift
      output="$1"
      ;;
  esac
  shift
done
printf '%s\n' "${{args[@]}}" > "$(dirname "$output")/args.txt"
{body}
"#
        );
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    fn fast_tool(program: PathBuf) -> CaptureTool {
        CaptureTool {
            poll_interval: Duration::from_millis(50),
            ..CaptureTool::with_program(program)
        }
    }

    #[test]
    fn quality_tiers_map_to_selectors() {
        assert_eq!(resolve_selector("best"), "best");
        assert_eq!(resolve_selector("720p"), "720p60,720p,worst");
        assert_eq!(resolve_selector("480p"), "480p,worst");
        assert_eq!(resolve_selector("worst"), "worst");
        assert_eq!(resolve_selector("720P"), "best");
        assert_eq!(resolve_selector(" 720p "), "best");
        assert_eq!(resolve_selector("4k"), "best");
        assert_eq!(resolve_selector(""), "best");
    }

    #[test]
    fn arguments_include_retries_and_optional_timeout() {
        let dir = tempdir().unwrap();
        let job = job_in(dir.path());
        let tool = CaptureTool::default();

        let normal: Vec<String> = tool
            .arguments(&job, false)
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            normal,
            vec![
                job.source_url.clone(),
                "720p60,720p,worst".to_string(),
                "--output".to_string(),
                job.media_path.display().to_string(),
                "--retry-streams".to_string(),
                "5".to_string(),
                "--retry-max".to_string(),
                "3".to_string(),
            ]
        );

        let test: Vec<String> = tool
            .arguments(&job, true)
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&test[8..], ["--stream-timeout", "30"]);
    }

    #[test]
    fn diagnostics_prefer_stderr_then_stdout() {
        assert_eq!(diagnostics(b"  boom \n", b"ignored"), "boom");
        assert_eq!(
            diagnostics(b"", b"error: No playable streams found\n"),
            "error: No playable streams found"
        );
        assert_eq!(diagnostics(b"", b""), "no output from capture tool");
    }

    #[tokio::test]
    async fn missing_tool_is_reported_as_not_installed() {
        let dir = tempdir().unwrap();
        let tool = CaptureTool::with_program(dir.path().join("no-such-streamlink"));
        let mut reporter = ProgressReporter::new(Vec::new());

        let err = tool
            .run_until(&job_in(dir.path()), false, &mut reporter, future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, VodError::ToolNotInstalled { .. }), "{err:?}");
        assert_eq!(reporter.render_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_capture_reports_completed() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"for i in 1 2 3; do
  head -c 4096 /dev/zero >> "$output"
  sleep 0.1
done
echo "[cli][info] Stream ended"
exit 0"#,
        );
        let job = job_in(dir.path());
        let mut reporter = ProgressReporter::new(Vec::new());

        let outcome = fast_tool(stub)
            .run_until(&job, false, &mut reporter, future::pending())
            .await
            .unwrap();

        match outcome {
            DownloadOutcome::Completed(summary) => assert_eq!(summary.bytes, 3 * 4096),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(reporter.render_count() >= 1);

        let args = fs::read_to_string(dir.path().join("out").join("args.txt")).unwrap();
        assert!(args.contains("720p60,720p,worst"));
        assert!(args.contains("--retry-streams\n5"));
        assert!(!args.contains("--stream-timeout"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn summary_covers_only_the_capture() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"head -c 4096 /dev/zero > "$output"
exit 0"#,
        );
        let mut reporter = ProgressReporter::new(Vec::new());
        // Lookups and metadata writes happen between building the reporter
        // and spawning the tool.
        time::sleep(Duration::from_millis(1500)).await;

        let outcome = fast_tool(stub)
            .run_until(&job_in(dir.path()), false, &mut reporter, future::pending())
            .await
            .unwrap();

        let summary = outcome.summary();
        assert_eq!(summary.bytes, 4096);
        assert!(summary.elapsed < Duration::from_secs(1), "{:?}", summary.elapsed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_capture_carries_tool_output() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"echo "error: No playable streams found on this URL" >&2
exit 1"#,
        );
        let mut reporter = ProgressReporter::new(Vec::new());

        let err = fast_tool(stub)
            .run_until(&job_in(dir.path()), false, &mut reporter, future::pending())
            .await
            .unwrap_err();

        match err {
            VodError::DownloadFailed {
                status,
                diagnostics,
            } => {
                assert!(status.contains('1'), "{status}");
                assert!(diagnostics.contains("No playable streams"), "{diagnostics}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chatty_tool_does_not_deadlock_on_full_pipes() {
        let dir = tempdir().unwrap();
        // Far more than a pipe buffer on both streams.
        let stub = install_stub(
            dir.path(),
            r#"head -c 1048576 /dev/zero | tr '\0' 'o'
head -c 1048576 /dev/zero | tr '\0' 'e' >&2
head -c 2048 /dev/zero > "$output"
exit 0"#,
        );
        let mut reporter = ProgressReporter::new(Vec::new());

        let outcome = time::timeout(
            Duration::from_secs(20),
            fast_tool(stub).run_until(&job_in(dir.path()), false, &mut reporter, future::pending()),
        )
        .await
        .expect("supervisor stalled")
        .unwrap();
        assert_eq!(outcome.summary().bytes, 2048);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_mode_stops_long_capture_at_limit() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"while true; do
  head -c 1024 /dev/zero >> "$output"
  sleep 0.1
done"#,
        );
        let tool = CaptureTool {
            test_limit: Duration::from_secs(2),
            ..fast_tool(stub)
        };
        let mut reporter = ProgressReporter::new(Vec::new());

        let started = Instant::now();
        let outcome = tool
            .run_until(&job_in(dir.path()), true, &mut reporter, future::pending())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        let summary = match outcome {
            DownloadOutcome::StoppedEarly(summary) => summary,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(summary.bytes > 0);
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");

        let args = fs::read_to_string(dir.path().join("out").join("args.txt")).unwrap();
        assert!(args.contains("--stream-timeout\n2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_terminates_child() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"head -c 512 /dev/zero > "$output"
exec sleep 30"#,
        );
        let mut reporter = ProgressReporter::new(Vec::new());

        let started = Instant::now();
        let err = fast_tool(stub)
            .run_until(
                &job_in(dir.path()),
                false,
                &mut reporter,
                time::sleep(Duration::from_millis(300)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VodError::Interrupted), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(text.matches("Download finished").count(), 1);
    }
}
