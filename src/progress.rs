#![forbid(unsafe_code)]

//! Terminal progress line for a capture in flight.
//!
//! Samples may arrive as often as the caller likes; the line is redrawn at
//! most once per [`RENDER_INTERVAL`].

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::debug;

pub const RENDER_INTERVAL: Duration = Duration::from_millis(500);

const MIB: f64 = 1024.0 * 1024.0;
const BAR_WIDTH: u64 = 50;

/// Totals reported when the capture ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSummary {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl ProgressSummary {
    /// Average throughput in bytes per second.
    pub fn average_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct ProgressReporter<W: Write = io::Stderr> {
    out: W,
    total: Option<u64>,
    downloaded: u64,
    started: Instant,
    last_render: Option<Instant>,
    renders: u64,
    summary: Option<ProgressSummary>,
}

impl ProgressReporter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(out: W) -> Self {
        Self::starting_at(out, Instant::now())
    }

    pub fn starting_at(out: W, started: Instant) -> Self {
        Self {
            out,
            total: None,
            downloaded: 0,
            started,
            last_render: None,
            renders: 0,
            summary: None,
        }
    }

    /// Known final size, enabling the bar, percentage and ETA.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = (total > 0).then_some(total);
        self
    }

    /// Moves the start of the clock to `started`, so time spent before the
    /// transfer began is not counted.
    pub fn restart_at(&mut self, started: Instant) {
        self.started = started;
        self.last_render = None;
    }

    pub fn observe(&mut self, downloaded_bytes: u64) {
        self.observe_at(downloaded_bytes, Instant::now());
    }

    pub fn observe_at(&mut self, downloaded_bytes: u64, now: Instant) {
        self.downloaded = downloaded_bytes;
        if self.summary.is_some() {
            return;
        }
        if let Some(last) = self.last_render
            && now.saturating_duration_since(last) < RENDER_INTERVAL
        {
            return;
        }
        self.last_render = Some(now);
        self.renders += 1;
        let line = self.status_line(now);
        self.emit(&format!("\r{line}"));
    }

    /// Prints the final totals. Only the first call renders anything.
    pub fn finish(&mut self) -> ProgressSummary {
        self.finish_at(Instant::now())
    }

    pub fn finish_at(&mut self, now: Instant) -> ProgressSummary {
        if let Some(summary) = self.summary {
            return summary;
        }
        let summary = ProgressSummary {
            bytes: self.downloaded,
            elapsed: now.saturating_duration_since(self.started),
        };
        self.summary = Some(summary);
        self.emit(&format!(
            "\rDownload finished: {:.1} MiB in {:.1}s ({:.1} MiB/s)\n",
            summary.bytes as f64 / MIB,
            summary.elapsed.as_secs_f64(),
            summary.average_rate() / MIB,
        ));
        summary
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn render_count(&self) -> u64 {
        self.renders
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn status_line(&self, now: Instant) -> String {
        let downloaded = self.downloaded;
        let Some(total) = self.total else {
            return format!("Download: {:.1} MiB downloaded...", downloaded as f64 / MIB);
        };

        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let rate = if elapsed > 0.0 {
            downloaded as f64 / elapsed
        } else {
            0.0
        };
        let percent = downloaded as f64 / total as f64 * 100.0;
        let filled = (BAR_WIDTH * downloaded.min(total) / total) as usize;
        let bar = format!(
            "{}{}",
            "█".repeat(filled),
            "-".repeat(BAR_WIDTH as usize - filled)
        );
        let eta = if rate > 0.0 {
            total.saturating_sub(downloaded) as f64 / rate
        } else {
            0.0
        };
        format!(
            "Download: |{bar}| {percent:.1}% ({:.1}MiB/{:.1}MiB) {:.1}MiB/s ETA: {eta:.0}s",
            downloaded as f64 / MIB,
            total as f64 / MIB,
            rate / MIB,
        )
    }

    fn emit(&mut self, text: &str) {
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(err) = result {
            debug!("could not render progress: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(reporter: ProgressReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn renders_at_most_every_half_second() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::starting_at(Vec::new(), start);

        // 0.1s sampling for three seconds.
        for tick in 0..=30u64 {
            let now = start + Duration::from_millis(100 * tick);
            reporter.observe_at(tick * 1024 * 1024, now);
        }

        // Renders at 0.0, 0.5, 1.0, ... 3.0.
        assert_eq!(reporter.render_count(), 7);
        assert_eq!(reporter.downloaded(), 30 * 1024 * 1024);
    }

    #[test]
    fn render_gaps_never_shorter_than_interval() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::starting_at(Vec::new(), start);
        let mut renders_at = Vec::new();

        for tick in 0..50u64 {
            let now = start + Duration::from_millis(70 * tick);
            let before = reporter.render_count();
            reporter.observe_at(tick, now);
            if reporter.render_count() > before {
                renders_at.push(now);
            }
        }

        assert!(renders_at.len() > 1);
        for pair in renders_at.windows(2) {
            assert!(pair[1] - pair[0] >= RENDER_INTERVAL);
        }
    }

    #[test]
    fn unknown_total_shows_bytes_only() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::starting_at(Vec::new(), start);
        reporter.observe_at(5 * 1024 * 1024, start + Duration::from_secs(1));

        let text = rendered(reporter);
        assert_eq!(text, "\rDownload: 5.0 MiB downloaded...");
        assert!(!text.contains('%'));
        assert!(!text.contains("ETA"));
    }

    #[test]
    fn known_total_shows_bar_and_eta() {
        let start = Instant::now();
        let mut reporter =
            ProgressReporter::starting_at(Vec::new(), start).with_total(100 * 1024 * 1024);
        reporter.observe_at(50 * 1024 * 1024, start + Duration::from_secs(10));

        let text = rendered(reporter);
        assert!(text.contains("50.0%"), "{text}");
        assert!(text.contains("5.0MiB/s"), "{text}");
        assert!(text.contains("ETA: 10s"), "{text}");
        assert!(text.contains(&"█".repeat(25)), "{text}");
    }

    #[test]
    fn finish_reports_totals_once() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::starting_at(Vec::new(), start);
        reporter.observe_at(20 * 1024 * 1024, start + Duration::from_secs(5));

        let summary = reporter.finish_at(start + Duration::from_secs(10));
        assert_eq!(summary.bytes, 20 * 1024 * 1024);
        assert_eq!(summary.elapsed, Duration::from_secs(10));
        assert!((summary.average_rate() - 2.0 * 1024.0 * 1024.0).abs() < 1.0);

        let again = reporter.finish_at(start + Duration::from_secs(20));
        assert_eq!(again, summary);
        reporter.observe_at(30 * 1024 * 1024, start + Duration::from_secs(21));

        let text = rendered(reporter);
        assert_eq!(text.matches("Download finished").count(), 1);
        assert!(text.ends_with("\rDownload finished: 20.0 MiB in 10.0s (2.0 MiB/s)\n"));
    }

    #[test]
    fn restart_excludes_time_before_transfer() {
        let built = Instant::now();
        let mut reporter = ProgressReporter::starting_at(Vec::new(), built);

        let transfer_start = built + Duration::from_secs(40);
        reporter.restart_at(transfer_start);
        reporter.observe_at(8 * 1024 * 1024, transfer_start + Duration::from_secs(2));

        let summary = reporter.finish_at(transfer_start + Duration::from_secs(4));
        assert_eq!(summary.elapsed, Duration::from_secs(4));
        assert!((summary.average_rate() - 2.0 * 1024.0 * 1024.0).abs() < 1.0);
    }

    #[test]
    fn zero_elapsed_has_zero_rate() {
        let summary = ProgressSummary {
            bytes: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(summary.average_rate(), 0.0);
    }
}
