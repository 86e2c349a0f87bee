//! Terminal view multiplexing the output of concurrently running workers.
//!
//! Each worker gets a [`RenderRegion`] owning its buffered output. On a
//! terminal every region is one line of a [`MultiProgress`] block showing the
//! worker's latest status; finished workers are turned into permanent banner
//! lines printed above the block. On anything else only the banners are
//! written.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::LazyLock;
use std::time::Duration;

use crossterm::style::Stylize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use regex::Regex;

use conduit_core::SubscriptionId;

use crate::supervisor::{WorkerExit, WorkerOutput};

/// `Subscription <type>(<id>) processed <count> events in <elapsed>.`
static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Subscription (?P<kind>[^\s(]+)\((?P<id>[^)]*)\) processed\s+(?P<count>\d+) events in (?P<elapsed>.+)\.$",
    )
    .expect("progress line pattern is valid")
});

/// Line breaks and CSI escape sequences (cursor movement, clearing).
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\r|\n").expect("separator pattern is valid")
});

/// Captured stderr lines kept per worker.
const MAX_ERROR_LINES: usize = 50;

fn live_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn is_progress_line(line: &str) -> bool {
    PROGRESS_LINE.is_match(line)
}

/// Split `chunk`, appended to `carry`, into complete segments. Whatever
/// follows the last separator stays in `carry`.
fn segments(carry: &mut String, chunk: &str) -> Vec<String> {
    carry.push_str(chunk);
    let buffer = std::mem::take(carry);

    let mut complete = Vec::new();
    let mut start = 0;
    for separator in SEPARATOR.find_iter(&buffer) {
        let segment = buffer[start..separator.start()].trim();
        if !segment.is_empty() {
            complete.push(segment.to_string());
        }
        start = separator.end();
    }

    carry.push_str(&buffer[start..]);
    complete
}

/// Output state of one worker, from spawn until its termination is reported.
pub struct RenderRegion {
    subscription: SubscriptionId,
    /// Live line on the terminal, if there is one.
    bar: Option<ProgressBar>,
    stdout: String,
    stderr: String,
    last_line: Option<String>,
    errors: VecDeque<String>,
    changed: bool,
}

impl RenderRegion {
    fn new(subscription: SubscriptionId, bar: Option<ProgressBar>) -> Self {
        Self {
            subscription,
            bar,
            stdout: String::new(),
            stderr: String::new(),
            last_line: None,
            errors: VecDeque::new(),
            changed: false,
        }
    }

    pub fn subscription(&self) -> &SubscriptionId {
        &self.subscription
    }

    /// Latest line the worker printed (intermediate redraws collapse into it).
    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    pub fn feed(&mut self, output: &WorkerOutput) {
        if !output.stdout.is_empty() {
            for line in segments(&mut self.stdout, &output.stdout) {
                self.set_last_line(line);
            }
            // A progress line is complete before the next redraw clears it.
            let pending = self.stdout.trim();
            if is_progress_line(pending) {
                let pending = pending.to_string();
                self.set_last_line(pending);
            }
        }

        if !output.stderr.is_empty() {
            for line in segments(&mut self.stderr, &output.stderr) {
                self.push_error(line);
            }
        }
    }

    /// Treat buffered partial lines as complete (the worker has exited).
    fn flush(&mut self) {
        let stdout = std::mem::take(&mut self.stdout);
        let stdout = stdout.trim();
        if !stdout.is_empty() {
            self.set_last_line(stdout.to_string());
        }

        let stderr = std::mem::take(&mut self.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            self.push_error(stderr.to_string());
        }
    }

    fn set_last_line(&mut self, line: String) {
        if self.last_line.as_deref() != Some(line.as_str()) {
            self.last_line = Some(line);
            self.changed = true;
        }
    }

    fn push_error(&mut self, line: String) {
        if self.errors.len() == MAX_ERROR_LINES {
            self.errors.pop_front();
        }
        self.errors.push_back(line);
    }
}

/// Renders every worker region into one output stream.
pub struct OutputMultiplexer<W: Write> {
    out: W,
    /// Live block on the terminal, absent when the output is not one.
    live: Option<MultiProgress>,
}

impl<W: Write> OutputMultiplexer<W> {
    /// When `interactive`, live lines are drawn on stdout, which `out` is
    /// expected to be.
    pub fn new(out: W, interactive: bool) -> Self {
        let live = interactive.then(|| MultiProgress::with_draw_target(ProgressDrawTarget::stdout()));
        Self { out, live }
    }

    /// Multiplexer drawing its live lines through `live`.
    pub fn with_live_view(out: W, live: MultiProgress) -> Self {
        Self {
            out,
            live: Some(live),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn interactive(&self) -> bool {
        self.live.is_some()
    }

    pub fn open(&mut self, subscription: &SubscriptionId) -> RenderRegion {
        let bar = self.live.as_ref().map(|live| {
            let bar = live.add(ProgressBar::new_spinner());
            bar.set_style(live_style());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        RenderRegion::new(subscription.clone(), bar)
    }

    /// Show the region's latest line if its content changed.
    pub fn refresh(&mut self, region: &mut RenderRegion) -> io::Result<()> {
        if !std::mem::take(&mut region.changed) {
            return Ok(());
        }
        if let (Some(bar), Some(line)) = (&region.bar, region.last_line()) {
            bar.set_message(self.decorate_line(line));
        }
        Ok(())
    }

    /// Report a terminated worker and release its region.
    pub fn close(&mut self, mut region: RenderRegion, exit: &WorkerExit) -> io::Result<()> {
        region.flush();

        let label = self.label(&region.subscription);
        let mut lines = vec![match exit {
            WorkerExit::Code(0) => format!("Subscription {label} finished."),
            WorkerExit::Code(code) => format!("Subscription {label} failed with exit code {code}."),
            WorkerExit::Signal => format!("Subscription {label} terminated by signal."),
            WorkerExit::Unknown(reason) => format!("Subscription {label} was lost: {reason}."),
        }];
        if let Some(line) = region.last_line() {
            lines.push(self.decorate_line(line));
        }
        if !exit.success() {
            lines.extend(region.errors().map(|e| self.decorate_error(e)));
        }

        if let Some(bar) = region.bar.take() {
            bar.finish_and_clear();
            if let Some(live) = &self.live {
                live.remove(&bar);
            }
        }
        self.write_permanent(&lines)
    }

    /// Report a worker that never started.
    pub fn spawn_failed(&mut self, subscription: &SubscriptionId, error: &io::Error) -> io::Result<()> {
        let label = self.label(subscription);
        self.write_permanent(&[format!("Subscription {label} could not be started: {error}.")])
    }

    /// Write lines above the live block, which is hidden meanwhile.
    fn write_permanent(&mut self, lines: &[String]) -> io::Result<()> {
        let out = &mut self.out;
        let mut write = || -> io::Result<()> {
            for line in lines {
                writeln!(out, "{line}")?;
            }
            out.flush()
        };

        match &self.live {
            Some(live) => live.suspend(write),
            None => write(),
        }
    }

    fn label(&self, id: &SubscriptionId) -> String {
        if self.interactive() {
            format!("{}({})", id.kind().blue(), id.value().cyan())
        } else {
            id.to_string()
        }
    }

    fn decorate_line(&self, line: &str) -> String {
        if !self.interactive() {
            return line.to_string();
        }
        match PROGRESS_LINE.captures(line) {
            Some(caps) => format!(
                "Subscription {}({}) processed {} events in {}.",
                caps["kind"].blue(),
                caps["id"].cyan(),
                format!("{:>4}", &caps["count"]).yellow(),
                caps["elapsed"].magenta(),
            ),
            None => line.to_string(),
        }
    }

    fn decorate_error(&self, line: &str) -> String {
        if self.interactive() {
            line.red().to_string()
        } else {
            line.to_string()
        }
    }
}
