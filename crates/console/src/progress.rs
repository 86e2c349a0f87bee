//! Single-line, overwritable progress status of one subscription run.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::QueueableCommand;
use crossterm::cursor::MoveToColumn;
use crossterm::terminal::{Clear, ClearType};

/// Human readable elapsed time: `< 1 sec`, `1 sec`, `12 secs`, `3 mins`, `2 hrs`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0 => "< 1 sec".to_string(),
        1 => "1 sec".to_string(),
        2..60 => format!("{secs} secs"),
        60..120 => "1 min".to_string(),
        120..3600 => format!("{} mins", secs / 60),
        3600..7200 => "1 hr".to_string(),
        _ => format!("{} hrs", secs / 3600),
    }
}

/// The status line for `label` (already rendered as `type(id)`).
pub fn progress_line(label: &str, count: u64, elapsed: Duration) -> String {
    format!(
        "Subscription {label} processed {count:>4} events in {}.",
        format_elapsed(elapsed)
    )
}

/// Tracks how many events a run processed and redraws one status line in place.
///
/// Redraws are skipped while the rendered text is unchanged.
#[derive(Debug)]
pub struct ProgressReporter<W: Write> {
    out: W,
    label: String,
    count: u64,
    started: Instant,
    drawn: Option<String>,
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(label: impl Into<String>, out: W) -> Self {
        Self {
            out,
            label: label.into(),
            count: 0,
            started: Instant::now(),
            drawn: None,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self) {
        self.count += 1;
    }

    pub fn render(&self) -> String {
        progress_line(&self.label, self.count, self.elapsed())
    }

    /// Overwrite the status line with the current state.
    pub fn draw(&mut self) -> io::Result<()> {
        let line = self.render();
        if self.drawn.as_deref() == Some(line.as_str()) {
            return Ok(());
        }

        if self.drawn.is_some() {
            self.out
                .queue(MoveToColumn(0))?
                .queue(Clear(ClearType::CurrentLine))?;
        }
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;

        self.drawn = Some(line);
        Ok(())
    }

    /// Draw the final state and leave it as a permanent line.
    pub fn finish(&mut self) -> io::Result<()> {
        self.draw()?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}
