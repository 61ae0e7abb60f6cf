//! Ingest display.
//!
//! The job reports month boundaries, phase changes and running record
//! counts through [`Ui`]. `ingest --tui` renders them with ratatui; other
//! runs forward them to `tracing` or drop them.

mod components;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::Terminal;
use std::fmt;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::ingest::{JobOutcome, RunSummary};
use crate::model::{IngestionCounts, Month};
use components::{ActivityLog, EntryKind};

/// Minimum gap between redraws triggered by count updates.
const REDRAW_INTERVAL: Duration = Duration::from_millis(50);

/// Where the job is within one month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Resolving,
    Fetching,
    Writing,
    Complete,
    Failed,
}

impl Phase {
    fn symbol(self) -> &'static str {
        match self {
            Phase::Resolving => "◐",
            Phase::Fetching => "↓",
            Phase::Writing => "⚙",
            Phase::Complete => "✓",
            Phase::Failed => "✗",
        }
    }

    /// Phase shown once a month has ended with `outcome`.
    fn after(outcome: &JobOutcome) -> Phase {
        if outcome.is_failure() {
            Phase::Failed
        } else {
            Phase::Complete
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Resolving => write!(f, "Checking ledger"),
            Phase::Fetching => write!(f, "Fetching archive records"),
            Phase::Writing => write!(f, "Writing observations"),
            Phase::Complete => write!(f, "Complete"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Receives ingestion events from [`crate::ingest::IngestionJob`].
pub trait Ui {
    fn begin_month(&mut self, month: Month, force: bool);
    fn set_phase(&mut self, phase: Phase);
    /// Running totals for the current month.
    fn update_counts(&mut self, counts: IngestionCounts);
    /// `done` of `total` normalized records written in the month's transaction.
    fn write_progress(&mut self, done: u64, total: u64);
    fn finish_month(&mut self, outcome: &JobOutcome);
    fn log(&mut self, message: impl Into<String>);

    /// Whether the operator asked to stop. Checked between months.
    fn should_stop(&mut self) -> bool {
        false
    }
}

/// State of the month currently being ingested.
#[derive(Debug, Clone, Default)]
pub struct MonthView {
    pub month: Option<Month>,
    pub force: bool,
    pub phase: Phase,
    pub counts: IngestionCounts,
    pub written: Option<(u64, u64)>,
    pub started: Option<Instant>,
}

impl MonthView {
    pub fn begin(&mut self, month: Month, force: bool) {
        *self = MonthView {
            month: Some(month),
            force,
            started: Some(Instant::now()),
            ..MonthView::default()
        };
    }

    pub fn mode(&self) -> &'static str {
        if self.force {
            "forced re-fetch"
        } else {
            "incremental"
        }
    }

    pub fn write_ratio(&self) -> Option<f64> {
        self.written.map(|(done, total)| {
            if total == 0 {
                1.0
            } else {
                (done as f64 / total as f64).min(1.0)
            }
        })
    }

    fn finish(&mut self, outcome: &JobOutcome) {
        self.phase = Phase::after(outcome);
        if let JobOutcome::Completed { counts, .. } = outcome {
            self.counts = *counts;
        }
    }
}

/// Full-screen display for `ingest --tui`. Restores the terminal on drop.
pub struct UiApp {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    view: MonthView,
    run: RunSummary,
    activity: ActivityLog,
    last_draw: Option<Instant>,
    stop_requested: bool,
}

impl UiApp {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        io::stdout().execute(EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

        Ok(Self {
            terminal,
            view: MonthView::default(),
            run: RunSummary::default(),
            activity: ActivityLog::default(),
            last_draw: None,
            stop_requested: false,
        })
    }

    /// Redraw now, or only if the last frame is older than the interval.
    fn redraw(&mut self, now: bool) {
        if !now && self.last_draw.is_some_and(|t| t.elapsed() < REDRAW_INTERVAL) {
            return;
        }
        let (view, run, activity) = (&self.view, &self.run, &self.activity);
        let drawn = self.terminal.draw(|frame| {
            let [header, records, log] = Layout::vertical([
                Constraint::Length(5),
                Constraint::Length(4),
                Constraint::Min(3),
            ])
            .areas(frame.area());
            components::render_month(frame, header, view, run);
            components::render_records(frame, records, view);
            activity.render(frame, log);
        });
        if let Err(e) = drawn {
            debug!(error = %e, "redraw failed");
        }
        self.last_draw = Some(Instant::now());
    }

    /// Drain pending key events. `q`, Esc and Ctrl+C request a stop.
    fn poll_stop(&mut self) -> bool {
        while event::poll(Duration::ZERO).unwrap_or(false) {
            let Ok(Event::Key(key)) = event::read() else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
            if ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                if !self.stop_requested {
                    self.activity
                        .push(EntryKind::Info, "Stopping after the current month");
                    self.redraw(true);
                }
                self.stop_requested = true;
            }
        }
        self.stop_requested
    }

    /// Show the run summary and hold the screen until a key is pressed.
    pub fn finish(mut self, summary: &str) -> Result<()> {
        self.activity.push(EntryKind::Info, summary);
        self.activity.push(EntryKind::Info, "Press any key to exit");
        self.redraw(true);

        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(());
                }
            }
        }
    }
}

impl Ui for UiApp {
    fn begin_month(&mut self, month: Month, force: bool) {
        self.view.begin(month, force);
        self.activity
            .push(EntryKind::Info, format!("{} started ({})", month, self.view.mode()));
        self.redraw(true);
    }

    fn set_phase(&mut self, phase: Phase) {
        self.view.phase = phase;
        self.redraw(true);
    }

    fn update_counts(&mut self, counts: IngestionCounts) {
        self.view.counts = counts;
        self.redraw(false);
    }

    fn write_progress(&mut self, done: u64, total: u64) {
        self.view.written = Some((done, total));
        self.redraw(false);
    }

    fn finish_month(&mut self, outcome: &JobOutcome) {
        self.view.finish(outcome);
        self.run.record(outcome);
        let kind = match outcome {
            JobOutcome::Failed { .. } => EntryKind::Failure,
            JobOutcome::Completed { .. } => EntryKind::Success,
            _ => EntryKind::Info,
        };
        self.activity.push(kind, outcome.to_string());
        self.redraw(true);
    }

    fn log(&mut self, message: impl Into<String>) {
        self.activity.push(EntryKind::Info, message);
        self.redraw(false);
    }

    fn should_stop(&mut self) -> bool {
        self.poll_stop()
    }
}

impl Drop for UiApp {
    fn drop(&mut self) {
        terminal::disable_raw_mode().ok();
        self.terminal
            .backend_mut()
            .execute(LeaveAlternateScreen)
            .ok();
        self.terminal.show_cursor().ok();
    }
}

/// Forwards job events to `tracing` for non-interactive runs.
#[derive(Debug, Default)]
pub struct LogUi {
    view: MonthView,
}

impl LogUi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ui for LogUi {
    fn begin_month(&mut self, month: Month, force: bool) {
        self.view.begin(month, force);
        debug!(month = %month, mode = self.view.mode(), "month started");
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.view.phase != phase {
            self.view.phase = phase;
            debug!(phase = %phase, "phase");
        }
    }

    fn update_counts(&mut self, counts: IngestionCounts) {
        self.view.counts = counts;
    }

    // Per-batch write ticks are too chatty for a log
    fn write_progress(&mut self, _done: u64, _total: u64) {}

    fn finish_month(&mut self, outcome: &JobOutcome) {
        self.view.finish(outcome);
        let elapsed = self.view.started.map_or(0.0, |t| t.elapsed().as_secs_f64());
        debug!(outcome = %outcome, elapsed_s = elapsed, "month finished");
    }

    fn log(&mut self, message: impl Into<String>) {
        info!("{}", message.into());
    }
}

/// Discards every event. Used by tests.
#[derive(Debug, Default)]
pub struct SilentUi;

impl SilentUi {
    pub fn new() -> Self {
        Self
    }
}

impl Ui for SilentUi {
    fn begin_month(&mut self, _month: Month, _force: bool) {}
    fn set_phase(&mut self, _phase: Phase) {}
    fn update_counts(&mut self, _counts: IngestionCounts) {}
    fn write_progress(&mut self, _done: u64, _total: u64) {}
    fn finish_month(&mut self, _outcome: &JobOutcome) {}
    fn log(&mut self, _message: impl Into<String>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn test_begin_resets_view() {
        let mut view = MonthView::default();
        view.begin(month("2022-07"), false);
        view.phase = Phase::Writing;
        view.counts.fetched = 40;
        view.written = Some((10, 40));

        view.begin(month("2022-08"), true);
        assert_eq!(view.month, Some(month("2022-08")));
        assert_eq!(view.phase, Phase::Resolving);
        assert_eq!(view.counts, IngestionCounts::default());
        assert!(view.written.is_none());
        assert_eq!(view.mode(), "forced re-fetch");
    }

    #[test]
    fn test_write_ratio() {
        let mut view = MonthView::default();
        assert_eq!(view.write_ratio(), None);
        view.written = Some((25, 100));
        assert_eq!(view.write_ratio(), Some(0.25));
        view.written = Some((0, 0));
        assert_eq!(view.write_ratio(), Some(1.0));
    }

    #[test]
    fn test_finish_takes_final_counts_and_phase() {
        let m = month("2022-07");
        let mut view = MonthView::default();
        view.begin(m, false);

        let counts = IngestionCounts { fetched: 3, inserted: 2, skipped: 1 };
        view.finish(&JobOutcome::Completed { month: m, counts, replaced: 0 });
        assert_eq!(view.phase, Phase::Complete);
        assert_eq!(view.counts, counts);

        view.finish(&JobOutcome::Failed { month: m, error: "timeout".into() });
        assert_eq!(view.phase, Phase::Failed);
    }

    #[test]
    fn test_log_ui_tracks_phase() {
        let mut ui = LogUi::new();
        ui.begin_month(month("2022-07"), false);
        ui.set_phase(Phase::Fetching);
        ui.set_phase(Phase::Fetching);
        assert_eq!(ui.view.phase, Phase::Fetching);
        assert!(!ui.should_stop());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Fetching.to_string(), "Fetching archive records");
        assert_eq!(Phase::Failed.symbol(), "✗");
    }
}
