//! Widgets for the ingest display.

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph};
use ratatui::Frame;
use std::collections::VecDeque;

use super::{MonthView, Phase};
use crate::ingest::RunSummary;

const ACTIVITY_CAPACITY: usize = 200;

fn frame_block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::Blue))
}

fn phase_style(phase: Phase) -> Style {
    let color = match phase {
        Phase::Complete => Color::Green,
        Phase::Failed => Color::Red,
        _ => Color::Cyan,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn count_span(value: u64, color: Color) -> Span<'static> {
    Span::styled(
        value.to_string(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )
}

/// Month, mode and phase, plus totals for every month of this invocation.
pub fn render_month(frame: &mut Frame, area: Rect, view: &MonthView, run: &RunSummary) {
    let month = view.month.map_or_else(|| "-------".to_string(), |m| m.to_string());
    let elapsed = view.started.map_or(0.0, |t| t.elapsed().as_secs_f64());
    let dim = Style::default().fg(Color::Gray);
    let style = phase_style(view.phase);

    let lines = vec![
        Line::from(vec![
            Span::styled(format!(" {} {}  ", view.phase.symbol(), month), style),
            Span::styled(view.phase.to_string(), style),
            Span::styled(format!("  {:.1}s", elapsed), dim),
        ]),
        Line::from(vec![Span::styled("   mode     ", dim), Span::raw(view.mode())]),
        Line::from(vec![
            Span::styled("   this run ", dim),
            count_span(run.completed as u64, Color::Green),
            Span::raw(" complete, "),
            count_span(run.failed as u64, if run.failed > 0 { Color::Red } else { Color::Gray }),
            Span::raw(" failed, "),
            count_span(run.inserted, Color::White),
            Span::raw(" inserted"),
        ]),
    ];

    frame.render_widget(
        Paragraph::new(lines).block(frame_block(" JWST Archive Ingest ")),
        area,
    );
}

/// Fetched, inserted and skipped counts for the current month, with a gauge
/// while its transaction is being written.
pub fn render_records(frame: &mut Frame, area: Rect, view: &MonthView) {
    let block = frame_block(" Records ");
    let inner = block.inner(area);
    frame.render_widget(block, area);
    let [counts_area, gauge_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Length(1)]).areas(inner);

    let c = view.counts;
    let counts = Line::from(vec![
        Span::raw(" fetched "),
        count_span(c.fetched, Color::White),
        Span::raw("   inserted "),
        count_span(c.inserted, Color::Green),
        Span::raw("   skipped "),
        count_span(c.skipped, Color::Yellow),
    ]);
    frame.render_widget(Paragraph::new(counts), counts_area);

    if let (Some((done, total)), Some(ratio)) = (view.written, view.write_ratio()) {
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Cyan).bg(Color::DarkGray))
            .ratio(ratio)
            .label(format!("written {}/{}", done, total));
        frame.render_widget(gauge, gauge_area);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Info,
    Success,
    Failure,
}

/// Bounded history of month outcomes and notices, newest last.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: VecDeque<(EntryKind, String)>,
}

impl ActivityLog {
    pub fn push(&mut self, kind: EntryKind, text: impl Into<String>) {
        if self.entries.len() == ACTIVITY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((kind, text.into()));
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let visible = area.height.saturating_sub(2) as usize;
        let items: Vec<ListItem> = self
            .entries
            .iter()
            .skip(self.entries.len().saturating_sub(visible))
            .map(|(kind, text)| {
                let (marker, color) = match kind {
                    EntryKind::Info => ("·", Color::Gray),
                    EntryKind::Success => ("✓", Color::Green),
                    EntryKind::Failure => ("✗", Color::Red),
                };
                ListItem::new(Line::from(vec![
                    Span::styled(format!(" {} ", marker), Style::default().fg(color)),
                    Span::raw(text.as_str()),
                ]))
            })
            .collect();

        frame.render_widget(List::new(items).block(frame_block(" Activity ")), area);
    }
}
