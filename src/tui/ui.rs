use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::Frame;

use super::app::{App, Outcome, TrackStatus, View};
use crate::format::format_time;

const ACCENT: Color = Color::Cyan;
const DIM: Color = Color::DarkGray;
const COMPLETE_COLOR: Color = Color::Green;
const ERROR_COLOR: Color = Color::Red;
const PROGRESS_COLOR: Color = Color::Yellow;
const RETRY_COLOR: Color = Color::Magenta;

const BAR_WIDTH: usize = 12;

pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Header
            Constraint::Min(5),   // Track table
            Constraint::Length(3), // Summary
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_track_table(frame, app, chunks[1]);
    render_summary(frame, app, chunks[2]);
    render_footer(frame, app, chunks[3]);

    if app.view == View::About {
        render_about_overlay(frame);
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let text = vec![
        Line::from(vec![
            Span::styled("Source:      ", Style::default().fg(DIM)),
            Span::styled(
                app.source.display().to_string(),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("Destination: ", Style::default().fg(DIM)),
            Span::styled(app.destination.display().to_string(), Style::default().fg(DIM)),
        ]),
    ];

    let block = Block::default()
        .title(Span::styled(
            " AutoSlice ",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    frame.render_widget(Paragraph::new(text).block(block), area);
}

pub fn progress_bar(percent: f64) -> String {
    let pct = percent.clamp(0.0, 100.0);
    let filled = ((pct / 100.0) * BAR_WIDTH as f64) as usize;
    let empty = BAR_WIDTH - filled;
    format!(
        "{}{} {:>3}%",
        "\u{2588}".repeat(filled),
        "\u{2591}".repeat(empty),
        pct as u32
    )
}

fn render_track_table(frame: &mut Frame, app: &mut App, area: Rect) {
    // 2 for borders, 1 for header
    let inner_height = area.height.saturating_sub(3) as usize;
    app.visible_rows = inner_height;

    let total = app.tracks.len();
    let scroll_info = if total > inner_height {
        let has_above = app.scroll_offset > 0;
        let has_below = app.scroll_offset + inner_height < total;
        match (has_above, has_below) {
            (true, true) => format!(" [{}-{}/{}] \u{2191}\u{2193} ", app.scroll_offset + 1, (app.scroll_offset + inner_height).min(total), total),
            (true, false) => format!(" [{}-{}/{}] \u{2191} ", app.scroll_offset + 1, total, total),
            (false, true) => format!(" [1-{}/{}] \u{2193} ", inner_height.min(total), total),
            (false, false) => String::new(),
        }
    } else {
        String::new()
    };

    let header = Row::new(vec![
        Cell::from("#").style(Style::default().fg(DIM)),
        Cell::from("File").style(Style::default().fg(DIM)),
        Cell::from("Progress").style(Style::default().fg(DIM)),
        Cell::from("Start").style(Style::default().fg(DIM)),
        Cell::from("Tries").style(Style::default().fg(DIM)),
        Cell::from("").style(Style::default().fg(DIM)),
    ])
    .height(1);

    let end = (app.scroll_offset + inner_height).min(app.tracks.len());
    let visible_slice = &app.tracks[app.scroll_offset..end];

    let rows: Vec<Row> = visible_slice
        .iter()
        .enumerate()
        .map(|(vi, (name, status))| {
            let actual_index = app.scroll_offset + vi;
            let num = format!("{}", actual_index + 1);
            let style = if actual_index == app.selected {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };

            let (progress, start, tries, glyph) = match status {
                TrackStatus::Pending => (
                    Cell::from("\u{00b7}").style(Style::default().fg(DIM)),
                    Cell::from(""),
                    Cell::from(""),
                    Cell::from("\u{00b7}").style(Style::default().fg(DIM)),
                ),
                TrackStatus::Encoding(pct) => (
                    Cell::from(progress_bar(*pct)).style(Style::default().fg(PROGRESS_COLOR)),
                    Cell::from(""),
                    Cell::from(""),
                    Cell::from("\u{27f3}").style(Style::default().fg(PROGRESS_COLOR)),
                ),
                TrackStatus::Retrying { attempt, message } => (
                    Cell::from(message.as_str()).style(Style::default().fg(RETRY_COLOR)),
                    Cell::from(""),
                    Cell::from(format!("{}", attempt)),
                    Cell::from("\u{21bb}").style(Style::default().fg(RETRY_COLOR)),
                ),
                TrackStatus::Done(result) => (
                    Cell::from(progress_bar(100.0)).style(Style::default().fg(COMPLETE_COLOR)),
                    Cell::from(format_time(result.start)),
                    Cell::from(format!("{}", result.attempts)),
                    Cell::from("\u{2713}").style(Style::default().fg(COMPLETE_COLOR)),
                ),
                TrackStatus::Failed(msg) => (
                    Cell::from(msg.as_str()).style(Style::default().fg(ERROR_COLOR)),
                    Cell::from(""),
                    Cell::from(""),
                    Cell::from("\u{2717}").style(Style::default().fg(ERROR_COLOR)),
                ),
            };

            Row::new(vec![num.into(), Cell::from(name.as_str()), progress, start, tries, glyph])
                .style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(4),
        Constraint::Min(20),
        Constraint::Length(24),
        Constraint::Length(10),
        Constraint::Length(6),
        Constraint::Length(2),
    ];

    let block = Block::default()
        .title(Span::styled(scroll_info, Style::default().fg(DIM)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().bg(Color::DarkGray));

    frame.render_widget(table, area);
}

pub fn summary_text(app: &App) -> String {
    let counts = format!("{}/{} exported", app.completed_count(), app.tracks.len());
    match &app.outcome {
        Some(Outcome::Finished { .. }) => format!("{} \u{2713} done", counts),
        Some(Outcome::Failed { message }) => format!("{} \u{2717} {}", counts, message),
        None if app.cancel_requested => format!("{} (cancelling after current track)", counts),
        None => counts,
    }
}

fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let color = match app.outcome {
        Some(Outcome::Finished { .. }) => COMPLETE_COLOR,
        Some(Outcome::Failed { .. }) => ERROR_COLOR,
        None => Color::White,
    };
    let paragraph = Paragraph::new(summary_text(app))
        .style(Style::default().fg(color))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT)),
        );
    frame.render_widget(paragraph, area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let keys = match app.view {
        View::Main if app.is_done() => "[a]bout  [q]uit",
        View::Main => "[c]ancel  [a]bout",
        View::About => "[Esc] close",
    };
    let footer = Paragraph::new(keys)
        .style(Style::default().fg(DIM))
        .alignment(Alignment::Center);
    frame.render_widget(footer, area);
}

fn render_about_overlay(frame: &mut Frame) {
    let area = centered_rect(44, 9, frame.area());
    frame.render_widget(Clear, area);

    let text = vec![
        Line::from(Span::styled(
            "AutoSlice",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("Version {}", env!("CARGO_PKG_VERSION"))),
        Line::from(""),
        Line::from("Splits continuous recordings into tracks."),
        Line::from(""),
        Line::from(Span::styled("[Esc] close", Style::default().fg(DIM))),
    ];

    let block = Block::default()
        .title(" About ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    frame.render_widget(
        Paragraph::new(text).alignment(Alignment::Center).block(block),
        area,
    );
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), format!("{}   0%", "\u{2591}".repeat(12)));
        assert_eq!(progress_bar(50.0), format!("{}{}  50%", "\u{2588}".repeat(6), "\u{2591}".repeat(6)));
        assert_eq!(progress_bar(150.0), format!("{} 100%", "\u{2588}".repeat(12)));
    }

    #[test]
    fn test_summary_text() {
        let mut app = App::new(&[], PathBuf::from("in.wav"), PathBuf::from("/out"));
        assert_eq!(summary_text(&app), "0/0 exported");
        app.cancel_requested = true;
        assert!(summary_text(&app).contains("cancelling"));
        app.outcome = Some(Outcome::Failed {
            message: "disk full".to_string(),
        });
        assert!(summary_text(&app).ends_with("disk full"));
    }
}
