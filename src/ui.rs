mod results;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Gauge, Paragraph, Row, Table, Widget},
};
use shuttlerun::{
    controller::{ParticipantView, SessionView},
    cues::ToneKind,
    participant::StopReason,
    Phase,
};

use crate::{format_duration, App, AppState};

const HORIZONTAL_MARGIN: u16 = 2;

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Live => render_live(self, area, buf),
            AppState::Results => results::render_results(self, area, buf),
        }
    }
}

fn phase_style(phase: Phase) -> Style {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    match phase {
        Phase::Idle => bold.fg(Color::Gray),
        Phase::Countdown => bold.fg(Color::Yellow),
        Phase::Running => bold.fg(Color::Green),
        Phase::Paused => bold.fg(Color::Magenta),
        Phase::Finished => bold.fg(Color::Cyan),
    }
}

fn render_live(app: &App, area: Rect, buf: &mut Buffer) {
    let view = app.controller.view();
    let bold_style = Style::default().add_modifier(Modifier::BOLD);
    let italic_style = Style::default().add_modifier(Modifier::ITALIC);

    let chunks = Layout::vertical([
        Constraint::Length(1), // header
        Constraint::Length(3), // level / countdown
        Constraint::Length(3), // shuttle gauge
        Constraint::Min(3),    // runners
        Constraint::Length(1), // last cue / message
        Constraint::Length(1), // legend
    ])
    .horizontal_margin(HORIZONTAL_MARGIN)
    .split(area);

    Paragraph::new(Line::from(vec![
        Span::styled(view.protocol.clone(), bold_style),
        Span::raw("  "),
        Span::styled(view.phase.to_string(), phase_style(view.phase)),
        Span::raw(format!("  vol {:.0}%", app.cues.volume() * 100.0)),
    ]))
    .render(chunks[0], buf);

    status_paragraph(&view, app.cues.last_tone()).render(chunks[1], buf);

    let label = format!(
        "{}  {} m  {}/{} running",
        format_duration(view.elapsed_secs),
        view.total_distance_m,
        view.active_participants,
        view.participants.len()
    );
    Gauge::default()
        .block(Block::bordered().title("shuttle"))
        .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
        .ratio(view.progress.clamp(0.0, 1.0))
        .label(label)
        .render(chunks[2], buf);

    runners_table(&view.participants, app.selected).render(chunks[3], buf);

    let note = app
        .message
        .clone()
        .or_else(|| app.cues.last_announcement())
        .unwrap_or_default();
    Paragraph::new(Span::styled(note, Style::default().fg(Color::Cyan)))
        .alignment(Alignment::Center)
        .render(chunks[4], buf);

    let legend = match view.phase {
        Phase::Idle => "(space) start / (1-9) select / (n)ew / (+/-) volume / (esc)ape",
        Phase::Finished => "(n)ew / (esc)ape",
        _ => "(space) pause / (s)top / (w)arn / (1-9,↑↓) select / (+/-) volume / (esc)ape",
    };
    Paragraph::new(Span::styled(legend, italic_style)).render(chunks[5], buf);
}

fn status_paragraph(view: &SessionView, last_tone: Option<ToneKind>) -> Paragraph<'static> {
    let big = Style::default().add_modifier(Modifier::BOLD);
    let lines = match view.phase {
        Phase::Idle => vec![Line::from(Span::styled(
            format!("{} levels ready, press space to start", view.total_levels),
            big.fg(Color::Gray),
        ))],
        Phase::Countdown => vec![Line::from(Span::styled(
            format!("starting in {}", view.countdown.unwrap_or(0)),
            big.fg(Color::Yellow),
        ))],
        Phase::Finished => vec![Line::from(Span::styled(
            match view.end_reason {
                Some(reason) => format!("test complete ({reason})"),
                None => "test complete".to_string(),
            },
            big.fg(Color::Cyan),
        ))],
        Phase::Running | Phase::Paused => {
            let level_style = if last_tone == Some(ToneKind::LevelUp) {
                big.fg(Color::Yellow)
            } else {
                big
            };
            vec![Line::from(vec![
                Span::styled(format!("Level {}", view.level), level_style),
                Span::raw(format!(
                    "   shuttle {}/{}   {:.1} km/h",
                    view.shuttle, view.shuttles_in_level, view.speed_kmh
                )),
            ])]
        }
    };

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::bordered())
}

fn result_cell(p: &ParticipantView) -> String {
    match p.result {
        Some(result) => {
            let verb = match result.reason {
                StopReason::Manual => "stopped",
                StopReason::Warnings => "eliminated",
                StopReason::ProtocolComplete => "completed",
            };
            format!("{verb} {}.{}", result.snapshot.level, result.snapshot.shuttle)
        }
        None => "running".to_string(),
    }
}

fn runners_table(participants: &[ParticipantView], selected: usize) -> Table<'static> {
    let rows = participants.iter().enumerate().map(|(idx, p)| {
        let style = match (idx == selected, p.result.is_some()) {
            (true, _) => Style::default().add_modifier(Modifier::REVERSED),
            (false, true) => Style::default().add_modifier(Modifier::DIM),
            (false, false) => Style::default(),
        };
        Row::new(vec![
            p.id.to_string(),
            p.name.clone(),
            "!".repeat(p.warnings as usize),
            result_cell(p),
            p.assessor.clone().unwrap_or_default(),
        ])
        .style(style)
    });

    Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(4),
            Constraint::Length(16),
            Constraint::Min(8),
        ],
    )
    .header(
        Row::new(vec!["#", "runner", "warn", "status", "assessor"])
            .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED)),
    )
    .block(Block::bordered().title("runners"))
}
