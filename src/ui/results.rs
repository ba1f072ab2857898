use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Span,
    widgets::{Block, Paragraph, Row, Table, Widget},
};
use shuttlerun::scoring::{ranked, FitnessCategory, GroupSummary, TestReport};

use crate::App;

fn category_color(category: FitnessCategory) -> Color {
    match category {
        FitnessCategory::Superior => Color::Magenta,
        FitnessCategory::Excellent => Color::Green,
        FitnessCategory::Good => Color::LightGreen,
        FitnessCategory::Fair => Color::Yellow,
        FitnessCategory::Poor => Color::LightRed,
        FitnessCategory::VeryPoor => Color::Red,
    }
}

/// One line under the table: mean and spread of the group's VO2max.
pub fn summary_line(reports: &[TestReport]) -> String {
    match GroupSummary::from_reports(reports) {
        Some(summary) => {
            let best = summary
                .best
                .map(|(name, vo2)| format!("   best {name} {vo2:.1}"))
                .unwrap_or_default();
            format!(
                "{} runners   mean VO2max {:.1} ± {:.1}{}",
                summary.count, summary.mean_vo2, summary.std_dev_vo2, best
            )
        }
        None => "no results".to_string(),
    }
}

pub fn render_results(app: &App, area: Rect, buf: &mut Buffer) {
    let reports = app.controller.reports();
    let bold_style = Style::default().add_modifier(Modifier::BOLD);
    let italic_style = Style::default().add_modifier(Modifier::ITALIC);

    let chunks = Layout::vertical([
        Constraint::Length(1), // title
        Constraint::Min(3),    // table
        Constraint::Length(1), // group summary
        Constraint::Length(1), // legend
    ])
    .horizontal_margin(super::HORIZONTAL_MARGIN)
    .split(area);

    let title = reports
        .first()
        .map(|r| format!("{} results", r.protocol))
        .unwrap_or_else(|| "results".to_string());
    Paragraph::new(Span::styled(title, bold_style))
        .alignment(Alignment::Center)
        .render(chunks[0], buf);

    let rows = ranked(&reports)
        .into_iter()
        .enumerate()
        .map(|(idx, r)| {
            Row::new(vec![
                Span::raw((idx + 1).to_string()),
                Span::raw(r.name.clone()),
                Span::raw(r.level_label()),
                Span::raw(format!("{} m", r.final_distance_m)),
                Span::raw(format!("{:.1}", r.vo2_max)),
                Span::styled(
                    r.fitness_category.to_string(),
                    Style::default().fg(category_color(r.fitness_category)),
                ),
                Span::raw(r.stop_reason.to_string()),
            ])
        })
        .collect::<Vec<_>>();

    Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(6),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec![
            "#", "runner", "level", "dist", "VO2max", "category", "outcome",
        ])
        .style(bold_style.add_modifier(Modifier::UNDERLINED)),
    )
    .block(Block::bordered())
    .render(chunks[1], buf);

    Paragraph::new(Span::styled(
        summary_line(&reports),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC),
    ))
    .alignment(Alignment::Center)
    .render(chunks[2], buf);

    Paragraph::new(Span::styled("(n)ew / (esc)ape", italic_style)).render(chunks[3], buf);
}
