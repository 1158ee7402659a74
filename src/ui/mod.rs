use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, LineGauge, Paragraph, Tabs, Wrap};
use ratatui::Frame;
use strum::IntoEnumIterator;

use crate::app::state::{field_label, AppState, FieldInput, FormField, Section};
use crate::config::Palette;
use crate::content::{Link, Profile};
use crate::outbox::SubmitStatus;

pub fn draw_app(frame: &mut Frame, state: &AppState) {
    let palette = state.theme.palette();
    frame.render_widget(
        Block::default().style(Style::default().bg(palette.background).fg(palette.text)),
        frame.size(),
    );

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.size());

    render_navbar(frame, state, &palette, vertical[0]);
    match state.section {
        Section::Home => render_home(frame, &state.profile, &palette, vertical[1]),
        Section::About => render_about(frame, &state.profile, &palette, vertical[1]),
        Section::Skills => render_skills(frame, &state.profile, &palette, vertical[1]),
        Section::Projects => render_projects(frame, &state.profile, &palette, vertical[1]),
        Section::Experience => render_experience(frame, &state.profile, &palette, vertical[1]),
        Section::Contact => render_contact(frame, state, &palette, vertical[1]),
    }

    let status = Paragraph::new(build_status_line(state, &palette)).block(
        Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(palette.border)),
    );
    frame.render_widget(status, vertical[2]);
}

fn section_block<'a>(title: &'a str, palette: &Palette) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .title(Span::styled(
            title,
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_navbar(frame: &mut Frame, state: &AppState, palette: &Palette, area: Rect) {
    let titles: Vec<Line> = Section::iter()
        .enumerate()
        .map(|(idx, section)| Line::from(format!("{} {}", idx + 1, section)))
        .collect();
    let name = if state.profile.hero.name.is_empty() {
        "Portfolio".to_string()
    } else {
        state.profile.hero.name.clone()
    };
    let tabs = Tabs::new(titles)
        .select(state.section.index())
        .block(section_block("", palette).title(name))
        .style(Style::default().fg(palette.muted))
        .highlight_style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        );
    frame.render_widget(tabs, area);
}

fn render_home(frame: &mut Frame, profile: &Profile, palette: &Palette, area: Rect) {
    let hero = &profile.hero;
    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            hero.name.clone(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            hero.title.clone(),
            Style::default().fg(palette.accent_alt),
        )),
        Line::from(""),
        Line::from(hero.tagline.clone()),
    ];
    if !hero.roles.is_empty() {
        lines.push(Line::from(Span::styled(
            hero.roles.join("  •  "),
            Style::default().fg(palette.muted),
        )));
    }
    lines.push(Line::from(""));
    lines.extend(link_lines(hero.links.iter(), palette));
    let paragraph = Paragraph::new(lines)
        .block(section_block("Home", palette))
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_about(frame: &mut Frame, profile: &Profile, palette: &Palette, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let text: Vec<Line> = profile
        .about
        .paragraphs
        .iter()
        .flat_map(|p| [Line::from(p.clone()), Line::from("")])
        .collect();
    frame.render_widget(
        Paragraph::new(text)
            .block(section_block("About", palette))
            .wrap(Wrap { trim: true }),
        columns[0],
    );

    let mut highlights = Vec::new();
    for highlight in &profile.about.highlights {
        highlights.push(Line::from(Span::styled(
            highlight.title.clone(),
            Style::default()
                .fg(palette.accent_alt)
                .add_modifier(Modifier::BOLD),
        )));
        highlights.push(Line::from(Span::styled(
            highlight.description.clone(),
            Style::default().fg(palette.muted),
        )));
        highlights.push(Line::from(""));
    }
    frame.render_widget(
        Paragraph::new(highlights)
            .block(section_block("Highlights", palette))
            .wrap(Wrap { trim: true }),
        columns[1],
    );
}

fn render_skills(frame: &mut Frame, profile: &Profile, palette: &Palette, area: Rect) {
    let outer = section_block("Skills", palette);
    let inner = outer.inner(area);
    frame.render_widget(outer, area);
    if profile.skills.is_empty() {
        frame.render_widget(Paragraph::new("No skills listed."), inner);
        return;
    }

    let constraints: Vec<Constraint> = profile
        .skills
        .iter()
        .map(|c| Constraint::Length(to_u16(c.skills.len()).saturating_add(2)))
        .chain(std::iter::once(Constraint::Min(0)))
        .collect();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);

    for (category, row) in profile.skills.iter().zip(rows.iter()) {
        let block = Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(palette.border))
            .title(Span::styled(
                category.title.clone(),
                Style::default().fg(palette.accent_alt),
            ));
        let gauge_area = block.inner(*row);
        frame.render_widget(block, *row);
        for (idx, skill) in category.skills.iter().enumerate() {
            let line = Rect {
                y: gauge_area.y.saturating_add(to_u16(idx)),
                height: 1,
                ..gauge_area
            };
            if line.y >= gauge_area.bottom() {
                break;
            }
            let gauge = LineGauge::default()
                .ratio(skill.ratio())
                .label(skill_label(&skill.name, skill.level))
                .gauge_style(Style::default().fg(palette.accent).bg(palette.surface));
            frame.render_widget(gauge, line);
        }
    }
}

fn skill_label(name: &str, level: u8) -> String {
    format!("{name:<14} {level:>3}%")
}

fn render_projects(frame: &mut Frame, profile: &Profile, palette: &Palette, area: Rect) {
    let mut lines = Vec::new();
    for project in &profile.projects {
        lines.push(Line::from(Span::styled(
            project.title.clone(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(project.description.clone()));
        if !project.tech.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("[{}]", project.tech.join("] [")),
                Style::default().fg(palette.accent_alt),
            )));
        }
        for feature in &project.features {
            lines.push(Line::from(format!("  • {feature}")));
        }
        for (label, link) in [("code", &project.code_link), ("demo", &project.demo_link)] {
            if let Some(link) = link.as_deref().filter(|l| !l.is_empty()) {
                lines.push(Line::from(Span::styled(
                    format!("  {label}: {link}"),
                    Style::default().fg(palette.muted),
                )));
            }
        }
        lines.push(Line::from(""));
    }
    if lines.is_empty() {
        lines.push(Line::from("No projects yet."));
    }
    frame.render_widget(
        Paragraph::new(lines)
            .block(section_block("Projects", palette))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn render_experience(frame: &mut Frame, profile: &Profile, palette: &Palette, area: Rect) {
    let mut lines = Vec::new();
    for entry in &profile.experience {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{:<13}", entry.kind.to_string()),
                Style::default().fg(palette.accent_alt),
            ),
            Span::styled(
                entry.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]));
        lines.push(Line::from(Span::styled(
            format!("{:<13}{} · {}", "", entry.organization, entry.period),
            Style::default().fg(palette.muted),
        )));
        lines.push(Line::from(format!("{:<13}{}", "", entry.description)));
        if let Some(link) = entry.link.as_deref().filter(|l| !l.is_empty()) {
            lines.push(Line::from(Span::styled(
                format!("{:<13}{link}", ""),
                Style::default().fg(palette.accent),
            )));
        }
        lines.push(Line::from(""));
    }
    frame.render_widget(
        Paragraph::new(lines)
            .block(section_block("Experience", palette))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn render_contact(frame: &mut Frame, state: &AppState, palette: &Palette, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let details = &state.profile.contact;
    let mut lines = Vec::new();
    for info in &details.info {
        lines.push(Line::from(Span::styled(
            info.label.clone(),
            Style::default().fg(palette.muted),
        )));
        lines.push(Line::from(
            info.value.clone().unwrap_or_else(|| info.href.clone()),
        ));
        lines.push(Line::from(""));
    }
    lines.extend(link_lines(details.visible_social(), palette));
    frame.render_widget(
        Paragraph::new(lines)
            .block(section_block("Get in touch", palette))
            .wrap(Wrap { trim: true }),
        columns[0],
    );

    render_form(frame, state, palette, columns[1]);
}

fn render_form(frame: &mut Frame, state: &AppState, palette: &Palette, area: Rect) {
    let outer = section_block("Send a message", palette);
    let inner = outer.inner(area);
    frame.render_widget(outer, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(2),
        ])
        .split(inner);

    let active = state.is_form_active();
    for (field, row) in FormField::iter().zip(rows.iter()) {
        let input = state.form.field(field);
        let focused = active && state.form.focused == field;
        let border = if focused {
            palette.accent
        } else {
            palette.border
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(field_title(field));
        let paragraph = Paragraph::new(Text::from(input.value().to_string())).block(block);
        frame.render_widget(paragraph, *row);
        if focused {
            if let Some((x, y)) = field_cursor_position(input, *row) {
                frame.set_cursor(x, y);
            }
        }
    }

    if let Some(status) = state.submit_status() {
        let color = match status {
            SubmitStatus::Sent => palette.accent,
            SubmitStatus::Queued { .. } => palette.accent_alt,
            SubmitStatus::Failed => palette.error,
        };
        frame.render_widget(
            Paragraph::new(Span::styled(status.message(), Style::default().fg(color)))
                .wrap(Wrap { trim: true }),
            rows[4],
        );
    }
}

fn field_title(field: FormField) -> String {
    let label = field_label(field);
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => format!("{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

fn field_cursor_position(input: &FieldInput, area: Rect) -> Option<(u16, u16)> {
    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    if inner_width == 0 || inner_height == 0 {
        return None;
    }
    let (row, col) = input.cursor_position();
    let row = to_u16(row).min(inner_height - 1);
    let col = to_u16(col).min(inner_width - 1);
    Some((
        area.x.saturating_add(1).saturating_add(col),
        area.y.saturating_add(1).saturating_add(row),
    ))
}

/// Terminal coordinates are `u16`; larger counts pin to the edge.
fn to_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

fn link_lines<'a>(links: impl Iterator<Item = &'a Link>, palette: &Palette) -> Vec<Line<'static>> {
    links
        .filter(|link| link.is_visible())
        .map(|link| {
            Line::from(vec![
                Span::styled(
                    format!("{:<10}", link.label),
                    Style::default()
                        .fg(palette.accent_alt)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(link.href.clone(), Style::default().fg(palette.muted)),
            ])
        })
        .collect()
}

fn build_status_line(state: &AppState, palette: &Palette) -> Text<'static> {
    let pending = state.pending_count();
    let queue_style = if pending > 0 {
        Style::default()
            .fg(palette.accent_alt)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(palette.muted)
    };
    let mut spans = vec![
        Span::raw(format!("Theme: {} ", state.theme)),
        Span::raw(" | Queued: "),
        Span::styled(pending.to_string(), queue_style),
    ];
    if let Some(message) = state.status_message() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.to_string(),
            Style::default().add_modifier(Modifier::ITALIC),
        ));
    }
    let hints = if state.is_form_active() {
        "Tab/↑↓ field  Ctrl-s send  Esc leave form"
    } else {
        "1-6/Tab sections  t theme  c contact  r retry  q quit"
    };
    Text::from(vec![
        Line::from(spans),
        Line::from(Span::styled(hints, Style::default().fg(palette.muted))),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThemeFlag;
    use crate::content::{Skill, SkillCategory};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn rendered(state: &AppState) -> anyhow::Result<String> {
        let mut terminal = Terminal::new(TestBackend::new(110, 40))?;
        terminal.draw(|frame| draw_app(frame, state))?;
        Ok(terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect())
    }

    #[test]
    fn status_line_shows_queue_count() {
        let mut state = AppState::new(Profile::default(), ThemeFlag::Light);
        state.set_pending_count(3);
        let text = build_status_line(&state, &ThemeFlag::Light.palette());
        let first: String = text.lines[0]
            .spans
            .iter()
            .map(|s| s.content.as_ref())
            .collect();
        assert_eq!(first, "Theme: light  | Queued: 3");
    }

    #[test]
    fn skill_label_pads_name_and_level() {
        assert_eq!(skill_label("Rust", 85), "Rust            85%");
    }

    #[test]
    fn field_cursor_stays_inside_the_box() {
        let mut input = FieldInput::default();
        input.set("x".repeat(50));
        let area = Rect::new(10, 5, 20, 3);
        assert_eq!(field_cursor_position(&input, area), Some((28, 6)));
        assert_eq!(field_cursor_position(&input, Rect::new(0, 0, 2, 2)), None);

        // 65_538 lines would wrap to row 2 if narrowed with a plain cast.
        input.set("\n".repeat(65_538));
        let tall = Rect::new(10, 5, 20, 12);
        assert_eq!(field_cursor_position(&input, tall), Some((11, 15)));
        assert_eq!(to_u16(70_000), u16::MAX);
    }

    #[test]
    fn oversized_skill_list_renders_without_overflow() -> anyhow::Result<()> {
        let mut profile = Profile::default();
        profile.skills.push(SkillCategory {
            title: "Everything".into(),
            skills: (0..usize::from(u16::MAX))
                .map(|idx| Skill {
                    name: format!("skill {idx}"),
                    level: 50,
                })
                .collect(),
        });
        let mut state = AppState::new(profile, ThemeFlag::Dark);
        state.select_section(Section::Skills);
        let screen = rendered(&state)?;
        assert!(screen.contains("skill 0"));
        Ok(())
    }

    #[test]
    fn every_section_renders() -> anyhow::Result<()> {
        let mut state = AppState::new(Profile::sample()?, ThemeFlag::Dark);
        for section in Section::iter() {
            state.select_section(section);
            let screen = rendered(&state)?;
            assert!(screen.contains("6 Contact"));
        }
        state.select_section(Section::Contact);
        state.apply_submit(SubmitStatus::Failed);
        let screen = rendered(&state)?;
        assert!(screen.contains("Failed to send or save message."));
        assert!(!screen.contains("Discord"), "empty social links are hidden");
        Ok(())
    }
}
