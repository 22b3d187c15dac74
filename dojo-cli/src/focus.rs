use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::io::{self, Stdout};

use dojo_core::timer::TICK;
use dojo_core::{Task, TimerReading, Urgency};

use crate::app::App;
use crate::render;

struct FocusView {
    task: Task,
    reading: TimerReading,
    banner: Option<String>,
    struck: bool,
}

impl FocusView {
    fn new(task: Task, now: DateTime<Utc>) -> Self {
        let reading = TimerReading::at(task.end_time, now);
        Self {
            task,
            reading,
            banner: None,
            struck: false,
        }
    }

    /// Recompute from the wall clock; never counts down by itself.
    fn refresh(&mut self, now: DateTime<Utc>) {
        self.reading = TimerReading::at(self.task.end_time, now);
    }

    fn timer_color(&self) -> Color {
        if self.reading.is_expired {
            return Color::Red;
        }
        match self.reading.urgency() {
            Urgency::Calm => Color::Green,
            Urgency::Focused => Color::Yellow,
            Urgency::Critical => Color::Red,
        }
    }

    fn timer_text(&self) -> String {
        if self.reading.is_expired {
            "Time's Up!".to_string()
        } else {
            self.reading.to_string()
        }
    }
}

pub async fn run_focus(app: &App) -> Result<()> {
    app.require_user()?;
    let Some(task) = app.dojo.tasks().active_task() else {
        bail!("No active kata. Run: dojo kata start <id>");
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = focus_loop(&mut terminal, app, task).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

async fn focus_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &App,
    task: Task,
) -> Result<()> {
    let mut view = FocusView::new(task, Utc::now());
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    loop {
        terminal.draw(|f| draw(f, &view))?;

        tokio::select! {
            _ = tick.tick() => view.refresh(Utc::now()),
            next = events.next() => match next {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('g') if !view.struck => {
                        match app.dojo.tasks().complete(&view.task.id).await {
                            Ok(Some(completion)) => {
                                view.banner = Some(render::completion_lines(&completion).join("   "));
                                view.struck = true;
                            }
                            Ok(None) => {
                                view.banner = Some("Already completed.".to_string());
                                view.struck = true;
                            }
                            Err(err) => view.banner = Some(format!("Gong failed: {err}")),
                        }
                    }
                    _ => {}
                },
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
        }
    }
    Ok(())
}

fn draw(f: &mut Frame, view: &FocusView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(f.area());

    let header = Paragraph::new(Text::from(vec![
        Line::from(Span::styled(
            view.task.title.clone(),
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::raw(render::flames(&view.task)),
            Span::styled(
                format!("  {} XP on the gong", view.task.potential_xp()),
                Style::default().fg(Color::Gray),
            ),
        ]),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title("focus"));
    f.render_widget(header, chunks[0]);

    let timer = Paragraph::new(Text::from(vec![
        Line::raw(""),
        Line::from(Span::styled(
            view.timer_text(),
            Style::default()
                .fg(view.timer_color())
                .add_modifier(Modifier::BOLD),
        )),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title("remaining"));
    f.render_widget(timer, chunks[1]);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(view.timer_color()))
        .ratio(view.reading.progress());
    f.render_widget(gauge, chunks[2]);

    let footer_text = match &view.banner {
        Some(banner) => banner.clone(),
        None => "g = strike the gong   q = quit".to_string(),
    };
    let footer = Paragraph::new(footer_text)
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Cyan))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[3]);
}
