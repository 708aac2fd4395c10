use crate::session::{Command, Mode, SessionSnapshot};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use rand::Rng;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Wrap},
    Terminal,
};
use std::io::stdout;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

const MENU: [&str; 4] = ["Play", "Search", "Default station", "Exit"];
const MENU_PLAY: usize = 0;
const MENU_SEARCH: usize = 1;
const MENU_DEFAULT: usize = 2;
const MENU_EXIT: usize = 3;

/// A key press, already interpreted for the current input mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UiAction {
    Up,
    Down,
    Activate,
    Quit,
    Type(char),
    Backspace,
    Submit,
    CancelSearch,
    Ignore,
}

pub fn map_key(key: KeyEvent, searching: bool) -> UiAction {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return UiAction::Quit;
    }

    if searching {
        return match key.code {
            KeyCode::Enter => UiAction::Submit,
            KeyCode::Esc => UiAction::CancelSearch,
            KeyCode::Backspace => UiAction::Backspace,
            KeyCode::Char(c) => UiAction::Type(c),
            _ => UiAction::Ignore,
        };
    }

    match key.code {
        KeyCode::Char('q') => UiAction::Quit,
        KeyCode::Up | KeyCode::Char('k') => UiAction::Up,
        KeyCode::Down | KeyCode::Char('j') => UiAction::Down,
        KeyCode::Char('p') if key.modifiers.contains(KeyModifiers::CONTROL) => UiAction::Up,
        KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => UiAction::Down,
        KeyCode::Enter | KeyCode::Char(' ') => UiAction::Activate,
        _ => UiAction::Ignore,
    }
}

#[derive(Default)]
pub struct UIState {
    cursor: usize,
    searching: bool,
    input: String,
    notice: Option<String>,
    wave_phase: f32,
}

impl UIState {
    fn new() -> Self {
        Self::default()
    }

    /// Updates local UI state; returns the session command the action asks for.
    pub fn apply(&mut self, action: UiAction) -> Option<Command> {
        match action {
            UiAction::Quit => return Some(Command::Quit),
            UiAction::Up => self.cursor = self.cursor.saturating_sub(1),
            UiAction::Down => self.cursor = (self.cursor + 1).min(MENU.len() - 1),
            UiAction::Activate => {
                self.notice = None;
                return match self.cursor {
                    MENU_PLAY => Some(Command::TogglePlay),
                    MENU_SEARCH => {
                        self.searching = true;
                        None
                    }
                    MENU_DEFAULT => Some(Command::SwitchToDefault),
                    MENU_EXIT => Some(Command::Quit),
                    _ => None,
                };
            }
            UiAction::Type(c) => self.input.push(c),
            UiAction::Backspace => {
                self.input.pop();
            }
            UiAction::CancelSearch => {
                self.input.clear();
                self.searching = false;
            }
            UiAction::Submit => {
                let tag = std::mem::take(&mut self.input);
                if tag.trim().is_empty() {
                    self.notice = Some("type a tag first (rock / metal / jazz / ...)".into());
                    return None;
                }
                self.searching = false;
                self.notice = None;
                return Some(Command::Search(tag));
            }
            UiAction::Ignore => {}
        }
        None
    }
}

/// Draws the session and forwards key presses as commands until quit.
///
/// Blocking; run it off the async runtime.
pub fn run_ui(
    snapshots: watch::Receiver<SessionSnapshot>,
    commands: mpsc::Sender<Command>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, snapshots, commands);

    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    snapshots: watch::Receiver<SessionSnapshot>,
    commands: mpsc::Sender<Command>,
) -> Result<()> {
    let mut ui_state = UIState::new();

    loop {
        if snapshots.has_changed().is_err() {
            debug!("session gone, leaving UI");
            break;
        }
        let snap = snapshots.borrow().clone();

        terminal.draw(|f| {
            let size = f.size();

            let chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(35), Constraint::Percentage(65)].as_ref())
                .split(size);

            f.render_widget(menu_panel(&ui_state, &snap), chunks[0]);
            f.render_widget(now_playing_panel(&mut ui_state, &snap), chunks[1]);
        })?;

        if crossterm::event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let action = map_key(key, ui_state.searching);
                if let Some(cmd) = ui_state.apply(action) {
                    let quit = cmd == Command::Quit;
                    if commands.blocking_send(cmd).is_err() || quit {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn menu_panel<'a>(ui_state: &UIState, snap: &SessionSnapshot) -> Paragraph<'a> {
    let mut lines = vec![];

    for (i, item) in MENU.iter().enumerate() {
        let label = if i == MENU_PLAY && snap.mode == Mode::Playing {
            "Pause"
        } else {
            *item
        };
        let line = if i == ui_state.cursor {
            Line::from(Span::styled(
                format!("> {}", label),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ))
        } else {
            Line::from(format!("  {}", label))
        };
        lines.push(line);
    }

    lines.push(Line::from(""));
    if ui_state.searching {
        lines.push(Line::from(Span::styled(
            "Search tag:",
            Style::default().fg(Color::Cyan),
        )));
        lines.push(Line::from(vec![
            Span::styled(
                ui_state.input.clone(),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("█", Style::default().fg(Color::Gray)),
        ]));
        lines.push(Line::from(Span::styled(
            "Enter: search  Esc: cancel",
            Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
        )));
    }
    if let Some(notice) = &ui_state.notice {
        lines.push(Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(Color::Yellow),
        )));
    }

    Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" Menu ")
            .border_style(Style::default().fg(Color::Magenta)),
    )
}

fn now_playing_panel<'a>(ui_state: &mut UIState, snap: &SessionSnapshot) -> Paragraph<'a> {
    let playing = snap.mode == Mode::Playing;
    let (status_icon, status_text, status_style) = match snap.mode {
        Mode::Playing => (
            "▶",
            "Playing",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Mode::Switching => ("…", "Switching", Style::default().fg(Color::Cyan)),
        Mode::Idle => ("⏸", "Stopped", Style::default().fg(Color::Yellow)),
    };

    let mut lines = vec![];

    lines.push(Line::from(vec![
        Span::raw("Status:  "),
        Span::styled(format!("{} {}", status_icon, status_text), status_style),
    ]));
    lines.push(Line::from(""));

    let (station_name, station_tags) = match &snap.current_station {
        Some(s) => (s.name.clone(), s.tags.clone()),
        None => ("none".to_string(), String::new()),
    };
    lines.push(Line::from(vec![
        Span::styled("Station: ", Style::default().fg(Color::Cyan)),
        Span::styled(
            station_name,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Tags:    ", Style::default().fg(Color::Cyan)),
        Span::raw(station_tags),
    ]));
    lines.push(Line::from(""));

    let title = if snap.song_title.is_empty() {
        if playing {
            "waiting for title..."
        } else {
            "-"
        }
    } else {
        snap.song_title.as_str()
    };
    lines.push(Line::from(vec![
        Span::styled("Title:   ", Style::default().fg(Color::Cyan)),
        Span::styled(
            title.to_string(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]));
    lines.push(Line::from(""));

    lines.push(Line::from(generate_waveform(&mut ui_state.wave_phase, playing)));
    lines.push(Line::from(""));

    if let Some(err) = &snap.last_error {
        lines.push(Line::from(vec![
            Span::styled("Error:   ", Style::default().fg(Color::Red)),
            Span::styled(err.clone(), Style::default().fg(Color::Red)),
        ]));
        lines.push(Line::from(""));
    }

    lines.push(Line::from(Span::styled(
        "─── Controls ───",
        Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
    )));
    lines.push(control_line("  ↑/↓ j/k", " : move"));
    lines.push(control_line("Enter/Space", " : select"));
    lines.push(Line::from(vec![
        Span::styled(
            "          q",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" : quit"),
    ]));

    Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" ☆ Now Playing ☆ ")
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(Color::Cyan)),
    )
}

fn control_line(keys: &'static str, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            keys,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(what),
    ])
}

fn generate_waveform(phase: &mut f32, is_playing: bool) -> String {
    let bar_count = 40;
    let mut rng = rand::thread_rng();

    if is_playing {
        *phase += 0.2;
    } else {
        *phase *= 0.95;
    }

    let mut bars = String::new();

    for i in 0..bar_count {
        let x = i as f32 / bar_count as f32;

        let wave1 = ((*phase + x * 8.0).sin() * 0.3 + 0.5).abs();
        let wave2 = (((*phase * 1.3) + x * 12.0).sin() * 0.2 + 0.5).abs();
        let wave3 = (((*phase * 0.7) + x * 4.0).cos() * 0.3 + 0.5).abs();

        let noise = rng.gen_range(-0.1..0.1);
        let combined = (wave1 + wave2 + wave3) / 3.0 + noise;
        let level = (combined * 10.0).clamp(0.0, 8.0) as u8;

        let final_level = if is_playing { level } else { 0 };

        let bar_char = match final_level {
            0 => '▁',
            1 => '▂',
            2 => '▃',
            3 => '▄',
            4 => '▅',
            5 => '▆',
            6 => '▇',
            _ => '█',
        };

        bars.push(bar_char);
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn letters_are_text_while_searching() {
        assert_eq!(map_key(key(KeyCode::Char('q')), false), UiAction::Quit);
        assert_eq!(map_key(key(KeyCode::Char('q')), true), UiAction::Type('q'));
        assert_eq!(map_key(key(KeyCode::Char('j')), true), UiAction::Type('j'));
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL), true),
            UiAction::Quit
        );
    }

    #[test]
    fn menu_items_map_to_commands() {
        let mut ui = UIState::new();
        assert_eq!(ui.apply(UiAction::Activate), Some(Command::TogglePlay));

        ui.apply(UiAction::Down);
        ui.apply(UiAction::Down);
        assert_eq!(ui.apply(UiAction::Activate), Some(Command::SwitchToDefault));

        for _ in 0..10 {
            ui.apply(UiAction::Down);
        }
        assert_eq!(ui.apply(UiAction::Activate), Some(Command::Quit));
    }

    #[test]
    fn search_prompt_collects_a_tag() {
        let mut ui = UIState::new();
        ui.apply(UiAction::Down);
        assert_eq!(ui.apply(UiAction::Activate), None);
        assert!(ui.searching);

        assert_eq!(ui.apply(UiAction::Submit), None);
        assert!(ui.notice.is_some());

        for c in "jazx".chars() {
            ui.apply(UiAction::Type(c));
        }
        ui.apply(UiAction::Backspace);
        ui.apply(UiAction::Type('z'));
        assert_eq!(ui.apply(UiAction::Submit), Some(Command::Search("jazz".into())));
        assert!(!ui.searching);
    }

    #[test]
    fn escape_leaves_search_without_a_command() {
        let mut ui = UIState::new();
        ui.searching = true;
        ui.apply(UiAction::Type('x'));
        assert_eq!(ui.apply(UiAction::CancelSearch), None);
        assert!(!ui.searching);
        assert!(ui.input.is_empty());
    }
}
