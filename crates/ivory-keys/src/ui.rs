//! TUI rendering for the piano
//!
//! Everything is drawn from a [`Piano`] session: the keyboard with lit and
//! scale-highlighted keys, rising particles, the notation strip, the side
//! panels and a status line. Key positions come from [`KeyboardGeometry`],
//! which the event loop also uses to map mouse positions back to keys.

use crate::app::{Action, Panel, Piano};
use crate::config::Theme;
use crate::envelope::AdsrField;
use crate::feedback::{Staff, MAX_NOTATION_NOTES};
use crate::input::ReleaseMode;
use crate::note::Note;
use crossterm::event::KeyCode;
use ratatui::layout::Position;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Rows reserved above the keys for particles
const PARTICLE_ROWS: u16 = 4;
/// Height of the keyboard including its border
const KEYBOARD_ROWS: u16 = 10;
/// Height of the notation panel: eleven steps per staff plus borders
const SHEET_ROWS: u16 = 24;
/// Columns per note on the notation strip
const SHEET_NOTE_WIDTH: usize = 4;

/// Screen areas of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub panels: Rect,
    pub particles: Rect,
    pub keyboard: Rect,
    pub help: Rect,
}

impl Screen {
    pub fn split(area: Rect) -> Self {
        let [panels, particles, keyboard, help] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(PARTICLE_ROWS),
            Constraint::Length(KEYBOARD_ROWS),
            Constraint::Length(1),
        ])
        .areas(area);
        Self {
            panels,
            particles,
            keyboard,
            help,
        }
    }

    /// Where the keys themselves are drawn (inside the keyboard border)
    pub fn keys(&self) -> Rect {
        Block::default().borders(Borders::ALL).inner(self.keyboard)
    }
}

/// Positions of every key on screen
#[derive(Debug, Clone, Default)]
pub struct KeyboardGeometry {
    white: Vec<(Note, Rect)>,
    black: Vec<(Note, Rect)>,
}

impl KeyboardGeometry {
    /// Lay out `notes` (ascending, starting and ending on white keys) in `area`
    pub fn new(notes: &[Note], area: Rect) -> Self {
        let white_count = notes.iter().filter(|n| !n.is_black_key()).count() as u16;
        if white_count == 0 || area.width == 0 || area.height == 0 {
            return Self::default();
        }
        let key_width = (area.width / white_count).clamp(2, 6);
        let total = key_width * white_count;
        let left = area.x + area.width.saturating_sub(total) / 2;
        let black_width = (key_width * 2 / 3).max(1);
        let black_height = (area.height * 3 / 5).max(1);

        let mut geometry = Self::default();
        let mut x = left;
        for note in notes {
            if note.is_black_key() {
                let start = x.saturating_sub(black_width / 2 + black_width % 2);
                geometry.black.push((*note, Rect::new(start, area.y, black_width, black_height)));
            } else {
                geometry.white.push((*note, Rect::new(x, area.y, key_width, area.height)));
                x += key_width;
            }
        }
        let right = area.right();
        geometry.white.retain(|(_, r)| r.right() <= right);
        geometry.black.retain(|(_, r)| r.right() <= right);
        geometry
    }

    pub fn white_keys(&self) -> &[(Note, Rect)] {
        &self.white
    }

    pub fn black_keys(&self) -> &[(Note, Rect)] {
        &self.black
    }

    /// The key under a screen cell; black keys sit on top
    pub fn note_at(&self, column: u16, row: u16) -> Option<Note> {
        let pos = Position::new(column, row);
        self.black
            .iter()
            .chain(self.white.iter())
            .find(|(_, rect)| rect.contains(pos))
            .map(|(note, _)| *note)
    }

    /// Centre column of a key, if it is on screen
    pub fn center_of(&self, note: Note) -> Option<u16> {
        self.white
            .iter()
            .chain(self.black.iter())
            .find(|(n, _)| *n == note)
            .map(|(_, rect)| rect.x + rect.width / 2)
    }
}

/// Control keys. Character keys are never used here, they belong to the piano.
pub fn action_for_key(code: KeyCode) -> Option<Action> {
    let action = match code {
        KeyCode::Left => Action::VolumeDown,
        KeyCode::Right => Action::VolumeUp,
        KeyCode::Up => Action::TransposeUp,
        KeyCode::Down => Action::TransposeDown,
        KeyCode::Tab => Action::NextInstrument,
        KeyCode::BackTab => Action::PrevInstrument,
        KeyCode::F(1) => Action::TogglePanel(Panel::Sheet),
        KeyCode::F(2) => Action::TogglePanel(Panel::Metronome),
        KeyCode::F(3) => Action::TogglePanel(Panel::Envelope),
        KeyCode::F(4) => Action::TogglePanel(Panel::Scale),
        KeyCode::F(5) => Action::ToggleMetronome,
        KeyCode::PageUp => Action::BpmUp,
        KeyCode::PageDown => Action::BpmDown,
        KeyCode::F(6) => Action::NextTimeSignature,
        KeyCode::F(7) => Action::NextEnvelopeField,
        KeyCode::Insert => Action::EnvelopeUp,
        KeyCode::Delete => Action::EnvelopeDown,
        KeyCode::F(8) => Action::ResetEnvelope,
        KeyCode::F(9) => Action::NextScaleRoot,
        KeyCode::F(10) => Action::NextScaleKind,
        KeyCode::F(11) => Action::MetronomeVolumeDown,
        KeyCode::F(12) => Action::MetronomeVolumeUp,
        KeyCode::Home => Action::SustainShorter,
        KeyCode::End => Action::SustainLonger,
        KeyCode::Backspace => Action::ClearNotation,
        _ => return None,
    };
    Some(action)
}

/// Extra information the event loop knows about
#[derive(Debug, Clone, Copy, Default)]
pub struct InputStatus {
    pub os_keyboard_active: bool,
    pub has_focus: bool,
}

/// Draw a full frame
pub fn render(frame: &mut Frame, piano: &mut Piano, theme: &Theme, status: InputStatus) {
    let area = frame.area();
    frame.render_widget(Clear, area);
    frame.render_widget(Block::default().style(Style::default().bg(Color::Rgb(20, 20, 30))), area);

    let screen = Screen::split(area);
    let geometry = KeyboardGeometry::new(&piano.layout().display_notes(), screen.keys());

    render_panels(frame, screen.panels, piano, theme);
    render_particles(frame, screen.particles, piano, &geometry, theme);
    render_keyboard(frame, &screen, piano, &geometry, theme, status);
    if theme.show_help {
        render_help(frame, screen.help, piano);
    }
}

fn render_keyboard(
    frame: &mut Frame,
    screen: &Screen,
    piano: &Piano,
    geometry: &KeyboardGeometry,
    theme: &Theme,
    status: InputStatus,
) {
    let controller = piano.controller();
    let input_mode = match (status.os_keyboard_active && status.has_focus, piano.release_mode()) {
        (true, _) => "OS",
        (false, ReleaseMode::Reported) => "Terminal",
        (false, ReleaseMode::Synthesized(_)) => "Terminal, timed release",
    };
    let pedal = if controller.pedal() { "down" } else { "up" };
    let title = format!(
        " {} | {} dB | transpose {:+} | pedal {} | ({}) ",
        controller.engine_description(),
        controller.volume_db(),
        controller.transpose(),
        pedal,
        input_mode,
    );
    let mut block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border()));
    if let Some(notice) = piano.notice() {
        block = block.title_bottom(Line::from(format!(" {} ", notice)).right_aligned());
    }
    frame.render_widget(block, screen.keyboard);

    let visual = controller.visual();
    let layout = piano.layout();
    let buf = frame.buffer_mut();

    for (note, rect) in geometry.white_keys() {
        let bg = if visual.is_active(*note) {
            theme.pressed_key()
        } else if visual.is_highlighted(*note) {
            theme.highlight()
        } else {
            theme.white_key()
        };
        let style = Style::default().fg(Color::Black).bg(bg);
        for y in rect.top()..rect.bottom() {
            buf.set_string(rect.x, y, " ".repeat(rect.width as usize - 1), style);
            buf.set_string(rect.right() - 1, y, "▕", style.fg(Color::DarkGray));
        }

        let label: String = layout.labels_for(*note).into_iter().take(rect.width as usize - 1).collect();
        if rect.height >= 2 {
            buf.set_string(rect.x, rect.bottom() - 2, label, style.add_modifier(Modifier::BOLD));
        }
        let name = note.to_string();
        if theme.show_note_names && name.len() < rect.width as usize {
            buf.set_string(rect.x, rect.bottom() - 1, name, style.fg(Color::DarkGray));
        }
    }

    for (note, rect) in geometry.black_keys() {
        let bg = if visual.is_active(*note) {
            Color::Magenta
        } else if visual.is_highlighted(*note) {
            theme.highlight()
        } else {
            theme.black_key()
        };
        let style = Style::default().fg(Color::Gray).bg(bg);
        for y in rect.top()..rect.bottom() {
            buf.set_string(rect.x, y, " ".repeat(rect.width as usize), style);
        }
        if let Some(label) = layout.labels_for(*note).first() {
            buf.set_string(rect.x, rect.bottom() - 1, label.to_string(), style.add_modifier(Modifier::BOLD));
        }
    }
}

fn render_particles(frame: &mut Frame, area: Rect, piano: &mut Piano, geometry: &KeyboardGeometry, theme: &Theme) {
    if area.height == 0 {
        return;
    }
    let now = piano.controller().notation().now();
    let particles: Vec<_> = piano.controller_mut().visual_mut().live_particles().copied().collect();
    let buf = frame.buffer_mut();
    for particle in particles {
        let Some(center) = geometry.center_of(particle.note) else {
            continue;
        };
        let age = particle.age(now);
        let rise = (age * area.height as f32) as u16;
        if rise >= area.height {
            continue;
        }
        let x = (center as i32 + (particle.drift as f32 * (0.5 + age)) as i32)
            .clamp(area.left() as i32, area.right() as i32 - 1) as u16;
        let y = area.bottom() - 1 - rise;
        let (glyph, color) = if age < 0.5 {
            ("*", theme.particle())
        } else {
            ("·", Color::DarkGray)
        };
        buf.set_string(x, y, glyph, Style::default().fg(color));
    }
}

fn render_panels(frame: &mut Frame, area: Rect, piano: &Piano, theme: &Theme) {
    let panels = piano.panels();
    let side: Vec<Panel> = [Panel::Metronome, Panel::Envelope, Panel::Scale]
        .into_iter()
        .filter(|p| panels.is_visible(*p))
        .collect();
    if area.height == 0 || (!panels.sheet && side.is_empty()) {
        return;
    }

    let sheet_width = (SHEET_NOTE_WIDTH * MAX_NOTATION_NOTES + 6) as u16;
    let (sheet_area, side_area) = match (panels.sheet, side.is_empty()) {
        (true, true) => (Some(area), None),
        (true, false) => {
            let [left, right] =
                Layout::horizontal([Constraint::Length(sheet_width), Constraint::Min(0)]).areas(area);
            (Some(left), Some(right))
        }
        (false, _) => (None, Some(area)),
    };

    if let Some(sheet_area) = sheet_area {
        let height = sheet_area.height.min(SHEET_ROWS);
        render_sheet(frame, Rect { height, ..sheet_area }, piano, theme);
    }
    if let Some(side_area) = side_area {
        let heights: Vec<Constraint> = side.iter().map(|p| Constraint::Length(panel_height(*p))).collect();
        let areas = Layout::vertical(heights).split(side_area);
        for (panel, rect) in side.iter().zip(areas.iter()) {
            match panel {
                Panel::Metronome => render_metronome(frame, *rect, piano, theme),
                Panel::Envelope => render_envelope(frame, *rect, piano, theme),
                Panel::Scale => render_scale(frame, *rect, piano, theme),
                Panel::Sheet => {}
            }
        }
    }
}

fn panel_height(panel: Panel) -> u16 {
    match panel {
        Panel::Metronome => 5,
        Panel::Envelope => 8,
        Panel::Scale => 4,
        Panel::Sheet => SHEET_ROWS,
    }
}

fn panel_block(title: &str, key: &str, theme: &Theme) -> Block<'static> {
    Block::default()
        .title(format!(" {} ", title))
        .title(Line::from(format!(" {} ", key)).right_aligned())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border()))
}

fn render_sheet(frame: &mut Frame, area: Rect, piano: &Piano, theme: &Theme) {
    let block = panel_block("Sheet", "F1, Bksp clear", theme);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let strip = piano.controller().notation();
    let now = strip.now();
    let width = inner.width as usize;
    let mut lines: Vec<Line> = Vec::new();

    for staff in [Staff::Treble, Staff::Bass] {
        let clef = match staff {
            Staff::Treble => 'G',
            Staff::Bass => 'F',
        };
        for step in -1..=9 {
            let on_line = step % 2 == 0 && (0..=8).contains(&step);
            let fill = if on_line { '─' } else { ' ' };
            let mut chars: Vec<(char, Style)> = vec![(fill, Style::default().fg(Color::Gray)); width];
            // Clef letter on its reference line
            let clef_step = if staff == Staff::Treble { 6 } else { 2 };
            if step == clef_step && width > 0 {
                chars[0] = (clef, Style::default().fg(Color::White).add_modifier(Modifier::BOLD));
            }
            for (i, notated) in strip.notes().enumerate() {
                let placement = notated.placement;
                if placement.staff != staff {
                    continue;
                }
                let row = placement.steps_below_top.clamp(-1, 9);
                if row != step {
                    continue;
                }
                let col = 3 + i * SHEET_NOTE_WIDTH;
                if col + 1 >= width {
                    continue;
                }
                let color = if notated.is_faded(now) { Color::DarkGray } else { theme.pressed_key() };
                let style = Style::default().fg(color).add_modifier(Modifier::BOLD);
                if placement.sharp {
                    chars[col - 1] = ('♯', style);
                }
                chars[col] = (if placement.ledger { '◆' } else { '●' }, style);
            }
            lines.push(Line::from(build_spans_from_chars(&chars)));
        }
    }
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_metronome(frame: &mut Frame, area: Rect, piano: &Piano, theme: &Theme) {
    let block = panel_block("Metronome", "F2", theme);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let metronome = piano.metronome();
    let signature = metronome.signature();
    let current = metronome.last_click().filter(|_| metronome.is_running());
    let mut dots: Vec<Span> = Vec::new();
    for beat in 0..signature.beats {
        let lit = current.map(|c| c.beat == beat).unwrap_or(false);
        let style = match (lit, beat == 0) {
            (true, true) => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            (true, false) => Style::default().fg(theme.pressed_key()).add_modifier(Modifier::BOLD),
            (false, _) => Style::default().fg(Color::DarkGray),
        };
        dots.push(Span::styled(if lit { "● " } else { "○ " }, style));
    }

    let state = if metronome.is_running() { "running" } else { "stopped" };
    let lines = vec![
        Line::from(vec![
            Span::styled(format!("{} BPM  ", metronome.bpm()), Style::default().fg(Color::White).bold()),
            Span::styled(format!("{}  ", signature), Style::default().fg(Color::Yellow)),
            Span::styled(format!("{} dB  ", metronome.volume_db()), Style::default().fg(Color::Gray)),
            Span::styled(state, Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(dots),
        Line::from(Span::styled(
            "F5 start/stop  PgUp/PgDn tempo  F6 time  F11/F12 volume",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_envelope(frame: &mut Frame, area: Rect, piano: &Piano, theme: &Theme) {
    let block = panel_block("Envelope", "F3", theme);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let envelope = piano.controller().envelope();
    let bar_width = inner.width.saturating_sub(22).min(30) as usize;
    let mut lines: Vec<Line> = AdsrField::ALL
        .iter()
        .map(|field| {
            let selected = *field == piano.selected_field();
            let filled = (field.normalized(envelope.get(*field)) * bar_width as f64).round() as usize;
            let marker = if selected { "> " } else { "  " };
            let name_style = if selected {
                Style::default().fg(theme.pressed_key()).bold()
            } else {
                Style::default().fg(Color::Gray)
            };
            Line::from(vec![
                Span::styled(format!("{}{:<8}", marker, field.name()), name_style),
                Span::styled("█".repeat(filled), Style::default().fg(theme.pressed_key())),
                Span::styled("░".repeat(bar_width - filled), Style::default().fg(Color::DarkGray)),
                Span::styled(format!(" {}", envelope.label(*field)), Style::default().fg(Color::White)),
            ])
        })
        .collect();
    lines.push(Line::from(vec![
        Span::styled("  Pedal   ", Style::default().fg(Color::Gray)),
        Span::styled(piano.controller().sustain_duration().label(), Style::default().fg(Color::White)),
    ]));
    lines.push(Line::from(Span::styled(
        "F7 select  Ins/Del adjust  F8 reset  Home/End pedal tail",
        Style::default().fg(Color::DarkGray),
    )));
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_scale(frame: &mut Frame, area: Rect, piano: &Piano, theme: &Theme) {
    let block = panel_block("Scale", "F4", theme);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let scale = piano.scale();
    let lines = vec![
        Line::from(vec![
            Span::styled("Highlight: ", Style::default().fg(Color::Gray)),
            Span::styled(scale.to_string(), Style::default().fg(theme.highlight()).bold()),
        ]),
        Line::from(Span::styled("F9 root  F10 type", Style::default().fg(Color::DarkGray))),
    ];
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_help(frame: &mut Frame, area: Rect, piano: &Piano) {
    let playing: Vec<String> = piano
        .controller()
        .sounding_notes()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let playing = if playing.is_empty() { "-".to_string() } else { playing.join(" ") };
    let line = Line::from(vec![
        Span::styled(" Playing: ", Style::default().fg(Color::DarkGray)),
        Span::styled(playing, Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            "  ←→ volume  ↑↓ transpose  Tab sound  Space pedal  F1-F4 panels  Esc quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

/// Convert a character buffer with styles into spans (grouping consecutive chars with same style)
fn build_spans_from_chars(chars: &[(char, Style)]) -> Vec<Span<'static>> {
    if chars.is_empty() {
        return vec![];
    }

    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut current_style = chars[0].1;
    let mut buffer = String::new();

    for (ch, style) in chars {
        if *style != current_style && !buffer.is_empty() {
            spans.push(Span::styled(std::mem::take(&mut buffer), current_style));
        }
        buffer.push(*ch);
        current_style = *style;
    }

    if !buffer.is_empty() {
        spans.push(Span::styled(buffer, current_style));
    }

    spans
}
