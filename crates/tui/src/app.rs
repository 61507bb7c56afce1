use std::{io, thread, time::Duration};

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};
use tarot_core::{
    format_remaining, Card, CounterEvent, FlipOutcome, GameSession, GameSlot, Phase,
    SessionState, StartOutcome, Suit,
};
use tokio::{
    spawn,
    sync::{mpsc, watch},
};
use tracing::{debug, error, info};

const TICK_RATE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct Theme {
    primary_fg: Color,
    accent: Color,
    muted: Color,
    selection_bg: Color,
    success: Color,
    warning: Color,
    danger: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_fg: Color::White,
            accent: Color::Magenta,
            muted: Color::DarkGray,
            selection_bg: Color::DarkGray,
            success: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
        }
    }
}

impl Theme {
    fn suit(&self, suit: Suit) -> Color {
        match suit {
            Suit::Major => Color::Rgb(139, 92, 246),
            Suit::Swords => Color::Rgb(6, 182, 212),
            Suit::Cups => Color::Rgb(16, 185, 129),
            Suit::Wands => Color::Rgb(245, 158, 11),
            Suit::Pentacles => Color::Rgb(239, 68, 68),
        }
    }
}

enum AppEvent {
    Input(Event),
    Tick,
    DealReady,
}

/// Terminal front end for a tarot reading session.
pub struct TarotApp {
    session: GameSession,
    view: watch::Receiver<SessionState>,
    quota_rx: Option<mpsc::UnboundedReceiver<CounterEvent>>,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    cursor: usize,
    status: String,
    spinner: usize,
    should_quit: bool,
    theme: Theme,
}

impl TarotApp {
    pub fn new(session: GameSession) -> Self {
        let view = session.subscribe();
        Self {
            session,
            view,
            quota_rx: None,
            event_tx: None,
            cursor: 0,
            status: "Press Enter to draw your cards".to_string(),
            spinner: 0,
            should_quit: false,
            theme: Theme::default(),
        }
    }

    /// Receive quota changes made by other running instances.
    pub fn attach_quota(&mut self, receiver: mpsc::UnboundedReceiver<CounterEvent>) {
        self.quota_rx = Some(receiver);
    }

    pub async fn run(&mut self) -> Result<()> {
        let stats = self.session.catalog().stats();
        info!(
            cards = stats.total,
            remaining = self.session.remaining_draws(),
            "Session ready"
        );

        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx.clone());
        self.event_tx = Some(event_tx);

        let mut quota_rx = self.quota_rx.take();

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }

            if let Some(rx) = quota_rx.as_mut() {
                let mut quota_closed = false;
                tokio::select! {
                    maybe_event = event_rx.recv() => {
                        if !self.process_app_event(maybe_event) {
                            break;
                        }
                    }
                    maybe_quota = rx.recv() => {
                        match maybe_quota {
                            Some(event) => self.handle_quota_event(event),
                            None => quota_closed = true,
                        }
                    }
                }
                if quota_closed {
                    quota_rx = None;
                }
            } else {
                let maybe_event = event_rx.recv().await;
                if !self.process_app_event(maybe_event) {
                    break;
                }
            }
        }

        restore_terminal(&mut terminal)?;
        self.event_tx = None;
        Ok(())
    }

    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                self.handle_key(key);
                true
            }
            Some(AppEvent::Input(_)) => true,
            Some(AppEvent::Tick) => {
                self.spinner = self.spinner.wrapping_add(1);
                true
            }
            Some(AppEvent::DealReady) => {
                self.handle_deal_ready();
                true
            }
            None => false,
        }
    }

    fn handle_quota_event(&mut self, event: CounterEvent) {
        let CounterEvent::Changed { value, .. } = event;
        info!(remaining = value, "Quota updated by another window");
        self.session.sync_quota();
        self.status = format!("Remaining draws updated: {}", format_remaining(value));
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        if self.view.borrow().login_prompt_visible() {
            self.handle_login_key(key);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('r') => self.restart(),
            KeyCode::Left | KeyCode::Char('h') => self.move_cursor(-1),
            KeyCode::Right | KeyCode::Char('l') => self.move_cursor(1),
            KeyCode::Enter | KeyCode::Char(' ') => self.primary_action(),
            KeyCode::Char(ch) => {
                if let Some(slot_id) = slot_from_key(ch, self.slot_count()) {
                    self.cursor = slot_id - 1;
                    self.flip(slot_id);
                }
            }
            _ => {}
        }
    }

    fn handle_login_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('l') | KeyCode::Enter => {
                if self.session.login() {
                    self.status = "Logged in: unlimited readings unlocked".to_string();
                }
            }
            KeyCode::Esc | KeyCode::Char('n') => {
                if self.session.dismiss_login() {
                    self.status = "Login skipped".to_string();
                }
            }
            KeyCode::Char('q') => self.should_quit = true,
            _ => {}
        }
    }

    fn primary_action(&mut self) {
        let phase = self.view.borrow().phase();
        match phase {
            Phase::Idle => self.start(),
            Phase::Active => self.flip(self.cursor + 1),
            Phase::Complete => self.restart(),
            Phase::Loading | Phase::QuotaExhausted => {
                debug!(?phase, "primary action ignored");
            }
        }
    }

    fn start(&mut self) {
        match self.session.begin_draw() {
            StartOutcome::Loading => {
                self.status = "Shuffling the deck...".to_string();
                self.schedule_deal();
            }
            StartOutcome::LoginRequired => {
                self.status = "No free readings left".to_string();
            }
            StartOutcome::Ignored => {}
        }
    }

    fn schedule_deal(&mut self) {
        let Some(sender) = self.event_tx.clone() else {
            return;
        };
        let delay = self.session.rules().loading_delay;
        spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(AppEvent::DealReady).await;
        });
    }

    fn handle_deal_ready(&mut self) {
        match self.session.finish_draw() {
            Ok(true) => {
                self.cursor = 0;
                self.status = format!(
                    "Cards dealt. Remaining draws: {}",
                    format_remaining(self.session.remaining_draws())
                );
            }
            Ok(false) => {}
            Err(err) => {
                error!(?err, "Deal failed");
                self.status = format!("Error: {err}");
            }
        }
    }

    fn flip(&mut self, slot_id: usize) {
        match self.session.flip_card(slot_id) {
            FlipOutcome::Completed => {
                self.status = "All cards revealed. Press r for a new reading".to_string();
            }
            FlipOutcome::Flipped => {
                self.status = format!("Card {slot_id} revealed");
            }
            FlipOutcome::AlreadyFlipped | FlipOutcome::Ignored => {}
        }
    }

    fn restart(&mut self) {
        if self.session.restart() {
            self.cursor = 0;
            self.status = "Press Enter to draw your cards".to_string();
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let count = self.slot_count();
        if count == 0 {
            return;
        }
        let next = (self.cursor as isize + delta).rem_euclid(count as isize);
        self.cursor = next as usize;
    }

    fn slot_count(&self) -> usize {
        self.view.borrow().slots().len()
    }

    fn draw(&self, frame: &mut Frame) {
        let state = self.view.borrow().clone();
        let show_reading = state.phase() == Phase::Complete;
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(12),
                Constraint::Min(4),
                Constraint::Length(4),
            ])
            .split(frame.size());

        self.render_title(frame, chunks[0]);
        self.render_slots(frame, chunks[1], &state);
        if show_reading {
            self.render_interpretation(frame, chunks[2], &state);
        } else {
            self.render_help(frame, chunks[2], &state);
        }
        self.render_status(frame, chunks[3], &state);

        if state.is_loading() {
            self.render_loading(frame);
        }
        if state.login_prompt_visible() {
            self.render_login_modal(frame);
        }
    }

    fn render_title(&self, frame: &mut Frame, area: Rect) {
        let title = Paragraph::new(Line::from(Span::styled(
            "✦ Tarot Reading ✦",
            Style::default()
                .fg(self.theme.accent)
                .add_modifier(Modifier::BOLD),
        )))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(title, area);
    }

    fn render_slots(&self, frame: &mut Frame, area: Rect, state: &SessionState) {
        let slots = state.slots();
        if slots.is_empty() {
            return;
        }
        let constraints: Vec<Constraint> = slots
            .iter()
            .map(|_| Constraint::Ratio(1, slots.len() as u32))
            .collect();
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area);

        for (index, (slot, column)) in slots.iter().zip(columns.iter()).enumerate() {
            let highlighted = state.phase() == Phase::Active && index == self.cursor;
            self.render_slot(frame, *column, slot, highlighted);
        }
    }

    fn render_slot(&self, frame: &mut Frame, area: Rect, slot: &GameSlot, highlighted: bool) {
        let mut block = Block::default()
            .borders(Borders::ALL)
            .title(format!("Card {}", slot.id()));
        if highlighted {
            block = block.border_style(
                Style::default()
                    .fg(self.theme.accent)
                    .bg(self.theme.selection_bg),
            );
        }

        let lines = match slot.card() {
            None => vec![
                Line::from(""),
                Line::from(Span::styled("·", Style::default().fg(self.theme.muted))),
            ],
            Some(_) if !slot.is_flipped() => vec![
                Line::from(""),
                Line::from(Span::styled("✦ ✦ ✦", Style::default().fg(self.theme.accent))),
                Line::from(Span::styled("  ?  ", Style::default().fg(self.theme.accent))),
                Line::from(Span::styled("✦ ✦ ✦", Style::default().fg(self.theme.accent))),
                Line::from(""),
                Line::from(Span::styled(
                    format!("press {}", slot.id()),
                    Style::default().fg(self.theme.muted),
                )),
            ],
            Some(card) => self.card_face(card),
        };

        let paragraph = Paragraph::new(lines)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn card_face(&self, card: &Card) -> Vec<Line<'static>> {
        let suit_style = Style::default().fg(self.theme.suit(card.suit));
        let mut lines = vec![
            Line::from(Span::styled(
                format!("{} {}", card.suit.icon(), card.localized_name),
                suit_style.add_modifier(Modifier::BOLD),
            )),
            Line::from(card.name.clone()),
            Line::from(Span::styled(
                format!("{} · {}", card.suit.localized_label(), card.suit.label()),
                suit_style,
            )),
        ];
        if let Some(element) = card.element {
            lines.push(Line::from(Span::styled(
                format!("element: {element}"),
                Style::default().fg(self.theme.muted),
            )));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(card.keywords.join(" · ")));
        lines
    }

    fn render_interpretation(&self, frame: &mut Frame, area: Rect, state: &SessionState) {
        let mut lines = Vec::new();
        for (index, card) in state.revealed_cards().iter().enumerate() {
            let suit_style = Style::default().fg(self.theme.suit(card.suit));
            lines.push(Line::from(Span::styled(
                format!(
                    "{} Card {}: {}",
                    card.suit.icon(),
                    index + 1,
                    card.display_name()
                ),
                suit_style.add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(card.description.clone()));
            lines.push(Line::from(vec![
                Span::styled("Upright: ", Style::default().fg(self.theme.success)),
                Span::raw(card.meaning_up.clone()),
            ]));
            lines.push(Line::from(vec![
                Span::styled("Reversed: ", Style::default().fg(self.theme.warning)),
                Span::raw(card.meaning_rev.clone()),
            ]));
            if !card.keywords.is_empty() {
                lines.push(Line::from(vec![
                    Span::styled("Keywords: ", Style::default().fg(self.theme.muted)),
                    Span::raw(card.keywords.join(", ")),
                ]));
            }
            lines.push(Line::from(""));
        }

        let paragraph = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Your Reading"),
            )
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_help(&self, frame: &mut Frame, area: Rect, state: &SessionState) {
        let key = |label: &'static str| {
            Span::styled(label, Style::default().add_modifier(Modifier::BOLD))
        };
        let first = match state.phase() {
            Phase::Idle | Phase::QuotaExhausted => {
                Line::from(vec![key("Enter"), Span::raw(" draw your cards")])
            }
            Phase::Loading => Line::from("The cards are being shuffled..."),
            Phase::Active => Line::from(vec![
                key("1-9"),
                Span::raw(" reveal a card  "),
                key("←/→"),
                Span::raw(" select  "),
                key("Enter"),
                Span::raw(" reveal selected"),
            ]),
            Phase::Complete => Line::from(vec![key("r"), Span::raw(" new reading")]),
        };
        let lines = vec![
            first,
            Line::from(vec![key("r"), Span::raw(" restart  "), key("q"), Span::raw(" quit")]),
        ];
        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Help"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect, state: &SessionState) {
        let remaining = Line::from(vec![
            Span::raw("Remaining draws: "),
            Span::styled(
                format_remaining(state.remaining_draws()),
                Style::default()
                    .fg(self.theme.primary_fg)
                    .add_modifier(Modifier::BOLD),
            ),
        ]);
        let secondary = match state.notice() {
            Some(notice) => Line::from(Span::styled(
                notice.to_string(),
                Style::default().fg(self.theme.danger),
            )),
            None => Line::from(self.status.clone()),
        };
        let paragraph = Paragraph::new(vec![remaining, secondary])
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_loading(&self, frame: &mut Frame) {
        const FRAMES: [&str; 4] = ["◐", "◓", "◑", "◒"];
        let area = centered_rect(32, 3, frame.size());
        frame.render_widget(Clear, area);
        let paragraph = Paragraph::new(format!(
            "{} Shuffling the deck...",
            FRAMES[self.spinner % FRAMES.len()]
        ))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(paragraph, area);
    }

    fn render_login_modal(&self, frame: &mut Frame) {
        let area = centered_rect(54, 9, frame.size());
        frame.render_widget(Clear, area);
        let helper = Line::from(vec![
            Span::styled("l", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" log in  "),
            Span::styled("Esc", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" close"),
        ]);
        let paragraph = Paragraph::new(vec![
            Line::from(Span::styled(
                "🔮 Unlock unlimited readings",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from("You have used all of your free readings."),
            Line::from("Log in to keep exploring the cards."),
            Line::from(""),
            helper,
        ])
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Login"))
        .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }
}

fn slot_from_key(ch: char, slot_count: usize) -> Option<usize> {
    let digit = ch.to_digit(10)? as usize;
    (1..=slot_count).contains(&digit).then_some(digit)
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_keys_map_to_slots() {
        assert_eq!(slot_from_key('1', 3), Some(1));
        assert_eq!(slot_from_key('3', 3), Some(3));
        assert_eq!(slot_from_key('4', 3), None);
        assert_eq!(slot_from_key('0', 3), None);
        assert_eq!(slot_from_key('x', 3), None);
    }

    #[test]
    fn centered_rect_stays_inside_area() {
        let area = Rect::new(0, 0, 40, 10);
        let rect = centered_rect(20, 4, area);
        assert_eq!(rect, Rect::new(10, 3, 20, 4));
        let clamped = centered_rect(80, 20, area);
        assert_eq!(clamped, area);
    }
}
