use crate::client::AppSnapshot;
use coinflip_client::{
    bet::PRESET_AMOUNTS,
    session::{
        CoinSide,
        RevealPhase,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEvent,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use itertools::Itertools;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use tokio::sync::mpsc;
use unicode_width::UnicodeWidthStr;

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

const COIN_FRAMES: [&str; 4] = ["( H )", "( | )", "( T )", "( | )"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    ChooseSide(CoinSide),
    Preset(usize),
    CustomBet(String),
    Flip,
    PlayAgain,
    DismissResult,
    Reset,
    Refresh,
    Redraw,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    result_modal_open: bool,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    CustomBet(String),
    QuitModal,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.result_modal_open = snap.result_modal_open;
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

/// Reads terminal events on a blocking thread; the thread ends once the
/// receiver is dropped.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    match input_events.recv().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => interpret_key(state, key),
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

fn interpret_key(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    match &mut state.mode {
        Mode::QuitModal => {
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::CustomBet(input) => {
            return match key.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => {
                    let amount = std::mem::take(input);
                    state.mode = Mode::Normal;
                    Some(UserEvent::CustomBet(amount))
                }
                KeyCode::Backspace => {
                    input.pop();
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char(c) if c.is_ascii_digit() || (c == '.' && !input.contains('.')) => {
                    input.push(c);
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Normal => {}
    }

    if state.result_modal_open {
        return match key.code {
            KeyCode::Char('p') | KeyCode::Enter => Some(UserEvent::PlayAgain),
            KeyCode::Esc | KeyCode::Char('c') => Some(UserEvent::DismissResult),
            KeyCode::Char('q') => {
                state.mode = Mode::QuitModal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('h') => Some(UserEvent::ChooseSide(CoinSide::Heads)),
        KeyCode::Char('t') => Some(UserEvent::ChooseSide(CoinSide::Tails)),
        KeyCode::Char(c @ '1'..='9') => {
            let index = c as usize - '1' as usize;
            (index < PRESET_AMOUNTS.len()).then_some(UserEvent::Preset(index))
        }
        KeyCode::Char('c') => {
            state.mode = Mode::CustomBet(String::new());
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('f') | KeyCode::Enter => Some(UserEvent::Flip),
        KeyCode::Char('p') => Some(UserEvent::PlayAgain),
        KeyCode::Char('x') => Some(UserEvent::Reset),
        KeyCode::Char('r') => Some(UserEvent::Refresh),
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),  // network + wallet
            Constraint::Length(11), // coin + bet
            Constraint::Min(8),     // stats
            Constraint::Length(6),  // status + help
        ])
        .split(f.area());

    draw_header(f, rows[0], snap);
    draw_game(f, rows[1], snap);
    draw_stats(f, rows[2], snap);
    draw_bottom(f, rows[3], snap);
    draw_modals(f, state, snap);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let wallet = snap.wallet.as_deref().unwrap_or("not connected");
    let lines = vec![
        Line::from(format!("{} | contract {}", snap.network, snap.contract)),
        Line::from(format!("Wallet: {wallet} ({})", snap.signing)),
    ];
    let block = Block::default().borders(Borders::ALL).title("CoinFlip");
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_game(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let coin = coin_face(snap);
    let coin_style = match (snap.phase, snap.did_win) {
        (RevealPhase::Done, Some(true)) => Style::default().fg(Color::Green),
        (RevealPhase::Done, Some(false)) => Style::default().fg(Color::Red),
        _ => Style::default().fg(Color::Yellow),
    };
    let coin_block = Block::default()
        .borders(Borders::ALL)
        .title(phase_label(snap.phase));
    let inner = coin_block.inner(cols[0]);
    f.render_widget(coin_block, cols[0]);
    let coin_line = Line::from(Span::styled(
        center(&coin, inner.width),
        coin_style.add_modifier(Modifier::BOLD),
    ));
    let mut coin_lines = vec![Line::from(""), coin_line, Line::from("")];
    if let Some(tx) = &snap.active_tx {
        coin_lines.push(Line::from(format!("tx {}", short_hash(tx))));
    }
    f.render_widget(Paragraph::new(coin_lines), inner);

    let side_span = |side: CoinSide, key: char| {
        let label = format!("[{key}] {side}");
        if snap.chosen_side == Some(side) {
            Span::styled(
                label,
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        } else {
            Span::raw(label)
        }
    };
    let presets = PRESET_AMOUNTS
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            let marker = if *amount == snap.bet_amount { "*" } else { "" };
            format!("[{}] {amount}{marker}", i + 1)
        })
        .join("  ");
    let payout = snap
        .payout_preview
        .as_deref()
        .map(|p| format!("{p} {}", snap.ticker))
        .unwrap_or_else(|| "-".to_string());
    let bet = if snap.bet_amount.is_empty() {
        "(none)".to_string()
    } else {
        format!("{} {}", snap.bet_amount, snap.ticker)
    };
    let flip_hint = if snap.can_submit {
        Span::styled(
            "[f] FLIP",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("[f] flip", Style::default().fg(Color::DarkGray))
    };
    let lines = vec![
        Line::from(vec![
            Span::raw("Side:  "),
            side_span(CoinSide::Heads, 'h'),
            Span::raw("  "),
            side_span(CoinSide::Tails, 't'),
        ]),
        Line::from(format!("Bet:   {bet}")),
        Line::from(format!("       {presets}  [c] custom")),
        Line::from(format!(
            "Range: {} - {} {}",
            snap.min_bet, snap.max_bet, snap.ticker
        )),
        Line::from(format!("Win:   {payout} (1.9x)")),
        Line::from(""),
        Line::from(flip_hint),
    ];
    let block = Block::default().borders(Borders::ALL).title("Wager");
    f.render_widget(Paragraph::new(lines).block(block), cols[1]);
}

fn draw_stats(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(30),
            Constraint::Percentage(40),
        ])
        .split(area);

    let p = &snap.player_stats;
    let player_lines = vec![
        Line::from(format!("Bets:    {}", p.total_bets)),
        Line::from(format!("Wins:    {}", p.total_wins)),
        Line::from(format!("Losses:  {}", p.total_losses)),
        Line::from(format!("Win rate {}", p.win_rate)),
        Line::from(format!("Wagered: {} {}", p.total_wagered, snap.ticker)),
        Line::from(format!("Won:     {} {}", p.total_won, snap.ticker)),
        Line::from(format!("Lost:    {} {}", p.total_lost, snap.ticker)),
        Line::from(format!("Streak:  {}", p.best_win_streak)),
    ];
    let block = Block::default().borders(Borders::ALL).title("Your stats");
    f.render_widget(Paragraph::new(player_lines).block(block), cols[0]);

    let global_lines = if snap.stats_enabled {
        let g = &snap.stats.global;
        let mut lines = vec![
            Line::from(format!("Games:    {}", g.total_games)),
            Line::from(format!("Win rate: {:.1}%", g.win_rate_percent())),
            Line::from(format!(
                "Heads {:.1}% / Tails {:.1}%",
                g.heads_percent(),
                g.tails_percent()
            )),
        ];
        if let Some(mine) = &snap.stats.player {
            lines.push(Line::from(""));
            lines.push(Line::from(format!(
                "You: {} games, {} wins",
                mine.total_games, mine.total_wins
            )));
        }
        lines
    } else {
        vec![Line::from("stats backend not configured")]
    };
    let block = Block::default().borders(Borders::ALL).title("Everyone");
    f.render_widget(Paragraph::new(global_lines).block(block), cols[1]);

    let recent: Vec<ListItem> = snap
        .stats
        .recent
        .iter()
        .map(|game| {
            let outcome = if game.won {
                Span::styled("WIN ", Style::default().fg(Color::Green))
            } else {
                Span::styled("LOSS", Style::default().fg(Color::Red))
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{} ", game.created_at.format("%m-%d %H:%M"))),
                outcome,
                Span::raw(format!(
                    " {} -> {} {} {}",
                    game.choice, game.result, game.bet_amount, snap.ticker
                )),
            ]))
        })
        .collect();
    let block = Block::default().borders(Borders::ALL).title("Recent games");
    f.render_widget(List::new(recent).block(block), cols[2]);
}

fn draw_bottom(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines = vec![Line::from(snap.status.clone())];
    if let Some(anomaly) = &snap.anomaly {
        lines.push(Line::from(Span::styled(
            format!("{anomaly} - press [x] to reset"),
            Style::default().fg(Color::Magenta),
        )));
    }
    if let Some(last) = snap.errors.last() {
        lines.push(Line::from(Span::styled(
            last.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(
        "[h/t] side  [1-3] preset  [c] custom  [f] flip  [x] reset  [r] refresh  [q] quit",
    ));
    let block = Block::default().borders(Borders::ALL).title("Status");
    f.render_widget(
        Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: true }),
        area,
    );
}

fn draw_modals(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    match &state.mode {
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            f.render_widget(Clear, area);
            let block = Block::default().borders(Borders::ALL).title("Quit");
            f.render_widget(
                Paragraph::new("Quit CoinFlip? [y/n]")
                    .alignment(Alignment::Center)
                    .block(block),
                area,
            );
            return;
        }
        Mode::CustomBet(input) => {
            let area = centered_rect(40, 25, f.area());
            f.render_widget(Clear, area);
            let lines = vec![
                Line::from(format!("Amount: {input}_ {}", snap.ticker)),
                Line::from(format!("Between {} and {}", snap.min_bet, snap.max_bet)),
                Line::from("[Enter] set  [Esc] cancel  (empty clears)"),
            ];
            let block = Block::default().borders(Borders::ALL).title("Custom bet");
            f.render_widget(Paragraph::new(lines).block(block), area);
            return;
        }
        Mode::Normal => {}
    }

    if !snap.result_modal_open {
        return;
    }
    let area = centered_rect(60, 40, f.area());
    f.render_widget(Clear, area);
    let (headline, style) = match snap.did_win {
        Some(true) => ("YOU WON", Style::default().fg(Color::Green)),
        _ => ("YOU LOST", Style::default().fg(Color::Red)),
    };
    let mut lines = vec![
        Line::from(Span::styled(headline, style.add_modifier(Modifier::BOLD))),
        Line::from(""),
    ];
    if let (Some(choice), Some(result)) = (snap.chosen_side, snap.result) {
        lines.push(Line::from(format!("You picked {choice}, the coin shows {result}")));
    }
    if let Some(stake) = &snap.stake {
        lines.push(Line::from(format!("Bet: {stake} {}", snap.ticker)));
    }
    if let Some(win) = &snap.win_amount {
        lines.push(Line::from(format!("Payout: {win} {}", snap.ticker)));
    }
    if let Some(link) = &snap.explorer_link {
        lines.push(Line::from(""));
        lines.push(Line::from(link.clone()));
    }
    lines.push(Line::from(""));
    lines.push(Line::from("[p] play again  [Esc] close"));
    let block = Block::default().borders(Borders::ALL).title("Result");
    f.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block),
        area,
    );
}

fn coin_face(snap: &AppSnapshot) -> String {
    match snap.phase {
        RevealPhase::AwaitingSignature | RevealPhase::Confirming | RevealPhase::Revealing => {
            COIN_FRAMES[(snap.frame as usize) % COIN_FRAMES.len()].to_string()
        }
        RevealPhase::Done => match snap.result {
            Some(CoinSide::Heads) => "( H )".to_string(),
            Some(CoinSide::Tails) => "( T )".to_string(),
            None => "( ? )".to_string(),
        },
        RevealPhase::Idle => "( ? )".to_string(),
    }
}

fn phase_label(phase: RevealPhase) -> &'static str {
    match phase {
        RevealPhase::Idle => "Ready",
        RevealPhase::AwaitingSignature => "Awaiting signature",
        RevealPhase::Confirming => "Confirming",
        RevealPhase::Revealing => "Flipping",
        RevealPhase::Done => "Done",
    }
}

fn center(text: &str, width: u16) -> String {
    let pad = (width as usize).saturating_sub(text.width()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

fn short_hash(hash: &str) -> String {
    if hash.len() <= 14 {
        return hash.to_string();
    }
    format!("{}..{}", &hash[..8], &hash[hash.len() - 4..])
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crossterm::event::KeyModifiers;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn interpret_event__maps_game_keys() {
        let mut state = UiState::default();
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('h'))),
            Some(UserEvent::ChooseSide(CoinSide::Heads))
        );
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('2'))),
            Some(UserEvent::Preset(1))
        );
        assert_eq!(interpret_event(&mut state, press(KeyCode::Char('9'))), None);
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Enter)),
            Some(UserEvent::Flip)
        );
    }

    #[test]
    fn interpret_event__custom_bet_collects_decimal_input() {
        // given
        let mut state = UiState::default();
        interpret_event(&mut state, press(KeyCode::Char('c')));

        // when
        for key in ['0', '.', '0', '.', 'x', '2'] {
            interpret_event(&mut state, press(KeyCode::Char(key)));
        }
        let committed = interpret_event(&mut state, press(KeyCode::Enter));

        // then
        assert_eq!(committed, Some(UserEvent::CustomBet("0.02".to_string())));
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__result_modal_routes_play_again_and_close() {
        let mut state = UiState {
            result_modal_open: true,
            ..UiState::default()
        };
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Enter)),
            Some(UserEvent::PlayAgain)
        );
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Esc)),
            Some(UserEvent::DismissResult)
        );
        assert_eq!(interpret_event(&mut state, press(KeyCode::Char('h'))), None);
    }

    #[test]
    fn interpret_event__quit_needs_confirmation() {
        let mut state = UiState::default();
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('q'))),
            Some(UserEvent::Redraw)
        );
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('y'))),
            Some(UserEvent::Quit)
        );
    }

    #[test]
    fn short_hash__keeps_both_ends() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(short_hash(&hash), "0xababab..abab");
    }
}
