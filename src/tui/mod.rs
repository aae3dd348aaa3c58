// src/tui/mod.rs
use crate::config::PairConfig;
use crate::core::engine::SharedEngine;
use crate::core::rates::RateTable;
use crate::types::{HistoryEntry, Position, PositionSide, Side, TrendPoint, UiEvent};
use crate::utils::precision::{display_digits, format_amount, parse_amount};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Sparkline},
    Terminal,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::{io, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info};

const RATE_CARDS: usize = 12;
const HISTORY_ROWS: usize = 8;
const LOG_LINES: usize = 20;

/// Presentation state. Reads engine snapshots and turns keys into engine calls.
pub struct App {
    engine: SharedEngine,
    rates: Arc<RateTable>,
    pair: PairConfig,
    pub side: Side,
    pub amount_input: String,
    pub selected: usize,
    pub trend: VecDeque<TrendPoint>,
    trend_limit: usize,
    trend_sink: Option<mpsc::UnboundedSender<Vec<TrendPoint>>>,
    pub error: Option<String>,
    pub logs: VecDeque<String>,
}

impl App {
    pub fn new(engine: SharedEngine, pair: PairConfig, trend_limit: usize) -> Self {
        let rates = engine.lock().rates().clone();
        Self {
            engine,
            rates,
            pair,
            side: Side::Buy,
            amount_input: "10".to_string(),
            selected: 0,
            trend: VecDeque::new(),
            trend_limit: trend_limit.max(1),
            trend_sink: None,
            error: None,
            logs: VecDeque::new(),
        }
    }

    /// Seeds the chart with saved points and sends the full series on every new one.
    pub fn with_trend(
        mut self,
        saved: Vec<TrendPoint>,
        sink: mpsc::UnboundedSender<Vec<TrendPoint>>,
    ) -> Self {
        let skip = saved.len().saturating_sub(self.trend_limit);
        self.trend = saved.into_iter().skip(skip).collect();
        self.trend_sink = Some(sink);
        self
    }

    /// (spent, received) for the selected side.
    pub fn order_currencies(&self) -> (&str, &str) {
        match self.side {
            Side::Buy => (&self.pair.funding, &self.pair.receiving),
            Side::Sell => (&self.pair.receiving, &self.pair.funding),
        }
    }

    pub fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::RatesRefreshed(point) => {
                self.error = None;
                if let Some(point) = point {
                    self.trend.push_back(point);
                    while self.trend.len() > self.trend_limit {
                        self.trend.pop_front();
                    }
                    self.publish_trend();
                }
            }
            UiEvent::FeedError(msg) => self.error = Some(msg),
            UiEvent::Log(msg) => self.log(msg),
        }
    }

    /// Returns true when the user asked to quit.
    pub fn on_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('b') => self.side = Side::Buy,
            KeyCode::Char('s') => self.side = Side::Sell,
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => self.amount_input.push(c),
            KeyCode::Backspace => {
                self.amount_input.pop();
            }
            KeyCode::Enter => self.submit_order(),
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                let open = self.engine.lock().positions().len();
                if self.selected + 1 < open {
                    self.selected += 1;
                }
            }
            KeyCode::Char('c') => self.close_selected(),
            _ => {}
        }
        false
    }

    pub fn submit_order(&mut self) {
        let amount = match parse_amount(&self.amount_input) {
            Some(a) if a > Decimal::ZERO => a,
            _ => {
                self.error = Some("Enter a valid amount".to_string());
                return;
            }
        };

        let side = self.side;
        let (spend, receive) = self.order_currencies();
        let (spend, receive) = (spend.to_string(), receive.to_string());

        let result = self
            .engine
            .lock()
            .execute_order(side, amount, &spend, &receive);
        match result {
            Ok(position) => {
                self.error = None;
                self.amount_input.clear();
                self.log(format!(
                    "{:?} #{}: {} {} -> {} {}",
                    side,
                    position.id,
                    format_amount(position.base_amount, display_digits(&spend)),
                    spend,
                    format_amount(position.quote_amount, display_digits(&receive)),
                    receive
                ));
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    pub fn close_selected(&mut self) {
        let mut engine = self.engine.lock();
        let Some(id) = engine.positions().get(self.selected).map(|p| p.id) else {
            drop(engine);
            self.error = Some("No open position selected".to_string());
            return;
        };

        let result = engine.close_position(id);
        let open = engine.positions().len();
        drop(engine);

        match result {
            Ok(closed) => {
                self.error = None;
                self.selected = self.selected.min(open.saturating_sub(1));
                let currency = closed.position.base_currency;
                self.log(format!(
                    "Closed #{} @ {}: +{} {}",
                    id,
                    format_amount(closed.close_price, 4),
                    format_amount(closed.credited_amount, display_digits(&currency)),
                    currency
                ));
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    fn publish_trend(&mut self) {
        let Some(sink) = &self.trend_sink else {
            return;
        };
        if sink.send(self.trend.iter().cloned().collect()).is_err() {
            error!("Trend writer is gone, chart no longer persisted.");
            self.trend_sink = None;
        }
    }

    fn log(&mut self, msg: String) {
        self.logs.push_back(msg);
        while self.logs.len() > LOG_LINES {
            self.logs.pop_front();
        }
    }
}

pub async fn run(mut app: App, mut rx: mpsc::Receiver<UiEvent>) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.on_key(key.code) {
                    break;
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            app.on_event(event);
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    info!("UI closed");

    Ok(())
}

fn ui(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(4),
                Constraint::Min(12),
                Constraint::Length(8),
            ]
            .as_ref(),
        )
        .split(f.size());

    render_header(f, app, chunks[0]);
    render_rates(f, app, chunks[1]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
        .split(chunks[2]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(6)].as_ref())
        .split(columns[0]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(HISTORY_ROWS as u16 + 2)].as_ref())
        .split(columns[1]);

    // Hold the engine lock only while copying what this frame shows.
    let (balances, valuation, positions, history) = {
        let engine = app.engine.lock();
        let positions: Vec<(Position, Option<Decimal>)> = engine
            .positions()
            .iter()
            .map(|p| (p.clone(), engine.unrealized_pnl(p).ok()))
            .collect();
        let history: Vec<HistoryEntry> = engine.history().rev().take(HISTORY_ROWS).cloned().collect();
        (
            engine.balances().clone(),
            engine.valuation(app.rates.reference()).ok(),
            positions,
            history,
        )
    };

    let mut balance_lines: Vec<Line> = balances
        .iter()
        .map(|(code, amount)| {
            Line::from(format!("{}: {}", code, format_amount(*amount, display_digits(code))))
        })
        .collect();
    if let Some(total) = valuation {
        balance_lines.push(Line::from(Span::styled(
            format!("Total ≈ {} {}", format_amount(total, 2), app.rates.reference()),
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    f.render_widget(
        Paragraph::new(balance_lines).block(Block::default().borders(Borders::ALL).title("Balances")),
        left[0],
    );

    render_order(f, app, left[1]);
    render_positions(f, app, &positions, right[0]);
    render_history(f, &history, right[1]);
    render_footer(f, app, chunks[3]);
}

fn render_header(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let (from, to) = (&app.pair.funding, &app.pair.receiving);
    let price_text = match app.rates.price_of(from, to) {
        Ok(p) => format_amount(p, 4),
        Err(_) => "—".to_string(),
    };
    let updated = app
        .rates
        .snapshot()
        .map(|s| s.as_of().format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Loading rates…".to_string());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Fiskey Trading (Demo)",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" | {} → {}: ", from, to)),
        Span::styled(
            price_text,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" | Last updated: {}", updated)),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(header, area);
}

fn render_rates(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let cards: Vec<Span> = app
        .rates
        .snapshot()
        .map(|s| {
            s.quotes()
                .iter()
                .take(RATE_CARDS)
                .map(|(code, quote)| Span::raw(format!("{} {}   ", code, format_amount(*quote, 4))))
                .collect()
        })
        .unwrap_or_default();

    let title = format!("Live Rates ({} base)", app.rates.reference());
    f.render_widget(
        Paragraph::new(Line::from(cards))
            .wrap(ratatui::widgets::Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );
}

fn render_order(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let (spend, receive) = app.order_currencies();
    let side = match app.side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    };
    let lines = vec![
        Line::from(Span::styled(
            format!("{} ({} → {})", side, spend, receive),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("Amount in {}: {}_", spend, app.amount_input)),
        Line::from("[b]uy [s]ell [Enter] execute [c]lose [q]uit"),
    ];
    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("New Market Order"),
        ),
        area,
    );
}

fn render_positions(
    f: &mut ratatui::Frame,
    app: &App,
    positions: &[(Position, Option<Decimal>)],
    area: Rect,
) {
    let items: Vec<ListItem> = positions
        .iter()
        .map(|(p, pnl)| {
            let side = match p.side {
                PositionSide::Long => "LONG ",
                PositionSide::Short => "SHORT",
            };
            let pnl_text = pnl
                .map(|v| format!(" P/L {} {}", format_amount(v, 4), p.base_currency))
                .unwrap_or_default();
            ListItem::new(Line::from(format!(
                "{} #{} {} {} → {} {} @ {}{}",
                side,
                p.id,
                format_amount(p.base_amount, display_digits(&p.base_currency)),
                p.base_currency,
                format_amount(p.quote_amount, display_digits(&p.quote_currency)),
                p.quote_currency,
                format_amount(p.entry_price, 4),
                pnl_text
            )))
        })
        .collect();

    let title = if positions.is_empty() {
        "Open Positions (none)"
    } else {
        "Open Positions"
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default();
    if !positions.is_empty() {
        state.select(Some(app.selected.min(positions.len() - 1)));
    }
    f.render_stateful_widget(list, area, &mut state);
}

fn render_history(f: &mut ratatui::Frame, history: &[HistoryEntry], area: Rect) {
    let items: Vec<ListItem> = history
        .iter()
        .map(|h| {
            let text = match h {
                HistoryEntry::Execution { action, position_id, at, .. } => {
                    format!("{:?} #{} @ {}", action, position_id, at.format("%H:%M:%S"))
                }
                HistoryEntry::Close {
                    position_id,
                    entry_price_fallback,
                    at,
                    ..
                } => format!(
                    "CLOSE #{} @ {}{}",
                    position_id,
                    at.format("%H:%M:%S"),
                    if *entry_price_fallback { " (entry price)" } else { "" }
                ),
            };
            ListItem::new(Line::from(text))
        })
        .collect();

    f.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Trade History")),
        area,
    );
}

fn render_footer(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(area);

    let data = sparkline_data(&app.trend);
    let title = format!("{} → {} Live Trend", app.pair.funding, app.pair.receiving);
    f.render_widget(
        Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title(title))
            .data(&data)
            .style(Style::default().fg(Color::Green)),
        halves[0],
    );

    let mut lines: Vec<Line> = Vec::new();
    if let Some(err) = &app.error {
        lines.push(Line::from(Span::styled(
            err.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    lines.extend(app.logs.iter().rev().map(|s| Line::from(Span::raw(s.clone()))));
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("System Logs")),
        halves[1],
    );
}

/// Sparkline needs integers: offsets from the window minimum in 1e-4 steps.
fn sparkline_data(trend: &VecDeque<TrendPoint>) -> Vec<u64> {
    let Some(min) = trend.iter().map(|p| p.rate).min() else {
        return Vec::new();
    };
    trend
        .iter()
        .map(|p| {
            ((p.rate - min) * Decimal::new(10_000, 0))
                .round()
                .to_u64()
                .unwrap_or(0)
        })
        .collect()
}
