use anyhow::Result;
use chrono::Utc;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;

use verifai::dashboard::{self, DashboardStats, RiskBucket};
use verifai::db;
use verifai::entities::{AnalystAction, Transaction, TransactionStatus};

/// Actor recorded on audit events for actions taken from the terminal
const TUI_ACTOR: &str = "tui";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Overview,
    TransactionLedger,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Overview => Page::TransactionLedger,
            Page::TransactionLedger => Page::Overview,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Overview => "Overview",
            Page::TransactionLedger => "Transactions",
        }
    }
}

pub struct App {
    pub transactions: Vec<Transaction>,
    pub filtered_transactions: Vec<Transaction>,
    pub state: TableState,
    pub stats: DashboardStats,
    pub distribution: Vec<RiskBucket>,
    pub current_page: Page,
    pub show_detail: bool,
    /// None shows every status
    pub status_filter: Option<TransactionStatus>,
    pub message: Option<String>,
}

impl App {
    pub fn new(transactions: Vec<Transaction>, stats: DashboardStats, distribution: Vec<RiskBucket>) -> Self {
        let mut state = TableState::default();
        if !transactions.is_empty() {
            state.select(Some(0));
        }

        Self {
            filtered_transactions: transactions.clone(),
            transactions,
            state,
            stats,
            distribution,
            current_page: Page::Overview,
            show_detail: false,
            status_filter: None,
            message: None,
        }
    }

    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self::new(
            db::get_all_transactions(conn)?,
            dashboard::stats(conn, Utc::now())?,
            dashboard::risk_distribution(conn)?,
        ))
    }

    /// Re-read everything, keeping page, filter and cursor position
    pub fn reload(&mut self, conn: &Connection) -> Result<()> {
        let selected = self.state.selected();
        self.transactions = db::get_all_transactions(conn)?;
        self.stats = dashboard::stats(conn, Utc::now())?;
        self.distribution = dashboard::risk_distribution(conn)?;
        self.apply_filter(self.status_filter);
        if let Some(i) = selected {
            if i < self.filtered_transactions.len() {
                self.state.select(Some(i));
            }
        }
        Ok(())
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_transaction(&self) -> Option<&Transaction> {
        self.state.selected().and_then(|i| self.filtered_transactions.get(i))
    }

    pub fn apply_filter(&mut self, filter: Option<TransactionStatus>) {
        self.status_filter = filter;
        self.filtered_transactions = match filter {
            None => self.transactions.clone(),
            Some(status) => self
                .transactions
                .iter()
                .filter(|tx| tx.status == status)
                .cloned()
                .collect(),
        };

        if self.filtered_transactions.is_empty() {
            self.state.select(None);
        } else {
            self.state.select(Some(0));
        }
    }

    pub fn count_by_status(&self, status: TransactionStatus) -> usize {
        self.transactions.iter().filter(|tx| tx.status == status).count()
    }

    pub fn next(&mut self) {
        let len = self.filtered_transactions.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.filtered_transactions.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.filtered_transactions.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        self.state.select(Some(i));
    }

    /// Apply an analyst action to the selected row and refresh the data
    pub fn act_on_selected(&mut self, conn: &Connection, action: AnalystAction) -> Result<()> {
        let Some(id) = self.selected_transaction().map(|tx| tx.id.clone()) else {
            return Ok(());
        };
        self.message = Some(match dashboard::take_action(conn, &id, action, TUI_ACTOR) {
            Ok(result) => result.message,
            Err(e) => e.to_string(),
        });
        self.reload(conn)
    }
}

/// Risk colour bands used across the dashboard
pub fn risk_color(risk_score: u8) -> Color {
    match risk_score {
        80..=u8::MAX => Color::Red,
        50..=79 => Color::Yellow,
        _ => Color::Green,
    }
}

fn status_color(status: TransactionStatus) -> Color {
    match status {
        TransactionStatus::Approved => Color::Green,
        TransactionStatus::Blocked => Color::Red,
        TransactionStatus::Hold => Color::Yellow,
        TransactionStatus::Flagged => Color::Magenta,
    }
}

pub fn run_ui(conn: &Connection, app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, conn, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, conn: &Connection, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        let ledger = app.current_page == Page::TransactionLedger;

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
            KeyCode::Tab | KeyCode::BackTab => app.current_page = app.current_page.next(),
            KeyCode::Char('r') => app.reload(conn)?,
            KeyCode::Enter if ledger => app.toggle_detail(),
            KeyCode::Char('1') => show_filtered(app, None),
            KeyCode::Char('2') => show_filtered(app, Some(TransactionStatus::Approved)),
            KeyCode::Char('3') => show_filtered(app, Some(TransactionStatus::Hold)),
            KeyCode::Char('4') => show_filtered(app, Some(TransactionStatus::Blocked)),
            KeyCode::Char('5') => show_filtered(app, Some(TransactionStatus::Flagged)),
            KeyCode::Char('a') if ledger => app.act_on_selected(conn, AnalystAction::Approve)?,
            KeyCode::Char('b') if ledger => app.act_on_selected(conn, AnalystAction::Block)?,
            KeyCode::Char('h') if ledger => app.act_on_selected(conn, AnalystAction::Hold)?,
            KeyCode::Char('f') if ledger => app.act_on_selected(conn, AnalystAction::Flag)?,
            KeyCode::Down | KeyCode::Char('j') => app.next(),
            KeyCode::Up | KeyCode::Char('k') => app.previous(),
            KeyCode::PageDown => app.page_down(),
            KeyCode::PageUp => app.page_up(),
            KeyCode::Home => app.state.select(Some(0)),
            KeyCode::End => {
                if !app.filtered_transactions.is_empty() {
                    app.state.select(Some(app.filtered_transactions.len() - 1));
                }
            }
            _ => {}
        }
    }
}

fn show_filtered(app: &mut App, filter: Option<TransactionStatus>) {
    app.apply_filter(filter);
    app.current_page = Page::TransactionLedger;
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Overview => render_overview(f, chunks[1], app),
        Page::TransactionLedger if app.show_detail => {
            let content_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);

            render_table(f, content_chunks[0], app);
            render_detail_panel(f, content_chunks[1], app);
        }
        Page::TransactionLedger => render_table(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![Span::styled(
        " VerifAI ",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];

    for page in [Page::Overview, Page::TransactionLedger] {
        tab_spans.push(Span::raw(" │ "));
        let style = if page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Total: {}", app.stats.total_transactions),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Blocked today: {}", app.stats.blocked_today),
        Style::default().fg(Color::Red),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_overview(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let label = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let mut lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  Total transactions: ", label),
            Span::raw(app.stats.total_transactions.to_string()),
        ]),
        Line::from(vec![
            Span::styled("  Blocked today:      ", label),
            Span::styled(app.stats.blocked_today.to_string(), Style::default().fg(Color::Red)),
        ]),
        Line::from(vec![
            Span::styled("  Average risk score: ", label),
            Span::styled(
                app.stats.avg_risk_score.to_string(),
                Style::default().fg(risk_color(app.stats.avg_risk_score.min(100) as u8)),
            ),
        ]),
        Line::from(vec![
            Span::styled("  Active devices:     ", label),
            Span::raw(app.stats.active_devices.to_string()),
        ]),
        Line::from(""),
        Line::from("  ─────────────────────────────"),
        Line::from(""),
    ];

    let views = [
        ("1", "All", None),
        ("2", "Approved", Some(TransactionStatus::Approved)),
        ("3", "On hold", Some(TransactionStatus::Hold)),
        ("4", "Blocked", Some(TransactionStatus::Blocked)),
        ("5", "Flagged", Some(TransactionStatus::Flagged)),
    ];
    for (key, name, status) in views {
        let count = match status {
            Some(s) => app.count_by_status(s),
            None => app.transactions.len(),
        };
        let color = status.map(status_color).unwrap_or(Color::White);
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(key, Style::default().fg(Color::Yellow)),
            Span::raw(format!(". {:<12}", name)),
            Span::styled(format!("{:>6}", count), Style::default().fg(color)),
        ]));
    }

    let summary = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Stats "),
    );
    f.render_widget(summary, chunks[0]);

    let bars: Vec<(&str, u64)> = app
        .distribution
        .iter()
        .map(|b| (b.name.as_str(), b.value as u64))
        .collect();
    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Risk Distribution "),
        )
        .data(bars.as_slice())
        .bar_width(7)
        .bar_gap(2)
        .bar_style(Style::default().fg(Color::Yellow))
        .value_style(Style::default().fg(Color::Black).bg(Color::Yellow));
    f.render_widget(chart, chunks[1]);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Time", "Merchant", "Amount", "Category", "Risk", "Status"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.filtered_transactions.iter().map(|tx| {
        let risk = risk_color(tx.risk_score);
        let cells = vec![
            Cell::from(tx.timestamp.format("%Y-%m-%d %H:%M").to_string()),
            Cell::from(truncate(&tx.merchant, 28)),
            Cell::from(format!("{:.2}", tx.amount)),
            Cell::from(truncate(&tx.category, 16)),
            Cell::from(format!("{:>3}", tx.risk_score)).style(Style::default().fg(risk)),
            Cell::from(tx.status.as_str()).style(Style::default().fg(status_color(tx.status))),
        ];
        Row::new(cells).height(1)
    });

    let title = match app.status_filter {
        Some(status) => format!(" Transactions [{}] ", status),
        None => " Transactions ".to_string(),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(17),
            Constraint::Length(30),
            Constraint::Length(12),
            Constraint::Length(18),
            Constraint::Length(6),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.filtered_transactions.len();
    let key = Style::default().fg(Color::Yellow);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    if let Some(message) = &app.message {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(message.clone(), Style::default().fg(Color::Green)));
    }

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("1-5", key));
    status_spans.push(Span::raw(" Filter | "));
    status_spans.push(Span::styled("Enter", key));
    status_spans.push(Span::raw(" Details | "));
    status_spans.push(Span::styled("a/b/h/f", key));
    status_spans.push(Span::raw(" Approve/Block/Hold/Flag | "));
    status_spans.push(Span::styled("Tab", key));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("r", key));
    status_spans.push(Span::raw(" Reload | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::White)));

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Transaction Details ");

    let Some(tx) = app.selected_transaction() else {
        f.render_widget(Paragraph::new("No transaction selected").block(block), area);
        return;
    };

    let label = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let field = |name: &'static str, value: String| Line::from(vec![Span::styled(name, label), Span::raw(value)]);

    let location = tx
        .location
        .map(|p| format!("{:.4}, {:.4}", p.lat, p.lon))
        .unwrap_or_else(|| "-".to_string());

    let content = vec![
        Line::from(""),
        field("  ID: ", tx.id.clone()),
        field("  User: ", tx.user_id.clone()),
        field("  Merchant: ", tx.merchant.clone()),
        field("  Category: ", tx.category.clone()),
        field("  Amount: ", format!("{:.2}", tx.amount)),
        field("  Time: ", tx.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(vec![Span::styled(
            "  RISK",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )]),
        Line::from(vec![
            Span::styled("  Score: ", label),
            Span::styled(
                format!("{} ({})", tx.risk_score, tx.risk_level.as_str()),
                Style::default().fg(risk_color(tx.risk_score)),
            ),
        ]),
        Line::from(vec![
            Span::styled("  Status: ", label),
            Span::styled(tx.status.as_str(), Style::default().fg(status_color(tx.status))),
        ]),
        field("  Reason: ", tx.reason.clone()),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(vec![Span::styled(
            "  DEVICE",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )]),
        field("  Type: ", tx.device_type.clone()),
        field("  Device ID: ", tx.device_id.clone().unwrap_or_else(|| "-".to_string())),
        field("  IP: ", tx.device_ip.clone()),
        field("  Location: ", location),
        Line::from(""),
        Line::from(vec![Span::styled(
            "  Press Enter to close",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )]),
    ];

    f.render_widget(Paragraph::new(content).block(block), area);
}
