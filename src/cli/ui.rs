use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, Tabs, Wrap},
    Frame,
};

use crate::cli::chart::{self, ExpenseChart};
use crate::cli::input::LineEdit;
use crate::cli::state::{self, AddField, App, ReportField, Screen, Tab, Theme};
use crate::cli::util;

pub fn draw(f: &mut Frame, app: &mut App) {
    let size = f.size();
    f.render_widget(Block::default().style(base_style(app.theme)), size);

    match app.screen {
        Screen::Login => draw_login(f, size, app),
        Screen::Register => draw_register(f, size, app),
        Screen::Main => draw_main(f, size, app),
    }
}

fn base_style(theme: Theme) -> Style {
    match theme {
        Theme::Dark => Style::default().fg(Color::White).bg(Color::Black),
        Theme::Light => Style::default().fg(Color::Black).bg(Color::White),
    }
}

fn accent(theme: Theme) -> Style {
    match theme {
        Theme::Dark => Style::default().fg(Color::Cyan),
        Theme::Light => Style::default().fg(Color::Blue),
    }
}

// Auth screens

fn draw_login(f: &mut Frame, area: Rect, app: &App) {
    let form = &app.login;
    let rect = center_rect(area, 56, 11);
    f.render_widget(Clear, rect);

    let mut lines = vec![
        field_line("Username", &form.username, form.focus == 0),
        field_line("Password", &form.password, form.focus == 1),
        Line::from(""),
        Line::from("Enter: log in | Tab: switch field | F2: register | Esc: quit"),
        Line::from(""),
    ];
    if let Some(err) = &form.error {
        lines.push(Line::from(Span::styled(err.clone(), Style::default().fg(Color::Red))));
    } else if let Some(info) = &form.info {
        lines.push(Line::from(Span::styled(info.clone(), Style::default().fg(Color::Green))));
    }

    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(format!("Login  {}", util::clock())))
        .wrap(Wrap { trim: true });
    f.render_widget(p, rect);
}

fn draw_register(f: &mut Frame, area: Rect, app: &App) {
    let form = &app.register;
    let rect = center_rect(area, 56, 12);
    f.render_widget(Clear, rect);

    let mut lines = vec![
        field_line("Username", &form.username, form.focus == 0),
        field_line("Password", &form.password, form.focus == 1),
        field_line("Confirm ", &form.confirm, form.focus == 2),
        Line::from(""),
        Line::from("Enter: register | Tab: switch field | Esc: back to login"),
        Line::from(""),
    ];
    if let Some(err) = &form.error {
        lines.push(Line::from(Span::styled(err.clone(), Style::default().fg(Color::Red))));
    }

    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Register"))
        .wrap(Wrap { trim: true });
    f.render_widget(p, rect);
}

fn field_line(label: &str, field: &LineEdit, focused: bool) -> Line<'static> {
    let marker = if focused { "> " } else { "  " };
    let style = if focused {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::raw(format!("{marker}{label} : ")),
        Span::styled(field.rendered(), style),
        Span::raw(if focused { "_" } else { "" }),
    ])
}

// Main view

fn draw_main(f: &mut Frame, area: Rect, app: &mut App) {
    // top tabs | main content | bottom status bar
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(10), Constraint::Length(1)])
        .split(area);

    let titles = Tab::ALL
        .iter()
        .enumerate()
        .map(|(i, t)| Line::from(Span::raw(format!("{} {}", i + 1, t.title()))))
        .collect::<Vec<_>>();
    let user = app.session().map(|s| s.username.clone()).unwrap_or_default();
    let header = format!(
        "Finance Tracker | {}  [{}]  {}",
        user,
        app.sync_state.label(),
        util::clock()
    );
    let tabs = Tabs::new(titles)
        .select(app.tab.index())
        .block(Block::default().borders(Borders::ALL).title(header))
        .highlight_style(accent(app.theme).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, root[0]);

    match app.tab {
        Tab::Categories => draw_categories(f, root[1], app),
        Tab::Transactions => draw_txns(f, root[1], app),
        Tab::Operations => draw_operations(f, root[1], app),
        Tab::Reports => draw_reports(f, root[1], app),
        Tab::Help => draw_help(f, root[1]),
    }

    f.render_widget(Paragraph::new(app.status.clone()), root[2]);
}

// Categories Page

fn draw_categories(f: &mut Frame, area: Rect, app: &mut App) {
    let items: Vec<ListItem> = app
        .categories
        .list
        .iter()
        .map(|c| ListItem::new(Line::from(c.name.clone())))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Categories  (Up/Down, n=new, x=delete, r=refresh)"),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, area, &mut app.categories.sel);

    if app.categories.adding {
        let rect = center_rect(area, 48, 5);
        f.render_widget(Clear, rect);
        let p = Paragraph::new(vec![
            field_line("Name", &app.categories.name, true),
            Line::from(""),
            Line::from("Enter: add | Esc: cancel"),
        ])
        .block(Block::default().borders(Borders::ALL).title("New Category"));
        f.render_widget(p, rect);
    }
}

// Transactions Page

fn draw_txns(f: &mut Frame, area: Rect, app: &mut App) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let header = Row::new(vec!["Type", "Amount", "Category"])
        .height(1)
        .style(Style::default().add_modifier(Modifier::BOLD));
    let body: Vec<Row> = app
        .txn
        .table
        .iter()
        .map(|t| {
            Row::new(vec![
                Cell::from(t.kind.as_str()),
                Cell::from(t.amount.to_string()),
                Cell::from(t.category.to_string()),
            ])
        })
        .collect();
    let widths = [Constraint::Length(9), Constraint::Length(12), Constraint::Min(10)];
    let table = Table::new(body, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Transactions  (a=add, x=delete, r=refresh)"),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(table, cols[0], &mut app.txn.tsel);

    draw_chart(f, cols[1], app.txn.chart.as_ref());

    if app.add.open {
        let rect = center_rect(cols[0], 50, 14);
        f.render_widget(Clear, rect);
        draw_add_txn(f, rect, app);
    }
}

fn draw_chart(f: &mut Frame, area: Rect, chart: Option<&ExpenseChart>) {
    let block = Block::default().borders(Borders::ALL).title(chart::TITLE);
    let chart = match chart {
        Some(c) if !c.is_empty() => c,
        _ => {
            f.render_widget(Paragraph::new("No expenses yet").block(block), area);
            return;
        }
    };

    let bar_room = area.width.saturating_sub(4) as f64;
    let mut lines: Vec<Line> = Vec::with_capacity(chart.slices.len() * 2);
    for slice in &chart.slices {
        lines.push(Line::from(vec![
            Span::styled("■ ", Style::default().fg(slice.color)),
            Span::raw(format!(
                "{}  {}  ({:.1}%)",
                slice.label,
                util::fmt_money(&slice.value),
                slice.share
            )),
        ]));
        let cells = ((slice.share / 100.0) * bar_room).round() as usize;
        lines.push(Line::from(Span::styled(
            "█".repeat(cells.max(1)),
            Style::default().fg(slice.color),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(format!("Total: {}", util::fmt_money(&chart.total))));

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_add_txn(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(3)])
        .split(area);

    let selected = app
        .add
        .cat_sel
        .selected()
        .and_then(|i| app.categories.list.get(i))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "<select category>".into());

    let mut lines = vec![
        Line::from(format!(
            "{}Category: {}",
            if app.add.focus == AddField::Category { "> " } else { "  " },
            selected
        )),
        field_line("Amount", &app.add.amount, app.add.focus == AddField::Amount),
        Line::from(format!("  Type    : {}  (t to toggle)", app.add.kind.as_str())),
    ];
    if let Some(err) = &app.add.error {
        lines.push(Line::from(Span::styled(err.clone(), Style::default().fg(Color::Red))));
    }
    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Add Transaction  (Tab field, Enter save, Esc cancel)"),
    );
    f.render_widget(p, rows[0]);

    let items: Vec<ListItem> = app
        .categories
        .list
        .iter()
        .map(|c| ListItem::new(Line::from(c.name.clone())))
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Categories"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, rows[1], &mut app.add.cat_sel);
}

// Operations Page

fn draw_operations(f: &mut Frame, area: Rect, app: &mut App) {
    let header = Row::new(vec!["Date", "Time", "Category", "Type", "Amount"])
        .height(1)
        .style(Style::default().add_modifier(Modifier::BOLD));

    let body: Vec<Row> = app
        .ops
        .table
        .iter()
        .map(|op| {
            let (date, time) = match op.created_local() {
                Some(dt) => (dt.format("%Y-%m-%d").to_string(), dt.format("%H:%M:%S").to_string()),
                None => (op.created_at.clone(), String::new()),
            };
            Row::new(vec![
                Cell::from(date),
                Cell::from(time),
                Cell::from(op.category.to_string()),
                Cell::from(op.kind.as_str()),
                Cell::from(op.amount.to_string()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Min(12),
        Constraint::Length(9),
        Constraint::Length(12),
    ];
    let table = Table::new(body, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Operations  (e=edit amount, x=delete, r=refresh)"),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(table, area, &mut app.ops.tsel);

    if let Some((_, field)) = &app.ops.editing {
        let rect = center_rect(area, 44, 5);
        f.render_widget(Clear, rect);
        let p = Paragraph::new(vec![
            field_line("New amount", field, true),
            Line::from(""),
            Line::from("Enter: save (empty cancels) | Esc: cancel"),
        ])
        .block(Block::default().borders(Borders::ALL).title("Edit Operation"));
        f.render_widget(p, rect);
    } else if app.ops.confirm_delete.is_some() {
        let rect = center_rect(area, 54, 3);
        f.render_widget(Clear, rect);
        let p = Paragraph::new("Are you sure you want to delete this operation? (y/n)")
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, rect);
    }
}

// Reports Page

fn draw_reports(f: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(5)])
        .split(area);

    let r = &app.reports;
    let focused = |field: ReportField| r.editing && r.focus == field;
    let mut lines = vec![
        field_line("Start date", &r.start, focused(ReportField::Start)),
        field_line("End date  ", &r.end, focused(ReportField::End)),
        Line::from(""),
        Line::from("s/e: edit start/end | Enter: generate | Tab: switch field"),
    ];
    if let Some(err) = &r.error {
        lines.push(Line::from(Span::styled(err.clone(), Style::default().fg(Color::Red))));
    }
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Report Range")),
        rows[0],
    );

    let mut out: Vec<Line> = Vec::new();
    match &r.summary {
        Some(summary) => {
            out.extend(summary_lines(summary).into_iter().map(Line::from));
            out.push(Line::from(""));
            out.extend(category_lines(&r.by_category).into_iter().map(Line::from));
        }
        None => out.push(Line::from("No report yet")),
    }
    f.render_widget(
        Paragraph::new(out)
            .block(Block::default().borders(Borders::ALL).title("Report"))
            .wrap(Wrap { trim: true }),
        rows[1],
    );
}

pub fn summary_lines(summary: &state::ReportSummary) -> Vec<String> {
    vec![
        format!("Total Expenses: {}", summary.total_expenses),
        format!("Total Revenues: {}", summary.total_revenues),
        format!("Balance: {}", summary.balance),
    ]
}

pub fn category_lines(report: &state::CategoryReport) -> Vec<String> {
    report
        .iter()
        .map(|(name, t)| format!("{name}: Expenses - {}, Revenues - {}", t.expenses, t.revenues))
        .collect()
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help_text = [
        "Global Keys:",
        "  q        : Quit",
        "  Tab, 1-5 : Switch tabs",
        "  ?        : This help",
        "  T        : Toggle light/dark theme",
        "  o        : Log out",
        "",
        "Categories Tab:",
        "  Up/Down  : Navigate list",
        "  n        : New category",
        "  x/Del    : Delete selected category",
        "  r        : Refresh",
        "",
        "Transactions Tab:",
        "  a        : Add transaction (Tab field, t type, Enter save)",
        "  x/Del    : Delete selected transaction",
        "  r        : Refresh",
        "",
        "Operations Tab:",
        "  e/Enter  : Edit amount",
        "  x/Del    : Delete (asks for confirmation)",
        "  r        : Refresh",
        "",
        "Reports Tab:",
        "  s / e    : Edit start / end date (YYYY-MM-DD)",
        "  Enter    : Generate report",
    ]
    .join("\n");

    let p = Paragraph::new(help_text)
        .block(Block::default().borders(Borders::ALL).title("Help & Keybindings"));
    f.render_widget(p, area);
}

fn center_rect(rect: Rect, w: u16, h: u16) -> Rect {
    let x = rect.x + rect.width.saturating_sub(w) / 2;
    let y = rect.y + rect.height.saturating_sub(h) / 2;
    Rect { x, y, width: w.min(rect.width), height: h.min(rect.height) }
}
