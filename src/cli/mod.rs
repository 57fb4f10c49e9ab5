//! TUI front-end entry (Ratatui + Crossterm)
//! - Builds the HTTP client from config
//! - Sets up terminal, drives the draw/input loop and drains sync events

use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::config::ClientConfig;

pub mod api;
pub mod chart;
pub mod input;
pub mod keys;
pub mod session;
pub mod state;
pub mod sync;
pub mod ui;
pub mod util;

type Term = Terminal<CrosstermBackend<std::io::Stdout>>;

pub async fn run(config: &ClientConfig) -> Result<()> {
    let mut app = init_app(config)?;

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut app).await;

    // stop polling before the terminal goes back to cooked mode
    app.logout();

    disable_raw_mode()?;
    let mut stdout = std::io::stdout();
    crossterm::execute!(stdout, LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    result
}

async fn event_loop(terminal: &mut Term, app: &mut state::App) -> Result<()> {
    // short tick keeps the header clock current
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        app.pump_sync_events();
        terminal.draw(|f| ui::draw(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key).await;
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.quit {
            tracing::info!("quit requested");
            return Ok(());
        }
    }
}

pub fn init_app(config: &ClientConfig) -> Result<state::App> {
    let client = api::Client::new(config)?;
    tracing::info!(api_base = %client.base_url(), "client ready");
    Ok(state::App::new(client, config.retry_delay))
}
