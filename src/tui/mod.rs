pub mod app;
pub mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::export::{ExportOptions, Exporter};
use crate::models::{ExportEvent, ExportReport, Segment};

use app::{App, View};

/// Run an export on a worker thread and show its progress until the user quits.
///
/// Returns the worker's result once the terminal is restored.
pub fn run(
    exporter: Exporter,
    input: PathBuf,
    segments: Vec<Segment>,
    options: ExportOptions,
) -> Result<ExportReport> {
    let cancel = Arc::new(AtomicBool::new(false));
    let exporter = exporter.with_cancel_flag(Arc::clone(&cancel));
    let mut app = App::new(&segments, input.clone(), options.album_dir());

    let (tx, rx) = mpsc::channel::<ExportEvent>();
    let worker = std::thread::spawn(move || exporter.export_tracks(&input, &segments, &options, &tx));

    let shown = show_progress(&mut app, rx, &cancel);
    finish(worker, &cancel, shown)
}

fn show_progress(app: &mut App, rx: mpsc::Receiver<ExportEvent>, cancel: &AtomicBool) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, app, rx, cancel);

    // Restore terminal
    disable_raw_mode()?;
    io::stdout().execute(LeaveAlternateScreen)?;
    result
}

/// Wait for the export thread. A failed UI cancels the export first, and its
/// error wins over the export's own result.
fn finish(
    worker: JoinHandle<crate::Result<ExportReport>>,
    cancel: &AtomicBool,
    shown: Result<()>,
) -> Result<ExportReport> {
    if shown.is_err() {
        cancel.store(true, Ordering::SeqCst);
    }
    let exported = worker
        .join()
        .map_err(|_| anyhow!("export thread panicked"))?;
    shown?;
    Ok(exported?)
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    rx: mpsc::Receiver<ExportEvent>,
    cancel: &AtomicBool,
) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::render(frame, app))?;
        // Note: ui::render updates app.visible_rows each frame

        while let Ok(event) = rx.try_recv() {
            app.apply(event);
        }

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match app.view {
                    View::Main => match key.code {
                        KeyCode::Char('q') | KeyCode::Esc if app.is_done() => {
                            app.should_quit = true;
                        }
                        KeyCode::Char('c') if !app.is_done() => {
                            app.cancel_requested = true;
                            cancel.store(true, Ordering::SeqCst);
                        }
                        KeyCode::Char('a') => {
                            app.view = View::About;
                        }
                        KeyCode::Char('j') | KeyCode::Down => {
                            app.select_next();
                        }
                        KeyCode::Char('k') | KeyCode::Up => {
                            app.select_prev();
                        }
                        _ => {}
                    },
                    View::About => {
                        if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
                            app.view = View::Main;
                        }
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
