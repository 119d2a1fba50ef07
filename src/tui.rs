use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{Phase, ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::ImporterError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 300;
const PHASES: [Phase; 5] = [
    Phase::Connect,
    Phase::Reconcile,
    Phase::Import,
    Phase::Annotate,
    Phase::Close,
];

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    imported_files: u64,
    failed_batches: u64,
    uploads: u64,
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    latency_ms: Option<u128>,
    counters: Counters,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    show_logs: bool,
    started: Instant,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
            } else {
                if let Some(latency) = parse_latency(&message) {
                    state.latency_ms = Some(latency);
                }
                apply_counters(&mut state.counters, &message);
            }

            let line = match event.elapsed {
                Some(elapsed) => format!("{message} ({:.1}s)", elapsed.as_secs_f64()),
                None => message,
            };
            push_bounded(&mut state.events, line.clone(), EVENTS_MAX);
            push_bounded(
                &mut state.logs,
                format!("[{}] {line}", chrono::Local::now().format("%H:%M:%S")),
                LOGS_MAX,
            );
        }
    }
}

/// Restores the terminal on every exit path.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> miette::Result<Self> {
        enable_raw_mode().into_diagnostic()?;
        io::stdout().execute(EnterAlternateScreen).into_diagnostic()?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().execute(LeaveAlternateScreen);
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "starting".to_string(),
                phase: Phase::Connect,
                latency_ms: None,
                counters: Counters::default(),
                events: VecDeque::new(),
                logs: VecDeque::new(),
                show_logs: false,
                started: Instant::now(),
            })),
        }
    }

    /// Runs `f` on a worker thread while rendering its progress. The work
    /// cannot be cancelled; F4 toggles the log view.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, ImporterError> + Send + 'static,
        R: Send + 'static,
    {
        let guard = TerminalGuard::enter()?;
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || {
            let _ = tx.send(f(&sink));
        });

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                break result;
            }
            if handle.is_finished() {
                if let Ok(result) = rx.try_recv() {
                    break result;
                }
                return Err(miette::Report::msg("worker thread stopped without a result"));
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::F(4)) {
                        if let Ok(mut state) = self.state.lock() {
                            state.show_logs = !state.show_logs;
                        }
                    }
                }
            }
            tick = tick.wrapping_add(1);
        };

        drop(guard);
        handle.join().ok();
        result.map_err(miette::Report::new)
    }
}

fn draw_ui(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Min(3),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(kind, tick), chunks[0]);
    frame.render_widget(draw_status_panel(state), chunks[1]);

    let (title, lines) = if state.show_logs {
        ("Logs (F4)", &state.logs)
    } else {
        ("Recent events (F4 logs)", &state.events)
    };
    let height = chunks[2].height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(height);
    let body = lines
        .iter()
        .skip(skip)
        .map(|line| Line::from(line.clone()))
        .collect::<Vec<_>>();
    let view = Paragraph::new(body)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: true });
    frame.render_widget(view, chunks[2]);
}

fn draw_header(kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Import => "Import",
        ProgressSinkKind::Annotate => "Annotate",
        ProgressSinkKind::Info => "Image info",
        ProgressSinkKind::User => "User",
    };
    let line = Line::from(vec![
        Span::styled(
            "OMERO-IMPORTER",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(vec![line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let phases = PHASES
        .iter()
        .flat_map(|phase| {
            let style = if *phase == state.phase {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            [Span::styled(phase.label(), style), Span::raw("  ")]
        })
        .collect::<Vec<_>>();

    let latency = state
        .latency_ms
        .map(|value| format!("{value} ms"))
        .unwrap_or_else(|| "-".to_string());
    let failed_color = if state.counters.failed_batches > 0 {
        Color::Red
    } else {
        Color::Green
    };

    let lines = vec![
        Line::from(phases),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(format!(
            "Elapsed: {:.1}s   Last import: {latency}",
            state.started.elapsed().as_secs_f64()
        )),
        Line::from(vec![
            Span::raw(format!(
                "Created: {}   Imported files: {}   Uploads: {}   ",
                state.counters.created, state.counters.imported_files, state.counters.uploads
            )),
            Span::styled(
                format!("Failed batches: {}", state.counters.failed_batches),
                Style::default().fg(failed_color),
            ),
        ]),
    ];
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Progress"))
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    PHASES
        .iter()
        .find(|phase| phase.label() == label)
        .map(|phase| (*phase, payload.trim()))
}

fn parse_latency(message: &str) -> Option<u128> {
    message
        .split("latency_ms=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u128>().ok())
}

fn apply_counters(counters: &mut Counters, message: &str) {
    if message.starts_with("create.") {
        counters.created += 1;
    } else if let Some(rest) = message.strip_prefix("import.done files=") {
        let files = rest
            .split_whitespace()
            .next()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        counters.imported_files += files;
    } else if message.starts_with("import.failed") {
        counters.failed_batches += 1;
    } else if message.starts_with("upload.done") {
        counters.uploads += 1;
    }
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}
