//! Interactive live view: tokens stream to the terminal while a worker thread
//! runs the benchmark and a poller keeps GPU telemetry fresh.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use tokenburn_benchmark::{BenchmarkEvent, BenchmarkRunner, Recorder, RunControls};
use tokenburn_core::{
    GpuMetrics, Measurement, PromptCase, Result, RunSession, RunSummary, SessionMeta, TokenBurnError,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self as tokio_mpsc, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::gpu_monitor::GpuPoller;
use crate::report::{averages_line, format_elapsed};

const FRAME: Duration = Duration::from_millis(50);
const STATUS_EVERY: Duration = Duration::from_secs(1);
const KEY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveCommand {
    Skip,
    Quit,
}

/// `s` skips, `q`/Esc/Ctrl-C quit. Raw mode swallows SIGINT, so Ctrl-C arrives as a key.
pub fn command_for_key(key: &KeyEvent) -> Option<LiveCommand> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(LiveCommand::Quit),
        KeyCode::Char('s') | KeyCode::Char('S') => Some(LiveCommand::Skip),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(LiveCommand::Quit),
        _ => None,
    }
}

/// Single-key input in raw mode. The terminal is restored on drop.
pub struct KeyReader {
    commands: Receiver<LiveCommand>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    raw: bool,
}

impl KeyReader {
    pub fn spawn() -> Self {
        let raw = match terminal::enable_raw_mode() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Raw mode unavailable, keys will not be read");
                false
            }
        };

        let (tx, commands) = channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = raw.then(|| {
            thread::spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    match event::poll(KEY_POLL) {
                        Ok(false) => continue,
                        Ok(true) => {}
                        Err(e) => {
                            warn!(error = %e, "Key polling failed");
                            break;
                        }
                    }
                    let Ok(Event::Key(key)) = event::read() else { continue };
                    let Some(command) = command_for_key(&key) else { continue };
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                debug!("Key reader stopped");
            })
        });

        Self {
            commands,
            stop,
            handle,
            raw,
        }
    }

    pub fn commands(&self) -> &Receiver<LiveCommand> {
        &self.commands
    }
}

impl Drop for KeyReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if self.raw {
            if let Err(e) = terminal::disable_raw_mode() {
                error!(error = %e, "Failed to restore terminal");
            }
        }
    }
}

/// Raw mode does not translate `\n`, so every newline carries its own `\r`.
pub fn terminal_text(text: &str) -> String {
    text.replace('\n', "\r\n")
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LivePhase {
    #[default]
    Starting,
    Warmup,
    Streaming,
    Cooldown,
    Finished,
}

/// Display state derived purely from benchmark events.
#[derive(Debug, Default)]
pub struct LiveState {
    pub phase: LivePhase,
    pub current: u32,
    pub total: u32,
    pub label: String,
    pub ttft: Option<f64>,
    pub tokens_streamed: usize,
    pub completed: Vec<(String, Measurement)>,
    pub failed: Vec<(String, String)>,
    pub skipped: u32,
    pub cancelled: bool,
    pub summary: Option<RunSummary>,
    skip: Option<CancellationToken>,
}

impl LiveState {
    /// Fold an event in and return the text to write to the terminal.
    pub fn apply(&mut self, event: BenchmarkEvent) -> Option<String> {
        match event {
            BenchmarkEvent::Warmup => {
                self.phase = LivePhase::Warmup;
                Some("Warming up model...\n".to_string())
            }
            BenchmarkEvent::WarmupFailed { error } => {
                Some(format!("Warm-up failed: {}. Continuing anyway...\n", error))
            }
            BenchmarkEvent::Prompt {
                current,
                total,
                label,
                words,
                skip,
            } => {
                self.phase = LivePhase::Streaming;
                self.current = current;
                self.total = total;
                self.ttft = None;
                self.tokens_streamed = 0;
                self.skip = Some(skip);
                let header = format!(
                    "\n=== Prompt {}/{} ({}, {} words) === [s: skip, q: quit]\n",
                    current, total, label, words
                );
                self.label = label;
                Some(header)
            }
            BenchmarkEvent::FirstToken { ttft } => {
                self.ttft = Some(ttft);
                None
            }
            BenchmarkEvent::Token { content } => {
                self.tokens_streamed += 1;
                Some(content)
            }
            BenchmarkEvent::PromptComplete { label, measurement } => {
                self.skip = None;
                let line = format!(
                    "\n--- {}: PP {:.2} t/s | TTFT {:.2}s | TG {:.2} t/s | {} generated ---\n",
                    label,
                    measurement.prompt_speed,
                    measurement.time_to_first_token,
                    measurement.completion_speed,
                    measurement.completion_tokens
                );
                self.completed.push((label, measurement));
                Some(line)
            }
            BenchmarkEvent::PromptFailed { label, error } => {
                self.skip = None;
                let line = format!("\nError on prompt {}: {}\n", label, error);
                self.failed.push((label, error));
                Some(line)
            }
            BenchmarkEvent::PromptSkipped { label } => {
                self.skip = None;
                self.skipped += 1;
                Some(format!("\nSkipped prompt {}\n", label))
            }
            BenchmarkEvent::Cooldown { secs, skip } => {
                self.phase = LivePhase::Cooldown;
                self.skip = Some(skip);
                Some(format!("Cooling down for {} seconds... [s: skip]\n", secs))
            }
            BenchmarkEvent::Cancelled => {
                self.cancelled = true;
                Some("\nBenchmark cancelled\n".to_string())
            }
            BenchmarkEvent::Done { summary } => {
                self.phase = LivePhase::Finished;
                self.skip = None;
                let mut line = format!(
                    "\nCompleted {}/{} prompts ({} failed, {} skipped) in {}\n",
                    summary.succeeded,
                    summary.total,
                    summary.failed,
                    summary.skipped,
                    format_elapsed(summary.elapsed_secs)
                );
                if let Some(averages) = averages_line(&summary) {
                    line.push_str(&averages);
                    line.push('\n');
                }
                self.summary = Some(summary);
                Some(line)
            }
        }
    }

    /// Interrupt whatever is running now; false when there is nothing to skip.
    pub fn skip(&mut self) -> bool {
        match self.skip.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the status line may overwrite the current terminal line.
    pub fn shows_status(&self) -> bool {
        match self.phase {
            LivePhase::Warmup | LivePhase::Cooldown => true,
            LivePhase::Streaming => self.ttft.is_none(),
            _ => false,
        }
    }
}

/// One-line GPU summary for the live view.
pub fn status_line(gpu: &GpuMetrics, state: &LiveState, elapsed: Duration) -> String {
    let telemetry = if gpu.connected {
        format!(
            "{} | {}°C | util {}% | mem {}/{} MB ({:.0}%) | {:.0}/{:.0} W",
            gpu.name,
            gpu.temperature_c,
            gpu.gpu_utilization_percent,
            gpu.memory_used_mb,
            gpu.memory_total_mb,
            gpu.memory_used_percent(),
            gpu.power_draw_watts,
            gpu.power_limit_watts
        )
    } else {
        "GPU telemetry unavailable".to_string()
    };
    format!(
        "[{}] {} | prompt {}/{}",
        format_elapsed(elapsed.as_secs_f64()),
        telemetry,
        state.current,
        state.total
    )
}

/// Everything the live view needs to drive one run.
pub struct LiveRun<R: Recorder + 'static> {
    pub runner: BenchmarkRunner,
    pub meta: SessionMeta,
    pub cases: Vec<PromptCase>,
    pub recorder: R,
    pub quit: CancellationToken,
}

impl<R: Recorder + 'static> LiveRun<R> {
    /// Run on a worker thread and render events until it finishes.
    #[instrument(skip_all, fields(model = %self.meta.model, prompts = self.cases.len()))]
    pub fn run(self, poller: &GpuPoller, commands: &Receiver<LiveCommand>) -> Result<RunSession> {
        info!("Starting live view");
        let Self {
            mut runner,
            meta,
            cases,
            mut recorder,
            quit,
        } = self;

        let (tx, mut rx) = tokio_mpsc::channel(256);
        let controls = RunControls::new(quit.clone()).with_events(tx);

        let worker = thread::spawn(move || -> Result<RunSession> {
            let rt = Runtime::new()?;
            rt.block_on(async move { runner.run(meta, &cases, &mut recorder, &controls).await })
        });

        let started = Instant::now();
        let mut last_status = Instant::now();
        let mut state = LiveState::default();
        let mut stdout = std::io::stdout();

        loop {
            while let Ok(command) = commands.try_recv() {
                match command {
                    LiveCommand::Skip => {
                        if state.skip() {
                            let _ = write!(stdout, "\r\n[skipping]\r\n");
                        }
                    }
                    LiveCommand::Quit => {
                        let _ = write!(stdout, "\r\n[quitting after current step]\r\n");
                        quit.cancel();
                    }
                }
            }

            let mut finished = false;
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        if let Some(text) = state.apply(event) {
                            let _ = write!(stdout, "{}", terminal_text(&text));
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        finished = true;
                        break;
                    }
                }
            }

            if finished {
                break;
            }

            if state.shows_status() && last_status.elapsed() >= STATUS_EVERY {
                let line = status_line(&poller.snapshot(), &state, started.elapsed());
                let _ = write!(stdout, "\r{}", line);
                last_status = Instant::now();
            }
            let _ = stdout.flush();
            thread::sleep(FRAME);
        }
        let _ = stdout.flush();

        worker.join().map_err(|_| {
            error!("Live worker panicked");
            TokenBurnError::Io(std::io::Error::other("live worker panicked"))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenburn_core::TokenSource;

    fn prompt_event(skip: &CancellationToken) -> BenchmarkEvent {
        BenchmarkEvent::Prompt {
            current: 1,
            total: 3,
            label: "1".to_string(),
            words: 12,
            skip: skip.clone(),
        }
    }

    #[test]
    fn test_single_keys_map_to_commands() {
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(command_for_key(&key(KeyCode::Char('s'))), Some(LiveCommand::Skip));
        assert_eq!(command_for_key(&key(KeyCode::Char('Q'))), Some(LiveCommand::Quit));
        assert_eq!(command_for_key(&key(KeyCode::Esc)), Some(LiveCommand::Quit));
        assert_eq!(command_for_key(&key(KeyCode::Char('x'))), None);
        assert_eq!(command_for_key(&key(KeyCode::Enter)), None);

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(command_for_key(&ctrl_c), Some(LiveCommand::Quit));
        assert_eq!(command_for_key(&key(KeyCode::Char('c'))), None);

        let released = KeyEvent::new_with_kind(KeyCode::Char('s'), KeyModifiers::NONE, KeyEventKind::Release);
        assert_eq!(command_for_key(&released), None);
    }

    #[test]
    fn test_terminal_text_adds_carriage_returns() {
        assert_eq!(terminal_text("a\nb\n"), "a\r\nb\r\n");
        assert_eq!(terminal_text("no newline"), "no newline");
    }

    #[test]
    fn test_prompt_lifecycle() {
        let mut state = LiveState::default();
        let skip = CancellationToken::new();

        let header = state.apply(prompt_event(&skip)).unwrap();
        assert!(header.contains("Prompt 1/3"));
        assert!(state.shows_status());

        assert!(state.apply(BenchmarkEvent::FirstToken { ttft: 0.4 }).is_none());
        assert!(!state.shows_status());
        assert_eq!(
            state.apply(BenchmarkEvent::Token { content: "Hi".to_string() }),
            Some("Hi".to_string())
        );

        let measurement = Measurement::new(100, 2.0, 50, 5.0, TokenSource::Reported);
        let line = state
            .apply(BenchmarkEvent::PromptComplete {
                label: "1".to_string(),
                measurement,
            })
            .unwrap();
        assert!(line.contains("PP 50.00 t/s"));
        assert!(line.contains("TG 16.67 t/s"));
        assert_eq!(state.completed.len(), 1);
        assert_eq!(state.tokens_streamed, 1);
        assert!(!state.skip(), "nothing left to skip once the prompt finished");
        assert!(!skip.is_cancelled());
    }

    #[test]
    fn test_skip_cancels_active_token() {
        let mut state = LiveState::default();
        let skip = CancellationToken::new();
        state.apply(prompt_event(&skip));
        assert!(state.skip());
        assert!(skip.is_cancelled());

        let cooldown = CancellationToken::new();
        state.apply(BenchmarkEvent::Cooldown {
            secs: 10,
            skip: cooldown.clone(),
        });
        assert_eq!(state.phase, LivePhase::Cooldown);
        assert!(state.skip());
        assert!(cooldown.is_cancelled());
    }

    #[test]
    fn test_done_and_failures() {
        let mut state = LiveState::default();
        state.apply(BenchmarkEvent::PromptFailed {
            label: "2".to_string(),
            error: "HTTP error: refused".to_string(),
        });
        state.apply(BenchmarkEvent::PromptSkipped { label: "3".to_string() });
        state.apply(BenchmarkEvent::Cancelled);
        let line = state
            .apply(BenchmarkEvent::Done {
                summary: RunSummary {
                    total: 3,
                    succeeded: 1,
                    failed: 1,
                    skipped: 1,
                    elapsed_secs: 65.0,
                    avg_prompt_speed: 812.5,
                    avg_completion_speed: 41.0,
                    ..Default::default()
                },
            })
            .unwrap();

        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.skipped, 1);
        assert!(state.cancelled);
        assert_eq!(state.phase, LivePhase::Finished);
        assert!(line.contains("1/3"));
        assert!(line.contains("1m5s"));
        assert!(line.contains("Average PP/s: 812.50 | Average TG/s: 41.00"));
    }

    #[test]
    fn test_status_line_without_gpu() {
        let state = LiveState {
            current: 2,
            total: 5,
            ..Default::default()
        };
        let line = status_line(&GpuMetrics::default(), &state, Duration::from_secs(3));
        assert_eq!(line, "[3s] GPU telemetry unavailable | prompt 2/5");
    }
}
