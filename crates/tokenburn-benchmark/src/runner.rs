use std::time::Instant;

use tokenburn_core::{
    Measurement, MemoryStats, PromptCase, PromptOutcome, Result, RunSession, RunSummary, SessionMeta,
    TokenBurnError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cooldown::{Cooldown, CooldownOutcome};
use crate::engine::{MeasurementEngine, StreamObserver};

/// Progress of a run, for interactive front-ends.
#[derive(Debug, Clone)]
pub enum BenchmarkEvent {
    Warmup,
    WarmupFailed { error: String },
    /// `skip` interrupts only this prompt.
    Prompt { current: u32, total: u32, label: String, words: u32, skip: CancellationToken },
    FirstToken { ttft: f64 },
    Token { content: String },
    PromptComplete { label: String, measurement: Measurement },
    PromptFailed { label: String, error: String },
    PromptSkipped { label: String },
    Cooldown { secs: u64, skip: CancellationToken },
    Done { summary: RunSummary },
    Cancelled,
}

/// Sink for outcomes as soon as each prompt finishes.
pub trait Recorder: Send {
    fn begin(&mut self, _meta: &SessionMeta) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, outcome: &PromptOutcome) -> Result<()>;

    fn finish(&mut self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

/// Fans every call out to several recorders. A failing recorder does not
/// stop the others; the first error is returned.
#[derive(Default)]
pub struct Recorders {
    inner: Vec<Box<dyn Recorder>>,
}

impl Recorders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, recorder: impl Recorder + 'static) -> Self {
        self.inner.push(Box::new(recorder));
        self
    }

    pub fn push(&mut self, recorder: Box<dyn Recorder>) {
        self.inner.push(recorder);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn each(&mut self, mut f: impl FnMut(&mut dyn Recorder) -> Result<()>) -> Result<()> {
        let mut first_err = None;
        for recorder in &mut self.inner {
            if let Err(e) = f(recorder.as_mut()) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Recorder for Recorders {
    fn begin(&mut self, meta: &SessionMeta) -> Result<()> {
        self.each(|r| r.begin(meta))
    }

    fn record(&mut self, outcome: &PromptOutcome) -> Result<()> {
        self.each(|r| r.record(outcome))
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        self.each(|r| r.finish(summary))
    }
}

/// Something sampled while a request is in flight, e.g. GPU memory.
pub trait ResourceMonitor: Send {
    fn begin(&mut self);
    fn end(&mut self) -> Option<MemoryStats>;
}

/// Cancellation and observation hooks for one run.
#[derive(Debug, Clone, Default)]
pub struct RunControls {
    /// Stops the run between prompts or during cooldown.
    pub quit: CancellationToken,
    /// When set, tokens are streamed here and prompts become skippable mid-stream.
    pub events: Option<mpsc::Sender<BenchmarkEvent>>,
}

impl RunControls {
    pub fn new(quit: CancellationToken) -> Self {
        Self { quit, events: None }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<BenchmarkEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: BenchmarkEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Sequential prompt runner: warm-up, then one request at a time with a
/// cooldown in between.
pub struct BenchmarkRunner {
    engine: MeasurementEngine,
    cooldown: Cooldown,
    monitor: Option<Box<dyn ResourceMonitor>>,
}

impl BenchmarkRunner {
    pub fn new(engine: MeasurementEngine, cooldown: Cooldown) -> Self {
        Self {
            engine,
            cooldown,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: impl ResourceMonitor + 'static) -> Self {
        self.monitor = Some(Box::new(monitor));
        self
    }

    pub fn engine(&self) -> &MeasurementEngine {
        &self.engine
    }

    pub async fn run(
        &mut self,
        meta: SessionMeta,
        cases: &[PromptCase],
        recorder: &mut dyn Recorder,
        controls: &RunControls,
    ) -> Result<RunSession> {
        info!(model = %meta.model, gpu = %meta.gpu, prompts = cases.len(), "Starting benchmark");
        let started = Instant::now();
        recorder.begin(&meta)?;

        controls.emit(BenchmarkEvent::Warmup).await;
        match self.engine.warmup().await {
            Ok(_) => info!("Warm-up complete"),
            Err(e) => {
                warn!(error = %e, "Warm-up failed, continuing");
                controls.emit(BenchmarkEvent::WarmupFailed { error: e.to_string() }).await;
            }
        }

        let total = cases.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = false;

        for (i, case) in cases.iter().enumerate() {
            if controls.quit.is_cancelled() {
                cancelled = true;
                break;
            }

            let skip = controls.quit.child_token();
            info!(
                "Processing prompt {}/{} ({}, {} words)",
                i + 1,
                total,
                case.label,
                case.word_count()
            );
            controls
                .emit(BenchmarkEvent::Prompt {
                    current: i as u32 + 1,
                    total: total as u32,
                    label: case.label.clone(),
                    words: case.word_count(),
                    skip: skip.clone(),
                })
                .await;

            let outcome = self.run_case(case, &skip, controls).await;
            if !outcome.is_success() && controls.quit.is_cancelled() {
                cancelled = true;
            }

            if let Err(e) = recorder.record(&outcome) {
                warn!(label = %case.label, error = %e, "Failed to record outcome");
            }
            outcomes.push(outcome);

            if cancelled {
                break;
            }

            if i + 1 < total && !self.cooldown.is_disabled() {
                let secs = self.cooldown.duration().as_secs();
                let skip = controls.quit.child_token();
                info!("Cooling down for {} seconds", secs);
                controls
                    .emit(BenchmarkEvent::Cooldown {
                        secs,
                        skip: skip.clone(),
                    })
                    .await;
                if self.cooldown.wait(&skip).await == CooldownOutcome::Interrupted {
                    info!("Cooldown interrupted");
                }
            }
        }

        let summary = RunSummary::from_outcomes(&outcomes, started.elapsed().as_secs_f64(), cancelled);
        if let Err(e) = recorder.finish(&summary) {
            warn!(error = %e, "Failed to finalise reports");
        }

        if cancelled {
            info!("Benchmark cancelled");
            controls.emit(BenchmarkEvent::Cancelled).await;
        }
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Benchmark complete"
        );
        controls
            .emit(BenchmarkEvent::Done {
                summary: summary.clone(),
            })
            .await;

        Ok(RunSession {
            meta,
            outcomes,
            summary,
        })
    }

    async fn run_case(
        &mut self,
        case: &PromptCase,
        skip: &CancellationToken,
        controls: &RunControls,
    ) -> PromptOutcome {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.begin();
        }

        let result = match &controls.events {
            Some(events) => {
                let observer = StreamObserver { cancel: skip, events };
                self.engine.measure_observed(&case.text, true, observer).await
            }
            None => self.engine.measure(&case.text, true).await,
        };

        let memory = self.monitor.as_mut().and_then(|p| p.end());

        match result {
            Ok(measurement) => {
                info!(
                    label = %case.label,
                    prompt_tokens = measurement.prompt_tokens,
                    ttft = measurement.time_to_first_token,
                    pp_speed = measurement.prompt_speed,
                    tg_speed = measurement.completion_speed,
                    "Prompt complete"
                );
                controls
                    .emit(BenchmarkEvent::PromptComplete {
                        label: case.label.clone(),
                        measurement: measurement.clone(),
                    })
                    .await;
                PromptOutcome::success(&case.label, measurement, memory)
            }
            Err(TokenBurnError::Cancelled) => {
                info!(label = %case.label, "Prompt skipped");
                controls
                    .emit(BenchmarkEvent::PromptSkipped {
                        label: case.label.clone(),
                    })
                    .await;
                PromptOutcome::skipped(&case.label)
            }
            Err(e) => {
                error!(label = %case.label, error = %e, "Prompt failed");
                controls
                    .emit(BenchmarkEvent::PromptFailed {
                        label: case.label.clone(),
                        error: e.to_string(),
                    })
                    .await;
                PromptOutcome::failed(&case.label, e.to_string(), memory)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl Recorder for Collect {
        fn record(&mut self, outcome: &PromptOutcome) -> Result<()> {
            self.0.lock().unwrap().push(outcome.label.clone());
            Ok(())
        }
    }

    struct Broken;

    impl Recorder for Broken {
        fn record(&mut self, _outcome: &PromptOutcome) -> Result<()> {
            Err(TokenBurnError::Config("disk full".to_string()))
        }
    }

    #[test]
    fn test_recorders_fan_out_despite_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut recorders = Recorders::new()
            .with(Broken)
            .with(Collect(seen.clone()));
        assert_eq!(recorders.len(), 2);

        let result = recorders.record(&PromptOutcome::skipped("3"));
        assert!(result.is_err());
        assert_eq!(*seen.lock().unwrap(), vec!["3".to_string()]);
        assert!(recorders.finish(&RunSummary::default()).is_ok());
    }

    #[test]
    fn test_empty_recorders_accept_everything() {
        let mut recorders = Recorders::new();
        assert!(recorders.is_empty());
        assert!(recorders.record(&PromptOutcome::skipped("1")).is_ok());
    }
}
