use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Measurement, MemoryStats};

/// Run-level metadata shared by every outcome of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub run_id: String,
    pub gpu: String,
    pub model: String,
    pub base_url: String,
    pub started_at: String,
}

impl SessionMeta {
    pub fn new(
        gpu: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        started_at: impl Into<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            gpu: gpu.into(),
            model: model.into(),
            base_url: base_url.into(),
            started_at: started_at.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

/// What happened to one prompt of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOutcome {
    pub label: String,
    pub status: OutcomeStatus,
    pub measurement: Option<Measurement>,
    pub memory_stats: Option<MemoryStats>,
    pub error: Option<String>,
}

impl PromptOutcome {
    pub fn success(label: impl Into<String>, measurement: Measurement, memory_stats: Option<MemoryStats>) -> Self {
        Self {
            label: label.into(),
            status: OutcomeStatus::Success,
            measurement: Some(measurement),
            memory_stats,
            error: None,
        }
    }

    pub fn failed(label: impl Into<String>, error: impl Into<String>, memory_stats: Option<MemoryStats>) -> Self {
        Self {
            label: label.into(),
            status: OutcomeStatus::Failed,
            measurement: None,
            memory_stats,
            error: Some(error.into()),
        }
    }

    pub fn skipped(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: OutcomeStatus::Skipped,
            measurement: None,
            memory_stats: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub elapsed_secs: f64,
    pub avg_prompt_speed: f64,
    pub avg_completion_speed: f64,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[PromptOutcome], elapsed_secs: f64, cancelled: bool) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.status == status).count() as u32;
        let measurements: Vec<&Measurement> =
            outcomes.iter().filter_map(|o| o.measurement.as_ref()).collect();

        let mean = |f: fn(&Measurement) -> f64| {
            if measurements.is_empty() {
                return 0.0;
            }
            measurements.iter().map(|m| f(m)).sum::<f64>() / measurements.len() as f64
        };

        Self {
            total: outcomes.len() as u32,
            succeeded: count(OutcomeStatus::Success),
            failed: count(OutcomeStatus::Failed),
            skipped: count(OutcomeStatus::Skipped),
            elapsed_secs,
            avg_prompt_speed: mean(|m| m.prompt_speed),
            avg_completion_speed: mean(|m| m.completion_speed),
            cancelled,
        }
    }
}

/// Ordered outcomes of one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub meta: SessionMeta,
    pub outcomes: Vec<PromptOutcome>,
    pub summary: RunSummary,
}
