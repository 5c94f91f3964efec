use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokenburn_benchmark::Recorder;
use tokenburn_core::{
    Measurement, MemoryStats, OutcomeStatus, PromptOutcome, Result, RunSummary, SessionMeta, TokenSource,
};
use tracing::{debug, info};

pub const TABLE_HEADERS: [&str; 8] = [
    "GPU",
    "Model",
    "Prompt Tokens",
    "PP/s",
    "TTFT",
    "Generated Tokens",
    "TG/s",
    "Duration",
];

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W").expect("static regex"))
}

/// Replace every non-word character so names are safe in file names.
pub fn sanitize(name: &str) -> String {
    non_word().replace_all(name, "_").into_owned()
}

/// Compact duration such as `1d2h3m4s`; zero components are omitted.
pub fn format_elapsed(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 { secs as u64 } else { 0 };
    let (days, rest) = (total / 86_400, total % 86_400);
    let (hours, rest) = (rest / 3600, rest % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    let mut out = String::new();
    for (value, unit) in [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s")] {
        if value > 0 {
            out.push_str(&format!("{}{}", value, unit));
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

fn table_line(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

pub fn header_row() -> String {
    table_line(&TABLE_HEADERS.map(String::from))
}

pub fn separator_row() -> String {
    table_line(&TABLE_HEADERS.map(|h| "-".repeat(h.chars().count())))
}

pub fn measurement_row(gpu: &str, model: &str, m: &Measurement) -> String {
    table_line(&[
        gpu.to_string(),
        model.to_string(),
        m.prompt_tokens.to_string(),
        format!("{:.2}", m.prompt_speed),
        format!("{:.2}", m.time_to_first_token),
        m.completion_tokens.to_string(),
        format!("{:.2}", m.completion_speed),
        format!("{:.2}", m.total_duration),
    ])
}

/// Mean speeds over the successful prompts, or `None` when nothing succeeded.
pub fn averages_line(summary: &RunSummary) -> Option<String> {
    (summary.succeeded > 0).then(|| {
        format!(
            "Average PP/s: {:.2} | Average TG/s: {:.2} ({} successful prompts)",
            summary.avg_prompt_speed, summary.avg_completion_speed, summary.succeeded
        )
    })
}

/// Prints progress rows to stdout as outcomes arrive.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    meta: Option<SessionMeta>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for ConsoleReporter {
    fn begin(&mut self, meta: &SessionMeta) -> Result<()> {
        println!("\nTesting on {} with model {}", meta.gpu, meta.model);
        println!("{}", header_row());
        println!("{}", separator_row());
        self.meta = Some(meta.clone());
        Ok(())
    }

    fn record(&mut self, outcome: &PromptOutcome) -> Result<()> {
        let (gpu, model) = self
            .meta
            .as_ref()
            .map(|m| (m.gpu.as_str(), m.model.as_str()))
            .unwrap_or(("", ""));

        match (&outcome.status, &outcome.measurement) {
            (OutcomeStatus::Success, Some(m)) => println!("{}", measurement_row(gpu, model, m)),
            (OutcomeStatus::Skipped, _) => println!("Skipped prompt {}", outcome.label),
            _ => println!(
                "Error on prompt {}: {}",
                outcome.label,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        println!("\nTotal duration: {}", format_elapsed(summary.elapsed_secs));
        if let Some(line) = averages_line(summary) {
            println!("{}", line);
        }
        Ok(())
    }
}

/// Markdown-style table log, `report-<gpu>-<model>.txt`.
#[derive(Debug)]
pub struct TableLog {
    path: PathBuf,
    gpu: String,
    model: String,
}

impl TableLog {
    pub fn new(dir: &Path, gpu: &str, model: &str) -> Self {
        Self {
            path: dir.join(format!("report-{}-{}.txt", sanitize(gpu), sanitize(model))),
            gpu: gpu.to_string(),
            model: model.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl Recorder for TableLog {
    fn begin(&mut self, _meta: &SessionMeta) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed stale report"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.append(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string())?;
        self.append(&format!("GPU: {}", self.gpu))?;
        self.append(&format!("Model: {}", self.model))?;
        self.append("")?;
        self.append(&header_row())?;
        self.append(&separator_row())
    }

    fn record(&mut self, outcome: &PromptOutcome) -> Result<()> {
        match &outcome.measurement {
            Some(m) if outcome.is_success() => self.append(&measurement_row(&self.gpu, &self.model, m)),
            _ => Ok(()),
        }
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        self.append(&format!("\nTotal duration: {}", format_elapsed(summary.elapsed_secs)))?;
        info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}

/// One element of the JSON report array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub timestamp: String,
    pub gpu: String,
    pub model: String,
    pub context_label: String,
    pub prompt_tokens: Option<u32>,
    pub prompt_speed: Option<f64>,
    pub ttft: Option<f64>,
    pub completion_tokens: Option<u32>,
    pub completion_speed: Option<f64>,
    pub total_duration: Option<f64>,
    pub token_source: Option<TokenSource>,
    pub memory_stats: Option<MemoryStats>,
    pub success: bool,
    pub error: Option<String>,
}

impl ReportRecord {
    pub fn from_outcome(gpu: &str, model: &str, outcome: &PromptOutcome, at: DateTime<Local>) -> Self {
        let m = outcome.measurement.as_ref();
        let error = match outcome.status {
            OutcomeStatus::Skipped => Some("skipped".to_string()),
            _ => outcome.error.clone(),
        };

        Self {
            timestamp: at.to_rfc3339(),
            gpu: gpu.to_string(),
            model: model.to_string(),
            context_label: outcome.label.clone(),
            prompt_tokens: m.map(|m| m.prompt_tokens),
            prompt_speed: m.map(|m| m.prompt_speed),
            ttft: m.map(|m| m.time_to_first_token),
            completion_tokens: m.map(|m| m.completion_tokens),
            completion_speed: m.map(|m| m.completion_speed),
            total_duration: m.map(|m| m.total_duration),
            token_source: m.map(|m| m.token_source),
            memory_stats: outcome.memory_stats.clone(),
            success: outcome.is_success(),
            error,
        }
    }
}

/// `report_advanced_<gpu>_<model>_<stamp>.json`, rewritten after every outcome.
#[derive(Debug)]
pub struct JsonReport {
    path: PathBuf,
    gpu: String,
    model: String,
    records: Vec<ReportRecord>,
}

impl JsonReport {
    pub fn new(dir: &Path, gpu: &str, model: &str, started: DateTime<Local>) -> Self {
        let file = format!(
            "report_advanced_{}_{}_{}.json",
            sanitize(gpu),
            sanitize(model),
            started.format("%Y%m%d_%H%M%S")
        );
        Self {
            path: dir.join(file),
            gpu: gpu.to_string(),
            model: model.to_string(),
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ReportRecord] {
        &self.records
    }

    fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Recorder for JsonReport {
    fn begin(&mut self, _meta: &SessionMeta) -> Result<()> {
        self.records.clear();
        self.save()
    }

    fn record(&mut self, outcome: &PromptOutcome) -> Result<()> {
        self.records
            .push(ReportRecord::from_outcome(&self.gpu, &self.model, outcome, Local::now()));
        self.save()
    }

    fn finish(&mut self, _summary: &RunSummary) -> Result<()> {
        self.save()?;
        info!(path = %self.path.display(), records = self.records.len(), "Results saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta::new("RTX 3090", "qwen3:32b", "http://localhost:11434/v1/", "now")
    }

    fn success(label: &str) -> PromptOutcome {
        PromptOutcome::success(label, Measurement::new(100, 2.0, 50, 5.0, TokenSource::Reported), None)
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("qwen3:32b"), "qwen3_32b");
        assert_eq!(sanitize("RTX 3090/24GB"), "RTX_3090_24GB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(93_784.9), "1d2h3m4s");
        assert_eq!(format_elapsed(3600.0), "1h");
        assert_eq!(format_elapsed(65.0), "1m5s");
        assert_eq!(format_elapsed(0.4), "0s");
    }

    #[test]
    fn test_averages_line_uses_successful_prompts() {
        let outcomes = vec![success("1"), PromptOutcome::failed("2", "boom", None)];
        let summary = RunSummary::from_outcomes(&outcomes, 12.0, false);
        assert_eq!(
            averages_line(&summary).unwrap(),
            "Average PP/s: 50.00 | Average TG/s: 16.67 (1 successful prompts)"
        );
        assert!(averages_line(&RunSummary::default()).is_none());
    }

    #[test]
    fn test_separator_matches_header_widths() {
        assert_eq!(
            header_row(),
            "| GPU | Model | Prompt Tokens | PP/s | TTFT | Generated Tokens | TG/s | Duration |"
        );
        assert_eq!(
            separator_row(),
            "| --- | ----- | ------------- | ---- | ---- | ---------------- | ---- | -------- |"
        );
    }

    #[test]
    fn test_table_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TableLog::new(dir.path(), "RTX 3090", "qwen3:32b");
        assert!(log.path().ends_with("report-RTX_3090-qwen3_32b.txt"));
        std::fs::write(log.path(), "stale contents\n").unwrap();

        log.begin(&meta()).unwrap();
        log.record(&success("1")).unwrap();
        log.record(&PromptOutcome::failed("2", "boom", None)).unwrap();
        log.finish(&RunSummary {
            elapsed_secs: 65.0,
            ..Default::default()
        })
        .unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(!text.contains("stale"));
        assert_eq!(lines[1], "GPU: RTX 3090");
        assert_eq!(lines[2], "Model: qwen3:32b");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], header_row());
        assert_eq!(lines[5], separator_row());
        assert_eq!(
            lines[6],
            "| RTX 3090 | qwen3:32b | 100 | 50.00 | 2.00 | 50 | 16.67 | 5.00 |"
        );
        assert_eq!(lines[7], "");
        assert_eq!(lines[8], "Total duration: 1m5s");
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn test_json_report_is_valid_after_each_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local::now();
        let mut report = JsonReport::new(dir.path(), "RTX 3090", "qwen3:32b", started);
        assert!(report
            .path()
            .to_string_lossy()
            .contains(&format!("report_advanced_RTX_3090_qwen3_32b_{}", started.format("%Y%m%d_%H%M%S"))));

        report.begin(&meta()).unwrap();
        let read = |path: &Path| -> Vec<serde_json::Value> {
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
        };
        assert!(read(report.path()).is_empty());

        report.record(&success("1k")).unwrap();
        assert_eq!(read(report.path()).len(), 1);

        report
            .record(&PromptOutcome::failed("2k", "connection reset", None))
            .unwrap();
        let records = read(report.path());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["success"], true);
        assert_eq!(records[0]["prompt_speed"], 50.0);
        assert_eq!(records[0]["context_label"], "1k");
        assert_eq!(records[1]["success"], false);
        assert_eq!(records[1]["error"], "connection reset");
        assert!(records[1]["prompt_tokens"].is_null());
        assert!(!report.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_record_keeps_memory_stats() {
        let outcome = PromptOutcome::success(
            "8k",
            Measurement::new(8000, 4.0, 10, 6.0, TokenSource::Estimated),
            MemoryStats::from_samples(&[1000, 3000]),
        );
        let record = ReportRecord::from_outcome("gpu", "model", &outcome, Local::now());
        assert_eq!(record.memory_stats.unwrap().max_memory_mb, 3000);
        assert_eq!(record.token_source, Some(TokenSource::Estimated));

        let skipped = ReportRecord::from_outcome("gpu", "model", &PromptOutcome::skipped("9"), Local::now());
        assert!(!skipped.success);
        assert_eq!(skipped.error.as_deref(), Some("skipped"));
    }
}
