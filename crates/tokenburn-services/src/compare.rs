//! Side-by-side comparison of JSON reports from two configurations,
//! e.g. the same model on a 24 GB and a 48 GB card.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use tokenburn_benchmark::provisioner::natural_cmp;
use tokenburn_core::{ContextCategory, Result};
use tracing::info;

use crate::report::ReportRecord;

const RULE_WIDTH: usize = 80;

/// Read one `report_advanced_*.json` array.
pub fn load_report(path: &Path) -> Result<Vec<ReportRecord>> {
    let raw = std::fs::read_to_string(path)?;
    let records: Vec<ReportRecord> = serde_json::from_str(&raw)?;
    info!(path = %path.display(), records = records.len(), "Loaded report");
    Ok(records)
}

/// Context-size labels in size order (`384k` before `1M`), anything else naturally.
pub fn context_order(a: &str, b: &str) -> Ordering {
    let rank = |label: &str| {
        ContextCategory::all()
            .iter()
            .flat_map(|c| c.sizes())
            .position(|&(_, l)| l == label)
    };
    match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => natural_cmp(a, b),
    }
}

/// Relative change from `base` to `new` in percent; 0 when `base` is not positive.
pub fn percent_change(base: f64, new: f64) -> f64 {
    if base > 0.0 {
        (new - base) / base * 100.0
    } else {
        0.0
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Means over the successful records of one context size.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextAverages {
    pub context: String,
    pub runs: usize,
    pub prompt_tokens: f64,
    pub prompt_speed: f64,
    pub completion_speed: f64,
    pub ttft: f64,
}

impl ContextAverages {
    fn from_records(context: &str, records: &[&ReportRecord]) -> Self {
        Self {
            context: context.to_string(),
            runs: records.len(),
            prompt_tokens: mean(records.iter().filter_map(|r| r.prompt_tokens).map(f64::from)),
            prompt_speed: mean(records.iter().filter_map(|r| r.prompt_speed)),
            completion_speed: mean(records.iter().filter_map(|r| r.completion_speed)),
            ttft: mean(records.iter().filter_map(|r| r.ttft)),
        }
    }
}

/// Peak GPU memory across the successful records that carry memory statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySummary {
    pub max_peak_mb: u64,
    pub avg_peak_mb: f64,
    pub tokens_per_mb: f64,
}

impl MemorySummary {
    pub fn from_records(records: &[ReportRecord]) -> Option<Self> {
        let peaks: Vec<(u64, Option<u32>)> = records
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.memory_stats.as_ref().map(|m| (m.max_memory_mb, r.prompt_tokens)))
            .collect();
        let max_peak_mb = peaks.iter().map(|(peak, _)| *peak).max()?;

        Some(Self {
            max_peak_mb,
            avg_peak_mb: mean(peaks.iter().map(|(peak, _)| *peak as f64)),
            tokens_per_mb: mean(
                peaks
                    .iter()
                    .filter(|(peak, _)| *peak > 0)
                    .filter_map(|(peak, tokens)| tokens.map(|t| t as f64 / *peak as f64)),
            ),
        })
    }
}

/// One labelled group of report records.
#[derive(Debug, Clone)]
pub struct ReportSet {
    pub name: String,
    pub records: Vec<ReportRecord>,
}

impl ReportSet {
    pub fn new(name: impl Into<String>, records: Vec<ReportRecord>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    pub fn load(name: impl Into<String>, paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut records = Vec::new();
        for path in paths {
            records.extend(load_report(path.as_ref())?);
        }
        Ok(Self::new(name, records))
    }

    fn by_context(&self) -> BTreeMap<&str, Vec<&ReportRecord>> {
        let mut groups: BTreeMap<&str, Vec<&ReportRecord>> = BTreeMap::new();
        for record in self.records.iter().filter(|r| r.success) {
            groups.entry(record.context_label.as_str()).or_default().push(record);
        }
        groups
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextComparison {
    pub baseline: ContextAverages,
    pub candidate: ContextAverages,
}

impl ContextComparison {
    pub fn context(&self) -> &str {
        &self.baseline.context
    }

    pub fn prompt_speed_change(&self) -> f64 {
        percent_change(self.baseline.prompt_speed, self.candidate.prompt_speed)
    }

    pub fn completion_speed_change(&self) -> f64 {
        percent_change(self.baseline.completion_speed, self.candidate.completion_speed)
    }

    /// Positive when the candidate reaches the first token sooner.
    pub fn ttft_change(&self) -> f64 {
        if self.baseline.ttft > 0.0 {
            (self.baseline.ttft - self.candidate.ttft) / self.baseline.ttft * 100.0
        } else {
            0.0
        }
    }
}

/// Everything printed by `tokenburn compare`.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub baseline_name: String,
    pub candidate_name: String,
    pub common: Vec<ContextComparison>,
    pub baseline_only: Vec<ContextAverages>,
    pub candidate_only: Vec<ContextAverages>,
    pub baseline_memory: Option<MemorySummary>,
    pub candidate_memory: Option<MemorySummary>,
}

impl Comparison {
    pub fn new(baseline: &ReportSet, candidate: &ReportSet) -> Self {
        let base_groups = baseline.by_context();
        let cand_groups = candidate.by_context();

        let mut common = Vec::new();
        let mut baseline_only = Vec::new();
        for (context, records) in &base_groups {
            let averages = ContextAverages::from_records(context, records);
            match cand_groups.get(context) {
                Some(other) => common.push(ContextComparison {
                    baseline: averages,
                    candidate: ContextAverages::from_records(context, other),
                }),
                None => baseline_only.push(averages),
            }
        }
        let mut candidate_only: Vec<ContextAverages> = cand_groups
            .iter()
            .filter(|(context, _)| !base_groups.contains_key(*context))
            .map(|(context, records)| ContextAverages::from_records(context, records))
            .collect();

        common.sort_by(|a, b| context_order(a.context(), b.context()));
        baseline_only.sort_by(|a, b| context_order(&a.context, &b.context));
        candidate_only.sort_by(|a, b| context_order(&a.context, &b.context));

        Self {
            baseline_name: baseline.name.clone(),
            candidate_name: candidate.name.clone(),
            common,
            baseline_only,
            candidate_only,
            baseline_memory: MemorySummary::from_records(&baseline.records),
            candidate_memory: MemorySummary::from_records(&candidate.records),
        }
    }

    /// Plain-text tables for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "-".repeat(RULE_WIDTH);

        let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
        let _ = writeln!(
            out,
            "PERFORMANCE COMPARISON: {} vs {}",
            self.baseline_name, self.candidate_name
        );
        let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));

        if self.common.is_empty() {
            let _ = writeln!(out, "\nNo context size succeeded in both sets.");
        } else {
            let _ = writeln!(
                out,
                "{:<10} {:<20} {:<15} {:<15} {:<15}",
                "Context", "Metric", self.baseline_name, self.candidate_name, "Change"
            );
            let _ = writeln!(out, "{}", rule);
            for c in &self.common {
                let (base, cand) = (&c.baseline, &c.candidate);
                let rows = [
                    (c.context(), "Prompt Speed (t/s)", base.prompt_speed, cand.prompt_speed, c.prompt_speed_change()),
                    ("", "Generation (t/s)", base.completion_speed, cand.completion_speed, c.completion_speed_change()),
                    ("", "TTFT (seconds)", base.ttft, cand.ttft, c.ttft_change()),
                ];
                for (context, metric, base, cand, change) in rows {
                    let _ = writeln!(
                        out,
                        "{:<10} {:<20} {:<15.2} {:<15.2} {:+14.1}%",
                        context, metric, base, cand, change
                    );
                }
                let _ = writeln!(out, "{}", rule);
            }
        }

        for (name, only) in [
            (&self.baseline_name, &self.baseline_only),
            (&self.candidate_name, &self.candidate_only),
        ] {
            if only.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\nCONTEXT SIZES ONLY REACHED BY {}", name);
            let _ = writeln!(out, "{}", rule);
            let _ = writeln!(
                out,
                "{:<10} {:<15} {:<15} {:<15}",
                "Context", "Prompt Tokens", "PP Speed", "TG Speed"
            );
            for a in only {
                let _ = writeln!(
                    out,
                    "{:<10} {:<15.0} {:<15.2} {:<15.2}",
                    a.context, a.prompt_tokens, a.prompt_speed, a.completion_speed
                );
            }
        }

        let _ = writeln!(out, "\nMEMORY USAGE");
        let _ = writeln!(out, "{}", rule);
        for (name, memory) in [
            (&self.baseline_name, &self.baseline_memory),
            (&self.candidate_name, &self.candidate_memory),
        ] {
            match memory {
                Some(m) => {
                    let _ = writeln!(out, "{}:", name);
                    let _ = writeln!(out, "  Max memory used: {} MB", m.max_peak_mb);
                    let _ = writeln!(out, "  Avg memory used: {:.0} MB", m.avg_peak_mb);
                    let _ = writeln!(out, "  Memory efficiency: {:.2} tokens/MB", m.tokens_per_mb);
                }
                None => {
                    let _ = writeln!(out, "{}: no memory statistics", name);
                }
            }
        }

        out
    }
}
