mod compare;
mod gpu_monitor;
mod live;
mod memory_sampler;
mod report;

pub use compare::{
    context_order, load_report, percent_change, Comparison, ContextAverages, ContextComparison, MemorySummary,
    ReportSet,
};
pub use gpu_monitor::{parse_gpu_csv, GpuMonitor, GpuMonitorError, GpuPoller};
pub use live::{
    command_for_key, status_line, terminal_text, KeyReader, LiveCommand, LivePhase, LiveRun, LiveState,
};
pub use memory_sampler::MemorySampler;
pub use report::{
    averages_line, format_elapsed, header_row, measurement_row, sanitize, separator_row, ConsoleReporter,
    JsonReport, ReportRecord, TableLog, TABLE_HEADERS,
};

// Re-export benchmark types for convenience
pub use tokenburn_benchmark::{BenchmarkEvent, BenchmarkRunner, Recorder, Recorders, RunControls};
