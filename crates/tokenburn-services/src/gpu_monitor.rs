use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokenburn_core::{GpuConfig, GpuMetrics};
use tracing::{debug, error, info, instrument, warn};

const QUERY_FIELDS: &str = "name,temperature.gpu,fan.speed,power.draw,power.limit,memory.used,\
memory.total,utilization.gpu,utilization.memory,clocks.current.graphics,clocks.current.memory,\
clocks.current.sm,driver_version";

#[derive(Error, Debug)]
pub enum GpuMonitorError {
    #[error("Failed to execute {command}: {source}")]
    ExecutionFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} not found - is the GPU driver installed?")]
    NotFound(String),
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("No GPU reported")]
    NoGpu,
}

/// Polls `nvidia-smi` (or a compatible command) for GPU telemetry.
#[derive(Debug, Clone)]
pub struct GpuMonitor {
    command: String,
    poll_interval: Duration,
}

impl GpuMonitor {
    pub fn new(command: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            command: command.into(),
            poll_interval,
        }
    }

    pub fn from_config(config: &GpuConfig) -> Self {
        Self::new(&config.smi_command, Duration::from_millis(config.poll_interval_ms))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn query(&self, args: &[&str]) -> Result<String, GpuMonitorError> {
        let output = Command::new(&self.command).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GpuMonitorError::NotFound(self.command.clone())
            } else {
                GpuMonitorError::ExecutionFailed {
                    command: self.command.clone(),
                    source: e,
                }
            }
        })?;

        if !output.status.success() {
            return Err(GpuMonitorError::CommandFailed {
                command: self.command.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Full telemetry snapshot of the first GPU.
    #[instrument(skip(self), fields(command = %self.command))]
    pub fn sample(&self) -> Result<GpuMetrics, GpuMonitorError> {
        debug!("Fetching GPU metrics");
        let query = format!("--query-gpu={}", QUERY_FIELDS);
        let stdout = self.query(&[&query, "--format=csv,noheader,nounits"])?;
        parse_gpu_csv(&stdout).ok_or(GpuMonitorError::NoGpu)
    }

    /// Memory currently used on the first GPU, in MiB.
    pub fn memory_used_mb(&self) -> Result<u64, GpuMonitorError> {
        let stdout = self.query(&["--query-gpu=memory.used", "--format=csv,noheader,nounits"])?;
        stdout
            .lines()
            .next()
            .map(parse_u64)
            .ok_or(GpuMonitorError::NoGpu)
    }

    /// Name and total memory, used to pick context categories.
    pub fn identify(&self) -> Option<(String, u64)> {
        match self.sample() {
            Ok(m) => Some((m.name, m.memory_total_mb)),
            Err(e) => {
                warn!("Could not query GPU: {}", e);
                None
            }
        }
    }

    /// Start a background thread that keeps a shared snapshot fresh.
    #[instrument(skip(self), fields(interval_ms = self.poll_interval.as_millis()))]
    pub fn spawn_poller(&self) -> GpuPoller {
        info!("Starting GPU poller");
        let snapshot = Arc::new(Mutex::new(GpuMetrics::default()));
        let running = Arc::new(AtomicBool::new(true));

        let monitor = self.clone();
        let shared = snapshot.clone();
        let alive = running.clone();

        let handle = thread::spawn(move || {
            let mut connected_logged = false;

            while alive.load(Ordering::Relaxed) {
                let metrics = match monitor.sample() {
                    Ok(metrics) => {
                        if !connected_logged {
                            info!(gpu = %metrics.name, "GPU monitor connected");
                            connected_logged = true;
                        }
                        metrics
                    }
                    Err(e) => {
                        if connected_logged {
                            warn!("GPU monitor disconnected: {}", e);
                            connected_logged = false;
                        }
                        GpuMetrics::default()
                    }
                };

                match shared.lock() {
                    Ok(mut guard) => *guard = metrics,
                    Err(_) => {
                        error!("GPU snapshot lock poisoned, stopping poller");
                        break;
                    }
                }

                thread::sleep(monitor.poll_interval);
            }
            debug!("GPU poller stopped");
        });

        GpuPoller {
            snapshot,
            running,
            handle: Some(handle),
        }
    }
}

impl Default for GpuMonitor {
    fn default() -> Self {
        Self::from_config(&GpuConfig::default())
    }
}

/// Handle to the background poller; stops the thread when dropped.
pub struct GpuPoller {
    snapshot: Arc<Mutex<GpuMetrics>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpuPoller {
    /// Latest metrics; the default "disconnected" value until the first poll lands.
    pub fn snapshot(&self) -> GpuMetrics {
        self.snapshot
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GpuPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse the first line of `--format=csv,noheader,nounits` output.
/// Unavailable fields (`[N/A]`, `[Not Supported]`, garbage) become 0 or "Unknown".
pub fn parse_gpu_csv(stdout: &str) -> Option<GpuMetrics> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or("");

    Some(GpuMetrics {
        name: parse_text(field(0)),
        temperature_c: parse_u64(field(1)) as u32,
        fan_speed_percent: parse_u64(field(2)) as u32,
        power_draw_watts: parse_f64(field(3)),
        power_limit_watts: parse_f64(field(4)),
        memory_used_mb: parse_u64(field(5)),
        memory_total_mb: parse_u64(field(6)),
        gpu_utilization_percent: parse_u64(field(7)) as u32,
        memory_utilization_percent: parse_u64(field(8)) as u32,
        clock_graphics_mhz: parse_u64(field(9)) as u32,
        clock_memory_mhz: parse_u64(field(10)) as u32,
        clock_sm_mhz: parse_u64(field(11)) as u32,
        driver_version: parse_text(field(12)),
        connected: true,
    })
}

fn parse_f64(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

fn parse_u64(raw: &str) -> u64 {
    parse_f64(raw).round() as u64
}

fn parse_text(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('[') {
        "Unknown".to_string()
    } else {
        raw.to_string()
    }
}
