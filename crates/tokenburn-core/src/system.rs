//! System-level types for hardware monitoring

use serde::{Deserialize, Serialize};

/// Snapshot of one GPU as reported by the telemetry command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub name: String,
    pub temperature_c: u32,
    pub fan_speed_percent: u32,
    pub power_draw_watts: f64,
    pub power_limit_watts: f64,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub gpu_utilization_percent: u32,
    pub memory_utilization_percent: u32,
    pub clock_graphics_mhz: u32,
    pub clock_memory_mhz: u32,
    pub clock_sm_mhz: u32,
    pub driver_version: String,
    pub connected: bool,
}

impl Default for GpuMetrics {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            temperature_c: 0,
            fan_speed_percent: 0,
            power_draw_watts: 0.0,
            power_limit_watts: 0.0,
            memory_used_mb: 0,
            memory_total_mb: 0,
            gpu_utilization_percent: 0,
            memory_utilization_percent: 0,
            clock_graphics_mhz: 0,
            clock_memory_mhz: 0,
            clock_sm_mhz: 0,
            driver_version: "Unknown".to_string(),
            connected: false,
        }
    }
}

impl GpuMetrics {
    pub fn memory_used_percent(&self) -> f64 {
        if self.memory_total_mb == 0 {
            return 0.0;
        }
        self.memory_used_mb as f64 / self.memory_total_mb as f64 * 100.0
    }
}

/// GPU memory observed while a single request was in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub max_memory_mb: u64,
    pub avg_memory_mb: f64,
    pub samples: usize,
}

impl MemoryStats {
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        let max = *samples.iter().max()?;
        let avg = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
        Some(Self {
            max_memory_mb: max,
            avg_memory_mb: avg,
            samples: samples.len(),
        })
    }
}
