use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokenburn_benchmark::ResourceMonitor;
use tokenburn_core::MemoryStats;
use tracing::debug;

use crate::gpu_monitor::GpuMonitor;

/// Samples GPU memory on a background thread while one request is in flight.
pub struct MemorySampler {
    monitor: GpuMonitor,
    interval: Duration,
    active: Option<ActiveSampling>,
}

struct ActiveSampling {
    running: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<u64>>>,
    handle: JoinHandle<()>,
}

impl MemorySampler {
    pub fn new(monitor: GpuMonitor, interval: Duration) -> Self {
        Self {
            monitor,
            interval,
            active: None,
        }
    }
}

impl ResourceMonitor for MemorySampler {
    fn begin(&mut self) {
        if let Some(previous) = self.active.take() {
            stop(previous);
        }

        let running = Arc::new(AtomicBool::new(true));
        let samples = Arc::new(Mutex::new(Vec::new()));
        let monitor = self.monitor.clone();
        let interval = self.interval;
        let alive = running.clone();
        let sink = samples.clone();

        let handle = thread::spawn(move || {
            while alive.load(Ordering::Relaxed) {
                match monitor.memory_used_mb() {
                    Ok(used) => {
                        if let Ok(mut guard) = sink.lock() {
                            guard.push(used);
                        }
                    }
                    Err(e) => debug!("Memory sample failed: {}", e),
                }
                thread::sleep(interval);
            }
        });

        self.active = Some(ActiveSampling {
            running,
            samples,
            handle,
        });
    }

    fn end(&mut self) -> Option<MemoryStats> {
        let samples = stop(self.active.take()?);
        MemoryStats::from_samples(&samples)
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            stop(active);
        }
    }
}

fn stop(active: ActiveSampling) -> Vec<u64> {
    active.running.store(false, Ordering::Relaxed);
    let _ = active.handle.join();
    active
        .samples
        .lock()
        .map(|mut guard| std::mem::take(&mut *guard))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_samples_without_gpu() {
        let monitor = GpuMonitor::new("tokenburn-no-such-smi", Duration::from_millis(5));
        let mut sampler = MemorySampler::new(monitor, Duration::from_millis(5));
        sampler.begin();
        thread::sleep(Duration::from_millis(20));
        assert!(sampler.end().is_none());
        assert!(sampler.end().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_collects_samples_from_command() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-smi");
        std::fs::write(&script, "#!/bin/sh\necho 2048\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let monitor = GpuMonitor::new(script.to_string_lossy(), Duration::from_millis(5));
        let mut sampler = MemorySampler::new(monitor, Duration::from_millis(5));
        sampler.begin();
        thread::sleep(Duration::from_millis(60));
        let stats = sampler.end().unwrap();
        assert_eq!(stats.max_memory_mb, 2048);
        assert_eq!(stats.avg_memory_mb, 2048.0);
        assert!(stats.samples >= 1);
    }
}
