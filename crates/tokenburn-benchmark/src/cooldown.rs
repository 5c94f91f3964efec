use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownOutcome {
    Completed,
    Interrupted,
}

/// Fixed idle period between measured requests.
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    duration: Duration,
}

impl Cooldown {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_disabled(&self) -> bool {
        self.duration.is_zero()
    }

    /// Sleep for the configured duration unless `interrupt` fires first.
    pub async fn wait(&self, interrupt: &CancellationToken) -> CooldownOutcome {
        if self.is_disabled() {
            return CooldownOutcome::Completed;
        }
        tokio::select! {
            _ = interrupt.cancelled() => CooldownOutcome::Interrupted,
            _ = tokio::time::sleep(self.duration) => CooldownOutcome::Completed,
        }
    }
}
