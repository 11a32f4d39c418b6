//! CPU/RAM telemetry for pool sizing and cooperative throttling.

use std::time::{Duration, Instant};
use sysinfo::System;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;

const MB: u64 = 1024 * 1024;

/// Worker count for this run.
///
/// `min(cpus - cpu_reserve, (available - system_reserve) / per_worker, max_workers)`,
/// never below 1. A fixed `workers` setting wins over the computation.
pub fn compute_pool_size(cpus: usize, available_bytes: u64, config: &IngestConfig) -> usize {
    if let Some(fixed) = config.workers {
        return fixed.max(1);
    }
    let by_cpu = cpus.saturating_sub(config.cpu_reserve);
    let usable = available_bytes.saturating_sub(config.system_reserve_mb * MB);
    let per_worker = (config.per_worker_ram_mb * MB).max(1);
    let by_ram = (usable / per_worker) as usize;
    by_cpu.min(by_ram).min(config.max_workers).max(1)
}

pub struct ResourceMonitor {
    system: System,
    high_water: f32,
    pause: Duration,
    max_throttle: Duration,
}

impl ResourceMonitor {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            system: System::new(),
            high_water: config.ram_high_water,
            pause: Duration::from_millis(config.throttle_pause_ms),
            max_throttle: Duration::from_secs(config.max_throttle_secs),
        }
    }

    /// Pool size from live telemetry.
    pub fn pool_size(&mut self, config: &IngestConfig) -> usize {
        self.system.refresh_memory();
        let size = compute_pool_size(num_cpus::get(), self.system.available_memory(), config);
        tracing::info!(
            workers = size,
            cpus = num_cpus::get(),
            available_mb = self.system.available_memory() / MB,
            "worker pool sized"
        );
        size
    }

    /// Fraction of total RAM in use.
    pub fn ram_usage(&mut self) -> f32 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(self.system.available_memory());
        used as f32 / total as f32
    }

    /// Sleep while RAM usage is above the high-water mark, up to the
    /// configured maximum. Returns how long it waited.
    pub async fn throttle(&mut self, cancel: &CancellationToken) -> Duration {
        let started = Instant::now();
        let mut warned = false;
        while self.ram_usage() > self.high_water {
            if started.elapsed() >= self.max_throttle || cancel.is_cancelled() {
                break;
            }
            if !warned {
                tracing::warn!(
                    high_water = self.high_water,
                    "RAM above high-water mark, throttling"
                );
                warned = true;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.pause) => {}
                _ = cancel.cancelled() => break,
            }
        }
        started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * MB;

    fn config() -> IngestConfig {
        IngestConfig {
            cpu_reserve: 2,
            per_worker_ram_mb: 2048,
            system_reserve_mb: 4096,
            max_workers: 8,
            ..IngestConfig::default()
        }
    }

    #[test]
    fn test_cpu_bound() {
        assert_eq!(compute_pool_size(4, 64 * GB, &config()), 2);
    }

    #[test]
    fn test_ram_bound() {
        // (12 - 4) / 2 = 4 workers
        assert_eq!(compute_pool_size(32, 12 * GB, &config()), 4);
    }

    #[test]
    fn test_hard_cap() {
        assert_eq!(compute_pool_size(64, 512 * GB, &config()), 8);
    }

    #[test]
    fn test_never_below_one() {
        assert_eq!(compute_pool_size(1, GB, &config()), 1);
    }

    #[test]
    fn test_fixed_override() {
        let cfg = IngestConfig {
            workers: Some(3),
            ..config()
        };
        assert_eq!(compute_pool_size(1, 0, &cfg), 3);
    }

    #[tokio::test]
    async fn test_throttle_returns_when_cancelled() {
        let cfg = IngestConfig {
            ram_high_water: 0.0,
            ..config()
        };
        let mut monitor = ResourceMonitor::new(&cfg);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let waited = monitor.throttle(&cancel).await;
        assert!(waited < Duration::from_secs(1));
    }
}
