//! Adaptive streaming threshold.
//!
//! Streaming sources size their artifact buffers from this governor instead
//! of a fixed constant: plenty of memory headroom means large buffers, an
//! almost-full process means the floor. Reads are cheap (shared lock, cached
//! value); recomputation happens at most once per update interval.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use aethonx_common::mem;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_memory_bytes: u64,
    pub min_threshold: usize,
    pub max_threshold: usize,
    pub avg_artifact_kb: u64,
    pub update_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 512 * 1024 * 1024,
            min_threshold: 100,
            max_threshold: 10_000,
            avg_artifact_kb: 2,
            update_interval: Duration::from_secs(5),
        }
    }
}

struct State {
    threshold: usize,
    last_update: Instant,
    /// Fallback accounting for platforms without a resident-size probe.
    estimated_bytes: u64,
}

pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    state: RwLock<State>,
}

impl AdaptiveThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let initial = config.max_threshold;
        Self {
            config,
            state: RwLock::new(State {
                threshold: initial,
                last_update: Instant::now(),
                estimated_bytes: 0,
            }),
        }
    }

    /// Current artifact-buffer threshold. Cached between update intervals.
    pub fn threshold(&self) -> usize {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if state.last_update.elapsed() <= self.config.update_interval {
                return state.threshold;
            }
        }
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // Another writer may have refreshed while we waited for the lock.
        if state.last_update.elapsed() <= self.config.update_interval {
            return state.threshold;
        }
        let allocated = mem::resident_bytes().unwrap_or(state.estimated_bytes);
        state.threshold = self.compute(allocated);
        state.last_update = Instant::now();
        state.threshold
    }

    /// Feed the fallback estimate on platforms without a memory probe.
    pub fn record(&self, artifact_count: usize) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.estimated_bytes +=
            artifact_count as u64 * self.config.avg_artifact_kb * 1024;
    }

    /// Above 80% memory use the floor applies; otherwise half the remaining
    /// headroom measured in artifacts, clamped to the configured range.
    fn compute(&self, allocated: u64) -> usize {
        let max = self.config.max_memory_bytes.max(1);
        if allocated as f64 / max as f64 > 0.8 {
            return self.config.min_threshold;
        }
        let headroom_kb = max.saturating_sub(allocated) / 1024;
        let artifacts = headroom_kb / self.config.avg_artifact_kb.max(1) / 2;
        (artifacts as usize).clamp(self.config.min_threshold, self.config.max_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            max_memory_bytes: 100 * 1024 * 1024,
            min_threshold: 10,
            max_threshold: 1000,
            avg_artifact_kb: 2,
            update_interval: Duration::from_millis(0),
        }
    }

    #[test]
    fn pressure_hits_the_floor() {
        let throttle = AdaptiveThrottle::new(config());
        assert_eq!(throttle.compute(90 * 1024 * 1024), 10);
    }

    #[test]
    fn headroom_is_clamped() {
        let throttle = AdaptiveThrottle::new(config());
        // Zero allocation: 100 MiB headroom → far above max, clamps down.
        assert_eq!(throttle.compute(0), 1000);
        // 99% of the way to the 80% knee, but below it: still computed.
        let mid = throttle.compute(60 * 1024 * 1024);
        assert!((10..=1000).contains(&mid));
    }

    #[test]
    fn cached_between_intervals() {
        let throttle = AdaptiveThrottle::new(ThrottleConfig {
            update_interval: Duration::from_secs(3600),
            ..config()
        });
        let first = throttle.threshold();
        throttle.record(1_000_000);
        assert_eq!(throttle.threshold(), first, "no recompute inside interval");
    }
}
