// SPDX-License-Identifier: Apache-2.0

//! System configuration for the engine: how big the per-packet metadata
//! region is, which workers exist and where they're pinned, and the
//! defaults new `RateLimit` traffic classes are built with.
//!
//! This is distinct from pipeline configuration -- the set of modules, how
//! they're wired together, and each module's own settings -- which is
//! provided by the control-plane surface that builds a
//! [`pflow_graph::Pipeline`] directly and is out of scope here.

mod error;

pub use error::Error;

use serde::{Deserialize, Serialize};

/// One worker thread: a stable id used as its scheduler's `worker_id`, and
/// the NUMA node it's pinned to for [`pflow_sched::validate_worker_placement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: u8,
    pub numa_node: u8,
}

impl WorkerConfig {
    #[must_use]
    pub fn new(id: u8, numa_node: u8) -> Self {
        WorkerConfig { id, numa_node }
    }
}

/// Defaults a `RateLimit` traffic class is constructed with when the
/// control plane doesn't specify its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    pub refill_rate: u64,
    pub max_burst: u64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        RateLimitDefaults {
            refill_rate: 0,
            max_burst: 32,
        }
    }
}

/// Top-level engine configuration: the metadata region size, the worker
/// pool, and scheduler defaults.
///
/// Building this value never touches disk; reading it from a file or RPC
/// payload is the control plane's job, not this crate's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size, in bytes, of the per-packet metadata scratch region. Must be a
    /// power of two; see `pflow_metadata::offset::DEFAULT_TOTAL_SIZE`.
    pub metadata_region_bytes: u16,
    pub workers: Vec<WorkerConfig>,
    pub rate_limit_defaults: RateLimitDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            metadata_region_bytes: pflow_metadata::DEFAULT_TOTAL_SIZE,
            workers: vec![WorkerConfig::new(0, 0)],
            rate_limit_defaults: RateLimitDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Builds a single-worker configuration pinned to NUMA node 0, with the
    /// default metadata region size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the worker pool.
    #[must_use]
    pub fn with_workers(mut self, workers: Vec<WorkerConfig>) -> Self {
        self.workers = workers;
        self
    }

    /// Checks internal consistency: the metadata region size is a power of
    /// two, worker ids are unique, and the worker count fits under
    /// [`pflow_sched::MAX_WORKERS`].
    pub fn validate(&self) -> Result<(), Error> {
        if !self.metadata_region_bytes.is_power_of_two() {
            return Err(Error::RegionSizeNotPowerOfTwo(self.metadata_region_bytes));
        }
        if self.workers.len() > pflow_sched::MAX_WORKERS as usize {
            return Err(Error::TooManyWorkers(self.workers.len(), pflow_sched::MAX_WORKERS));
        }
        let mut seen = std::collections::HashSet::new();
        for w in &self.workers {
            if !seen.insert(w.id) {
                return Err(Error::DuplicateWorkerId(w.id));
            }
        }
        Ok(())
    }

    /// The NUMA node each worker id is pinned to, for
    /// [`pflow_sched::validate_worker_placement`].
    #[must_use]
    pub fn worker_numa_map(&self) -> std::collections::HashMap<u8, u8> {
        self.workers.iter().map(|w| (w.id, w.numa_node)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn non_power_of_two_region_is_rejected() {
        let cfg = EngineConfig {
            metadata_region_bytes: 200,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(Error::RegionSizeNotPowerOfTwo(200)));
    }

    #[test]
    fn duplicate_worker_ids_are_rejected() {
        let cfg = EngineConfig::default().with_workers(vec![WorkerConfig::new(0, 0), WorkerConfig::new(0, 1)]);
        assert_eq!(cfg.validate(), Err(Error::DuplicateWorkerId(0)));
    }

    #[test]
    fn worker_numa_map_reflects_pinning() {
        let cfg = EngineConfig::default().with_workers(vec![WorkerConfig::new(0, 0), WorkerConfig::new(1, 1)]);
        let map = cfg.worker_numa_map();
        assert_eq!(map.get(&0), Some(&0));
        assert_eq!(map.get(&1), Some(&1));
    }
}
