// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("metadata region size {0} is not a power of two")]
    RegionSizeNotPowerOfTwo(u16),

    #[error("worker id {0} is duplicated in the engine configuration")]
    DuplicateWorkerId(u8),

    #[error("worker count {0} exceeds pflow_sched::MAX_WORKERS ({1})")]
    TooManyWorkers(usize, u8),
}
