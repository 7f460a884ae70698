// SPDX-License-Identifier: Apache-2.0

//! The binary's top-level error type, wrapping each library crate's own.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] pflow_config::Error),

    #[error(transparent)]
    Graph(#[from] pflow_graph::Error),

    #[error(transparent)]
    Sched(#[from] pflow_sched::Error),
}
