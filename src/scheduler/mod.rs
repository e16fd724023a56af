//! Cache-affinity scheduling.
//!
//! A worker prefers jobs whose parameters it has already paid for: model
//! weights on disk, datasets in the page cache, compiled kernels. The
//! [`affinity`] module tracks what a worker has seen; [`selector`] scans
//! the backlog, drops items with unmet dependencies, scores the rest and
//! picks a winner.

pub mod affinity;
pub mod selector;

pub use affinity::WorkerCache;
pub use selector::{select, try_claim, Candidate};
