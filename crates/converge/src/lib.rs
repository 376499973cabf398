//! Gantry converge: polling-based verification that cluster state reached a target.
//!
//! [`poll_until`] is the generic loop; [`readiness`] and [`absence`] provide the
//! two domain predicates and ready-made waits built on it.

#![forbid(unsafe_code)]

pub mod absence;
pub mod poller;
pub mod readiness;

pub use absence::{resources_gone, wait_for_removal, ErrorPolicy};
pub use poller::{poll_until, ConvergenceResult, PollConfig, PollFailure};
pub use readiness::{deployments_ready, expected_deployments, wait_for_deployments};
