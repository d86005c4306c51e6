//! cutover-rollout — deployment strategies.
//!
//! A strategy takes one service from its current instances to a new one
//! running the target image. The orchestrator picks the strategy per run
//! and calls [`Strategy::deploy_all`] with the environment's services in
//! declaration order.
//!
//! # Components
//!
//! - **`strategy`** — the `Strategy` trait and `build_strategy`
//! - **`zero_downtime`** — start, verify, switch traffic, then drain the old
//! - **`basic`** — stop everything, then start the new version
//! - **`legacy`** — pass-through to the backend's own deploy operation
//! - **`steps`** — discover, start, await-ready, cutover, drain, reconcile, abort
//! - **`context`** — per-run collaborators and limits
//! - **`phase`** — phase tracking and the per-service report

pub mod basic;
pub mod context;
pub mod error;
pub mod legacy;
pub mod phase;
pub mod steps;
pub mod strategy;
pub mod zero_downtime;

pub use basic::Basic;
pub use context::{DeployContext, DeployMode};
pub use error::{DeploymentError, RolloutResult};
pub use legacy::Legacy;
pub use phase::{Phase, PhaseLog, ServiceReport};
pub use strategy::{build_strategy, Strategy};
pub use zero_downtime::ZeroDowntime;
