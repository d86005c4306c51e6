//! cutover-deployer — the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! Deployer::deploy(env, image)
//!   │
//!   ├─ DeployConfig ──► ProviderFactory ──► WorkloadPort + TrafficCutover
//!   │
//!   ├─ Ledger: started
//!   ├─ Strategy::deploy_all(services in declaration order)
//!   └─ Ledger: success | failed
//! ```
//!
//! Runs against the same environment are serialized behind a per-environment
//! lock. Configuration problems surface before anything is recorded.

pub mod deployer;
pub mod error;
pub mod providers;

pub use deployer::{DeployReport, Deployer, EnvironmentStatus};
pub use error::{DeployerError, DeployerResult};
pub use providers::{ConfiguredProviders, ProviderFactory, Providers};
