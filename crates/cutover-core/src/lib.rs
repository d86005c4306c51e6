//! cutover-core — shared vocabulary of the cutover deployment orchestrator.
//!
//! Holds the data model (service specs, instance records, per-service
//! results), the [`WorkloadPort`] contract every compute backend
//! implements, the TOML configuration loader, and the clock/cancellation
//! primitives used by every blocking poll in the system.
//!
//! # Components
//!
//! - **`types`** — ServiceSpec, HealthCheckSpec, InstanceRecord, DeploymentResult
//! - **`workload`** — the Workload Port trait and its request/response types
//! - **`config`** — `cutover.toml` parsing and normalization
//! - **`clock`** — `Clock` trait, `ManualClock`, and `CancelSignal`

pub mod clock;
pub mod config;
pub mod error;
pub mod types;
pub mod workload;

pub use clock::{cancel_pair, CancelHandle, CancelSignal, Clock, Interrupted, ManualClock, SystemClock};
pub use config::{DeployConfig, EnvironmentConfig, HeaderExpectation, ProxyConfig};
pub use error::{ConfigError, ConfigResult, WorkloadError, WorkloadResult};
pub use types::*;
pub use workload::{ExecOutput, LaunchSpec, RuntimeHealth, ServiceStatus, WorkloadPort};
