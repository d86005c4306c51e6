//! cutover-health — readiness checks for newly started instances.
//!
//! The checker is a pure probe: one call, one verdict, no sleeping and no
//! state carried between calls. Retrying belongs to the caller, which
//! drives a [`RetryPolicy`] over a [`Clock`](cutover_core::Clock).
//!
//! # Architecture
//!
//! ```text
//! Strategy (AwaitReady)
//!   └── RetryPolicy::poll(clock, cancel, ..)
//!         └── HealthChecker::check(instance, spec) → ProbeResult
//!               ├── http     → GET http://{address}:{port}{path}
//!               ├── command  → WorkloadPort::exec_in_instance
//!               └── docker   → WorkloadPort::instance_health
//! ```

pub mod checker;
pub mod policy;

pub use checker::{http_probe, HealthChecker, ProbeResult};
pub use policy::{PollOutcome, RetryPolicy};
