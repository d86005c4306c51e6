//! Phases a service passes through, and the per-service report.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use cutover_core::DeploymentResult;

/// Current phase of a service deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Enumerating the instances that currently serve the service.
    Discover,
    /// Launching the new instance.
    Start,
    /// Waiting for the health check (or raw running status).
    AwaitReady,
    /// Moving traffic onto the new instance.
    Cutover,
    /// Gracefully stopping old instances.
    Drain,
    /// Removing superseded instances beyond the retention count.
    Reconcile,
    /// Handed to the backend's own deploy operation.
    Delegated,
    Done,
    /// Failed after start; the new instance was force-stopped.
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discover => "discover",
            Self::Start => "start",
            Self::AwaitReady => "await_ready",
            Self::Cutover => "cutover",
            Self::Drain => "drain",
            Self::Reconcile => "reconcile",
            Self::Delegated => "delegated",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Ordered record of the phases one service went through.
#[derive(Debug, Clone, Default)]
pub struct PhaseLog {
    phases: Vec<Phase>,
}

impl PhaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, phase: Phase) {
        debug!(%phase, "entering phase");
        self.phases.push(phase);
    }

    pub fn into_vec(self) -> Vec<Phase> {
        self.phases
    }
}

/// What a strategy produced for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub result: DeploymentResult,
    pub phases: Vec<Phase>,
    /// Superseded instances deleted during reconcile.
    pub removed: Vec<String>,
}

impl ServiceReport {
    /// Phases joined for a log line, e.g. `discover>start>done`.
    pub fn phase_trail(&self) -> String {
        self.phases
            .iter()
            .map(Phase::to_string)
            .collect::<Vec<_>>()
            .join(">")
    }
}
