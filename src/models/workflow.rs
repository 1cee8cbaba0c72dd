// Workflow Step Model
// Step-based partial-failure reporting for multi-stage backend workflows

use serde::{Deserialize, Serialize};

/// One named sub-operation of a backend workflow with its own outcome,
/// so "stream created, multiview update failed" is distinguishable from
/// "stream creation failed outright".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkflowStep {
    pub fn ok(step: &str) -> Self {
        Self {
            step: step.to_string(),
            success: true,
            message: None,
        }
    }

    pub fn failed(step: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            success: false,
            message: Some(message.into()),
        }
    }

    /// The catch-all step used when an error carries no structure at all
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::failed("unexpected", message)
    }
}

/// Aggregate outcome of a multi-step workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub success: bool,
    pub steps: Vec<WorkflowStep>,
}

impl StepReport {
    pub fn from_steps(steps: Vec<WorkflowStep>) -> Self {
        Self {
            success: steps.iter().all(|s| s.success),
            steps,
        }
    }

    /// Whether a specific step succeeded somewhere in the report
    pub fn step_succeeded(&self, step: &str) -> bool {
        self.steps.iter().any(|s| s.step == step && s.success)
    }
}

/// A provisioned backend stream: one per pipeline for a logical source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPair {
    pub source_id: String,
    pub stream_uuid: String,
}

/// Result of provisioning a source across all pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddStreamResult {
    pub success: bool,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub streams: Vec<StreamPair>,
}

/// Outcome of tearing down a source's streams. Makes the partial-success
/// rule explicit: the local source reference may only be dropped once the
/// stream is confirmed gone (`Complete` or `Degraded`).
#[derive(Debug, Clone, PartialEq)]
pub enum TeardownOutcome {
    /// Streams deleted and, where needed, multiviews updated
    Complete(Vec<WorkflowStep>),
    /// Streams deleted but a follow-up step failed; the backend may show
    /// a stale multiview tile until the operator re-syncs
    Degraded(Vec<WorkflowStep>),
    /// Stream deletion itself was not acknowledged
    Failed(Vec<WorkflowStep>),
}

impl TeardownOutcome {
    /// Whether the backend confirmed the streams were released
    pub fn stream_released(&self) -> bool {
        matches!(self, TeardownOutcome::Complete(_) | TeardownOutcome::Degraded(_))
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        match self {
            TeardownOutcome::Complete(steps)
            | TeardownOutcome::Degraded(steps)
            | TeardownOutcome::Failed(steps) => steps,
        }
    }

    pub fn into_steps(self) -> Vec<WorkflowStep> {
        match self {
            TeardownOutcome::Complete(steps)
            | TeardownOutcome::Degraded(steps)
            | TeardownOutcome::Failed(steps) => steps,
        }
    }
}
