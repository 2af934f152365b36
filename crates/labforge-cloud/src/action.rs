//! Outcome types for provisioning stages

use crate::engine::Stage;
use serde::{Deserialize, Serialize};

/// What a stage did to reach its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Already satisfied, nothing changed
    NoOp,
    /// Recorded a value that already existed at the provider
    Adopt,
    /// Brought live rules or node configuration in line
    Converge,
    /// Created a new resource
    Create,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::NoOp => write!(f, "no-op"),
            ActionType::Adopt => write!(f, "adopt"),
            ActionType::Converge => write!(f, "converge"),
            ActionType::Create => write!(f, "create"),
        }
    }
}

/// Result of one successful stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,

    pub action: ActionType,

    /// Identifier the stage produced (or confirmed)
    pub resource_id: String,

    /// Description of the outcome
    pub description: String,
}

impl StageOutcome {
    pub fn new(
        stage: Stage,
        action: ActionType,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            action,
            resource_id: resource_id.into(),
            description: description.into(),
        }
    }

    pub fn changed(&self) -> bool {
        self.action != ActionType::NoOp
    }
}

/// Result of running a range of stages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Completed stages, in order
    pub outcomes: Vec<StageOutcome>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: StageOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    fn count(&self, action: ActionType) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    /// Summary of the run
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            create: self.count(ActionType::Create),
            adopt: self.count(ActionType::Adopt),
            converge: self.count(ActionType::Converge),
            no_change: self.count(ActionType::NoOp),
        }
    }
}

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub create: usize,
    pub adopt: usize,
    pub converge: usize,
    pub no_change: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} adopted, {} converged, {} unchanged",
            self.create, self.adopt, self.converge, self.no_change
        )
    }
}
