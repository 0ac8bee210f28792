//! Pipeline domain types

use serde::{Deserialize, Serialize};

/// One of the two sequential remote jobs in a session's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Build,
    Deploy,
}

impl Stage {
    /// Value of the `pipeline` label attached to executions of this stage
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Build => "builder",
            Stage::Deploy => "deployer",
        }
    }

    pub fn triggered(&self) -> PipelineState {
        match self {
            Stage::Build => PipelineState::BuildTriggered,
            Stage::Deploy => PipelineState::DeployTriggered,
        }
    }

    pub fn running(&self) -> PipelineState {
        match self {
            Stage::Build => PipelineState::BuildRunning,
            Stage::Deploy => PipelineState::DeployRunning,
        }
    }

    pub fn succeeded(&self) -> PipelineState {
        match self {
            Stage::Build => PipelineState::BuildSucceeded,
            Stage::Deploy => PipelineState::DeploySucceeded,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Build => write!(f, "build"),
            Stage::Deploy => write!(f, "deploy"),
        }
    }
}

/// Where a session's pipeline currently stands
///
/// Transitions advance one step at a time along the happy path.
/// `DeploySucceeded` and `Failed` are terminal; `Failed` is reachable from
/// every non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum PipelineState {
    Received,
    PayloadPersisted,
    BuildTriggered,
    BuildRunning,
    BuildSucceeded,
    DeployTriggered,
    DeployRunning,
    DeploySucceeded,
    Failed(String),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::DeploySucceeded | PipelineState::Failed(_))
    }

    /// Position along the happy path; `None` for `Failed`
    fn rank(&self) -> Option<u8> {
        let rank = match self {
            PipelineState::Received => 0,
            PipelineState::PayloadPersisted => 1,
            PipelineState::BuildTriggered => 2,
            PipelineState::BuildRunning => 3,
            PipelineState::BuildSucceeded => 4,
            PipelineState::DeployTriggered => 5,
            PipelineState::DeployRunning => 6,
            PipelineState::DeploySucceeded => 7,
            PipelineState::Failed(_) => return None,
        };
        Some(rank)
    }

    /// Checks whether moving to `next` respects the state machine
    ///
    /// Only the immediate successor or `Failed` qualify. Resuming from a
    /// checkpoint adopts its state directly instead of transitioning.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next == current + 1,
            (None, Some(_)) => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Failed(reason) => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}
