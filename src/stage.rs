//! Hook stage machine
//!
//! Tracks where a run is and rejects out-of-order progress.
//!
//! ```text
//! NotStarted
//!     ↓
//! InitEnvironment
//!     ↓
//! PatchConfig
//!     ↓
//! RegisterLayers   (one step per layer)
//!     ↓
//! Prefetch         (optional, may be skipped)
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;
use strum::EnumIter;
use thiserror::Error;

/// Hook stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u8)]
pub enum HookStage {
    NotStarted = 0,
    /// Sourcing the environment-setup script against the build directory
    InitEnvironment = 1,
    /// Appending the settings block to local.conf
    PatchConfig = 2,
    /// Registering layers with bitbake-layers
    RegisterLayers = 3,
    /// Fetch-only bitbake run
    Prefetch = 4,
    Completed = 5,
    Failed = 255,
}

impl HookStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true for Completed and Failed
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true for stages a run may skip
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::Prefetch)
    }

    /// Returns the next stage in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::InitEnvironment),
            Self::InitEnvironment => Some(Self::PatchConfig),
            Self::PatchConfig => Some(Self::RegisterLayers),
            Self::RegisterLayers => Some(Self::Prefetch),
            Self::Prefetch => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::InitEnvironment => "Initializing build environment",
            Self::PatchConfig => "Configuring local.conf",
            Self::RegisterLayers => "Registering layers",
            Self::Prefetch => "Pre-fetching sources",
            Self::Completed => "Setup complete",
            Self::Failed => "Setup failed",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: HookStage, to: HookStage },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: HookStage, to: HookStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: HookStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: HookStage },

    #[error("Stage {stage} is not optional and cannot be skipped")]
    NotOptional { stage: HookStage },

    #[error("Expected to be at {expected}, but at {actual}")]
    WrongStage { expected: HookStage, actual: HookStage },
}

/// Owns the current stage of one hook run.
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: HookStage,
    failed_at: Option<HookStage>,
    /// Stages entered, in order
    history: Vec<HookStage>,
    skipped: Vec<HookStage>,
    layers_registered: usize,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: HookStage::NotStarted,
            failed_at: None,
            history: Vec::new(),
            skipped: Vec::new(),
            layers_registered: 0,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> HookStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<HookStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == HookStage::Completed
    }

    pub fn history(&self) -> &[HookStage] {
        &self.history
    }

    pub fn skipped(&self) -> &[HookStage] {
        &self.skipped
    }

    /// Number of successful layer registrations this run
    pub fn layers_registered(&self) -> usize {
        self.layers_registered
    }

    /// Advance to the next stage in sequence.
    pub fn advance(&mut self) -> Result<HookStage, StageTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(StageTransitionError::FromTerminalState { from: self.current })?;
        self.enter(next);
        Ok(next)
    }

    /// Transition to `target`, which must be the immediate next stage.
    pub fn transition_to(&mut self, target: HookStage) -> Result<HookStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        if target != HookStage::Failed && target.order() < self.current.order() {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        self.enter(target);
        Ok(target)
    }

    /// Skip the next stage, which must be optional, landing on the one after.
    pub fn skip_next(&mut self) -> Result<HookStage, StageTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(StageTransitionError::FromTerminalState { from: self.current })?;
        if !next.is_optional() {
            return Err(StageTransitionError::NotOptional { stage: next });
        }
        self.skipped.push(next);
        let landing = next
            .next()
            .ok_or(StageTransitionError::FromTerminalState { from: next })?;
        self.enter(landing);
        Ok(landing)
    }

    /// Count one successful layer registration
    pub fn record_layer(&mut self) -> Result<usize, StageTransitionError> {
        if self.current != HookStage::RegisterLayers {
            return Err(StageTransitionError::WrongStage {
                expected: HookStage::RegisterLayers,
                actual: self.current,
            });
        }
        self.layers_registered += 1;
        Ok(self.layers_registered)
    }

    /// Mark the run as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.enter(HookStage::Failed);
        Ok(())
    }

    fn enter(&mut self, stage: HookStage) {
        self.history.push(stage);
        self.current = stage;
    }
}
