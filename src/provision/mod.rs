pub mod access;
pub mod bucket;
pub mod database;

use std::fmt;

use crate::api::CloudflareApi;
use crate::config::LaunchConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::pipeline::Step;
use crate::wrangler::{DeployTool, ToolEnv};

/// Everything a provisioning step needs, passed explicitly.
///
/// `api` authenticates with the scoped token and `env` carries the
/// same token to wrangler child processes.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub config: &'a LaunchConfig,
    pub api: &'a dyn CloudflareApi,
    pub tool: &'a dyn DeployTool,
    pub env: ToolEnv<'a>,
    pub account_id: &'a str,
}

/// How a managed resource ended up in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Reused,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Reused => f.write_str("reused"),
        }
    }
}

/// Result of an upsert against a mutable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}

impl Upsert {
    /// An update keeps the existing resource, so it counts as reuse.
    #[must_use]
    pub const fn outcome(self) -> Outcome {
        match self {
            Self::Created => Outcome::Created,
            Self::Updated | Self::Unchanged => Outcome::Reused,
        }
    }
}

/// Lifecycle of one provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Checking,
    Exists,
    Creating,
    Done,
    Failed,
    Skipped,
}

impl StepState {
    #[must_use]
    pub const fn can_advance(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Checking | Self::Skipped)
                | (Self::Checking, Self::Exists | Self::Creating | Self::Failed)
                | (Self::Exists | Self::Creating, Self::Done | Self::Failed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Exists => "exists",
            Self::Creating => "creating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Progress record of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,
    pub state: StepState,
    pub detail: Option<String>,
}

impl StepReport {
    #[must_use]
    pub const fn new(step: Step) -> Self {
        Self {
            step,
            state: StepState::Pending,
            detail: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does
    /// not allow.
    pub fn advance(&mut self, next: StepState) -> LaunchResult<()> {
        if !self.state.can_advance(next) {
            return Err(LaunchError::InvalidTransition {
                step: self.step,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Walk through `Checking` and `Exists`/`Creating` to `Done`.
    pub fn complete(&mut self, outcome: Outcome) -> LaunchResult<()> {
        self.advance(StepState::Checking)?;
        self.advance(match outcome {
            Outcome::Created => StepState::Creating,
            Outcome::Reused => StepState::Exists,
        })?;
        self.advance(StepState::Done)
    }

    /// Mark the step failed from wherever it stands.
    pub fn fail(&mut self, detail: impl Into<String>) {
        if self.state == StepState::Pending {
            self.state = StepState::Checking;
        }
        if !self.state.is_terminal() {
            self.state = StepState::Failed;
        }
        self.detail = Some(detail.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> LaunchResult<()> {
        self.advance(StepState::Skipped)?;
        self.detail = Some(reason.into());
        Ok(())
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
