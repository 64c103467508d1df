use std::process::ExitStatus;

use crate::pipeline::{ResourceReport, Step};
use crate::provision::StepState;

pub type LaunchResult<T> = Result<T, LaunchError>;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("permission group not found: {name}")]
    PermissionLookup { name: String },

    #[error("Cloudflare API error ({context}): [{code}] {message}")]
    Api {
        context: String,
        code: i64,
        message: String,
    },

    #[error("could not find {key} in command output")]
    Parse { key: String },

    #[error("command failed: {command}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("R2 storage is not enabled for this account")]
    StorageNotEnabled,

    #[error("zone '{0}' not found")]
    ZoneNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("environment variable missing: {0}")]
    EnvMissing(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("illegal transition for step '{step}': {from} -> {to}")]
    InvalidTransition {
        step: Step,
        from: StepState,
        to: StepState,
    },

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: Step,
        provisioned: Vec<ResourceReport>,
        #[source]
        source: Box<LaunchError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::ser::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl LaunchError {
    /// Whether a remote "create" failed only because the resource is
    /// already there.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Api { message, .. } => message.to_lowercase().contains("already exists"),
            Self::CommandFailed { output, .. } => output.to_lowercase().contains("already exists"),
            _ => false,
        }
    }
}
