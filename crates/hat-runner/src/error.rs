use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that stop the batch before any trial runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unrecognized instance type: {0}")]
    UnknownInstanceType(String),

    #[error("invalid range for {name}: min {min} > max {max}")]
    EmptyRange { name: &'static str, min: u64, max: u64 },

    #[error("invalid value for {name}: must be at least 1")]
    NonPositive { name: &'static str },

    #[error("range for {name} too large: trial arithmetic would overflow")]
    RangeTooLarge { name: &'static str },

    #[error("no decoder command configured (use --decoder-command)")]
    MissingDecoder,

    #[error("generator command is empty")]
    EmptyGenerator,

    #[error("failed to read settings file {}: {source}", .path.display())]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", .path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("not inside a git checkout: {0}")]
    Revision(String),
}

/// The external collaborator a trial step talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Generator,
    Decoder,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Generator => "generator",
            ToolKind::Decoder => "decoder",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trial that could not be judged. Recorded in the log and the cache; the
/// batch carries on.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("{tool} could not be started: {source}")]
    Spawn {
        tool: ToolKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {}: {stderr_tail}", describe_exit(.exit_code))]
    Exit {
        tool: ToolKind,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: ToolKind, after: Duration },

    #[error("{tool} did not produce {}", .path.display())]
    MissingOutput { tool: ToolKind, path: PathBuf },

    #[error("{tool} output {} is malformed: {reason}", .path.display())]
    Malformed {
        tool: ToolKind,
        path: PathBuf,
        reason: String,
    },

    #[error("dealer partition exceeds n: sufficient counts sum to {sum}, n = {n}")]
    InconsistentPartition { n: u64, sum: u64 },
}

impl TrialError {
    /// Stable identifier written to failure reports.
    pub fn code(&self) -> String {
        match self {
            TrialError::Spawn { tool, .. } => format!("{}_spawn", tool),
            TrialError::Exit { tool, .. } => format!("{}_exit", tool),
            TrialError::Timeout { tool, .. } => format!("{}_timeout", tool),
            TrialError::MissingOutput { tool, .. } => format!("{}_missing_output", tool),
            TrialError::Malformed { tool, .. } => format!("{}_malformed_output", tool),
            TrialError::InconsistentPartition { .. } => "inconsistent_partition".to_string(),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}
