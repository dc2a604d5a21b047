//! Error taxonomy
//!
//! Load and script errors are contained per team by the engine; only
//! [`EngineError`] reaches the caller.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::sim::solver::{RootError, SolveError};

/// Failures resolving a ship or stage script on disk
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("script not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid package {path}: {reason}")]
    InvalidPackage { path: PathBuf, reason: String },
    #[error("unsafe path: {0}")]
    UnsafePath(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures inside one script sandbox
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The chunk failed to compile or its top level raised
    #[error("failed to load {name}: {message}")]
    Load { name: String, message: String },
    #[error("{callback} failed: {message}")]
    Runtime { callback: String, message: String },
    /// Killed by the watchdog
    #[error("{callback} exceeded its CPU deadline")]
    Cancelled { callback: String },
}

impl ScriptError {
    /// Fatal errors disable the team for the rest of the match
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScriptError::Load { .. } | ScriptError::Cancelled { .. })
    }
}

/// Match-level failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// Stage failures are never contained
    #[error("stage {name} failed: {source}")]
    Stage {
        name: String,
        #[source]
        source: ScriptError,
    },
    #[error(transparent)]
    Loader(#[from] LoadError),
    #[error("expected engine phase {expected}, found {actual}")]
    InvalidPhase { expected: String, actual: String },
    #[error("no teams to play")]
    NoTeams,
    #[error("failed to start the watchdog: {0}")]
    Watchdog(#[source] std::io::Error),
}

/// Failures loading or saving match settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_script_errors() {
        let load = ScriptError::Load {
            name: "a".into(),
            message: "syntax".into(),
        };
        let cancelled = ScriptError::Cancelled { callback: "run".into() };
        let runtime = ScriptError::Runtime {
            callback: "run".into(),
            message: "nil value".into(),
        };
        assert!(load.is_fatal());
        assert!(cancelled.is_fatal());
        assert!(!runtime.is_fatal());
    }

    #[test]
    fn test_stage_error_message() {
        let err = EngineError::Stage {
            name: "arena".into(),
            source: ScriptError::Cancelled { callback: "run".into() },
        };
        assert_eq!(err.to_string(), "stage arena failed: run exceeded its CPU deadline");
    }
}
