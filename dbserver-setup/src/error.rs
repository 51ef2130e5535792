use std::path::PathBuf;
use thiserror::Error;

/// Failures of sample-schema install/remove.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("No server instance is available")]
    NoInstance,

    #[error("Sample '{0}' has no schema script path")]
    EmptySchemaPath(String),

    #[error("Invalid schema name '{0}'")]
    InvalidSchemaName(String),

    #[error("Script not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Script {path:?} is not valid {encoding}")]
    Decode { path: PathBuf, encoding: &'static str },

    #[error("Expected {expected} script(s) to execute, server reported {executed}")]
    ExecutionMismatch { expected: usize, executed: usize },

    #[error("Server reported an error: {0}")]
    Execution(String),
}

/// Failures of package catalog state transitions.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PackageError {
    #[error("Unknown package {0}")]
    UnknownPackage(uuid::Uuid),

    #[error("Package '{package}' has no feature '{feature}'")]
    UnknownFeature { package: String, feature: String },

    #[error("Feature '{0}' is required and cannot be deselected")]
    RequiredFeature(String),

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),
}

/// Rejected wizard navigation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WizardError {
    #[error("Cannot go back from page '{0}'")]
    BackNotAllowed(&'static str),

    #[error("Page '{0}' is not complete")]
    PageIncomplete(&'static str),

    #[error("Already on the last page")]
    AtLastPage,

    #[error("Cancel is not allowed on page '{0}'")]
    CancelNotAllowed(&'static str),

    #[error("Unknown page")]
    UnknownPage,
}
