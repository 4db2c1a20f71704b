pub use anyhow::{anyhow, Result};

use thiserror::Error as TError;

#[derive(Debug, TError)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("CommandFailed: `{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("metadata.name and metadata.namespace must be set")]
    MissingMetadata,
    #[error("failed to find some resources for {0}")]
    ResourcesNotFound(String),
    #[error("stopped retrying {0}")]
    Superseded(String),
}
