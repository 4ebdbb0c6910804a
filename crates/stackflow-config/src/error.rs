use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Plan file not found. Looked in:\n\
        - current directory: stack.local.yaml, .stack.local.yaml, stack.yaml, .stack.yaml\n\
        - the ./.stackflow/ directory\n\
        - ~/.config/stackflow/stack.yaml\n\
        Set STACKFLOW_PLAN_PATH to point at a plan file directly"
    )]
    PlanFileNotFound,

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Undefined variable '{0}' (add it under `variables:` or give a default)")]
    UndefinedVariable(String),

    #[error("Environment variable '{0}' is not set (export it or give a default)")]
    UndefinedEnv(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] stackflow_cloud::CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
