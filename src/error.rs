use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("CovidActNow request failed: {0}")]
    Network(String),

    #[error("CovidActNow returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("failed to parse {0}")]
    Parse(String),

    #[error("invalid geometry feature: {0}")]
    InvalidFeature(String),

    #[error("metric {metric} is not part of category {category}")]
    InvalidMetric { category: String, metric: String },

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid region code: {0}")]
    InvalidRegionCode(String),

    #[error("no published artifact for {0}")]
    ArtifactNotFound(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("{stage} failed for {key}")]
    Stage {
        stage: &'static str,
        key: String,
        #[source]
        source: Box<EtlError>,
    },
}

impl EtlError {
    pub fn in_stage(self, stage: &'static str, key: impl Into<String>) -> Self {
        EtlError::Stage {
            stage,
            key: key.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any stage context wrappers.
    pub fn root(&self) -> &EtlError {
        match self {
            EtlError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub(crate) fn fs_err(action: &str, path: impl std::fmt::Display, err: std::io::Error) -> EtlError {
    EtlError::Filesystem(format!("{action} {path}: {err}"))
}
