use thiserror::Error;

use crate::variant::LocusId;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing required input columns. Aborts the run before any stage.
    #[error("schema error: {0}")]
    Schema(String),

    /// Degenerate probability mass inside a single locus.
    #[error("numerical instability in locus {locus_id}: {reason}")]
    NumericalInstability { locus_id: LocusId, reason: String },

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error("gene universe unavailable: {0}")]
    Universe(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("checkpoint log error: {0}")]
    Checkpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the external variant-effect scoring collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalServiceError {
    /// Rate limits, timeouts, dropped connections. Retried with backoff.
    #[error("transient scoring failure: {0}")]
    Transient(String),

    /// The service refused the request outright. Never retried.
    #[error("scoring request rejected: {0}")]
    Rejected(String),
}

impl ExternalServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalServiceError::Transient(_))
    }
}

/// Non-fatal data problems. Each one is defaulted, logged, and carried in the stage report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataQualityWarning {
    #[error("variant {variant_id} has no posterior probability; treated as 0.0")]
    MissingProbability { variant_id: String },

    #[error("variant {variant_id} has invalid posterior probability {value}; treated as 0.0")]
    InvalidProbability { variant_id: String, value: f64 },

    #[error("variant {variant_id} has no effect record; skipped in aggregation")]
    MissingEffect { variant_id: String },

    #[error("variant {variant_id} has an unparsable gene effect entry '{entry}'")]
    UnparsableGeneEffect { variant_id: String, entry: String },

    #[error("variant {variant_id} has non-finite {column} value {value}; treated as missing")]
    NonFiniteValue {
        variant_id: String,
        column: String,
        value: f64,
    },

    #[error("gene {gene} is scored but absent from the gene universe; kept")]
    GeneOutsideUniverse { gene: String },
}

impl DataQualityWarning {
    /// Logs the warning and hands it back for collection.
    pub fn emit(self) -> Self {
        tracing::warn!("{self}");
        self
    }
}
