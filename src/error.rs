use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpilloverError>;

#[derive(Error, Debug)]
pub enum SpilloverError {
    #[error(
        "degenerate denominator: {excluded} of {total} steps have |Δrate_a| within epsilon (max fraction {max_fraction})"
    )]
    DegenerateDenominator {
        excluded: usize,
        total: usize,
        max_fraction: f64,
    },

    #[error("insufficient observations: have {observations}, need at least {required}")]
    InsufficientObservations { observations: usize, required: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("linear estimation did not converge: {0}")]
    NonConvergent(String),

    #[error("residual corrector diverged: {0}")]
    CorrectorDivergence(String),

    #[error("only {succeeded} folds available or succeeded, need at least {required}")]
    InsufficientFolds { succeeded: usize, required: usize },

    #[error("model rejected by promotion gate: {}", .0.join("; "))]
    PromotionRejected(Vec<String>),

    #[error("run cancelled before fold {next_fold}")]
    Cancelled { next_fold: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes a caller can act on. Fold-local kinds are caught by the
/// cross-validation engine; data and validation kinds abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataError,
    FitError,
    ValidationError,
    AssertionViolation,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataError => "data_error",
            Self::FitError => "fit_error",
            Self::ValidationError => "validation_error",
            Self::AssertionViolation => "assertion_violation",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl SpilloverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DegenerateDenominator { .. }
            | Self::InsufficientObservations { .. }
            | Self::InvalidInput(_) => ErrorKind::DataError,
            Self::NonConvergent(_) | Self::CorrectorDivergence(_) => ErrorKind::FitError,
            Self::InsufficientFolds { .. } | Self::PromotionRejected(_) => {
                ErrorKind::ValidationError
            }
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config(_) | Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Errors that only invalidate the fold being fitted.
    pub fn is_fold_local(&self) -> bool {
        matches!(
            self,
            Self::InsufficientObservations { .. }
                | Self::NonConvergent(_)
                | Self::CorrectorDivergence(_)
                | Self::DegenerateDenominator { .. }
        )
    }
}
