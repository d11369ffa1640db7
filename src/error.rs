use thiserror::Error;

/// Failures surfaced by the simulation core.
///
/// Dropped or rejected signals are not errors; they are recorded on the run
/// outcome and the simulation continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid price series: {0}")]
    InvalidSeries(String),

    #[error("unknown signal action '{0}'")]
    UnknownAction(String),

    #[error("equity curve does not reconcile with trades (expected final capital {expected:.4}, curve ends at {actual:.4})")]
    Reconciliation { expected: f64, actual: f64 },

    #[error("no optimum found: all {cells} grid cell(s) failed")]
    OptimizationExhausted { cells: usize },

    #[error("optimization cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        EngineError::Configuration(message.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
