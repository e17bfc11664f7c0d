use std::path::PathBuf;

use tabula_core::types::{ColumnType, ToolErrorKind};
use thiserror::Error;

/// Domain errors raised by dataset ingestion and the analysis functions.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Column '{column}' not found")]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("Column '{column}' is {actual}, not numeric")]
    NotNumeric { column: String, actual: ColumnType },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{} changed on disk since it was loaded; load it again", .0.display())]
    Stale(PathBuf),
}

impl From<csv::Error> for AnalysisError {
    fn from(err: csv::Error) -> Self {
        AnalysisError::Parse(err.to_string())
    }
}

impl From<AnalysisError> for ToolErrorKind {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::FileNotFound(path) => ToolErrorKind::FileNotFound {
                path: path.display().to_string(),
            },
            AnalysisError::Parse(message) => ToolErrorKind::ParseError { message },
            AnalysisError::ColumnNotFound { column, available } => {
                ToolErrorKind::ColumnNotFound { column, available }
            }
            AnalysisError::NotNumeric { column, actual } => {
                ToolErrorKind::TypeMismatch { column, actual }
            }
            AnalysisError::InvalidArgument(message) => ToolErrorKind::InvalidArgument { message },
            other @ (AnalysisError::Io(_)
            | AnalysisError::InsufficientData(_)
            | AnalysisError::Stale(_)) => {
                ToolErrorKind::AnalysisFailed {
                    message: other.to_string(),
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
