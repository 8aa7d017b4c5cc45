use parcel_lasso_lib::{DataError, DatasetKind};
use std::path::PathBuf;

/// Errors that stop the driver
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Row {index} of {path} is not a JSON object")]
    InvalidRow { path: PathBuf, index: usize },

    #[error("Loading the {kind} dataset was interrupted")]
    LoadInterrupted { kind: DatasetKind },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Data(#[from] DataError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AppError::InvalidRow {
            path: PathBuf::from("pricing.json"),
            index: 3,
        };
        assert_eq!(err.to_string(), "Row 3 of pricing.json is not a JSON object");

        let err = AppError::LoadInterrupted {
            kind: DatasetKind::Comps,
        };
        assert_eq!(err.to_string(), "Loading the comps dataset was interrupted");

        let err: AppError = DataError::EmptySelection.into();
        assert!(err.to_string().starts_with("Nothing to export"));
    }
}
