use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Missing model artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("NumPy codec error: {0}")]
    Npy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DrainError {
    pub fn shape(context: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        DrainError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

pub type DrainResult<T> = Result<T, DrainError>;

/// Fails with [`DrainError::ShapeMismatch`] unless `found == expected`.
pub fn ensure_shape(context: &str, expected: &[usize], found: &[usize]) -> DrainResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(DrainError::shape(context, expected, found))
    }
}
