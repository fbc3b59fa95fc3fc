//! Error type shared by every stage of the pipeline.

use thiserror::Error;

/// Unified error type for treetops operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage received input it cannot work with (empty set, bad parameter).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LAS/LAZ decoding failure.
    #[error("point cloud error: {0}")]
    Las(#[from] las::Error),

    #[error("GeoTIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Coordinate reference system mismatch or unsupported conversion.
    #[error("projection error: {0}")]
    Projection(String),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
