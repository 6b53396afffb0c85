//! Conversion error types

use studyvault_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("No images selected for conversion")]
    NoImages,

    #[error("Image {index} could not be decoded: {message}")]
    DecodeError { index: usize, message: String },

    #[error("Image {index} could not be encoded: {message}")]
    EncodeError { index: usize, message: String },

    #[error("PDF build error: {0}")]
    PdfBuildError(String),
}

impl From<lopdf::Error> for IngestionError {
    fn from(e: lopdf::Error) -> Self {
        IngestionError::PdfBuildError(e.to_string())
    }
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        AppError::Conversion {
            message: e.to_string(),
        }
    }
}
