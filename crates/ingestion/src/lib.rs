//! StudyVault document building
//!
//! Turns a selection of photographed pages into a single PDF before upload.

pub mod errors;
pub mod pdf;

pub use errors::IngestionError;
pub use pdf::{document_name, images_to_pdf, ConvertedDocument, A4_WIDTH_PT, JPEG_QUALITY, MAX_DIMENSION_PX};
