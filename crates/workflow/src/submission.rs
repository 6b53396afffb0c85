//! Submission form: metadata, file selection and the conversion gate
//!
//! A selection is either exactly one non-image document, or one or more
//! images. Images are never uploaded as-is; they must be converted into a
//! single PDF first, and changing the selection discards that conversion.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use studyvault_common::catalog;
use studyvault_common::domain::FileKind;
use studyvault_common::errors::{AppError, Result};
use studyvault_common::metrics;
use studyvault_ingestion::{images_to_pdf, ConvertedDocument};
use tracing::debug;
use validator::Validate;

/// Form fields describing a submitted resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMetadata {
    #[validate(length(min = 1, max = 120))]
    pub subject: String,

    #[validate(length(min = 1, max = 120))]
    pub module: String,

    #[validate(custom(function = "catalog::validate_department"))]
    pub department: String,

    #[validate(range(min = 1, max = 8))]
    pub semester: u8,

    #[validate(length(min = 1, max = 120))]
    pub faculty_name: String,

    #[validate(range(min = 1990, max = 2100))]
    pub syllabus_year: Option<i32>,
}

impl SubmissionMetadata {
    /// Trimmed copy; whitespace-only fields then fail validation
    pub fn normalized(&self) -> Self {
        Self {
            subject: self.subject.trim().to_string(),
            module: self.module.trim().to_string(),
            department: self.department.trim().to_ascii_lowercase(),
            semester: self.semester,
            faculty_name: self.faculty_name.trim().to_string(),
            syllabus_year: self.syllabus_year,
        }
    }
}

/// A file picked by the contributor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::classify(&self.content_type)
    }
}

#[derive(Debug, Clone)]
enum Picked {
    Document(SelectedFile),
    Images {
        images: Vec<SelectedFile>,
        converted: Option<SelectedFile>,
    },
}

/// The current file selection of a submission
#[derive(Debug, Clone)]
pub struct Selection {
    picked: Picked,
}

impl Selection {
    /// Validate a set of picked files
    pub fn new(files: Vec<SelectedFile>) -> Result<Self> {
        if files.is_empty() {
            return Err(AppError::MissingField {
                field: "file".to_string(),
            });
        }

        let images = files.iter().filter(|f| f.kind().is_image()).count();
        let picked = if images == files.len() {
            Picked::Images {
                images: files,
                converted: None,
            }
        } else {
            // Not all images: only a single document is accepted
            match <[SelectedFile; 1]>::try_from(files) {
                Ok([document]) => Picked::Document(document),
                Err(_) => {
                    return Err(AppError::Validation {
                        message: "Select one document, or one or more images to combine into a PDF"
                            .to_string(),
                        field: Some("file".to_string()),
                    })
                }
            }
        };

        Ok(Self { picked })
    }

    /// Replace the picked files; any previous conversion is discarded
    pub fn reselect(&mut self, files: Vec<SelectedFile>) -> Result<()> {
        *self = Self::new(files)?;
        Ok(())
    }

    pub fn has_images(&self) -> bool {
        matches!(self.picked, Picked::Images { .. })
    }

    pub fn is_converted(&self) -> bool {
        matches!(self.picked, Picked::Images { converted: Some(_), .. })
    }

    /// Combine the picked images into one PDF named after `subject`.
    /// CPU-bound; call from a blocking context.
    pub fn convert(&mut self, subject: &str) -> Result<&SelectedFile> {
        let Picked::Images { images, converted } = &mut self.picked else {
            return Err(AppError::Validation {
                message: "Only image selections can be converted".to_string(),
                field: Some("file".to_string()),
            });
        };

        let start = Instant::now();
        let sources: Vec<&[u8]> = images.iter().map(|f| f.bytes.as_slice()).collect();
        let ConvertedDocument {
            file_name,
            bytes,
            page_count,
        } = images_to_pdf(&sources, subject)?;

        metrics::record_conversion(start.elapsed().as_secs_f64(), page_count);
        debug!(file_name = %file_name, page_count, "Selection converted");
        Ok(&*converted.insert(SelectedFile::new(file_name, "application/pdf", bytes)))
    }

    /// The file to upload. Unconverted image selections are refused.
    pub fn ready_file(&self) -> Result<&SelectedFile> {
        match &self.picked {
            Picked::Document(file) => Ok(file),
            Picked::Images {
                converted: Some(file),
                ..
            } => Ok(file),
            Picked::Images { converted: None, .. } => Err(AppError::ConversionRequired),
        }
    }
}
