//! Media store abstraction
//!
//! Files are pushed to an unsigned-upload media host which answers with a
//! public URL. Images go to the image endpoint, everything else (PDFs
//! included) to the raw endpoint.

use crate::config::MediaConfig;
use crate::domain::FileKind;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Upload endpoint family on the media host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Raw,
}

impl UploadKind {
    pub fn for_file(kind: FileKind) -> Self {
        if kind.is_image() {
            UploadKind::Image
        } else {
            UploadKind::Raw
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Image => "image",
            UploadKind::Raw => "raw",
        }
    }
}

/// A file ready to be uploaded
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Department code, used as the destination sub-folder
    pub department: String,
}

impl Upload {
    pub fn kind(&self) -> UploadKind {
        UploadKind::for_file(FileKind::classify(&self.content_type))
    }
}

/// Trait for media hosting
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload a file and return its public URL
    async fn upload(&self, upload: Upload) -> Result<String>;
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadFailure>,
}

#[derive(Deserialize)]
struct UploadFailure {
    message: String,
}

/// Unsigned-upload HTTP client
pub struct HttpMediaStore {
    client: reqwest::Client,
    api_base: String,
    upload_preset: String,
    folder_root: String,
}

impl HttpMediaStore {
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_preset: config.upload_preset.clone(),
            folder_root: config.folder_root.clone(),
        })
    }

    fn endpoint(&self, kind: UploadKind) -> String {
        format!("{}/{}/upload", self.api_base, kind.as_str())
    }

    fn folder(&self, department: &str) -> String {
        format!("{}/{}", self.folder_root, department)
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn upload(&self, upload: Upload) -> Result<String> {
        let url = self.endpoint(upload.kind());
        let folder = self.folder(&upload.department);
        let size = upload.bytes.len();

        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| AppError::Upload {
                message: format!("Invalid content type: {}", e),
            })?;

        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone())
            .text("folder", folder.clone());

        debug!(url = %url, folder = %folder, size, "Uploading file");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Upload {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        let body: UploadResponse = response.json().await.map_err(|e| AppError::Upload {
            message: format!("Failed to parse response: {}", e),
        })?;

        match (body.secure_url, body.error) {
            (Some(secure_url), _) if status.is_success() => {
                info!(file = %upload.file_name, url = %secure_url, "File uploaded");
                Ok(secure_url)
            }
            (_, Some(failure)) => Err(AppError::Upload {
                message: failure.message,
            }),
            _ => Err(AppError::Upload {
                message: format!("Upload rejected with status {}", status),
            }),
        }
    }
}

/// Media store for testing; hands out predictable URLs
#[derive(Default)]
pub struct MockMediaStore {
    uploads: AtomicUsize,
    fail: bool,
}

impl MockMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A media store whose uploads always fail
    pub fn failing() -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// Upload calls received so far
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaStore for MockMediaStore {
    async fn upload(&self, upload: Upload) -> Result<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(AppError::Upload {
                message: "media host unreachable".to_string(),
            });
        }
        Ok(format!(
            "https://media.test/{}/{}/{}-{}",
            upload.kind().as_str(),
            upload.department,
            n,
            upload.file_name
        ))
    }
}
