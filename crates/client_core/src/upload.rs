//! Pre-signed photo uploads: obtain a URL, PUT the bytes to object storage,
//! then register the object key against a patient log.

use std::{fmt, io, path::Path, sync::Arc};

use shared::domain::{LogId, LogPhoto, PatientId};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    error::ClientError,
    gateway::{ObjectStorage, RemoteGateway},
    logs::LogPhotoStore,
};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{}' has no usable file name", path.display()),
                )
            })?
            .to_string();
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    PresignedUrl,
    Transfer,
    Register,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PresignedUrl => "pre-signed URL request",
            Self::Transfer => "object transfer",
            Self::Register => "photo registration",
        })
    }
}

#[derive(Debug, Error)]
#[error("photo upload failed during {stage}: {source}")]
pub struct UploadError {
    pub stage: UploadStage,
    pub source: ClientError,
    /// Object key issued before the failure. Nothing cleans it up server-side.
    pub orphaned_key: Option<String>,
}

#[derive(Debug, Error)]
#[error("upload of '{file_name}' failed after {} photo(s) were attached: {source}", .uploaded.len())]
pub struct BatchUploadError {
    pub uploaded: Vec<LogPhoto>,
    pub file_name: String,
    pub source: UploadError,
}

pub struct UploadOrchestrator {
    gateway: Arc<dyn RemoteGateway>,
    object_storage: Arc<dyn ObjectStorage>,
    logs: Arc<LogPhotoStore>,
}

impl UploadOrchestrator {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        object_storage: Arc<dyn ObjectStorage>,
        logs: Arc<LogPhotoStore>,
    ) -> Self {
        Self {
            gateway,
            object_storage,
            logs,
        }
    }

    /// Runs the three steps in order and stops at the first failure. The log's
    /// photo list only changes once registration has succeeded.
    pub async fn upload(
        &self,
        file: PhotoUpload,
        patient_id: &PatientId,
        log_id: &LogId,
    ) -> Result<LogPhoto, UploadError> {
        let PhotoUpload {
            file_name,
            mime_type,
            bytes,
        } = file;

        let presigned = self
            .gateway
            .request_presigned_url(&file_name, &mime_type)
            .await
            .map_err(|source| UploadError {
                stage: UploadStage::PresignedUrl,
                source,
                orphaned_key: None,
            })?;

        let size = bytes.len();
        if let Err(source) = self
            .object_storage
            .put_object(&presigned.url, &mime_type, bytes)
            .await
        {
            warn!(
                "upload: transfer failed file={file_name} key={} error={source}",
                presigned.key
            );
            return Err(UploadError {
                stage: UploadStage::Transfer,
                source,
                orphaned_key: Some(presigned.key),
            });
        }

        match self
            .logs
            .add_photo_to_log(patient_id, log_id, &presigned.key)
            .await
        {
            Ok(photo) => {
                info!(
                    "upload: stored file={file_name} bytes={size} key={} log={log_id}",
                    presigned.key
                );
                Ok(photo)
            }
            Err(source) => {
                warn!(
                    "upload: registration failed, object left unreferenced key={} log={log_id} error={source}",
                    presigned.key
                );
                Err(UploadError {
                    stage: UploadStage::Register,
                    source,
                    orphaned_key: Some(presigned.key),
                })
            }
        }
    }

    /// Uploads files one after another so photos are appended in input order.
    pub async fn upload_all(
        &self,
        files: Vec<PhotoUpload>,
        patient_id: &PatientId,
        log_id: &LogId,
    ) -> Result<Vec<LogPhoto>, BatchUploadError> {
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let file_name = file.file_name.clone();
            match self.upload(file, patient_id, log_id).await {
                Ok(photo) => uploaded.push(photo),
                Err(source) => {
                    return Err(BatchUploadError {
                        uploaded,
                        file_name,
                        source,
                    })
                }
            }
        }
        Ok(uploaded)
    }
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
