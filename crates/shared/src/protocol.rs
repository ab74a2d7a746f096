use serde::{Deserialize, Serialize};

/// `{ "body": T }` wrapper used by the attendance endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self { body }
    }

    pub fn into_inner(self) -> T {
        self.body
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlRequest {
    pub file_name: String,
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUpload {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPhotosRequest {
    #[serde(rename = "s3Keys")]
    pub s3_keys: Vec<String>,
}

impl RegisterPhotosRequest {
    pub fn single(key: impl Into<String>) -> Self {
        Self {
            s3_keys: vec![key.into()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatientLog {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
