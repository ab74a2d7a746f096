//! Remote collaborators: the application API and the object store that
//! pre-signed uploads are written to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        AttendanceRecord, LogId, LogPhoto, NonAttendingStudent, PatientId, PatientLog, PhotoId,
        SessionId, StudentId,
    },
    protocol::{
        Envelope, NewPatientLog, PresignedUpload, PresignedUrlRequest, RegisterPhotosRequest,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
};

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn fetch_attendances(&self, session_id: SessionId) -> ClientResult<Vec<AttendanceRecord>>;
    async fn fetch_non_attending_students(
        &self,
        session_id: SessionId,
    ) -> ClientResult<Vec<NonAttendingStudent>>;
    async fn add_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<AttendanceRecord>;
    async fn delete_attendance(&self, session_id: SessionId, student_id: StudentId)
        -> ClientResult<()>;

    async fn request_presigned_url(
        &self,
        file_name: &str,
        file_type: &str,
    ) -> ClientResult<PresignedUpload>;
    async fn register_log_photo(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
        key: &str,
    ) -> ClientResult<LogPhoto>;
    async fn delete_log_photo(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
        photo_id: &PhotoId,
    ) -> ClientResult<()>;

    async fn fetch_logs(&self, patient_id: &PatientId) -> ClientResult<Vec<PatientLog>>;
    async fn get_log(&self, patient_id: &PatientId, log_id: &LogId) -> ClientResult<PatientLog>;
    async fn create_log(
        &self,
        patient_id: &PatientId,
        log: &NewPatientLog,
    ) -> ClientResult<PatientLog>;
    async fn delete_log(&self, patient_id: &PatientId, log_id: &LogId) -> ClientResult<()>;
}

/// Direct writes to pre-signed object-store URLs. These never go through the
/// application API base URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, url: &str, content_type: &str, bytes: Vec<u8>) -> ClientResult<()>;
}

/// Builds the credentialed client shared by the gateway and the object store.
pub fn build_http_client(settings: &ClientSettings) -> ClientResult<Client> {
    let mut builder = Client::builder()
        .cookie_store(true)
        .user_agent(settings.user_agent.clone());
    if let Some(secs) = settings.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(ClientError::from_response_body(status, &body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let bytes = ensure_success(response).await?.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(http: Client, base_url: &str) -> ClientResult<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| ClientError::InvalidUrl(format!("'{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!(
                "'{base_url}' cannot carry a path"
            )));
        }
        Ok(Self { http, base_url })
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        Self::new(build_http_client(settings)?, &settings.api_base_url)
    }

    pub fn http_client(&self) -> &Client {
        &self.http
    }

    /// Appends `segments` to the API root, percent-encoding each one so ids
    /// never alter the route.
    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> ClientResult<T> {
        let url = self.endpoint(segments)?;
        debug!("gateway: GET {url}");
        decode(self.http.get(url).send().await?).await
    }

    async fn delete(&self, segments: &[&str]) -> ClientResult<()> {
        let url = self.endpoint(segments)?;
        debug!("gateway: DELETE {url}");
        ensure_success(self.http.delete(url).send().await?).await?;
        Ok(())
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> ClientResult<T>
    where
        B: serde::Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        debug!("gateway: POST {url}");
        decode(self.http.post(url).json(body).send().await?).await
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_attendances(&self, session_id: SessionId) -> ClientResult<Vec<AttendanceRecord>> {
        let session = session_id.0.to_string();
        let envelope: Envelope<Vec<AttendanceRecord>> =
            self.get(&["attendances", "session", &session]).await?;
        Ok(envelope.into_inner())
    }

    async fn fetch_non_attending_students(
        &self,
        session_id: SessionId,
    ) -> ClientResult<Vec<NonAttendingStudent>> {
        let session = session_id.0.to_string();
        let envelope: Envelope<Vec<NonAttendingStudent>> = self
            .get(&["attendances", "non-attending-students", "session", &session])
            .await?;
        Ok(envelope.into_inner())
    }

    async fn add_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<AttendanceRecord> {
        let session = session_id.0.to_string();
        // The endpoint takes the bare student id as its JSON body.
        let envelope: Envelope<AttendanceRecord> = self
            .post_json(&["attendances", "add", "session", &session], &student_id)
            .await?;
        Ok(envelope.into_inner())
    }

    async fn delete_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<()> {
        let session = session_id.0.to_string();
        let student = student_id.0.to_string();
        self.delete(&["attendances", "delete", "session", &session, "student", &student])
            .await
    }

    async fn request_presigned_url(
        &self,
        file_name: &str,
        file_type: &str,
    ) -> ClientResult<PresignedUpload> {
        self.post_json(
            &["s3", "generate-presigned-url"],
            &PresignedUrlRequest {
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
            },
        )
        .await
    }

    async fn register_log_photo(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
        key: &str,
    ) -> ClientResult<LogPhoto> {
        self.post_json(
            &[
                "patients",
                patient_id.as_str(),
                "logs",
                log_id.as_str(),
                "photos",
            ],
            &RegisterPhotosRequest::single(key),
        )
        .await
    }

    async fn delete_log_photo(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
        photo_id: &PhotoId,
    ) -> ClientResult<()> {
        self.delete(&[
            "patients",
            patient_id.as_str(),
            "logs",
            log_id.as_str(),
            "photos",
            photo_id.as_str(),
        ])
        .await
    }

    async fn fetch_logs(&self, patient_id: &PatientId) -> ClientResult<Vec<PatientLog>> {
        self.get(&["patients", patient_id.as_str(), "logs"]).await
    }

    async fn get_log(&self, patient_id: &PatientId, log_id: &LogId) -> ClientResult<PatientLog> {
        self.get(&["patients", patient_id.as_str(), "logs", log_id.as_str()])
            .await
    }

    async fn create_log(
        &self,
        patient_id: &PatientId,
        log: &NewPatientLog,
    ) -> ClientResult<PatientLog> {
        self.post_json(&["patients", patient_id.as_str(), "logs"], log)
            .await
    }

    async fn delete_log(&self, patient_id: &PatientId, log_id: &LogId) -> ClientResult<()> {
        self.delete(&["patients", patient_id.as_str(), "logs", log_id.as_str()])
            .await
    }
}

/// Object-store writer sharing the API client's cookie jar.
#[derive(Clone)]
pub struct HttpObjectStorage {
    http: Client,
}

impl HttpObjectStorage {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put_object(&self, url: &str, content_type: &str, bytes: Vec<u8>) -> ClientResult<()> {
        debug!("object storage: PUT {} bytes as {content_type}", bytes.len());
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
