use std::sync::Arc;

use shared::domain::{PatientId, SessionId};
use tokio::sync::broadcast;

pub mod attendance;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logs;
pub mod upload;

pub use attendance::{AttendanceAction, AttendanceState, AttendanceStore};
pub use config::{load_settings, normalize_base_url, ClientSettings, ConfigError};
pub use error::{ClientError, ClientResult};
pub use gateway::{HttpGateway, HttpObjectStorage, ObjectStorage, RemoteGateway};
pub use logs::{LogAction, LogPhotoStore, LogState};
pub use upload::{BatchUploadError, PhotoUpload, UploadError, UploadOrchestrator, UploadStage};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Emitted after every state change so a view can re-read its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    AttendanceChanged { session_id: Option<SessionId> },
    LogsChanged { patient_id: Option<PatientId> },
    Error(String),
}

/// Composition root: one credentialed HTTP client, one event channel, and the
/// stores built on top of them.
pub struct ClientServices {
    pub attendance: Arc<AttendanceStore>,
    pub logs: Arc<LogPhotoStore>,
    pub uploads: UploadOrchestrator,
    events: broadcast::Sender<StoreEvent>,
}

impl ClientServices {
    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        let http = gateway::build_http_client(settings)?;
        let gateway: Arc<dyn RemoteGateway> =
            Arc::new(HttpGateway::new(http.clone(), &settings.api_base_url)?);
        let object_storage: Arc<dyn ObjectStorage> = Arc::new(HttpObjectStorage::new(http));
        Ok(Self::new(gateway, object_storage))
    }

    pub fn new(gateway: Arc<dyn RemoteGateway>, object_storage: Arc<dyn ObjectStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let attendance = AttendanceStore::with_events(Arc::clone(&gateway), events.clone());
        let logs = LogPhotoStore::with_events(Arc::clone(&gateway), events.clone());
        let uploads = UploadOrchestrator::new(gateway, object_storage, Arc::clone(&logs));
        Self {
            attendance,
            logs,
            uploads,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
