//! Patient logs and the photos attached to them.

use std::sync::Arc;

use shared::{
    domain::{LogId, LogPhoto, PatientId, PatientLog, PhotoId},
    protocol::NewPatientLog,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{error::ClientResult, gateway::RemoteGateway, StoreEvent};

pub const FETCH_LOGS_FALLBACK: &str = "Failed to fetch logs";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogState {
    pub patient_id: Option<PatientId>,
    pub logs: Vec<PatientLog>,
    pub loading: bool,
    pub error: Option<String>,
}

impl LogState {
    pub fn log(&self, log_id: &LogId) -> Option<&PatientLog> {
        self.logs.iter().find(|log| &log.id == log_id)
    }

    pub fn photos(&self, log_id: &LogId) -> &[LogPhoto] {
        self.log(log_id)
            .map(|log| log.photos.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogAction {
    LoadStarted { patient_id: PatientId },
    LoadFailed { message: String },
    Hydrated { patient_id: PatientId, logs: Vec<PatientLog> },
    LogCreated { log: PatientLog },
    LogLoaded { log: PatientLog },
    LogDeleted { log_id: LogId },
    PhotoAdded { log_id: LogId, photo: LogPhoto },
    PhotoRemoved { log_id: LogId, photo_id: PhotoId },
}

/// Pure state transition. `patient_id` only changes together with `logs`, on
/// [`LogAction::Hydrated`], so a failed load keeps the previous patient's view.
pub fn reduce(mut state: LogState, action: LogAction) -> LogState {
    match action {
        LogAction::LoadStarted { .. } => {
            state.loading = true;
            state.error = None;
        }
        LogAction::LoadFailed { message } => {
            state.loading = false;
            state.error = Some(message);
        }
        LogAction::Hydrated { patient_id, logs } => {
            state.patient_id = Some(patient_id);
            state.logs = logs;
            state.loading = false;
        }
        LogAction::LogCreated { log } => {
            state.logs.push(log);
        }
        LogAction::LogLoaded { log } => {
            match state.logs.iter_mut().find(|existing| existing.id == log.id) {
                Some(existing) => *existing = log,
                None => state.logs.push(log),
            }
        }
        LogAction::LogDeleted { log_id } => {
            state.logs.retain(|log| log.id != log_id);
        }
        LogAction::PhotoAdded { log_id, photo } => {
            if let Some(log) = state.logs.iter_mut().find(|log| log.id == log_id) {
                log.photos.push(photo);
            }
        }
        LogAction::PhotoRemoved { log_id, photo_id } => {
            if let Some(log) = state.logs.iter_mut().find(|log| log.id == log_id) {
                log.photos.retain(|photo| photo.id != photo_id);
            }
        }
    }
    state
}

pub struct LogPhotoStore {
    gateway: Arc<dyn RemoteGateway>,
    state: Mutex<LogState>,
    events: broadcast::Sender<StoreEvent>,
}

impl LogPhotoStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Self::with_events(gateway, events)
    }

    pub fn with_events(
        gateway: Arc<dyn RemoteGateway>,
        events: broadcast::Sender<StoreEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            state: Mutex::new(LogState::default()),
            events,
        })
    }

    pub async fn snapshot(&self) -> LogState {
        self.state.lock().await.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn dispatch(&self, action: LogAction) {
        let error = match &action {
            LogAction::LoadFailed { message } => Some(message.clone()),
            _ => None,
        };
        let patient_id = {
            let mut guard = self.state.lock().await;
            let current = std::mem::take(&mut *guard);
            *guard = reduce(current, action);
            guard.patient_id.clone()
        };
        if let Some(message) = error {
            let _ = self.events.send(StoreEvent::Error(message));
        }
        let _ = self.events.send(StoreEvent::LogsChanged { patient_id });
    }

    /// Replaces the local log list with an already-fetched one. No network call.
    pub async fn hydrate_logs(&self, patient_id: PatientId, logs: Vec<PatientLog>) {
        self.dispatch(LogAction::Hydrated { patient_id, logs }).await;
    }

    pub async fn load_logs(&self, patient_id: &PatientId) -> ClientResult<()> {
        self.dispatch(LogAction::LoadStarted {
            patient_id: patient_id.clone(),
        })
        .await;
        match self.gateway.fetch_logs(patient_id).await {
            Ok(logs) => {
                self.hydrate_logs(patient_id.clone(), logs).await;
                Ok(())
            }
            Err(err) => {
                warn!("logs: fetch failed patient={patient_id} error={err}");
                self.dispatch(LogAction::LoadFailed {
                    message: err.message_or(FETCH_LOGS_FALLBACK),
                })
                .await;
                Err(err)
            }
        }
    }

    pub async fn get_log_by_id(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
    ) -> ClientResult<PatientLog> {
        let log = self.gateway.get_log(patient_id, log_id).await?;
        self.dispatch(LogAction::LogLoaded { log: log.clone() })
            .await;
        Ok(log)
    }

    pub async fn create_log(
        &self,
        patient_id: &PatientId,
        log: &NewPatientLog,
    ) -> ClientResult<PatientLog> {
        let created = self.gateway.create_log(patient_id, log).await?;
        info!("logs: created log={} patient={patient_id}", created.id);
        self.dispatch(LogAction::LogCreated {
            log: created.clone(),
        })
        .await;
        Ok(created)
    }

    pub async fn delete_log(&self, patient_id: &PatientId, log_id: &LogId) -> ClientResult<()> {
        self.gateway.delete_log(patient_id, log_id).await?;
        info!("logs: deleted log={log_id} patient={patient_id}");
        self.dispatch(LogAction::LogDeleted {
            log_id: log_id.clone(),
        })
        .await;
        Ok(())
    }

    /// Registers an uploaded object key against a log and appends the created photo.
    pub async fn add_photo_to_log(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
        key: &str,
    ) -> ClientResult<LogPhoto> {
        let photo = self
            .gateway
            .register_log_photo(patient_id, log_id, key)
            .await?;
        info!("logs: attached photo={} to log={log_id}", photo.id);
        self.dispatch(LogAction::PhotoAdded {
            log_id: log_id.clone(),
            photo: photo.clone(),
        })
        .await;
        Ok(photo)
    }

    /// Failures leave local state untouched and are returned to the caller as-is.
    pub async fn delete_photo_from_log(
        &self,
        patient_id: &PatientId,
        log_id: &LogId,
        photo_id: &PhotoId,
    ) -> ClientResult<()> {
        self.gateway
            .delete_log_photo(patient_id, log_id, photo_id)
            .await?;
        self.dispatch(LogAction::PhotoRemoved {
            log_id: log_id.clone(),
            photo_id: photo_id.clone(),
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/logs_tests.rs"]
mod tests;
