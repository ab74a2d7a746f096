//! Attendance reconciliation for one session.
//!
//! The store keeps two derived collections for the session on screen: the
//! students with an attendance record and the enrolled students without one.
//! Every settled state keeps the two student-id sets disjoint. Remote calls
//! happen in [`AttendanceStore`]; all state changes go through [`reduce`].
//!
//! Each state carries a generation. It moves forward whenever the view is
//! cleared or switches session, and every remote result is tagged with the
//! generation its request started under. Results from an older generation
//! are dropped.

use std::sync::Arc;

use shared::domain::{AttendanceRecord, NonAttendingStudent, SessionId, StudentId};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::ClientResult,
    gateway::RemoteGateway,
    StoreEvent,
};

pub const FETCH_ATTENDANCES_FALLBACK: &str = "Failed to fetch attendances";
pub const FETCH_NON_ATTENDING_FALLBACK: &str = "Failed to fetch non-attending students";
pub const ADD_ATTENDANCE_FALLBACK: &str = "Failed to add attendance";
pub const DELETE_ATTENDANCE_FALLBACK: &str = "Failed to delete attendance";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceState {
    pub session_id: Option<SessionId>,
    pub attendances: Vec<AttendanceRecord>,
    pub non_attending_students: Vec<NonAttendingStudent>,
    pub loading_attendances: bool,
    pub loading_non_attending: bool,
    pub error: Option<String>,
    pub creating: bool,
    pub deleting: bool,
    pub generation: u64,
}

impl AttendanceState {
    pub fn is_loading(&self) -> bool {
        self.loading_attendances || self.loading_non_attending
    }

    pub fn is_attending(&self, student_id: StudentId) -> bool {
        self.attendances
            .iter()
            .any(|record| record.student_id == student_id)
    }

    /// Adopts `session_id`. Switching away from another session (or from no
    /// session) drops both lists and starts a new generation.
    fn focus_session(&mut self, session_id: SessionId) {
        if self.session_id != Some(session_id) {
            self.session_id = Some(session_id);
            self.attendances.clear();
            self.non_attending_students.clear();
            self.loading_attendances = false;
            self.loading_non_attending = false;
            self.generation += 1;
        }
    }

    fn holds_session(&self, session_id: SessionId) -> bool {
        self.session_id.is_none() || self.session_id == Some(session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceAction {
    FetchAttendancesStarted {
        session_id: SessionId,
    },
    FetchAttendancesSucceeded {
        generation: u64,
        session_id: SessionId,
        attendances: Vec<AttendanceRecord>,
    },
    FetchAttendancesFailed {
        generation: u64,
        message: String,
    },
    FetchNonAttendingStarted {
        session_id: SessionId,
    },
    FetchNonAttendingSucceeded {
        generation: u64,
        session_id: SessionId,
        students: Vec<NonAttendingStudent>,
    },
    FetchNonAttendingFailed {
        generation: u64,
        message: String,
    },
    AddStarted,
    AddSucceeded {
        generation: u64,
        record: AttendanceRecord,
    },
    AddFailed {
        generation: u64,
        message: String,
    },
    DeleteStarted,
    /// The record is gone on the server; `deleting` stays set until
    /// [`AttendanceAction::DeleteSettled`] arrives after the refetch.
    DeleteSucceeded {
        generation: u64,
        session_id: SessionId,
        student_id: StudentId,
    },
    DeleteFailed {
        generation: u64,
        message: String,
    },
    DeleteSettled {
        generation: u64,
    },
    Clear,
}

impl AttendanceAction {
    fn failure_message(&self) -> Option<&str> {
        match self {
            Self::FetchAttendancesFailed { message, .. }
            | Self::FetchNonAttendingFailed { message, .. }
            | Self::AddFailed { message, .. }
            | Self::DeleteFailed { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }

    /// Generation the originating request started under. `None` for actions
    /// that are not remote results.
    fn generation(&self) -> Option<u64> {
        match self {
            Self::FetchAttendancesSucceeded { generation, .. }
            | Self::FetchAttendancesFailed { generation, .. }
            | Self::FetchNonAttendingSucceeded { generation, .. }
            | Self::FetchNonAttendingFailed { generation, .. }
            | Self::AddSucceeded { generation, .. }
            | Self::AddFailed { generation, .. }
            | Self::DeleteSucceeded { generation, .. }
            | Self::DeleteFailed { generation, .. }
            | Self::DeleteSettled { generation } => Some(*generation),
            _ => None,
        }
    }

    /// Whether `state` still describes the view this action was issued for.
    fn applies_to(&self, state: &AttendanceState) -> bool {
        let session_matches = match self {
            Self::FetchAttendancesSucceeded { session_id, .. }
            | Self::FetchNonAttendingSucceeded { session_id, .. } => {
                state.session_id == Some(*session_id)
            }
            _ => true,
        };
        session_matches
            && self
                .generation()
                .map_or(true, |generation| generation == state.generation)
    }
}

/// Pure state transition. A fetched list replacing one collection evicts its
/// student ids from the other one, so the newest server answer wins. Results
/// for a view that has since been cleared or switched leave `state` as is.
pub fn reduce(mut state: AttendanceState, action: AttendanceAction) -> AttendanceState {
    if !action.applies_to(&state) {
        return state;
    }
    match action {
        AttendanceAction::FetchAttendancesStarted { session_id } => {
            state.focus_session(session_id);
            state.loading_attendances = true;
            state.error = None;
        }
        AttendanceAction::FetchAttendancesSucceeded { attendances, .. } => {
            state.loading_attendances = false;
            state
                .non_attending_students
                .retain(|student| !attendances.iter().any(|r| r.student_id == student.student_id));
            state.attendances = attendances;
        }
        AttendanceAction::FetchAttendancesFailed { message, .. } => {
            state.loading_attendances = false;
            state.error = Some(message);
        }
        AttendanceAction::FetchNonAttendingStarted { session_id } => {
            state.focus_session(session_id);
            state.loading_non_attending = true;
            state.error = None;
        }
        AttendanceAction::FetchNonAttendingSucceeded { students, .. } => {
            state.loading_non_attending = false;
            state
                .attendances
                .retain(|record| !students.iter().any(|s| s.student_id == record.student_id));
            state.non_attending_students = students;
        }
        AttendanceAction::FetchNonAttendingFailed { message, .. } => {
            state.loading_non_attending = false;
            state.error = Some(message);
        }
        AttendanceAction::AddStarted => {
            state.creating = true;
            state.error = None;
        }
        AttendanceAction::AddSucceeded { record, .. } => {
            state.creating = false;
            if state.holds_session(record.session_id) {
                state.session_id = Some(record.session_id);
                state
                    .non_attending_students
                    .retain(|student| student.student_id != record.student_id);
                if !state.is_attending(record.student_id) {
                    state.attendances.push(record);
                }
            }
        }
        AttendanceAction::AddFailed { message, .. } => {
            state.creating = false;
            state.error = Some(message);
        }
        AttendanceAction::DeleteStarted => {
            state.deleting = true;
            state.error = None;
        }
        AttendanceAction::DeleteSucceeded {
            session_id,
            student_id,
            ..
        } => {
            state.attendances.retain(|record| {
                !(record.session_id == session_id && record.student_id == student_id)
            });
        }
        AttendanceAction::DeleteFailed { message, .. } => {
            state.deleting = false;
            state.error = Some(message);
        }
        AttendanceAction::DeleteSettled { .. } => {
            state.deleting = false;
        }
        AttendanceAction::Clear => {
            state = AttendanceState {
                generation: state.generation + 1,
                ..AttendanceState::default()
            };
        }
    }
    state
}

pub struct AttendanceStore {
    gateway: Arc<dyn RemoteGateway>,
    state: Mutex<AttendanceState>,
    events: broadcast::Sender<StoreEvent>,
}

impl AttendanceStore {
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
            state: Mutex::new(AttendanceState::default()),
            events,
        })
    }

    pub async fn snapshot(&self) -> AttendanceState {
        self.state.lock().await.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Applies `action` and returns the generation of the resulting state.
    /// Results for a stale view are dropped without notifying subscribers.
    pub(crate) async fn dispatch(&self, action: AttendanceAction) -> u64 {
        let failure = action.failure_message().map(str::to_string);
        let (applied, session_id, generation) = {
            let mut guard = self.state.lock().await;
            let applied = action.applies_to(&guard);
            let current = std::mem::take(&mut *guard);
            *guard = reduce(current, action);
            (applied, guard.session_id, guard.generation)
        };
        if !applied {
            debug!("attendance: dropped stale result generation={generation}");
            return generation;
        }
        if let Some(message) = failure {
            let _ = self.events.send(StoreEvent::Error(message));
        }
        let _ = self
            .events
            .send(StoreEvent::AttendanceChanged { session_id });
        generation
    }

    /// Replaces the attending list with the server's list for `session_id`.
    /// On failure the previous list is kept and `error` is set.
    pub async fn fetch_attendances_by_session(&self, session_id: SessionId) -> ClientResult<()> {
        let generation = self
            .dispatch(AttendanceAction::FetchAttendancesStarted { session_id })
            .await;
        match self.gateway.fetch_attendances(session_id).await {
            Ok(attendances) => {
                info!(
                    "attendance: loaded {} records for session={}",
                    attendances.len(),
                    session_id.0
                );
                self.dispatch(AttendanceAction::FetchAttendancesSucceeded {
                    generation,
                    session_id,
                    attendances,
                })
                .await;
                Ok(())
            }
            Err(err) => {
                warn!("attendance: fetch failed session={} error={err}", session_id.0);
                self.dispatch(AttendanceAction::FetchAttendancesFailed {
                    generation,
                    message: err.message_or(FETCH_ATTENDANCES_FALLBACK),
                })
                .await;
                Err(err)
            }
        }
    }

    pub async fn fetch_non_attending_students(&self, session_id: SessionId) -> ClientResult<()> {
        self.refresh_non_attending(session_id).await.1
    }

    /// Fetches the non-attending list and reports the generation it was
    /// requested under alongside the outcome.
    async fn refresh_non_attending(&self, session_id: SessionId) -> (u64, ClientResult<()>) {
        let generation = self
            .dispatch(AttendanceAction::FetchNonAttendingStarted { session_id })
            .await;
        let outcome = match self.gateway.fetch_non_attending_students(session_id).await {
            Ok(students) => {
                info!(
                    "attendance: loaded {} non-attending students for session={}",
                    students.len(),
                    session_id.0
                );
                self.dispatch(AttendanceAction::FetchNonAttendingSucceeded {
                    generation,
                    session_id,
                    students,
                })
                .await;
                Ok(())
            }
            Err(err) => {
                warn!(
                    "attendance: non-attending fetch failed session={} error={err}",
                    session_id.0
                );
                self.dispatch(AttendanceAction::FetchNonAttendingFailed {
                    generation,
                    message: err.message_or(FETCH_NON_ATTENDING_FALLBACK),
                })
                .await;
                Err(err)
            }
        };
        (generation, outcome)
    }

    /// Records `student_id` as present. Both lists change together on success;
    /// neither changes on failure.
    pub async fn add_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<AttendanceRecord> {
        let generation = self.dispatch(AttendanceAction::AddStarted).await;
        match self.gateway.add_attendance(session_id, student_id).await {
            Ok(record) => {
                info!(
                    "attendance: added student={} session={}",
                    student_id.0, session_id.0
                );
                self.dispatch(AttendanceAction::AddSucceeded {
                    generation,
                    record: record.clone(),
                })
                .await;
                Ok(record)
            }
            Err(err) => {
                warn!(
                    "attendance: add failed student={} session={} error={err}",
                    student_id.0, session_id.0
                );
                self.dispatch(AttendanceAction::AddFailed {
                    generation,
                    message: err.message_or(ADD_ATTENDANCE_FALLBACK),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Removes the record locally, then refetches the non-attending list; the
    /// removed student's roster entry cannot be rebuilt on the client.
    /// Returns only after both steps have settled, and `deleting` stays set
    /// until then. The refetch is skipped if the view moved on meanwhile.
    pub async fn delete_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<()> {
        let generation = self.dispatch(AttendanceAction::DeleteStarted).await;
        if let Err(err) = self.gateway.delete_attendance(session_id, student_id).await {
            warn!(
                "attendance: delete failed student={} session={} error={err}",
                student_id.0, session_id.0
            );
            self.dispatch(AttendanceAction::DeleteFailed {
                generation,
                message: err.message_or(DELETE_ATTENDANCE_FALLBACK),
            })
            .await;
            return Err(err);
        }

        info!(
            "attendance: deleted student={} session={}",
            student_id.0, session_id.0
        );
        let current = self
            .dispatch(AttendanceAction::DeleteSucceeded {
                generation,
                session_id,
                student_id,
            })
            .await;
        if current != generation {
            debug!(
                "attendance: view changed during delete, skipping refetch session={}",
                session_id.0
            );
            return Ok(());
        }
        let (generation, outcome) = self.refresh_non_attending(session_id).await;
        self.dispatch(AttendanceAction::DeleteSettled { generation })
            .await;
        outcome
    }

    pub async fn clear_data(&self) {
        self.dispatch(AttendanceAction::Clear).await;
    }
}

#[cfg(test)]
#[path = "tests/attendance_tests.rs"]
mod tests;
