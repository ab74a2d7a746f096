//! In-memory stand-in for the application API and object store.
//!
//! Behaves like the real backend for the calls the stores make: the
//! non-attending list is the session roster minus recorded attendances,
//! duplicate adds are rejected with 409 and unknown students with 404.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use shared::{
    domain::{
        AttendanceRecord, LogId, LogPhoto, NonAttendingStudent, PatientId, PatientLog, PhotoId,
        SessionId, StudentId,
    },
    protocol::{NewPatientLog, PresignedUpload},
};
use tokio::sync::Notify;

use crate::{
    error::{ClientError, ClientResult},
    gateway::{ObjectStorage, RemoteGateway},
};

pub(crate) fn student(id: i64) -> NonAttendingStudent {
    NonAttendingStudent {
        student_id: StudentId(id),
        first_name: format!("Student {id}"),
        email: format!("student{id:02}@example.edu"),
        phone_number: format!("555-01{id:02}"),
    }
}

pub(crate) fn record(session: i64, student: i64) -> AttendanceRecord {
    AttendanceRecord {
        student_id: StudentId(student),
        student_name: format!("Student {student}"),
        session_id: SessionId(session),
        session_name: format!("Session {session}"),
        lecturer_name: "Dr. Ada".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"),
        start_time: "09:00".to_string(),
        end_time: "10:30".to_string(),
    }
}

pub(crate) fn log(id: &str, photos: Vec<LogPhoto>) -> PatientLog {
    PatientLog {
        id: LogId::from(id),
        patient_id: Some(PatientId::from("p1")),
        title: Some(format!("log {id}")),
        notes: None,
        created_at: None,
        photos,
    }
}

pub(crate) fn photo(id: &str, key: &str) -> LogPhoto {
    LogPhoto {
        id: PhotoId::from(id),
        key: key.to_string(),
        url: None,
        created_at: None,
    }
}

/// A request parked inside the fake until the test releases it.
struct Hold {
    op: &'static str,
    session_id: SessionId,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

/// Test-side handles for a parked request.
pub(crate) struct HeldCall {
    pub(crate) reached: Arc<Notify>,
    pub(crate) release: Arc<Notify>,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    roster: Mutex<HashMap<SessionId, Vec<NonAttendingStudent>>>,
    attendances: Mutex<HashMap<SessionId, Vec<AttendanceRecord>>>,
    logs: Mutex<Vec<PatientLog>>,
    presigned: Mutex<Option<PresignedUpload>>,
    next_photo_id: Option<String>,
    failures: Mutex<HashMap<&'static str, (u16, Option<String>)>>,
    calls: Mutex<Vec<String>>,
    puts: Mutex<Vec<(String, String, Vec<u8>)>>,
    holds: Mutex<Vec<Hold>>,
    counter: AtomicU64,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_roster(self, session: i64, students: &[i64]) -> Self {
        self.roster
            .lock()
            .expect("roster")
            .insert(SessionId(session), students.iter().map(|id| student(*id)).collect());
        self
    }

    pub(crate) fn with_attending(self, session: i64, students: &[i64]) -> Self {
        self.attendances.lock().expect("attendances").insert(
            SessionId(session),
            students.iter().map(|id| record(session, *id)).collect(),
        );
        self
    }

    pub(crate) fn with_logs(self, logs: Vec<PatientLog>) -> Self {
        *self.logs.lock().expect("logs") = logs;
        self
    }

    pub(crate) fn with_presigned(self, url: &str, key: &str) -> Self {
        *self.presigned.lock().expect("presigned") = Some(PresignedUpload {
            url: url.to_string(),
            key: key.to_string(),
        });
        self
    }

    pub(crate) fn with_photo_id(mut self, id: &str) -> Self {
        self.next_photo_id = Some(id.to_string());
        self
    }

    pub(crate) fn fail(&self, op: &'static str, status: u16, message: Option<&str>) {
        self.failures
            .lock()
            .expect("failures")
            .insert(op, (status, message.map(str::to_string)));
    }

    /// Parks the next `op` call for `session` before it reads any data.
    /// `reached` fires once the call is parked; notify `release` to let it go.
    pub(crate) fn hold(&self, op: &'static str, session: i64) -> HeldCall {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.holds.lock().expect("holds").push(Hold {
            op,
            session_id: SessionId(session),
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        HeldCall { reached, release }
    }

    async fn wait_if_held(&self, op: &'static str, session_id: SessionId) {
        let hold = {
            let mut holds = self.holds.lock().expect("holds");
            holds
                .iter()
                .position(|h| h.op == op && h.session_id == session_id)
                .map(|index| holds.remove(index))
        };
        if let Some(hold) = hold {
            hold.reached.notify_one();
            hold.release.notified().await;
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) fn puts(&self) -> Vec<(String, String, Vec<u8>)> {
        self.puts.lock().expect("puts").clone()
    }

    pub(crate) fn server_attending(&self, session: i64) -> Vec<StudentId> {
        self.attendances
            .lock()
            .expect("attendances")
            .get(&SessionId(session))
            .map(|records| records.iter().map(|r| r.student_id).collect())
            .unwrap_or_default()
    }

    fn enter(&self, op: &'static str) -> ClientResult<()> {
        self.calls.lock().expect("calls").push(op.to_string());
        match self.failures.lock().expect("failures").get(op) {
            Some((status, message)) => Err(ClientError::from_status(
                StatusCode::from_u16(*status).expect("status"),
                message.clone(),
            )),
            None => Ok(()),
        }
    }

    fn rejected(status: u16, message: &str) -> ClientError {
        ClientError::Rejected {
            status,
            message: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl RemoteGateway for FakeBackend {
    async fn fetch_attendances(&self, session_id: SessionId) -> ClientResult<Vec<AttendanceRecord>> {
        self.enter("fetch_attendances")?;
        self.wait_if_held("fetch_attendances", session_id).await;
        Ok(self
            .attendances
            .lock()
            .expect("attendances")
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_non_attending_students(
        &self,
        session_id: SessionId,
    ) -> ClientResult<Vec<NonAttendingStudent>> {
        self.enter("fetch_non_attending_students")?;
        self.wait_if_held("fetch_non_attending_students", session_id).await;
        let attending = self.server_attending(session_id.0);
        Ok(self
            .roster
            .lock()
            .expect("roster")
            .get(&session_id)
            .map(|students| {
                students
                    .iter()
                    .filter(|s| !attending.contains(&s.student_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<AttendanceRecord> {
        self.enter("add_attendance")?;
        let enrolled = self
            .roster
            .lock()
            .expect("roster")
            .get(&session_id)
            .is_some_and(|students| students.iter().any(|s| s.student_id == student_id));
        if !enrolled {
            return Err(Self::rejected(404, "Student is not enrolled in this session"));
        }
        let mut attendances = self.attendances.lock().expect("attendances");
        let records = attendances.entry(session_id).or_default();
        if records.iter().any(|r| r.student_id == student_id) {
            return Err(Self::rejected(409, "Attendance already recorded"));
        }
        let created = record(session_id.0, student_id.0);
        records.push(created.clone());
        Ok(created)
    }

    async fn delete_attendance(
        &self,
        session_id: SessionId,
        student_id: StudentId,
    ) -> ClientResult<()> {
        self.enter("delete_attendance")?;
        let mut attendances = self.attendances.lock().expect("attendances");
        let records = attendances.entry(session_id).or_default();
        let before = records.len();
        records.retain(|r| r.student_id != student_id);
        if records.len() == before {
            return Err(Self::rejected(404, "Attendance not found"));
        }
        Ok(())
    }

    async fn request_presigned_url(
        &self,
        _file_name: &str,
        _file_type: &str,
    ) -> ClientResult<PresignedUpload> {
        self.enter("request_presigned_url")?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .presigned
            .lock()
            .expect("presigned")
            .clone()
            .unwrap_or_else(|| PresignedUpload {
                url: format!("https://bucket.example/uploads/{n}"),
                key: format!("uploads/{n}"),
            }))
    }

    async fn register_log_photo(
        &self,
        _patient_id: &PatientId,
        log_id: &LogId,
        key: &str,
    ) -> ClientResult<LogPhoto> {
        self.enter("register_log_photo")?;
        let id = self
            .next_photo_id
            .clone()
            .unwrap_or_else(|| format!("photo-{key}"));
        let created = photo(&id, key);
        let mut logs = self.logs.lock().expect("logs");
        match logs.iter_mut().find(|l| &l.id == log_id) {
            Some(l) => l.photos.push(created.clone()),
            None => return Err(Self::rejected(404, "Log not found")),
        }
        Ok(created)
    }

    async fn delete_log_photo(
        &self,
        _patient_id: &PatientId,
        log_id: &LogId,
        photo_id: &PhotoId,
    ) -> ClientResult<()> {
        self.enter("delete_log_photo")?;
        let mut logs = self.logs.lock().expect("logs");
        if let Some(l) = logs.iter_mut().find(|l| &l.id == log_id) {
            l.photos.retain(|p| &p.id != photo_id);
        }
        Ok(())
    }

    async fn fetch_logs(&self, _patient_id: &PatientId) -> ClientResult<Vec<PatientLog>> {
        self.enter("fetch_logs")?;
        Ok(self.logs.lock().expect("logs").clone())
    }

    async fn get_log(&self, _patient_id: &PatientId, log_id: &LogId) -> ClientResult<PatientLog> {
        self.enter("get_log")?;
        self.logs
            .lock()
            .expect("logs")
            .iter()
            .find(|l| &l.id == log_id)
            .cloned()
            .ok_or_else(|| Self::rejected(404, "Log not found"))
    }

    async fn create_log(
        &self,
        patient_id: &PatientId,
        new_log: &NewPatientLog,
    ) -> ClientResult<PatientLog> {
        self.enter("create_log")?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let created = PatientLog {
            id: LogId(format!("log-{n}")),
            patient_id: Some(patient_id.clone()),
            title: Some(new_log.title.clone()),
            notes: new_log.notes.clone(),
            created_at: None,
            photos: Vec::new(),
        };
        self.logs.lock().expect("logs").push(created.clone());
        Ok(created)
    }

    async fn delete_log(&self, _patient_id: &PatientId, log_id: &LogId) -> ClientResult<()> {
        self.enter("delete_log")?;
        self.logs.lock().expect("logs").retain(|l| &l.id != log_id);
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for FakeBackend {
    async fn put_object(&self, url: &str, content_type: &str, bytes: Vec<u8>) -> ClientResult<()> {
        self.enter("put_object")?;
        self.puts
            .lock()
            .expect("puts")
            .push((url.to_string(), content_type.to_string(), bytes));
        Ok(())
    }
}

pub(crate) mod mock_api {
    //! axum server speaking the application API and the object store, for
    //! exercising the real HTTP gateway.

    use std::sync::Arc;

    use axum::{
        body::Bytes,
        extract::{Path, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post, put},
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio::{net::TcpListener, sync::Mutex};

    pub(crate) const SESSION_COOKIE: &str = "sid=abc123";

    #[derive(Clone, Default)]
    pub(crate) struct MockApiState {
        pub object_base: String,
        pub add_requests: Arc<Mutex<Vec<(String, Option<String>, Option<String>)>>>,
        pub presign_requests: Arc<Mutex<Vec<Value>>>,
        pub register_requests: Arc<Mutex<Vec<Value>>>,
        pub puts: Arc<Mutex<Vec<(String, Option<String>, Vec<u8>)>>>,
        pub deletes: Arc<Mutex<Vec<String>>>,
    }

    fn header_text(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn attendance_json(session: i64, student: i64) -> Value {
        json!({
            "studentId": student,
            "studentName": format!("Student {student}"),
            "sessionId": session,
            "sessionName": format!("Session {session}"),
            "lecturerName": "Dr. Ada",
            "date": "2024-03-01",
            "startTime": "09:00",
            "endTime": "10:30"
        })
    }

    fn error_json(status: StatusCode, message: &str) -> Response {
        (
            status,
            Json(json!({ "message": message, "statusCode": status.as_u16() })),
        )
            .into_response()
    }

    async fn list_attendances(Path(session): Path<i64>) -> Response {
        (
            [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))],
            Json(json!({ "body": [attendance_json(session, 5)] })),
        )
            .into_response()
    }

    async fn list_non_attending(Path(_session): Path<i64>) -> Json<Value> {
        Json(json!({
            "body": [{
                "studentId": 6,
                "firstName": "Student 6",
                "email": "student06@example.edu",
                "phoneNumber": "555-0106"
            }]
        }))
    }

    async fn add_attendance(
        State(state): State<MockApiState>,
        Path(session): Path<i64>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let raw = String::from_utf8_lossy(&body).to_string();
        state.add_requests.lock().await.push((
            raw.clone(),
            header_text(&headers, header::CONTENT_TYPE),
            header_text(&headers, header::COOKIE),
        ));
        match raw.trim().parse::<i64>() {
            Ok(7) => error_json(StatusCode::CONFLICT, "Attendance already recorded"),
            Ok(student) => Json(json!({ "body": attendance_json(session, student) })).into_response(),
            Err(_) => error_json(StatusCode::BAD_REQUEST, "studentId must be a number"),
        }
    }

    async fn delete_attendance(
        State(state): State<MockApiState>,
        Path((session, student)): Path<(i64, i64)>,
    ) -> StatusCode {
        state
            .deletes
            .lock()
            .await
            .push(format!("attendance {session}/{student}"));
        StatusCode::NO_CONTENT
    }

    async fn presign(State(state): State<MockApiState>, Json(body): Json<Value>) -> Json<Value> {
        state.presign_requests.lock().await.push(body);
        Json(json!({
            "url": format!("{}/bucket/uploads/k1?X-Amz-Signature=abc", state.object_base),
            "key": "uploads/k1"
        }))
    }

    async fn put_object(
        State(state): State<MockApiState>,
        Path(key): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        if key.contains("denied") {
            return StatusCode::FORBIDDEN;
        }
        state.puts.lock().await.push((
            key,
            header_text(&headers, header::CONTENT_TYPE),
            body.to_vec(),
        ));
        StatusCode::OK
    }

    async fn register_photo(
        State(state): State<MockApiState>,
        Path((_patient, log)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Response {
        if log == "missing" {
            return error_json(StatusCode::NOT_FOUND, "Log not found");
        }
        let key = body["s3Keys"][0].as_str().unwrap_or_default().to_string();
        state.register_requests.lock().await.push(body);
        Json(json!({ "id": "ph1", "key": key })).into_response()
    }

    async fn delete_photo(
        Path((_patient, _log, _photo)): Path<(String, String, String)>,
    ) -> Response {
        error_json(StatusCode::INTERNAL_SERVER_ERROR, "storage offline")
    }

    async fn list_logs(Path(patient): Path<String>) -> Json<Value> {
        Json(json!([
            { "id": "log1", "patientId": patient, "title": "Intake", "photos": [] },
            { "id": "log2", "patientId": patient, "photos": [{ "id": "ph0", "key": "old" }] }
        ]))
    }

    async fn create_log(Path(patient): Path<String>, Json(body): Json<Value>) -> Json<Value> {
        Json(json!({
            "id": "log3",
            "patientId": patient,
            "title": body["title"].clone(),
            "notes": body["notes"].clone(),
            "photos": []
        }))
    }

    async fn get_log(Path((_patient, log)): Path<(String, String)>) -> Response {
        if log == "log1" {
            Json(json!({ "id": "log1", "title": "Intake" })).into_response()
        } else {
            error_json(StatusCode::NOT_FOUND, "Log not found")
        }
    }

    async fn delete_log(
        State(state): State<MockApiState>,
        Path((patient, log)): Path<(String, String)>,
    ) -> StatusCode {
        state.deletes.lock().await.push(format!("log {patient}/{log}"));
        StatusCode::NO_CONTENT
    }

    pub(crate) async fn spawn_mock_api() -> anyhow::Result<(String, MockApiState)> {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let base = format!("http://{addr}");
        let state = MockApiState {
            object_base: base.clone(),
            ..MockApiState::default()
        };
        let app = Router::new()
            .route("/attendances/session/:session_id", get(list_attendances))
            .route(
                "/attendances/non-attending-students/session/:session_id",
                get(list_non_attending),
            )
            .route("/attendances/add/session/:session_id", post(add_attendance))
            .route(
                "/attendances/delete/session/:session_id/student/:student_id",
                axum::routing::delete(delete_attendance),
            )
            .route("/s3/generate-presigned-url", post(presign))
            .route("/bucket/*key", put(put_object))
            .route("/patients/:patient_id/logs", get(list_logs).post(create_log))
            .route(
                "/patients/:patient_id/logs/:log_id",
                get(get_log).delete(delete_log),
            )
            .route(
                "/patients/:patient_id/logs/:log_id/photos",
                post(register_photo),
            )
            .route(
                "/patients/:patient_id/logs/:log_id/photos/:photo_id",
                axum::routing::delete(delete_photo),
            )
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((base, state))
    }
}
