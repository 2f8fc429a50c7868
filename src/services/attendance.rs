//! Attendance marking shared by the manual and face-verified paths.

use chrono::{Timelike, Utc};
use sqlx::MySqlPool;
use tracing::{info, warn};

use crate::error::{AppError, is_duplicate_key};
use crate::model::session::{GeoPoint, SESSION_COLUMNS, Session, SessionMode};
use crate::utils::geo::{haversine_km, is_inside_geofence};

#[derive(Debug)]
pub struct MarkRequest<'a> {
    pub session_id: &'a str,
    pub student_id: u64,
    pub student_name: &'a str,
    /// Falls back to the session's mode; must match it when given.
    pub mode: Option<SessionMode>,
    pub confidence: Option<f64>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked { attendance_id: u64 },
    AlreadyMarked,
}

pub async fn fetch_session(pool: &MySqlPool, session_id: &str) -> Result<Session, AppError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?");
    sqlx::query_as::<_, Session>(&sql)
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Session not found"))
}

pub fn ensure_open(session: &Session) -> Result<(), AppError> {
    if session.is_open() {
        Ok(())
    } else {
        Err(AppError::bad_request("Session ended"))
    }
}

/// Sessions with a geofence only accept callers inside it.
pub fn check_location(session: &Session, location: Option<GeoPoint>) -> Result<(), AppError> {
    let Some((centre, radius_m)) = session.geofence() else {
        return Ok(());
    };
    let user = location.ok_or_else(|| AppError::bad_request("Location required"))?;

    if is_inside_geofence(user, centre, radius_m) {
        Ok(())
    } else {
        warn!(
            session_id = %session.session_id,
            distance_m = haversine_km(user, centre) * 1000.0,
            radius_m,
            "Attendance rejected outside geofence"
        );
        Err(AppError::forbidden("Outside geofence"))
    }
}

pub fn resolve_mode(session: &Session, requested: Option<SessionMode>) -> Result<SessionMode, AppError> {
    let mode = session.mode();
    match requested {
        Some(requested) if requested != mode => Err(AppError::bad_request(format!(
            "Mode {requested} does not match the {mode} session"
        ))),
        _ => Ok(mode),
    }
}

/// Maps the insert result; the unique (session, student) key turns a second
/// mark into [`MarkOutcome::AlreadyMarked`].
fn insert_outcome(result: Result<u64, sqlx::Error>) -> Result<MarkOutcome, AppError> {
    match result {
        Ok(attendance_id) => Ok(MarkOutcome::Marked { attendance_id }),
        Err(e) if is_duplicate_key(&e) => Ok(MarkOutcome::AlreadyMarked),
        Err(e) => Err(e.into()),
    }
}

pub async fn mark_attendance(pool: &MySqlPool, req: MarkRequest<'_>) -> Result<MarkOutcome, AppError> {
    let session = fetch_session(pool, req.session_id).await?;
    ensure_open(&session)?;
    check_location(&session, req.location)?;
    let mode = resolve_mode(&session, req.mode)?;

    let now = Utc::now().naive_utc();
    let time = now.time().with_nanosecond(0).unwrap_or(now.time());

    let result = sqlx::query(
        r#"
        INSERT INTO attendances
            (session_id, student_id, student_name, subject, class_name, date, time, mode, confidence)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.session_id)
    .bind(req.student_id)
    .bind(req.student_name)
    .bind(&session.subject)
    .bind(&session.class_name)
    .bind(now.date())
    .bind(time)
    .bind(mode.as_ref())
    .bind(req.confidence)
    .execute(pool)
    .await
    .map(|done| done.last_insert_id());

    let outcome = insert_outcome(result)?;
    match outcome {
        MarkOutcome::Marked { attendance_id } => info!(
            attendance_id,
            session_id = %session.session_id,
            student_id = req.student_id,
            mode = %mode,
            "Attendance marked"
        ),
        MarkOutcome::AlreadyMarked => info!(
            session_id = %session.session_id,
            student_id = req.student_id,
            "Attendance already marked"
        ),
    }
    Ok(outcome)
}
