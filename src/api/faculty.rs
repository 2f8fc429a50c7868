use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::{
        attendance::{ATTENDANCE_COLUMNS, Attendance},
        session::{GeoPoint, SESSION_COLUMNS, Session, SessionMode, SessionResponse},
        settings::Settings,
    },
    utils::geo::is_valid_point,
};
use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

const SESSION_LIST_LIMIT: u32 = 50;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    #[serde(default, rename = "class")]
    #[schema(example = "CSE-A")]
    pub class_name: String,
    #[serde(default)]
    #[schema(example = "Computer Networks")]
    pub subject: String,
    /// `webcam` or `mobile`; anything else is treated as webcam.
    #[schema(example = "mobile")]
    pub mode: Option<String>,
    pub gps_location: Option<GeoPoint>,
    /// Metres.
    #[schema(example = 100.0)]
    pub gps_radius: Option<f64>,
}

#[derive(Debug, PartialEq)]
struct ValidSession {
    mode: SessionMode,
    geofence: Option<(GeoPoint, f64)>,
}

/// Checks that need no database access.
fn validate_new_session(body: &CreateSession) -> Result<ValidSession, AppError> {
    if body.class_name.trim().is_empty() || body.subject.trim().is_empty() {
        return Err(AppError::bad_request("Class and subject required"));
    }

    let mode = SessionMode::parse_lenient(body.mode.as_deref());
    if mode == SessionMode::Webcam {
        return Ok(ValidSession { mode, geofence: None });
    }

    let centre = body
        .gps_location
        .filter(|p| is_valid_point(*p))
        .ok_or_else(|| AppError::bad_request("GPS location required for mobile mode"))?;
    let radius = body
        .gps_radius
        .filter(|r| r.is_finite() && *r > 0.0)
        .ok_or_else(|| AppError::bad_request("GPS radius must be a positive number"))?;

    Ok(ValidSession {
        mode,
        geofence: Some((centre, radius)),
    })
}

async fn fetch_own_session(pool: &MySqlPool, session_id: &str, faculty_id: u64) -> Result<Session, AppError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ? AND faculty_id = ?");
    sqlx::query_as::<_, Session>(&sql)
        .bind(session_id)
        .bind(faculty_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Session not found"))
}

/// List own sessions
#[utoipa::path(
    get,
    path = "/api/faculty/sessions",
    responses((status = 200, description = "Newest first, at most 50", body = [SessionResponse])),
    tag = "Faculty",
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_faculty()?;

    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE faculty_id = ? ORDER BY start_time DESC LIMIT ?"
    );
    let rows = sqlx::query_as::<_, Session>(&sql)
        .bind(auth.user_id)
        .bind(SESSION_LIST_LIMIT)
        .fetch_all(pool.get_ref())
        .await?;

    let data: Vec<SessionResponse> = rows.into_iter().map(SessionResponse::from).collect();
    Ok(HttpResponse::Ok().json(data))
}

/// Start a session
#[utoipa::path(
    post,
    path = "/api/faculty/sessions",
    request_body = CreateSession,
    responses(
        (status = 201, description = "Session started", body = SessionResponse),
        (status = 400, description = "Missing class/subject or invalid geofence"),
        (status = 403, description = "Mobile mode disabled by admin")
    ),
    tag = "Faculty",
    security(("bearer_auth" = []))
)]
pub async fn create_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CreateSession>,
) -> Result<HttpResponse, AppError> {
    auth.require_faculty()?;
    let valid = validate_new_session(&body)?;

    if valid.mode == SessionMode::Mobile && !Settings::load(pool.get_ref()).await?.mobile_gps_enabled {
        return Err(AppError::forbidden("Mobile GPS mode is disabled by admin"));
    }

    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        faculty_id: auth.user_id,
        class_name: body.class_name.trim().to_string(),
        subject: body.subject.trim().to_string(),
        mode: valid.mode.to_string(),
        start_time: Utc::now().naive_utc(),
        end_time: None,
        gps_lat: valid.geofence.map(|(c, _)| c.lat),
        gps_lng: valid.geofence.map(|(c, _)| c.lng),
        gps_radius: valid.geofence.map(|(_, r)| r),
    };

    sqlx::query(
        r#"
        INSERT INTO sessions
            (session_id, faculty_id, class_name, subject, mode, start_time, gps_lat, gps_lng, gps_radius)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.session_id)
    .bind(session.faculty_id)
    .bind(&session.class_name)
    .bind(&session.subject)
    .bind(&session.mode)
    .bind(session.start_time)
    .bind(session.gps_lat)
    .bind(session.gps_lng)
    .bind(session.gps_radius)
    .execute(pool.get_ref())
    .await?;

    info!(
        session_id = %session.session_id,
        faculty_id = auth.user_id,
        mode = %session.mode,
        "Session started"
    );

    Ok(HttpResponse::Created().json(SessionResponse::from(session)))
}

/// Own session with attendance totals
#[utoipa::path(
    get,
    path = "/api/faculty/sessions/{id}",
    params(("id", Path, description = "Session id")),
    responses(
        (status = 200, description = "Session with presentCount and totalStudents", body = SessionResponse),
        (status = 404, description = "Session not found")
    ),
    tag = "Faculty",
    security(("bearer_auth" = []))
)]
pub async fn get_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    auth.require_faculty()?;
    let session = fetch_own_session(pool.get_ref(), &path, auth.user_id).await?;

    let present_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attendances WHERE session_id = ?")
            .bind(&session.session_id)
            .fetch_one(pool.get_ref())
            .await?;

    let total_students = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE role = 'student' AND class_name = ?",
    )
    .bind(&session.class_name)
    .fetch_one(pool.get_ref())
    .await?;

    let mut response = SessionResponse::from(session);
    response.present_count = Some(present_count);
    response.total_students = Some(total_students);
    Ok(HttpResponse::Ok().json(response))
}

/// End own session
#[utoipa::path(
    post,
    path = "/api/faculty/sessions/{id}/end",
    params(("id", Path, description = "Session id")),
    responses(
        (status = 200, description = "Session ended", body = SessionResponse),
        (status = 404, description = "Session not found or already ended")
    ),
    tag = "Faculty",
    security(("bearer_auth" = []))
)]
pub async fn end_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    auth.require_faculty()?;

    let done = sqlx::query(
        "UPDATE sessions SET end_time = ? WHERE session_id = ? AND faculty_id = ? AND end_time IS NULL",
    )
    .bind(Utc::now().naive_utc())
    .bind(path.as_str())
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    if done.rows_affected() == 0 {
        return Err(AppError::not_found("Session not found or already ended"));
    }
    info!(session_id = %path, faculty_id = auth.user_id, "Session ended");

    let session = fetch_own_session(pool.get_ref(), &path, auth.user_id).await?;
    Ok(HttpResponse::Ok().json(SessionResponse::from(session)))
}

/// Attendance recorded in own session
#[utoipa::path(
    get,
    path = "/api/faculty/sessions/{id}/attendance",
    params(("id", Path, description = "Session id")),
    responses(
        (status = 200, description = "Records in marking order", body = [Attendance]),
        (status = 404, description = "Session not found")
    ),
    tag = "Faculty",
    security(("bearer_auth" = []))
)]
pub async fn session_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    auth.require_faculty()?;
    let session = fetch_own_session(pool.get_ref(), &path, auth.user_id).await?;

    let sql = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendances WHERE session_id = ? ORDER BY created_at ASC, id ASC"
    );
    let rows = sqlx::query_as::<_, Attendance>(&sql)
        .bind(&session.session_id)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(rows))
}
