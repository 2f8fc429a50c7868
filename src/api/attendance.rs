use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::{
        attendance::{ATTENDANCE_COLUMNS, Attendance},
        role::Role,
        session::{GeoPoint, SessionMode},
    },
    services::attendance::{MarkOutcome, MarkRequest, mark_attendance},
    utils::db_utils::{SqlValue, bind_values},
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

const LIST_LIMIT: u32 = 200;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AttendanceQuery {
    /// Inclusive, `YYYY-MM-DD`.
    #[param(value_type = Option<String>, format = Date)]
    pub date_from: Option<NaiveDate>,
    /// Inclusive, `YYYY-MM-DD`.
    #[param(value_type = Option<String>, format = Date)]
    pub date_to: Option<NaiveDate>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub subject: Option<String>,
}

/// WHERE clause and its values. Students are always limited to themselves.
fn build_filter(auth: &AuthUser, query: &AttendanceQuery) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if auth.is_student() {
        conditions.push("student_id = ?");
        values.push(SqlValue::U64(auth.user_id));
    }
    if let Some(from) = query.date_from {
        conditions.push("date >= ?");
        values.push(SqlValue::Date(from));
    }
    if let Some(to) = query.date_to {
        conditions.push("date <= ?");
        values.push(SqlValue::Date(to));
    }
    if let Some(class) = query.class_name.as_deref().filter(|c| !c.is_empty()) {
        conditions.push("class_name = ?");
        values.push(SqlValue::String(class.to_string()));
    }
    if let Some(subject) = query.subject.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("subject = ?");
        values.push(SqlValue::String(subject.to_string()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, values)
}

/// Attendance records
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceQuery),
    responses((status = 200, description = "Newest first, at most 200", body = [Attendance])),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceQuery>,
) -> Result<HttpResponse, AppError> {
    let (where_clause, values) = build_filter(&auth, &query);
    let sql = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendances {where_clause} \
         ORDER BY date DESC, time DESC LIMIT {LIST_LIMIT}"
    );

    let rows = bind_values(sqlx::query_as::<_, Attendance>(&sql), values)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(rows))
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkAttendance {
    #[serde(default)]
    pub session_id: String,
    pub student_id: Option<u64>,
    #[serde(default)]
    pub student_name: String,
    /// `webcam` or `mobile`; must match the session when given.
    pub mode: Option<String>,
    pub location: Option<GeoPoint>,
}

/// Mark attendance manually
#[utoipa::path(
    post,
    path = "/api/attendance/mark",
    request_body = MarkAttendance,
    responses(
        (status = 201, description = "Attendance marked"),
        (status = 400, description = "Missing fields, unknown mode, session ended, or already marked (`alreadyMarked: true`)"),
        (status = 403, description = "Students may only mark themselves, or outside geofence"),
        (status = 404, description = "Session not found")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn mark(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<MarkAttendance>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Faculty, Role::Student])?;

    let student_id = match body.student_id {
        Some(id) if !body.session_id.trim().is_empty() && !body.student_name.trim().is_empty() => id,
        _ => return Err(AppError::bad_request("sessionId, studentId and studentName required")),
    };

    if auth.is_student() && student_id != auth.user_id {
        return Err(AppError::forbidden("Students can only mark their own attendance"));
    }

    let mode = match body.mode.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => Some(
            raw.to_lowercase()
                .parse::<SessionMode>()
                .map_err(|_| AppError::bad_request("mode must be webcam or mobile"))?,
        ),
        None => None,
    };

    let outcome = mark_attendance(
        pool.get_ref(),
        MarkRequest {
            session_id: body.session_id.trim(),
            student_id,
            student_name: body.student_name.trim(),
            mode,
            confidence: None,
            location: body.location,
        },
    )
    .await?;

    Ok(match outcome {
        MarkOutcome::Marked { attendance_id } => HttpResponse::Created().json(json!({
            "success": true,
            "message": "Attendance marked",
            "attendanceId": attendance_id
        })),
        MarkOutcome::AlreadyMarked => HttpResponse::BadRequest().json(json!({
            "error": "Attendance already marked",
            "alreadyMarked": true
        })),
    })
}
