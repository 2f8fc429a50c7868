use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: u64,
    pub session_id: String,
    pub student_id: u64,
    pub student_name: String,
    pub subject: String,
    #[serde(rename = "class")]
    pub class_name: String,
    #[schema(value_type = String, format = Date, example = "2026-01-12")]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "09:31:07")]
    pub time: NaiveTime,
    pub mode: String,
    /// Match confidence in percent, present when marked by face verification.
    pub confidence: Option<f64>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: NaiveDateTime,
}

pub const ATTENDANCE_COLUMNS: &str =
    "id, session_id, student_id, student_name, subject, class_name, date, time, mode, confidence, created_at";
