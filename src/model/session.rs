use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Webcam,
    Mobile,
}

impl SessionMode {
    /// Unknown or missing modes fall back to webcam.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.trim().to_lowercase().parse().ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct GeoPoint {
    #[schema(example = 12.9716)]
    pub lat: f64,
    #[schema(example = 77.5946)]
    pub lng: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub session_id: String,
    pub faculty_id: u64,
    pub class_name: String,
    pub subject: String,
    pub mode: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub gps_radius: Option<f64>,
}

pub const SESSION_COLUMNS: &str =
    "session_id, faculty_id, class_name, subject, mode, start_time, end_time, gps_lat, gps_lng, gps_radius";

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn mode(&self) -> SessionMode {
        SessionMode::parse_lenient(Some(&self.mode))
    }

    /// Geofence centre and radius in metres, present only for mobile sessions.
    pub fn geofence(&self) -> Option<(GeoPoint, f64)> {
        match (self.gps_lat, self.gps_lng, self.gps_radius) {
            (Some(lat), Some(lng), Some(radius)) => Some((GeoPoint { lat, lng }, radius)),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[schema(example = "7d1f4f0e-2b7a-4c64-9a55-1c7b0c9e2f10")]
    pub id: String,
    pub faculty_id: u64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub subject: String,
    pub mode: String,
    #[schema(value_type = String, format = DateTime)]
    pub start_time: NaiveDateTime,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_time: Option<NaiveDateTime>,
    pub gps_location: Option<GeoPoint>,
    pub gps_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_students: Option<i64>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        let gps_location = s.geofence().map(|(centre, _)| centre);
        Self {
            id: s.session_id,
            faculty_id: s.faculty_id,
            class_name: s.class_name,
            subject: s.subject,
            mode: s.mode,
            start_time: s.start_time,
            end_time: s.end_time,
            gps_location,
            gps_radius: s.gps_radius,
            present_count: None,
            total_students: None,
        }
    }
}

#[cfg(test)]
pub fn sample_session(mode: SessionMode) -> Session {
    let start = chrono::DateTime::from_timestamp(1_767_258_000, 0).unwrap().naive_utc();
    let mobile = mode == SessionMode::Mobile;
    Session {
        session_id: "sess-1".into(),
        faculty_id: 2,
        class_name: "CSE-A".into(),
        subject: "Networks".into(),
        mode: mode.to_string(),
        start_time: start,
        end_time: None,
        gps_lat: mobile.then_some(12.9716),
        gps_lng: mobile.then_some(77.5946),
        gps_radius: mobile.then_some(100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_modes_fall_back_to_webcam() {
        assert_eq!(SessionMode::parse_lenient(Some(" Mobile ")), SessionMode::Mobile);
        assert_eq!(SessionMode::parse_lenient(Some("hologram")), SessionMode::Webcam);
        assert_eq!(SessionMode::parse_lenient(None), SessionMode::Webcam);
    }

    #[test]
    fn geofence_requires_all_three_fields() {
        assert!(sample_session(SessionMode::Mobile).geofence().is_some());
        let mut s = sample_session(SessionMode::Mobile);
        s.gps_radius = None;
        assert!(s.geofence().is_none());
    }

    #[test]
    fn response_uses_session_id_as_id() {
        let json = serde_json::to_value(SessionResponse::from(sample_session(SessionMode::Webcam))).unwrap();
        assert_eq!(json["id"], "sess-1");
        assert_eq!(json["class"], "CSE-A");
        assert!(json["gpsLocation"].is_null());
        assert!(json.get("presentCount").is_none());
    }
}
