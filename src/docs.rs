use crate::api::admin::{CreateFaculty, CreateStudent, ReportResponse, UpdateSettings, UpdateUser};
use crate::api::attendance::MarkAttendance;
use crate::api::face::{
    CompleteRegistration, FrameResponse, MatchedUser, RecognizeFace, RecognizeResponse, RecognizedFace,
    RegistrationFrame, StartRegistration, StartRegistrationResponse, VerifyFace, VerifyResponse,
};
use crate::api::faculty::CreateSession;
use crate::api::student::{AttendanceStats, RegisterStudentFace, StudentProfile};
use crate::auth::handlers::{RegisterFaceReq, RegisterFaceResponse};
use crate::face::BoundingBox;
use crate::face::quality::FrameQuality;
use crate::model::attendance::Attendance;
use crate::model::role::Role;
use crate::model::session::{GeoPoint, SessionMode, SessionResponse};
use crate::model::settings::Settings;
use crate::model::user::UserResponse;
use crate::models::{LoginReqDto, LoginResponse};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Face Attendance API",
        version = "1.0.0",
        description = r#"
## Face Recognition Attendance

Backend for classroom attendance marked by face recognition.

### Key Features
- **Accounts**: admins manage faculty and students
- **Sessions**: faculty open webcam or geofenced mobile sessions
- **Face registration**: single image or guided multi-frame capture
- **Verification**: recognise a face against registered students and mark attendance once per session

### Security
All endpoints except login require a **JWT Bearer** token.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::register_face,

        crate::api::admin::list_faculty,
        crate::api::admin::create_faculty,
        crate::api::admin::update_faculty,
        crate::api::admin::delete_faculty,
        crate::api::admin::list_students,
        crate::api::admin::create_student,
        crate::api::admin::update_student,
        crate::api::admin::delete_student,
        crate::api::admin::get_settings,
        crate::api::admin::update_settings,
        crate::api::admin::reports,

        crate::api::faculty::list_sessions,
        crate::api::faculty::create_session,
        crate::api::faculty::get_session,
        crate::api::faculty::end_session,
        crate::api::faculty::session_attendance,

        crate::api::sessions::active_sessions,

        crate::api::student::me,
        crate::api::student::register_student_face,

        crate::api::attendance::list_attendance,
        crate::api::attendance::mark,

        crate::api::face::register_start,
        crate::api::face::register_frame,
        crate::api::face::register_complete,
        crate::api::face::verify,
        crate::api::face::recognize,
        crate::api::face::retrain
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            RegisterFaceReq,
            RegisterFaceResponse,
            Role,
            UserResponse,
            CreateFaculty,
            CreateStudent,
            UpdateUser,
            UpdateSettings,
            Settings,
            ReportResponse,
            CreateSession,
            SessionMode,
            GeoPoint,
            SessionResponse,
            Attendance,
            MarkAttendance,
            AttendanceStats,
            StudentProfile,
            RegisterStudentFace,
            BoundingBox,
            FrameQuality,
            StartRegistration,
            StartRegistrationResponse,
            RegistrationFrame,
            FrameResponse,
            CompleteRegistration,
            VerifyFace,
            VerifyResponse,
            MatchedUser,
            RecognizeFace,
            RecognizedFace,
            RecognizeResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and own face registration"),
        (name = "Admin", description = "Account management, settings and reports"),
        (name = "Faculty", description = "Attendance sessions"),
        (name = "Sessions", description = "Open sessions"),
        (name = "Student", description = "Student profile and assisted registration"),
        (name = "Attendance", description = "Attendance records and manual marking"),
        (name = "Face", description = "Face registration, verification and recognition"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
