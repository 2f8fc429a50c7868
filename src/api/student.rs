use crate::{
    auth::{auth::AuthUser, handlers::RegisterFaceResponse},
    config::Config,
    error::AppError,
    face::{engine::FaceEngine, gallery::FaceGallery},
    model::{role::Role, user::UserResponse},
    services::{face_enrollment::Enrollment, users},
    storage::blob_store::BlobStore,
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total: i64,
    pub by_subject: BTreeMap<String, i64>,
    pub by_class: BTreeMap<String, i64>,
}

#[derive(Serialize, ToSchema)]
pub struct StudentProfile {
    pub user: UserResponse,
    pub stats: AttendanceStats,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudentFace {
    pub student_id: Option<u64>,
    #[serde(default)]
    pub image: String,
}

async fn count_by(pool: &MySqlPool, student_id: u64, column: &str) -> Result<BTreeMap<String, i64>, sqlx::Error> {
    let sql = format!("SELECT {column}, COUNT(*) FROM attendances WHERE student_id = ? GROUP BY {column}");
    let rows = sqlx::query_as::<_, (String, i64)>(&sql)
        .bind(student_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Own profile and attendance stats
#[utoipa::path(
    get,
    path = "/api/student/me",
    responses((status = 200, description = "Profile with attendance stats", body = StudentProfile)),
    tag = "Student",
    security(("bearer_auth" = []))
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Student])?;
    let pool = pool.get_ref();

    let user = users::require_user(pool, auth.user_id).await?;
    let by_subject = count_by(pool, user.id, "subject").await?;
    let by_class = count_by(pool, user.id, "class_name").await?;

    Ok(HttpResponse::Ok().json(StudentProfile {
        stats: AttendanceStats {
            total: by_subject.values().sum(),
            by_subject,
            by_class,
        },
        user: UserResponse::from(user),
    }))
}

/// Register a student's face on their behalf
#[utoipa::path(
    post,
    path = "/api/student/register-face",
    request_body = RegisterStudentFace,
    responses(
        (status = 200, description = "Face stored", body = RegisterFaceResponse),
        (status = 400, description = "No face, invalid image or duplicate"),
        (status = 403, description = "Already registered"),
        (status = 404, description = "Student not found")
    ),
    tag = "Student",
    security(("bearer_auth" = []))
)]
#[allow(clippy::too_many_arguments)]
pub async fn register_student_face(
    auth: AuthUser,
    body: web::Json<RegisterStudentFace>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    engine: web::Data<dyn FaceEngine>,
    gallery: web::Data<FaceGallery>,
    blobs: web::Data<BlobStore>,
) -> Result<HttpResponse, AppError> {
    auth.require_faculty()?;
    let student_id = body
        .student_id
        .ok_or_else(|| AppError::bad_request("studentId required"))?;

    let student = match users::find_by_id(pool.get_ref(), student_id).await? {
        Some(u) if u.role() == Some(Role::Student) => u,
        _ => return Err(AppError::not_found("Student not found")),
    };

    let enrollment = Enrollment {
        pool: pool.get_ref(),
        engine: engine.get_ref(),
        gallery: gallery.get_ref(),
        blobs: blobs.get_ref(),
        duplicate_threshold: config.duplicate_threshold,
    };
    let enrolled = enrollment.from_image(&student, &body.image).await?;

    tracing::info!(student_id, faculty_id = auth.user_id, "Student face registered by faculty");

    Ok(HttpResponse::Ok().json(RegisterFaceResponse {
        success: true,
        message: "Face registered successfully".into(),
        face_image_url: enrolled.image_url,
        bbox: enrolled.bbox,
    }))
}
