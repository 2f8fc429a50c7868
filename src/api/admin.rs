use crate::{
    auth::auth::AuthUser,
    error::AppError,
    face::gallery::FaceGallery,
    model::{role::Role, settings::Settings, user::UserResponse},
    services::users::{self, NewUser, UserChanges, role_label},
};
use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

pub const DEFAULT_STUDENT_PASSWORD: &str = "student123";

#[derive(Deserialize, ToSchema)]
pub struct CreateFaculty {
    #[serde(default)]
    #[schema(example = "Dr. Meera Iyer")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "meera@example.edu", format = "email")]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudent {
    #[serde(default)]
    #[schema(example = "Asha Rao")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "asha@example.edu", format = "email")]
    pub email: String,
    /// Defaults to `student123`.
    pub password: Option<String>,
    #[serde(rename = "class")]
    #[schema(example = "CSE-A")]
    pub class_name: Option<String>,
    #[schema(example = "21CS042")]
    pub roll_no: Option<String>,
}

/// Blank or missing fields are left unchanged.
#[derive(Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub roll_no: Option<String>,
}

impl UpdateUser {
    fn changes(&self) -> UserChanges<'_> {
        UserChanges {
            name: self.name.as_deref(),
            email: self.email.as_deref(),
            password: self.password.as_deref(),
            class_name: self.class_name.as_deref(),
            roll_no: self.roll_no.as_deref(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    pub mobile_gps_enabled: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub total_faculty: i64,
    pub total_students: i64,
    pub today_attendance: i64,
    pub mobile_gps_enabled: bool,
}

fn require_fields(fields: &[&str], message: &str) -> Result<(), AppError> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        Err(AppError::bad_request(message))
    } else {
        Ok(())
    }
}

async fn list(pool: &MySqlPool, role: Role) -> Result<HttpResponse, AppError> {
    let rows = users::list_by_role(pool, role).await?;
    let data: Vec<UserResponse> = rows.into_iter().map(UserResponse::from).collect();
    Ok(HttpResponse::Ok().json(data))
}

// Name and roll number are served from the gallery, so it reloads after edits.
async fn update(
    pool: &MySqlPool,
    gallery: &FaceGallery,
    id: u64,
    role: Role,
    body: &UpdateUser,
) -> Result<HttpResponse, AppError> {
    let user = users::update_user(pool, id, role, body.changes()).await?;
    gallery.invalidate();
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

async fn delete(pool: &MySqlPool, gallery: &FaceGallery, id: u64, role: Role) -> Result<HttpResponse, AppError> {
    users::delete_user(pool, id, role).await?;
    gallery.remove(id);
    Ok(HttpResponse::Ok().json(json!({ "message": format!("{} deleted", role_label(role)) })))
}

/// List faculty
#[utoipa::path(
    get,
    path = "/api/admin/faculty",
    responses((status = 200, description = "All faculty accounts", body = [UserResponse])),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_faculty(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    list(pool.get_ref(), Role::Faculty).await
}

/// Create faculty
#[utoipa::path(
    post,
    path = "/api/admin/faculty",
    request_body = CreateFaculty,
    responses(
        (status = 201, description = "Faculty created", body = UserResponse),
        (status = 400, description = "Name, email or password missing"),
        (status = 409, description = "Email already exists")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn create_faculty(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CreateFaculty>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    require_fields(
        &[body.name.as_str(), body.email.as_str(), body.password.as_str()],
        "Name, email and password required",
    )?;

    let user = users::create_user(
        pool.get_ref(),
        NewUser {
            role: Role::Faculty,
            name: &body.name,
            email: &body.email,
            password: &body.password,
            class_name: None,
            roll_no: None,
        },
    )
    .await?;

    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

/// Update faculty
#[utoipa::path(
    put,
    path = "/api/admin/faculty/{id}",
    params(("id", Path, description = "Faculty user id")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated faculty", body = UserResponse),
        (status = 404, description = "Faculty not found"),
        (status = 409, description = "Email already exists")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn update_faculty(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    gallery: web::Data<FaceGallery>,
    path: web::Path<u64>,
    body: web::Json<UpdateUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    update(pool.get_ref(), gallery.get_ref(), path.into_inner(), Role::Faculty, &body).await
}

/// Delete faculty
#[utoipa::path(
    delete,
    path = "/api/admin/faculty/{id}",
    params(("id", Path, description = "Faculty user id")),
    responses(
        (status = 200, description = "Faculty deleted"),
        (status = 404, description = "Faculty not found")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn delete_faculty(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    gallery: web::Data<FaceGallery>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    delete(pool.get_ref(), gallery.get_ref(), path.into_inner(), Role::Faculty).await
}

/// List students
#[utoipa::path(
    get,
    path = "/api/admin/students",
    responses((status = 200, description = "All student accounts", body = [UserResponse])),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_students(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    list(pool.get_ref(), Role::Student).await
}

/// Create student
#[utoipa::path(
    post,
    path = "/api/admin/students",
    request_body = CreateStudent,
    responses(
        (status = 201, description = "Student created", body = UserResponse),
        (status = 400, description = "Name or email missing"),
        (status = 409, description = "Email already exists")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn create_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CreateStudent>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    require_fields(&[body.name.as_str(), body.email.as_str()], "Name and email required")?;

    let password = body
        .password
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_STUDENT_PASSWORD);

    let user = users::create_user(
        pool.get_ref(),
        NewUser {
            role: Role::Student,
            name: &body.name,
            email: &body.email,
            password,
            class_name: body.class_name.as_deref(),
            roll_no: body.roll_no.as_deref(),
        },
    )
    .await?;

    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

/// Update student
#[utoipa::path(
    put,
    path = "/api/admin/students/{id}",
    params(("id", Path, description = "Student user id")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated student", body = UserResponse),
        (status = 404, description = "Student not found"),
        (status = 409, description = "Email already exists")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn update_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    gallery: web::Data<FaceGallery>,
    path: web::Path<u64>,
    body: web::Json<UpdateUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    update(pool.get_ref(), gallery.get_ref(), path.into_inner(), Role::Student, &body).await
}

/// Delete student
#[utoipa::path(
    delete,
    path = "/api/admin/students/{id}",
    params(("id", Path, description = "Student user id")),
    responses(
        (status = 200, description = "Student deleted"),
        (status = 404, description = "Student not found")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn delete_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    gallery: web::Data<FaceGallery>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    delete(pool.get_ref(), gallery.get_ref(), path.into_inner(), Role::Student).await
}

/// Read global settings
#[utoipa::path(
    get,
    path = "/api/admin/settings",
    responses((status = 200, description = "Current settings", body = Settings)),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn get_settings(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Admin, Role::Faculty])?;
    let settings = Settings::load(pool.get_ref()).await?;
    Ok(HttpResponse::Ok().json(settings))
}

/// Update global settings
#[utoipa::path(
    patch,
    path = "/api/admin/settings",
    request_body = UpdateSettings,
    responses(
        (status = 200, description = "Saved settings", body = Settings),
        (status = 400, description = "mobileGpsEnabled missing")
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn update_settings(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<UpdateSettings>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let mobile_gps_enabled = body
        .mobile_gps_enabled
        .ok_or_else(|| AppError::bad_request("mobileGpsEnabled required"))?;

    let settings = Settings { mobile_gps_enabled };
    settings.save(pool.get_ref()).await?;
    info!(admin_id = auth.user_id, mobile_gps_enabled, "Settings updated");

    Ok(HttpResponse::Ok().json(settings))
}

/// Dashboard totals
#[utoipa::path(
    get,
    path = "/api/admin/reports",
    responses((status = 200, description = "Totals", body = ReportResponse)),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn reports(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let pool = pool.get_ref();

    let count_role = |role: Role| {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role = ?")
            .bind(role.to_string())
            .fetch_one(pool)
    };
    let total_faculty = count_role(Role::Faculty).await?;
    let total_students = count_role(Role::Student).await?;

    let today_attendance =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attendances WHERE date = ?")
            .bind(Utc::now().date_naive())
            .fetch_one(pool)
            .await?;

    let settings = Settings::load(pool).await?;

    Ok(HttpResponse::Ok().json(ReportResponse {
        total_faculty,
        total_students,
        today_attendance,
        mobile_gps_enabled: settings.mobile_gps_enabled,
    }))
}

#[cfg(test)]
mod tests {
    use crate::model::role::Role;
    use crate::test_support::{bearer, configure_app};
    use actix_web::{App, http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn faculty_cannot_manage_accounts() {
        let app = test::init_service(App::new().configure(configure_app)).await;

        for (method, uri) in [
            (test::TestRequest::get(), "/api/admin/students"),
            (test::TestRequest::delete(), "/api/admin/faculty/3"),
            (test::TestRequest::get(), "/api/admin/reports"),
        ] {
            let req = method.uri(uri).insert_header(bearer(Role::Faculty, 2)).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::get().uri("/api/admin/faculty").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Missing Authorization header");
    }

    #[actix_web::test]
    async fn create_faculty_validates_before_touching_the_database() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::post()
            .uri("/api/admin/faculty")
            .insert_header(bearer(Role::Admin, 1))
            .set_json(json!({ "name": "Meera", "email": "meera@example.edu" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn settings_patch_requires_the_flag() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::patch()
            .uri("/api/admin/settings")
            .insert_header(bearer(Role::Admin, 1))
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn non_numeric_ids_are_bad_requests() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::delete()
            .uri("/api/admin/students/abc")
            .insert_header(bearer(Role::Admin, 1))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
