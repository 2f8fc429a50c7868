use crate::{
    auth::{
        auth::AuthUser,
        jwt::generate_access_token,
        password::{DUMMY_HASH, verify_password},
    },
    config::Config,
    error::AppError,
    face::{BoundingBox, engine::FaceEngine, gallery::FaceGallery},
    model::{
        role::Role,
        user::{User, UserResponse},
    },
    models::{LoginReqDto, LoginResponse},
    services::{face_enrollment::Enrollment, users},
    storage::blob_store::BlobStore,
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

/// Login
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Signed-in user and bearer token", body = LoginResponse),
        (status = 400, description = "Email or password missing"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, body),
    fields(email = %body.email)
)]
pub async fn login(
    body: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    if body.email.trim().is_empty() || body.password.is_empty() {
        info!("Validation failed: empty email or password");
        return Err(AppError::bad_request("Email and password required"));
    }

    let found = users::find_by_email(pool.get_ref(), &body.email).await?;
    let user = authenticate(found, &body.password)?;

    let role = user.role().ok_or_else(|| {
        error!(user_id = user.id, role = %user.role, "Stored role is not recognised");
        AppError::Internal
    })?;

    let token = generate_access_token(
        user.id,
        user.email.clone(),
        role,
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign access token");
        AppError::Internal
    })?;

    info!(user_id = user.id, role = %role, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

/// Unknown emails still pay for one hash check so both failures look alike.
fn authenticate(user: Option<User>, password: &str) -> Result<User, AppError> {
    let invalid = || AppError::Unauthorized("Invalid credentials".into());

    let Some(user) = user else {
        let _ = verify_password(password, &DUMMY_HASH);
        info!("Invalid credentials: user not found");
        return Err(invalid());
    };
    debug!(user_id = user.id, "User found");

    if let Err(e) = verify_password(password, &user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(invalid());
    }
    Ok(user)
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterFaceReq {
    /// Base64 image, optionally as a data URL.
    #[serde(default)]
    pub image: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFaceResponse {
    pub success: bool,
    pub message: String,
    pub face_image_url: Option<String>,
    pub bbox: BoundingBox,
}

/// Register own face from a single image
#[utoipa::path(
    post,
    path = "/api/auth/register-face",
    request_body = RegisterFaceReq,
    responses(
        (status = 200, description = "Face stored", body = RegisterFaceResponse),
        (status = 400, description = "No face, invalid image or face belongs to another user"),
        (status = 403, description = "Already registered or not a student/faculty"),
        (status = 502, description = "Face engine unavailable")
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
#[allow(clippy::too_many_arguments)]
pub async fn register_face(
    auth: AuthUser,
    body: web::Json<RegisterFaceReq>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    engine: web::Data<dyn FaceEngine>,
    gallery: web::Data<FaceGallery>,
    blobs: web::Data<BlobStore>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Student, Role::Faculty])?;

    let user = users::require_user(pool.get_ref(), auth.user_id).await?;
    let enrollment = Enrollment {
        pool: pool.get_ref(),
        engine: engine.get_ref(),
        gallery: gallery.get_ref(),
        blobs: blobs.get_ref(),
        duplicate_threshold: config.duplicate_threshold,
    };
    let enrolled = enrollment.from_image(&user, &body.image).await?;
    info!(user_id = auth.user_id, email = %auth.email, "Own face registered");

    Ok(HttpResponse::Ok().json(RegisterFaceResponse {
        success: true,
        message: "Face registered successfully".into(),
        face_image_url: enrolled.image_url,
        bbox: enrolled.bbox,
    }))
}

#[cfg(test)]
mod tests {
    use super::authenticate;
    use crate::auth::password::hash_password;
    use crate::error::AppError;
    use crate::model::role::Role;
    use crate::model::user::sample_user;
    use crate::test_support::{bearer, configure_app};
    use actix_web::{App, http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn login_requires_both_fields() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "a@b.c" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Email and password required");
    }

    #[::core::prelude::v1::test]
    fn wrong_password_and_unknown_email_are_both_rejected() {
        let hashed = hash_password("correct horse").unwrap();
        let user = |hash: &str| {
            let mut u = sample_user(4, Role::Faculty);
            u.password = hash.to_string();
            u
        };

        match authenticate(Some(user(&hashed)), "battery staple") {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, "Invalid credentials"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(authenticate(None, "anything"), Err(AppError::Unauthorized(_))));
        assert_eq!(authenticate(Some(user(&hashed)), "correct horse").unwrap().id, 4);
    }

    #[actix_web::test]
    async fn register_face_needs_a_token() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::post()
            .uri("/api/auth/register-face")
            .set_json(json!({ "image": "abc" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn admins_cannot_register_a_face() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::post()
            .uri("/api/auth/register-face")
            .insert_header(bearer(Role::Admin, 1))
            .set_json(json!({ "image": "abc" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
