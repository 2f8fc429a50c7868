//! Face registration, verification and recognition endpoints.

use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    face::{
        BoundingBox,
        engine::FaceEngine,
        gallery::FaceGallery,
        quality::{FrameQuality, assess_frame},
        registration::{LookupError, RegistrationStore, lock},
    },
    model::{
        role::Role,
        session::{GeoPoint, Session},
    },
    services::{
        attendance::{MarkOutcome, MarkRequest, check_location, ensure_open, fetch_session, mark_attendance},
        face_enrollment::{Enrollment, ensure_not_registered},
        users,
    },
    storage::blob_store::BlobStore,
    utils::image_data::{decode_base64_image, load_image},
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartRegistration {
    /// Frames to capture, 1..=200, default 50.
    pub num_images: Option<u32>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartRegistrationResponse {
    pub success: bool,
    pub session_id: String,
    pub num_images: u32,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationFrame {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FrameResponse {
    /// Whether the frame was counted.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub progress: u32,
    pub total: u32,
    pub bbox: Option<BoundingBox>,
    pub quality: Option<FrameQuality>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRegistration {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFace {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub image: String,
    /// Defaults to true.
    pub auto_mark: Option<bool>,
    pub location: Option<GeoPoint>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchedUser {
    pub id: u64,
    pub name: String,
    pub roll_no: Option<String>,
}

#[derive(Serialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub matched: bool,
    pub user: Option<MatchedUser>,
    /// Percent.
    pub confidence: f32,
    pub attendance_marked: bool,
    pub already_marked: bool,
    pub bbox: Option<BoundingBox>,
    pub emotion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct RecognizeFace {
    #[serde(default)]
    pub image: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedFace {
    pub matched: bool,
    pub user_id: Option<u64>,
    /// `Unknown` when unmatched.
    pub name: String,
    pub roll_no: Option<String>,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub emotion: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct RecognizeResponse {
    pub success: bool,
    pub faces: Vec<RecognizedFace>,
}

fn lookup_error(e: LookupError) -> AppError {
    match e {
        LookupError::Invalid => AppError::bad_request("Invalid or expired registration session"),
        LookupError::NotOwner => AppError::forbidden("Registration session belongs to another user"),
    }
}

/// Runs the geofence check before the engine call whenever the result could
/// be marked. Students are always checked.
fn precheck_location(
    session: &Session,
    is_student: bool,
    auto_mark: bool,
    location: Option<GeoPoint>,
) -> Result<(), AppError> {
    if is_student || auto_mark {
        check_location(session, location)
    } else {
        Ok(())
    }
}

/// Begin multi-frame registration
#[utoipa::path(
    post,
    path = "/api/face/register/start",
    request_body = StartRegistration,
    responses(
        (status = 200, description = "Registration session opened", body = StartRegistrationResponse),
        (status = 403, description = "Face already registered")
    ),
    tag = "Face",
    security(("bearer_auth" = []))
)]
pub async fn register_start(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    store: web::Data<RegistrationStore>,
    body: web::Json<StartRegistration>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Student, Role::Faculty])?;

    let user = users::require_user(pool.get_ref(), auth.user_id).await?;
    ensure_not_registered(&user)?;

    let num_images = RegistrationStore::clamp_target(body.num_images);
    let session_id = store.start(user.id, num_images).await;
    info!(user_id = user.id, %session_id, num_images, "Face registration started");

    Ok(HttpResponse::Ok().json(StartRegistrationResponse {
        success: true,
        session_id,
        num_images,
    }))
}

/// Submit one registration frame
#[utoipa::path(
    post,
    path = "/api/face/register/frame",
    request_body = RegistrationFrame,
    responses(
        (status = 200, description = "Frame processed; `success` tells whether it was counted", body = FrameResponse),
        (status = 400, description = "Invalid image or registration session"),
        (status = 403, description = "Registration session belongs to another user"),
        (status = 502, description = "Face engine unavailable")
    ),
    tag = "Face",
    security(("bearer_auth" = []))
)]
pub async fn register_frame(
    auth: AuthUser,
    store: web::Data<RegistrationStore>,
    engine: web::Data<dyn FaceEngine>,
    body: web::Json<RegistrationFrame>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Student, Role::Faculty])?;

    let session = store
        .get(&body.session_id, auth.user_id)
        .await
        .map_err(lookup_error)?;

    let (count, total) = {
        let s = lock(&session);
        (s.count, s.target)
    };
    let rejected = |message: Option<&str>, progress, bbox, quality| FrameResponse {
        success: false,
        message: message.map(str::to_string),
        progress,
        total,
        bbox,
        quality,
    };

    if count >= total {
        return Ok(HttpResponse::Ok().json(rejected(Some("All frames captured"), count, None, None)));
    }

    let bytes = decode_base64_image(&body.image)?;
    let image = load_image(&bytes)?;

    let Some(analysis) = engine.analyze(&bytes).await? else {
        return Ok(HttpResponse::Ok().json(rejected(Some("No face detected"), count, None, None)));
    };

    let quality = assess_frame(&image, &analysis.bbox);
    if !quality.accepted {
        debug!(reasons = ?quality.reasons, "Registration frame rejected");
        return Ok(HttpResponse::Ok().json(rejected(None, count, Some(analysis.bbox), Some(quality))));
    }

    // Another request may have filled the session while the engine was busy.
    let progress = {
        let mut s = lock(&session);
        if s.is_full() { None } else { Some(s.add_frame(analysis.embeddings)) }
    };

    Ok(HttpResponse::Ok().json(match progress {
        Some(progress) => FrameResponse {
            success: true,
            message: None,
            progress,
            total,
            bbox: Some(analysis.bbox),
            quality: Some(quality),
        },
        None => rejected(Some("All frames captured"), total, Some(analysis.bbox), Some(quality)),
    }))
}

/// Finish multi-frame registration
#[utoipa::path(
    post,
    path = "/api/face/register/complete",
    request_body = CompleteRegistration,
    responses(
        (status = 200, description = "Averaged embeddings stored"),
        (status = 400, description = "No frames captured, invalid session or duplicate face"),
        (status = 403, description = "Already registered or not the session owner")
    ),
    tag = "Face",
    security(("bearer_auth" = []))
)]
#[allow(clippy::too_many_arguments)]
pub async fn register_complete(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    store: web::Data<RegistrationStore>,
    engine: web::Data<dyn FaceEngine>,
    gallery: web::Data<FaceGallery>,
    blobs: web::Data<BlobStore>,
    body: web::Json<CompleteRegistration>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Student, Role::Faculty])?;

    let session = store
        .get(&body.session_id, auth.user_id)
        .await
        .map_err(lookup_error)?;

    let (frames, averaged, started_at) = {
        let s = lock(&session);
        (s.count, s.averaged(), s.started_at)
    };
    if frames == 0 || averaged.is_empty() {
        return Err(AppError::bad_request("No frames captured"));
    }

    let user = users::require_user(pool.get_ref(), auth.user_id).await?;
    let enrollment = Enrollment {
        pool: pool.get_ref(),
        engine: engine.get_ref(),
        gallery: gallery.get_ref(),
        blobs: blobs.get_ref(),
        duplicate_threshold: config.duplicate_threshold,
    };
    enrollment.from_embeddings(&user, &averaged).await?;
    store.remove(&body.session_id).await;
    info!(
        user_id = user.id,
        frames,
        elapsed_secs = (chrono::Utc::now() - started_at).num_seconds(),
        "Multi-frame registration completed"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Face registered successfully",
        "framesUsed": frames
    })))
}

/// Verify a face and mark attendance
#[utoipa::path(
    post,
    path = "/api/face/verify",
    request_body = VerifyFace,
    responses(
        (status = 200, description = "Recognition result", body = VerifyResponse),
        (status = 400, description = "Invalid image, session ended or location missing"),
        (status = 403, description = "Outside geofence or face belongs to another student"),
        (status = 404, description = "Session not found"),
        (status = 502, description = "Face engine unavailable")
    ),
    tag = "Face",
    security(("bearer_auth" = []))
)]
#[instrument(
    name = "face_verify",
    skip_all,
    fields(user_id = auth.user_id, session_id = %body.session_id)
)]
pub async fn verify(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    engine: web::Data<dyn FaceEngine>,
    gallery: web::Data<FaceGallery>,
    body: web::Json<VerifyFace>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Faculty, Role::Student])?;

    if body.session_id.trim().is_empty() {
        return Err(AppError::bad_request("sessionId required"));
    }
    let bytes = decode_base64_image(&body.image)?;
    load_image(&bytes)?;

    let auto_mark = body.auto_mark.unwrap_or(true);
    let session = fetch_session(pool.get_ref(), body.session_id.trim()).await?;
    ensure_open(&session)?;
    precheck_location(&session, auth.is_student(), auto_mark, body.location)?;

    let Some(analysis) = engine.analyze(&bytes).await? else {
        return Ok(HttpResponse::Ok().json(VerifyResponse {
            message: Some("No face detected".into()),
            ..Default::default()
        }));
    };

    gallery.refresh_if_stale(pool.get_ref()).await;
    let outcome = gallery.best_match(&analysis.embeddings, config.match_accept_percent);

    let mut response = VerifyResponse {
        matched: outcome.matched,
        confidence: outcome.confidence,
        bbox: Some(analysis.bbox),
        emotion: analysis.emotion,
        ..Default::default()
    };

    let (Some(student_id), Some(name)) = (outcome.user_id, outcome.name) else {
        info!(confidence = outcome.confidence, "No match");
        return Ok(HttpResponse::Ok().json(response));
    };

    if auth.is_student() && student_id != auth.user_id {
        info!(matched_user = student_id, "Student verified as someone else");
        return Err(AppError::forbidden("Face does not match the signed-in student"));
    }

    if auto_mark {
        let marked = mark_attendance(
            pool.get_ref(),
            MarkRequest {
                session_id: &session.session_id,
                student_id,
                student_name: &name,
                mode: None,
                confidence: Some(outcome.confidence as f64),
                location: body.location,
            },
        )
        .await?;

        match marked {
            MarkOutcome::Marked { .. } => response.attendance_marked = true,
            MarkOutcome::AlreadyMarked => response.already_marked = true,
        }
    }

    info!(
        student_id,
        confidence = outcome.confidence,
        attendance_marked = response.attendance_marked,
        "Face verified"
    );

    response.user = Some(MatchedUser {
        id: student_id,
        name,
        roll_no: outcome.roll_no,
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Recognise without marking attendance
#[utoipa::path(
    post,
    path = "/api/face/recognize",
    request_body = RecognizeFace,
    responses(
        (status = 200, description = "Detected face and best match", body = RecognizeResponse),
        (status = 400, description = "Invalid image"),
        (status = 502, description = "Face engine unavailable")
    ),
    tag = "Face",
    security(("bearer_auth" = []))
)]
pub async fn recognize(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    engine: web::Data<dyn FaceEngine>,
    gallery: web::Data<FaceGallery>,
    body: web::Json<RecognizeFace>,
) -> Result<HttpResponse, AppError> {
    auth.require_roles(&[Role::Faculty, Role::Admin])?;

    let bytes = decode_base64_image(&body.image)?;
    load_image(&bytes)?;

    let mut faces = Vec::new();
    if let Some(analysis) = engine.analyze(&bytes).await? {
        gallery.refresh_if_stale(pool.get_ref()).await;
        let outcome = gallery.best_match(&analysis.embeddings, config.match_accept_percent);
        faces.push(RecognizedFace {
            matched: outcome.matched,
            user_id: outcome.user_id,
            name: outcome.name.unwrap_or_else(|| "Unknown".to_string()),
            roll_no: outcome.roll_no,
            confidence: outcome.confidence,
            bbox: analysis.bbox,
            emotion: analysis.emotion,
        });
    }

    Ok(HttpResponse::Ok().json(RecognizeResponse { success: true, faces }))
}

/// Reload the face gallery
#[utoipa::path(
    post,
    path = "/api/face/retrain",
    responses(
        (status = 200, description = "Gallery reloaded"),
        (status = 400, description = "No registered faces")
    ),
    tag = "Face",
    security(("bearer_auth" = []))
)]
pub async fn retrain(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    gallery: web::Data<FaceGallery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let count = gallery.reload(pool.get_ref()).await?;
    if count == 0 {
        return Err(AppError::bad_request("No registered faces found"));
    }
    info!(count, admin_id = auth.user_id, "Gallery reloaded on request");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Gallery reloaded",
        "count": count
    })))
}

#[cfg(test)]
mod tests {
    use super::precheck_location;
    use crate::error::AppError;
    use crate::face::registration::RegistrationStore;
    use crate::model::session::{SessionMode, sample_session};
    use crate::model::role::Role;
    use crate::test_support::{bearer, configure_app, configure_app_with};
    use crate::utils::image_data::tiny_png_base64;
    use actix_web::{App, http::StatusCode, test, web::Data};
    use serde_json::json;
    use std::time::Duration;

    #[actix_web::test]
    async fn blurry_frames_are_not_counted() {
        let store = Data::new(RegistrationStore::new(Duration::from_secs(60)));
        let session_id = store.start(9, 3).await;
        let app = test::init_service(
            App::new().configure(|cfg| configure_app_with(cfg, store.clone())),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/face/register/frame")
            .insert_header(bearer(Role::Student, 9))
            .set_json(json!({ "sessionId": session_id, "image": tiny_png_base64() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["progress"], 0);
        assert_eq!(body["total"], 3);
        let reasons = body["quality"]["reasons"].as_array().unwrap();
        assert!(reasons.contains(&json!("blurry")));
    }

    #[actix_web::test]
    async fn registration_sessions_are_private() {
        let store = Data::new(RegistrationStore::new(Duration::from_secs(60)));
        let session_id = store.start(9, 3).await;
        let app = test::init_service(
            App::new().configure(|cfg| configure_app_with(cfg, store.clone())),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/face/register/frame")
            .insert_header(bearer(Role::Student, 10))
            .set_json(json!({ "sessionId": session_id, "image": tiny_png_base64() }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/face/register/frame")
            .insert_header(bearer(Role::Student, 9))
            .set_json(json!({ "sessionId": "unknown", "image": tiny_png_base64() }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn completing_without_frames_fails() {
        let store = Data::new(RegistrationStore::new(Duration::from_secs(60)));
        let session_id = store.start(9, 3).await;
        let app = test::init_service(
            App::new().configure(|cfg| configure_app_with(cfg, store.clone())),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/face/register/complete")
            .insert_header(bearer(Role::Student, 9))
            .set_json(json!({ "sessionId": session_id }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No frames captured");
    }

    #[::core::prelude::v1::test]
    fn location_is_checked_up_front_for_any_marking_caller() {
        let mobile = sample_session(SessionMode::Mobile);

        // faculty auto-marking needs a location just like the mark itself
        assert!(matches!(
            precheck_location(&mobile, false, true, None),
            Err(AppError::BadRequest(_))
        ));
        assert!(precheck_location(&mobile, false, false, None).is_ok());
        assert!(matches!(
            precheck_location(&mobile, true, false, None),
            Err(AppError::BadRequest(_))
        ));

        let webcam = sample_session(SessionMode::Webcam);
        assert!(precheck_location(&webcam, true, true, None).is_ok());
    }

    #[actix_web::test]
    async fn role_guards() {
        let app = test::init_service(App::new().configure(configure_app)).await;

        let cases = [
            ("/api/face/verify", Role::Admin),
            ("/api/face/recognize", Role::Student),
            ("/api/face/retrain", Role::Faculty),
        ];
        for (uri, role) in cases {
            let req = test::TestRequest::post()
                .uri(uri)
                .insert_header(bearer(role, 5))
                .set_json(json!({ "sessionId": "s", "image": tiny_png_base64() }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[actix_web::test]
    async fn recognize_reports_unknown_face_against_empty_gallery() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::post()
            .uri("/api/face/recognize")
            .insert_header(bearer(Role::Faculty, 2))
            .set_json(json!({ "image": tiny_png_base64() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["faces"][0]["name"], "Unknown");
        assert_eq!(body["faces"][0]["matched"], false);
    }

    #[actix_web::test]
    async fn verify_rejects_bad_images_before_looking_up_the_session() {
        let app = test::init_service(App::new().configure(configure_app)).await;
        let req = test::TestRequest::post()
            .uri("/api/face/verify")
            .insert_header(bearer(Role::Faculty, 2))
            .set_json(json!({ "sessionId": "s", "image": "bm90IGFuIGltYWdl" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid image");
    }
}
