use crate::{
    api::{admin, attendance, face, faculty, sessions, student},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::AppError,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{Resource, Scope, middleware::from_fn, web};

/// Base64 images in request bodies.
const JSON_LIMIT_BYTES: usize = 12 * 1024 * 1024;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish();

    match cfg {
        Some(cfg) => Governor::new(&cfg),
        // Only reachable with a zero period or burst, both excluded above.
        None => Governor::new(&GovernorConfig::default()),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config) {
    let login_limiter = build_limiter(config.rate_login_per_min);
    let protected_limiter = build_limiter(config.rate_protected_per_min);

    extractor_config(cfg);

    // Public route
    cfg.service(login_resource(&config.api_prefix).wrap(login_limiter));

    // Protected routes
    cfg.service(
        api_scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter), // rate limiting
    );
}

/// Same routing as [`configure`], without per-IP limiters.
#[cfg(test)]
pub fn configure_unlimited(cfg: &mut web::ServiceConfig, config: &Config) {
    extractor_config(cfg);
    cfg.service(login_resource(&config.api_prefix));
    cfg.service(api_scope(&config.api_prefix).wrap(from_fn(auth_middleware)));
}

fn extractor_config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_LIMIT_BYTES)
            .error_handler(|err, _| AppError::bad_request(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::bad_request(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| AppError::bad_request(err.to_string()).into()),
    );
}

fn login_resource(prefix: &str) -> Resource {
    web::resource(format!("{prefix}/auth/login")).route(web::post().to(handlers::login))
}

fn api_scope(prefix: &str) -> Scope {
    web::scope(prefix)
        .service(
            web::resource("/auth/register-face").route(web::post().to(handlers::register_face)),
        )
        .service(
            web::scope("/admin")
                // /admin/faculty
                .service(
                    web::resource("/faculty")
                        .route(web::get().to(admin::list_faculty))
                        .route(web::post().to(admin::create_faculty)),
                )
                // /admin/faculty/{id}
                .service(
                    web::resource("/faculty/{id}")
                        .route(web::put().to(admin::update_faculty))
                        .route(web::delete().to(admin::delete_faculty)),
                )
                .service(
                    web::resource("/students")
                        .route(web::get().to(admin::list_students))
                        .route(web::post().to(admin::create_student)),
                )
                .service(
                    web::resource("/students/{id}")
                        .route(web::put().to(admin::update_student))
                        .route(web::delete().to(admin::delete_student)),
                )
                .service(
                    web::resource("/settings")
                        .route(web::get().to(admin::get_settings))
                        .route(web::patch().to(admin::update_settings)),
                )
                .service(web::resource("/reports").route(web::get().to(admin::reports))),
        )
        .service(
            web::scope("/faculty")
                .service(
                    web::resource("/sessions")
                        .route(web::get().to(faculty::list_sessions))
                        .route(web::post().to(faculty::create_session)),
                )
                .service(web::resource("/sessions/{id}").route(web::get().to(faculty::get_session)))
                .service(
                    web::resource("/sessions/{id}/end").route(web::post().to(faculty::end_session)),
                )
                .service(
                    web::resource("/sessions/{id}/attendance")
                        .route(web::get().to(faculty::session_attendance)),
                ),
        )
        .service(web::resource("/sessions/active").route(web::get().to(sessions::active_sessions)))
        .service(
            web::scope("/student")
                .service(web::resource("/me").route(web::get().to(student::me)))
                .service(
                    web::resource("/register-face")
                        .route(web::post().to(student::register_student_face)),
                ),
        )
        .service(
            web::scope("/attendance")
                .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                .service(web::resource("/mark").route(web::post().to(attendance::mark))),
        )
        .service(
            web::scope("/face")
                .service(web::resource("/register/start").route(web::post().to(face::register_start)))
                .service(web::resource("/register/frame").route(web::post().to(face::register_frame)))
                .service(
                    web::resource("/register/complete").route(web::post().to(face::register_complete)),
                )
                .service(web::resource("/verify").route(web::post().to(face::verify)))
                .service(web::resource("/recognize").route(web::post().to(face::recognize)))
                .service(web::resource("/retrain").route(web::post().to(face::retrain))),
        )
}
