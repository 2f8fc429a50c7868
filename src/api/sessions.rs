use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::session::{SESSION_COLUMNS, Session, SessionResponse},
};
use actix_web::{HttpResponse, web};
use sqlx::MySqlPool;

const ACTIVE_LIMIT: u32 = 20;

/// Sessions currently accepting attendance
#[utoipa::path(
    get,
    path = "/api/sessions/active",
    responses((status = 200, description = "Open sessions, newest first", body = [SessionResponse])),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn active_sessions(_auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE end_time IS NULL ORDER BY start_time DESC LIMIT ?"
    );
    let rows = sqlx::query_as::<_, Session>(&sql)
        .bind(ACTIVE_LIMIT)
        .fetch_all(pool.get_ref())
        .await?;

    let data: Vec<SessionResponse> = rows.into_iter().map(SessionResponse::from).collect();
    Ok(HttpResponse::Ok().json(data))
}
