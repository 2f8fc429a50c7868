use crate::config::Config;
use crate::error::AppError;
use crate::model::role::Role;
use crate::auth::jwt::verify_token;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Set by auth_middleware on protected routes.
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing token".into()))?;

    let config = req
        .app_data::<Data<Config>>()
        .ok_or(AppError::Internal)?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid token".into()))?;

    let role = Role::from_db(&claims.role)
        .ok_or_else(|| AppError::Unauthorized("Invalid role".into()))?;

    Ok(AuthUser {
        user_id: claims.user_id,
        email: claims.sub,
        role,
    })
}

impl AuthUser {
    pub fn require_roles(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden("Forbidden"))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_roles(&[Role::Admin])
    }

    pub fn require_faculty(&self) -> Result<(), AppError> {
        self.require_roles(&[Role::Faculty])
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}
