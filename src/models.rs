use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::user::UserResponse;

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "admin@example.edu", format = "email")]
    #[serde(default)]
    pub email: String,
    #[schema(example = "secret")]
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    /// Email at the time of login.
    pub sub: String,
    pub role: String,
    pub iat: usize,
    pub exp: usize,
}
