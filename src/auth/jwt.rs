use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};

use crate::{model::role::Role, models::Claims};

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

pub fn generate_access_token(
    user_id: u64,
    email: String,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let iat = now();
    let claims = Claims {
        user_id,
        sub: email,
        role: role.to_string(),
        iat,
        exp: iat + ttl,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_with_role_and_email() {
        let token = generate_access_token(7, "f@example.edu".into(), Role::Faculty, "s3cret", 60).unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "f@example.edu");
        assert_eq!(claims.role, "faculty");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(1, "a@b.c".into(), Role::Admin, "one", 60).unwrap();
        assert!(verify_token(&token, "two").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims {
            user_id: 1,
            sub: "a@b.c".into(),
            role: "admin".into(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"k")).unwrap();
        assert!(verify_token(&token, "k").is_err());
    }
}
