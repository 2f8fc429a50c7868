use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;

/// Hash checked when the email is unknown, so both login failures cost one verification.
pub static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash_password("not-a-real-password").unwrap_or_default());

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, hashed: &str) -> Result<(), argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let parsed = PasswordHash::new(hashed)?;

    argon2.verify_password(password.as_bytes(), &parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original_password() {
        let hash = hash_password("student123").unwrap();
        assert_ne!(hash, "student123");
        assert!(verify_password("student123", &hash).is_ok());
        assert!(verify_password("student124", &hash).is_err());
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_panic() {
        assert!(verify_password("x", "plaintext").is_err());
        assert!(!DUMMY_HASH.is_empty());
    }
}
