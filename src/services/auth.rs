use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHasher};

use crate::error::AppError;

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use argon2::{PasswordHash, PasswordVerifier};

    use super::*;

    #[test]
    fn test_hash_password_verifies() {
        let hash = hash_password("Str0ngPass!").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(
            Argon2::default()
                .verify_password(b"Str0ngPass!", &parsed)
                .is_ok()
        );
        assert!(
            Argon2::default()
                .verify_password(b"wrong-password", &parsed)
                .is_err()
        );
    }

    #[test]
    fn test_hash_password_uses_random_salt() {
        let first = hash_password("Str0ngPass!").unwrap();
        let second = hash_password("Str0ngPass!").unwrap();
        assert_ne!(first, second);
    }
}
