// src/auth.rs
use crate::error::ApiError;
use crate::models::{Role, User};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SESSION_COOKIE: &str = "session";
pub const MIN_PASSWORD_LEN: usize = 8;
const HASH_ITERATIONS: u32 = 100_000;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// Signing material and lifetime for session tokens.
pub struct Sessions {
    secret: Vec<u8>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_hours: i64) -> Self {
        Sessions {
            secret: secret.into(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn create_token(&self, user: &User) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user.username.clone(),
            role: user.role,
            exp: (Utc::now() + self.ttl).timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
    }

    /// Returns `None` for tokens that are malformed, forged or expired.
    pub fn verify_token(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .ok()
    }

    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.ttl_seconds()
        )
    }
}

pub fn cleared_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

pub fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// PBKDF2-HMAC-SHA256 with a 32 byte output.
fn digest(salt: &[u8], password: &str, iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

/// Produces `iterations$salt$hash`, both hex encoded.
pub fn hash_password(password: &str) -> String {
    hash_password_with(password, HASH_ITERATIONS)
}

pub(crate) fn hash_password_with(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill(&mut salt);
    format!(
        "{}${}${}",
        iterations,
        hex::encode(salt),
        hex::encode(digest(&salt, password, iterations))
    )
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (iterations, salt, expected) = match (parts.next(), parts.next(), parts.next()) {
        (Some(i), Some(s), Some(h)) => (i, s, h),
        _ => return false,
    };
    let (iterations, salt, expected) = match (
        iterations.parse::<u32>(),
        hex::decode(salt),
        hex::decode(expected),
    ) {
        (Ok(i), Ok(s), Ok(h)) if i > 0 => (i, s, h),
        _ => return false,
    };
    let actual = digest(&salt, password, iterations);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    let allowed = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !(3..=32).contains(&len) || !allowed {
        return Err(ApiError::BadRequest(
            "Username must be 3-32 characters of letters, digits, `_`, `-` or `.`".to_string(),
        ));
    }
    Ok(())
}

/// Pulls a token from `Authorization: Bearer ...`, falling back to the cookie.
pub fn extract_token(authorization: Option<&str>, cookie: Option<&str>) -> Option<String> {
    authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| cookie.filter(|c| !c.is_empty()))
        .map(str::to_string)
}

/// The signed-in user behind a request, if any.
#[derive(Debug, Clone)]
pub struct Caller(pub Option<User>);

impl Caller {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }

    pub fn require(&self, role: Role) -> Result<&User, ApiError> {
        match &self.0 {
            None => Err(ApiError::Unauthorized("Authentication required".to_string())),
            Some(user) if user.role.satisfies(role) => Ok(user),
            Some(user) => Err(ApiError::Forbidden(format!(
                "Requires {} role, you are {}",
                role, user.role
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        User {
            username: "alice".to_string(),
            password_hash: String::new(),
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let stored = hash_password("correct horse");
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("wrong horse", &stored));
        // salted: the same password never hashes the same way twice
        assert_ne!(stored, hash_password("correct horse"));
    }

    #[test]
    fn garbage_hashes_never_verify() {
        assert!(!verify_password("anything", ""));
        assert!(!verify_password("anything", "plain-text"));
        assert!(!verify_password("anything", "0$00$00"));
        assert!(!verify_password("anything", "10$zz$00"));
    }

    #[test]
    fn stored_hashes_are_standard_pbkdf2() {
        // PBKDF2-HMAC-SHA256("password", "salt", 1) test vector
        let stored = "1$73616c74$120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b";
        assert!(verify_password("password", stored));
        assert!(!verify_password("passwore", stored));
        // a truncated hash never matches
        assert!(!verify_password("password", "1$73616c74$120fb6cffcf8b32c"));
    }

    #[test]
    fn tokens_verify_with_the_same_secret_only() {
        let sessions = Sessions::new("s3cret", 1);
        let token = sessions.create_token(&user(Role::Member)).unwrap();
        let claims = sessions.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, Role::Member);

        let other = Sessions::new("different", 1);
        assert!(other.verify_token(&token).is_none());
        assert!(sessions.verify_token("not.a.token").is_none());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let sessions = Sessions::new("s3cret", -2);
        let token = sessions.create_token(&user(Role::Admin)).unwrap();
        assert!(sessions.verify_token(&token).is_none());
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        assert_eq!(
            extract_token(Some("Bearer abc"), Some("def")),
            Some("abc".to_string())
        );
        assert_eq!(extract_token(Some("Basic xyz"), Some("def")), Some("def".to_string()));
        assert_eq!(extract_token(None, Some("")), None);
    }

    #[test]
    fn caller_role_checks() {
        assert!(matches!(
            Caller(None).require(Role::Guest),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            Caller(Some(user(Role::Member))).require(Role::Admin),
            Err(ApiError::Forbidden(_))
        ));
        assert!(Caller(Some(user(Role::Admin))).require(Role::Member).is_ok());
    }

    #[test]
    fn username_and_password_rules() {
        assert!(validate_username("bob_smith").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("bob smith").is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
