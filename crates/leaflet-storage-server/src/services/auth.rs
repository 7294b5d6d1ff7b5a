//! Authentication service

use crate::error::{ApiError, ApiResult};
use crate::storage::Database;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use leaflet_storage_core::ports::UserStore;
use leaflet_storage_core::{AuthTokens, User, UserId, UserLogin, UserRegistration};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const TOKEN_LIFETIME_DAYS: i64 = 30;
const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_USERNAME_LENGTH: usize = 30;

pub struct AuthService {
    db: Arc<Database>,
    jwt_secret: String,
}

fn validate_username(username: &str) -> ApiResult<()> {
    let valid = !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LENGTH
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(ApiError::BadRequest(format!(
            "Usernames are 1 to {} letters, digits, '.', '-' or '_'",
            MAX_USERNAME_LENGTH
        )));
    }
    Ok(())
}

impl AuthService {
    pub fn new(db: Arc<Database>, jwt_secret: String) -> Self {
        Self { db, jwt_secret }
    }

    pub async fn register(&self, registration: &UserRegistration) -> ApiResult<(User, AuthTokens)> {
        validate_username(&registration.username)?;
        if registration.password.len() < MIN_PASSWORD_LENGTH {
            return Err(ApiError::BadRequest(format!(
                "Passwords need at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if self
            .db
            .get_user_by_username(&registration.username)
            .await?
            .is_some()
        {
            return Err(ApiError::Conflict("Username already taken".to_string()));
        }

        // Hash password
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(registration.password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))?
            .to_string();

        let user = self
            .db
            .create_user(
                &registration.username,
                registration.email.as_deref(),
                &password_hash,
            )
            .await?;
        info!("Registered user {} ({})", user.username, user.id);

        let tokens = self.generate_tokens(user.id)?;
        Ok((user, tokens))
    }

    pub async fn login(&self, login: &UserLogin) -> ApiResult<(User, AuthTokens)> {
        if let Some((user, password_hash)) = self.db.get_credentials(&login.username).await? {
            let parsed_hash = PasswordHash::new(&password_hash)
                .map_err(|e| ApiError::Internal(format!("Invalid password hash: {}", e)))?;

            if Argon2::default()
                .verify_password(login.password.as_bytes(), &parsed_hash)
                .is_ok()
            {
                let tokens = self.generate_tokens(user.id)?;
                return Ok((user, tokens));
            }
        }

        Err(ApiError::Unauthorized("Invalid credentials".to_string()))
    }

    pub fn validate_token(&self, token: &str) -> ApiResult<UserId> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;

        token_data
            .claims
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("Invalid token subject".to_string()))
    }

    fn generate_tokens(&self, user_id: UserId) -> ApiResult<AuthTokens> {
        let now = Utc::now();
        let lifetime = Duration::days(TOKEN_LIFETIME_DAYS);
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
        };

        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| ApiError::Internal(format!("Failed to sign token: {}", e)))?;

        Ok(AuthTokens {
            access_token,
            expires_in: lifetime.num_seconds(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // user id
    exp: i64,
    iat: i64,
}
