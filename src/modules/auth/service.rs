//! Sign-up and log-in over the `users` collection.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use libris_authz::jwt::JwtKeys;
use libris_authz::password::{hash_password, validate_password_strength, verify_password};
use libris_db::{Collection, DbError};
use libris_http::AppError;
use serde_json::json;
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;
use validator::Validate;

use super::models::{Credentials, LoginResponse, UserAccount};

const INVALID_CREDENTIALS: &str = "invalid email or password";

/// Verified against when the email is unknown, so both failures cost one
/// Argon2 verification.
const DECOY_PASSWORD: &str = "libris-decoy-password";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid credentials format")]
    Validation(Vec<serde_json::Value>),

    #[error("an account already exists for '{0}'")]
    Conflict(String),

    #[error("{INVALID_CREDENTIALS}")]
    Unauthorized,

    #[error("user storage failed: {0}")]
    Storage(#[from] DbError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AccountResult<T> = Result<T, AccountError>;

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(details) => {
                AppError::validation(details, "invalid signup request")
            }
            AccountError::Conflict(_) => AppError::conflict(err.to_string()),
            AccountError::Unauthorized => AppError::unauthorized(INVALID_CREDENTIALS),
            AccountError::Storage(db) => AppError::Internal(db.into()),
            AccountError::Internal(e) => AppError::Internal(e),
        }
    }
}

pub struct AccountService {
    users: Collection<UserAccount>,
    jwt: Arc<JwtKeys>,
    decoy_hash: OnceCell<String>,
}

impl AccountService {
    pub fn new(users: Collection<UserAccount>, jwt: Arc<JwtKeys>) -> Self {
        Self {
            users,
            jwt,
            decoy_hash: OnceCell::new(),
        }
    }

    pub async fn count(&self) -> usize {
        self.users.len().await
    }

    /// Register a new user. Every rule the input breaks is reported at once.
    pub async fn signup(&self, credentials: Credentials) -> AccountResult<UserAccount> {
        let email = credentials.normalized_email();
        let normalized = Credentials {
            email: email.clone(),
            password: credentials.password,
        };

        let mut details = Vec::new();
        if let Err(errors) = normalized.validate() {
            for (field, problems) in errors.field_errors() {
                for problem in problems {
                    let message = problem
                        .message
                        .as_deref()
                        .unwrap_or(problem.code.as_ref())
                        .to_string();
                    details.push(json!({ "field": field, "message": message }));
                }
            }
        }
        if let Err(problems) = validate_password_strength(&normalized.password) {
            for message in problems {
                details.push(json!({ "field": "password", "message": message }));
            }
        }
        if !details.is_empty() {
            return Err(AccountError::Validation(details));
        }

        let password = normalized.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| anyhow!("password hashing task failed: {e}"))?
            .map_err(|e| anyhow!("password hashing failed: {e}"))?;

        let account = UserAccount {
            id: Uuid::now_v7().to_string(),
            email: email.clone(),
            password_hash,
            created_at: Utc::now(),
        };

        let account = self
            .users
            .insert_unless(account, |existing| existing.email == email)
            .await
            .map_err(|e| match e {
                DbError::Conflict { .. } => AccountError::Conflict(email.clone()),
                other => AccountError::Storage(other),
            })?;

        tracing::info!(user_id = %account.id, "user signed up");
        Ok(account)
    }

    /// Check credentials and issue a bearer token.
    ///
    /// Unknown email and wrong password fail the same way.
    pub async fn login(&self, credentials: Credentials) -> AccountResult<LoginResponse> {
        let email = credentials.normalized_email();
        let account = self.users.find_one(|u| u.email == email).await?;

        let hash = match &account {
            Some(account) => account.password_hash.clone(),
            None => self.decoy_hash().await?,
        };
        let password = credentials.password;
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| anyhow!("password verification task failed: {e}"))?
            .map_err(|e| anyhow!("stored password hash is unusable: {e}"))?;

        let account = match account {
            Some(account) if valid => account,
            Some(account) => {
                tracing::info!(user_id = %account.id, "login rejected");
                return Err(AccountError::Unauthorized);
            }
            None => {
                tracing::debug!("login rejected for unknown email");
                return Err(AccountError::Unauthorized);
            }
        };

        let token = self
            .jwt
            .issue(&account.id)
            .map_err(|e| anyhow!("token signing failed: {e}"))?;

        tracing::info!(user_id = %account.id, "user logged in");
        Ok(LoginResponse {
            user_id: account.id,
            token,
        })
    }

    async fn decoy_hash(&self) -> AccountResult<String> {
        let hash = self
            .decoy_hash
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(|| hash_password(DECOY_PASSWORD))
                    .await
                    .map_err(|e| anyhow!("password hashing task failed: {e}"))?
                    .map_err(|e| anyhow!("password hashing failed: {e}"))
            })
            .await?;
        Ok(hash.clone())
    }
}
