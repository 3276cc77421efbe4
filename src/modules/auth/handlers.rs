use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use libris_http::{AppError, AppResult};

use super::models::{Credentials, LoginResponse, SignupResponse};
use super::service::AccountService;

pub fn router(accounts: Arc<AccountService>) -> Router {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .with_state(accounts)
}

async fn signup(
    State(accounts): State<Arc<AccountService>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let Json(credentials) = body.map_err(bad_body)?;
    let account = accounts.signup(credentials).await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created".to_string(),
            user_id: account.id,
        }),
    ))
}

async fn login(
    State(accounts): State<Arc<AccountService>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<Json<LoginResponse>> {
    let Json(credentials) = body.map_err(bad_body)?;
    Ok(Json(accounts.login(credentials).await?))
}

fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::bad_request(format!(
        "expected a JSON body with email and password: {}",
        rejection.body_text()
    ))
}
