use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::rest::extract::JsonBody;
use crate::engine::accounts::{Registration, Session};
use crate::engine::otp::Issued;
use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/login-otp/request", post(request_login_code))
        .route("/auth/login-otp/verify", post(verify_login_code))
        .route("/auth/password-reset/request", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(reset_password))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
    pub license_number: Option<String>,
    pub vehicle_details: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state
        .accounts
        .register(Registration {
            name: payload.name,
            email: payload.email,
            phone: payload.phone,
            password: payload.password,
            role: payload.role,
            license_number: payload.license_number,
            vehicle_details: payload.vehicle_details,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(
        state.accounts.login(&payload.email, &payload.password).await?,
    ))
}

async fn request_login_code(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<EmailRequest>,
) -> Result<Json<Issued>, AppError> {
    Ok(Json(state.accounts.request_login_code(&payload.email).await?))
}

async fn verify_login_code(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<VerifyCodeRequest>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(
        state
            .accounts
            .verify_login_code(&payload.email, &payload.otp)
            .await?,
    ))
}

async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<EmailRequest>,
) -> Result<Json<Issued>, AppError> {
    Ok(Json(
        state.accounts.request_password_reset(&payload.email).await?,
    ))
}

async fn reset_password(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .accounts
        .reset_password(&payload.email, &payload.otp, &payload.new_password)
        .await?;
    Ok(Json(json!({ "message": "Password has been reset successfully." })))
}
