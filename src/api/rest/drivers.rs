use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::{JsonBody, PathParam, QueryParams};
use crate::auth::Identity;
use crate::engine::drivers::Earnings;
use crate::engine::otp::Issued;
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::driver::Driver;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", get(list_available_drivers))
        .route("/drivers/me", get(get_me))
        .route("/drivers/status", put(set_availability))
        .route("/drivers/earnings", get(get_earnings))
        .route("/drivers/bookings", get(list_driver_bookings))
        .route("/drivers/bookings/:id/status", put(update_booking_status))
        .route("/drivers/bookings/:id/fare", patch(set_fare))
        .route("/drivers/bookings/:id/start-otp", post(send_start_code))
        .route("/drivers/bookings/:id/start-verify", post(verify_start_code))
        .route("/drivers/:id/rating", post(rate_driver))
}

#[derive(Deserialize)]
pub struct AvailableQuery {
    pub at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub status: Option<BookingStatus>,
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: BookingStatus,
}

#[derive(Deserialize)]
pub struct SetFareRequest {
    pub fare: f64,
}

#[derive(Deserialize)]
pub struct VerifyStartRequest {
    pub otp: String,
}

#[derive(Deserialize)]
pub struct RateDriverRequest {
    pub booking_id: Uuid,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

async fn list_available_drivers(
    State(state): State<Arc<AppState>>,
    _identity: Identity,
    QueryParams(query): QueryParams<AvailableQuery>,
) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.drivers.available(query.at).await?))
}

async fn get_me(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.me(identity).await?))
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    JsonBody(payload): JsonBody<AvailabilityRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(
        state
            .drivers
            .set_availability(identity, payload.available)
            .await?,
    ))
}

async fn get_earnings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Earnings>, AppError> {
    Ok(Json(state.drivers.earnings(identity).await?))
}

async fn list_driver_bookings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    QueryParams(query): QueryParams<StatusQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.drivers.bookings(identity, query.status).await?))
}

async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<UpdateStatusRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = match payload.status {
        BookingStatus::Accepted => state.bookings.accept(identity, id).await?,
        BookingStatus::Rejected => state.bookings.reject(identity, id).await?,
        BookingStatus::Completed => state.bookings.complete(identity, id).await?,
        BookingStatus::Started => {
            return Err(AppError::Validation(
                "trips are started with the customer's code: use start-otp then start-verify"
                    .to_string(),
            ));
        }
        other => {
            return Err(AppError::Validation(format!(
                "drivers cannot set status {other}"
            )));
        }
    };
    Ok(Json(booking))
}

async fn set_fare(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<SetFareRequest>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(
        state.bookings.set_fare(identity, id, payload.fare).await?,
    ))
}

async fn send_start_code(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Issued>, AppError> {
    Ok(Json(state.trip_start.issue(identity, id).await?))
}

async fn verify_start_code(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<VerifyStartRequest>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(
        state
            .trip_start
            .verify(identity, id, &payload.otp)
            .await?,
    ))
}

async fn rate_driver(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<RateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(
        state
            .drivers
            .rate(identity, id, payload.booking_id, payload.rating, payload.comment)
            .await?,
    ))
}
