use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::{JsonBody, PathParam};
use crate::auth::Identity;
use crate::engine::lifecycle::NewBooking;
use crate::error::AppError;
use crate::models::booking::{Booking, TripType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/user", get(list_user_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/confirm", put(confirm_booking))
        .route("/bookings/:id/cancel", put(cancel_booking))
}

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub driver_id: Uuid,
    pub pickup: String,
    pub drop: String,
    pub scheduled_at: DateTime<Utc>,
    pub fare: Option<f64>,
    pub trip_type: TripType,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    JsonBody(payload): JsonBody<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let fare = payload
        .fare
        .ok_or_else(|| AppError::Validation("fare is required (0 is allowed)".to_string()))?;

    let booking = state
        .bookings
        .create(
            identity,
            NewBooking {
                driver_id: payload.driver_id,
                pickup: payload.pickup,
                drop: payload.drop,
                scheduled_at: payload.scheduled_at,
                fare,
                trip_type: payload.trip_type,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_user_bookings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.bookings.customer_bookings(identity).await?))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.booking_for(identity, id).await?))
}

async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.confirm(identity, id).await?))
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.cancel(identity, id).await?))
}
