//! Booking state machine.
//!
//! Owns every write to `Booking.status`. Each transition is:
//! authorize -> check preconditions -> conditional update in the store ->
//! notify both parties. Notification happens only after the store accepted
//! the write and its failure is never surfaced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::AppError;
use crate::geo::{trip_distance_km, Geocoder};
use crate::models::booking::{
    Booking, BookingEvent, BookingPatch, BookingStatus, GeoPoint, TransitionError, TripType,
};
use crate::models::driver::Driver;
use crate::models::user::Role;
use crate::notify::{Event, Fabric, PartyId};
use crate::observability::metrics::Metrics;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub driver_id: Uuid,
    pub pickup: String,
    pub drop: String,
    pub scheduled_at: DateTime<Utc>,
    pub fare: f64,
    pub trip_type: TripType,
}

pub struct BookingMachine {
    store: Arc<dyn Store>,
    geocoder: Arc<dyn Geocoder>,
    fabric: Arc<Fabric>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl BookingMachine {
    pub fn new(
        store: Arc<dyn Store>,
        geocoder: Arc<dyn Geocoder>,
        fabric: Arc<Fabric>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            geocoder,
            fabric,
            clock,
            metrics,
        }
    }

    pub async fn create(&self, actor: Identity, request: NewBooking) -> Result<Booking, AppError> {
        if actor.role != Role::Customer {
            return Err(AppError::Authorization(
                "only customers can request a driver".to_string(),
            ));
        }
        let pickup = request.pickup.trim();
        let drop = request.drop.trim();
        if pickup.is_empty() || drop.is_empty() {
            return Err(AppError::Validation(
                "pickup and drop locations are required".to_string(),
            ));
        }
        if !request.fare.is_finite() || request.fare < 0.0 {
            return Err(AppError::Validation(
                "fare must be a non-negative number".to_string(),
            ));
        }

        let driver = self
            .store
            .driver(request.driver_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("driver {} not found", request.driver_id)))?;
        if !driver.availability {
            return Err(AppError::Precondition("driver not available".to_string()));
        }

        let (pickup_coords, drop_coords) =
            tokio::join!(self.locate(pickup), self.locate(drop));

        let booking = Booking {
            id: Uuid::new_v4(),
            customer_id: actor.party_id,
            driver_id: driver.id,
            pickup: pickup.to_string(),
            drop: drop.to_string(),
            pickup_coords,
            drop_coords,
            distance_km: trip_distance_km(pickup_coords.as_ref(), drop_coords.as_ref()),
            trip_type: request.trip_type,
            fare: request.fare,
            status: BookingStatus::Pending,
            scheduled_at: request.scheduled_at,
            created_at: self.clock.utc(),
        };

        let booking = self.store.insert_booking(booking).await?;
        info!(
            booking_id = %booking.id,
            customer_id = %booking.customer_id,
            driver_id = %booking.driver_id,
            distance_km = ?booking.distance_km,
            "booking created"
        );

        self.fabric
            .publish(PartyId::Driver(driver.user_id), &Event::created(&booking));

        Ok(booking)
    }

    pub async fn accept(&self, actor: Identity, booking_id: Uuid) -> Result<Booking, AppError> {
        self.transition(actor, booking_id, BookingEvent::Accept).await
    }

    pub async fn reject(&self, actor: Identity, booking_id: Uuid) -> Result<Booking, AppError> {
        self.transition(actor, booking_id, BookingEvent::Reject).await
    }

    pub async fn confirm(&self, actor: Identity, booking_id: Uuid) -> Result<Booking, AppError> {
        self.transition(actor, booking_id, BookingEvent::Confirm).await
    }

    pub async fn complete(&self, actor: Identity, booking_id: Uuid) -> Result<Booking, AppError> {
        self.transition(actor, booking_id, BookingEvent::Complete).await
    }

    pub async fn cancel(&self, actor: Identity, booking_id: Uuid) -> Result<Booking, AppError> {
        self.transition(actor, booking_id, BookingEvent::Cancel).await
    }

    /// Moves a confirmed booking to `started`. Only the trip-start protocol
    /// calls this, after it has authorized the driver and consumed the code.
    pub(crate) async fn start_verified(
        &self,
        booking: &Booking,
        driver: &Driver,
    ) -> Result<Booking, AppError> {
        let result = self.commit(booking.id, BookingEvent::Start, BookingPatch::default()).await;
        self.record(BookingEvent::Start, &result);
        let updated = result?;
        info!(booking_id = %updated.id, "trip started");
        self.announce(&updated, Some(driver));
        Ok(updated)
    }

    /// Driver sets the fare. Allowed in any state that is not terminal.
    pub async fn set_fare(
        &self,
        actor: Identity,
        booking_id: Uuid,
        fare: f64,
    ) -> Result<Booking, AppError> {
        if !fare.is_finite() || fare <= 0.0 {
            return Err(AppError::Validation(
                "fare must be a positive number".to_string(),
            ));
        }

        let booking = self.load(booking_id).await?;
        self.authorize_driver(actor, &booking).await?;

        let patch = BookingPatch {
            status: None,
            fare: Some(fare),
        };
        let updated = self
            .store
            .update_booking_where(booking_id, &BookingStatus::OPEN, patch)
            .await
            .map_err(|err| match err {
                StoreError::StatusMismatch { actual } => AppError::Precondition(format!(
                    "fare cannot change once the booking is {actual}"
                )),
                other => other.into(),
            })?;

        info!(booking_id = %updated.id, fare, "fare updated");
        Ok(updated)
    }

    pub async fn customer_bookings(&self, actor: Identity) -> Result<Vec<Booking>, AppError> {
        Ok(self.store.bookings_for_customer(actor.party_id).await?)
    }

    /// Booking as seen by its customer or its assigned driver.
    pub async fn booking_for(&self, actor: Identity, booking_id: Uuid) -> Result<Booking, AppError> {
        let booking = self.load(booking_id).await?;
        if actor.party_id == booking.customer_id {
            return Ok(booking);
        }
        self.authorize_driver(actor, &booking).await?;
        Ok(booking)
    }

    pub async fn load(&self, booking_id: Uuid) -> Result<Booking, AppError> {
        self.store
            .booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))
    }

    /// Resolves the acting driver and checks they are the booking's driver.
    pub async fn authorize_driver(
        &self,
        actor: Identity,
        booking: &Booking,
    ) -> Result<Driver, AppError> {
        let driver = self
            .store
            .driver_by_user(actor.party_id)
            .await?
            .ok_or_else(|| AppError::Authorization("only drivers can do this".to_string()))?;
        if driver.id != booking.driver_id {
            return Err(AppError::Authorization(
                "booking is assigned to another driver".to_string(),
            ));
        }
        Ok(driver)
    }

    fn authorize_customer(&self, actor: Identity, booking: &Booking) -> Result<(), AppError> {
        if actor.party_id != booking.customer_id {
            return Err(AppError::Authorization(
                "booking belongs to another customer".to_string(),
            ));
        }
        Ok(())
    }

    async fn transition(
        &self,
        actor: Identity,
        booking_id: Uuid,
        event: BookingEvent,
    ) -> Result<Booking, AppError> {
        let result = self.run(actor, booking_id, event).await;
        self.record(event, &result);
        result
    }

    async fn run(
        &self,
        actor: Identity,
        booking_id: Uuid,
        event: BookingEvent,
    ) -> Result<Booking, AppError> {
        if event == BookingEvent::Start {
            return Err(AppError::Precondition(
                "trips are started by verifying the customer's code".to_string(),
            ));
        }

        let booking = self.load(booking_id).await?;
        let driver = match event.actor() {
            Role::Driver => Some(self.authorize_driver(actor, &booking).await?),
            _ => {
                self.authorize_customer(actor, &booking)?;
                None
            }
        };

        booking.status.apply(event)?;
        if event == BookingEvent::Accept && !booking.has_positive_fare() {
            return Err(AppError::Precondition(
                "set fare before confirming the booking".to_string(),
            ));
        }

        let updated = self.commit(booking_id, event, BookingPatch::default()).await?;

        if event == BookingEvent::Complete {
            self.store
                .increment_completed_trips(updated.driver_id)
                .await?;
        }

        info!(
            booking_id = %updated.id,
            event = %event,
            status = %updated.status,
            "booking transitioned"
        );

        let driver = match driver {
            Some(driver) => Some(driver),
            None => self.store.driver(updated.driver_id).await.unwrap_or_else(|err| {
                warn!(booking_id = %updated.id, error = %err, "driver lookup failed; driver not notified");
                None
            }),
        };
        self.announce(&updated, driver.as_ref());

        Ok(updated)
    }

    /// Conditional write from any of the event's source states.
    async fn commit(
        &self,
        booking_id: Uuid,
        event: BookingEvent,
        mut patch: BookingPatch,
    ) -> Result<Booking, AppError> {
        patch.status = Some(event.target());
        self.store
            .update_booking_where(booking_id, event.sources(), patch)
            .await
            .map_err(|err| match err {
                StoreError::StatusMismatch { actual } => {
                    TransitionError { from: actual, event }.into()
                }
                other => other.into(),
            })
    }

    fn announce(&self, booking: &Booking, driver: Option<&Driver>) {
        let event = Event::status(booking);
        self.fabric
            .publish(PartyId::Customer(booking.customer_id), &event);
        match driver {
            Some(driver) => {
                self.fabric.publish(PartyId::Driver(driver.user_id), &event);
            }
            None => warn!(booking_id = %booking.id, "no driver record; driver party not notified"),
        }
    }

    fn record(&self, event: BookingEvent, result: &Result<Booking, AppError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        self.metrics
            .booking_transitions_total
            .with_label_values(&[event.as_str(), outcome])
            .inc();
    }

    async fn locate(&self, text: &str) -> Option<GeoPoint> {
        match self.geocoder.resolve(text).await {
            Ok(point) => point,
            Err(err) => {
                warn!(place = %text, error = %err, "geocoding failed; continuing without coordinates");
                None
            }
        }
    }
}
