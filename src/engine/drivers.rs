use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::driver::{Driver, RatingEntry};
use crate::notify::{Event, Fabric, PartyId};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Earnings {
    pub completed_trips: u64,
    pub total_earnings: f64,
}

/// Driver-facing operations that do not move a booking's status.
pub struct DriverDesk {
    store: Arc<dyn Store>,
    fabric: Arc<Fabric>,
    clock: Arc<dyn Clock>,
}

impl DriverDesk {
    pub fn new(store: Arc<dyn Store>, fabric: Arc<Fabric>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            fabric,
            clock,
        }
    }

    pub async fn me(&self, actor: Identity) -> Result<Driver, AppError> {
        self.store
            .driver_by_user(actor.party_id)
            .await?
            .ok_or_else(|| AppError::NotFound("driver profile not found".to_string()))
    }

    /// Available drivers. With `at`, drivers holding a pending or confirmed
    /// booking scheduled at exactly that time are left out.
    pub async fn available(&self, at: Option<DateTime<Utc>>) -> Result<Vec<Driver>, AppError> {
        let mut drivers = self.store.available_drivers().await?;
        if let Some(at) = at {
            let busy: HashSet<Uuid> = self
                .store
                .bookings_scheduled_at(at, &[BookingStatus::Pending, BookingStatus::Confirmed])
                .await?
                .into_iter()
                .map(|booking| booking.driver_id)
                .collect();
            drivers.retain(|driver| !busy.contains(&driver.id));
        }
        Ok(drivers)
    }

    pub async fn set_availability(
        &self,
        actor: Identity,
        available: bool,
    ) -> Result<Driver, AppError> {
        let driver = self.me(actor).await?;
        let driver = self.store.set_availability(driver.id, available).await?;
        info!(driver_id = %driver.id, available, "driver availability changed");

        self.fabric.publish(
            PartyId::Driver(driver.user_id),
            &Event::availability(driver.availability),
        );
        Ok(driver)
    }

    pub async fn bookings(
        &self,
        actor: Identity,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, AppError> {
        let driver = self.me(actor).await?;
        Ok(self.store.bookings_for_driver(driver.id, status).await?)
    }

    pub async fn earnings(&self, actor: Identity) -> Result<Earnings, AppError> {
        let driver = self.me(actor).await?;
        let completed = self
            .store
            .bookings_for_driver(driver.id, Some(BookingStatus::Completed))
            .await?;
        Ok(Earnings {
            completed_trips: driver.completed_trip_count,
            total_earnings: completed.iter().map(|booking| booking.fare).sum(),
        })
    }

    /// Records the customer's rating of the driver for one of their bookings.
    pub async fn rate(
        &self,
        actor: Identity,
        driver_id: Uuid,
        booking_id: Uuid,
        rating: u8,
        comment: String,
    ) -> Result<Driver, AppError> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
        if booking.customer_id != actor.party_id {
            return Err(AppError::Authorization(
                "only the booking's customer can rate it".to_string(),
            ));
        }
        if booking.driver_id != driver_id {
            return Err(AppError::Validation(
                "booking was not served by this driver".to_string(),
            ));
        }

        let entry = RatingEntry {
            rater_id: actor.party_id,
            booking_id,
            rating,
            comment,
            created_at: self.clock.utc(),
        };
        let driver = self.store.upsert_rating(driver_id, entry).await?;
        info!(driver_id = %driver.id, rating = driver.rating_aggregate, "driver rated");
        Ok(driver)
    }
}
