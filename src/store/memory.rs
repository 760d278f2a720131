use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::booking::{Booking, BookingPatch, BookingStatus};
use crate::models::challenge::{Challenge, ChallengeKey};
use crate::models::driver::{Driver, RatingEntry};
use crate::models::user::User;
use crate::store::{ChallengeStore, Store, StoreError};

/// Process-local store. Conditional updates run under the DashMap shard lock.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    users_by_email: DashMap<String, Uuid>,
    drivers: DashMap<Uuid, Driver>,
    bookings: DashMap<Uuid, Booking>,
    challenges: DashMap<ChallengeKey, Challenge>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    fn collect_bookings<F>(&self, keep: F) -> Vec<Booking>
    where
        F: Fn(&Booking) -> bool,
    {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        match self.users_by_email.entry(email_key(&user.email)) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("user {}", user.email))),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.users.insert(user.id, user.clone());
                Ok(user)
            }
        }
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let Some(id) = self.users_by_email.get(&email_key(email)).map(|entry| *entry) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn set_password_hash(
        &self,
        user_id: Uuid,
        password_hash: String,
    ) -> Result<(), StoreError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.password_hash = password_hash;
        Ok(())
    }

    async fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError> {
        let duplicate = self
            .drivers
            .iter()
            .any(|entry| entry.value().user_id == driver.user_id);
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "driver profile for user {}",
                driver.user_id
            )));
        }
        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn driver_by_user(&self, user_id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self
            .drivers
            .iter()
            .find(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone()))
    }

    async fn available_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        Ok(self
            .drivers
            .iter()
            .filter(|entry| entry.value().availability)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn set_availability(&self, driver_id: Uuid, available: bool) -> Result<Driver, StoreError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {driver_id}")))?;
        driver.availability = available;
        Ok(driver.clone())
    }

    async fn increment_completed_trips(&self, driver_id: Uuid) -> Result<Driver, StoreError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {driver_id}")))?;
        driver.completed_trip_count = driver.completed_trip_count.saturating_add(1);
        Ok(driver.clone())
    }

    async fn upsert_rating(&self, driver_id: Uuid, entry: RatingEntry) -> Result<Driver, StoreError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {driver_id}")))?;
        driver.upsert_rating(entry);
        Ok(driver.clone())
    }

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        match self.bookings.entry(booking.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("booking {}", booking.id))),
            Entry::Vacant(slot) => {
                slot.insert(booking.clone());
                Ok(booking)
            }
        }
    }

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|entry| entry.value().clone()))
    }

    async fn bookings_for_customer(&self, customer_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect_bookings(|b| b.customer_id == customer_id))
    }

    async fn bookings_for_driver(
        &self,
        driver_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect_bookings(|b| {
            b.driver_id == driver_id && status.is_none_or(|wanted| b.status == wanted)
        }))
    }

    async fn bookings_scheduled_at(
        &self,
        at: DateTime<Utc>,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect_bookings(|b| b.scheduled_at == at && statuses.contains(&b.status)))
    }

    async fn update_booking_where(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        patch: BookingPatch,
    ) -> Result<Booking, StoreError> {
        let mut booking = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {id}")))?;

        if !expected.contains(&booking.status) {
            return Err(StoreError::StatusMismatch {
                actual: booking.status,
            });
        }

        if let Some(status) = patch.status {
            booking.status = status;
        }
        if let Some(fare) = patch.fare {
            booking.fare = fare;
        }

        Ok(booking.clone())
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn upsert_challenge(
        &self,
        key: ChallengeKey,
        challenge: Challenge,
    ) -> Result<(), StoreError> {
        self.challenges.insert(key, challenge);
        Ok(())
    }

    async fn challenge(&self, key: &ChallengeKey) -> Result<Option<Challenge>, StoreError> {
        Ok(self.challenges.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove_challenge_if(&self, key: &ChallengeKey, nonce: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .challenges
            .remove_if(key, |_, challenge| challenge.nonce == nonce)
            .is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.challenges.len();
        self.challenges.retain(|_, challenge| !challenge.is_expired(now));
        Ok(before.saturating_sub(self.challenges.len()))
    }
}
