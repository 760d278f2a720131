//! Persistence ports.
//!
//! The booking core talks to storage only through these traits. Every
//! booking mutation goes through [`Store::update_booking_where`], which
//! applies a patch only if the stored status is still one of the expected
//! values. There is no call that overwrites a whole booking.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::booking::{Booking, BookingPatch, BookingStatus};
use crate::models::challenge::{Challenge, ChallengeKey};
use crate::models::driver::{Driver, RatingEntry};
use crate::models::user::User;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("booking status is {actual}")]
    StatusMismatch { actual: BookingStatus },

    #[error("storage failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the email is already registered.
    async fn insert_user(&self, user: User) -> Result<User, StoreError>;
    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn set_password_hash(&self, user_id: Uuid, password_hash: String)
    -> Result<(), StoreError>;

    async fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError>;
    async fn driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError>;
    async fn driver_by_user(&self, user_id: Uuid) -> Result<Option<Driver>, StoreError>;
    async fn available_drivers(&self) -> Result<Vec<Driver>, StoreError>;
    async fn set_availability(&self, driver_id: Uuid, available: bool)
    -> Result<Driver, StoreError>;
    async fn increment_completed_trips(&self, driver_id: Uuid) -> Result<Driver, StoreError>;
    async fn upsert_rating(&self, driver_id: Uuid, entry: RatingEntry)
    -> Result<Driver, StoreError>;

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError>;
    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;
    /// Newest first.
    async fn bookings_for_customer(&self, customer_id: Uuid) -> Result<Vec<Booking>, StoreError>;
    /// Newest first, optionally restricted to one status.
    async fn bookings_for_driver(
        &self,
        driver_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError>;
    async fn bookings_scheduled_at(
        &self,
        at: DateTime<Utc>,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError>;

    /// Atomically apply `patch` if the booking's current status is in `expected`.
    ///
    /// Returns the updated booking, [`StoreError::NotFound`] if the booking does
    /// not exist, or [`StoreError::StatusMismatch`] carrying the actual status
    /// if another writer got there first. Nothing is written on failure.
    async fn update_booking_where(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        patch: BookingPatch,
    ) -> Result<Booking, StoreError>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Replaces any challenge already stored under `key`.
    async fn upsert_challenge(&self, key: ChallengeKey, challenge: Challenge)
    -> Result<(), StoreError>;
    async fn challenge(&self, key: &ChallengeKey) -> Result<Option<Challenge>, StoreError>;
    /// Removes the challenge only if it is still the issuance identified by
    /// `nonce`. Returns whether this call removed it.
    async fn remove_challenge_if(&self, key: &ChallengeKey, nonce: Uuid)
    -> Result<bool, StoreError>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
