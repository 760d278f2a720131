use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::auth::Identity;
use crate::engine::lifecycle::BookingMachine;
use crate::engine::otp::{Issued, OtpProtocol};
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus};
use crate::store::Store;

/// Binds the one-time code protocol to a booking: the driver asks for a code,
/// the customer reads it out, the driver submits it and the trip starts.
pub struct TripStart {
    store: Arc<dyn Store>,
    machine: Arc<BookingMachine>,
    otp: OtpProtocol,
}

impl TripStart {
    pub fn new(store: Arc<dyn Store>, machine: Arc<BookingMachine>, otp: OtpProtocol) -> Self {
        Self {
            store,
            machine,
            otp,
        }
    }

    /// Issues or re-issues the code for a confirmed booking.
    pub async fn issue(&self, actor: Identity, booking_id: Uuid) -> Result<Issued, AppError> {
        let booking = self.machine.load(booking_id).await?;
        self.machine.authorize_driver(actor, &booking).await?;
        require_confirmed(&booking)?;

        let email = self
            .store
            .user(booking.customer_id)
            .await?
            .map(|customer| customer.email)
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| AppError::Precondition("customer email not available".to_string()))?;

        let issued = self.otp.issue(&booking.id.to_string(), &email).await?;
        info!(booking_id = %booking.id, sent = issued.sent, "trip start code issued");
        Ok(issued)
    }

    /// Verifies the code and starts the trip. Success means the booking is
    /// now `started`; any failure leaves no partial result behind it.
    pub async fn verify(
        &self,
        actor: Identity,
        booking_id: Uuid,
        code: &str,
    ) -> Result<Booking, AppError> {
        if code.trim().is_empty() {
            return Err(AppError::Validation("OTP is required".to_string()));
        }

        let booking = self.machine.load(booking_id).await?;
        let driver = self.machine.authorize_driver(actor, &booking).await?;

        self.otp.verify(&booking.id.to_string(), code).await?;
        self.machine.start_verified(&booking, &driver).await
    }
}

fn require_confirmed(booking: &Booking) -> Result<(), AppError> {
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::Precondition(format!(
            "trip must be confirmed before starting (booking is {})",
            booking.status
        )));
    }
    Ok(())
}
