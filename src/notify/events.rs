use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::booking::{Booking, BookingStatus, TripType};

/// Server-to-client messages. Serialized as `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    #[serde(rename = "booking:created")]
    BookingCreated(BookingCreated),
    #[serde(rename = "booking:status")]
    BookingStatus(BookingStatusChanged),
    #[serde(rename = "driver:status")]
    DriverStatus(DriverStatus),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BookingCreated(_) => "booking:created",
            Event::BookingStatus(_) => "booking:status",
            Event::DriverStatus(_) => "driver:status",
        }
    }

    pub fn created(booking: &Booking) -> Self {
        Event::BookingCreated(BookingCreated {
            booking_id: booking.id,
            pickup: booking.pickup.clone(),
            drop: booking.drop.clone(),
            scheduled_at: booking.scheduled_at,
            fare: booking.fare,
            trip_type: booking.trip_type,
        })
    }

    pub fn status(booking: &Booking) -> Self {
        Event::BookingStatus(BookingStatusChanged {
            booking_id: booking.id,
            status: booking.status,
        })
    }

    pub fn availability(availability: bool) -> Self {
        Event::DriverStatus(DriverStatus { availability })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub booking_id: Uuid,
    pub pickup: String,
    pub drop: String,
    pub scheduled_at: DateTime<Utc>,
    pub fare: f64,
    pub trip_type: TripType,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingStatusChanged {
    pub booking_id: Uuid,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DriverStatus {
    pub availability: bool,
}
