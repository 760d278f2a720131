use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::user::Role;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TripType {
    OneWay,
    RoundTrip,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Confirmed,
    Started,
    Completed,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Confirmed,
        BookingStatus::Started,
        BookingStatus::Completed,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
    ];

    /// States a driver may still change the fare in.
    pub const OPEN: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Confirmed,
        BookingStatus::Started,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Started => "started",
            BookingStatus::Completed => "completed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Rejected | BookingStatus::Cancelled
        )
    }

    /// The only place the transition table is encoded.
    pub fn apply(self, event: BookingEvent) -> Result<BookingStatus, TransitionError> {
        if event.sources().contains(&self) {
            Ok(event.target())
        } else {
            Err(TransitionError { from: self, event })
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status-changing events. Fare changes are not events: they never move `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingEvent {
    Accept,
    Reject,
    Confirm,
    Start,
    Complete,
    Cancel,
}

impl BookingEvent {
    pub const ALL: [BookingEvent; 6] = [
        BookingEvent::Accept,
        BookingEvent::Reject,
        BookingEvent::Confirm,
        BookingEvent::Start,
        BookingEvent::Complete,
        BookingEvent::Cancel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingEvent::Accept => "accept",
            BookingEvent::Reject => "reject",
            BookingEvent::Confirm => "confirm",
            BookingEvent::Start => "start",
            BookingEvent::Complete => "complete",
            BookingEvent::Cancel => "cancel",
        }
    }

    pub fn actor(self) -> Role {
        match self {
            BookingEvent::Confirm | BookingEvent::Cancel => Role::Customer,
            BookingEvent::Accept
            | BookingEvent::Reject
            | BookingEvent::Start
            | BookingEvent::Complete => Role::Driver,
        }
    }

    pub fn sources(self) -> &'static [BookingStatus] {
        match self {
            BookingEvent::Accept | BookingEvent::Reject => &[BookingStatus::Pending],
            BookingEvent::Confirm => &[BookingStatus::Accepted],
            BookingEvent::Start => &[BookingStatus::Confirmed],
            BookingEvent::Complete => &[BookingStatus::Started],
            BookingEvent::Cancel => &[
                BookingStatus::Pending,
                BookingStatus::Accepted,
                BookingStatus::Confirmed,
            ],
        }
    }

    pub fn target(self) -> BookingStatus {
        match self {
            BookingEvent::Accept => BookingStatus::Accepted,
            BookingEvent::Reject => BookingStatus::Rejected,
            BookingEvent::Confirm => BookingStatus::Confirmed,
            BookingEvent::Start => BookingStatus::Started,
            BookingEvent::Complete => BookingStatus::Completed,
            BookingEvent::Cancel => BookingStatus::Cancelled,
        }
    }
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{}", describe(.from, .event))]
pub struct TransitionError {
    pub from: BookingStatus,
    pub event: BookingEvent,
}

fn describe(from: &BookingStatus, event: &BookingEvent) -> String {
    match event {
        BookingEvent::Accept => format!("only pending bookings can be accepted (booking is {from})"),
        BookingEvent::Reject => format!("only pending bookings can be rejected (booking is {from})"),
        BookingEvent::Confirm => {
            format!("only accepted bookings can be confirmed (booking is {from})")
        }
        BookingEvent::Start => format!("trip must be confirmed before starting (booking is {from})"),
        BookingEvent::Complete => format!("only started trips can be completed (booking is {from})"),
        BookingEvent::Cancel => format!("cannot cancel a booking that is {from}"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Uuid,
    pub pickup: String,
    pub drop: String,
    pub pickup_coords: Option<GeoPoint>,
    pub drop_coords: Option<GeoPoint>,
    pub distance_km: Option<f64>,
    pub trip_type: TripType,
    pub fare: f64,
    pub status: BookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn has_positive_fare(&self) -> bool {
        self.fare.is_finite() && self.fare > 0.0
    }
}

/// Fields a conditional update may write. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub fare: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_follows_table() {
        let mut status = BookingStatus::Pending;
        for event in [
            BookingEvent::Accept,
            BookingEvent::Confirm,
            BookingEvent::Start,
            BookingEvent::Complete,
        ] {
            status = status.apply(event).unwrap();
        }
        assert_eq!(status, BookingStatus::Completed);
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for status in BookingStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for event in BookingEvent::ALL {
                let err = status.apply(event).unwrap_err();
                assert_eq!(err.from, status);
            }
        }
    }

    #[test]
    fn only_terminal_states_have_no_outgoing_edges() {
        for status in BookingStatus::ALL {
            let outgoing = BookingEvent::ALL
                .into_iter()
                .filter(|event| status.apply(*event).is_ok())
                .count();
            assert_eq!(outgoing == 0, status.is_terminal(), "{status}");
        }
    }

    #[test]
    fn cannot_skip_to_started() {
        assert!(BookingStatus::Pending.apply(BookingEvent::Start).is_err());
        assert!(BookingStatus::Accepted.apply(BookingEvent::Start).is_err());
    }

    #[test]
    fn cancel_is_allowed_from_pre_trip_states_only() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Accepted,
            BookingStatus::Confirmed,
        ] {
            assert_eq!(
                status.apply(BookingEvent::Cancel),
                Ok(BookingStatus::Cancelled)
            );
        }
        assert!(BookingStatus::Started.apply(BookingEvent::Cancel).is_err());
    }

    #[test]
    fn error_message_is_actionable() {
        let err = BookingStatus::Pending.apply(BookingEvent::Confirm).unwrap_err();
        assert_eq!(
            err.to_string(),
            "only accepted bookings can be confirmed (booking is pending)"
        );
    }

    #[test]
    fn status_and_trip_type_serialize_like_the_wire_format() {
        assert_eq!(
            serde_json::to_value(BookingStatus::Cancelled).unwrap(),
            "cancelled"
        );
        assert_eq!(serde_json::to_value(TripType::RoundTrip).unwrap(), "round-trip");
    }
}
