use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mockable::Clock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::config::Config;
use crate::engine::accounts::Registration;
use crate::engine::lifecycle::NewBooking;
use crate::engine::otp::test_support::{FixedCode, ManualClock, RecordingMailer};
use crate::error::{AppError, DeliveryError};
use crate::geo::Geocoder;
use crate::models::booking::{Booking, BookingStatus, GeoPoint, TripType};
use crate::models::user::Role;
use crate::notify::{Event, PartyId};
use crate::state::{AppState, Collaborators};
use crate::store::{MemoryStore, Store};

const CODE: &str = "482913";

/// Known places resolve, "nowhere" matches nothing, anything else errors.
struct StubGeocoder(HashMap<&'static str, GeoPoint>);

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn resolve(&self, text: &str) -> Result<Option<GeoPoint>, DeliveryError> {
        match self.0.get(text) {
            Some(point) => Ok(Some(*point)),
            None if text == "nowhere" => Ok(None),
            None => Err(DeliveryError::Transport("geocoder unreachable".to_string())),
        }
    }
}

struct Harness {
    state: Arc<AppState>,
    clock: Arc<ManualClock>,
    mailer: Arc<RecordingMailer>,
    customer: Identity,
    driver: Identity,
    driver_id: Uuid,
}

impl Harness {
    async fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let mailer = Arc::new(RecordingMailer::default());
        let geocoder = StubGeocoder(HashMap::from([
            ("Origin", GeoPoint { lat: 0.0, lon: 0.0 }),
            ("One East", GeoPoint { lat: 0.0, lon: 1.0 }),
        ]));
        let state = Arc::new(AppState::new(
            &Config::local(),
            Collaborators {
                store: Arc::new(MemoryStore::new()),
                mailer: mailer.clone(),
                geocoder: Arc::new(geocoder),
                codes: Arc::new(FixedCode(CODE)),
                clock: clock.clone(),
            },
        ));

        let customer = state
            .accounts
            .register(registration("rider@example.com", Role::Customer))
            .await
            .unwrap();
        let driver = state
            .accounts
            .register(registration("driver@example.com", Role::Driver))
            .await
            .unwrap();
        let driver_id = driver.driver_id.unwrap();

        Self {
            state,
            clock,
            mailer,
            customer: Identity {
                party_id: customer.id,
                role: Role::Customer,
            },
            driver: Identity {
                party_id: driver.id,
                role: Role::Driver,
            },
            driver_id,
        }
    }

    async fn book(&self, fare: f64) -> Booking {
        self.book_between("Origin", "One East", fare).await
    }

    async fn book_between(&self, pickup: &str, drop: &str, fare: f64) -> Booking {
        self.state
            .bookings
            .create(
                self.customer,
                NewBooking {
                    driver_id: self.driver_id,
                    pickup: pickup.to_string(),
                    drop: drop.to_string(),
                    scheduled_at: Utc::now() + Duration::hours(2),
                    fare,
                    trip_type: TripType::OneWay,
                },
            )
            .await
            .unwrap()
    }

    /// Books, accepts and confirms.
    async fn confirmed(&self) -> Booking {
        let booking = self.book(500.0).await;
        self.state.bookings.accept(self.driver, booking.id).await.unwrap();
        self.state
            .bookings
            .confirm(self.customer, booking.id)
            .await
            .unwrap()
    }

    async fn started(&self) -> Booking {
        let booking = self.confirmed().await;
        self.state.trip_start.issue(self.driver, booking.id).await.unwrap();
        self.state
            .trip_start
            .verify(self.driver, booking.id, CODE)
            .await
            .unwrap()
    }

    fn listen(&self, party: PartyId) -> mpsc::Receiver<Event> {
        let (connection, rx) = self.state.fabric.connect();
        assert!(self.state.fabric.register(connection, party));
        rx
    }

    async fn stranger(&self, role: Role) -> Identity {
        let email = format!("{}@example.com", Uuid::new_v4());
        let user = self
            .state
            .accounts
            .register(registration(&email, role))
            .await
            .unwrap();
        Identity {
            party_id: user.id,
            role,
        }
    }
}

fn registration(email: &str, role: Role) -> Registration {
    let is_driver = role == Role::Driver;
    Registration {
        name: "Test Person".to_string(),
        email: email.to_string(),
        phone: "5550100".to_string(),
        password: "secret123".to_string(),
        role,
        license_number: is_driver.then(|| "DL-0042".to_string()),
        vehicle_details: is_driver.then(|| "White sedan".to_string()),
    }
}

fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn statuses(events: &[Event]) -> Vec<BookingStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::BookingStatus(change) => Some(change.status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn accept_requires_a_positive_fare() {
    let h = Harness::new().await;
    let booking = h.book(0.0).await;

    let err = h.state.bookings.accept(h.driver, booking.id).await.unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));
    assert_eq!(h.state.bookings.load(booking.id).await.unwrap().status, BookingStatus::Pending);

    h.state.bookings.set_fare(h.driver, booking.id, 1.0).await.unwrap();
    let accepted = h.state.bookings.accept(h.driver, booking.id).await.unwrap();
    assert_eq!(accepted.status, BookingStatus::Accepted);
    assert_eq!(accepted.fare, 1.0);
}

#[tokio::test]
async fn confirm_only_from_accepted() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;

    let err = h.state.bookings.confirm(h.customer, booking.id).await.unwrap_err();
    match err {
        AppError::Precondition(message) => assert!(message.contains("accepted"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn terminal_states_refuse_every_event() {
    let h = Harness::new().await;

    let rejected = h.book(500.0).await;
    h.state.bookings.reject(h.driver, rejected.id).await.unwrap();
    let cancelled = h.book(500.0).await;
    h.state.bookings.cancel(h.customer, cancelled.id).await.unwrap();
    let completed = h.started().await;
    h.state.bookings.complete(h.driver, completed.id).await.unwrap();

    for booking in [&rejected, &cancelled, &completed] {
        let machine = &h.state.bookings;
        let before = machine.load(booking.id).await.unwrap().status;
        assert!(before.is_terminal());

        let attempts = [
            machine.accept(h.driver, booking.id).await,
            machine.reject(h.driver, booking.id).await,
            machine.confirm(h.customer, booking.id).await,
            machine.complete(h.driver, booking.id).await,
            machine.cancel(h.customer, booking.id).await,
            machine.set_fare(h.driver, booking.id, 10.0).await,
        ];
        for attempt in attempts {
            assert!(matches!(attempt, Err(AppError::Precondition(_))));
        }
        assert!(matches!(
            h.state.trip_start.issue(h.driver, booking.id).await,
            Err(AppError::Precondition(_))
        ));
        assert_eq!(machine.load(booking.id).await.unwrap().status, before);
    }
}

#[tokio::test]
async fn cancel_from_every_pre_trip_state() {
    let h = Harness::new().await;

    let pending = h.book(500.0).await;
    let accepted = h.book(500.0).await;
    h.state.bookings.accept(h.driver, accepted.id).await.unwrap();
    let confirmed = h.confirmed().await;

    for booking in [pending, accepted, confirmed] {
        let cancelled = h.state.bookings.cancel(h.customer, booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
    }

    let started = h.started().await;
    assert!(matches!(
        h.state.bookings.cancel(h.customer, started.id).await,
        Err(AppError::Precondition(_))
    ));
}

#[tokio::test]
async fn only_the_assigned_parties_can_act() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;
    let other_driver = h.stranger(Role::Driver).await;
    let other_customer = h.stranger(Role::Customer).await;

    assert!(matches!(
        h.state.bookings.accept(other_driver, booking.id).await,
        Err(AppError::Authorization(_))
    ));
    assert!(matches!(
        h.state.bookings.accept(h.customer, booking.id).await,
        Err(AppError::Authorization(_))
    ));
    assert!(matches!(
        h.state.bookings.set_fare(other_driver, booking.id, 10.0).await,
        Err(AppError::Authorization(_))
    ));

    h.state.bookings.accept(h.driver, booking.id).await.unwrap();
    assert!(matches!(
        h.state.bookings.confirm(other_customer, booking.id).await,
        Err(AppError::Authorization(_))
    ));
    assert!(matches!(
        h.state.bookings.cancel(h.driver, booking.id).await,
        Err(AppError::Authorization(_))
    ));
    assert!(matches!(
        h.state.bookings.booking_for(other_customer, booking.id).await,
        Err(AppError::Authorization(_))
    ));
}

#[tokio::test]
async fn only_customers_create_bookings() {
    let h = Harness::new().await;
    let err = h
        .state
        .bookings
        .create(
            h.driver,
            NewBooking {
                driver_id: h.driver_id,
                pickup: "Origin".to_string(),
                drop: "One East".to_string(),
                scheduled_at: Utc::now(),
                fare: 100.0,
                trip_type: TripType::Hourly,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
}

#[tokio::test]
async fn unavailable_driver_cannot_be_booked() {
    let h = Harness::new().await;
    h.state.drivers.set_availability(h.driver, false).await.unwrap();

    let err = h
        .state
        .bookings
        .create(
            h.customer,
            NewBooking {
                driver_id: h.driver_id,
                pickup: "Origin".to_string(),
                drop: "One East".to_string(),
                scheduled_at: Utc::now(),
                fare: 100.0,
                trip_type: TripType::OneWay,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));
}

#[tokio::test]
async fn distance_comes_from_geocoded_endpoints() {
    let h = Harness::new().await;

    let booking = h.book(500.0).await;
    let distance = booking.distance_km.unwrap();
    assert!((distance - 111.19).abs() < 0.1, "{distance}");
    assert_eq!(booking.pickup_coords, Some(GeoPoint { lat: 0.0, lon: 0.0 }));

    let unmatched = h.book_between("Origin", "nowhere", 500.0).await;
    assert!(unmatched.drop_coords.is_none());
    assert!(unmatched.distance_km.is_none());

    let failed = h.book_between("Origin", "Atlantis", 500.0).await;
    assert_eq!(failed.status, BookingStatus::Pending);
    assert!(failed.distance_km.is_none());
}

#[tokio::test]
async fn creation_notifies_the_driver_only() {
    let h = Harness::new().await;
    let mut driver_rx = h.listen(PartyId::Driver(h.driver.party_id));
    let mut customer_rx = h.listen(PartyId::Customer(h.customer.party_id));

    let booking = h.book(500.0).await;

    let events = drain(&mut driver_rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::BookingCreated(created) => assert_eq!(created.booking_id, booking.id),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(drain(&mut customer_rx).is_empty());
}

#[tokio::test]
async fn transitions_notify_both_parties() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;
    let mut driver_rx = h.listen(PartyId::Driver(h.driver.party_id));
    let mut customer_rx = h.listen(PartyId::Customer(h.customer.party_id));

    h.state.bookings.accept(h.driver, booking.id).await.unwrap();
    h.state.bookings.confirm(h.customer, booking.id).await.unwrap();

    let expected = vec![BookingStatus::Accepted, BookingStatus::Confirmed];
    assert_eq!(statuses(&drain(&mut driver_rx)), expected);
    assert_eq!(statuses(&drain(&mut customer_rx)), expected);
}

#[tokio::test]
async fn failed_transition_is_silent() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;
    let mut customer_rx = h.listen(PartyId::Customer(h.customer.party_id));

    assert!(h.state.bookings.confirm(h.customer, booking.id).await.is_err());
    assert!(drain(&mut customer_rx).is_empty());
}

#[tokio::test]
async fn full_trip_with_verified_start() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;
    h.state.bookings.accept(h.driver, booking.id).await.unwrap();
    h.state.bookings.confirm(h.customer, booking.id).await.unwrap();

    let mut driver_rx = h.listen(PartyId::Driver(h.driver.party_id));

    let issued = h.state.trip_start.issue(h.driver, booking.id).await.unwrap();
    assert!(issued.sent);
    {
        let sent = h.mailer.sent.lock().unwrap();
        let mail = sent.last().unwrap();
        assert_eq!(mail.to, "rider@example.com");
        assert!(mail.body.contains(CODE));
    }

    let started = h
        .state
        .trip_start
        .verify(h.driver, booking.id, CODE)
        .await
        .unwrap();
    assert_eq!(started.status, BookingStatus::Started);

    let events = drain(&mut driver_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(statuses(&events), vec![BookingStatus::Started]);

    let completed = h.state.bookings.complete(h.driver, booking.id).await.unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    let earnings = h.state.drivers.earnings(h.driver).await.unwrap();
    assert_eq!(earnings.completed_trips, 1);
    assert_eq!(earnings.total_earnings, 500.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_verifies_and_cancel_have_one_winner() {
    let h = Harness::new().await;

    for _ in 0..100 {
        let id = h.confirmed().await.id;
        h.state.trip_start.issue(h.driver, id).await.unwrap();

        let verifies: Vec<_> = (0..2)
            .map(|_| {
                let state = h.state.clone();
                let driver = h.driver;
                tokio::spawn(async move {
                    state.trip_start.verify(driver, id, CODE).await.is_ok()
                })
            })
            .collect();
        let cancel = {
            let state = h.state.clone();
            let customer = h.customer;
            tokio::spawn(async move { state.bookings.cancel(customer, id).await.is_ok() })
        };

        let mut verified = 0;
        for verify in verifies {
            if verify.await.unwrap() {
                verified += 1;
            }
        }
        let cancelled = cancel.await.unwrap();
        assert_eq!(verified + usize::from(cancelled), 1);

        let status = h.state.bookings.load(id).await.unwrap().status;
        let expected = if cancelled {
            BookingStatus::Cancelled
        } else {
            BookingStatus::Started
        };
        assert_eq!(status, expected);
    }
}

#[tokio::test]
async fn start_code_is_single_use() {
    let h = Harness::new().await;
    let booking = h.confirmed().await;
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();

    h.state
        .trip_start
        .verify(h.driver, booking.id, CODE)
        .await
        .unwrap();
    assert!(matches!(
        h.state.trip_start.verify(h.driver, booking.id, CODE).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn wrong_code_leaves_booking_confirmed() {
    let h = Harness::new().await;
    let booking = h.confirmed().await;
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();

    assert!(matches!(
        h.state.trip_start.verify(h.driver, booking.id, "000000").await,
        Err(AppError::Mismatch(_))
    ));
    assert_eq!(
        h.state.bookings.load(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert!(h.state.trip_start.verify(h.driver, booking.id, CODE).await.is_ok());
}

#[tokio::test]
async fn expired_start_code_is_refused() {
    let h = Harness::new().await;
    let booking = h.confirmed().await;
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();
    h.clock.advance(Duration::seconds(301));

    assert!(matches!(
        h.state.trip_start.verify(h.driver, booking.id, CODE).await,
        Err(AppError::Expired(_))
    ));
    assert_eq!(
        h.state.bookings.load(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
}

#[tokio::test]
async fn reissue_restarts_the_start_window() {
    let h = Harness::new().await;
    let booking = h.confirmed().await;
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();
    h.clock.advance(Duration::seconds(240));
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();
    h.clock.advance(Duration::seconds(240));

    assert!(h.state.trip_start.verify(h.driver, booking.id, CODE).await.is_ok());
}

#[tokio::test]
async fn start_code_needs_a_confirmed_booking() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;

    assert!(matches!(
        h.state.trip_start.issue(h.driver, booking.id).await,
        Err(AppError::Precondition(_))
    ));
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn start_code_is_for_the_assigned_driver() {
    let h = Harness::new().await;
    let booking = h.confirmed().await;
    let other_driver = h.stranger(Role::Driver).await;

    assert!(matches!(
        h.state.trip_start.issue(other_driver, booking.id).await,
        Err(AppError::Authorization(_))
    ));
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();
    assert!(matches!(
        h.state.trip_start.verify(other_driver, booking.id, CODE).await,
        Err(AppError::Authorization(_))
    ));
    assert!(h.state.trip_start.verify(h.driver, booking.id, CODE).await.is_ok());
}

#[tokio::test]
async fn completing_counts_the_trip() {
    let h = Harness::new().await;
    let booking = h.started().await;

    h.state.bookings.complete(h.driver, booking.id).await.unwrap();
    let driver = h.state.drivers.me(h.driver).await.unwrap();
    assert_eq!(driver.completed_trip_count, 1);

    assert!(h.state.bookings.complete(h.driver, booking.id).await.is_err());
    let driver = h.state.drivers.me(h.driver).await.unwrap();
    assert_eq!(driver.completed_trip_count, 1);
}

#[tokio::test]
async fn fare_locks_once_terminal() {
    let h = Harness::new().await;
    let booking = h.started().await;

    let updated = h.state.bookings.set_fare(h.driver, booking.id, 650.0).await.unwrap();
    assert_eq!(updated.fare, 650.0);

    h.state.bookings.complete(h.driver, booking.id).await.unwrap();
    assert!(matches!(
        h.state.bookings.set_fare(h.driver, booking.id, 700.0).await,
        Err(AppError::Precondition(_))
    ));
    assert!(matches!(
        h.state.bookings.set_fare(h.driver, booking.id, 0.0).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn available_drivers_skip_those_booked_at_that_time() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;

    let all = h.state.drivers.available(None).await.unwrap();
    assert!(all.iter().any(|d| d.id == h.driver_id));

    let at_slot = h.state.drivers.available(Some(booking.scheduled_at)).await.unwrap();
    assert!(at_slot.iter().all(|d| d.id != h.driver_id));

    let later = booking.scheduled_at + Duration::hours(1);
    let free = h.state.drivers.available(Some(later)).await.unwrap();
    assert!(free.iter().any(|d| d.id == h.driver_id));
}

#[tokio::test]
async fn availability_change_reaches_the_driver() {
    let h = Harness::new().await;
    let mut driver_rx = h.listen(PartyId::Driver(h.driver.party_id));

    let driver = h.state.drivers.set_availability(h.driver, false).await.unwrap();
    assert!(!driver.availability);

    let events = drain(&mut driver_rx);
    assert_eq!(events, vec![Event::availability(false)]);
}

#[tokio::test]
async fn customer_rates_driver_for_their_booking() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;

    let driver = h
        .state
        .drivers
        .rate(h.customer, h.driver_id, booking.id, 4, "smooth ride".to_string())
        .await
        .unwrap();
    assert_eq!(driver.rating_aggregate, 4.0);

    let driver = h
        .state
        .drivers
        .rate(h.customer, h.driver_id, booking.id, 5, String::new())
        .await
        .unwrap();
    assert_eq!(driver.ratings.len(), 1);
    assert_eq!(driver.rating_aggregate, 5.0);

    let other_customer = h.stranger(Role::Customer).await;
    assert!(matches!(
        h.state
            .drivers
            .rate(other_customer, h.driver_id, booking.id, 1, String::new())
            .await,
        Err(AppError::Authorization(_))
    ));
    assert!(matches!(
        h.state
            .drivers
            .rate(h.customer, h.driver_id, booking.id, 6, String::new())
            .await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn driver_bookings_filter_by_status() {
    let h = Harness::new().await;
    let first = h.book(500.0).await;
    h.book(300.0).await;
    h.state.bookings.accept(h.driver, first.id).await.unwrap();

    let all = h.state.drivers.bookings(h.driver, None).await.unwrap();
    assert_eq!(all.len(), 2);
    let accepted = h
        .state
        .drivers
        .bookings(h.driver, Some(BookingStatus::Accepted))
        .await
        .unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].id, first.id);

    let mine = h.state.bookings.customer_bookings(h.customer).await.unwrap();
    assert_eq!(mine.len(), 2);
}

#[tokio::test]
async fn login_and_reset_codes_are_separate() {
    let h = Harness::new().await;

    h.state
        .accounts
        .request_login_code("Rider@Example.com")
        .await
        .unwrap();
    assert!(matches!(
        h.state
            .accounts
            .reset_password("rider@example.com", CODE, "newpass1")
            .await,
        Err(AppError::NotFound(_))
    ));

    let session = h
        .state
        .accounts
        .verify_login_code("rider@example.com", CODE)
        .await
        .unwrap();
    assert_eq!(session.user.id, h.customer.party_id);
    assert!(h.state.sessions.validate(&session.token).is_ok());
}

#[tokio::test]
async fn password_reset_replaces_the_password() {
    let h = Harness::new().await;

    h.state
        .accounts
        .request_password_reset("rider@example.com")
        .await
        .unwrap();
    h.state
        .accounts
        .reset_password("rider@example.com", CODE, "brand-new")
        .await
        .unwrap();

    assert!(matches!(
        h.state.accounts.login("rider@example.com", "secret123").await,
        Err(AppError::Unauthenticated(_))
    ));
    assert!(h.state.accounts.login("rider@example.com", "brand-new").await.is_ok());
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let h = Harness::new().await;
    let err = h
        .state
        .accounts
        .register(registration("RIDER@example.com", Role::Customer))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn expired_challenges_are_reaped() {
    let h = Harness::new().await;
    let booking = h.confirmed().await;
    h.state.trip_start.issue(h.driver, booking.id).await.unwrap();
    h.clock.advance(Duration::seconds(301));

    let purged = h.state.challenges.purge_expired(h.clock.utc()).await.unwrap();
    assert_eq!(purged, 1);
    assert!(matches!(
        h.state.trip_start.verify(h.driver, booking.id, CODE).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn store_is_shared_with_the_machine() {
    let h = Harness::new().await;
    let booking = h.book(500.0).await;
    let stored = h.state.store.booking(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert_eq!(h.state.store.booking_count(), 1);
}
