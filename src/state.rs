use std::sync::Arc;

use mockable::{Clock, DefaultClock};

use crate::auth::SessionKeys;
use crate::config::Config;
use crate::engine::accounts::Accounts;
use crate::engine::drivers::DriverDesk;
use crate::engine::lifecycle::BookingMachine;
use crate::engine::otp::{CodeGenerator, OtpPolicy, OtpProtocol, RandomCodes};
use crate::engine::trip_start::TripStart;
use crate::error::AppError;
use crate::geo::{DisabledGeocoder, Geocoder, NominatimGeocoder};
use crate::mail::{LogMailer, Mailer, RelayMailer};
use crate::notify::Fabric;
use crate::observability::metrics::Metrics;
use crate::store::{ChallengeStore, MemoryStore, Store};

/// External collaborators the core is wired against.
pub struct Collaborators {
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<dyn Mailer>,
    pub geocoder: Arc<dyn Geocoder>,
    pub codes: Arc<dyn CodeGenerator>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let mailer: Arc<dyn Mailer> = match &config.mail_relay_url {
            Some(url) => Arc::new(
                RelayMailer::new(url.clone(), config.mail_from.clone())
                    .map_err(|err| AppError::Internal(format!("mail relay client: {err}")))?,
            ),
            None => Arc::new(LogMailer::new(config.mail_from.clone())),
        };

        let geocoder: Arc<dyn Geocoder> = match &config.geocoder_url {
            Some(url) => Arc::new(
                NominatimGeocoder::new(url.clone(), &config.geocoder_user_agent)
                    .map_err(|err| AppError::Internal(format!("geocoder client: {err}")))?,
            ),
            None => Arc::new(DisabledGeocoder),
        };

        Ok(Self {
            store: Arc::new(MemoryStore::new()),
            mailer,
            geocoder,
            codes: Arc::new(RandomCodes),
            clock: Arc::new(DefaultClock),
        })
    }
}

pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub clock: Arc<dyn Clock>,
    pub fabric: Arc<Fabric>,
    pub sessions: SessionKeys,
    pub bookings: Arc<BookingMachine>,
    pub trip_start: TripStart,
    pub drivers: DriverDesk,
    pub accounts: Accounts,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            mailer,
            geocoder,
            codes,
            clock,
        } = collaborators;

        let metrics = Metrics::new();
        let fabric = Arc::new(Fabric::new(config.event_buffer_size, metrics.clone()));
        let sessions = SessionKeys::new(&config.jwt_secret, config.session_ttl_hours);
        let entities: Arc<dyn Store> = store.clone();
        let challenges: Arc<dyn ChallengeStore> = store.clone();

        let otp = |policy: OtpPolicy| {
            OtpProtocol::new(
                challenges.clone(),
                mailer.clone(),
                codes.clone(),
                clock.clone(),
                policy,
                metrics.clone(),
            )
        };

        let bookings = Arc::new(BookingMachine::new(
            entities.clone(),
            geocoder,
            fabric.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let trip_start = TripStart::new(
            entities.clone(),
            bookings.clone(),
            otp(OtpPolicy::trip_start(config.trip_otp_ttl)),
        );
        let drivers = DriverDesk::new(entities.clone(), fabric.clone(), clock.clone());
        let accounts = Accounts::new(
            entities,
            sessions.clone(),
            otp(OtpPolicy::login(config.login_otp_ttl)),
            otp(OtpPolicy::password_reset(config.reset_otp_ttl)),
            clock.clone(),
        );

        Self {
            store,
            challenges,
            clock,
            fabric,
            sessions,
            bookings,
            trip_start,
            drivers,
            accounts,
            metrics,
        }
    }
}
