use std::env;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::AppError;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub trip_otp_ttl: TimeDelta,
    pub login_otp_ttl: TimeDelta,
    pub reset_otp_ttl: TimeDelta,
    pub otp_reaper_interval: Option<Duration>,
    pub geocoder_url: Option<String>,
    pub geocoder_user_agent: String,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let reaper_secs: u64 = parse_or_default("OTP_REAPER_INTERVAL_SECS", 60)?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 64)?,
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string()),
            session_ttl_hours: parse_or_default("SESSION_TTL_HOURS", 168)?,
            trip_otp_ttl: otp_ttl("TRIP_OTP_TTL_SECS", parse_or_default("TRIP_OTP_TTL_SECS", 300)?)?,
            login_otp_ttl: otp_ttl("LOGIN_OTP_TTL_SECS", parse_or_default("LOGIN_OTP_TTL_SECS", 300)?)?,
            reset_otp_ttl: otp_ttl("RESET_OTP_TTL_SECS", parse_or_default("RESET_OTP_TTL_SECS", 600)?)?,
            otp_reaper_interval: (reaper_secs > 0).then(|| Duration::from_secs(reaper_secs)),
            geocoder_url: non_empty("GEOCODER_URL"),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .unwrap_or_else(|_| "ride-booking".to_string()),
            mail_relay_url: non_empty("MAIL_RELAY_URL"),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "Trip Verification <no-reply@localhost>".to_string()),
        })
    }

    /// Defaults suitable for tests and local runs, independent of the environment.
    pub fn local() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 64,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            session_ttl_hours: 168,
            trip_otp_ttl: TimeDelta::minutes(5),
            login_otp_ttl: TimeDelta::minutes(5),
            reset_otp_ttl: TimeDelta::minutes(10),
            otp_reaper_interval: None,
            geocoder_url: None,
            geocoder_user_agent: "ride-booking".to_string(),
            mail_relay_url: None,
            mail_from: "Trip Verification <no-reply@localhost>".to_string(),
        }
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

/// Code lifetimes must be positive and representable as a timestamp offset.
fn otp_ttl(key: &str, secs: i64) -> Result<TimeDelta, AppError> {
    TimeDelta::try_seconds(secs)
        .filter(|ttl| *ttl > TimeDelta::zero())
        .ok_or_else(|| AppError::Internal(format!("invalid {key}: {secs} is not a usable lifetime")))
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
