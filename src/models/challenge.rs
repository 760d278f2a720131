use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a one-time code unlocks. Keys of different purposes never collide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OtpPurpose {
    Login,
    PasswordReset,
    TripStart,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordReset => "password-reset",
            OtpPurpose::TripStart => "trip-start",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeKey {
    pub purpose: OtpPurpose,
    /// Email for login and reset, booking id for trip start.
    pub subject: String,
}

impl ChallengeKey {
    pub fn new(purpose: OtpPurpose, subject: impl Into<String>) -> Self {
        Self {
            purpose,
            subject: subject.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Challenge {
    /// Distinguishes one issuance from the next under the same key.
    pub nonce: Uuid,
    pub code_hash: String,
    pub salt: String,
    pub address: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
