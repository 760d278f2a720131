//! One-time code protocol shared by login, password reset and trip start.
//!
//! Per key: `no challenge -> issued -> consumed | expired`. Issuing again
//! replaces the stored challenge and restarts its window. Only a salted hash
//! of the code is stored. Mail delivery is attempted once; a failed send still
//! leaves a valid challenge behind so the caller can offer a resend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{code_matches, hash_code};
use crate::mail::Mailer;
use crate::models::challenge::{Challenge, ChallengeKey, OtpPurpose};
use crate::observability::metrics::Metrics;
use crate::store::{ChallengeStore, StoreError};

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("no active code")]
    NotFound,

    #[error("code expired")]
    Expired,

    #[error("code does not match")]
    Mismatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OtpError {
    fn outcome(&self) -> &'static str {
        match self {
            OtpError::NotFound => "not_found",
            OtpError::Expired => "expired",
            OtpError::Mismatch => "mismatch",
            OtpError::Store(_) => "error",
        }
    }
}

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform six-digit codes from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeGenerator for RandomCodes {
    fn generate(&self) -> String {
        rand::thread_rng().gen_range(100_000..1_000_000).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub purpose: OtpPurpose,
    pub ttl: TimeDelta,
    pub subject_line: &'static str,
    pub body_prefix: &'static str,
}

impl OtpPolicy {
    pub fn login(ttl: TimeDelta) -> Self {
        Self {
            purpose: OtpPurpose::Login,
            ttl,
            subject_line: "Your Login Code",
            body_prefix: "Your OTP code is",
        }
    }

    pub fn password_reset(ttl: TimeDelta) -> Self {
        Self {
            purpose: OtpPurpose::PasswordReset,
            ttl,
            subject_line: "Password Reset Code",
            body_prefix: "Your password reset OTP is",
        }
    }

    pub fn trip_start(ttl: TimeDelta) -> Self {
        Self {
            purpose: OtpPurpose::TripStart,
            ttl,
            subject_line: "Trip Start Verification Code",
            body_prefix: "Your OTP code is",
        }
    }

    fn body(&self, code: &str) -> String {
        let minutes = self.ttl.num_minutes().max(1);
        format!("{} {code}. It expires in {minutes} minutes.", self.body_prefix)
    }
}

/// Outcome of an issuance: the code exists whether or not the mail went out.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Issued {
    pub sent: bool,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

pub struct OtpProtocol {
    store: Arc<dyn ChallengeStore>,
    mailer: Arc<dyn Mailer>,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    policy: OtpPolicy,
    metrics: Metrics,
}

impl OtpProtocol {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        mailer: Arc<dyn Mailer>,
        codes: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        policy: OtpPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            mailer,
            codes,
            clock,
            policy,
            metrics,
        }
    }

    pub fn purpose(&self) -> OtpPurpose {
        self.policy.purpose
    }

    fn key(&self, subject: &str) -> ChallengeKey {
        ChallengeKey::new(self.policy.purpose, subject)
    }

    /// Creates (or replaces) the challenge for `subject` and mails the code to `address`.
    pub async fn issue(&self, subject: &str, address: &str) -> Result<Issued, OtpError> {
        let code = self.codes.generate();
        let hash = hash_code(&code);
        let now = self.clock.utc();
        let expires_at = now + self.policy.ttl;

        self.store
            .upsert_challenge(
                self.key(subject),
                Challenge {
                    nonce: Uuid::new_v4(),
                    code_hash: hash.digest,
                    salt: hash.salt,
                    address: address.to_string(),
                    expires_at,
                    created_at: now,
                },
            )
            .await?;

        let sent = match self
            .mailer
            .send(address, self.policy.subject_line, &self.policy.body(&code))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(purpose = %self.policy.purpose, subject = %subject, error = %err, "code generated but mail delivery failed");
                false
            }
        };

        self.metrics
            .otp_issued_total
            .with_label_values(&[self.policy.purpose.as_str(), if sent { "true" } else { "false" }])
            .inc();
        info!(purpose = %self.policy.purpose, subject = %subject, sent, "one-time code issued");

        let message = if sent {
            "OTP sent to email.".to_string()
        } else {
            "OTP generated. Email send failed; try resend.".to_string()
        };

        Ok(Issued {
            sent,
            expires_at,
            message,
        })
    }

    /// Checks `code` and consumes the challenge on a match.
    ///
    /// A mismatch leaves the challenge in place for another attempt. An
    /// expired challenge is deleted. When two callers race on the same
    /// challenge only one of them gets `Ok`.
    pub async fn verify(&self, subject: &str, code: &str) -> Result<Challenge, OtpError> {
        let result = self.check_and_consume(subject, code).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.outcome(),
        };
        self.metrics
            .otp_verifications_total
            .with_label_values(&[self.policy.purpose.as_str(), outcome])
            .inc();
        result
    }

    async fn check_and_consume(&self, subject: &str, code: &str) -> Result<Challenge, OtpError> {
        let key = self.key(subject);
        let challenge = self.store.challenge(&key).await?.ok_or(OtpError::NotFound)?;

        if challenge.is_expired(self.clock.utc()) {
            self.store.remove_challenge_if(&key, challenge.nonce).await?;
            return Err(OtpError::Expired);
        }

        if !code_matches(code.trim(), &challenge.salt, &challenge.code_hash) {
            return Err(OtpError::Mismatch);
        }

        // Lost the race to a concurrent verify or a re-issue.
        if !self.store.remove_challenge_if(&key, challenge.nonce).await? {
            return Err(OtpError::NotFound);
        }

        Ok(challenge)
    }
}

/// Periodically deletes expired challenges. Expiry is always re-checked on
/// verify, so this only reclaims storage.
pub async fn run_challenge_reaper(
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) {
    info!(interval_secs = interval.as_secs(), "challenge reaper started");
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.purge_expired(clock.utc()).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "expired challenges reaped"),
            Err(err) => warn!(error = %err, "challenge reaper failed"),
        }
    }
}
