use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail. A failed send is reported, never retried here.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Writes mail to the log instead of sending it. Local development only.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: String) -> Self {
        Self { from }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        info!(from = %self.from, to = %to, subject = %subject, body = %body, "mail not sent: no relay configured");
        Ok(())
    }
}

/// Posts each message as JSON to an HTTP mail relay.
pub struct RelayMailer {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

impl RelayMailer {
    pub fn new(relay_url: String, from: String) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            relay_url,
            from,
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let mail = OutgoingMail {
            from: self.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        self.client
            .post(&self.relay_url)
            .json(&mail)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
