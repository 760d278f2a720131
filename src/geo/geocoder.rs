use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::DeliveryError;
use crate::models::booking::GeoPoint;

/// Resolves free-text places to coordinates. Used only when a booking is created.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the lookup worked but nothing matched.
    async fn resolve(&self, text: &str) -> Result<Option<GeoPoint>, DeliveryError>;
}

/// Used when no geocoder is configured; every lookup comes back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGeocoder;

#[async_trait]
impl Geocoder for DisabledGeocoder {
    async fn resolve(&self, _text: &str) -> Result<Option<GeoPoint>, DeliveryError> {
        Ok(None)
    }
}

/// Client for a Nominatim-compatible `/search` endpoint.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    search_url: String,
}

#[derive(Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(search_url: String, user_agent: &str) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, search_url })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn resolve(&self, text: &str) -> Result<Option<GeoPoint>, DeliveryError> {
        let hits: Vec<SearchHit> = self
            .client
            .get(&self.search_url)
            .query(&[("q", text), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        let lat = hit
            .lat
            .parse::<f64>()
            .map_err(|err| DeliveryError::Decode(format!("lat {:?}: {err}", hit.lat)))?;
        let lon = hit
            .lon
            .parse::<f64>()
            .map_err(|err| DeliveryError::Decode(format!("lon {:?}: {err}", hit.lon)))?;

        Ok(Some(GeoPoint { lat, lon }))
    }
}
