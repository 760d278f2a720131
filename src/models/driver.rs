use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingEntry {
    pub rater_id: Uuid,
    pub booking_id: Uuid,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    /// Account the driver signs in with; also the driver-party identifier.
    pub user_id: Uuid,
    pub license_number: String,
    pub vehicle_details: String,
    pub availability: bool,
    pub completed_trip_count: u64,
    pub rating_aggregate: f64,
    pub ratings: Vec<RatingEntry>,
}

impl Driver {
    pub fn new(user_id: Uuid, license_number: String, vehicle_details: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            license_number,
            vehicle_details,
            availability: true,
            completed_trip_count: 0,
            rating_aggregate: 0.0,
            ratings: Vec::new(),
        }
    }

    /// Insert or replace the entry for `(rater, booking)` and recompute the average.
    pub fn upsert_rating(&mut self, entry: RatingEntry) {
        match self
            .ratings
            .iter_mut()
            .find(|r| r.rater_id == entry.rater_id && r.booking_id == entry.booking_id)
        {
            Some(existing) => {
                existing.rating = entry.rating;
                existing.comment = entry.comment;
            }
            None => self.ratings.push(entry),
        }

        let sum: f64 = self.ratings.iter().map(|r| f64::from(r.rating)).sum();
        let average = sum / self.ratings.len().max(1) as f64;
        self.rating_aggregate = (average * 100.0).round() / 100.0;
    }
}
