pub mod geocoder;

use crate::models::booking::GeoPoint;

pub use geocoder::{DisabledGeocoder, Geocoder, NominatimGeocoder};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lon = (delta_lon / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;
    let central_angle = 2.0 * haversine.sqrt().atan2((1.0 - haversine).sqrt());

    EARTH_RADIUS_KM * central_angle
}

/// Straight-line trip distance rounded to metres, if both ends resolved.
pub fn trip_distance_km(pickup: Option<&GeoPoint>, drop: Option<&GeoPoint>) -> Option<f64> {
    let (pickup, drop) = (pickup?, drop?);
    Some(round_to(haversine_km(pickup, drop), 3))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
