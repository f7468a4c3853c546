//! Geospatial and temporal helpers
//!
//! Distance math, coordinate validation, eBird datetime parsing and the
//! approximate region-bounds table used by the constraint filter. Distances
//! use the Haversine great-circle formula.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use geo::HaversineDistance;
use geo::Point as GeoPoint;
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::config::AVERAGE_DRIVING_SPEED_KMH;

/// Calculate Haversine distance between two points in kilometers
///
/// # Arguments
/// * `lat1`, `lng1` - First point in decimal degrees
/// * `lat2`, `lng2` - Second point in decimal degrees
pub fn haversine_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let p1 = GeoPoint::new(lng1, lat1);
    let p2 = GeoPoint::new(lng2, lat2);
    p1.haversine_distance(&p2) / 1000.0
}

/// Validate that optional coordinates are present and within range
pub fn validate_coordinates(lat: Option<f64>, lng: Option<f64>) -> bool {
    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            lat.is_finite()
                && lng.is_finite()
                && (-90.0..=90.0).contains(&lat)
                && (-180.0..=180.0).contains(&lng)
        }
        _ => false,
    }
}

/// Canonical location key: latitude and longitude truncated to four decimal
/// places (about 11 m). Truncated, not rounded - rounding would merge
/// coordinates the observation service treats as distinct.
pub fn coord_key(lat: f64, lng: f64) -> String {
    format!("{},{}", truncate_4dp(lat), truncate_4dp(lng))
}

/// Truncate a coordinate to four decimal places, working on the decimal
/// rendering rather than the binary value so that e.g. 42.3601 keeps its
/// printed fourth decimal.
fn truncate_4dp(value: f64) -> String {
    let rendered = format!("{value:.7}");
    match rendered.find('.') {
        Some(dot) => rendered[..dot + 5].to_string(),
        None => rendered,
    }
}

/// Parse an eBird datetime string.
///
/// The service uses "2024-01-15 10:30" for timed observations and
/// "2024-01-15" for date-only records.
pub fn parse_ebird_datetime(value: &str) -> Option<NaiveDateTime> {
    if value.is_empty() {
        return None;
    }
    if value.contains(' ') {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").ok()
    } else {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

/// Check whether an observation date falls within the requested window.
///
/// With an explicit start/end the test is point-in-range; otherwise the
/// observation must be within `days_back` of now.
pub fn is_within_date_range(
    observation_date: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
    days_back: u32,
) -> bool {
    let obs_dt = match parse_ebird_datetime(observation_date) {
        Some(dt) => dt,
        None => {
            tracing::warn!("Could not parse observation datetime: {observation_date}");
            return false;
        }
    };

    if start_date.is_none() && end_date.is_none() {
        let cutoff = Local::now().naive_local() - Duration::days(days_back as i64);
        return obs_dt >= cutoff;
    }

    if let Some(start) = start_date.and_then(parse_ebird_datetime) {
        if obs_dt < start {
            return false;
        }
    }
    if let Some(end) = end_date.and_then(parse_ebird_datetime) {
        if obs_dt > end {
            return false;
        }
    }
    true
}

/// Estimate driving time in hours at the assumed average speed
pub fn travel_time_hours(distance_km: f64) -> f64 {
    if distance_km <= 0.0 {
        return 0.0;
    }
    distance_km / AVERAGE_DRIVING_SPEED_KMH
}

/// Rectangular latitude/longitude bounds for a region
#[derive(Debug, Clone, Copy)]
pub struct RegionBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

lazy_static! {
    /// Approximate bounds for common regions. Sparse: unlisted regions pass
    /// the region check. A production deployment would use a real geographic
    /// bounds source.
    static ref REGION_BOUNDS: HashMap<&'static str, RegionBounds> = {
        let mut m = HashMap::new();
        m.insert("US-MA", RegionBounds { min_lat: 41.2, max_lat: 42.9, min_lng: -73.5, max_lng: -69.9 });
        m.insert("US-CA", RegionBounds { min_lat: 32.5, max_lat: 42.0, min_lng: -124.4, max_lng: -114.1 });
        m.insert("US-NY", RegionBounds { min_lat: 40.5, max_lat: 45.0, min_lng: -79.8, max_lng: -71.9 });
        m.insert("US-FL", RegionBounds { min_lat: 24.4, max_lat: 31.0, min_lng: -87.6, max_lng: -80.0 });
        m.insert("US-TX", RegionBounds { min_lat: 25.8, max_lat: 36.5, min_lng: -106.6, max_lng: -93.5 });
        m
    };
}

/// Look up approximate bounds for a region code
pub fn regional_bounds(region_code: &str) -> Option<RegionBounds> {
    REGION_BOUNDS.get(region_code).copied()
}

/// Check whether coordinates fall within a region's bounds.
///
/// Regions without a bounds entry are treated as passing.
pub fn is_within_region(lat: f64, lng: f64, region_code: &str) -> bool {
    match regional_bounds(region_code) {
        Some(b) => {
            (b.min_lat..=b.max_lat).contains(&lat) && (b.min_lng..=b.max_lng).contains(&lng)
        }
        None => {
            tracing::warn!("No bounds data available for region {region_code}");
            true
        }
    }
}
