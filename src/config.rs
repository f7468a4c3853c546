//! Configuration for pipeline runs
//!
//! Two layers: `Settings` read once from the environment at startup
//! (API tokens, endpoints), and `Constraints` supplied per trip request
//! with defaulted, clamped fields.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{Error, Result};

/// Assumed average driving speed for travel-time estimates, in km/h
pub const AVERAGE_DRIVING_SPEED_KMH: f64 = 60.0;

/// Maximum feasible driving hours in a single day
pub const MAX_DAILY_TRAVEL_HOURS: f64 = 8.0;

/// Radius used to group nearby locations into one planning stop, in km
pub const CLUSTER_RADIUS_KM: f64 = 15.0;

/// Maximum distance at which a sighting location adopts a hotspot identity, in km
pub const HOTSPOT_MATCH_RADIUS_KM: f64 = 0.5;

/// Hard cap on locations handed to the route optimizer
pub const MAX_ROUTE_LOCATIONS: usize = 12;

/// Bounded worker pool size for per-species sighting fetches
pub const FETCH_WORKERS: usize = 5;

/// Minimum spacing between any two outgoing observation-service requests
pub const MIN_REQUEST_INTERVAL_MS: u64 = 200;

/// eBird API caps, enforced client-side
pub const EBIRD_MAX_DAYS_BACK: u32 = 30;
pub const EBIRD_MAX_DISTANCE_KM: u32 = 50;
pub const EBIRD_MAX_RESULTS: u32 = 3000;

/// Starting coordinate for a trip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartLocation {
    pub lat: f64,
    pub lng: f64,
}

/// Explicit observation date window, inclusive, "YYYY-MM-DD"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Minimum observation quality accepted by the constraint filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationQuality {
    #[default]
    Any,
    Valid,
    Reviewed,
}

/// User travel constraints for a trip request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub start_location: Option<StartLocation>,
    pub region_code: Option<String>,
    pub days_back: u32,
    pub max_daily_distance_km: u32,
    /// Defaults to `max_daily_distance_km` when not supplied
    pub max_travel_radius_km: Option<u32>,
    pub date_range: Option<DateRange>,
    pub min_observation_quality: ObservationQuality,
    pub max_locations_per_day: usize,
    pub min_location_score: f64,
    pub trip_duration_days: u32,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            start_location: None,
            region_code: None,
            days_back: 7,
            max_daily_distance_km: 200,
            max_travel_radius_km: None,
            date_range: None,
            min_observation_quality: ObservationQuality::Any,
            max_locations_per_day: 8,
            min_location_score: 0.3,
            trip_duration_days: 1,
        }
    }
}

impl Constraints {
    /// Days-back window clamped to the eBird maximum
    pub fn days_back_clamped(&self) -> u32 {
        self.days_back.min(EBIRD_MAX_DAYS_BACK)
    }

    /// Travel radius, defaulting to the daily distance limit
    pub fn travel_radius_km(&self) -> u32 {
        self.max_travel_radius_km
            .unwrap_or(self.max_daily_distance_km)
    }

    /// Search radius for nearby queries: half the daily distance, capped
    /// at the eBird limit
    pub fn nearby_search_radius_km(&self) -> u32 {
        (self.max_daily_distance_km / 2).min(EBIRD_MAX_DISTANCE_KM)
    }

    /// Validate caller-supplied values against documented ranges
    pub fn validate(&self) -> Result<()> {
        if let Some(loc) = &self.start_location {
            if !(-90.0..=90.0).contains(&loc.lat) {
                return Err(Error::Validation(format!(
                    "Invalid start latitude: {}. Must be between -90 and 90",
                    loc.lat
                )));
            }
            if !(-180.0..=180.0).contains(&loc.lng) {
                return Err(Error::Validation(format!(
                    "Invalid start longitude: {}. Must be between -180 and 180",
                    loc.lng
                )));
            }
        }

        if let Some(region) = &self.region_code {
            if !is_valid_region_code(region) {
                return Err(Error::Validation(format!(
                    "Malformed region code: {region:?}. Expected e.g. \"US\", \"US-MA\", \"CA-ON\""
                )));
            }
        }

        if self.days_back == 0 {
            return Err(Error::Validation(
                "days_back must be at least 1".to_string(),
            ));
        }
        if self.max_daily_distance_km == 0 {
            return Err(Error::Validation(
                "max_daily_distance_km must be positive".to_string(),
            ));
        }
        if self.max_locations_per_day == 0 {
            return Err(Error::Validation(
                "max_locations_per_day must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_location_score) {
            return Err(Error::Validation(format!(
                "min_location_score must be between 0 and 1, got: {}",
                self.min_location_score
            )));
        }

        Ok(())
    }
}

/// eBird region codes: country, optional subnational1/subnational2 segments
fn is_valid_region_code(code: &str) -> bool {
    if code.is_empty() || code.len() > 12 {
        return false;
    }
    let mut parts = code.split('-');
    let country = match parts.next() {
        Some(c) => c,
        None => return false,
    };
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_uppercase()) {
        return false;
    }
    for part in parts {
        if part.is_empty()
            || part.len() > 3
            || !part.chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_lowercase())
        {
            return false;
        }
    }
    true
}

/// Startup configuration resolved from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// eBird API token. Required.
    pub ebird_api_token: String,
    /// Observation service base URL
    pub ebird_base_url: String,
    /// Language-model API token. Optional; stages degrade without it.
    pub llm_api_token: Option<String>,
    /// Language-model endpoint base URL
    pub llm_base_url: String,
    /// Language-model identifier
    pub llm_model: String,
}

impl Settings {
    /// Resolve settings from environment variables.
    ///
    /// A missing `EBIRD_API_KEY` is fatal. A missing `LLM_API_KEY` is not:
    /// species validation, location scoring, and itinerary rendering fall
    /// back to their non-LLM paths.
    pub fn from_env() -> Result<Self> {
        let ebird_api_token = env::var("EBIRD_API_KEY").map_err(|_| {
            Error::Configuration(
                "EBIRD_API_KEY not set. Get a key from https://ebird.org/api/keygen".to_string(),
            )
        })?;

        let llm_api_token = env::var("LLM_API_KEY").ok();
        if llm_api_token.is_none() {
            tracing::warn!(
                "LLM_API_KEY not set; species fuzzy matching, habitat scoring and \
                 itinerary generation will use fallbacks"
            );
        }

        Ok(Self {
            ebird_api_token,
            ebird_base_url: env::var("EBIRD_BASE_URL")
                .unwrap_or_else(|_| "https://api.ebird.org/v2".to_string()),
            llm_api_token,
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_constraint_defaults() {
        let c = Constraints::default();
        assert_eq!(c.days_back, 7);
        assert_eq!(c.max_daily_distance_km, 200);
        assert_eq!(c.travel_radius_km(), 200);
        assert_eq!(c.max_locations_per_day, 8);
        assert_eq!(c.min_observation_quality, ObservationQuality::Any);
        assert!((c.min_location_score - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_days_back_clamped() {
        let c = Constraints {
            days_back: 90,
            ..Default::default()
        };
        assert_eq!(c.days_back_clamped(), 30);
    }

    #[test]
    fn test_nearby_search_radius_capped() {
        let c = Constraints {
            max_daily_distance_km: 200,
            ..Default::default()
        };
        assert_eq!(c.nearby_search_radius_km(), 50);

        let close = Constraints {
            max_daily_distance_km: 60,
            ..Default::default()
        };
        assert_eq!(close.nearby_search_radius_km(), 30);
    }

    #[test]
    fn test_travel_radius_override() {
        let c = Constraints {
            max_daily_distance_km: 200,
            max_travel_radius_km: Some(50),
            ..Default::default()
        };
        assert_eq!(c.travel_radius_km(), 50);
    }

    #[test]
    fn test_validate_rejects_bad_coordinates() {
        let c = Constraints {
            start_location: Some(StartLocation {
                lat: 120.0,
                lng: 0.0,
            }),
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_region_codes() {
        for good in ["US", "US-MA", "CA-ON", "MX-ROO", "US-NY-109"] {
            let c = Constraints {
                region_code: Some(good.to_string()),
                ..Default::default()
            };
            assert!(c.validate().is_ok(), "expected {good} to validate");
        }

        for bad in ["", "usa", "US-", "U-MA", "US-massachusetts"] {
            let c = Constraints {
                region_code: Some(bad.to_string()),
                ..Default::default()
            };
            assert!(c.validate().is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn test_constraints_deserialize_with_defaults() {
        let c: Constraints = serde_json::from_str(r#"{"region_code":"US-MA"}"#).unwrap();
        assert_eq!(c.region_code.as_deref(), Some("US-MA"));
        assert_eq!(c.days_back, 7);
        assert_eq!(c.min_observation_quality, ObservationQuality::Any);
    }

    #[test]
    #[serial]
    fn test_settings_missing_ebird_key() {
        env::remove_var("EBIRD_API_KEY");
        assert!(Settings::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_settings_llm_optional() {
        env::set_var("EBIRD_API_KEY", "test-token");
        env::remove_var("LLM_API_KEY");
        let settings = Settings::from_env().unwrap();
        assert!(settings.llm_api_token.is_none());
        assert_eq!(settings.ebird_base_url, "https://api.ebird.org/v2");
        env::remove_var("EBIRD_API_KEY");
    }
}
