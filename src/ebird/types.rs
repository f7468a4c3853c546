//! eBird API response types
//!
//! Based on the eBird API 2.0: https://documenter.getpostman.com/view/664302/S1ENwy59
//! Wire field names are preserved so records pass through the pipeline
//! byte-identical.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A single observation record (from the /data/obs endpoints)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub species_code: String,
    pub com_name: String,
    pub sci_name: String,
    pub loc_id: String,
    pub loc_name: String,
    /// Coordinates may be withheld for sensitive locations
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// "YYYY-MM-DD HH:MM" or "YYYY-MM-DD"
    pub obs_dt: String,
    /// Count; absent when the observer reported presence only ("X")
    pub how_many: Option<u32>,
    /// The service omits this field for most valid records, so absence
    /// means valid
    #[serde(default = "default_true")]
    pub obs_valid: bool,
    #[serde(default)]
    pub obs_reviewed: bool,
    #[serde(default)]
    pub location_private: bool,
}

/// A registered birding hotspot (from the /ref/hotspot endpoints)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub loc_id: String,
    pub loc_name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub subnational1_code: Option<String>,
    #[serde(default)]
    pub subnational2_code: Option<String>,
    #[serde(default)]
    pub latest_obs_dt: Option<String>,
    #[serde(default)]
    pub num_species_all_time: Option<u32>,
}

/// Detailed hotspot record (from /ref/hotspot/info/{locId})
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotInfo {
    pub loc_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub subnational1_code: Option<String>,
    #[serde(default)]
    pub num_species_all_time: Option<u32>,
}

/// One taxonomy entry (from /ref/taxonomy/ebird)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyEntry {
    pub sci_name: String,
    pub com_name: String,
    pub species_code: String,
    /// "species", "issf", "hybrid", ...
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub taxon_order: Option<f64>,
    #[serde(default)]
    pub family_com_name: Option<String>,
    #[serde(default)]
    pub family_sci_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_deserializes_wire_names() {
        let json = r#"{
            "speciesCode": "norcar",
            "comName": "Northern Cardinal",
            "sciName": "Cardinalis cardinalis",
            "locId": "L123456",
            "locName": "Boston Common",
            "obsDt": "2024-01-15 10:30",
            "howMany": 2,
            "lat": 42.3554,
            "lng": -71.0655,
            "obsValid": true,
            "obsReviewed": false,
            "locationPrivate": false
        }"#;

        let obs: Observation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.species_code, "norcar");
        assert_eq!(obs.loc_id, "L123456");
        assert_eq!(obs.how_many, Some(2));
        assert!(obs.obs_valid);
    }

    #[test]
    fn test_observation_obs_valid_defaults_true() {
        // The service omits obsValid on most records; absence means valid
        let json = r#"{
            "speciesCode": "blujay",
            "comName": "Blue Jay",
            "sciName": "Cyanocitta cristata",
            "locId": "L1",
            "locName": "Somewhere",
            "obsDt": "2024-01-15"
        }"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert!(obs.obs_valid);
        assert!(!obs.obs_reviewed);
        assert!(obs.lat.is_none());
        assert!(obs.how_many.is_none());
    }

    #[test]
    fn test_observation_roundtrips_wire_names() {
        let obs = Observation {
            species_code: "norcar".into(),
            com_name: "Northern Cardinal".into(),
            sci_name: "Cardinalis cardinalis".into(),
            loc_id: "L1".into(),
            loc_name: "Boston Common".into(),
            lat: Some(42.3554),
            lng: Some(-71.0655),
            obs_dt: "2024-01-15 10:30".into(),
            how_many: Some(1),
            obs_valid: true,
            obs_reviewed: false,
            location_private: false,
        };
        let value = serde_json::to_value(&obs).unwrap();
        assert!(value.get("speciesCode").is_some());
        assert!(value.get("obsDt").is_some());
        assert!(value.get("species_code").is_none());
    }

    #[test]
    fn test_hotspot_optional_metadata() {
        let json = r#"{
            "locId": "L888",
            "locName": "Mount Auburn Cemetery",
            "lat": 42.3709,
            "lng": -71.1453,
            "subnational1Code": "US-MA",
            "numSpeciesAllTime": 224
        }"#;
        let hotspot: Hotspot = serde_json::from_str(json).unwrap();
        assert_eq!(hotspot.num_species_all_time, Some(224));
        assert!(hotspot.latest_obs_dt.is_none());
    }
}
