//! Pipeline data model
//!
//! Plain records passed between stages. Enrichment-in-place is expressed as
//! composition with `#[serde(flatten)]`: each stage's output record embeds
//! its input record whole, so every prior field survives verbatim and the
//! superset invariant is structural rather than a convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ebird::types::Observation;

/// How a free-text species name was resolved against the taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    DirectCommonName,
    DirectScientificName,
    DirectSpeciesCode,
    PartialCommonName,
    LlmFuzzyMatch,
    LlmOnlyFallback,
}

impl ValidationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectCommonName => "direct_common_name",
            Self::DirectScientificName => "direct_scientific_name",
            Self::DirectSpeciesCode => "direct_species_code",
            Self::PartialCommonName => "partial_common_name",
            Self::LlmFuzzyMatch => "llm_fuzzy_match",
            Self::LlmOnlyFallback => "llm_only_fallback",
        }
    }
}

/// A validated target species with taxonomy context (Stage 1 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpecies {
    /// The user's original input string
    pub original_name: String,
    pub common_name: String,
    pub scientific_name: String,
    pub species_code: String,
    pub taxonomic_order: f64,
    pub family_common_name: String,
    pub family_scientific_name: String,
    pub validation_method: ValidationMethod,
    /// 1.0 exact, 0.8 partial, 0.7 fuzzy, 0.5 fallback
    pub confidence: f64,
    pub seasonal_notes: String,
    pub behavioral_notes: String,
}

/// Which observation endpoint served a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    NearbyObservations,
    SpeciesObservations,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NearbyObservations => "nearby_observations",
            Self::SpeciesObservations => "species_observations",
        }
    }
}

/// An observation plus fetch provenance (Stage 2 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    #[serde(flatten)]
    pub observation: Observation,
    pub fetch_method: FetchMethod,
    pub fetch_timestamp: DateTime<Utc>,
    pub validation_confidence: f64,
    pub validation_method: ValidationMethod,
    pub original_species_name: String,
    pub seasonal_notes: String,
    pub behavioral_notes: String,
}

/// A sighting plus constraint-compliance flags (Stage 3 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSighting {
    #[serde(flatten)]
    pub sighting: Sighting,
    pub has_valid_gps: bool,
    pub within_travel_radius: bool,
    pub within_date_range: bool,
    pub within_region: bool,
    pub quality_compliant: bool,
    pub is_duplicate: bool,
    pub daily_distance_compliant: bool,
    pub meets_all_constraints: bool,
    pub distance_from_start_km: Option<f64>,
    pub estimated_travel_time_hours: Option<f64>,
}

/// Hotspot identity adopted by a deduplicated location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotMetadata {
    pub loc_id: String,
    pub name: String,
    pub country_code: Option<String>,
    pub subnational1_code: Option<String>,
    pub subnational2_code: Option<String>,
    pub latest_obs_date: Option<String>,
    pub num_species_all_time: u32,
    /// Zero for exact coordinate matches
    pub distance_to_hotspot_km: f64,
}

/// A deduplicated physical location (Stage 4 intermediate).
///
/// The coordinate key is the identity: the observation service hands out
/// multiple location ids for the same GPS point, so ids beyond the first
/// accumulate as alternates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coord_key: String,
    pub lat: f64,
    pub lng: f64,
    pub primary_loc_id: String,
    pub primary_loc_name: String,
    pub alternate_loc_ids: BTreeSet<String>,
    pub alternate_loc_names: BTreeSet<String>,
    pub sighting_count: usize,
    pub species_codes: BTreeSet<String>,
    pub observation_dates: BTreeSet<String>,
    pub is_hotspot: bool,
    pub hotspot_metadata: Option<HotspotMetadata>,
}

impl Location {
    pub fn species_diversity(&self) -> usize {
        self.species_codes.len()
    }
}

/// Whether every member location is backed by actual sightings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateQuality {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatistics {
    pub location_count: usize,
    pub sighting_count: usize,
    pub species_diversity: usize,
    pub hotspot_count: usize,
    /// Max distance from centroid to any member location
    pub cluster_radius_km: f64,
    pub most_recent_observation: Option<String>,
    /// Sorted for stable output
    pub species_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessibility {
    pub has_hotspot: bool,
    pub avg_travel_time_estimate: Option<f64>,
    pub coordinate_quality: CoordinateQuality,
}

/// A group of nearby locations forming one planning stop (Stage 4 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotCluster {
    pub cluster_id: String,
    pub cluster_name: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub locations: Vec<Location>,
    pub sightings: Vec<EnrichedSighting>,
    pub statistics: ClusterStatistics,
    pub accessibility: Accessibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Algorithmic,
    LlmEnhanced,
}

/// Per-criterion scoring breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoring {
    pub diversity_score: f64,
    pub recency_score: f64,
    pub hotspot_score: f64,
    pub accessibility_score: f64,
    pub base_score: f64,
    pub target_species_found: usize,
    pub total_species_found: usize,
    pub scoring_method: ScoringMethod,
    pub habitat_score: Option<f64>,
}

/// Parsed language-model habitat assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmEvaluation {
    pub habitat_score: f64,
    pub reasoning: String,
    pub best_time: String,
    pub tips: String,
}

/// A cluster plus its scoring (Stage 5 output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCluster {
    #[serde(flatten)]
    pub cluster: HotspotCluster,
    pub scoring: Scoring,
    pub llm_evaluation: Option<LlmEvaluation>,
    pub base_score: f64,
    /// 0.7 * base + 0.3 * habitat when an LLM evaluation is present,
    /// otherwise equal to the base score
    pub final_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    Empty,
    SingleLocation,
    TwoOpt,
    EnhancedNearestNeighbor,
    FallbackScoreOrder,
}

impl OptimizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::SingleLocation => "single_location",
            Self::TwoOpt => "two_opt",
            Self::EnhancedNearestNeighbor => "enhanced_nearest_neighbor",
            Self::FallbackScoreOrder => "fallback_score_order",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// One leg of the tour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub segment_number: usize,
    pub from_name: String,
    pub to_name: String,
    pub to_coordinates: Coordinates,
    pub distance_km: f64,
    pub estimated_drive_time_hours: f64,
    pub cumulative_distance_km: f64,
    pub location_score: f64,
    pub species_diversity: usize,
}

/// Ordered tour over the selected clusters (Stage 6 output).
///
/// Segments form the cycle start -> clusters in order -> start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub ordered_clusters: Vec<ScoredCluster>,
    pub total_distance_km: f64,
    pub optimization_method: OptimizationMethod,
    pub segments: Vec<RouteSegment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(species: &str, loc: &str) -> Observation {
        Observation {
            species_code: species.to_string(),
            com_name: "Northern Cardinal".to_string(),
            sci_name: "Cardinalis cardinalis".to_string(),
            loc_id: loc.to_string(),
            loc_name: "Boston Common".to_string(),
            lat: Some(42.3554),
            lng: Some(-71.0655),
            obs_dt: "2024-01-15 10:30".to_string(),
            how_many: Some(2),
            obs_valid: true,
            obs_reviewed: false,
            location_private: false,
        }
    }

    fn sighting() -> Sighting {
        Sighting {
            observation: observation("norcar", "L123456"),
            fetch_method: FetchMethod::SpeciesObservations,
            fetch_timestamp: Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap(),
            validation_confidence: 1.0,
            validation_method: ValidationMethod::DirectCommonName,
            original_species_name: "Northern Cardinal".to_string(),
            seasonal_notes: String::new(),
            behavioral_notes: String::new(),
        }
    }

    #[test]
    fn test_enriched_sighting_is_superset_of_sighting() {
        let base = sighting();
        let enriched = EnrichedSighting {
            sighting: base.clone(),
            has_valid_gps: true,
            within_travel_radius: true,
            within_date_range: true,
            within_region: true,
            quality_compliant: true,
            is_duplicate: false,
            daily_distance_compliant: true,
            meets_all_constraints: true,
            distance_from_start_km: Some(1.2),
            estimated_travel_time_hours: Some(0.02),
        };

        let base_json = serde_json::to_value(&base).unwrap();
        let enriched_json = serde_json::to_value(&enriched).unwrap();

        // Every field of the input record exists unchanged in the output
        for (key, value) in base_json.as_object().unwrap() {
            assert_eq!(
                enriched_json.get(key),
                Some(value),
                "field {key} not preserved"
            );
        }
    }

    #[test]
    fn test_sighting_flattens_observation_wire_names() {
        let value = serde_json::to_value(sighting()).unwrap();
        assert!(value.get("speciesCode").is_some());
        assert!(value.get("obsDt").is_some());
        assert!(value.get("fetch_method").is_some());
    }

    #[test]
    fn test_enum_wire_format() {
        assert_eq!(
            serde_json::to_string(&ValidationMethod::PartialCommonName).unwrap(),
            "\"partial_common_name\""
        );
        assert_eq!(
            serde_json::to_string(&OptimizationMethod::EnhancedNearestNeighbor).unwrap(),
            "\"enhanced_nearest_neighbor\""
        );
        assert_eq!(
            serde_json::to_string(&CoordinateQuality::High).unwrap(),
            "\"high\""
        );
    }
}
