//! Shared stubs and fixtures for stage tests

use async_trait::async_trait;
use chrono::{Duration, Local, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::ebird::client::{ObservationApi, ObservationError};
use crate::ebird::types::{Hotspot, Observation, TaxonomyEntry};
use crate::llm::client::{LlmClient, LlmError};
use crate::types::{
    Accessibility, ClusterStatistics, CoordinateQuality, EnrichedSighting, FetchMethod,
    HotspotCluster, Location, ScoredCluster, Scoring, ScoringMethod, Sighting, TargetSpecies,
    ValidationMethod,
};

/// ObservationError cannot be cloned; stubs rebuild an equivalent error for
/// every call.
fn clone_error(error: &ObservationError) -> ObservationError {
    match error {
        ObservationError::RateLimited => ObservationError::RateLimited,
        ObservationError::Server(code) => ObservationError::Server(*code),
        ObservationError::NotFound(path) => ObservationError::NotFound(path.clone()),
        ObservationError::Auth(path) => ObservationError::Auth(path.clone()),
        ObservationError::BadRequest(path) => ObservationError::BadRequest(path.clone()),
        ObservationError::Timeout => ObservationError::Timeout,
        ObservationError::Network(message) => ObservationError::Network(message.clone()),
        ObservationError::Decode(message) => ObservationError::Decode(message.clone()),
        ObservationError::CircuitOpen => ObservationError::CircuitOpen,
        ObservationError::Unexpected(code) => ObservationError::Unexpected(*code),
    }
}

/// Configurable in-memory observation service
#[derive(Default)]
pub struct StubObservationApi {
    taxonomy: Option<Vec<TaxonomyEntry>>,
    taxonomy_auth_error: bool,
    taxonomy_calls: Arc<AtomicUsize>,
    species_sightings: HashMap<String, Vec<Observation>>,
    species_errors: HashMap<String, ObservationError>,
    regional_hotspots: HashMap<String, Vec<Hotspot>>,
    nearby_hotspots: Vec<Hotspot>,
    hotspots_error: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StubObservationApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_taxonomy(mut self, taxonomy: Vec<TaxonomyEntry>) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    pub fn with_taxonomy_auth_error(mut self) -> Self {
        self.taxonomy_auth_error = true;
        self
    }

    pub fn with_species_sightings(mut self, code: &str, sightings: Vec<Observation>) -> Self {
        self.species_sightings.insert(code.to_string(), sightings);
        self
    }

    pub fn with_species_error(mut self, code: &str, error: ObservationError) -> Self {
        self.species_errors.insert(code.to_string(), error);
        self
    }

    pub fn with_regional_hotspots(mut self, region: &str, hotspots: Vec<Hotspot>) -> Self {
        self.regional_hotspots.insert(region.to_string(), hotspots);
        self
    }

    pub fn with_nearby_hotspots(mut self, hotspots: Vec<Hotspot>) -> Self {
        self.nearby_hotspots = hotspots;
        self
    }

    pub fn with_hotspots_error(mut self) -> Self {
        self.hotspots_error = true;
        self
    }

    pub fn taxonomy_call_counter(&self) -> Arc<AtomicUsize> {
        self.taxonomy_calls.clone()
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    fn species_result(&self, code: &str) -> Result<Vec<Observation>, ObservationError> {
        if let Some(error) = self.species_errors.get(code) {
            return Err(clone_error(error));
        }
        Ok(self.species_sightings.get(code).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ObservationApi for StubObservationApi {
    async fn nearby_observations(
        &self,
        _lat: f64,
        _lng: f64,
        distance_km: u32,
        _days_back: u32,
        species_code: Option<&str>,
    ) -> Result<Vec<Observation>, ObservationError> {
        let code = species_code.unwrap_or("all");
        self.calls
            .lock()
            .unwrap()
            .push(format!("nearby_observations:{code}:dist={distance_km}"));
        self.species_result(code)
    }

    async fn species_observations(
        &self,
        species_code: &str,
        region_code: &str,
        days_back: u32,
    ) -> Result<Vec<Observation>, ObservationError> {
        self.calls.lock().unwrap().push(format!(
            "species_observations:{species_code}:{region_code}:back={days_back}"
        ));
        self.species_result(species_code)
    }

    async fn hotspots(&self, region_code: &str) -> Result<Vec<Hotspot>, ObservationError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("hotspots:{region_code}"));
        if self.hotspots_error {
            return Err(ObservationError::Server(500));
        }
        Ok(self
            .regional_hotspots
            .get(region_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn nearby_hotspots(
        &self,
        _lat: f64,
        _lng: f64,
        distance_km: u32,
    ) -> Result<Vec<Hotspot>, ObservationError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("nearby_hotspots:dist={distance_km}"));
        if self.hotspots_error {
            return Err(ObservationError::Server(500));
        }
        Ok(self.nearby_hotspots.clone())
    }

    async fn taxonomy(&self) -> Result<Vec<TaxonomyEntry>, ObservationError> {
        self.taxonomy_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("taxonomy".to_string());
        if self.taxonomy_auth_error {
            return Err(ObservationError::Auth("/ref/taxonomy/ebird".to_string()));
        }
        Ok(self.taxonomy.clone().unwrap_or_default())
    }
}

/// Canned-response or always-failing language model
pub struct StubLlm {
    response: Option<String>,
    calls: AtomicUsize,
}

impl StubLlm {
    pub fn returning(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err(LlmError::Http("stubbed failure".to_string())),
        }
    }
}

fn recent_obs_dt() -> String {
    (Local::now().naive_local() - Duration::days(1))
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

pub fn observation_at(species: &str, loc_id: &str, lat: f64, lng: f64) -> Observation {
    Observation {
        species_code: species.to_string(),
        com_name: format!("{species} common name"),
        sci_name: format!("{species} sci name"),
        loc_id: loc_id.to_string(),
        loc_name: format!("{loc_id} name"),
        lat: Some(lat),
        lng: Some(lng),
        obs_dt: recent_obs_dt(),
        how_many: Some(1),
        obs_valid: true,
        obs_reviewed: false,
        location_private: false,
    }
}

pub fn target_species(code: &str) -> TargetSpecies {
    let common_name = match code {
        "norcar" => "Northern Cardinal",
        "blujay" => "Blue Jay",
        other => other,
    };
    TargetSpecies {
        original_name: common_name.to_string(),
        common_name: common_name.to_string(),
        scientific_name: format!("{code} scientific"),
        species_code: code.to_string(),
        taxonomic_order: 0.0,
        family_common_name: String::new(),
        family_scientific_name: String::new(),
        validation_method: ValidationMethod::DirectCommonName,
        confidence: 1.0,
        seasonal_notes: "Year-round resident in most of range".to_string(),
        behavioral_notes: String::new(),
    }
}

pub fn sighting_at(species: &str, loc_id: &str, lat: f64, lng: f64) -> Sighting {
    Sighting {
        observation: observation_at(species, loc_id, lat, lng),
        fetch_method: FetchMethod::SpeciesObservations,
        fetch_timestamp: Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap(),
        validation_confidence: 1.0,
        validation_method: ValidationMethod::DirectCommonName,
        original_species_name: species.to_string(),
        seasonal_notes: String::new(),
        behavioral_notes: String::new(),
    }
}

pub fn sighting_at_on(species: &str, loc_id: &str, lat: f64, lng: f64, obs_dt: &str) -> Sighting {
    let mut sighting = sighting_at(species, loc_id, lat, lng);
    sighting.observation.obs_dt = obs_dt.to_string();
    sighting
}

pub fn enriched_at(species: &str, loc_id: &str, lat: f64, lng: f64) -> EnrichedSighting {
    EnrichedSighting {
        sighting: sighting_at(species, loc_id, lat, lng),
        has_valid_gps: true,
        within_travel_radius: true,
        within_date_range: true,
        within_region: true,
        quality_compliant: true,
        is_duplicate: false,
        daily_distance_compliant: true,
        meets_all_constraints: true,
        distance_from_start_km: None,
        estimated_travel_time_hours: None,
    }
}

pub fn hotspot_at(loc_id: &str, name: &str, lat: f64, lng: f64, num_species: u32) -> Hotspot {
    Hotspot {
        loc_id: loc_id.to_string(),
        loc_name: name.to_string(),
        lat: Some(lat),
        lng: Some(lng),
        country_code: Some("US".to_string()),
        subnational1_code: Some("US-MA".to_string()),
        subnational2_code: None,
        latest_obs_dt: Some(recent_obs_dt()),
        num_species_all_time: Some(num_species),
    }
}

/// One-location cluster with the given species set and newest observation
pub fn cluster_fixture(
    id: &str,
    species_codes: &[&str],
    most_recent: Option<String>,
) -> HotspotCluster {
    let species: Vec<String> = species_codes.iter().map(|s| s.to_string()).collect();
    let location = Location {
        coord_key: "42.3554,-71.0655".to_string(),
        lat: 42.3554,
        lng: -71.0655,
        primary_loc_id: "L1".to_string(),
        primary_loc_name: "Boston Common".to_string(),
        alternate_loc_ids: Default::default(),
        alternate_loc_names: Default::default(),
        sighting_count: species.len().max(1),
        species_codes: species.iter().cloned().collect(),
        observation_dates: Default::default(),
        is_hotspot: false,
        hotspot_metadata: None,
    };

    HotspotCluster {
        cluster_id: id.to_string(),
        cluster_name: "Boston Common".to_string(),
        center_lat: location.lat,
        center_lng: location.lng,
        statistics: ClusterStatistics {
            location_count: 1,
            sighting_count: species.len(),
            species_diversity: species.len(),
            hotspot_count: 0,
            cluster_radius_km: 0.0,
            most_recent_observation: most_recent,
            species_codes: species,
        },
        accessibility: Accessibility {
            has_hotspot: false,
            avg_travel_time_estimate: None,
            coordinate_quality: CoordinateQuality::High,
        },
        locations: vec![location],
        sightings: Vec::new(),
    }
}

/// Scored cluster centered at the given coordinates
pub fn scored_cluster_at(id: &str, lat: f64, lng: f64, score: f64) -> ScoredCluster {
    let mut cluster = cluster_fixture(id, &["norcar"], None);
    cluster.cluster_name = format!("{id} area");
    cluster.center_lat = lat;
    cluster.center_lng = lng;
    cluster.locations[0].lat = lat;
    cluster.locations[0].lng = lng;

    ScoredCluster {
        cluster,
        scoring: Scoring {
            diversity_score: score,
            recency_score: score,
            hotspot_score: score,
            accessibility_score: score,
            base_score: score,
            target_species_found: 1,
            total_species_found: 1,
            scoring_method: ScoringMethod::Algorithmic,
            habitat_score: None,
        },
        llm_evaluation: None,
        base_score: score,
        final_score: score,
    }
}
