//! Stage 2: sightings fetch
//!
//! Fans out one observation query per validated species over a bounded
//! worker pool. Endpoint strategy is chosen per species: nearby observations
//! when a start coordinate is available, region-wide species observations
//! otherwise. Every returned record is enriched with fetch provenance.
//! Per-species failures never cancel peers; they are captured and counted.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{Constraints, FETCH_WORKERS};
use crate::ebird::client::{ObservationApi, ObservationError};
use crate::types::{FetchMethod, Sighting, TargetSpecies};

/// Region assumed when the caller supplies neither a start coordinate nor a
/// region code
const DEFAULT_REGION: &str = "US-MA";

/// Stage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStats {
    pub total_species: usize,
    pub successful_fetches: usize,
    pub empty_results: usize,
    pub api_errors: usize,
    pub total_observations: usize,
    pub unique_locations: usize,
    pub fetch_method_stats: HashMap<String, usize>,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct FetchOutput {
    pub sightings: Vec<Sighting>,
    pub stats: FetchStats,
    pub warning: Option<String>,
    /// Species whose fetch failed with an authentication error; the runner
    /// aborts when every species failed this way
    pub auth_failures: usize,
}

/// Result of one per-species fetch task
struct SpeciesFetch {
    method: FetchMethod,
    result: Result<Vec<Sighting>, ObservationError>,
}

/// Parallel per-species sightings fetcher
pub struct SightingsFetcher {
    observations: Arc<dyn ObservationApi>,
    workers: usize,
}

impl SightingsFetcher {
    pub fn new(observations: Arc<dyn ObservationApi>) -> Self {
        Self {
            observations,
            workers: FETCH_WORKERS,
        }
    }

    /// Override the worker pool size
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Fetch recent sightings for every validated species concurrently.
    ///
    /// Results are aggregated in completion order; downstream stages do not
    /// depend on ordering across species.
    pub async fn run(&self, species: &[TargetSpecies], constraints: &Constraints) -> FetchOutput {
        let mut stats = FetchStats {
            total_species: species.len(),
            ..Default::default()
        };

        if species.is_empty() {
            tracing::warn!("No validated species to fetch sightings for");
            return FetchOutput {
                warning: Some("No species provided for fetching".to_string()),
                stats,
                ..Default::default()
            };
        }

        let results: Vec<SpeciesFetch> = stream::iter(species)
            .map(|target| self.fetch_one(target, constraints))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut sightings = Vec::new();
        let mut unique_locations = HashSet::new();
        let mut auth_failures = 0;

        for fetch in results {
            match fetch.result {
                Ok(records) => {
                    stats.successful_fetches += 1;
                    if records.is_empty() {
                        stats.empty_results += 1;
                    }
                    *stats
                        .fetch_method_stats
                        .entry(fetch.method.as_str().to_string())
                        .or_insert(0) += 1;
                    for sighting in &records {
                        unique_locations.insert(sighting.observation.loc_id.clone());
                    }
                    stats.total_observations += records.len();
                    sightings.extend(records);
                }
                Err(e) => {
                    stats.api_errors += 1;
                    if e.is_fatal() {
                        auth_failures += 1;
                    }
                }
            }
        }
        stats.unique_locations = unique_locations.len();

        let success_rate = stats.successful_fetches as f64 / species.len() as f64;
        let warning = if success_rate < 0.5 {
            tracing::warn!("Low fetch success rate: {:.0}%", success_rate * 100.0);
            Some(format!(
                "Low fetch success rate: {:.0}%",
                success_rate * 100.0
            ))
        } else if stats.total_observations == 0 {
            tracing::warn!("No observations found for any species");
            Some("No observations found for any species".to_string())
        } else {
            tracing::info!(
                "Sightings fetch completed: {:.0}% success rate, {} total observations",
                success_rate * 100.0,
                stats.total_observations
            );
            None
        };

        FetchOutput {
            sightings,
            stats,
            warning,
            auth_failures,
        }
    }

    /// Fetch and enrich sightings for a single species
    async fn fetch_one(&self, target: &TargetSpecies, constraints: &Constraints) -> SpeciesFetch {
        let days_back = constraints.days_back_clamped();

        let (method, result) = match constraints.start_location {
            Some(start) => {
                let distance_km = constraints.nearby_search_radius_km();
                let result = self
                    .observations
                    .nearby_observations(
                        start.lat,
                        start.lng,
                        distance_km,
                        days_back,
                        Some(&target.species_code),
                    )
                    .await;
                (FetchMethod::NearbyObservations, result)
            }
            None => {
                let region = constraints.region_code.as_deref().unwrap_or(DEFAULT_REGION);
                let result = self
                    .observations
                    .species_observations(&target.species_code, region, days_back)
                    .await;
                (FetchMethod::SpeciesObservations, result)
            }
        };

        let result = match result {
            Ok(observations) => {
                tracing::debug!(
                    "Fetched {} sightings for {} using {}",
                    observations.len(),
                    target.common_name,
                    method.as_str()
                );
                let fetch_timestamp = Utc::now();
                Ok(observations
                    .into_iter()
                    .map(|observation| Sighting {
                        observation,
                        fetch_method: method,
                        fetch_timestamp,
                        validation_confidence: target.confidence,
                        validation_method: target.validation_method,
                        original_species_name: target.original_name.clone(),
                        seasonal_notes: target.seasonal_notes.clone(),
                        behavioral_notes: target.behavioral_notes.clone(),
                    })
                    .collect())
            }
            Err(e) => {
                tracing::error!("eBird API error for {}: {e}", target.common_name);
                Err(e)
            }
        };

        SpeciesFetch { method, result }
    }
}
