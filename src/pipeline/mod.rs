//! The seven-stage trip-planning pipeline
//!
//! The runner sequences the stages over a typed shared store: each stage
//! reads the collections of earlier stages, produces its own, and adds a
//! stats block. Stages are fail-soft - they emit possibly-empty outputs and
//! warnings instead of raising - so the runner proceeds whenever a stage
//! produced its output. Only invalid caller input and an authentication
//! failure against the observation service abort a run, and even then the
//! result carries every stats block plus whatever partial results exist.
//!
//! Parallelism lives inside Stage 2 (per-species fan-out) and Stage 5's
//! refinement calls; everything between stage boundaries is sequential, and
//! cancellation (dropping the future) takes effect at those boundaries.

pub mod clustering;
pub mod constraints;
pub mod itinerary;
pub mod routing;
pub mod scoring;
pub mod sightings;
pub mod species;

#[cfg(test)]
pub(crate) mod test_support;

use serde::Serialize;
use std::sync::Arc;

use crate::config::{Constraints, Settings};
use crate::ebird::client::{EbirdApiClient, ObservationApi};
use crate::error::{Error, Result};
use crate::llm::client::{ChatCompletionClient, LlmClient};
use crate::types::{HotspotCluster, OptimizationMethod, Route, ScoredCluster, TargetSpecies};

use self::clustering::{ClusteringStats, HotspotClusterer};
use self::constraints::{ConstraintFilter, FilteringStats};
use self::itinerary::{ItineraryRenderer, ItineraryStats};
use self::routing::{RouteOptimizer, RouteStats};
use self::scoring::{LocationScorer, ScoringStats};
use self::sightings::{FetchStats, SightingsFetcher};
use self::species::{SpeciesValidator, ValidationStats};

/// Seed for the shared store: the user's trip request
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    pub species_list: Vec<String>,
    pub constraints: Constraints,
}

/// Per-stage statistics, always present on the result
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub validation: ValidationStats,
    pub fetch: FetchStats,
    pub filtering: FilteringStats,
    pub clustering: ClusteringStats,
    pub scoring: ScoringStats,
    pub route: RouteStats,
    pub itinerary: Option<ItineraryStats>,
}

/// Complete pipeline output
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub error: Option<String>,
    pub itinerary_markdown: String,
    pub validated_species: Vec<TargetSpecies>,
    pub hotspot_clusters: Vec<HotspotCluster>,
    pub scored_locations: Vec<ScoredCluster>,
    pub route: Route,
    pub stats: PipelineStats,
    pub warnings: Vec<String>,
}

impl PipelineResult {
    fn failure(error: String, stats: PipelineStats, warnings: Vec<String>) -> Self {
        let itinerary_markdown = format!(
            "# Birding Trip Itinerary\n\
             \n\
             ## Planning Failed\n\
             \n\
             {error}\n\
             \n\
             No itinerary could be generated. Partial results, where available,\n\
             are included alongside this message.\n"
        );
        Self {
            success: false,
            error: Some(error),
            itinerary_markdown,
            validated_species: Vec::new(),
            hotspot_clusters: Vec::new(),
            scored_locations: Vec::new(),
            route: Route {
                ordered_clusters: Vec::new(),
                total_distance_km: 0.0,
                optimization_method: OptimizationMethod::Empty,
                segments: Vec::new(),
            },
            stats,
            warnings,
        }
    }
}

/// Sequences the seven stages and owns the per-pipeline collaborators
pub struct PipelineRunner {
    observations: Arc<dyn ObservationApi>,
    llm: Option<Arc<dyn LlmClient>>,
    validator: SpeciesValidator,
}

impl PipelineRunner {
    /// Build a runner over explicit capability objects. Tests pass stubs;
    /// production callers usually go through [`PipelineRunner::from_settings`].
    pub fn new(observations: Arc<dyn ObservationApi>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        let validator = SpeciesValidator::new(observations.clone(), llm.clone());
        Self {
            observations,
            llm,
            validator,
        }
    }

    /// Build the production runner: eBird client plus, when a token is
    /// configured, the chat-completion client.
    pub fn from_settings(settings: &Settings) -> Self {
        let observations: Arc<dyn ObservationApi> = Arc::new(
            EbirdApiClient::new(settings.ebird_api_token.clone())
                .with_base_url(settings.ebird_base_url.clone()),
        );
        let llm: Option<Arc<dyn LlmClient>> = ChatCompletionClient::from_settings(settings)
            .map(|client| Arc::new(client) as Arc<dyn LlmClient>);
        Self::new(observations, llm)
    }

    /// Run the full pipeline for one trip request.
    pub async fn run(&self, input: PipelineInput) -> PipelineResult {
        let mut stats = PipelineStats::default();
        let mut warnings = Vec::new();

        if let Err(e) = validate_input(&input) {
            tracing::error!("Pipeline input rejected: {e}");
            return PipelineResult::failure(e.to_string(), stats, warnings);
        }

        let constraints = &input.constraints;

        // Stage 1: species validation
        let validation = self.validator.run(&input.species_list).await;
        stats.validation = validation.stats.clone();
        warnings.extend(validation.warning.clone());
        let validated_species = validation.validated_species;

        // Stage 2: sightings fetch
        let fetch = SightingsFetcher::new(self.observations.clone())
            .run(&validated_species, constraints)
            .await;
        stats.fetch = fetch.stats.clone();
        warnings.extend(fetch.warning.clone());

        if !validated_species.is_empty() && fetch.auth_failures == validated_species.len() {
            tracing::error!("Observation service rejected the API token; aborting pipeline");
            return PipelineResult::failure(
                "Authentication failed against the observation service".to_string(),
                stats,
                warnings,
            );
        }

        // Stage 3: constraint filtering
        let filtered = ConstraintFilter::run(&fetch.sightings, constraints);
        stats.filtering = filtered.stats.clone();
        warnings.extend(filtered.warning.clone());

        // Stage 4: hotspot clustering
        let clustered = HotspotClusterer::new(self.observations.clone())
            .run(&filtered.enriched_sightings, constraints)
            .await;
        stats.clustering = clustered.stats.clone();
        warnings.extend(clustered.warning.clone());

        // Stage 5: location scoring
        let scored = LocationScorer::new(self.llm.clone())
            .run(&clustered.hotspot_clusters, &validated_species)
            .await;
        stats.scoring = scored.stats.clone();
        warnings.extend(scored.warning.clone());

        // Stage 6: route optimization
        let routed = RouteOptimizer::run(&scored.scored_locations, constraints);
        stats.route = routed.stats.clone();
        warnings.extend(routed.warning.clone());

        // Stage 7: itinerary rendering
        let rendered = ItineraryRenderer::new(self.llm.clone())
            .run(&routed.route, &validated_species, constraints, &stats)
            .await;
        stats.itinerary = Some(rendered.stats.clone());
        warnings.extend(rendered.warning.clone());

        PipelineResult {
            success: true,
            error: None,
            itinerary_markdown: rendered.markdown,
            validated_species,
            hotspot_clusters: clustered.hotspot_clusters,
            scored_locations: scored.scored_locations,
            route: routed.route,
            stats,
            warnings,
        }
    }
}

/// Reject caller input that violates documented constraints. An empty
/// species list is allowed - the pipeline runs through to a "no route"
/// itinerary - but blank entries are not.
fn validate_input(input: &PipelineInput) -> Result<()> {
    for (i, name) in input.species_list.iter().enumerate() {
        if name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Species name at index {i} is empty"
            )));
        }
    }
    input.constraints.validate()
}
