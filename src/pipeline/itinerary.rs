//! Stage 7: itinerary rendering
//!
//! Produces the final markdown plan. The preferred path asks the language
//! model for a guide-quality itinerary and validates the response shape; up
//! to three attempts, after which a deterministic template takes over. With
//! no route at all, a diagnostic "no route" document is emitted instead.

use chrono::Local;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::Constraints;
use crate::llm::client::LlmClient;
use crate::llm::sanitize::{sanitize_text, InputKind};
use crate::pipeline::PipelineStats;
use crate::types::{Route, TargetSpecies};

/// LLM attempts before the template takes over
const MAX_LLM_ATTEMPTS: u32 = 3;

/// Species listed in full in prompts and templates
const PROMPT_SPECIES_LIMIT: usize = 10;

/// Minimum plausible length for a generated itinerary
const MIN_RESPONSE_CHARS: usize = 500;

/// How the itinerary was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItineraryMethod {
    LlmEnhanced,
    TemplateFallback,
    None,
}

/// Stage statistics
#[derive(Debug, Clone, Serialize)]
pub struct ItineraryStats {
    pub method: ItineraryMethod,
    pub llm_attempts: u32,
    pub content_sections: usize,
    pub total_species: usize,
    pub total_locations: usize,
    pub estimated_trip_duration_hours: f64,
}

/// Stage output
#[derive(Debug, Clone)]
pub struct ItineraryOutput {
    pub markdown: String,
    pub stats: ItineraryStats,
    pub warning: Option<String>,
}

/// Markdown itinerary renderer with validated LLM path and template fallback
pub struct ItineraryRenderer {
    llm: Option<Arc<dyn LlmClient>>,
    max_attempts: u32,
}

impl ItineraryRenderer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            llm,
            max_attempts: MAX_LLM_ATTEMPTS,
        }
    }

    /// Render the itinerary for a finished route.
    pub async fn run(
        &self,
        route: &Route,
        species: &[TargetSpecies],
        constraints: &Constraints,
        pipeline_stats: &PipelineStats,
    ) -> ItineraryOutput {
        let drive_time: f64 = route
            .segments
            .iter()
            .map(|s| s.estimated_drive_time_hours)
            .sum();
        let mut stats = ItineraryStats {
            method: ItineraryMethod::None,
            llm_attempts: 0,
            content_sections: 0,
            total_species: species.len(),
            total_locations: route.ordered_clusters.len(),
            estimated_trip_duration_hours: drive_time,
        };

        if route.ordered_clusters.is_empty() {
            tracing::warn!("No route available for itinerary generation");
            return ItineraryOutput {
                markdown: no_route_message(),
                stats,
                warning: Some("No route available for itinerary".to_string()),
            };
        }

        tracing::info!(
            "Generating itinerary for {} locations and {} target species",
            route.ordered_clusters.len(),
            species.len()
        );

        if let Some(markdown) = self
            .llm_itinerary(route, species, constraints, pipeline_stats, &mut stats)
            .await
        {
            stats.method = ItineraryMethod::LlmEnhanced;
            stats.content_sections = markdown.matches("##").count();
            tracing::info!("Generated LLM-enhanced itinerary");
            return ItineraryOutput {
                markdown,
                stats,
                warning: None,
            };
        }

        if self.llm.is_some() {
            tracing::warn!("LLM itinerary generation failed, using template fallback");
        }
        let markdown = template_itinerary(route, species, constraints);
        stats.method = ItineraryMethod::TemplateFallback;
        stats.content_sections = markdown.matches("##").count();

        ItineraryOutput {
            markdown,
            stats,
            warning: Some("Itinerary generated from template".to_string()),
        }
    }

    /// LLM path: prompt, validate, wrap. `None` after the attempt budget is
    /// spent or when no model is configured.
    async fn llm_itinerary(
        &self,
        route: &Route,
        species: &[TargetSpecies],
        constraints: &Constraints,
        pipeline_stats: &PipelineStats,
        stats: &mut ItineraryStats,
    ) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let prompt = itinerary_prompt(route, species, constraints);

        for attempt in 1..=self.max_attempts {
            stats.llm_attempts = attempt;
            match llm.complete(&prompt).await {
                Ok(response) => {
                    if validate_itinerary_response(&response) {
                        return Some(wrap_with_metadata(&response, pipeline_stats));
                    }
                    tracing::warn!("LLM itinerary validation failed on attempt {attempt}");
                }
                Err(e) => {
                    tracing::error!("LLM itinerary generation attempt {attempt} failed: {e}");
                }
            }
        }
        None
    }
}

/// Response must look like an actual itinerary: long enough, with markdown
/// sections, and mentioning species, locations and timing.
fn validate_itinerary_response(response: &str) -> bool {
    if response.chars().count() < MIN_RESPONSE_CHARS {
        return false;
    }
    let lower = response.to_lowercase();
    response.contains("##")
        && lower.contains("species")
        && lower.contains("location")
        && lower.contains("time")
}

fn itinerary_prompt(route: &Route, species: &[TargetSpecies], constraints: &Constraints) -> String {
    let overview = trip_overview(route, constraints);
    let species_section = species_section(species);
    let stops = stops_section(route);

    format!(
        "You are a professional birding guide with extensive field experience creating detailed trip itineraries.\n\
         \n\
         TRIP OVERVIEW:\n{overview}\n\
         \n\
         TARGET SPECIES:\n{species_section}\n\
         \n\
         OPTIMIZED ROUTE:\n{stops}\n\
         \n\
         Create a comprehensive birding itinerary with expert guidance. Include:\n\
         \n\
         1. **Executive Summary**: trip highlights and expectations\n\
         2. **Species Target List**: priority species with timing and habitat advice\n\
         3. **Detailed Location Guide**: per location, arrival time, habitat, observation tips\n\
         4. **Travel Schedule**: driving legs and timing between locations\n\
         5. **Field Tips**: techniques, etiquette and photography advice\n\
         6. **Contingency Plans**: alternatives if target species are not found\n\
         \n\
         Format as clean markdown with proper headers. Focus on actionable field\n\
         guidance that maximizes observation success."
    )
}

fn trip_overview(route: &Route, constraints: &Constraints) -> String {
    let start = match constraints.start_location {
        Some(loc) => format!("({:.4}, {:.4})", loc.lat, loc.lng),
        None => "Not specified".to_string(),
    };
    let drive_time: f64 = route
        .segments
        .iter()
        .map(|s| s.estimated_drive_time_hours)
        .sum();
    let date_range = match &constraints.date_range {
        Some(range) => format!("{} to {}", range.start, range.end),
        None => "Flexible".to_string(),
    };

    format!(
        "- Starting Point: {start}\n\
         - Total Locations: {}\n\
         - Total Distance: {:.1} km\n\
         - Estimated Driving Time: {drive_time:.1} hours\n\
         - Region: {}\n\
         - Date Range: {date_range}\n\
         - Max Daily Distance: {} km",
        route.ordered_clusters.len(),
        route.total_distance_km,
        constraints.region_code.as_deref().unwrap_or("Not specified"),
        constraints.max_daily_distance_km,
    )
}

/// Target species block, capped with an "and N more" suffix
fn species_section(species: &[TargetSpecies]) -> String {
    if species.is_empty() {
        return "No specific target species identified.".to_string();
    }

    let mut sections: Vec<String> = species
        .iter()
        .take(PROMPT_SPECIES_LIMIT)
        .map(|s| {
            format!(
                "**{}** (*{}*)\n\
                 - Code: {}\n\
                 - Validation: {} (confidence: {:.1})\n\
                 - Seasonal Notes: {}\n\
                 - Behavioral Notes: {}",
                s.common_name,
                s.scientific_name,
                s.species_code,
                s.validation_method.as_str(),
                s.confidence,
                s.seasonal_notes,
                s.behavioral_notes,
            )
        })
        .collect();

    if species.len() > PROMPT_SPECIES_LIMIT {
        sections.push(format!(
            "... and {} additional species",
            species.len() - PROMPT_SPECIES_LIMIT
        ));
    }
    sections.join("\n\n")
}

fn stops_section(route: &Route) -> String {
    let mut sections = Vec::new();
    for (i, cluster) in route.ordered_clusters.iter().enumerate() {
        let segment = route.segments.iter().find(|s| s.segment_number == i + 1);
        let mut section = format!(
            "**Stop {}: {}**\n\
             - Coordinates: ({:.4}, {:.4})\n\
             - Score: {:.2}\n\
             - Species Diversity: {} species\n\
             - Recent Sightings: {} observations\n\
             - Hotspot Status: {}\n\
             - Distance from Previous: {:.1} km\n\
             - Estimated Drive Time: {:.1} hours\n\
             - Species Found: {}",
            i + 1,
            sanitize_text(&cluster.cluster.cluster_name, InputKind::Location),
            cluster.cluster.center_lat,
            cluster.cluster.center_lng,
            cluster.final_score,
            cluster.cluster.statistics.species_diversity,
            cluster.cluster.statistics.sighting_count,
            if cluster.cluster.accessibility.has_hotspot {
                "Official Hotspot"
            } else {
                "Sighting Location"
            },
            segment.map_or(0.0, |s| s.distance_km),
            segment.map_or(0.0, |s| s.estimated_drive_time_hours),
            cluster
                .cluster
                .statistics
                .species_codes
                .iter()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        );

        if let Some(evaluation) = &cluster.llm_evaluation {
            let _ = write!(
                section,
                "\n- Habitat Score: {:.2}\n\
                 - Expert Assessment: {}\n\
                 - Best Timing: {}\n\
                 - Field Tips: {}",
                evaluation.habitat_score,
                evaluation.reasoning,
                evaluation.best_time,
                evaluation.tips,
            );
        }
        sections.push(section);
    }
    sections.join("\n\n")
}

/// Wrap the LLM content with a statistics header and data-source footer
fn wrap_with_metadata(itinerary: &str, pipeline_stats: &PipelineStats) -> String {
    let validated = pipeline_stats.validation.direct_matches
        + pipeline_stats.validation.fuzzy_matches
        + pipeline_stats.validation.cache_hits;
    let method = pipeline_stats
        .route
        .optimization_method
        .map_or("unknown", |m| m.as_str());

    let header = format!(
        "# Birding Trip Itinerary\n\
         *Generated by birdtrip*\n\
         \n\
         ---\n\
         \n\
         ## Trip Statistics\n\
         - **Locations Analyzed**: {} sightings across {} locations\n\
         - **Species Validated**: {} requested, {validated} confirmed\n\
         - **Route Optimization**: {method} method\n\
         - **Total Trip Distance**: {:.1} km\n\
         \n\
         ---\n\
         \n",
        pipeline_stats.clustering.total_input_sightings,
        pipeline_stats.clustering.unique_locations_found,
        pipeline_stats.validation.total_input,
        pipeline_stats.route.total_route_distance_km,
    );

    let footer = format!(
        "\n\n---\n\
         \n\
         ## Important Notes\n\
         \n\
         ### Data Sources\n\
         - Bird observations from the eBird API (recent {} observations)\n\
         - Hotspot data from the official eBird hotspot registry\n\
         - Route ordering from traveling-salesman heuristics\n\
         \n\
         ### Disclaimers\n\
         - Recent observations do not guarantee current bird presence\n\
         - Weather, season and local factors can significantly impact birding success\n\
         - Respect private property, follow local regulations, and practice ethical birding\n\
         - Check recent eBird reports before visiting each location\n\
         \n\
         ### Equipment Recommendations\n\
         - Binoculars (8x42 or 10x42 recommended)\n\
         - Field guide for the region\n\
         - eBird mobile app for real-time reporting\n\
         - Camera with telephoto lens (optional)\n\
         - Weather-appropriate clothing and comfortable walking shoes\n\
         \n\
         *Happy Birding!*\n\
         \n\
         *Generated on {}*\n",
        pipeline_stats.fetch.total_observations,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
    );

    format!("{header}{itinerary}{footer}")
}

/// Deterministic fallback itinerary
fn template_itinerary(
    route: &Route,
    species: &[TargetSpecies],
    constraints: &Constraints,
) -> String {
    let start = match constraints.start_location {
        Some(loc) => format!("{:.4}, {:.4}", loc.lat, loc.lng),
        None => "Not specified".to_string(),
    };
    let total_distance: f64 = route.segments.iter().map(|s| s.distance_km).sum();
    let total_time: f64 = route
        .segments
        .iter()
        .map(|s| s.estimated_drive_time_hours)
        .sum();

    let mut markdown = format!(
        "# Birding Trip Itinerary\n\
         *Template-based itinerary (LLM generation unavailable)*\n\
         \n\
         ## Trip Overview\n\
         - **Starting Point**: {start}\n\
         - **Total Locations**: {}\n\
         - **Target Species**: {}\n\
         - **Estimated Distance**: {total_distance:.1} km\n\
         - **Estimated Travel Time**: {total_time:.1} hours\n\
         \n\
         ## Target Species List\n",
        route.ordered_clusters.len(),
        species.len(),
    );

    for target in species {
        let _ = writeln!(
            markdown,
            "- **{}** (*{}*) - {}",
            target.common_name, target.scientific_name, target.seasonal_notes
        );
    }

    markdown.push_str("\n## Location Schedule\n");

    for (i, cluster) in route.ordered_clusters.iter().enumerate() {
        let segment = route.segments.iter().find(|s| s.segment_number == i + 1);
        let _ = write!(
            markdown,
            "\n### Stop {}: {}\n\
             - **Coordinates**: {:.4}, {:.4}\n\
             - **Species Diversity**: {} species observed\n\
             - **Recent Sightings**: {} observations\n\
             - **Score**: {:.2}\n\
             - **Distance from previous**: {:.1} km ({:.1} hours)\n\
             - **Hotspot Status**: {}\n\
             \n\
             **Species found here**: {}\n",
            i + 1,
            cluster.cluster.cluster_name,
            cluster.cluster.center_lat,
            cluster.cluster.center_lng,
            cluster.cluster.statistics.species_diversity,
            cluster.cluster.statistics.sighting_count,
            cluster.final_score,
            segment.map_or(0.0, |s| s.distance_km),
            segment.map_or(0.0, |s| s.estimated_drive_time_hours),
            if cluster.cluster.accessibility.has_hotspot {
                "Official Hotspot"
            } else {
                "Regular birding location"
            },
            cluster
                .cluster
                .statistics
                .species_codes
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        );
    }

    markdown.push_str(
        "\n## General Birding Tips\n\
         - Check eBird for recent sightings before visiting each location\n\
         - Early morning (dawn to 10 AM) is typically the most productive time\n\
         - Bring appropriate weather gear and comfortable walking shoes\n\
         - Respect private property and follow local birding ethics\n\
         - Consider joining local birding groups for area-specific knowledge\n\
         \n\
         ## Equipment Checklist\n\
         - [ ] Binoculars (8x42 or 10x42 recommended)\n\
         - [ ] Field guide for the region\n\
         - [ ] eBird mobile app\n\
         - [ ] Camera (optional)\n\
         - [ ] Notebook and pen\n\
         - [ ] Snacks and water\n\
         - [ ] Weather-appropriate clothing\n\
         \n\
         *This itinerary was generated using automated route optimization and recent observation data.*\n",
    );

    markdown
}

/// Diagnostic document for the empty-route case
fn no_route_message() -> String {
    "# Birding Trip Itinerary\n\
     \n\
     ## No Route Available\n\
     \n\
     No birding locations could be planned for your trip parameters. This could be due to:\n\
     \n\
     - No recent bird sightings in the specified region\n\
     - All locations filtered out by travel constraints\n\
     - Observation data unavailable\n\
     \n\
     ## Suggestions\n\
     1. Try expanding your search radius\n\
     2. Consider relaxing travel distance constraints\n\
     3. Check eBird directly for recent activity in your target region\n\
     4. Verify your target species are present in the region and season\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartLocation;
    use crate::pipeline::routing::RouteOptimizer;
    use crate::pipeline::test_support::{scored_cluster_at, target_species, StubLlm};

    fn boston_constraints() -> Constraints {
        Constraints {
            start_location: Some(StartLocation {
                lat: 42.3601,
                lng: -71.0589,
            }),
            ..Default::default()
        }
    }

    fn sample_route() -> Route {
        let clusters = vec![
            scored_cluster_at("cluster_1", 42.37, -71.11, 0.9),
            scored_cluster_at("cluster_2", 42.47, -71.15, 0.7),
        ];
        RouteOptimizer::run(&clusters, &boston_constraints()).route
    }

    fn long_valid_response() -> String {
        let mut body = String::from(
            "## Executive Summary\nA focused day of birding.\n\n\
             ## Species Targets\nThe target species respond best to early starts.\n\n\
             ## Location Guide\nEach location below lists arrival time advice.\n",
        );
        while body.chars().count() < 600 {
            body.push_str("More field guidance about species, location access, and timing.\n");
        }
        body
    }

    #[tokio::test]
    async fn test_template_fallback_without_llm() {
        let renderer = ItineraryRenderer::new(None);
        let route = sample_route();
        let out = renderer
            .run(
                &route,
                &[target_species("norcar")],
                &boston_constraints(),
                &PipelineStats::default(),
            )
            .await;

        assert_eq!(out.stats.method, ItineraryMethod::TemplateFallback);
        assert_eq!(out.stats.llm_attempts, 0);
        assert!(out.markdown.contains("# Birding Trip Itinerary"));
        assert!(out.markdown.contains("Stop 1:"));
        assert!(out.markdown.contains("Equipment Checklist"));
        assert!(out.markdown.contains("Northern Cardinal"));
    }

    #[tokio::test]
    async fn test_no_route_message() {
        let renderer = ItineraryRenderer::new(None);
        let route = Route {
            ordered_clusters: Vec::new(),
            total_distance_km: 0.0,
            optimization_method: crate::types::OptimizationMethod::Empty,
            segments: Vec::new(),
        };
        let out = renderer
            .run(&route, &[], &boston_constraints(), &PipelineStats::default())
            .await;

        assert_eq!(out.stats.method, ItineraryMethod::None);
        assert!(out.markdown.contains("No Route Available"));
        assert!(out.warning.is_some());
    }

    #[tokio::test]
    async fn test_llm_path_wraps_with_metadata() {
        let llm = Arc::new(StubLlm::returning(&long_valid_response()));
        let renderer = ItineraryRenderer::new(Some(llm));
        let route = sample_route();
        let out = renderer
            .run(
                &route,
                &[target_species("norcar")],
                &boston_constraints(),
                &PipelineStats::default(),
            )
            .await;

        assert_eq!(out.stats.method, ItineraryMethod::LlmEnhanced);
        assert_eq!(out.stats.llm_attempts, 1);
        assert!(out.markdown.starts_with("# Birding Trip Itinerary"));
        assert!(out.markdown.contains("## Trip Statistics"));
        assert!(out.markdown.contains("Executive Summary"));
        assert!(out.markdown.contains("## Important Notes"));
        assert!(out.markdown.contains("Generated on "));
        assert!(out.stats.content_sections >= 3);
    }

    #[tokio::test]
    async fn test_invalid_llm_responses_retry_then_fall_back() {
        // Too short to be an itinerary, every time
        let llm = Arc::new(StubLlm::returning("## Species at this location, any time."));
        let renderer = ItineraryRenderer::new(Some(llm.clone()));
        let route = sample_route();
        let out = renderer
            .run(&route, &[], &boston_constraints(), &PipelineStats::default())
            .await;

        assert_eq!(out.stats.method, ItineraryMethod::TemplateFallback);
        assert_eq!(out.stats.llm_attempts, 3);
        assert_eq!(llm.calls(), 3);
        assert!(out.warning.is_some());
    }

    #[test]
    fn test_response_validation() {
        assert!(validate_itinerary_response(&long_valid_response()));
        assert!(!validate_itinerary_response("too short"));

        // Long but missing markdown headers
        let headerless = "species location time ".repeat(40);
        assert!(!validate_itinerary_response(&headerless));

        // Long with headers but missing required mentions
        let mut no_mentions = String::from("## Plan\n");
        while no_mentions.chars().count() < 600 {
            no_mentions.push_str("Drive somewhere and look around for a while.\n");
        }
        assert!(!validate_itinerary_response(&no_mentions));
    }

    #[tokio::test]
    async fn test_species_overflow_suffix() {
        let species: Vec<TargetSpecies> = (0..13)
            .map(|i| {
                let mut s = target_species("norcar");
                s.common_name = format!("Species {i}");
                s
            })
            .collect();
        let section = species_section(&species);
        assert!(section.contains("... and 3 additional species"));
    }

    #[tokio::test]
    async fn test_trip_duration_from_segments() {
        let renderer = ItineraryRenderer::new(None);
        let route = sample_route();
        let expected: f64 = route
            .segments
            .iter()
            .map(|s| s.estimated_drive_time_hours)
            .sum();
        let out = renderer
            .run(&route, &[], &boston_constraints(), &PipelineStats::default())
            .await;
        assert!((out.stats.estimated_trip_duration_hours - expected).abs() < 1e-9);
    }
}
