//! Stage 5: location scoring
//!
//! Ranks clusters by a fixed-weight blend of four criteria: species
//! diversity (0.40), observation recency (0.25), hotspot standing (0.20)
//! and accessibility (0.15). The top clusters are then refined, best
//! effort, by a language-model habitat assessment blended at 0.7 base /
//! 0.3 habitat. LLM failure leaves the algorithmic score standing.

use chrono::Local;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::geo;
use crate::llm::client::LlmClient;
use crate::llm::sanitize::{sanitize_text, InputKind};
use crate::types::{
    HotspotCluster, LlmEvaluation, ScoredCluster, Scoring, ScoringMethod, TargetSpecies,
};

/// How many of the best clusters get an LLM habitat assessment
const LLM_REFINEMENT_LIMIT: usize = 10;

/// Most species listed per cluster in the habitat prompt
const PROMPT_SPECIES_LIMIT: usize = 5;

const WEIGHT_DIVERSITY: f64 = 0.40;
const WEIGHT_RECENCY: f64 = 0.25;
const WEIGHT_HOTSPOT: f64 = 0.20;
const WEIGHT_ACCESSIBILITY: f64 = 0.15;

/// Stage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringStats {
    pub total_clusters_scored: usize,
    pub target_species_count: usize,
    pub average_diversity_score: f64,
    pub average_recency_score: f64,
    pub average_hotspot_score: f64,
    pub average_accessibility_score: f64,
    pub llm_enhanced_clusters: usize,
    pub algorithmic_only_clusters: usize,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct ScoringOutput {
    pub scored_locations: Vec<ScoredCluster>,
    pub stats: ScoringStats,
    pub warning: Option<String>,
}

/// Multi-criteria cluster scorer with optional LLM refinement
pub struct LocationScorer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl LocationScorer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// Score and rank clusters, best first.
    pub async fn run(
        &self,
        clusters: &[HotspotCluster],
        target_species: &[TargetSpecies],
    ) -> ScoringOutput {
        let mut stats = ScoringStats {
            total_clusters_scored: clusters.len(),
            target_species_count: target_species.len(),
            ..Default::default()
        };

        if clusters.is_empty() {
            tracing::info!("No hotspot clusters to score");
            return ScoringOutput::default();
        }

        tracing::info!("Scoring {} hotspot clusters", clusters.len());

        let target_codes: HashSet<&str> = target_species
            .iter()
            .map(|s| s.species_code.as_str())
            .collect();

        let mut scored: Vec<ScoredCluster> = clusters
            .iter()
            .map(|cluster| score_cluster(cluster, &target_codes))
            .collect();

        self.apply_llm_refinement(&mut scored, target_species, &mut stats)
            .await;

        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let n = scored.len() as f64;
        stats.average_diversity_score =
            scored.iter().map(|c| c.scoring.diversity_score).sum::<f64>() / n;
        stats.average_recency_score =
            scored.iter().map(|c| c.scoring.recency_score).sum::<f64>() / n;
        stats.average_hotspot_score =
            scored.iter().map(|c| c.scoring.hotspot_score).sum::<f64>() / n;
        stats.average_accessibility_score = scored
            .iter()
            .map(|c| c.scoring.accessibility_score)
            .sum::<f64>()
            / n;
        stats.algorithmic_only_clusters = scored.len() - stats.llm_enhanced_clusters;

        let warning = match scored.first() {
            Some(top) if top.final_score < 0.3 => {
                tracing::warn!("Low top location score: {:.2}", top.final_score);
                Some(format!("Low top location score: {:.2}", top.final_score))
            }
            _ => None,
        };

        tracing::info!(
            "Location scoring completed: {} clusters ranked, {} LLM-enhanced",
            scored.len(),
            stats.llm_enhanced_clusters
        );

        ScoringOutput {
            scored_locations: scored,
            stats,
            warning,
        }
    }

    /// Refine the top clusters by base score with concurrent habitat
    /// assessments. Never fatal: a failed call leaves that cluster on its
    /// algorithmic score.
    async fn apply_llm_refinement(
        &self,
        scored: &mut [ScoredCluster],
        target_species: &[TargetSpecies],
        stats: &mut ScoringStats,
    ) {
        let llm = match &self.llm {
            Some(llm) => llm,
            None => return,
        };

        let mut order: Vec<usize> = (0..scored.len()).collect();
        order.sort_by(|&a, &b| {
            scored[b]
                .base_score
                .partial_cmp(&scored[a].base_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let selected: Vec<usize> = order.into_iter().take(LLM_REFINEMENT_LIMIT).collect();

        let evaluations = join_all(selected.iter().map(|&idx| {
            let prompt = habitat_prompt(&scored[idx].cluster, target_species);
            let llm = llm.clone();
            async move { llm.complete(&prompt).await }
        }))
        .await;

        for (&idx, evaluation) in selected.iter().zip(evaluations) {
            match evaluation {
                Ok(response) => {
                    let evaluation = parse_llm_evaluation(&response);
                    let cluster = &mut scored[idx];
                    cluster.final_score =
                        cluster.base_score * 0.7 + evaluation.habitat_score * 0.3;
                    cluster.scoring.habitat_score = Some(evaluation.habitat_score);
                    cluster.scoring.scoring_method = ScoringMethod::LlmEnhanced;
                    cluster.llm_evaluation = Some(evaluation);
                    stats.llm_enhanced_clusters += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "LLM enhancement failed for {}: {e}",
                        scored[idx].cluster.cluster_id
                    );
                }
            }
        }
    }
}

/// Algorithmic score for one cluster
fn score_cluster(cluster: &HotspotCluster, target_codes: &HashSet<&str>) -> ScoredCluster {
    let diversity_score = diversity_score(cluster, target_codes);
    let recency_score = recency_score(cluster);
    let hotspot_score = hotspot_score(cluster);
    let accessibility_score = accessibility_score(cluster);

    let base_score = diversity_score * WEIGHT_DIVERSITY
        + recency_score * WEIGHT_RECENCY
        + hotspot_score * WEIGHT_HOTSPOT
        + accessibility_score * WEIGHT_ACCESSIBILITY;

    let target_species_found = cluster
        .statistics
        .species_codes
        .iter()
        .filter(|code| target_codes.contains(code.as_str()))
        .count();

    ScoredCluster {
        cluster: cluster.clone(),
        scoring: Scoring {
            diversity_score,
            recency_score,
            hotspot_score,
            accessibility_score,
            base_score,
            target_species_found,
            total_species_found: cluster.statistics.species_diversity,
            scoring_method: ScoringMethod::Algorithmic,
            habitat_score: None,
        },
        llm_evaluation: None,
        base_score,
        final_score: base_score,
    }
}

/// Species diversity with target coverage prioritized.
///
/// Without targets the total count is normalized against 50 species; with
/// targets, coverage of the target set plus a diversity bonus capped at 0.5.
fn diversity_score(cluster: &HotspotCluster, target_codes: &HashSet<&str>) -> f64 {
    let total_species = cluster.statistics.species_diversity as f64;

    if target_codes.is_empty() {
        return (total_species / 50.0).min(1.0);
    }

    let found = cluster
        .statistics
        .species_codes
        .iter()
        .filter(|code| target_codes.contains(code.as_str()))
        .count() as f64;
    let target_coverage = found / target_codes.len() as f64;
    let diversity_bonus = (total_species / 30.0).min(0.5);

    (target_coverage + diversity_bonus).min(1.0)
}

/// Bucketed recency of the newest observation; unknown dates score 0.3
fn recency_score(cluster: &HotspotCluster) -> f64 {
    let most_recent = match &cluster.statistics.most_recent_observation {
        Some(value) => value,
        None => return 0.3,
    };
    let parsed = match geo::parse_ebird_datetime(most_recent) {
        Some(dt) => dt,
        None => return 0.3,
    };

    let days_ago = (Local::now().naive_local() - parsed).num_days();
    match days_ago {
        i64::MIN..=3 => 1.0,
        4..=7 => 0.8,
        8..=14 => 0.6,
        15..=30 => 0.4,
        _ => 0.2,
    }
}

/// Hotspot standing: non-hotspots rate 0.2; hotspots start at 0.6 with
/// bonuses for all-time species counts and exact coordinate matches
fn hotspot_score(cluster: &HotspotCluster) -> f64 {
    if !cluster.accessibility.has_hotspot {
        return 0.2;
    }

    let mut score: f64 = 0.6;

    if let Some(metadata) = cluster
        .locations
        .iter()
        .find(|l| l.is_hotspot)
        .and_then(|l| l.hotspot_metadata.as_ref())
    {
        score += match metadata.num_species_all_time {
            n if n > 200 => 0.3,
            n if n > 100 => 0.2,
            n if n > 50 => 0.1,
            _ => 0.0,
        };
        if metadata.distance_to_hotspot_km == 0.0 {
            score += 0.1;
        }
    }

    score.min(1.0)
}

/// Coordinate quality, average travel time and cluster richness
fn accessibility_score(cluster: &HotspotCluster) -> f64 {
    use crate::types::CoordinateQuality;

    let mut score: f64 = match cluster.accessibility.coordinate_quality {
        CoordinateQuality::High => 0.7,
        CoordinateQuality::Medium => 0.5,
    };

    if let Some(hours) = cluster.accessibility.avg_travel_time_estimate {
        if hours <= 1.0 {
            score += 0.2;
        } else if hours <= 2.0 {
            score += 0.1;
        } else if hours > 4.0 {
            score -= 0.2;
        }
    }

    if cluster.statistics.location_count > 1 && cluster.statistics.sighting_count > 5 {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}

/// Habitat-assessment prompt for one cluster
fn habitat_prompt(cluster: &HotspotCluster, target_species: &[TargetSpecies]) -> String {
    let cluster_species: HashSet<&str> = cluster
        .statistics
        .species_codes
        .iter()
        .map(String::as_str)
        .collect();

    let species_lines: Vec<String> = target_species
        .iter()
        .filter(|s| cluster_species.contains(s.species_code.as_str()))
        .take(PROMPT_SPECIES_LIMIT)
        .flat_map(|s| {
            let mut lines = vec![format!(
                "- {} ({})",
                sanitize_text(&s.common_name, InputKind::SpeciesName),
                s.scientific_name
            )];
            if !s.seasonal_notes.is_empty() {
                lines.push(format!("  Seasonal: {}", s.seasonal_notes));
            }
            if !s.behavioral_notes.is_empty() {
                lines.push(format!("  Behavior: {}", s.behavioral_notes));
            }
            lines
        })
        .collect();
    let species_section = if species_lines.is_empty() {
        "No target species recently observed at this location.".to_string()
    } else {
        species_lines.join("\n")
    };

    format!(
        "You are an expert birder evaluating locations for observing specific bird species.\n\
         \n\
         LOCATION: {name}\n\
         COORDINATES: {lat:.4}, {lng:.4}\n\
         RECENT SIGHTINGS: {sightings} observations\n\
         SPECIES DIVERSITY: {diversity} species total\n\
         \n\
         TARGET SPECIES FOUND AT THIS LOCATION:\n\
         {species_section}\n\
         \n\
         LOCATION CHARACTERISTICS:\n\
         - Official Hotspot: {hotspot}\n\
         - Number of sub-locations: {location_count}\n\
         - Most recent observation: {most_recent}\n\
         \n\
         Evaluate this location for birding success considering habitat\n\
         suitability, seasonal timing, time-of-day effectiveness, and access\n\
         logistics.\n\
         \n\
         Provide a habitat suitability score from 0.0 to 1.0 and brief reasoning.\n\
         Respond in this format:\n\
         SCORE: 0.8\n\
         REASONING: [2-3 sentences explaining the score]\n\
         BEST_TIME: [optimal timing advice]\n\
         TIPS: [specific observation tips for this location]",
        name = sanitize_text(&cluster.cluster_name, InputKind::Location),
        lat = cluster.center_lat,
        lng = cluster.center_lng,
        sightings = cluster.statistics.sighting_count,
        diversity = cluster.statistics.species_diversity,
        hotspot = if cluster.accessibility.has_hotspot { "Yes" } else { "No" },
        location_count = cluster.statistics.location_count,
        most_recent = cluster
            .statistics
            .most_recent_observation
            .as_deref()
            .unwrap_or("Unknown"),
    )
}

/// Lenient parse of the labeled-line response format. An unparseable or
/// out-of-range SCORE defaults to 0.5.
pub(crate) fn parse_llm_evaluation(response: &str) -> LlmEvaluation {
    let mut evaluation = LlmEvaluation {
        habitat_score: 0.5,
        reasoning: "LLM evaluation parsing failed".to_string(),
        best_time: "Timing varies by species".to_string(),
        tips: "Refer to field guides for specific advice".to_string(),
    };

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("SCORE:") {
            if let Ok(score) = rest.trim().parse::<f64>() {
                evaluation.habitat_score = score.clamp(0.0, 1.0);
            }
        } else if let Some(rest) = line.strip_prefix("REASONING:") {
            evaluation.reasoning = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("BEST_TIME:") {
            evaluation.best_time = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("TIPS:") {
            evaluation.tips = rest.trim().to_string();
        }
    }

    evaluation
}
