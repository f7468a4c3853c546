//! Stage 1: species validation
//!
//! Resolves free-text species names to canonical eBird codes. Strategy:
//! direct taxonomy lookup first (fast, reliable, cheap), LLM fuzzy matching
//! only when that fails, and an LLM-only fallback mode when the taxonomy
//! itself cannot be fetched. Successful resolutions are cached for the life
//! of the process.

use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;

use crate::ebird::client::ObservationApi;
use crate::ebird::types::TaxonomyEntry;
use crate::llm::client::LlmClient;
use crate::llm::sanitize::{sanitize_text, InputKind};
use crate::types::{TargetSpecies, ValidationMethod};

/// Maximum taxonomy entries listed in the fuzzy-match prompt
const FUZZY_PROMPT_TAXONOMY_ENTRIES: usize = 50;

/// Stage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationStats {
    pub total_input: usize,
    pub direct_matches: usize,
    pub fuzzy_matches: usize,
    pub failed_validations: usize,
    pub cache_hits: usize,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct ValidationOutput {
    pub validated_species: Vec<TargetSpecies>,
    pub stats: ValidationStats,
    pub warning: Option<String>,
}

/// Taxonomy-backed species name resolution with fuzzy fallback
pub struct SpeciesValidator {
    observations: Arc<dyn ObservationApi>,
    llm: Option<Arc<dyn LlmClient>>,
    /// Process-lifetime name -> species cache; keys are lowercased and
    /// trimmed. Failures are never cached.
    cache: Cache<String, TargetSpecies>,
}

impl SpeciesValidator {
    pub fn new(observations: Arc<dyn ObservationApi>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            observations,
            llm,
            cache: Cache::new(10_000),
        }
    }

    /// Validate a list of free-text species names.
    ///
    /// Per-name failures are counted, not raised. When the taxonomy fetch
    /// itself fails the stage degrades to LLM-only stubs rather than
    /// aborting. A success rate below 50% surfaces a warning.
    pub async fn run(&self, species_list: &[String]) -> ValidationOutput {
        let mut stats = ValidationStats {
            total_input: species_list.len(),
            ..Default::default()
        };

        if species_list.is_empty() {
            tracing::info!("Empty species list provided, returning empty results");
            return ValidationOutput {
                validated_species: Vec::new(),
                stats,
                warning: None,
            };
        }

        // Only hit the taxonomy endpoint when at least one name is uncached
        let any_uncached = species_list
            .iter()
            .any(|name| self.cache.get(&cache_key(name)).is_none());

        let taxonomy = if any_uncached {
            match self.observations.taxonomy().await {
                Ok(taxonomy) => {
                    tracing::info!("Retrieved {} taxonomy entries", taxonomy.len());
                    Some(taxonomy)
                }
                Err(e) => {
                    tracing::error!("Failed to get eBird taxonomy: {e}");
                    return self.llm_only_fallback(species_list, stats).await;
                }
            }
        } else {
            None
        };

        let mut validated = Vec::new();
        for name in species_list {
            let key = cache_key(name);
            if let Some(hit) = self.cache.get(&key) {
                validated.push(hit);
                stats.cache_hits += 1;
                continue;
            }

            let taxonomy = taxonomy
                .as_deref()
                .expect("taxonomy fetched when any name is uncached");

            if let Some(species) = direct_taxonomy_lookup(name, taxonomy) {
                self.cache.insert(key, species.clone());
                validated.push(species);
                stats.direct_matches += 1;
                continue;
            }

            match self.llm_fuzzy_match(name, taxonomy).await {
                Some(species) => {
                    self.cache.insert(key, species.clone());
                    validated.push(species);
                    stats.fuzzy_matches += 1;
                }
                None => {
                    stats.failed_validations += 1;
                    tracing::warn!("Could not validate species: {name}");
                }
            }
        }

        let success_rate = validated.len() as f64 / species_list.len() as f64;
        let warning = if success_rate < 0.5 {
            tracing::warn!("Low validation success rate: {:.0}%", success_rate * 100.0);
            Some(format!(
                "Low species validation success rate: {:.0}%",
                success_rate * 100.0
            ))
        } else {
            None
        };

        tracing::info!(
            "Validated {} of {} species",
            validated.len(),
            species_list.len()
        );

        ValidationOutput {
            validated_species: validated,
            stats,
            warning,
        }
    }

    /// LLM fuzzy matching when the direct lookup misses. The response is
    /// accepted only if it names an actual taxonomy common name.
    async fn llm_fuzzy_match(
        &self,
        species_name: &str,
        taxonomy: &[TaxonomyEntry],
    ) -> Option<TargetSpecies> {
        let llm = self.llm.as_ref()?;

        let safe_name = sanitize_text(species_name, InputKind::SpeciesName);
        let listing = format_taxonomy_for_prompt(taxonomy);

        let prompt = format!(
            "You are an expert ornithologist with comprehensive knowledge of North American birds.\n\
             \n\
             I need to match this bird name: \"{safe_name}\"\n\
             \n\
             Here are some eBird taxonomy entries to help with matching:\n\
             {listing}\n\
             \n\
             Please:\n\
             1. Find the best matching eBird species for \"{safe_name}\"\n\
             2. Handle variations (e.g., \"cardinal\" -> \"Northern Cardinal\")\n\
             3. Consider common misspellings and colloquial names\n\
             4. If no good match exists, respond with \"NO_MATCH\"\n\
             \n\
             Respond with ONLY the exact eBird common name from the taxonomy, or \"NO_MATCH\"."
        );

        let response = match llm.complete(&prompt).await {
            Ok(response) => response.trim().to_string(),
            Err(e) => {
                tracing::error!("LLM fuzzy matching failed for {species_name:?}: {e}");
                return None;
            }
        };

        if response == "NO_MATCH" {
            return None;
        }

        let matched = taxonomy
            .iter()
            .find(|entry| entry.com_name.eq_ignore_ascii_case(&response));

        match matched {
            Some(entry) => Some(build_target_species(
                entry,
                species_name,
                ValidationMethod::LlmFuzzyMatch,
                0.7,
            )),
            None => {
                tracing::warn!("LLM suggested {response:?} but it is not in the taxonomy");
                None
            }
        }
    }

    /// Fallback mode when the taxonomy is unavailable: emit low-confidence
    /// stubs so the rest of the pipeline can still run.
    async fn llm_only_fallback(
        &self,
        species_list: &[String],
        mut stats: ValidationStats,
    ) -> ValidationOutput {
        tracing::warn!("Using LLM-only validation because the taxonomy is unavailable");

        let validated: Vec<TargetSpecies> = species_list
            .iter()
            .map(|name| TargetSpecies {
                original_name: name.clone(),
                common_name: name.clone(),
                scientific_name: "Unknown".to_string(),
                species_code: "unknown".to_string(),
                taxonomic_order: 0.0,
                family_common_name: String::new(),
                family_scientific_name: String::new(),
                validation_method: ValidationMethod::LlmOnlyFallback,
                confidence: 0.5,
                seasonal_notes: "API unavailable - limited validation".to_string(),
                behavioral_notes: String::new(),
            })
            .collect();
        stats.fuzzy_matches += validated.len();

        ValidationOutput {
            validated_species: validated,
            stats,
            warning: Some("Species validated without taxonomy data".to_string()),
        }
    }
}

fn cache_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Direct match against the taxonomy: exact common name, exact scientific
/// name, exact species code, then substring match on the common name for
/// queries longer than three characters.
fn direct_taxonomy_lookup(species_name: &str, taxonomy: &[TaxonomyEntry]) -> Option<TargetSpecies> {
    let normalized = species_name.trim().to_lowercase();

    for entry in taxonomy {
        if entry.com_name.to_lowercase() == normalized {
            return Some(build_target_species(
                entry,
                species_name,
                ValidationMethod::DirectCommonName,
                1.0,
            ));
        }
        if entry.sci_name.to_lowercase() == normalized {
            return Some(build_target_species(
                entry,
                species_name,
                ValidationMethod::DirectScientificName,
                1.0,
            ));
        }
        if entry.species_code.to_lowercase() == normalized {
            return Some(build_target_species(
                entry,
                species_name,
                ValidationMethod::DirectSpeciesCode,
                1.0,
            ));
        }
    }

    // Partial matching for common shorthand ("cardinal" -> "Northern
    // Cardinal"); very short strings match too much
    if normalized.chars().count() > 3 {
        for entry in taxonomy {
            if entry.com_name.to_lowercase().contains(&normalized) {
                return Some(build_target_species(
                    entry,
                    species_name,
                    ValidationMethod::PartialCommonName,
                    0.8,
                ));
            }
        }
    }

    None
}

fn build_target_species(
    entry: &TaxonomyEntry,
    original_name: &str,
    method: ValidationMethod,
    confidence: f64,
) -> TargetSpecies {
    TargetSpecies {
        original_name: original_name.to_string(),
        common_name: entry.com_name.clone(),
        scientific_name: entry.sci_name.clone(),
        species_code: entry.species_code.clone(),
        taxonomic_order: entry.taxon_order.unwrap_or(0.0),
        family_common_name: entry.family_com_name.clone().unwrap_or_default(),
        family_scientific_name: entry.family_sci_name.clone().unwrap_or_default(),
        validation_method: method,
        confidence,
        seasonal_notes: seasonal_notes(&entry.com_name),
        behavioral_notes: behavioral_notes(&entry.com_name),
    }
}

fn format_taxonomy_for_prompt(taxonomy: &[TaxonomyEntry]) -> String {
    taxonomy
        .iter()
        .filter(|entry| entry.category.as_deref() == Some("species"))
        .take(FUZZY_PROMPT_TAXONOMY_ENTRIES)
        .map(|entry| {
            format!(
                "- {} ({}) [{}]",
                entry.com_name, entry.sci_name, entry.species_code
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Basic seasonal context keyed on the common name
fn seasonal_notes(common_name: &str) -> String {
    let name = common_name.to_lowercase();
    if name.contains("warbler") {
        "Peak migration: spring (April-May) and fall (August-September)"
    } else if name.contains("duck") || name.contains("waterfowl") {
        "Best viewing: fall/winter migration and breeding season"
    } else if name.contains("hawk") || name.contains("eagle") {
        "Migration peaks: spring (March-April) and fall (September-October)"
    } else if name.contains("cardinal") || name.contains("jay") {
        "Year-round resident in most of range"
    } else {
        "Seasonal timing varies by region and migration patterns"
    }
    .to_string()
}

/// Basic behavioral context keyed on the common name
fn behavioral_notes(common_name: &str) -> String {
    let name = common_name.to_lowercase();
    if name.contains("warbler") {
        "Active feeders, check mid-canopy to upper canopy, early morning best"
    } else if name.contains("duck") {
        "Water-dependent, check wetlands, ponds, and shorelines"
    } else if name.contains("hawk") {
        "Soaring raptors, check thermals and ridgelines, late morning optimal"
    } else if name.contains("cardinal") {
        "Seed feeders, dense cover, active at feeders dawn and dusk"
    } else if name.contains("jay") {
        "Vocal and conspicuous, mixed habitats, often in family groups"
    } else {
        "Refer to species-specific field guides for optimal viewing strategies"
    }
    .to_string()
}
