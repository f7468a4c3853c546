//! Stage 3: constraint filtering
//!
//! Enrichment in place: every sighting is annotated with compliance flags
//! (geographic, temporal, quality, duplicate, feasibility) and nothing is
//! discarded. Downstream stages decide what to do with non-compliant
//! records; this stage only derives facts. The stage never fails - empty
//! input produces empty output with zeroed stats.

use serde::Serialize;
use std::collections::HashSet;

use crate::config::{Constraints, ObservationQuality, MAX_DAILY_TRAVEL_HOURS};
use crate::geo;
use crate::types::{EnrichedSighting, Sighting};

/// Per-constraint tallies
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilteringStats {
    pub total_input_sightings: usize,
    pub valid_coordinates: usize,
    pub within_travel_radius: usize,
    pub within_date_range: usize,
    pub within_region: usize,
    pub quality_compliant: usize,
    pub duplicates_flagged: usize,
    pub travel_feasible: usize,
    pub compliance_summary: Option<ComplianceSummary>,
}

/// Percentage view over the tallies
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComplianceSummary {
    pub valid_coordinates_pct: f64,
    pub within_travel_radius_pct: f64,
    pub within_date_range_pct: f64,
    pub quality_compliant_pct: f64,
    pub duplicate_rate_pct: f64,
    pub travel_feasible_pct: f64,
    pub fully_compliant_count: usize,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct FilterOutput {
    pub enriched_sightings: Vec<EnrichedSighting>,
    pub stats: FilteringStats,
    pub warning: Option<String>,
}

/// Constraint filter over fetched sightings
pub struct ConstraintFilter;

impl ConstraintFilter {
    /// Derive compliance flags for every sighting.
    ///
    /// Duplicate detection is order-sensitive: the first occurrence of a
    /// (location, species, date) triple is kept, later ones are flagged.
    /// Identical input in identical order flags identical records.
    pub fn run(sightings: &[Sighting], constraints: &Constraints) -> FilterOutput {
        let mut stats = FilteringStats {
            total_input_sightings: sightings.len(),
            ..Default::default()
        };

        if sightings.is_empty() {
            tracing::info!("No sightings to filter");
            return FilterOutput::default();
        }

        tracing::info!("Applying constraints to {} sightings", sightings.len());

        let travel_radius_km = constraints.travel_radius_km() as f64;
        let date_start = constraints.date_range.as_ref().map(|r| r.start.as_str());
        let date_end = constraints.date_range.as_ref().map(|r| r.end.as_str());

        let mut seen_observations = HashSet::new();
        let mut enriched_sightings = Vec::with_capacity(sightings.len());

        for sighting in sightings {
            let observation = &sighting.observation;

            // Geographic flags
            let has_valid_gps = geo::validate_coordinates(observation.lat, observation.lng);
            let (distance_from_start_km, within_travel_radius, estimated_travel_time_hours, within_region);

            if has_valid_gps {
                stats.valid_coordinates += 1;
                let lat = observation.lat.expect("validated");
                let lng = observation.lng.expect("validated");

                match constraints.start_location {
                    Some(start) => {
                        let distance =
                            geo::haversine_distance_km(start.lat, start.lng, lat, lng);
                        distance_from_start_km = Some(distance);
                        within_travel_radius = distance <= travel_radius_km;
                        estimated_travel_time_hours = Some(geo::travel_time_hours(distance));
                    }
                    None => {
                        // No start location means no distance constraint
                        distance_from_start_km = None;
                        within_travel_radius = true;
                        estimated_travel_time_hours = None;
                    }
                }

                within_region = match &constraints.region_code {
                    Some(region) => geo::is_within_region(lat, lng, region),
                    None => true,
                };
            } else {
                distance_from_start_km = None;
                within_travel_radius = false;
                estimated_travel_time_hours = None;
                within_region = false;
            }

            if within_travel_radius {
                stats.within_travel_radius += 1;
            }
            if within_region {
                stats.within_region += 1;
            }

            // Temporal flag
            let within_date_range = geo::is_within_date_range(
                &observation.obs_dt,
                date_start,
                date_end,
                constraints.days_back,
            );
            if within_date_range {
                stats.within_date_range += 1;
            }

            // Quality flag. obs_valid defaults to true for records the
            // service omits it on, so "any" and "valid" coincide there.
            let quality_compliant = match constraints.min_observation_quality {
                ObservationQuality::Any => true,
                ObservationQuality::Valid => observation.obs_valid,
                ObservationQuality::Reviewed => observation.obs_reviewed,
            };
            if quality_compliant {
                stats.quality_compliant += 1;
            }

            // Duplicate flag, keyed on (location, species, date)
            let duplicate_key = (
                observation.loc_id.clone(),
                observation.species_code.clone(),
                observation.obs_dt.clone(),
            );
            let is_duplicate = !seen_observations.insert(duplicate_key);
            if is_duplicate {
                stats.duplicates_flagged += 1;
            }

            // Feasibility flag
            let daily_distance_compliant = match estimated_travel_time_hours {
                Some(hours) => hours <= MAX_DAILY_TRAVEL_HOURS,
                None => true,
            };
            if daily_distance_compliant {
                stats.travel_feasible += 1;
            }

            let meets_all_constraints = has_valid_gps
                && within_travel_radius
                && within_date_range
                && within_region
                && quality_compliant
                && !is_duplicate
                && daily_distance_compliant;

            enriched_sightings.push(EnrichedSighting {
                sighting: sighting.clone(),
                has_valid_gps,
                within_travel_radius,
                within_date_range,
                within_region,
                quality_compliant,
                is_duplicate,
                daily_distance_compliant,
                meets_all_constraints,
                distance_from_start_km,
                estimated_travel_time_hours,
            });
        }

        let total = enriched_sightings.len();
        let pct = |count: usize| (count as f64 / total as f64) * 100.0;
        let fully_compliant_count = enriched_sightings
            .iter()
            .filter(|s| s.meets_all_constraints)
            .count();
        stats.compliance_summary = Some(ComplianceSummary {
            valid_coordinates_pct: pct(stats.valid_coordinates),
            within_travel_radius_pct: pct(stats.within_travel_radius),
            within_date_range_pct: pct(stats.within_date_range),
            quality_compliant_pct: pct(stats.quality_compliant),
            duplicate_rate_pct: pct(stats.duplicates_flagged),
            travel_feasible_pct: pct(stats.travel_feasible),
            fully_compliant_count,
        });

        let warning = if fully_compliant_count == 0 {
            tracing::warn!("No sightings meet all constraints - filters may need relaxing");
            Some("No sightings meet all constraints".to_string())
        } else if (fully_compliant_count as f64 / total as f64) < 0.1 {
            let rate = fully_compliant_count as f64 / total as f64 * 100.0;
            tracing::warn!("Low constraint compliance rate: {rate:.0}%");
            Some(format!("Low constraint compliance rate: {rate:.0}%"))
        } else {
            None
        };

        tracing::info!(
            "Constraint filtering completed: {total} sightings enriched, {fully_compliant_count} fully compliant"
        );

        FilterOutput {
            enriched_sightings,
            stats,
            warning,
        }
    }
}
