//! Stage 4: hotspot clustering
//!
//! Groups sightings into planning stops in five phases: deduplicate
//! locations by coordinate key, discover official hotspots (regional and
//! nearby), merge the two location sources, greedily cluster by distance,
//! and assemble clusters carrying their complete sighting records.
//!
//! The greedy clustering is input-order-sensitive, so the dedup phase
//! preserves first-seen order; identical input yields identical clusters.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::config::{Constraints, CLUSTER_RADIUS_KM, HOTSPOT_MATCH_RADIUS_KM};
use crate::ebird::client::ObservationApi;
use crate::ebird::types::Hotspot;
use crate::geo;
use crate::types::{
    Accessibility, ClusterStatistics, CoordinateQuality, EnrichedSighting, HotspotCluster,
    HotspotMetadata, Location,
};

/// Stage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusteringStats {
    pub total_input_sightings: usize,
    pub unique_locations_found: usize,
    pub hotspots_discovered: usize,
    pub clusters_created: usize,
    pub sightings_in_clusters: usize,
    pub isolated_locations: usize,
    pub duplicate_locations_merged: usize,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct ClusterOutput {
    pub hotspot_clusters: Vec<HotspotCluster>,
    pub stats: ClusteringStats,
    pub warning: Option<String>,
}

/// Location dedup, hotspot merge and greedy distance clustering
pub struct HotspotClusterer {
    observations: Arc<dyn ObservationApi>,
    cluster_radius_km: f64,
}

impl HotspotClusterer {
    pub fn new(observations: Arc<dyn ObservationApi>) -> Self {
        Self {
            observations,
            cluster_radius_km: CLUSTER_RADIUS_KM,
        }
    }

    /// Override the clustering radius
    pub fn with_cluster_radius_km(mut self, radius_km: f64) -> Self {
        self.cluster_radius_km = radius_km;
        self
    }

    /// Cluster enriched sightings into planning stops, sorted by descending
    /// total sighting count.
    pub async fn run(
        &self,
        enriched_sightings: &[EnrichedSighting],
        constraints: &Constraints,
    ) -> ClusterOutput {
        let mut stats = ClusteringStats {
            total_input_sightings: enriched_sightings.len(),
            ..Default::default()
        };

        if enriched_sightings.is_empty() {
            tracing::info!("No sightings to cluster");
            return ClusterOutput::default();
        }

        tracing::info!(
            "Clustering {} sightings into hotspots",
            enriched_sightings.len()
        );

        let unique_locations = extract_unique_locations(enriched_sightings, &mut stats);
        let hotspots = self.discover_hotspots(constraints, &mut stats).await;
        let merged = merge_locations_with_hotspots(unique_locations, &hotspots);
        let location_clusters = apply_distance_clustering(merged, self.cluster_radius_km, &mut stats);
        let hotspot_clusters =
            build_hotspot_clusters(location_clusters, enriched_sightings, &mut stats);

        let warning = if hotspot_clusters.is_empty() {
            tracing::warn!("No hotspot clusters created");
            Some("No hotspot clusters created".to_string())
        } else {
            let efficiency =
                stats.sightings_in_clusters as f64 / stats.total_input_sightings as f64;
            if efficiency < 0.5 {
                tracing::warn!("Low clustering efficiency: {:.0}%", efficiency * 100.0);
                Some(format!(
                    "Low clustering efficiency: {:.0}%",
                    efficiency * 100.0
                ))
            } else {
                None
            }
        };

        tracing::info!(
            "Clustering completed: {} clusters from {} unique locations",
            stats.clusters_created,
            stats.unique_locations_found
        );

        ClusterOutput {
            hotspot_clusters,
            stats,
            warning,
        }
    }

    /// Phase B: dual hotspot discovery, deduplicated by location id.
    /// Failures are logged and leave the sighting locations standing alone.
    async fn discover_hotspots(
        &self,
        constraints: &Constraints,
        stats: &mut ClusteringStats,
    ) -> Vec<Hotspot> {
        let mut hotspots: Vec<Hotspot> = Vec::new();

        if let Some(region) = &constraints.region_code {
            match self.observations.hotspots(region).await {
                Ok(regional) => {
                    tracing::debug!("Found {} regional hotspots for {region}", regional.len());
                    hotspots.extend(regional);
                }
                Err(e) => {
                    tracing::warn!("Failed to get regional hotspots for {region}: {e}");
                }
            }
        }

        if let Some(start) = constraints.start_location {
            let distance_km = constraints.nearby_search_radius_km();
            match self
                .observations
                .nearby_hotspots(start.lat, start.lng, distance_km)
                .await
            {
                Ok(nearby) => {
                    let existing: HashSet<String> =
                        hotspots.iter().map(|h| h.loc_id.clone()).collect();
                    let fresh: Vec<Hotspot> = nearby
                        .into_iter()
                        .filter(|h| !existing.contains(&h.loc_id))
                        .collect();
                    tracing::debug!("Found {} additional nearby hotspots", fresh.len());
                    hotspots.extend(fresh);
                }
                Err(e) => {
                    tracing::warn!("Failed to get nearby hotspots: {e}");
                }
            }
        }

        stats.hotspots_discovered = hotspots.len();
        tracing::info!("Discovered {} hotspots", hotspots.len());
        hotspots
    }
}

/// Phase A: group sightings by coordinate key, first-seen order preserved.
///
/// The observation service hands out multiple location ids for the same GPS
/// point; the first id seen becomes primary, later distinct ids and names
/// accumulate as alternates.
fn extract_unique_locations(
    sightings: &[EnrichedSighting],
    stats: &mut ClusteringStats,
) -> Vec<Location> {
    let mut locations: Vec<Location> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for enriched in sightings {
        let observation = &enriched.sighting.observation;
        let (lat, lng) = match (observation.lat, observation.lng) {
            (Some(lat), Some(lng)) if geo::validate_coordinates(Some(lat), Some(lng)) => {
                (lat, lng)
            }
            _ => continue,
        };

        let key = geo::coord_key(lat, lng);
        let idx = match index_by_key.get(&key).copied() {
            Some(idx) => {
                let location = &mut locations[idx];
                if !observation.loc_id.is_empty()
                    && observation.loc_id != location.primary_loc_id
                {
                    location.alternate_loc_ids.insert(observation.loc_id.clone());
                }
                if !observation.loc_name.is_empty()
                    && observation.loc_name != location.primary_loc_name
                {
                    location
                        .alternate_loc_names
                        .insert(observation.loc_name.clone());
                }
                idx
            }
            None => {
                locations.push(Location {
                    coord_key: key.clone(),
                    lat,
                    lng,
                    primary_loc_id: observation.loc_id.clone(),
                    primary_loc_name: observation.loc_name.clone(),
                    alternate_loc_ids: BTreeSet::new(),
                    alternate_loc_names: BTreeSet::new(),
                    sighting_count: 0,
                    species_codes: BTreeSet::new(),
                    observation_dates: BTreeSet::new(),
                    is_hotspot: false,
                    hotspot_metadata: None,
                });
                index_by_key.insert(key, locations.len() - 1);
                locations.len() - 1
            }
        };

        let location = &mut locations[idx];
        location.sighting_count += 1;
        location
            .species_codes
            .insert(observation.species_code.clone());
        location.observation_dates.insert(observation.obs_dt.clone());
    }

    stats.unique_locations_found = locations.len();
    stats.duplicate_locations_merged = locations
        .iter()
        .filter(|loc| !loc.alternate_loc_ids.is_empty())
        .count();

    tracing::debug!("Extracted {} unique locations", locations.len());
    locations
}

fn hotspot_metadata(hotspot: &Hotspot, distance_km: f64) -> HotspotMetadata {
    HotspotMetadata {
        loc_id: hotspot.loc_id.clone(),
        name: hotspot.loc_name.clone(),
        country_code: hotspot.country_code.clone(),
        subnational1_code: hotspot.subnational1_code.clone(),
        subnational2_code: hotspot.subnational2_code.clone(),
        latest_obs_date: hotspot.latest_obs_dt.clone(),
        num_species_all_time: hotspot.num_species_all_time.unwrap_or(0),
        distance_to_hotspot_km: distance_km,
    }
}

/// Phase C: match sighting locations to hotspots (identical key, else the
/// closest within 0.5 km) and append hotspot-only locations for hotspots
/// with no matching sighting coordinates.
fn merge_locations_with_hotspots(
    mut locations: Vec<Location>,
    hotspots: &[Hotspot],
) -> Vec<Location> {
    let mut hotspot_by_key: HashMap<String, &Hotspot> = HashMap::new();
    for hotspot in hotspots {
        if let (Some(lat), Some(lng)) = (hotspot.lat, hotspot.lng) {
            if geo::validate_coordinates(Some(lat), Some(lng)) {
                hotspot_by_key.insert(geo::coord_key(lat, lng), hotspot);
            }
        }
    }

    let sighting_keys: HashSet<String> =
        locations.iter().map(|loc| loc.coord_key.clone()).collect();
    let mut matches = 0;

    for location in &mut locations {
        if let Some(&hotspot) = hotspot_by_key.get(&location.coord_key) {
            location.is_hotspot = true;
            location.hotspot_metadata = Some(hotspot_metadata(hotspot, 0.0));
            matches += 1;
        } else if let Some((hotspot, distance)) =
            find_nearby_hotspot(location, hotspots, HOTSPOT_MATCH_RADIUS_KM)
        {
            location.is_hotspot = true;
            location.hotspot_metadata = Some(hotspot_metadata(hotspot, distance));
            matches += 1;
        }
    }

    // Hotspots without recent sightings are still candidate stops
    let mut appended_keys: HashSet<String> = HashSet::new();
    for hotspot in hotspots {
        let (lat, lng) = match (hotspot.lat, hotspot.lng) {
            (Some(lat), Some(lng)) if geo::validate_coordinates(Some(lat), Some(lng)) => {
                (lat, lng)
            }
            _ => continue,
        };
        let key = geo::coord_key(lat, lng);
        if sighting_keys.contains(&key) || !appended_keys.insert(key.clone()) {
            continue;
        }
        locations.push(Location {
            coord_key: key,
            lat,
            lng,
            primary_loc_id: hotspot.loc_id.clone(),
            primary_loc_name: hotspot.loc_name.clone(),
            alternate_loc_ids: BTreeSet::new(),
            alternate_loc_names: BTreeSet::new(),
            sighting_count: 0,
            species_codes: BTreeSet::new(),
            observation_dates: BTreeSet::new(),
            is_hotspot: true,
            hotspot_metadata: Some(hotspot_metadata(hotspot, 0.0)),
        });
    }

    tracing::debug!("Merged {matches} sighting locations with hotspots");
    locations
}

/// Closest hotspot within `max_distance_km` of the location, if any
fn find_nearby_hotspot<'a>(
    location: &Location,
    hotspots: &'a [Hotspot],
    max_distance_km: f64,
) -> Option<(&'a Hotspot, f64)> {
    let mut closest: Option<(&Hotspot, f64)> = None;
    for hotspot in hotspots {
        let (lat, lng) = match (hotspot.lat, hotspot.lng) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => continue,
        };
        let distance = geo::haversine_distance_km(location.lat, location.lng, lat, lng);
        if distance <= max_distance_km && closest.map_or(true, |(_, best)| distance < best) {
            closest = Some((hotspot, distance));
        }
    }
    closest
}

/// Phase D: greedy distance clustering.
///
/// Seed a cluster with the first unassigned location, then repeatedly sweep
/// the remainder pulling in anything within the radius of any current
/// member, until a pass adds nothing. Result order follows total sighting
/// count, descending; the sort is stable so ties keep formation order.
fn apply_distance_clustering(
    locations: Vec<Location>,
    radius_km: f64,
    stats: &mut ClusteringStats,
) -> Vec<Vec<Location>> {
    if locations.is_empty() {
        return Vec::new();
    }

    let mut clusters: Vec<Vec<Location>> = Vec::new();
    let mut unassigned = locations;

    while !unassigned.is_empty() {
        let seed = unassigned.remove(0);
        let mut current = vec![seed];

        loop {
            let mut changed = false;
            let mut remaining = Vec::with_capacity(unassigned.len());

            for candidate in unassigned {
                let joins = current.iter().any(|member| {
                    geo::haversine_distance_km(candidate.lat, candidate.lng, member.lat, member.lng)
                        <= radius_km
                });
                if joins {
                    current.push(candidate);
                    changed = true;
                } else {
                    remaining.push(candidate);
                }
            }

            unassigned = remaining;
            if !changed {
                break;
            }
        }

        clusters.push(current);
    }

    clusters.sort_by(|a, b| {
        let count = |c: &[Location]| c.iter().map(|l| l.sighting_count).sum::<usize>();
        count(b).cmp(&count(a))
    });

    stats.clusters_created = clusters.len();
    stats.isolated_locations = clusters.iter().filter(|c| c.len() == 1).count();

    tracing::debug!(
        "Created {} location clusters using {radius_km} km radius",
        clusters.len()
    );
    clusters
}

/// Phase E: assemble clusters with their complete sighting records,
/// centroid, name, statistics and accessibility.
fn build_hotspot_clusters(
    location_clusters: Vec<Vec<Location>>,
    sightings: &[EnrichedSighting],
    stats: &mut ClusteringStats,
) -> Vec<HotspotCluster> {
    let mut hotspot_clusters = Vec::new();

    for (i, locations) in location_clusters.into_iter().enumerate() {
        if locations.is_empty() {
            continue;
        }

        let member_keys: HashSet<&str> =
            locations.iter().map(|loc| loc.coord_key.as_str()).collect();

        let cluster_sightings: Vec<EnrichedSighting> = sightings
            .iter()
            .filter(|s| {
                let observation = &s.sighting.observation;
                match (observation.lat, observation.lng) {
                    (Some(lat), Some(lng))
                        if geo::validate_coordinates(Some(lat), Some(lng)) =>
                    {
                        member_keys.contains(geo::coord_key(lat, lng).as_str())
                    }
                    _ => false,
                }
            })
            .cloned()
            .collect();

        let center_lat =
            locations.iter().map(|l| l.lat).sum::<f64>() / locations.len() as f64;
        let center_lng =
            locations.iter().map(|l| l.lng).sum::<f64>() / locations.len() as f64;

        let cluster_name = pick_cluster_name(&locations);
        let hotspot_count = locations.iter().filter(|l| l.is_hotspot).count();

        let species_codes: BTreeSet<String> = cluster_sightings
            .iter()
            .map(|s| s.sighting.observation.species_code.clone())
            .collect();

        let most_recent_observation = cluster_sightings
            .iter()
            .map(|s| s.sighting.observation.obs_dt.as_str())
            .max()
            .map(str::to_string);

        let cluster_radius_km = if locations.len() <= 1 {
            0.0
        } else {
            locations
                .iter()
                .map(|l| geo::haversine_distance_km(center_lat, center_lng, l.lat, l.lng))
                .fold(0.0, f64::max)
        };

        let travel_times: Vec<f64> = cluster_sightings
            .iter()
            .filter_map(|s| s.estimated_travel_time_hours)
            .collect();
        let avg_travel_time_estimate = if travel_times.is_empty() {
            None
        } else {
            Some(travel_times.iter().sum::<f64>() / travel_times.len() as f64)
        };

        let coordinate_quality = if locations.iter().all(|l| l.sighting_count > 0) {
            CoordinateQuality::High
        } else {
            CoordinateQuality::Medium
        };

        stats.sightings_in_clusters += cluster_sightings.len();

        hotspot_clusters.push(HotspotCluster {
            cluster_id: format!("cluster_{}", i + 1),
            cluster_name,
            center_lat,
            center_lng,
            statistics: ClusterStatistics {
                location_count: locations.len(),
                sighting_count: cluster_sightings.len(),
                species_diversity: species_codes.len(),
                hotspot_count,
                cluster_radius_km,
                most_recent_observation,
                species_codes: species_codes.into_iter().collect(),
            },
            accessibility: Accessibility {
                has_hotspot: hotspot_count > 0,
                avg_travel_time_estimate,
                coordinate_quality,
            },
            locations,
            sightings: cluster_sightings,
        });
    }

    tracing::info!(
        "Built {} hotspot clusters containing {} sightings",
        hotspot_clusters.len(),
        stats.sightings_in_clusters
    );
    hotspot_clusters
}

/// The cluster takes the most diverse hotspot's name, falling back to the
/// busiest location's name when no member is a hotspot. Ties break on
/// species diversity, then lexicographic primary name.
fn pick_cluster_name(locations: &[Location]) -> String {
    let hotspot_locations: Vec<&Location> =
        locations.iter().filter(|l| l.is_hotspot).collect();

    if !hotspot_locations.is_empty() {
        let mut best = hotspot_locations[0];
        for &candidate in &hotspot_locations[1..] {
            let better = candidate.species_diversity() > best.species_diversity()
                || (candidate.species_diversity() == best.species_diversity()
                    && candidate.primary_loc_name < best.primary_loc_name);
            if better {
                best = candidate;
            }
        }
        return best
            .hotspot_metadata
            .as_ref()
            .map(|m| m.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| best.primary_loc_name.clone());
    }

    let mut best = &locations[0];
    for candidate in &locations[1..] {
        if candidate.sighting_count > best.sighting_count {
            best = candidate;
        }
    }
    best.primary_loc_name.clone()
}
