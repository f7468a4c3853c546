//! Stage 6: route optimization
//!
//! Orders the selected clusters into a round trip from the start point.
//! Small problems (up to eight stops) get a nearest-neighbor tour improved
//! by 2-opt; larger ones use an enhanced nearest-neighbor that also tries
//! the top-scored clusters as first stops. Distances are great-circle only;
//! drive times assume a constant average speed.

use serde::Serialize;
use std::fmt;

use crate::config::{Constraints, AVERAGE_DRIVING_SPEED_KMH, MAX_ROUTE_LOCATIONS};
use crate::geo;
use crate::types::{
    Coordinates, OptimizationMethod, Route, RouteSegment, ScoredCluster,
};

/// 2-opt improvement pass ceiling
const TWO_OPT_MAX_PASSES: u32 = 100;

/// Problem size at which 2-opt gives way to the nearest-neighbor heuristic
const TWO_OPT_MAX_LOCATIONS: usize = 8;

/// Route distances beyond this trigger a warning
const EXCESSIVE_DISTANCE_KM: f64 = 1000.0;

/// Stage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteStats {
    pub input_locations: usize,
    pub locations_optimized: usize,
    pub optimization_method: Option<OptimizationMethod>,
    pub total_route_distance_km: f64,
    pub estimated_total_drive_time_hours: f64,
    /// Nearest-neighbor tour length before 2-opt improvement
    pub initial_distance_km: Option<f64>,
    pub improvement_pct: Option<f64>,
    pub start_points_tested: Option<usize>,
}

/// Stage output
#[derive(Debug, Clone)]
pub struct RouteOutput {
    pub route: Route,
    pub stats: RouteStats,
    pub warning: Option<String>,
}

/// A tour could not be constructed from the cluster geometry
#[derive(Debug)]
pub struct RouteError(String);

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route optimization failed: {}", self.0)
    }
}

impl std::error::Error for RouteError {}

struct Optimized {
    route: Vec<ScoredCluster>,
    total_distance_km: f64,
    method: OptimizationMethod,
    initial_distance_km: Option<f64>,
    start_points_tested: Option<usize>,
}

/// TSP-style tour construction over scored clusters
pub struct RouteOptimizer;

impl RouteOptimizer {
    /// Select and order clusters into a route from the start point.
    pub fn run(scored_locations: &[ScoredCluster], constraints: &Constraints) -> RouteOutput {
        let mut stats = RouteStats {
            input_locations: scored_locations.len(),
            ..Default::default()
        };

        if scored_locations.is_empty() {
            tracing::info!("No scored locations to optimize");
            stats.optimization_method = Some(OptimizationMethod::Empty);
            return RouteOutput {
                route: Route {
                    ordered_clusters: Vec::new(),
                    total_distance_km: 0.0,
                    optimization_method: OptimizationMethod::Empty,
                    segments: Vec::new(),
                },
                stats,
                warning: None,
            };
        }

        let start = match constraints.start_location {
            Some(start) => (start.lat, start.lng),
            None => {
                tracing::warn!("No start location; using the top scored location as start");
                (
                    scored_locations[0].cluster.center_lat,
                    scored_locations[0].cluster.center_lng,
                )
            }
        };

        let selected = select_locations(scored_locations, constraints);
        stats.locations_optimized = selected.len();

        tracing::info!(
            "Optimizing route for {} locations from ({:.4}, {:.4})",
            selected.len(),
            start.0,
            start.1
        );

        let optimized = match optimize(start, selected.clone()) {
            Ok(optimized) => optimized,
            Err(e) => {
                tracing::error!("{e}; returning clusters in score order");
                let total = route_distance(start, &selected);
                Optimized {
                    route: selected,
                    total_distance_km: total,
                    method: OptimizationMethod::FallbackScoreOrder,
                    initial_distance_km: None,
                    start_points_tested: None,
                }
            }
        };

        let segments = build_segments(start, &optimized.route);
        let drive_time: f64 = segments.iter().map(|s| s.estimated_drive_time_hours).sum();

        stats.optimization_method = Some(optimized.method);
        stats.total_route_distance_km = optimized.total_distance_km;
        stats.estimated_total_drive_time_hours = drive_time;
        stats.initial_distance_km = optimized.initial_distance_km;
        stats.improvement_pct = optimized.initial_distance_km.map(|initial| {
            if initial > 0.0 {
                (initial - optimized.total_distance_km) / initial * 100.0
            } else {
                0.0
            }
        });
        stats.start_points_tested = optimized.start_points_tested;

        let warning = if optimized.method == OptimizationMethod::FallbackScoreOrder {
            Some("Route optimization fell back to score ordering".to_string())
        } else if optimized.total_distance_km > EXCESSIVE_DISTANCE_KM {
            tracing::warn!(
                "Route distance very long: {:.1} km",
                optimized.total_distance_km
            );
            Some(format!(
                "Route distance very long: {:.1} km",
                optimized.total_distance_km
            ))
        } else {
            None
        };

        tracing::info!(
            "Route optimization completed: {} locations, {:.1} km, method: {}",
            optimized.route.len(),
            optimized.total_distance_km,
            optimized.method.as_str()
        );

        RouteOutput {
            route: Route {
                total_distance_km: optimized.total_distance_km,
                optimization_method: optimized.method,
                ordered_clusters: optimized.route,
                segments,
            },
            stats,
            warning,
        }
    }
}

/// Keep clusters above the score threshold (or all, when none qualify),
/// best first, truncated to the per-day and absolute caps.
fn select_locations(scored: &[ScoredCluster], constraints: &Constraints) -> Vec<ScoredCluster> {
    let mut candidates: Vec<ScoredCluster> = scored
        .iter()
        .filter(|c| c.final_score >= constraints.min_location_score)
        .cloned()
        .collect();

    if candidates.is_empty() {
        tracing::warn!(
            "No locations meet minimum score {}; using all locations",
            constraints.min_location_score
        );
        candidates = scored.to_vec();
    }

    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let cap = constraints.max_locations_per_day.min(MAX_ROUTE_LOCATIONS);
    if candidates.len() > cap {
        tracing::info!("Selected top {cap} locations for route optimization");
        candidates.truncate(cap);
    }
    candidates
}

fn center(cluster: &ScoredCluster) -> (f64, f64) {
    (cluster.cluster.center_lat, cluster.cluster.center_lng)
}

/// Choose and run the algorithm appropriate to the problem size
fn optimize(start: (f64, f64), clusters: Vec<ScoredCluster>) -> Result<Optimized, RouteError> {
    let finite = clusters
        .iter()
        .all(|c| c.cluster.center_lat.is_finite() && c.cluster.center_lng.is_finite())
        && start.0.is_finite()
        && start.1.is_finite();
    if !finite {
        return Err(RouteError("non-finite coordinates in route input".to_string()));
    }

    match clusters.len() {
        0 => Ok(Optimized {
            route: clusters,
            total_distance_km: 0.0,
            method: OptimizationMethod::Empty,
            initial_distance_km: None,
            start_points_tested: None,
        }),
        1 => {
            let (lat, lng) = center(&clusters[0]);
            let total = geo::haversine_distance_km(start.0, start.1, lat, lng) * 2.0;
            Ok(Optimized {
                route: clusters,
                total_distance_km: total,
                method: OptimizationMethod::SingleLocation,
                initial_distance_km: None,
                start_points_tested: None,
            })
        }
        n if n <= TWO_OPT_MAX_LOCATIONS => Ok(optimize_small(start, clusters)),
        _ => Ok(optimize_large(start, clusters)),
    }
}

/// Nearest-neighbor construction improved by 2-opt
fn optimize_small(start: (f64, f64), clusters: Vec<ScoredCluster>) -> Optimized {
    tracing::debug!("Using 2-opt optimization for {} locations", clusters.len());

    let (nn_route, nn_distance) = nearest_neighbor_route(start, clusters);
    let improved = two_opt_improvement(start, nn_route);
    let total = route_distance(start, &improved);

    Optimized {
        route: improved,
        total_distance_km: total,
        method: OptimizationMethod::TwoOpt,
        initial_distance_km: Some(nn_distance),
        start_points_tested: None,
    }
}

/// Enhanced nearest neighbor: besides the tour from the real start, try
/// tours that open with each of the three best-scored clusters, and keep
/// the shortest.
fn optimize_large(start: (f64, f64), clusters: Vec<ScoredCluster>) -> Optimized {
    tracing::debug!(
        "Using enhanced nearest neighbor for {} locations",
        clusters.len()
    );

    let (mut best_route, mut best_distance) = nearest_neighbor_route(start, clusters.clone());
    let mut tested = 1;

    let mut by_score: Vec<usize> = (0..clusters.len()).collect();
    by_score.sort_by(|&a, &b| {
        clusters[b]
            .final_score
            .partial_cmp(&clusters[a].final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for &first_idx in by_score.iter().take(3) {
        tested += 1;
        let first = clusters[first_idx].clone();
        let rest: Vec<ScoredCluster> = clusters
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != first_idx)
            .map(|(_, c)| c.clone())
            .collect();

        let first_center = center(&first);
        let leading = geo::haversine_distance_km(start.0, start.1, first_center.0, first_center.1);
        let (tail, tail_distance) = nearest_neighbor_path(first_center, rest);

        let last_center = tail.last().map(center).unwrap_or(first_center);
        let closing =
            geo::haversine_distance_km(last_center.0, last_center.1, start.0, start.1);

        let total = leading + tail_distance + closing;
        if total < best_distance {
            best_distance = total;
            best_route = std::iter::once(first).chain(tail).collect();
        }
    }

    Optimized {
        route: best_route,
        total_distance_km: best_distance,
        method: OptimizationMethod::EnhancedNearestNeighbor,
        initial_distance_km: None,
        start_points_tested: Some(tested),
    }
}

/// Greedy tour from the start point, returning to it. Total includes the
/// closing leg.
fn nearest_neighbor_route(
    start: (f64, f64),
    clusters: Vec<ScoredCluster>,
) -> (Vec<ScoredCluster>, f64) {
    let (route, mut total) = nearest_neighbor_path(start, clusters);
    if let Some(last) = route.last() {
        let (lat, lng) = center(last);
        total += geo::haversine_distance_km(lat, lng, start.0, start.1);
    }
    (route, total)
}

/// Greedy path from a point through all clusters, without the return leg
fn nearest_neighbor_path(
    from: (f64, f64),
    mut remaining: Vec<ScoredCluster>,
) -> (Vec<ScoredCluster>, f64) {
    let mut route = Vec::with_capacity(remaining.len());
    let mut current = from;
    let mut total = 0.0;

    while !remaining.is_empty() {
        let mut nearest_idx = 0;
        let mut nearest_distance = f64::INFINITY;
        for (i, candidate) in remaining.iter().enumerate() {
            let (lat, lng) = center(candidate);
            let distance = geo::haversine_distance_km(current.0, current.1, lat, lng);
            if distance < nearest_distance {
                nearest_distance = distance;
                nearest_idx = i;
            }
        }

        let next = remaining.remove(nearest_idx);
        current = center(&next);
        total += nearest_distance;
        route.push(next);
    }

    (route, total)
}

/// 2-opt local search: reverse any segment whose reversal shortens the
/// cycle, restarting the scan after each improvement, until a full pass
/// finds nothing or the pass ceiling is hit.
fn two_opt_improvement(start: (f64, f64), mut route: Vec<ScoredCluster>) -> Vec<ScoredCluster> {
    if route.len() < 3 {
        return route;
    }

    let mut best_distance = route_distance(start, &route);
    let mut passes = 0;
    let mut improved = true;

    while improved && passes < TWO_OPT_MAX_PASSES {
        improved = false;
        passes += 1;

        'scan: for i in 0..route.len() {
            for j in (i + 2)..route.len() {
                // Reversing the whole tour changes nothing
                if i == 0 && j == route.len() - 1 {
                    continue;
                }

                route[i..=j].reverse();
                let candidate_distance = route_distance(start, &route);
                if candidate_distance < best_distance {
                    best_distance = candidate_distance;
                    improved = true;
                    break 'scan;
                }
                route[i..=j].reverse();
            }
        }
    }

    tracing::debug!("2-opt completed after {passes} passes");
    route
}

/// Cycle length: start, through the route in order, back to start
fn route_distance(start: (f64, f64), route: &[ScoredCluster]) -> f64 {
    let mut total = 0.0;
    let mut current = start;
    for cluster in route {
        let (lat, lng) = center(cluster);
        total += geo::haversine_distance_km(current.0, current.1, lat, lng);
        current = (lat, lng);
    }
    if !route.is_empty() {
        total += geo::haversine_distance_km(current.0, current.1, start.0, start.1);
    }
    total
}

/// Emit one segment per leg, including the closing leg back to the start
fn build_segments(start: (f64, f64), route: &[ScoredCluster]) -> Vec<RouteSegment> {
    if route.is_empty() {
        return Vec::new();
    }

    let mut segments: Vec<RouteSegment> = Vec::with_capacity(route.len() + 1);
    let mut current = start;
    let mut current_name = "Starting Location".to_string();
    let mut cumulative = 0.0;

    for (i, cluster) in route.iter().enumerate() {
        let (lat, lng) = center(cluster);
        let distance = geo::haversine_distance_km(current.0, current.1, lat, lng);
        cumulative += distance;

        segments.push(RouteSegment {
            segment_number: i + 1,
            from_name: current_name.clone(),
            to_name: cluster.cluster.cluster_name.clone(),
            to_coordinates: Coordinates { lat, lng },
            distance_km: distance,
            estimated_drive_time_hours: distance / AVERAGE_DRIVING_SPEED_KMH,
            cumulative_distance_km: cumulative,
            location_score: cluster.final_score,
            species_diversity: cluster.cluster.statistics.species_diversity,
        });

        current = (lat, lng);
        current_name = cluster.cluster.cluster_name.clone();
    }

    let closing = geo::haversine_distance_km(current.0, current.1, start.0, start.1);
    cumulative += closing;
    segments.push(RouteSegment {
        segment_number: route.len() + 1,
        from_name: current_name,
        to_name: "Starting Location".to_string(),
        to_coordinates: Coordinates {
            lat: start.0,
            lng: start.1,
        },
        distance_km: closing,
        estimated_drive_time_hours: closing / AVERAGE_DRIVING_SPEED_KMH,
        cumulative_distance_km: cumulative,
        location_score: 0.0,
        species_diversity: 0,
    });

    segments
}
