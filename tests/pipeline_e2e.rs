//! End-to-end pipeline runs against stubbed observation and language-model
//! services.

use async_trait::async_trait;
use chrono::{Duration, Local};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use birdtrip::config::{Constraints, ObservationQuality, StartLocation};
use birdtrip::ebird::client::{ObservationApi, ObservationError};
use birdtrip::ebird::types::{Hotspot, Observation, TaxonomyEntry};
use birdtrip::llm::client::{LlmClient, LlmError};
use birdtrip::types::{FetchMethod, OptimizationMethod, ValidationMethod};
use birdtrip::{PipelineInput, PipelineRunner};

const BOSTON: StartLocation = StartLocation {
    lat: 42.3601,
    lng: -71.0589,
};

fn days_ago(days: i64) -> String {
    (Local::now().naive_local() - Duration::days(days))
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn taxonomy() -> Vec<TaxonomyEntry> {
    vec![
        TaxonomyEntry {
            sci_name: "Cardinalis cardinalis".to_string(),
            com_name: "Northern Cardinal".to_string(),
            species_code: "norcar".to_string(),
            category: Some("species".to_string()),
            taxon_order: Some(31.0),
            family_com_name: Some("Cardinals and Allies".to_string()),
            family_sci_name: Some("Cardinalidae".to_string()),
        },
        TaxonomyEntry {
            sci_name: "Cyanocitta cristata".to_string(),
            com_name: "Blue Jay".to_string(),
            species_code: "blujay".to_string(),
            category: Some("species".to_string()),
            taxon_order: Some(18.0),
            family_com_name: Some("Crows, Jays, and Magpies".to_string()),
            family_sci_name: Some("Corvidae".to_string()),
        },
    ]
}

fn observation(species: &str, loc_id: &str, lat: f64, lng: f64, obs_dt: &str) -> Observation {
    Observation {
        species_code: species.to_string(),
        com_name: match species {
            "norcar" => "Northern Cardinal".to_string(),
            "blujay" => "Blue Jay".to_string(),
            other => other.to_string(),
        },
        sci_name: format!("{species} sci"),
        loc_id: loc_id.to_string(),
        loc_name: format!("{loc_id} site"),
        lat: Some(lat),
        lng: Some(lng),
        obs_dt: obs_dt.to_string(),
        how_many: Some(1),
        obs_valid: true,
        obs_reviewed: false,
        location_private: false,
    }
}

/// In-memory observation service for end-to-end runs
#[derive(Default)]
struct FakeEbird {
    taxonomy: Vec<TaxonomyEntry>,
    taxonomy_fails_with_auth: bool,
    sightings: HashMap<String, Vec<Observation>>,
    hotspots: Vec<Hotspot>,
    fetch_methods_seen: std::sync::Mutex<Vec<&'static str>>,
    fetch_calls: AtomicUsize,
}

impl FakeEbird {
    fn new() -> Self {
        Self {
            taxonomy: taxonomy(),
            ..Default::default()
        }
    }

    fn with_sightings(mut self, code: &str, sightings: Vec<Observation>) -> Self {
        self.sightings.insert(code.to_string(), sightings);
        self
    }
}

#[async_trait]
impl ObservationApi for FakeEbird {
    async fn nearby_observations(
        &self,
        _lat: f64,
        _lng: f64,
        _distance_km: u32,
        _days_back: u32,
        species_code: Option<&str>,
    ) -> Result<Vec<Observation>, ObservationError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_methods_seen
            .lock()
            .unwrap()
            .push("nearby_observations");
        Ok(species_code
            .and_then(|code| self.sightings.get(code))
            .cloned()
            .unwrap_or_default())
    }

    async fn species_observations(
        &self,
        species_code: &str,
        _region_code: &str,
        _days_back: u32,
    ) -> Result<Vec<Observation>, ObservationError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_methods_seen
            .lock()
            .unwrap()
            .push("species_observations");
        Ok(self.sightings.get(species_code).cloned().unwrap_or_default())
    }

    async fn hotspots(&self, _region_code: &str) -> Result<Vec<Hotspot>, ObservationError> {
        Ok(self.hotspots.clone())
    }

    async fn nearby_hotspots(
        &self,
        _lat: f64,
        _lng: f64,
        _distance_km: u32,
    ) -> Result<Vec<Hotspot>, ObservationError> {
        Ok(self.hotspots.clone())
    }

    async fn taxonomy(&self) -> Result<Vec<TaxonomyEntry>, ObservationError> {
        if self.taxonomy_fails_with_auth {
            return Err(ObservationError::Auth("/ref/taxonomy/ebird".to_string()));
        }
        Ok(self.taxonomy.clone())
    }
}

/// Canned-response language model
struct FakeLlm {
    response: String,
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok(self.response.clone())
    }
}

fn itinerary_stub_response() -> String {
    let mut body = String::from(
        "## Executive Summary\nA productive day chasing the target species.\n\n\
         ## Location Guide\nEach location below includes arrival time advice.\n\n\
         ## Travel Schedule\nLegs are ordered to minimize driving time.\n",
    );
    while body.chars().count() < 600 {
        body.push_str("Watch each location at first light; species activity peaks early.\n");
    }
    body
}

// Scenario 1: single species, single region, no start location
#[tokio::test]
async fn test_single_species_region_only() {
    let api = FakeEbird::new().with_sightings(
        "norcar",
        vec![
            observation("norcar", "L1", 42.3554, -71.0655, &days_ago(1)),
            observation("norcar", "L2", 42.3736, -71.1097, &days_ago(2)),
        ],
    );
    let api = Arc::new(api);
    let runner = PipelineRunner::new(api.clone(), None);
    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                region_code: Some("US-MA".to_string()),
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    let species = &result.validated_species[0];
    assert_eq!(species.validation_method, ValidationMethod::DirectCommonName);
    assert!((species.confidence - 1.0).abs() < f64::EPSILON);

    // Without a start location the fetch uses the region endpoint
    assert!(api
        .fetch_methods_seen
        .lock()
        .unwrap()
        .iter()
        .all(|m| *m == "species_observations"));
    assert_eq!(
        result.stats.fetch.fetch_method_stats["species_observations"],
        1
    );

    // All sightings pass radius and region checks
    let summary = result.stats.filtering.compliance_summary.as_ref().unwrap();
    assert_eq!(summary.within_travel_radius_pct, 100.0);
    assert_eq!(summary.fully_compliant_count, 2);

    assert!(matches!(
        result.route.optimization_method,
        OptimizationMethod::TwoOpt | OptimizationMethod::SingleLocation | OptimizationMethod::Empty
    ));
    assert!(!result.itinerary_markdown.is_empty());
}

// Scenario 2: fuzzy shorthand resolves by partial match without an LLM
#[tokio::test]
async fn test_fuzzy_species_name_partial_match() {
    let api = Arc::new(FakeEbird::new());
    let runner = PipelineRunner::new(api, None);
    let result = runner
        .run(PipelineInput {
            species_list: vec!["cardinal".to_string()],
            constraints: Constraints {
                region_code: Some("US-MA".to_string()),
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    let species = &result.validated_species[0];
    assert_eq!(species.common_name, "Northern Cardinal");
    assert_eq!(species.species_code, "norcar");
    assert_eq!(species.validation_method, ValidationMethod::PartialCommonName);
    assert!((species.confidence - 0.8).abs() < f64::EPSILON);
}

// Scenario 3: taxonomy unavailable - pipeline degrades but completes
#[tokio::test]
async fn test_taxonomy_unavailable_degrades_to_stubs() {
    let mut api = FakeEbird::new();
    api.taxonomy_fails_with_auth = true;
    let runner = PipelineRunner::new(Arc::new(api), None);

    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                region_code: Some("US-MA".to_string()),
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    let species = &result.validated_species[0];
    assert_eq!(species.species_code, "unknown");
    assert_eq!(species.validation_method, ValidationMethod::LlmOnlyFallback);
    assert!((species.confidence - 0.5).abs() < f64::EPSILON);

    // No sightings exist for the stub code, so the run ends in the
    // no-route document
    assert_eq!(result.stats.fetch.total_observations, 0);
    assert!(result.itinerary_markdown.contains("No Route Available"));
}

// Scenario 4: ten species fan out and all succeed
#[tokio::test]
async fn test_ten_species_fan_out() {
    let mut api = FakeEbird::new();
    let mut names = Vec::new();
    for i in 0..10 {
        let code = format!("sp{i:02}");
        let com_name = format!("Testbird {i:02}");
        api.taxonomy.push(TaxonomyEntry {
            sci_name: format!("Testus bird{i:02}"),
            com_name: com_name.clone(),
            species_code: code.clone(),
            category: Some("species".to_string()),
            taxon_order: Some(100.0 + i as f64),
            family_com_name: None,
            family_sci_name: None,
        });
        api.sightings.insert(
            code.clone(),
            vec![observation(
                &code,
                &format!("L{i}"),
                42.3 + i as f64 * 0.01,
                -71.05,
                &days_ago(1),
            )],
        );
        names.push(com_name);
    }
    let api = Arc::new(api);
    let runner = PipelineRunner::new(api.clone(), None);

    let result = runner
        .run(PipelineInput {
            species_list: names,
            constraints: Constraints {
                start_location: Some(BOSTON),
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    assert_eq!(result.stats.fetch.total_species, 10);
    assert_eq!(result.stats.fetch.successful_fetches, 10);
    assert_eq!(result.stats.fetch.api_errors, 0);
    assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 10);
    assert_eq!(result.stats.fetch.fetch_method_stats["nearby_observations"], 10);
}

// Scenario 5: mixed-compliance sightings with a start point and quality bar
#[tokio::test]
async fn test_constraint_filtering_scenario() {
    let recent = days_ago(2);
    let boston = observation("norcar", "L1", 42.3554, -71.0655, &recent);
    let api = FakeEbird::new().with_sightings(
        "norcar",
        vec![
            boston.clone(),
            observation("norcar", "L2", 42.3736, -71.1097, &recent),
            observation("norcar", "L3", 42.2626, -71.8023, &recent),
            observation("norcar", "L4", 42.3554, -71.0655, &days_ago(35)),
            {
                let mut s = observation("norcar", "L5", 0.0, 0.0, &recent);
                s.lat = None;
                s.lng = None;
                s
            },
            boston,
        ],
    );
    let runner = PipelineRunner::new(Arc::new(api), None);

    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                start_location: Some(BOSTON),
                max_travel_radius_km: Some(50),
                days_back: 14,
                min_observation_quality: ObservationQuality::Valid,
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    let summary = result.stats.filtering.compliance_summary.as_ref().unwrap();
    assert_eq!(summary.fully_compliant_count, 2);
    assert_eq!(result.stats.filtering.duplicates_flagged, 1);
    assert_eq!(result.stats.filtering.valid_coordinates, 5);
}

// Scenario 6: twelve clusters route via enhanced nearest neighbor
#[tokio::test]
async fn test_twelve_cluster_route() {
    let mut api = FakeEbird::new();
    let recent = days_ago(1);
    // Twelve sites within ~300 km of Boston, pairwise beyond the 15 km
    // cluster radius
    let sightings: Vec<Observation> = (0..12)
        .map(|i| {
            observation(
                "norcar",
                &format!("L{i}"),
                41.2 + i as f64 * 0.25,
                -71.0589,
                &recent,
            )
        })
        .collect();
    api.sightings.insert("norcar".to_string(), sightings);
    let runner = PipelineRunner::new(Arc::new(api), None);

    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                start_location: Some(BOSTON),
                max_daily_distance_km: 600,
                max_travel_radius_km: Some(400),
                max_locations_per_day: 12,
                min_location_score: 0.0,
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    assert_eq!(result.hotspot_clusters.len(), 12);
    assert_eq!(result.route.ordered_clusters.len(), 12);
    assert_eq!(
        result.route.optimization_method,
        OptimizationMethod::EnhancedNearestNeighbor
    );
    assert_eq!(result.route.segments.len(), 13);

    // Segment invariants: monotonic cumulative distance matching the total
    let mut previous = 0.0;
    for segment in &result.route.segments {
        assert!(segment.cumulative_distance_km >= previous - 1e-9);
        previous = segment.cumulative_distance_km;
    }
    assert!(
        (result.route.segments.last().unwrap().cumulative_distance_km
            - result.route.total_distance_km)
            .abs()
            < 1e-6
    );
}

// Re-running on identical input with a stub LLM yields identical markdown
// modulo the generation timestamp
#[tokio::test]
async fn test_itinerary_idempotent_with_stub_llm() -> anyhow::Result<()> {
    fn build_runner() -> PipelineRunner {
        let api = FakeEbird::new().with_sightings(
            "norcar",
            vec![
                observation("norcar", "L1", 42.3554, -71.0655, "2024-06-01 08:00"),
                observation("norcar", "L2", 42.3736, -71.1097, "2024-06-02 09:00"),
            ],
        );
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlm {
            response: itinerary_stub_response(),
        });
        PipelineRunner::new(Arc::new(api), Some(llm))
    }

    let input = || PipelineInput {
        species_list: vec!["Northern Cardinal".to_string()],
        constraints: Constraints {
            start_location: Some(BOSTON),
            date_range: Some(birdtrip::config::DateRange {
                start: "2024-06-01".to_string(),
                end: "2024-06-30".to_string(),
            }),
            ..Default::default()
        },
    };

    let first = build_runner().run(input()).await;
    let second = build_runner().run(input()).await;

    assert!(first.success && second.success);
    let strip_timestamp = |markdown: &str| {
        markdown
            .lines()
            .filter(|line| !line.contains("Generated on"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(
        strip_timestamp(&first.itinerary_markdown),
        strip_timestamp(&second.itinerary_markdown)
    );

    // The structured result also round-trips through JSON unchanged
    let serialized = serde_json::to_string(&first.route)?;
    let deserialized: birdtrip::types::Route = serde_json::from_str(&serialized)?;
    assert_eq!(deserialized, first.route);
    Ok(())
}

// LLM-enhanced path produces the wrapped document
#[tokio::test]
async fn test_llm_enhanced_itinerary() {
    let api = FakeEbird::new().with_sightings(
        "norcar",
        vec![observation("norcar", "L1", 42.3554, -71.0655, &days_ago(1))],
    );
    let llm: Arc<dyn LlmClient> = Arc::new(FakeLlm {
        response: itinerary_stub_response(),
    });
    let runner = PipelineRunner::new(Arc::new(api), Some(llm));

    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                start_location: Some(BOSTON),
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    let stats = result.stats.itinerary.as_ref().unwrap();
    assert_eq!(
        stats.method,
        birdtrip::pipeline::itinerary::ItineraryMethod::LlmEnhanced
    );
    assert!(result.itinerary_markdown.contains("## Trip Statistics"));
    assert!(result.itinerary_markdown.contains("## Important Notes"));
}

// Hotspot data enriches clusters end to end
#[tokio::test]
async fn test_hotspot_merge_end_to_end() {
    let mut api = FakeEbird::new().with_sightings(
        "norcar",
        vec![observation("norcar", "L1", 42.3709, -71.1453, &days_ago(1))],
    );
    api.hotspots = vec![Hotspot {
        loc_id: "L900".to_string(),
        loc_name: "Mount Auburn Cemetery".to_string(),
        lat: Some(42.3709),
        lng: Some(-71.1453),
        country_code: Some("US".to_string()),
        subnational1_code: Some("US-MA".to_string()),
        subnational2_code: None,
        latest_obs_dt: Some(days_ago(1)),
        num_species_all_time: Some(224),
    }];
    let runner = PipelineRunner::new(Arc::new(api), None);

    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                start_location: Some(BOSTON),
                region_code: Some("US-MA".to_string()),
                ..Default::default()
            },
        })
        .await;

    assert!(result.success);
    let cluster = &result.hotspot_clusters[0];
    assert!(cluster.accessibility.has_hotspot);
    assert_eq!(cluster.cluster_name, "Mount Auburn Cemetery");
    // Hotspot standing lifts the score above the non-hotspot floor
    assert!(result.scored_locations[0].scoring.hotspot_score > 0.2);
}

// Sightings provenance survives to the final result untouched
#[tokio::test]
async fn test_field_preservation_end_to_end() {
    let api = FakeEbird::new().with_sightings(
        "norcar",
        vec![observation("norcar", "L77", 42.3554, -71.0655, &days_ago(1))],
    );
    let runner = PipelineRunner::new(Arc::new(api), None);

    let result = runner
        .run(PipelineInput {
            species_list: vec!["Northern Cardinal".to_string()],
            constraints: Constraints {
                start_location: Some(BOSTON),
                ..Default::default()
            },
        })
        .await;

    let enriched = &result.hotspot_clusters[0].sightings[0];
    assert_eq!(enriched.sighting.observation.loc_id, "L77");
    assert_eq!(enriched.sighting.observation.species_code, "norcar");
    assert_eq!(enriched.sighting.fetch_method, FetchMethod::NearbyObservations);
    assert_eq!(enriched.sighting.original_species_name, "Northern Cardinal");
    assert!(enriched.has_valid_gps);
}
