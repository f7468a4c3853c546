//! birdtrip - birding road-trip planner
//!
//! Turns a list of target bird species, a starting coordinate and travel
//! constraints into a ranked, route-optimized itinerary grounded in recent
//! eBird observations. The core is a seven-stage pipeline: species
//! validation, parallel sightings fetch, constraint enrichment, hotspot
//! clustering, location scoring, route optimization and itinerary rendering.

pub mod config;
pub mod ebird;
pub mod error;
pub mod geo;
pub mod http_client;
pub mod llm;
pub mod pipeline;
pub mod types;

// Re-export main types
pub use config::{Constraints, Settings, StartLocation};
pub use error::{Error, Result};
pub use pipeline::{PipelineInput, PipelineResult, PipelineRunner};

// Re-export capability traits for stubbing in downstream tests
pub use ebird::client::ObservationApi;
pub use llm::client::LlmClient;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
