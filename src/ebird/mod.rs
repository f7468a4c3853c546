//! Observation-service integration: wire types and the eBird v2 HTTP client

pub mod client;
pub mod types;

pub use client::{EbirdApiClient, ObservationApi, ObservationError, RetryConfig};
pub use types::{Hotspot, HotspotInfo, Observation, TaxonomyEntry};
