//! Shared HTTP client configuration
//!
//! Pre-configured reqwest clients with appropriate timeouts for the two
//! outbound surfaces: the observation service (short, retried requests)
//! and the language model (slower completions).

use std::time::Duration;

/// Connect timeout in seconds (time to establish TCP connection)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Per-call timeout for observation-service requests in seconds
pub const API_TIMEOUT_SECS: u64 = 30;

/// Per-call timeout for language-model completions in seconds
pub const LLM_TIMEOUT_SECS: u64 = 120;

/// Create an HTTP client for observation-service requests
pub fn api_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(API_TIMEOUT_SECS))
        .build()
        .expect("Failed to build HTTP client")
}

/// Create an HTTP client for language-model requests
///
/// Completions can take a while; the timeout is correspondingly longer.
pub fn llm_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
        .build()
        .expect("Failed to build LLM HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_client_creation() {
        let client = api_client();
        drop(client);
    }

    #[test]
    fn test_llm_client_creation() {
        let client = llm_client();
        drop(client);
    }
}
