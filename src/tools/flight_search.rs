//! Flight Search HTTP client (§4.F, §6): `POST /api/flights/search`,
//! `GET /health`, fallback ladder primary → secondary → deterministic mock,
//! airline alias normalization. HTTP client construction mirrors the
//! teacher's `AnthropicAdapter::new()` (bounded-timeout `reqwest::Client`);
//! the fallback-ladder shape is new to this crate since the teacher has no
//! analogous external-tool dispatch, but follows the same "provider +
//! priority list" idea as `ai::adapter::AdapterRegistry`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ToolError, ToolProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cabin {
    Economy,
    Premium,
    Business,
    First,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlightSearchRequest {
    pub origin: String,
    pub destination: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_date: Option<String>,
    pub adults: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cabin: Option<Cabin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightSearchStatus {
    Success,
    NoFlights,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlightResult {
    pub id: String,
    pub price: f64,
    pub currency: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub duration: String,
    pub stops: u32,
    pub airline: String,
    #[serde(default)]
    pub flight_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlightSearchResponse {
    pub status: FlightSearchStatus,
    #[serde(default)]
    pub flights: Vec<FlightResult>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Normalized result shape handed back to the LLM as a tool_result (§4.F).
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedFlight {
    pub airline: String,
    pub flight_number: Option<String>,
    pub price: f64,
    pub currency: String,
    pub duration: String,
    pub stops: u32,
    pub departure_time: String,
    pub arrival_time: String,
    pub origin: String,
    pub destination: String,
}

/// Case-insensitive, substring-tolerant airline name normalization (§4.F).
fn normalize_airline(raw: &str) -> String {
    const ALIASES: &[(&str, &str)] = &[
        ("united", "United Airlines"),
        ("delta", "Delta Air Lines"),
        ("american", "American Airlines"),
        ("southwest", "Southwest Airlines"),
        ("jetblue", "JetBlue Airways"),
        ("alaska", "Alaska Airlines"),
        ("spirit", "Spirit Airlines"),
        ("frontier", "Frontier Airlines"),
        ("lufthansa", "Lufthansa"),
        ("british airways", "British Airways"),
        ("air france", "Air France"),
        ("klm", "KLM Royal Dutch Airlines"),
        ("emirates", "Emirates"),
        ("qatar", "Qatar Airways"),
        ("ryanair", "Ryanair"),
        ("easyjet", "easyJet"),
    ];

    let lower = raw.to_ascii_lowercase();
    for (needle, canonical) in ALIASES {
        if lower.contains(needle) {
            return canonical.to_string();
        }
    }
    raw.to_string()
}

fn normalize(request: &FlightSearchRequest, flight: FlightResult) -> NormalizedFlight {
    NormalizedFlight {
        airline: normalize_airline(&flight.airline),
        flight_number: flight.flight_number,
        price: flight.price,
        currency: flight.currency,
        duration: flight.duration,
        stops: flight.stops,
        departure_time: flight.departure_time,
        arrival_time: flight.arrival_time,
        origin: request.origin.clone(),
        destination: request.destination.clone(),
    }
}

struct ProviderEndpoint {
    base_url: String,
    timeout: Duration,
}

/// Deterministic mock dataset, used only when every real provider fails and
/// `enable_mock_fallback` is set (§4.F, §2 Supplemented features).
fn mock_search(request: &FlightSearchRequest) -> Vec<NormalizedFlight> {
    vec![NormalizedFlight {
        airline: "United Airlines".to_string(),
        flight_number: Some("UA100".to_string()),
        price: 349.0,
        currency: "USD".to_string(),
        duration: "PT3H45M".to_string(),
        stops: 0,
        departure_time: format!("{}T08:00:00Z", request.date),
        arrival_time: format!("{}T11:45:00Z", request.date),
        origin: request.origin.clone(),
        destination: request.destination.clone(),
    }]
}

pub struct FlightSearchClient {
    http: reqwest::Client,
    primary: ProviderEndpoint,
    secondary: Option<ProviderEndpoint>,
    enable_mock_fallback: bool,
}

impl FlightSearchClient {
    pub fn new(
        primary_url: impl Into<String>,
        secondary_url: Option<String>,
        primary_timeout: Duration,
        secondary_timeout: Duration,
        enable_mock_fallback: bool,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            primary: ProviderEndpoint { base_url: primary_url.into(), timeout: primary_timeout },
            secondary: secondary_url.map(|url| ProviderEndpoint { base_url: url, timeout: secondary_timeout }),
            enable_mock_fallback,
        }
    }

    async fn search_one(&self, endpoint: &ProviderEndpoint, request: &FlightSearchRequest) -> Result<FlightSearchResponse, ToolError> {
        let url = format!("{}/api/flights/search", endpoint.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(endpoint.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout("search_flights".to_string())
                } else {
                    ToolError::ProviderFailed { tool: "search_flights".to_string(), message: e.to_string() }
                }
            })?;

        if !response.status().is_success() {
            return Err(ToolError::ProviderFailed {
                tool: "search_flights".to_string(),
                message: format!("status {}", response.status()),
            });
        }

        response
            .json::<FlightSearchResponse>()
            .await
            .map_err(|e| ToolError::ProviderFailed { tool: "search_flights".to_string(), message: e.to_string() })
    }

    pub async fn health(&self, endpoint_url: &str) -> bool {
        let url = format!("{endpoint_url}/health");
        match self.http.get(&url).timeout(Duration::from_secs(3)).send().await {
            Ok(resp) if resp.status().is_success() => true,
            _ => false,
        }
    }

    /// Fallback ladder: primary → secondary → mock (§4.F). Each hop
    /// increments `attempt_count` via the caller's `ToolCall`; this method
    /// only reports the final outcome and emits progress along the way.
    pub async fn search(
        &self,
        request: FlightSearchRequest,
        call_id: uuid::Uuid,
        progress: mpsc::Sender<ToolProgress>,
    ) -> Result<Value, ToolError> {
        let _ = progress
            .send(ToolProgress { call_id, message: "Searching for flights…".to_string() })
            .await;

        let mut last_err = match self.search_one(&self.primary, &request).await {
            Ok(response) => return Ok(self.to_tool_result(&request, response)),
            Err(e) => e,
        };

        if let Some(secondary) = &self.secondary {
            let _ = progress
                .send(ToolProgress { call_id, message: "Trying a backup flight provider…".to_string() })
                .await;
            match self.search_one(secondary, &request).await {
                Ok(response) => return Ok(self.to_tool_result(&request, response)),
                Err(e) => last_err = e,
            }
        }

        if self.enable_mock_fallback {
            let flights = mock_search(&request);
            return Ok(json!({"status": "success", "flights": flights}));
        }

        Err(last_err)
    }

    fn to_tool_result(&self, request: &FlightSearchRequest, response: FlightSearchResponse) -> Value {
        match response.status {
            FlightSearchStatus::Success => {
                let flights: Vec<NormalizedFlight> =
                    response.flights.into_iter().map(|f| normalize(request, f)).collect();
                json!({"status": "success", "flights": flights})
            }
            FlightSearchStatus::NoFlights => json!({"status": "no_flights", "flights": [], "message": response.message}),
            FlightSearchStatus::Error => json!({"status": "error", "message": response.message}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_airline_is_case_and_substring_tolerant() {
        assert_eq!(normalize_airline("UNITED"), "United Airlines");
        assert_eq!(normalize_airline("United Airlines Inc."), "United Airlines");
        assert_eq!(normalize_airline("Mystery Air"), "Mystery Air");
    }

    #[test]
    fn test_mock_search_produces_at_least_one_flight() {
        let request = FlightSearchRequest {
            origin: "MIA".into(),
            destination: "JFK".into(),
            date: "2026-08-01".into(),
            return_date: None,
            adults: 1,
            cabin: None,
        };
        let flights = mock_search(&request);
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].origin, "MIA");
    }
}
