//! Geocoding providers: OpenStreetMap Nominatim and Google Maps.
//!
//! Both are blocking HTTP clients. Each holds one `ureq::Agent`, built once
//! and reused for every call.

use super::types::{Location, ProviderError, ProviderSpec};
use serde::Deserialize;
use std::time::Duration;

pub const NOMINATIM_NAME: &str = "Nominatim";
pub const GOOGLE_MAPS_NAME: &str = "GoogleMaps";

/// A geocoding service queried by free-text address or postal code.
pub trait Geocoder: Send + Sync {
    fn spec(&self) -> &ProviderSpec;

    /// Forward geocode a query string. `Ok(None)` means the service answered
    /// but had no match.
    fn geocode(&self, query: &str) -> Result<Option<Location>, ProviderError>;

    /// Structured postal-code lookup. Providers without one return `Ok(None)`.
    fn geocode_postal_code(&self, _pin_code: &str) -> Result<Option<Location>, ProviderError> {
        Ok(None)
    }

    fn supports_postal_code(&self) -> bool {
        false
    }
}

fn classify(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(code, _) if code == 429 || code >= 500 => {
            ProviderError::Service(format!("HTTP {}", code))
        }
        ureq::Error::Status(code, _) => ProviderError::Rejected(format!("HTTP {}", code)),
        ureq::Error::Transport(t) => transport_error(t.kind(), t.to_string()),
    }
}

/// Malformed URLs and unsupported schemes fail the same way on every retry.
fn transport_error(kind: ureq::ErrorKind, message: String) -> ProviderError {
    match kind {
        ureq::ErrorKind::InvalidUrl
        | ureq::ErrorKind::UnknownScheme
        | ureq::ErrorKind::InvalidProxyUrl
        | ureq::ErrorKind::InsecureRequestHttpsOnly => ProviderError::Rejected(message),
        _ => ProviderError::Timeout(message),
    }
}

/// Error while reading a response body. A read timeout stays retryable.
fn body_error(err: std::io::Error) -> ProviderError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            ProviderError::Timeout(err.to_string())
        }
        _ => ProviderError::InvalidResponse(err.to_string()),
    }
}

fn build_agent(timeout: Duration, user_agent: &str) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
}

// ─── Nominatim provider ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    pub rate_limit_delay: Duration,
    pub timeout: Duration,
    /// ISO 3166-1 alpha-2, lowercase (e.g. "in").
    pub country_code: String,
    /// Country name for structured postal-code queries.
    pub country: String,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".into(),
            user_agent: "store-geocoder/0.1 (batch geocoding)".into(),
            rate_limit_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
            country_code: "in".into(),
            country: "India".into(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: String,
}

pub struct Nominatim {
    spec: ProviderSpec,
    agent: ureq::Agent,
    config: NominatimConfig,
}

impl Nominatim {
    pub fn new(config: NominatimConfig) -> Self {
        Self {
            spec: ProviderSpec::new(NOMINATIM_NAME, config.rate_limit_delay),
            agent: build_agent(config.timeout, &config.user_agent),
            config,
        }
    }

    fn search(&self, params: &[(&str, &str)]) -> Result<Option<Location>, ProviderError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let mut request = self
            .agent
            .get(&url)
            .query("format", "json")
            .query("limit", "1");
        for (key, value) in params {
            request = request.query(key, value);
        }

        let results: Vec<NominatimResult> = request
            .call()
            .map_err(classify)?
            .into_json()
            .map_err(body_error)?;

        first_nominatim_match(results)
    }
}

impl Geocoder for Nominatim {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn geocode(&self, query: &str) -> Result<Option<Location>, ProviderError> {
        self.search(&[("q", query), ("countrycodes", self.config.country_code.as_str())])
    }

    fn geocode_postal_code(&self, pin_code: &str) -> Result<Option<Location>, ProviderError> {
        self.search(&[("postalcode", pin_code), ("country", self.config.country.as_str())])
    }

    fn supports_postal_code(&self) -> bool {
        true
    }
}

pub fn first_nominatim_match(
    results: Vec<NominatimResult>,
) -> Result<Option<Location>, ProviderError> {
    let Some(top) = results.into_iter().next() else {
        return Ok(None);
    };
    let latitude = top
        .lat
        .parse()
        .map_err(|_| ProviderError::InvalidResponse(format!("bad latitude '{}'", top.lat)))?;
    let longitude = top
        .lon
        .parse()
        .map_err(|_| ProviderError::InvalidResponse(format!("bad longitude '{}'", top.lon)))?;
    Ok(Some(Location {
        latitude,
        longitude,
        matched_address: top.display_name,
    }))
}

// ─── Google Maps provider ───────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GoogleMapsConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Region bias, ccTLD form (e.g. "in").
    pub region: String,
}

impl GoogleMapsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://maps.googleapis.com".into(),
            timeout: Duration::from_secs(10),
            region: "in".into(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct GoogleResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<GoogleResult>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct GoogleResult {
    pub formatted_address: String,
    pub geometry: GoogleGeometry,
}

#[derive(Deserialize, Debug)]
pub struct GoogleGeometry {
    pub location: GoogleLatLng,
}

#[derive(Deserialize, Debug)]
pub struct GoogleLatLng {
    pub lat: f64,
    pub lng: f64,
}

pub struct GoogleMaps {
    spec: ProviderSpec,
    agent: ureq::Agent,
    config: GoogleMapsConfig,
}

impl GoogleMaps {
    pub fn new(config: GoogleMapsConfig) -> Self {
        Self {
            spec: ProviderSpec::new(GOOGLE_MAPS_NAME, Duration::ZERO),
            agent: build_agent(config.timeout, "store-geocoder/0.1"),
            config,
        }
    }
}

impl Geocoder for GoogleMaps {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn geocode(&self, query: &str) -> Result<Option<Location>, ProviderError> {
        let url = format!(
            "{}/maps/api/geocode/json",
            self.config.base_url.trim_end_matches('/')
        );
        let response: GoogleResponse = self
            .agent
            .get(&url)
            .query("address", query)
            .query("region", &self.config.region)
            .query("key", &self.config.api_key)
            .call()
            .map_err(classify)?
            .into_json()
            .map_err(body_error)?;

        interpret_google(response)
    }
}

/// Map a Google status to a match or a provider error.
pub fn interpret_google(response: GoogleResponse) -> Result<Option<Location>, ProviderError> {
    let detail = || {
        let msg = response.error_message.clone().unwrap_or_default();
        if msg.is_empty() {
            response.status.clone()
        } else {
            format!("{}: {}", response.status, msg)
        }
    };

    match response.status.as_str() {
        "OK" => Ok(response.results.first().map(|r| Location {
            latitude: r.geometry.location.lat,
            longitude: r.geometry.location.lng,
            matched_address: r.formatted_address.clone(),
        })),
        "ZERO_RESULTS" => Ok(None),
        "OVER_QUERY_LIMIT" | "UNKNOWN_ERROR" => Err(ProviderError::Service(detail())),
        _ => Err(ProviderError::Rejected(detail())),
    }
}
