//! Core types for the geocoding subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Service name reported when no provider produced the result.
pub const NO_SERVICE: &str = "None";

/// A pin code cell as it arrives from a table or a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPinCode {
    Text(String),
    Number(f64),
    Missing,
}

impl From<&str> for RawPinCode {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RawPinCode {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u32> for RawPinCode {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<f64> for RawPinCode {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl<T: Into<RawPinCode>> From<Option<T>> for RawPinCode {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Missing)
    }
}

/// One address to geocode, exactly as supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeRequest {
    pub raw_address: String,
    pub raw_pin_code: RawPinCode,
    pub state: Option<String>,
}

impl GeocodeRequest {
    pub fn new(address: impl Into<String>, pin_code: impl Into<RawPinCode>) -> Self {
        Self {
            raw_address: address.into(),
            raw_pin_code: pin_code.into(),
            state: None,
        }
    }

    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }
}

/// A provider's name and pacing requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub name: String,
    /// Zero for providers without a published rate limit.
    pub rate_limit_delay: Duration,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, rate_limit_delay: Duration) -> Self {
        Self {
            name: name.into(),
            rate_limit_delay,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        !self.rate_limit_delay.is_zero()
    }
}

/// A match returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub matched_address: String,
}

/// Why a request produced no coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "Missing Input")]
    MissingInput,
    #[serde(rename = "Too short or invalid")]
    TooShortOrInvalid,
    #[serde(rename = "Not Found")]
    NotFound,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput => write!(f, "Missing Input"),
            Self::TooShortOrInvalid => write!(f, "Too short or invalid"),
            Self::NotFound => write!(f, "Not Found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failed(FailureReason),
    Error(String),
}

impl Outcome {
    /// Value written to the `Geocoding_Status` column.
    pub fn status_label(&self) -> String {
        match self {
            Self::Success => "SUCCESS".to_string(),
            Self::Failed(_) => "FAILED".to_string(),
            Self::Error(msg) => format!("ERROR: {}", msg),
        }
    }
}

/// The final answer for one request. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub matched_address: Option<String>,
    pub outcome: Outcome,
    pub provider_name: String,
}

impl GeocodeResult {
    pub fn success(location: Location, provider_name: &str) -> Self {
        Self {
            latitude: Some(location.latitude),
            longitude: Some(location.longitude),
            matched_address: Some(location.matched_address),
            outcome: Outcome::Success,
            provider_name: provider_name.to_string(),
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self::empty(Outcome::Failed(reason))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::empty(Outcome::Error(message.into()))
    }

    fn empty(outcome: Outcome) -> Self {
        Self {
            latitude: None,
            longitude: None,
            matched_address: None,
            outcome,
            provider_name: NO_SERVICE.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self.outcome {
            Outcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Errors raised by a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("service error: {0}")]
    Service(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Transient errors are retried against the same candidate.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Service(_))
    }
}
