//! Address resolution for store geocoding.
//!
//! Normalizes an address and pin code, expands them into query candidates,
//! and walks the providers in priority order with bounded retries.

pub mod candidates;
pub mod normalize;
pub mod providers;
pub mod resolver;
pub mod types;

pub use providers::{Geocoder, GoogleMaps, GoogleMapsConfig, Nominatim, NominatimConfig};
pub use resolver::{AddressResolver, Pause, RetryPolicy, ThreadSleep};
pub use types::{
    FailureReason, GeocodeRequest, GeocodeResult, Location, Outcome, ProviderError, ProviderSpec,
    RawPinCode,
};
