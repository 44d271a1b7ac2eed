//! Address resolver: orchestrates the provider failover chain.
//!
//! Flow:  normalize → candidates → for each provider, for each candidate,
//!        up to N attempts → postal-code fallback → Not Found

use super::candidates::{build_candidates, DEFAULT_COUNTRY};
use super::normalize::{normalize, NormalizedRequest};
use super::providers::Geocoder;
use super::types::{FailureReason, GeocodeRequest, GeocodeResult, Location};
use rand::Rng;
use std::time::Duration;

/// Postal-code fallback only runs for pin codes at least this long.
const MIN_POSTAL_FALLBACK_CHARS: usize = 5;

/// Retry and pacing constants. All of them are tunable.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per (provider, candidate) pair, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_increment: Duration,
    /// Upper bound of the random delay added to each rate-limit pause.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            backoff_increment: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th (1-based) transient failure.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_add(self.backoff_increment.saturating_mul(attempt))
    }

    fn jitter_sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..=self.jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Where the resolver sleeps. Swapped out in tests.
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration);
}

pub struct ThreadSleep;

impl Pause for ThreadSleep {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// The address resolver with its injected providers, in priority order.
pub struct AddressResolver {
    providers: Vec<Box<dyn Geocoder>>,
    policy: RetryPolicy,
    pause: Box<dyn Pause>,
    country: String,
    postal_code_fallback: bool,
}

impl AddressResolver {
    pub fn new(providers: Vec<Box<dyn Geocoder>>, policy: RetryPolicy) -> Self {
        Self {
            providers,
            policy,
            pause: Box::new(ThreadSleep),
            country: DEFAULT_COUNTRY.to_string(),
            postal_code_fallback: true,
        }
    }

    pub fn with_pause(mut self, pause: Box<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_postal_code_fallback(mut self, enabled: bool) -> Self {
        self.postal_code_fallback = enabled;
        self
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.spec().name.clone()).collect()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolve one request. Never fails: every problem is folded into the
    /// returned result's outcome.
    pub fn resolve(&self, request: &GeocodeRequest) -> GeocodeResult {
        let normalized = match normalize(request) {
            Ok(n) => n,
            Err(reason) => {
                log::debug!("Rejected '{}': {}", request.raw_address, reason);
                return GeocodeResult::failed(reason);
            }
        };

        if self.providers.is_empty() {
            return GeocodeResult::error("no geocoding providers configured");
        }

        let candidates = build_candidates(&normalized, &self.country);

        for provider in &self.providers {
            for candidate in &candidates {
                if let Some(location) = self.try_candidate(provider.as_ref(), candidate) {
                    log::debug!("'{}' matched by {}", candidate, provider.spec().name);
                    return GeocodeResult::success(location, &provider.spec().name);
                }
            }
        }

        if let Some(result) = self.postal_code_fallback(&normalized) {
            return result;
        }

        GeocodeResult::failed(FailureReason::NotFound)
    }

    /// Up to `max_attempts` calls for one (provider, candidate) pair.
    fn try_candidate(&self, provider: &dyn Geocoder, candidate: &str) -> Option<Location> {
        let name = &provider.spec().name;
        for attempt in 1..=self.policy.max_attempts {
            self.pace(provider);
            log::debug!("{} attempt {} for '{}'", name, attempt, candidate);
            match provider.geocode(candidate) {
                Ok(Some(location)) => return Some(location),
                Ok(None) => return None,
                Err(e) if e.is_transient() => {
                    log::warn!("{} transient failure for '{}': {}", name, candidate, e);
                    if attempt < self.policy.max_attempts {
                        self.pause.pause(self.policy.backoff(attempt));
                    }
                }
                Err(e) => {
                    log::warn!("{} failed for '{}': {}", name, candidate, e);
                    return None;
                }
            }
        }
        None
    }

    fn postal_code_fallback(&self, request: &NormalizedRequest) -> Option<GeocodeResult> {
        let pin = request.pin_code.as_str();
        if !self.postal_code_fallback || pin.chars().count() < MIN_POSTAL_FALLBACK_CHARS {
            return None;
        }

        for provider in self.providers.iter().filter(|p| p.supports_postal_code()) {
            self.pace(provider.as_ref());
            match provider.geocode_postal_code(pin) {
                Ok(Some(location)) => {
                    let location = Location {
                        matched_address: format!(
                            "Near {} (Pin Code: {})",
                            location.matched_address, pin
                        ),
                        ..location
                    };
                    return Some(GeocodeResult::success(location, &provider.spec().name));
                }
                Ok(None) => {}
                Err(e) => log::warn!("{} postal lookup failed for {}: {}", provider.spec().name, pin, e),
            }
        }
        None
    }

    fn pace(&self, provider: &dyn Geocoder) {
        let spec = provider.spec();
        if spec.is_rate_limited() {
            self.pause
                .pause(spec.rate_limit_delay.saturating_add(self.policy.jitter_sample()));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::geocode::types::Outcome;
    use approx::assert_relative_eq;

    const PRIMARY: &str = "Nominatim";
    const SECONDARY: &str = "GoogleMaps";

    fn resolver(
        primary: StubProvider,
        secondary: StubProvider,
    ) -> (AddressResolver, RecordingPause) {
        let pause = RecordingPause::default();
        let resolver = AddressResolver::new(vec![Box::new(primary), Box::new(secondary)], quiet_policy())
            .with_pause(Box::new(pause.clone()));
        (resolver, pause)
    }

    fn stubs(log: &CallLog, primary: Reply, secondary: Reply) -> (StubProvider, StubProvider) {
        (
            StubProvider::new(PRIMARY, Duration::from_secs(1), primary, log),
            StubProvider::new(SECONDARY, Duration::ZERO, secondary, log),
        )
    }

    #[test]
    fn test_missing_input_makes_no_calls() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Found(1.0, 2.0), Reply::Found(1.0, 2.0));
        let (resolver, _) = resolver(p, s);

        let result = resolver.resolve(&GeocodeRequest::new("", ""));
        assert_eq!(result.outcome, Outcome::Failed(FailureReason::MissingInput));
        assert_eq!(result.provider_name, "None");
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_short_address_makes_no_calls() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Found(1.0, 2.0), Reply::Found(1.0, 2.0));
        let (resolver, _) = resolver(p, s);

        let result = resolver.resolve(&GeocodeRequest::new("ab", 110001u32));
        assert_eq!(result.outcome, Outcome::Failed(FailureReason::TooShortOrInvalid));
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_pin_without_address_makes_no_calls() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Found(1.0, 2.0), Reply::Found(1.0, 2.0));
        let p = p.postal(Reply::Found(1.0, 2.0));
        let (resolver, pauses) = resolver(p, s);

        let result = resolver.resolve(&GeocodeRequest::new("", 110001u32));
        assert_eq!(result.outcome, Outcome::Failed(FailureReason::TooShortOrInvalid));
        assert!(calls(&log).is_empty());
        assert!(pauses.pauses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_secondary_succeeds_after_primary_exhausted() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Empty);
        let s = s.reply("MG Road Pharmacy, 560001, India", Reply::Found(12.9756, 77.6066));
        let (resolver, _) = resolver(p, s);

        let request = GeocodeRequest::new("MG Road Pharmacy", 560001u32)
            .with_state(Some("Karnataka".into()));
        let result = resolver.resolve(&request);

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.provider_name, SECONDARY);
        assert_relative_eq!(result.latitude.unwrap(), 12.9756);
        assert_relative_eq!(result.longitude.unwrap(), 77.6066);

        let recorded = calls(&log);
        let primary: Vec<_> = recorded.iter().filter(|(n, _)| n == PRIMARY).collect();
        assert_eq!(primary.len(), 5);
        // Every primary call precedes every secondary call.
        let first_secondary = recorded.iter().position(|(n, _)| n == SECONDARY).unwrap();
        assert!(recorded[..first_secondary].iter().all(|(n, _)| n == PRIMARY));
        assert_eq!(
            recorded[first_secondary..]
                .iter()
                .map(|(_, q)| q.as_str())
                .collect::<Vec<_>>(),
            vec![
                "MG Road Pharmacy, 560001, Karnataka, India",
                "MG Road Pharmacy, Karnataka, India",
                "MG Road Pharmacy, 560001, India",
            ]
        );
    }

    #[test]
    fn test_first_success_stops_search() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Found(28.6, 77.2), Reply::Found(0.0, 0.0));
        let (resolver, _) = resolver(p, s);

        let result = resolver.resolve(&GeocodeRequest::new("Connaught Place", "110001"));
        assert_eq!(result.provider_name, PRIMARY);
        assert_eq!(
            calls(&log),
            vec![(PRIMARY.to_string(), "Connaught Place, 110001, India".to_string())]
        );
    }

    #[test]
    fn test_transient_failure_retries_then_advances() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Empty);
        let p = p
            .reply("Connaught Place, 110001, India", Reply::Transient)
            .reply("Connaught Place, India", Reply::Found(28.63, 77.22));
        let (resolver, pause) = resolver(p, s);

        let result = resolver.resolve(&GeocodeRequest::new("Connaught Place", "110001"));
        assert_eq!(result.outcome, Outcome::Success);

        let queries: Vec<String> = calls(&log).into_iter().map(|(_, q)| q).collect();
        assert_eq!(
            queries,
            vec![
                "Connaught Place, 110001, India",
                "Connaught Place, 110001, India",
                "Connaught Place, India",
            ]
        );
        // pace, backoff(1), pace, pace
        assert_eq!(
            *pause.pauses.lock().unwrap(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn test_hard_failure_does_not_retry() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Empty);
        let p = p
            .reply("Connaught Place, 110001, India", Reply::Hard)
            .reply("Connaught Place, India", Reply::Found(28.63, 77.22));
        let (resolver, _) = resolver(p, s);

        resolver.resolve(&GeocodeRequest::new("Connaught Place", "110001"));
        let queries: Vec<String> = calls(&log).into_iter().map(|(_, q)| q).collect();
        assert_eq!(
            queries,
            vec!["Connaught Place, 110001, India", "Connaught Place, India"]
        );
    }

    #[test]
    fn test_not_found_after_exhaustion() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Transient, Reply::Hard);
        let (resolver, _) = resolver(p, s);

        let request = GeocodeRequest::new("Nowhere Lane", "").with_state(Some("Goa".into()));
        let result = resolver.resolve(&request);
        assert_eq!(result.outcome, Outcome::Failed(FailureReason::NotFound));
        assert_eq!(result.provider_name, "None");
        // two candidates: 2 attempts each on primary, 1 each on secondary
        assert_eq!(calls(&log).len(), 6);
    }

    #[test]
    fn test_secondary_is_not_paced() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Found(1.0, 1.0));
        let (resolver, pause) = resolver(p, s);

        resolver.resolve(&GeocodeRequest::new("Station Road Kiosk", ""));
        // one primary call, paced; the secondary call is not
        assert_eq!(*pause.pauses.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Empty);
        let pause = RecordingPause::default();
        let policy = RetryPolicy {
            jitter: Duration::from_millis(300),
            ..quiet_policy()
        };
        let resolver = AddressResolver::new(vec![Box::new(p), Box::new(s)], policy)
            .with_pause(Box::new(pause.clone()));

        resolver.resolve(&GeocodeRequest::new("Station Road Kiosk", "400001"));
        for d in pause.pauses.lock().unwrap().iter() {
            assert!(*d >= Duration::from_secs(1));
            assert!(*d <= Duration::from_millis(1300));
        }
    }

    #[test]
    fn test_postal_code_fallback() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Empty);
        let p = p.postal(Reply::Found(28.64, 77.21));
        let (resolver, _) = resolver(p, s);

        let result = resolver.resolve(&GeocodeRequest::new("Unknown Chemist Shop", "110001"));
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.provider_name, PRIMARY);
        let addr = result.matched_address.unwrap();
        assert!(addr.starts_with("Near "));
        assert!(addr.ends_with("(Pin Code: 110001)"));
        assert_eq!(calls(&log).last().unwrap().1, "postal:110001");
    }

    #[test]
    fn test_postal_code_fallback_disabled() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Empty, Reply::Empty);
        let p = p.postal(Reply::Found(28.64, 77.21));
        let (resolver, _) = resolver(p, s);
        let resolver = resolver.with_postal_code_fallback(false);

        let result = resolver.resolve(&GeocodeRequest::new("Unknown Chemist Shop", "110001"));
        assert_eq!(result.outcome, Outcome::Failed(FailureReason::NotFound));
        assert!(calls(&log).iter().all(|(_, q)| !q.starts_with("postal:")));
    }

    #[test]
    fn test_idempotent_against_fixed_stub() {
        let log = new_log();
        let (p, s) = stubs(&log, Reply::Found(19.07, 72.87), Reply::Empty);
        let (resolver, _) = resolver(p, s);

        let request = GeocodeRequest::new("Dadar West Market", "400028");
        assert_eq!(resolver.resolve(&request), resolver.resolve(&request));
    }

    #[test]
    fn test_no_providers_is_error() {
        let resolver = AddressResolver::new(vec![], quiet_policy());
        let result = resolver.resolve(&GeocodeRequest::new("Dadar West Market", "400028"));
        assert!(matches!(result.outcome, Outcome::Error(_)));
        assert_eq!(result.outcome.status_label(), "ERROR: no geocoding providers configured");
    }

    #[test]
    fn test_backoff_is_linear() {
        let p = quiet_policy();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_saturates() {
        let p = RetryPolicy {
            backoff_base: Duration::MAX,
            backoff_increment: Duration::MAX,
            ..quiet_policy()
        };
        assert_eq!(p.backoff(3), Duration::MAX);
    }
}
