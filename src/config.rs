//! Configuration: a TOML file with every key optional, plus environment
//! overrides for secrets.

use crate::geocode::{
    AddressResolver, Geocoder, GoogleMaps, GoogleMapsConfig, Nominatim, NominatimConfig,
    RetryPolicy,
};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

const CONFIG_DIR_NAME: &str = "store-geocoder";
const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_MAPS_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub country: String,
    pub country_code: String,
    pub postal_code_fallback: bool,
    pub nominatim: NominatimSection,
    pub google: GoogleSection,
    pub retry: RetrySection,
    pub server: ServerSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            country: "India".into(),
            country_code: "in".into(),
            postal_code_fallback: true,
            nominatim: NominatimSection::default(),
            google: GoogleSection::default(),
            retry: RetrySection::default(),
            server: ServerSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NominatimSection {
    pub enabled: bool,
    pub base_url: String,
    pub user_agent: String,
    /// Seconds.
    pub rate_limit_delay: f64,
    /// Seconds.
    pub timeout: f64,
}

impl Default for NominatimSection {
    fn default() -> Self {
        let defaults = NominatimConfig::default();
        Self {
            enabled: true,
            base_url: defaults.base_url,
            user_agent: defaults.user_agent,
            rate_limit_delay: defaults.rate_limit_delay.as_secs_f64(),
            timeout: defaults.timeout.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GoogleSection {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Seconds.
    pub timeout: f64,
}

impl Default for GoogleSection {
    fn default() -> Self {
        let defaults = GoogleMapsConfig::new("");
        Self {
            api_key: None,
            base_url: defaults.base_url,
            timeout: defaults.timeout.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub backoff_increment: f64,
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            backoff_base: defaults.backoff_base.as_secs_f64(),
            backoff_increment: defaults.backoff_increment.as_secs_f64(),
            jitter: defaults.jitter.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load from `path`, else from the per-user config file, else defaults.
    /// An explicit path must exist; the per-user file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) => match fs::read_to_string(&p) {
                    Ok(text) => Self::from_toml(&text, &p)?,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        log::info!("No configuration at {} => using defaults", p.display());
                        Self::default()
                    }
                    Err(source) => return Err(ConfigError::Read { path: p, source }),
                },
                None => Self::default(),
            },
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading configuration from {}", path.display());
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<config_dir>/store-geocoder/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = env::var(ENV_GOOGLE_API_KEY) {
            if !key.trim().is_empty() {
                self.google.api_key = Some(key.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max-attempts",
                reason: "must be at least 1".into(),
            });
        }
        let durations = [
            ("nominatim.rate-limit-delay", self.nominatim.rate_limit_delay),
            ("nominatim.timeout", self.nominatim.timeout),
            ("google.timeout", self.google.timeout),
            ("retry.backoff-base", self.retry.backoff_base),
            ("retry.backoff-increment", self.retry.backoff_increment),
            ("retry.jitter", self.retry.jitter),
        ];
        for (key, secs) in durations {
            Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("expected a non-negative number of seconds, got {} ({})", secs, e),
            })?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base: Duration::from_secs_f64(self.retry.backoff_base),
            backoff_increment: Duration::from_secs_f64(self.retry.backoff_increment),
            jitter: Duration::from_secs_f64(self.retry.jitter),
        }
    }

    /// Providers in priority order: Nominatim first (if enabled), then
    /// Google Maps (if a key is configured).
    pub fn providers(&self) -> Vec<Box<dyn Geocoder>> {
        let mut providers: Vec<Box<dyn Geocoder>> = Vec::new();

        if self.nominatim.enabled {
            providers.push(Box::new(Nominatim::new(NominatimConfig {
                base_url: self.nominatim.base_url.clone(),
                user_agent: self.nominatim.user_agent.clone(),
                rate_limit_delay: Duration::from_secs_f64(self.nominatim.rate_limit_delay),
                timeout: Duration::from_secs_f64(self.nominatim.timeout),
                country_code: self.country_code.clone(),
                country: self.country.clone(),
            })));
        }

        match self.google.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => providers.push(Box::new(GoogleMaps::new(GoogleMapsConfig {
                api_key: key.to_string(),
                base_url: self.google.base_url.clone(),
                timeout: Duration::from_secs_f64(self.google.timeout),
                region: self.country_code.clone(),
            }))),
            None => log::warn!("No Google Maps API key found; secondary provider disabled"),
        }

        providers
    }

    pub fn build_resolver(&self) -> AddressResolver {
        let resolver = AddressResolver::new(self.providers(), self.retry_policy())
            .with_country(self.country.clone())
            .with_postal_code_fallback(self.postal_code_fallback);
        log::info!("Geocoding providers: {}", resolver.provider_names().join(" → "));
        resolver
    }
}
