use crate::batch::BatchReport;
use crate::geocode::AddressResolver;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct AppState {
    /// One resolver for every request, so all uploads share the providers'
    /// rate-limit budget.
    pub resolver: Arc<Mutex<AddressResolver>>,
    pub providers: Vec<String>,
    pub results: Mutex<ResultCache>,
}

impl AppState {
    pub fn new(resolver: AddressResolver) -> Self {
        Self {
            providers: resolver.provider_names(),
            resolver: Arc::new(Mutex::new(resolver)),
            results: Mutex::new(ResultCache::default()),
        }
    }

    pub fn results(&self) -> MutexGuard<'_, ResultCache> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct CachedUpload {
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub report: Arc<BatchReport>,
}

/// Result of the most recent upload, keyed by upload name. Storing a new
/// upload invalidates whatever was there before.
#[derive(Default)]
pub struct ResultCache {
    current: Option<CachedUpload>,
}

impl ResultCache {
    /// Store a report, returning the name of the upload it replaced.
    pub fn store(&mut self, name: &str, report: BatchReport) -> Option<String> {
        let previous = self.current.take().map(|c| c.name);
        self.current = Some(CachedUpload {
            name: name.to_string(),
            uploaded_at: Utc::now(),
            report: Arc::new(report),
        });
        previous
    }

    pub fn get(&self, name: &str) -> Option<CachedUpload> {
        self.current.as_ref().filter(|c| c.name == name).cloned()
    }

    /// Drop the cached report if it belongs to `name`.
    pub fn invalidate(&mut self, name: &str) -> bool {
        if self.current.as_ref().is_some_and(|c| c.name == name) {
            self.current = None;
            true
        } else {
            false
        }
    }
}
