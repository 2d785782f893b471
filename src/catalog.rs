//! # Catalog Module
//!
//! Course catalog shared by every dialogue: treatment categories, the
//! nosologies under them, and the courses with their price coefficients.
//!
//! The catalog is fetched wholesale from a [`CatalogSource`] and kept as an
//! immutable [`CatalogSnapshot`]. [`Catalog`] refreshes it on read once it is
//! older than the configured TTL and swaps the whole snapshot at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::UpstreamError;

/// Treatment category (first level of the catalog)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Medical sub-classification under a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nosology {
    pub id: String,
    pub name: String,
    pub category_id: String,
}

/// A treatment course with its pricing coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub coefficient: f64,
    pub category_id: String,
    /// Nosologies this course is recommended for; empty for courses that
    /// apply to the whole category
    pub nosology_ids: Vec<String>,
    /// When set, `coefficient` is the final price and BSA is ignored
    pub fixed_price: bool,
}

/// One complete, immutable view of the catalog
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub categories: Vec<Category>,
    pub nosologies: Vec<Nosology>,
    pub courses: Vec<Course>,
    pub loaded_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Build a snapshot, sorting every list by display name
    pub fn new(
        mut categories: Vec<Category>,
        mut nosologies: Vec<Nosology>,
        mut courses: Vec<Course>,
    ) -> Self {
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        nosologies.sort_by(|a, b| a.name.cmp(&b.name));
        courses.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            categories,
            nosologies,
            courses,
            loaded_at: Utc::now(),
        }
    }

    pub fn find_category(&self, category_id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == category_id)
    }

    pub fn find_nosology(&self, category_id: &str, nosology_id: &str) -> Option<&Nosology> {
        self.nosologies
            .iter()
            .find(|n| n.id == nosology_id && n.category_id == category_id)
    }

    pub fn find_course(&self, course_id: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == course_id)
    }

    /// Nosologies of a category, sorted by name
    pub fn nosologies_for_category(&self, category_id: &str) -> Vec<&Nosology> {
        self.nosologies
            .iter()
            .filter(|n| n.category_id == category_id)
            .collect()
    }

    /// Courses recommended for a category and, optionally, a nosology
    pub fn find_courses(&self, category_id: &str, nosology_id: Option<&str>) -> Vec<&Course> {
        self.courses
            .iter()
            .filter(|c| c.category_id == category_id)
            .filter(|c| match nosology_id {
                Some(id) => c.nosology_ids.is_empty() || c.nosology_ids.iter().any(|n| n == id),
                None => true,
            })
            .collect()
    }

    /// Categories without nosologies go straight to course selection
    pub fn is_accompanying_therapy(&self, category_id: &str) -> bool {
        !self.nosologies.iter().any(|n| n.category_id == category_id)
    }
}

/// Anything the catalog can be loaded from
pub trait CatalogSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Fetch the full catalog
    fn fetch(&self) -> BoxFuture<'_, Result<CatalogSnapshot, UpstreamError>>;
}

/// Upper bound on how long a failed reload suppresses the next attempt
const MAX_RELOAD_BACKOFF: Duration = Duration::from_secs(60);

struct Loaded {
    snapshot: Arc<CatalogSnapshot>,
    at: Instant,
}

#[derive(Default)]
struct CacheState {
    loaded: Option<Loaded>,
    /// Time of the last failed reload; cleared by a successful one
    failed_at: Option<Instant>,
}

/// Process-wide catalog cache with reload-on-read
pub struct Catalog {
    source: Box<dyn CatalogSource>,
    ttl: Duration,
    current: RwLock<CacheState>,
    reload_lock: Mutex<()>,
}

impl Catalog {
    pub fn new(source: Box<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(CacheState::default()),
            reload_lock: Mutex::new(()),
        }
    }

    /// Current snapshot, reloading first when it is missing or stale.
    ///
    /// A failed reload keeps serving the previous snapshot; only a catalog
    /// that was never loaded surfaces the error. After a failure no reload
    /// is attempted for the backoff period (the TTL, at most a minute).
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>, UpstreamError> {
        if let Some(cached) = self.cached().await {
            return cached;
        }

        let _guard = self.reload_lock.lock().await;
        // Another task may have reloaded (or failed to) while we waited
        if let Some(cached) = self.cached().await {
            return cached;
        }

        match self.fetch_and_swap().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match self.stale_snapshot().await {
                Some(snapshot) => {
                    warn!(
                        source = self.source.name(),
                        error = %e,
                        "Catalog reload failed, serving stale snapshot"
                    );
                    Ok(snapshot)
                }
                None => Err(e),
            },
        }
    }

    /// Force a reload regardless of age or backoff
    pub async fn reload(&self) -> Result<Arc<CatalogSnapshot>, UpstreamError> {
        let _guard = self.reload_lock.lock().await;
        self.fetch_and_swap().await
    }

    /// Whether a snapshot has been loaded at least once
    pub async fn is_loaded(&self) -> bool {
        self.current.read().await.loaded.is_some()
    }

    fn backoff(&self) -> Duration {
        self.ttl.min(MAX_RELOAD_BACKOFF)
    }

    /// Answer without touching the source: a fresh snapshot, or the result
    /// to give while a recent failure is backing off
    async fn cached(&self) -> Option<Result<Arc<CatalogSnapshot>, UpstreamError>> {
        let current = self.current.read().await;
        if let Some(loaded) = current.loaded.as_ref().filter(|l| l.at.elapsed() < self.ttl) {
            return Some(Ok(Arc::clone(&loaded.snapshot)));
        }

        let failed_at = current.failed_at?;
        if failed_at.elapsed() >= self.backoff() {
            return None;
        }
        Some(match current.loaded.as_ref() {
            Some(loaded) => Ok(Arc::clone(&loaded.snapshot)),
            None => Err(UpstreamError::CircuitOpen(self.source.name().to_string())),
        })
    }

    async fn stale_snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        let current = self.current.read().await;
        current.loaded.as_ref().map(|l| Arc::clone(&l.snapshot))
    }

    async fn fetch_and_swap(&self) -> Result<Arc<CatalogSnapshot>, UpstreamError> {
        debug!(source = self.source.name(), "Loading catalog");
        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                self.current.write().await.failed_at = Some(Instant::now());
                return Err(e);
            }
        };
        info!(
            source = self.source.name(),
            categories = snapshot.categories.len(),
            nosologies = snapshot.nosologies.len(),
            courses = snapshot.courses.len(),
            "Catalog loaded"
        );
        *self.current.write().await = CacheState {
            loaded: Some(Loaded {
                snapshot: Arc::clone(&snapshot),
                at: Instant::now(),
            }),
            failed_at: None,
        };
        Ok(snapshot)
    }
}

/// A catalog source serving a fixed snapshot, handy for tests and demos
pub struct StaticCatalogSource {
    snapshot: CatalogSnapshot,
}

impl StaticCatalogSource {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

impl CatalogSource for StaticCatalogSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<CatalogSnapshot, UpstreamError>> {
        Box::pin(async move { Ok(self.snapshot.clone()) })
    }
}
