//! Catalog cache behaviour against a scripted source

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use course_cost_bot::catalog::{Catalog, CatalogSnapshot, CatalogSource, Category};
use course_cost_bot::errors::UpstreamError;

/// Serves a fresh one-category snapshot per call until told to fail
struct ScriptedSource {
    calls: Arc<AtomicU32>,
    fail_after: u32,
}

impl CatalogSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<CatalogSnapshot, UpstreamError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err(UpstreamError::Status {
                    status: 503,
                    body: "down".to_string(),
                });
            }
            Ok(CatalogSnapshot::new(
                vec![Category {
                    id: n.to_string(),
                    name: format!("Категория {n}"),
                }],
                vec![],
                vec![],
            ))
        })
    }
}

fn scripted_catalog(fail_after: u32, ttl: Duration) -> (Catalog, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource {
        calls: Arc::clone(&calls),
        fail_after,
    };
    (Catalog::new(Box::new(source), ttl), calls)
}

#[tokio::test]
async fn test_fresh_snapshot_is_not_refetched() {
    let (catalog, calls) = scripted_catalog(10, Duration::from_secs(3600));
    catalog.snapshot().await.unwrap();
    catalog.snapshot().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_snapshot_is_reloaded() {
    let (catalog, calls) = scripted_catalog(10, Duration::ZERO);
    let first = catalog.snapshot().await.unwrap();
    let second = catalog.snapshot().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(first.categories[0].id, second.categories[0].id);
}

#[tokio::test]
async fn test_failed_reload_serves_previous_snapshot() {
    let (catalog, _) = scripted_catalog(1, Duration::ZERO);
    let first = catalog.snapshot().await.unwrap();
    let second = catalog.snapshot().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_never_loaded_catalog_reports_error() {
    let (catalog, _) = scripted_catalog(0, Duration::from_secs(60));
    let result = catalog.snapshot().await;
    assert!(matches!(result, Err(UpstreamError::Status { status: 503, .. })));
    assert!(!catalog.is_loaded().await);
}

#[tokio::test]
async fn test_forced_reload_ignores_ttl() {
    let (catalog, calls) = scripted_catalog(10, Duration::from_secs(3600));
    catalog.snapshot().await.unwrap();
    let reloaded = catalog.reload().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(reloaded.categories[0].id, "1");

    // Explicit reload failures are reported, not masked
    let (failing, _) = scripted_catalog(1, Duration::from_secs(3600));
    failing.snapshot().await.unwrap();
    assert!(failing.reload().await.is_err());
}

#[tokio::test]
async fn test_failed_reload_backs_off_before_refetching() {
    let ttl = Duration::from_millis(50);
    let (catalog, calls) = scripted_catalog(1, ttl);
    let first = catalog.snapshot().await.unwrap();

    tokio::time::sleep(ttl + Duration::from_millis(10)).await;
    for _ in 0..5 {
        let snapshot = catalog.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &snapshot));
    }
    // One failed refetch, then the stale snapshot is served without asking again
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(ttl + Duration::from_millis(10)).await;
    catalog.snapshot().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreachable_catalog_is_not_refetched_per_read() {
    let (catalog, calls) = scripted_catalog(0, Duration::from_secs(60));
    assert!(catalog.snapshot().await.is_err());
    let second = catalog.snapshot().await;
    assert!(matches!(second, Err(UpstreamError::CircuitOpen(name)) if name == "scripted"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A forced reload still goes to the source
    assert!(catalog.reload().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
