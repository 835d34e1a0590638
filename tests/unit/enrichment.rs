//! Batched sub-resource enrichment and the per-entity fan-out

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_exporter::export::{
    EnrichmentOrchestrator, ExportConfig, ExportError, NoopObserver, ProgressEvent, ProgressObserver,
};
use store_exporter::fetcher::{FetcherError, ResilientFetcher};
use store_exporter::registry::{CUSTOMER_ADDRESSES, CUSTOMER_ATTRIBUTE_VALUES};
use store_exporter::shutdown::ShutdownCoordinator;
use store_exporter::EntityKind;

use crate::support::{config, envelope, exact_policy, json_ok, status_reply, ScriptedTransport};

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressObserver for RecordingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn orchestrator(
    transport: Arc<ScriptedTransport>,
    config: ExportConfig,
    observer: Arc<dyn ProgressObserver>,
) -> EnrichmentOrchestrator {
    let fetcher = ResilientFetcher::new(transport, exact_policy(2));
    EnrichmentOrchestrator::new(
        Arc::new(config),
        fetcher,
        observer,
        ShutdownCoordinator::shared(),
    )
}

#[tokio::test]
async fn test_addresses_grouped_by_parent_in_chunks() {
    let transport = ScriptedTransport::new();
    transport.route(
        "v3/customers/addresses",
        &[("customer_id:in", "1,2")],
        vec![json_ok(envelope(
            vec![
                json!({"id": 10, "customer_id": 2, "city": "Lyon"}),
                json!({"id": 11, "customer_id": 1, "city": "Paris"}),
                json!({"id": 12, "customer_id": 2, "city": "Nice"}),
            ],
            1,
            1,
            3,
        ))],
    );
    transport.route(
        "v3/customers/addresses",
        &[("customer_id:in", "3")],
        vec![json_ok(envelope(vec![json!({"id": 13, "customer_id": 3})], 1, 1, 1))],
    );

    let config = ExportConfig::builder("abc123", "t")
        .api_base(crate::support::API_BASE)
        .id_chunk_size(2)
        .build()
        .unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let outcome = orchestrator(transport.clone(), config, observer.clone())
        .fetch_by_parent(&CUSTOMER_ADDRESSES, &[1, 2, 2, 3])
        .await
        .unwrap();

    assert!(outcome.degraded.is_none());
    assert_eq!(outcome.by_parent.len(), 3);
    let cities: Vec<_> = outcome.by_parent[&2]
        .iter()
        .map(|r| r["city"].clone())
        .collect();
    assert_eq!(cities, vec![json!("Lyon"), json!("Nice")]);
    assert_eq!(transport.requests().len(), 2);

    let batches = observer
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ProgressEvent::EnrichmentBatch { chunks: 2, .. }))
        .count();
    assert_eq!(batches, 2);
}

#[tokio::test]
async fn test_forbidden_optional_resource_degrades() {
    let transport = ScriptedTransport::new();
    transport.route("v3/customers/attribute-values", &[], vec![status_reply(403)]);
    let observer = Arc::new(RecordingObserver::default());

    let outcome = orchestrator(transport.clone(), config(EntityKind::Customers), observer.clone())
        .fetch_by_parent(&CUSTOMER_ATTRIBUTE_VALUES, &[1, 2])
        .await
        .unwrap();

    assert!(outcome.by_parent.is_empty());
    assert!(matches!(
        outcome.degraded,
        Some(FetcherError::OptionalSubresourceUnavailable { status: 403, .. })
    ));
    assert_eq!(transport.requests().len(), 1);
    assert!(observer.events.lock().unwrap().contains(&ProgressEvent::EnrichmentDegraded {
        resource: "attribute-values",
        status: 403,
    }));
}

#[tokio::test]
async fn test_forbidden_required_resource_is_fatal() {
    let transport = ScriptedTransport::new();
    transport.route("v3/customers/addresses", &[], vec![status_reply(403)]);

    let err = orchestrator(transport, config(EntityKind::Customers), Arc::new(NoopObserver))
        .fetch_by_parent(&CUSTOMER_ADDRESSES, &[1])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ClientRequestError");
}

#[tokio::test]
async fn test_no_parents_means_no_requests() {
    let transport = ScriptedTransport::new();
    let outcome = orchestrator(transport.clone(), config(EntityKind::Customers), Arc::new(NoopObserver))
        .fetch_by_parent(&CUSTOMER_ADDRESSES, &[])
        .await
        .unwrap();
    assert!(outcome.by_parent.is_empty());
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_order_independent_of_completion() {
    let transport = ScriptedTransport::new();
    let enrichment = orchestrator(transport, config(EntityKind::Orders), Arc::new(NoopObserver));

    // Lower ids finish last
    let results = enrichment
        .fan_out((1..=20).collect(), |id| async move {
            tokio::time::sleep(Duration::from_millis((100 - id as u64) * 10)).await;
            Ok::<_, ExportError>(id * 100)
        })
        .await
        .unwrap();

    let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    assert!(results.iter().all(|(id, value)| *value == id * 100));
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_respects_concurrency_bound() {
    let transport = ScriptedTransport::new();
    let config = ExportConfig::builder("abc123", "t").concurrency(3).build().unwrap();
    let enrichment = orchestrator(transport, config, Arc::new(NoopObserver));

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    enrichment
        .fan_out((1..=12).collect(), |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ExportError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_first_error_stops_new_work() {
    let transport = ScriptedTransport::new();
    let config = ExportConfig::builder("abc123", "t").concurrency(2).build().unwrap();
    let enrichment = orchestrator(transport, config, Arc::new(NoopObserver));
    let started = Arc::new(AtomicUsize::new(0));

    let err = enrichment
        .fan_out((1..=50).collect(), |id| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                if id == 3 {
                    Err(ExportError::from(FetcherError::ClientRequestError {
                        url: format!("v2/orders/{id}/products"),
                        status: 400,
                        body: "bad".into(),
                    }))
                } else {
                    Ok(id)
                }
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ClientRequestError");
    assert!(started.load(Ordering::SeqCst) < 50);
}

#[tokio::test]
async fn test_fan_out_external_shutdown_cancels() {
    let transport = ScriptedTransport::new();
    let fetcher = ResilientFetcher::new(transport, exact_policy(1));
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let enrichment = EnrichmentOrchestrator::new(
        Arc::new(config(EntityKind::Orders)),
        fetcher,
        Arc::new(NoopObserver),
        shutdown,
    );

    let err = enrichment
        .fan_out(vec![1, 2], |id| async move { Ok::<_, ExportError>(id) })
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
}
