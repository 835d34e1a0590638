//! End-to-end exports against a scripted store API
//!
//! Tests verify:
//! - Metadata and bare-array listings are walked to completion
//! - Truncated customer sub-lists are re-fetched and split into columns
//! - An unavailable optional resource degrades to a warning
//! - Per-order line items are merged and rows come out sorted by id
//! - Fatal failures and cancellation yield no table

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use store_exporter::export::{ExportConfig, ExportError, Exporter};
use store_exporter::shutdown::ShutdownCoordinator;
use store_exporter::EntityKind;

use crate::support::{
    config, envelope, exact_policy, json_ok, status_reply, ScriptedTransport, API_BASE, STORE_HASH,
};

fn exporter(transport: Arc<ScriptedTransport>, config: ExportConfig) -> Exporter {
    Exporter::with_transport(Arc::new(config), transport)
}

fn products(start: i64, count: i64) -> Vec<Value> {
    (start..start + count)
        .map(|id| json!({"id": id, "name": format!("Product {id}")}))
        .collect()
}

fn orders(start: i64, count: i64) -> Value {
    Value::Array(
        (start..start + count)
            .map(|id| json!({"id": id, "status": "Shipped"}))
            .collect(),
    )
}

#[tokio::test]
async fn test_products_metadata_pagination() {
    let transport = ScriptedTransport::new();
    let path = "v3/catalog/products";
    transport.route(path, &[("page", "1")], vec![json_ok(envelope(products(1, 250), 1, 3, 510))]);
    transport.route(path, &[("page", "2")], vec![json_ok(envelope(products(251, 250), 2, 3, 510))]);
    transport.route(path, &[("page", "3")], vec![json_ok(envelope(products(501, 10), 3, 3, 510))]);

    let table = exporter(transport.clone(), config(EntityKind::Products))
        .export(EntityKind::Products)
        .await
        .unwrap();

    assert_eq!(table.len(), 510);
    assert_eq!(table.columns, vec!["id", "name"]);
    assert_eq!(table.rows[0], vec!["1", "Product 1"]);
    assert_eq!(table.rows[509], vec!["510", "Product 510"]);
    assert!(table.warnings.is_empty());
    assert_eq!(transport.requests().len(), 3);

    let first = &transport.requests()[0];
    assert_eq!(first.url, format!("{API_BASE}/stores/{STORE_HASH}/v3/catalog/products"));
    assert!(first
        .headers
        .iter()
        .any(|(k, v)| k == "X-Auth-Token" && v == "test-token"));
}

#[tokio::test]
async fn test_empty_listing_yields_empty_table() {
    let transport = ScriptedTransport::new();
    transport.route("v3/catalog/products", &[], vec![json_ok(envelope(vec![], 1, 0, 0))]);

    let table = exporter(transport, config(EntityKind::Products))
        .export(EntityKind::Products)
        .await
        .unwrap();
    assert!(table.is_empty());
    assert!(table.columns.is_empty());
}

fn script_customers(transport: &ScriptedTransport) {
    transport.route(
        "v3/customers/attributes",
        &[],
        vec![json_ok(envelope(vec![json!({"id": 1, "name": "Tier"})], 1, 1, 1))],
    );
    transport.route(
        "v3/customers",
        &[("include", "addresses,attributes")],
        vec![json_ok(envelope(
            vec![
                json!({
                    "id": 1,
                    "email": "ada@example.com",
                    "address_count": 2,
                    "addresses": [{"id": 10, "customer_id": 1, "city": "Paris"}],
                    "attribute_count": 1,
                    "attributes": [{"attribute_id": 1, "attribute_value": "gold"}]
                }),
                json!({
                    "id": 2,
                    "email": "bob@example.com",
                    "address_count": 0,
                    "addresses": [],
                    "attribute_count": 1,
                    "attributes": []
                }),
            ],
            1,
            1,
            2,
        ))],
    );
    transport.route(
        "v3/customers/addresses",
        &[("customer_id:in", "1")],
        vec![json_ok(envelope(
            vec![
                json!({"id": 10, "customer_id": 1, "city": "Paris"}),
                json!({"id": 11, "customer_id": 1, "city": "Lyon"}),
            ],
            1,
            1,
            2,
        ))],
    );
    transport.route("v3/customers/attribute-values", &[], vec![status_reply(403)]);
}

#[tokio::test]
async fn test_customers_enriched_split_and_degraded() {
    let transport = ScriptedTransport::new();
    script_customers(&transport);

    let table = exporter(transport.clone(), config(EntityKind::Customers))
        .export(EntityKind::Customers)
        .await
        .unwrap();

    assert_eq!(
        table.columns,
        vec![
            "id",
            "email",
            "address1_city",
            "address1_customer_id",
            "address1_id",
            "address2_city",
            "address2_customer_id",
            "address2_id",
            "attribute1_id",
            "attribute1_name",
            "attribute1_raw",
            "attribute1_value",
            "address_count",
            "addresses",
            "attribute_count",
            "attributes",
        ]
    );

    let ada = &table.rows[0];
    assert_eq!(ada[0], "1");
    assert_eq!(ada[2], "Paris");
    assert_eq!(ada[5], "Lyon");
    assert_eq!(ada[8], "1");
    assert_eq!(ada[9], "Tier");
    assert_eq!(ada[11], "gold");
    assert_eq!(ada[12], "2");

    let bob = &table.rows[1];
    assert_eq!(bob[1], "bob@example.com");
    assert!(bob[2..12].iter().all(String::is_empty));
    assert_eq!(bob[12], "0");
    assert_eq!(bob[13], "[]");
    assert_eq!(bob[15], "[]");

    assert_eq!(table.warnings.len(), 1);
    assert!(table.warnings[0].contains("attribute-values"));

    let filters: Vec<_> = transport
        .requests_to("v3/customers/attribute-values")
        .iter()
        .filter_map(|r| r.param("customer_id:in").map(str::to_string))
        .collect();
    assert_eq!(filters, vec!["2"]);
}

#[tokio::test]
async fn test_customers_without_id_are_dropped() {
    let transport = ScriptedTransport::new();
    transport.route("v3/customers/attributes", &[], vec![json_ok(envelope(vec![], 1, 1, 0))]);
    transport.route(
        "v3/customers",
        &[("include", "addresses,attributes")],
        vec![json_ok(envelope(
            vec![
                json!({"id": 1, "email": "a@x", "address_count": 0, "addresses": []}),
                json!({"email": "noid@x", "address_count": 3, "addresses": []}),
            ],
            1,
            1,
            2,
        ))],
    );

    let table = exporter(transport.clone(), config(EntityKind::Customers))
        .export(EntityKind::Customers)
        .await
        .unwrap();

    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0][0], "1");
    assert!(table.rows.iter().flatten().all(|cell| cell != "noid@x"));
    assert!(transport.requests_to("v3/customers/addresses").is_empty());
}

#[tokio::test]
async fn test_customers_columns_are_deterministic() {
    let first = {
        let transport = ScriptedTransport::new();
        script_customers(&transport);
        exporter(transport, config(EntityKind::Customers))
            .export(EntityKind::Customers)
            .await
            .unwrap()
    };
    let second = {
        let transport = ScriptedTransport::new();
        script_customers(&transport);
        exporter(transport, config(EntityKind::Customers))
            .export(EntityKind::Customers)
            .await
            .unwrap()
    };
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_required_addresses_failure_is_fatal() {
    let transport = ScriptedTransport::new();
    // First match wins, so this shadows the scripted address success
    transport.route("v3/customers/addresses", &[], vec![status_reply(404)]);
    script_customers(&transport);

    let err = exporter(transport, config(EntityKind::Customers))
        .export(EntityKind::Customers)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ClientRequestError");
}

#[tokio::test(start_paused = true)]
async fn test_orders_bare_array_with_line_items() {
    let transport = ScriptedTransport::new();
    transport.route("v2/orders", &[("page", "1")], vec![json_ok(orders(1, 250))]);
    transport.route("v2/orders", &[("page", "2")], vec![json_ok(orders(251, 250))]);
    transport.route("v2/orders", &[("page", "3")], vec![json_ok(orders(501, 100))]);
    // Slow early ids so completion order differs from id order
    for id in 1..=5 {
        transport.route_with_delay(
            &format!("v2/orders/{id}/products"),
            &[],
            vec![json_ok(json!([{"id": id * 1000, "sku": format!("SKU-{id}")}]))],
            Duration::from_millis(100 * (6 - id as u64)),
        );
    }
    transport.route("v2/orders/7/products", &[], vec![status_reply(204)]);
    transport.route("/products", &[], vec![json_ok(json!([{"id": 1, "sku": "STD"}]))]);

    let table = exporter(transport.clone(), config(EntityKind::Orders))
        .export(EntityKind::Orders)
        .await
        .unwrap();

    assert_eq!(table.len(), 600);
    assert_eq!(table.columns, vec!["id", "status", "products_json"]);
    let ids: Vec<i64> = table.rows.iter().map(|r| r[0].parse().unwrap()).collect();
    assert_eq!(ids, (1..=600).collect::<Vec<_>>());

    assert_eq!(table.rows[0][2], r#"[{"id":1000,"sku":"SKU-1"}]"#);
    assert_eq!(table.rows[6][2], "[]");
    assert_eq!(table.rows[599][2], r#"[{"id":1,"sku":"STD"}]"#);

    assert_eq!(transport.requests_to("v2/orders").len(), 3);
    assert_eq!(transport.requests_to("/products").len(), 600);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_line_items_abort_the_run() {
    let transport = ScriptedTransport::new();
    transport.route("v2/orders", &[("page", "1")], vec![json_ok(orders(1, 20))]);
    transport.route("v2/orders/5/products", &[], vec![status_reply(500)]);
    transport.route("/products", &[], vec![json_ok(json!([]))]);

    let config = ExportConfig::builder(STORE_HASH, "test-token")
        .api_base(API_BASE)
        .retry_policy(exact_policy(3))
        .concurrency(4)
        .build()
        .unwrap();

    let err = exporter(transport.clone(), config)
        .export(EntityKind::Orders)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ExhaustedRetries");
    assert_eq!(transport.requests_to("v2/orders/5/products").len(), 3);
}

#[tokio::test]
async fn test_shutdown_before_first_page_cancels() {
    let transport = ScriptedTransport::new();
    transport.route("v3/catalog/products", &[], vec![json_ok(envelope(products(1, 3), 1, 1, 3))]);
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let err = exporter(transport, config(EntityKind::Products))
        .with_shutdown(shutdown)
        .export(EntityKind::Products)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
}

#[tokio::test]
async fn test_order_without_id_is_unexpected_shape() {
    let transport = ScriptedTransport::new();
    transport.route(
        "v2/orders",
        &[],
        vec![json_ok(json!([{"id": 1}, {"status": "Pending"}]))],
    );

    let err = exporter(transport, config(EntityKind::Orders))
        .export(EntityKind::Orders)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UnexpectedResponseShape");
}
