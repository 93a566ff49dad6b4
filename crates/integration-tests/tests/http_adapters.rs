//! Integration tests for the HTTP service adapters and a full checkout over
//! HTTP against a stub backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use uuid::Uuid;
use vitrine_core::{
    Cep, Money, OrderId, PaymentMethod, PreferenceRequest, ShipmentStatus,
};
use vitrine_integration_tests::{StubResponse, StubServer, address, item, payer};
use vitrine_storefront::api::ApiError;
use vitrine_storefront::checkout::{CheckoutStep, PaymentOutcome};
use vitrine_storefront::config::StorefrontConfig;
use vitrine_storefront::error::StorefrontError;
use vitrine_storefront::notify::{Notice, RecordingNotifier};
use vitrine_storefront::services::shipping::QuoteRequest;
use vitrine_storefront::services::{
    HttpPaymentService, HttpShippingService, PaymentService, ShippingService, poll_tracking,
};
use vitrine_storefront::state::AppState;

fn carrier_quotes() -> serde_json::Value {
    json!([
        {"id": 1, "name": "SEDEX", "price": "31.50", "delivery_time": 2,
         "company": {"id": 1, "name": "Correios"}},
        {"id": 2, "name": "PAC", "price": "22.90", "custom_price": "21.90",
         "delivery_time": 6, "custom_delivery_time": 7,
         "company": {"id": 1, "name": "Correios"}},
        {"id": 3, "name": ".Package", "error": "Dimensões excedidas",
         "company": {"id": 2, "name": "Jadlog"}}
    ])
}

fn temp_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("vitrine-it-{}", Uuid::new_v4()))
}

#[tokio::test]
async fn test_stub_server_records_requests() {
    let server = StubServer::start(|request| match request.path.as_str() {
        "/empty" => StubResponse::empty(204),
        _ => StubResponse::json(201, &json!({"ok": true})),
    })
    .await
    .unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(server.url().join("/api/echo?page=2").unwrap())
        .header("X-Idempotency-Key", "abc")
        .json(&json!({"cep": "01310100"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.json::<serde_json::Value>().await.unwrap()["ok"], true);

    let empty = client.get(server.url().join("/empty").unwrap()).send().await.unwrap();
    assert_eq!(empty.status().as_u16(), 204);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let echo = requests.first().unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.path, "/api/echo");
    assert_eq!(echo.query.as_deref(), Some("page=2"));
    assert_eq!(echo.header("x-idempotency-key"), Some("abc"));
    assert_eq!(echo.json()["cep"], "01310100");
    assert_eq!(server.hits("/empty"), 1);
}

// =============================================================================
// Shipping
// =============================================================================

#[tokio::test]
async fn test_quote_is_public_and_skips_unavailable_services() {
    let server = StubServer::start(|_| StubResponse::json(200, &carrier_quotes()))
        .await
        .unwrap();
    let shipping = HttpShippingService::new(server.api_client(None));
    let request = QuoteRequest::new(
        Cep::parse("01310-100").unwrap(),
        Cep::parse("30140-071").unwrap(),
        &[item(1, 5000, 2)],
    );

    let quotes = shipping.quote(&request).await.unwrap();

    assert!(quotes.authorized);
    assert_eq!(quotes.quotes.len(), 2);
    let cheapest = quotes.cheapest().unwrap();
    assert_eq!(cheapest.name, "PAC");
    assert_eq!(cheapest.price, Money::from_cents(2190));
    assert_eq!(cheapest.delivery_time, 7);

    let sent = server.requests().pop().unwrap();
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.path, "/api/shipping/calculate");
    let body = sent.json();
    assert_eq!(body["from"]["postal_code"], "01310100");
    assert_eq!(body["to"]["postal_code"], "30140071");
    assert_eq!(body["products"][0]["quantity"], 2);
    assert_eq!(body["products"][0]["weight"], "0.300");
}

#[tokio::test]
async fn test_quote_from_unauthorized_carrier_account() {
    let server = StubServer::start(|request| match request.path.as_str() {
        "/api/shipping/melhorenvio/status" => StubResponse::json(200, &json!({"authorized": false})),
        _ => StubResponse::json(403, &json!({"message": "Melhor Envio não autorizado"})),
    })
    .await
    .unwrap();
    let shipping = HttpShippingService::new(server.api_client(None));
    let request = QuoteRequest::new(
        Cep::parse("01310100").unwrap(),
        Cep::parse("90010000").unwrap(),
        &[item(1, 5000, 1)],
    );

    let quotes = shipping.quote(&request).await.unwrap();

    assert!(!quotes.authorized);
    assert!(quotes.quotes.is_empty());
    assert!(!shipping.authorization_status().await.unwrap());
}

#[tokio::test]
async fn test_carrier_authorization_checks_state_before_posting() {
    let server = StubServer::start(|_| StubResponse::empty(204)).await.unwrap();
    let shipping = HttpShippingService::new(server.api_client(None));

    let err = shipping
        .complete_authorization("code-1", "returned", "expected")
        .await
        .unwrap_err();
    assert!(matches!(err, StorefrontError::Validation(_)));
    assert!(server.requests().is_empty());

    shipping
        .complete_authorization("code-1", "abc123", "abc123")
        .await
        .unwrap();
    let sent = server.requests().pop().unwrap();
    assert_eq!(sent.path, "/api/shipping/melhorenvio/callback");
    assert_eq!(sent.json()["code"], "code-1");
}

#[tokio::test]
async fn test_tracking_is_followed_until_delivered() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let server = StubServer::start(move |_| {
        let status = match counter.fetch_add(1, Ordering::SeqCst) {
            0 => "posted",
            1 => "in_transit",
            _ => "delivered",
        };
        StubResponse::json(
            200,
            &json!({"order_id": 321, "tracking_code": "BR123456789BR", "status": status}),
        )
    })
    .await
    .unwrap();
    let shipping: Arc<dyn ShippingService> =
        Arc::new(HttpShippingService::new(server.api_client(None)));

    let mut updates = poll_tracking(shipping, OrderId::new(321), Duration::from_millis(5));
    let mut seen = Vec::new();
    let follow = async {
        while let Some(info) = updates.next().await {
            seen.push(info.status);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), follow).await.unwrap();

    assert_eq!(
        seen,
        [ShipmentStatus::Posted, ShipmentStatus::InTransit, ShipmentStatus::Delivered]
    );
    assert_eq!(server.hits("/api/shipping/tracking/321"), 3);
}

// =============================================================================
// Payments
// =============================================================================

#[tokio::test]
async fn test_preference_without_checkout_url_is_an_error() {
    let server = StubServer::start(|_| StubResponse::json(200, &json!({"id": "pref-1"})))
        .await
        .unwrap();
    let payments = HttpPaymentService::new(server.api_client(None));
    let request = PreferenceRequest {
        order_id: OrderId::new(5),
        transaction_amount: Money::from_cents(7290),
        payer: payer(),
    };

    let err = payments.create_preference(&request).await.unwrap_err();

    assert!(matches!(
        err,
        StorefrontError::Api(ApiError::Api { status: 502, .. })
    ));
}

// =============================================================================
// Full checkout over HTTP
// =============================================================================

#[tokio::test]
async fn test_pix_checkout_against_backend() {
    let server = StubServer::start(|request| match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/api/shipping/calculate") => StubResponse::json(200, &carrier_quotes()),
        ("POST", "/api/orders/user/orders") => StubResponse::json(
            201,
            &json!({
                "id": 501,
                "order_number": "VT-000501",
                "status": "pending",
                "payment_status": "pending",
                "subtotal": 100.0,
                "shipping_cost": 21.9,
                "discount": 0,
                "total": 121.9,
                "items": []
            }),
        ),
        ("POST", "/api/payments/process") => StubResponse::json(
            201,
            &json!({
                "payment_id": 9001,
                "status": "pending",
                "pix": {"qr_code": "00020126580014br.gov.bcb.pix", "ticket_url": "https://pix.test/9001"}
            }),
        ),
        ("GET", "/api/payments/9001/status") => {
            StubResponse::json(200, &json!({"payment_id": 9001, "status": "approved"}))
        }
        _ => StubResponse::json(404, &json!({"message": "not found"})),
    })
    .await
    .unwrap();

    let dir = temp_dir();
    let mut config = StorefrontConfig::for_api(server.url().as_str()).unwrap();
    config.storage_dir.clone_from(&dir);
    config.payment_poll_interval = Duration::from_millis(5);
    config.access_token = Some(SecretString::from("buyer-token"));

    let state = AppState::new(config).await.unwrap();
    state.cart().add_item(item(1, 5000, 2)).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let mut checkout = state.checkout(payer(), notifier.clone());

    checkout.select_address(address("30140071")).unwrap();
    let quotes = checkout.quote_shipping().await.unwrap();
    let pac = quotes.cheapest().cloned().unwrap();
    checkout.select_shipping(&pac).await.unwrap();
    assert!(checkout.go_to_next_step().await);
    checkout.select_payment_method(PaymentMethod::Pix).unwrap();
    assert!(checkout.go_to_next_step().await);

    let order = checkout.create_order().await.unwrap();
    assert_eq!(order.total, Money::from_cents(12_190));

    let outcome = checkout.process_payment().await.unwrap();
    assert_eq!(outcome, PaymentOutcome::Pending);
    let pix = checkout.state().payment.as_ref().unwrap().pix.clone().unwrap();
    assert!(pix.qr_code.starts_with("000201"));

    let approved = tokio::time::timeout(Duration::from_secs(5), checkout.next_payment_update())
        .await
        .unwrap();
    assert_eq!(approved, Some(PaymentOutcome::Approved));
    assert!(checkout.close_success_modal());
    assert_eq!(checkout.step(), CheckoutStep::Success);
    assert_eq!(
        notifier.count(|n| matches!(n, Notice::OrderCompleted { order_number } if order_number == "VT-000501")),
        1
    );

    // Wire checks: public quote, authenticated order and payment.
    let requests = server.requests();
    let quote = requests.iter().find(|r| r.path == "/api/shipping/calculate").unwrap();
    assert_eq!(quote.header("authorization"), None);

    let order_request = requests.iter().find(|r| r.path == "/api/orders/user/orders").unwrap();
    assert_eq!(order_request.header("authorization"), Some("Bearer buyer-token"));
    let body = order_request.json();
    assert_eq!(body["shipping"]["service_id"], 2);
    assert_eq!(body["payment_method"], "pix");

    let payment_request = requests.iter().find(|r| r.path == "/api/payments/process").unwrap();
    let key = payment_request.header("x-idempotency-key").unwrap();
    assert!(Uuid::parse_str(key).is_ok());
    let body = payment_request.json();
    assert_eq!(body["order_id"], 501);
    assert_eq!(body["transaction_amount"], 121.9);
    assert_eq!(body["payer"]["email"], "ana@example.com");

    // The approved order emptied the cart; the emptied cart is what persists.
    state.shutdown().await.unwrap();
    let mut config = StorefrontConfig::for_api(server.url().as_str()).unwrap();
    config.storage_dir.clone_from(&dir);
    let restored = AppState::new(config).await.unwrap();
    assert!(restored.cart().is_empty().await);

    let _ = std::fs::remove_dir_all(dir);
}
