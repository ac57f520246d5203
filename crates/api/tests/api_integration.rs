//! Integration tests for the API server.

use std::sync::Arc;

use api::config::Config;
use api::state::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::BankStatus;
use local_store::InMemoryLocalStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const CLIENT: &str = "client-42";

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    setup_with_state().0
}

fn setup_with_state() -> (axum::Router, Arc<AppState<InMemoryLocalStore>>) {
    let state = api::create_default_state(InMemoryLocalStore::new(), Config::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Adds one flight at 450000 and two hotel nights at 320000; returns the cart id.
async fn fill_cart(app: &axum::Router) -> String {
    let uri = format!("/clients/{CLIENT}/cart/items");
    let (status, _) = send(
        app,
        post_json(
            &uri,
            json!({
                "kind": "AIR",
                "ref_id": "FL-BOG-CTG",
                "quantity": 1,
                "unit_price": 450000,
                "currency": "COP"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, cart) = send(
        app,
        post_json(
            &uri,
            json!({
                "kind": "HOTEL",
                "ref_id": "HT-CTG-01",
                "quantity": 2,
                "unit_price": 320000,
                "currency": "COP",
                "metadata": { "room_code": "DBL" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    cart["cart"]["id"].as_str().unwrap().to_string()
}

fn checkout_body(cart_id: &str) -> Value {
    json!({
        "client_id": CLIENT,
        "cart_id": cart_id,
        "currency": "COP",
        "description": "Bogotá - Cartagena"
    })
}

fn approved_notification(reference: &str) -> Value {
    json!({
        "referencia_transaccion": reference,
        "estado_transaccion": "APROBADA",
        "monto_transaccion": 1090000,
        "fecha_hora_pago": "2026-10-16 10:15:00",
        "codigo_respuesta": "00",
        "metodo_pago": "PSE",
        "codigo_autorizacion": "AUTH-778"
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_cart_add_and_get() {
    let app = setup();
    let cart_id = fill_cart(&app).await;

    let (status, json) = send(&app, get(&format!("/clients/{CLIENT}/cart"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cart"]["id"], cart_id);
    assert_eq!(json["cart"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(json["totals"]["flights"], 450000);
    assert_eq!(json["totals"]["hotels"], 640000);
    assert_eq!(json["totals"]["total"], 1090000);
}

#[tokio::test]
async fn test_cart_rejects_mixed_currency() {
    let app = setup();
    fill_cart(&app).await;

    let (status, json) = send(
        &app,
        post_json(
            &format!("/clients/{CLIENT}/cart/items"),
            json!({
                "kind": "HOTEL",
                "ref_id": "HT-MIA-02",
                "quantity": 1,
                "unit_price": 100,
                "currency": "USD"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Currency mismatch"));
}

#[tokio::test]
async fn test_remove_item_from_unknown_cart() {
    let app = setup();
    let cart_id = "00000000-0000-0000-0000-000000000001";
    let item_id = "00000000-0000-0000-0000-000000000002";

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/carts/{cart_id}/items/{item_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let request = Request::builder()
        .method("DELETE")
        .uri("/carts/not-a-uuid/items/also-not")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_then_notification_confirms_bookings() {
    let (app, state) = setup_with_state();
    let cart_id = fill_cart(&app).await;

    let (status, receipt) = send(&app, post_json("/checkout", checkout_body(&cart_id))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["total_amount"], 1090000);
    assert_eq!(receipt["currency"], "COP");
    let reference = receipt["payment_attempt_id"].as_str().unwrap().to_string();

    // The bank was given this server's default return and notification URLs.
    let request = state.gateway.request_for(&reference).await.unwrap();
    assert_eq!(request.return_url, "http://localhost:3000/payments/return");
    assert_eq!(
        request.notification_url,
        "http://localhost:3000/payments/notifications"
    );

    let (status, report) = send(
        &app,
        post_json("/payments/notifications", approved_notification(&reference)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["attempt_state"], "APPROVED");
    assert_eq!(report["duplicate"], false);
    assert_eq!(report["confirmation"]["flights"], "success");
    assert_eq!(report["confirmation"]["hotels"], "success");

    // The cart is emptied after approval.
    let (_, cart) = send(&app, get(&format!("/clients/{CLIENT}/cart"))).await;
    assert!(cart["cart"]["items"].as_array().unwrap().is_empty());

    let (status, view) = send(&app, get(&format!("/payments/{reference}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["state"], "APPROVED");
    assert_eq!(view["bookings"].as_array().unwrap().len(), 2);

    let (_, notifications) = send(&app, get(&format!("/clients/{CLIENT}/notifications"))).await;
    assert!(
        notifications
            .as_array()
            .unwrap()
            .iter()
            .any(|n| n["level"] == "success")
    );
}

#[tokio::test]
async fn test_redirect_after_notification_is_duplicate() {
    let (app, state) = setup_with_state();
    let cart_id = fill_cart(&app).await;
    let (_, receipt) = send(&app, post_json("/checkout", checkout_body(&cart_id))).await;
    let reference = receipt["payment_attempt_id"].as_str().unwrap().to_string();

    send(
        &app,
        post_json("/payments/notifications", approved_notification(&reference)),
    )
    .await;
    state.gateway.settle(&reference, BankStatus::Approved).await;

    let uri = format!(
        "/payments/return?referencia_transaccion={reference}&estado_transaccion=APROBADA"
    );
    let (status, report) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["duplicate"], true);
    assert_eq!(state.flights.confirm_calls().await.len(), 1);
    assert_eq!(state.hotels.confirm_calls().await.len(), 1);
}

#[tokio::test]
async fn test_checkout_replays_with_idempotency_header() {
    let (app, state) = setup_with_state();
    let cart_id = fill_cart(&app).await;

    let request = || {
        Request::builder()
            .method("POST")
            .uri("/checkout")
            .header("content-type", "application/json")
            .header("Idempotency-Key", "checkout-form-7f3a")
            .body(Body::from(
                serde_json::to_string(&checkout_body(&cart_id)).unwrap(),
            ))
            .unwrap()
    };

    let (first_status, first) = send(&app, request()).await;
    let (second_status, second) = send(&app, request()).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(first["idempotency_key"], "checkout-form-7f3a");
    assert_eq!(first["payment_attempt_id"], second["payment_attempt_id"]);
    assert_eq!(state.gateway.attempt_count().await, 1);

    let (status, session) = send(&app, get("/checkout/checkout-form-7f3a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "awaiting_payment");
}

#[tokio::test]
async fn test_checkout_with_malformed_key_is_rejected() {
    let app = setup();
    let cart_id = fill_cart(&app).await;

    let request = Request::builder()
        .method("POST")
        .uri("/checkout")
        .header("content-type", "application/json")
        .header("Idempotency-Key", "has space")
        .body(Body::from(
            serde_json::to_string(&checkout_body(&cart_id)).unwrap(),
        ))
        .unwrap();
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_unknown_cart_is_not_found() {
    let app = setup();

    let (status, _) = send(
        &app,
        post_json(
            "/checkout",
            checkout_body("00000000-0000-0000-0000-0000000000aa"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_payment_is_not_found() {
    let app = setup();

    let (status, json) = send(&app, get("/payments/REF999")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_incomplete_notification_is_bad_request() {
    let app = setup();

    let (status, json) = send(
        &app,
        post_json(
            "/payments/notifications",
            json!({
                "referencia_transaccion": "REF1",
                "estado_transaccion": "APROBADA"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("monto_transaccion"));
}

#[tokio::test]
async fn test_list_and_cancel_bookings() {
    let (app, state) = setup_with_state();
    let cart_id = fill_cart(&app).await;
    let (_, receipt) = send(&app, post_json("/checkout", checkout_body(&cart_id))).await;
    let reference = receipt["payment_attempt_id"].as_str().unwrap().to_string();
    send(
        &app,
        post_json("/payments/notifications", approved_notification(&reference)),
    )
    .await;

    // The reservation backend has nothing yet, so local bookings are shown.
    let (status, listed) = send(&app, get(&format!("/clients/{CLIENT}/bookings"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["authoritative"], false);
    assert_eq!(listed["stale"], false);
    let bookings = listed["bookings"].as_array().unwrap();
    assert_eq!(bookings.len(), 2);

    let flight = bookings.iter().find(|b| b["kind"] == "AIR").unwrap();
    let booking_id = flight["booking_id"].as_str().unwrap();
    let external_id = flight["external_booking_id"].as_str().unwrap().to_string();

    let (status, cancelled) = send(
        &app,
        post_json(
            &format!("/clients/{CLIENT}/bookings/{booking_id}/cancel"),
            json!({ "reason": "change of plans" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["external_booking_id"], external_id);
    let calls = state.flights.cancel_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].reason, "change of plans");
}

#[tokio::test]
async fn test_cancel_unknown_booking_is_not_found() {
    let app = setup();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/clients/{CLIENT}/bookings/BK-404/cancel"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
