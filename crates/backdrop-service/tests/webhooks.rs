//! Payment webhook integration tests.

mod common;

use backdrop_core::AccountId;
use backdrop_service::crypto::hmac_sha256_hex;
use backdrop_service::ServiceConfig;
use common::{TestHarness, WEBHOOK_SECRET};
use serde_json::json;

fn payment_body(payment_ref: &str, account_id: &AccountId, credits: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "payment_ref": payment_ref,
        "account_id": account_id.to_string(),
        "credits": credits,
    }))
    .expect("serialize payment event")
}

async fn deliver(harness: &TestHarness, body: Vec<u8>, signature: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/webhooks/payments")
        .add_header("content-type", "application/json")
        .add_header("x-payment-signature", signature.to_string())
        .bytes(body.into())
        .await
}

#[tokio::test]
async fn signed_payment_credits_the_account() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let body = payment_body("pay_001", &harness.test_account_id, 100);
    let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);

    let response = deliver(&harness, body, &signature).await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["received"], true);
    assert_eq!(ack["duplicate"], false);
    assert_eq!(ack["balance"], 110);
    assert_eq!(harness.balance(&harness.test_account_id), 110);
}

#[tokio::test]
async fn redelivered_payment_is_acknowledged_once() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let body = payment_body("pay_002", &harness.test_account_id, 50);
    let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);

    deliver(&harness, body.clone(), &signature)
        .await
        .assert_status_ok();
    let response = deliver(&harness, body, &signature).await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["duplicate"], true);
    assert_eq!(ack["balance"], 60);
    assert_eq!(harness.balance(&harness.test_account_id), 60);
}

#[tokio::test]
async fn tampered_payment_is_rejected() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let signature = hmac_sha256_hex(
        WEBHOOK_SECRET,
        &payment_body("pay_003", &harness.test_account_id, 5),
    );
    let forged = payment_body("pay_003", &harness.test_account_id, 5000);

    let response = deliver(&harness, forged, &signature).await;

    response.assert_status_unauthorized();
    assert_eq!(harness.balance(&harness.test_account_id), 10);
}

#[tokio::test]
async fn unsigned_payment_is_rejected_when_secret_configured() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("content-type", "application/json")
        .bytes(payment_body("pay_004", &harness.test_account_id, 5).into())
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn non_positive_credits_are_rejected() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let body = payment_body("pay_005", &harness.test_account_id, 0);
    let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);

    let response = deliver(&harness, body, &signature).await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn oversized_purchase_is_rejected() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let body = payment_body("pay_huge", &harness.test_account_id, i64::MAX);
    let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);

    let response = deliver(&harness, body, &signature).await;

    response.assert_status_bad_request();
    assert_eq!(harness.balance(&harness.test_account_id), 10);

    // The store is still usable afterwards
    let body = payment_body("pay_normal", &harness.test_account_id, 20);
    let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);
    deliver(&harness, body, &signature).await.assert_status_ok();
    assert_eq!(harness.balance(&harness.test_account_id), 30);
}

#[tokio::test]
async fn payment_for_unknown_account_is_not_found() {
    let harness = TestHarness::new();

    let body = payment_body("pay_006", &AccountId::generate(), 10);
    let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);

    let response = deliver(&harness, body, &signature).await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn unsigned_payment_in_production_without_secret_is_rejected() {
    let harness = TestHarness::with_config(ServiceConfig {
        environment: "production".into(),
        payment_webhook_secret: None,
        ..TestHarness::config()
    });
    harness.open_account().await;

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("content-type", "application/json")
        .bytes(payment_body("pay_007", &harness.test_account_id, 5).into())
        .await;

    response.assert_status_unauthorized();
}
