//! Job submission integration tests.

mod common;

use axum::http::StatusCode;
use common::{image_batch, TestHarness};

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn submit_job_reserves_credits_and_queues() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(3, "sunset beach"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "queued");
    assert_eq!(body["imageCount"], 3);
    // 3 images at the base rate of 4
    assert_eq!(body["creditsReserved"], 12);

    assert_eq!(harness.balance(&harness.test_account_id), 88);
    assert_eq!(harness.storage.len(), 3);

    let queued = harness.queue.jobs();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].prompt, "sunset beach");
    assert_eq!(queued[0].image_refs.len(), 3);
}

#[tokio::test]
async fn submit_job_applies_volume_discount() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(30, "studio grey"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    // 10 x 4 + 15 x 3 + 5 x 2
    assert_eq!(body["creditsReserved"], 95);
    assert_eq!(harness.balance(&harness.test_account_id), 5);
}

#[tokio::test]
async fn submit_job_with_insufficient_credits_is_payment_required() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(3, "forest"))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["required"], 12);
    assert_eq!(body["error"]["details"]["available"], 10);

    // Nothing was uploaded or charged
    assert!(harness.storage.is_empty());
    assert_eq!(harness.balance(&harness.test_account_id), 10);
}

#[tokio::test]
async fn dispatch_failure_refunds_and_marks_job_failed() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;
    harness.queue.set_failing(true);

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(3, "city skyline"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "dispatch_failed");
    let job_id = body["error"]["details"]["jobId"]
        .as_str()
        .expect("job id in details")
        .to_string();

    assert_eq!(harness.balance(&harness.test_account_id), 100);

    let job = harness
        .server
        .get(&format!("/v1/jobs/{job_id}"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    job.assert_status_ok();
    let job: serde_json::Value = job.json();
    assert_eq!(job["status"], "failed");
    assert_eq!(job["creditsReserved"], 12);

    // The refund is in the history next to the reservation
    let history: serde_json::Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    let kinds: Vec<&str> = history["transactions"]
        .as_array()
        .expect("transactions array")
        .iter()
        .filter_map(|tx| tx["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["refund", "usage", "monthly_reset"]);
}

#[tokio::test]
async fn upload_failure_charges_nothing() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;
    harness.storage.set_failing(true);

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(2, "mountains"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "upload_failed");
    assert_eq!(harness.balance(&harness.test_account_id), 100);
    assert!(harness.queue.jobs().is_empty());
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn submit_job_with_empty_prompt_is_bad_request() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(1, "   "))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn submit_job_without_images_is_bad_request() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(0, "beach"))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn submit_job_over_batch_cap_is_bad_request() {
    let harness = TestHarness::new();
    harness.open_account_on("studio").await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(51, "beach"))
        .await;

    response.assert_status_bad_request();
    assert_eq!(harness.balance(&harness.test_account_id), 2000);
}

#[tokio::test]
async fn submit_job_rejects_non_image_files() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let form = axum_test::multipart::MultipartForm::new()
        .add_text("prompt", "beach")
        .add_part(
            "images",
            axum_test::multipart::Part::text("not an image")
                .file_name("notes.txt")
                .mime_type("text/plain"),
        );

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(form)
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn submit_job_without_account_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(1, "beach"))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn submit_job_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/jobs")
        .multipart(image_batch(1, "beach"))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn submit_job_with_forged_token_fails() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let response = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", "Bearer not.a.jwt")
        .multipart(image_batch(1, "beach"))
        .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Lookup
// ============================================================================

#[tokio::test]
async fn get_job_returns_owned_job() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let submitted: serde_json::Value = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(2, "lavender field"))
        .await
        .json();
    let job_id = submitted["id"].as_str().expect("job id");

    let response = harness
        .server
        .get(&format!("/v1/jobs/{job_id}"))
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], job_id);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["backgroundPrompt"], "lavender field");
    assert_eq!(body["inputImageRefs"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn get_job_of_other_account_is_not_found() {
    let harness = TestHarness::new();
    harness.open_account_on("starter").await;

    let submitted: serde_json::Value = harness
        .server
        .post("/v1/jobs")
        .add_header("authorization", harness.user_auth_header())
        .multipart(image_batch(1, "beach"))
        .await
        .json();
    let job_id = submitted["id"].as_str().expect("job id");

    let response = harness
        .server
        .get(&format!("/v1/jobs/{job_id}"))
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn get_job_with_malformed_id_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/jobs/not-a-ulid")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_not_found();
}
