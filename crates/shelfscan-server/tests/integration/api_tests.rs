use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use shelfscan_core::testutil::{MockContextProvider, PageBehaviour};

use crate::common::{
    authed, get_json, json_body, send, setup_test_app, setup_test_app_no_auth, setup_test_app_with,
    wait_for_run, TEST_API_KEY,
};

fn submit(body: serde_json::Value) -> Request<Body> {
    authed(Request::post("/v1/batches"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let (app, _container) = setup_test_app().await;

    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "connected");
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let (app, _container) = setup_test_app().await;

    let response = send(&app, Request::get("/v1/batches").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let (app, _container) = setup_test_app().await;

    let response = send(
        &app,
        Request::get("/v1/products")
            .header("authorization", format!("Bearer {TEST_API_KEY}-not"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn no_admin_token_returns_403() {
    let (app, _container) = setup_test_app_no_auth().await;

    let response = send(
        &app,
        Request::get("/v1/batches")
            .header("authorization", "Bearer any-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "forbidden");
}

#[tokio::test]
async fn openapi_document_is_public() {
    let (app, _container) = setup_test_app().await;

    let response = send(
        &app,
        Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert!(doc["paths"]["/v1/batches"].is_object());
}

#[tokio::test]
async fn submitted_batch_runs_to_completion() {
    let (app, _container) = setup_test_app().await;

    let response = send(
        &app,
        submit(serde_json::json!({
            "locators": [
                "https://shop.example.com/p/mug",
                "https://shop.example.com/p/broken",
                "https://shop.example.com/p/mug?utm_source=feed",
            ],
            "label": "smoke",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = json_body(response).await;
    assert_eq!(created["total"], 3);
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let run = wait_for_run(&app, &run_id).await;
    assert_eq!(run["status"], "finished");
    assert_eq!(run["label"], "smoke");
    assert_eq!(run["succeeded"], 2);
    assert_eq!(run["failed"], 1);
    assert_eq!(run["created"], 1);
    assert_eq!(run["updated"], 1);
    assert_eq!(run["jobs"][1]["status"], "failed");
    assert!(
        run["jobs"][1]["error"]
            .as_str()
            .unwrap()
            .contains("no product name")
    );

    let (status, listed) = get_json(&app, "/v1/batches").await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed["active_run"].is_null());
    assert_eq!(listed["runs"][0]["run_id"], run_id.as_str());

    let (status, products) = get_json(&app, "/v1/products?name=mug").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(products["total"], 1);
    let product_id = products["products"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(
        products["products"][0]["locator_key"],
        "https://shop.example.com/p/mug"
    );

    let (status, product) = get_json(&app, &format!("/v1/products/{product_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["stock"], "in_stock");

    let (status, history) = get_json(&app, &format!("/v1/products/{product_id}/history")).await;
    assert_eq!(status, StatusCode::OK);
    // Same price and stock on both collections, so nothing to record.
    assert_eq!(history["total"], 0);
}

#[tokio::test]
async fn invalid_locator_is_rejected() {
    let (app, _container) = setup_test_app().await;

    let response = send(
        &app,
        submit(serde_json::json!({
            "locators": ["https://shop.example.com/p/ok", "ftp://shop.example.com/p/nope"],
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "validation_error");

    let response = send(&app, submit(serde_json::json!({ "locators": [] }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, listed) = get_json(&app, "/v1/batches").await;
    assert_eq!(listed["total"], 0);
}

#[tokio::test]
async fn second_submission_conflicts_and_cancel_stops_dispatch() {
    let slow = "https://shop.example.com/p/slow";
    let provider =
        MockContextProvider::new().with_behaviour(slow, PageBehaviour::Delay(Duration::from_millis(500)));
    let (app, _container) = setup_test_app_with(provider, Some(TEST_API_KEY)).await;

    let response = send(
        &app,
        submit(serde_json::json!({
            "locators": [slow, "https://shop.example.com/p/never"],
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let run_id = json_body(response).await["run_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(
        &app,
        submit(serde_json::json!({ "locators": ["https://shop.example.com/p/other"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "conflict");

    let response = send(
        &app,
        authed(Request::delete(format!("/v1/batches/{run_id}")))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let run = wait_for_run(&app, &run_id).await;
    assert_eq!(run["status"], "cancelled");
    assert_eq!(run["succeeded"], 1);
    assert_eq!(run["skipped"], 1);
    assert_eq!(run["jobs"][1]["status"], "pending");

    let response = send(
        &app,
        authed(Request::delete(format!("/v1/batches/{run_id}")))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(
        &app,
        submit(serde_json::json!({ "locators": ["https://shop.example.com/p/other"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn unknown_ids_return_404() {
    let (app, _container) = setup_test_app().await;
    let id = uuid::Uuid::new_v4();

    let (status, body) = get_json(&app, &format!("/v1/batches/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let response = send(
        &app,
        authed(Request::delete(format!("/v1/batches/{id}")))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, &format!("/v1/products/{id}/history")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_sort_key_returns_400() {
    let (app, _container) = setup_test_app().await;

    let (status, body) = get_json(&app, "/v1/products?sort=rating").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}
