use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tower::ServiceExt;

use shelfscan_core::testutil::{MockCapability, MockContextProvider};
use shelfscan_core::{CapabilityRegistry, Orchestrator, OrchestratorConfig, RateLimitConfig};
use shelfscan_db::Database;
use shelfscan_server::routes;
use shelfscan_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

/// Spin up a PostgreSQL container and return the test app router + container handle.
pub async fn setup_test_app() -> (Router, ContainerAsync<GenericImage>) {
    setup_test_app_with(MockContextProvider::new(), Some(TEST_API_KEY)).await
}

/// Same as [`setup_test_app`] but without an admin token configured.
pub async fn setup_test_app_no_auth() -> (Router, ContainerAsync<GenericImage>) {
    setup_test_app_with(MockContextProvider::new(), None).await
}

pub async fn setup_test_app_with(
    provider: MockContextProvider,
    admin_token: Option<&str>,
) -> (Router, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "shelfscan_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/shelfscan_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let config = OrchestratorConfig::default()
        .with_rate_limit(RateLimitConfig::new(Duration::ZERO))
        .with_settle_delay(Duration::ZERO);
    let registry = Arc::new(CapabilityRegistry::new(Arc::new(
        MockCapability::new().failing_on("https://shop.example.com/p/broken"),
    )));
    let orchestrator = Orchestrator::new(provider, registry, db.product_repo(), config)
        .with_archive(db.run_repo());

    let state = Arc::new(AppState::new(
        db,
        orchestrator,
        admin_token.map(str::to_string),
    ));

    (routes::router(state), container)
}

async fn retry_connect(url: &str) -> sqlx::PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}

pub fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
    request.header("authorization", format!("Bearer {TEST_API_KEY}"))
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

pub async fn get_json(app: &Router, uri: &str) -> (axum::http::StatusCode, serde_json::Value) {
    let response = send(app, authed(Request::get(uri)).body(Body::empty()).unwrap()).await;
    let status = response.status();
    (status, json_body(response).await)
}

/// Poll a run until it reports a terminal status.
pub async fn wait_for_run(app: &Router, run_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let (_, body) = get_json(app, &format!("/v1/batches/{run_id}")).await;
        if body["finished_at"].is_string() {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("batch run {run_id} did not finish");
}
