use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use shelfscan_core::traits::{ProductStore, RunArchive};
use shelfscan_core::{ProductQuery, RateLimitConfig, SortKey, SortOrder, SubmitOptions};

use crate::auth::require_admin_token;
use crate::dto::{
    BatchListResponse, BatchRunResponse, BatchSummaryResponse, ChangeResponse, ErrorResponse,
    HealthResponse, HistoryQuery, HistoryResponse, ListBatchesQuery, ProductListResponse,
    ProductResponse, ProductsQuery, SubmitBatchRequest, SubmitBatchResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const MAX_PRODUCTS: usize = 500;
const MAX_LISTED: usize = 100;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/batches", get(list_batches).post(submit_batch))
        .route("/v1/batches/{id}", get(get_batch).delete(cancel_batch))
        .route("/v1/products", get(list_products))
        .route("/v1/products/{id}", get(get_product))
        .route("/v1/products/{id}/history", get(product_history))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    let body = ErrorResponse {
        error: error.to_string(),
        message,
    };
    (status, axum::Json(body)).into_response()
}

fn not_found(message: String) -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", message)
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/batches",
    request_body = SubmitBatchRequest,
    responses(
        (status = 202, description = "Batch run started", body = SubmitBatchResponse),
        (status = 400, description = "Invalid locator list", body = ErrorResponse),
        (status = 409, description = "Another run is still active", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "batches"
)]
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<SubmitBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut options = SubmitOptions::default();
    if body.delay_ms.is_some() || body.jitter_ms.is_some() {
        let base = state.orchestrator.rate_limit();
        let delay = body.delay_ms.map(Duration::from_millis).unwrap_or(base.delay);
        let jitter = body.jitter_ms.map(Duration::from_millis).unwrap_or(base.jitter);
        options = options.with_rate_limit(RateLimitConfig::new(delay).with_jitter(jitter));
    }
    if let Some(label) = body.label {
        options = options.with_label(label);
    }

    let handle = state.orchestrator.submit(body.locators, options)?;
    let run = handle.snapshot();
    tracing::info!(run_id = %run.id, total = run.total(), "Batch run submitted over HTTP");
    state.track(handle);

    let response = SubmitBatchResponse {
        run_id: run.id,
        total: run.total(),
        status: "running".to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/batches",
    params(ListBatchesQuery),
    responses(
        (status = 200, description = "Active run and most recent archived runs", body = BatchListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "batches"
)]
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBatchesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(20).min(MAX_LISTED);
    let runs = state.db.run_repo().recent(limit).await?;
    let total = runs.len();

    let response = BatchListResponse {
        active_run: state.orchestrator.active_run(),
        runs: runs.into_iter().map(BatchSummaryResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/batches/{id}",
    params(
        ("id" = Uuid, Path, description = "Batch run ID")
    ),
    responses(
        (status = 200, description = "Run state with every job", body = BatchRunResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "batches"
)]
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(handle) = state.run(id) {
        return Ok(axum::Json(BatchRunResponse::from(handle.snapshot())).into_response());
    }

    match state.db.run_repo().find(id).await? {
        Some(run) => Ok(axum::Json(BatchRunResponse::from(run)).into_response()),
        None => Ok(not_found(format!("Batch run not found: {id}"))),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/batches/{id}",
    params(
        ("id" = Uuid, Path, description = "Batch run ID")
    ),
    responses(
        (status = 202, description = "Cancellation requested; running jobs finish", body = BatchRunResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Run already finished", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "batches"
)]
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let finished = match state.run(id) {
        Some(handle) if !handle.is_finished() => {
            handle.cancel();
            tracing::info!(run_id = %id, "Batch run cancellation requested over HTTP");
            let response = BatchRunResponse::from(handle.snapshot());
            return Ok((StatusCode::ACCEPTED, axum::Json(response)).into_response());
        }
        Some(_) => true,
        None => state.db.run_repo().find(id).await?.is_some(),
    };

    if finished {
        Ok(error_response(
            StatusCode::CONFLICT,
            "conflict",
            format!("Batch run {id} has already finished"),
        ))
    } else {
        Ok(not_found(format!("Batch run not found: {id}")))
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

fn build_query(params: ProductsQuery) -> Result<ProductQuery, String> {
    let mut query = ProductQuery::new();
    if let Some(platform) = params.platform {
        query = query.with_platform(platform);
    }
    if let Some(category) = params.category {
        query = query.with_category(category);
    }
    if let Some(name) = params.name {
        query = query.with_name_contains(name);
    }
    if let Some(description) = params.description {
        query = query.with_description_contains(description);
    }
    if params.min_price.is_some() || params.max_price.is_some() {
        query = query.with_price_range(params.min_price, params.max_price);
    }
    if let Some(sort) = params.sort {
        let key: SortKey = sort.parse()?;
        let order: SortOrder = params.order.as_deref().unwrap_or("asc").parse()?;
        query = query.sorted_by(key, order);
    } else if params.order.is_some() {
        return Err("order requires sort".to_string());
    }
    Ok(query.with_limit(params.limit.unwrap_or(50).min(MAX_PRODUCTS)))
}

#[utoipa::path(
    get,
    path = "/v1/products",
    params(ProductsQuery),
    responses(
        (status = 200, description = "Matching product records", body = ProductListResponse),
        (status = 400, description = "Bad sort key or order", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProductsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = match build_query(params) {
        Ok(query) => query,
        Err(message) => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                message,
            ));
        }
    };

    let products = state.db.product_repo().query(&query).await?;
    let total = products.len();

    let response = ProductListResponse {
        products: products.into_iter().map(ProductResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/products/{id}",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Product record", body = ProductResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.product_repo().get(id).await? {
        Some(record) => Ok(axum::Json(ProductResponse::from(record)).into_response()),
        None => Ok(not_found(format!("Product not found: {id}"))),
    }
}

#[utoipa::path(
    get,
    path = "/v1/products/{id}/history",
    params(
        ("id" = Uuid, Path, description = "Product ID"),
        HistoryQuery,
    ),
    responses(
        (status = 200, description = "Price and stock changes, newest first", body = HistoryResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "products"
)]
pub async fn product_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.product_repo();
    if repo.get(id).await?.is_none() {
        return Ok(not_found(format!("Product not found: {id}")));
    }

    let limit = query.limit.unwrap_or(20).min(MAX_LISTED);
    let changes = repo.history(id, limit).await?;
    let total = changes.len();

    let response = HistoryResponse {
        product_id: id,
        changes: changes.into_iter().map(ChangeResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response).into_response())
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Service unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(HealthResponse {
                status: "healthy",
                database: "connected",
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(HealthResponse {
                status: "unhealthy",
                database: "disconnected",
            }),
        ),
    }
}
