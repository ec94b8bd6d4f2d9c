use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "shelfscan API",
        version = "0.1.0",
        description = "Batch product collection: submit runs, follow their progress, query collected products and their price history."
    ),
    paths(
        crate::routes::submit_batch,
        crate::routes::list_batches,
        crate::routes::get_batch,
        crate::routes::cancel_batch,
        crate::routes::list_products,
        crate::routes::get_product,
        crate::routes::product_history,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::SubmitBatchRequest,
        crate::dto::SubmitBatchResponse,
        crate::dto::JobResponse,
        crate::dto::BatchSummaryResponse,
        crate::dto::BatchRunResponse,
        crate::dto::BatchListResponse,
        crate::dto::ProductOptionResponse,
        crate::dto::ProductResponse,
        crate::dto::ProductListResponse,
        crate::dto::ChangeResponse,
        crate::dto::HistoryResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "batches", description = "Batch run submission and progress"),
        (name = "products", description = "Collected products and change history"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Admin token. Set via SHELFSCAN_ADMIN_TOKEN environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
