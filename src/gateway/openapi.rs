//! OpenAPI / Swagger UI documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::ApiErrorBody;
use crate::transfer::{
    ExternalTransferRequest, HistoryEntry, InternalTransferRequest, TransferSummary,
};

/// JWT bearer security scheme
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Foxya Ledger API",
        version = "1.0.0",
        description = "Wallet ledger and transfer engine: internal transfers, external withdrawals and transfer history."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::create_internal_transfer,
        crate::gateway::handlers::create_external_transfer,
        crate::gateway::handlers::get_history,
        crate::gateway::handlers::get_transfer,
    ),
    components(
        schemas(
            HealthResponse,
            ApiErrorBody,
            InternalTransferRequest,
            ExternalTransferRequest,
            TransferSummary,
            HistoryEntry,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Transfer", description = "Internal transfers and external withdrawals (auth required)"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Foxya Ledger API");
        assert_eq!(spec.info.version, "1.0.0");
    }

    #[test]
    fn test_transfer_endpoints_registered() {
        let spec = ApiDoc::openapi();
        let paths = spec.paths;
        assert!(paths.paths.contains_key("/api/v1/health"));
        assert!(paths.paths.contains_key("/api/v1/transfers/internal"));
        assert!(paths.paths.contains_key("/api/v1/transfers/external"));
        assert!(paths.paths.contains_key("/api/v1/transfers/history"));
        assert!(paths.paths.contains_key("/api/v1/transfers/{transfer_id}"));
    }

    #[test]
    fn test_security_scheme_registered() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("should have components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
