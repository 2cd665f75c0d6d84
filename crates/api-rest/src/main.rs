//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development and debugging. The workspace's main `cdm-run` binary serves the same
//! router and seeds the demo queries.

use cdm_api_rest::{router, AppState};
use cdm_core::{CdmConfig, RawConfig, Workbench};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the CDM REST API server.
///
/// # Environment Variables
/// - `CDM_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `CDM_AUDIT_LOG`: Audit trail file (default: in memory)
/// - `CDM_AUDIT_USER`, `CDM_IMAGING_PROTOCOLS`, `CDM_REFERENCE_LABEL`, `CDM_EXTERNAL_LABEL`,
///   `CDM_SAFETY_LABEL`
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or the audit trail cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cdm_api_rest=info".parse()?)
                .add_directive("cdm_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = CdmConfig::from_env_values(RawConfig::from_process_env())?;
    let addr = cfg.rest_addr().to_string();
    let workbench = Workbench::from_config(cfg)?;

    tracing::info!("-- Starting CDM REST API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(AppState::new(workbench))).await?;

    Ok(())
}
