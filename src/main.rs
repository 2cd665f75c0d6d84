use cdm_api_rest::{router, AppState};
use cdm_core::{CdmConfig, QueryRegister, RawConfig, Workbench};
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the CDM workbench.
///
/// Serves the REST API with the demo query register seeded.
///
/// # Environment Variables
/// - `CDM_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CDM_AUDIT_LOG`: Audit trail file; in memory when unset
/// - `CDM_AUDIT_USER`: User recorded on audit entries (default: "cdm_user")
/// - `CDM_IMAGING_PROTOCOLS`: YAML imaging protocol file; built-in protocols when unset
/// - `CDM_REFERENCE_LABEL` / `CDM_EXTERNAL_LABEL`: Reconciliation side labels (default: EDC / Lab)
/// - `CDM_SAFETY_LABEL`: Safety database label in AE reconciliation (default: Safety)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cdm=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = CdmConfig::from_env_values(RawConfig::from_process_env())?;
    let rest_addr = cfg.rest_addr().to_string();
    let workbench =
        Workbench::from_config(cfg)?.with_queries(QueryRegister::seed_demo(Utc::now())?);

    tracing::info!("++ Starting CDM REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, router(AppState::new(workbench))).await?;

    Ok(())
}
