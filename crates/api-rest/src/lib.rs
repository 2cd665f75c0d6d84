//! # API REST
//!
//! REST API for the CDM workbench.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON request bodies, CORS, status codes)
//!
//! Every endpoint builds a [`ScreenRequest`] and hands it to the shared [`Workbench`].

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use cdm_core::constants::DEFAULT_SUBJECT_COLUMN;
use cdm_core::edit_checks::{site_today, VitalsEntry};
use cdm_core::screens::{ScreenRequest, View};
use cdm_core::{
    CdmError, ColumnPair, DispatchOutcome, NewQuery, Query, QueryStatus, Table, Workbench,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST API handlers.
///
/// The mutex serialises every request that touches the audit store or the query register.
#[derive(Clone)]
pub struct AppState {
    workbench: Arc<Mutex<Workbench>>,
}

impl AppState {
    pub fn new(workbench: Workbench) -> Self {
        Self {
            workbench: Arc::new(Mutex::new(workbench)),
        }
    }
}

type ApiError = (StatusCode, String);

fn api_error(err: CdmError) -> ApiError {
    let status = match &err {
        CdmError::QueryNotFound(_) | CdmError::UnknownTarget(_) => StatusCode::NOT_FOUND,
        CdmError::InvalidInput(_)
        | CdmError::MissingRequiredField { .. }
        | CdmError::MissingKeyValue { .. }
        | CdmError::InvalidQueryTransition { .. }
        | CdmError::SubmissionBlocked(_)
        | CdmError::Text(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("request failed: {:?}", err);
        return (status, "Internal error".into());
    }
    (status, err.to_string())
}

fn dispatch(state: &AppState, request: ScreenRequest) -> Result<DispatchOutcome, ApiError> {
    let mut workbench = state.workbench.lock().map_err(|_| {
        tracing::error!("workbench lock poisoned");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    })?;
    workbench
        .dispatch(request, Utc::now(), site_today())
        .map_err(api_error)
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VitalsReq {
    pub subject_id: String,
    #[serde(default)]
    pub visit_date: Option<NaiveDate>,
    pub systolic_bp: i32,
    pub diastolic_bp: i32,
    #[serde(default)]
    pub adverse_event: bool,
}

impl From<VitalsReq> for VitalsEntry {
    fn from(req: VitalsReq) -> Self {
        VitalsEntry {
            subject_id: req.subject_id,
            visit_date: req.visit_date,
            systolic_bp: req.systolic_bp,
            diastolic_bp: req.diastolic_bp,
            adverse_event: req.adverse_event,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitVitalsReq {
    pub vitals: VitalsReq,
    /// Reason for change recorded on every audit entry.
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CorrectFieldReq {
    pub subject: String,
    pub field: String,
    pub new_value: String,
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RaiseQueryReq {
    #[serde(default)]
    pub subject: Option<String>,
    pub field: String,
    pub issue: String,
}

#[derive(Clone, Copy, Debug, Deserialize, ToSchema)]
pub enum QueryStatusDto {
    Open,
    Answered,
    Closed,
}

impl From<QueryStatusDto> for QueryStatus {
    fn from(dto: QueryStatusDto) -> Self {
        match dto {
            QueryStatusDto::Open => QueryStatus::Open,
            QueryStatusDto::Answered => QueryStatus::Answered,
            QueryStatusDto::Closed => QueryStatus::Closed,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryStatusReq {
    pub status: QueryStatusDto,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CodingReq {
    pub verbatim: String,
}

/// A delimited table already split into cells. The first entry of `columns` names the first cell
/// of each row.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TableDto {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableDto {
    fn into_table(self, name: &str) -> Result<Table, ApiError> {
        Table::new(name, self.columns, self.rows).map_err(api_error)
    }
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct ColumnPairDto {
    pub reference: String,
    pub external: String,
}

impl From<ColumnPairDto> for ColumnPair {
    fn from(dto: ColumnPairDto) -> Self {
        ColumnPair::mapped(dto.reference, dto.external)
    }
}

fn default_key() -> Vec<ColumnPairDto> {
    vec![ColumnPairDto {
        reference: DEFAULT_SUBJECT_COLUMN.into(),
        external: DEFAULT_SUBJECT_COLUMN.into(),
    }]
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LabReconciliationReq {
    pub reference: TableDto,
    pub external: TableDto,
    /// Key columns; defaults to `SUBJID` on both sides.
    #[serde(default = "default_key")]
    pub key: Vec<ColumnPairDto>,
    #[serde(default)]
    pub compare: Vec<ColumnPairDto>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AeReconciliationReq {
    pub reference: TableDto,
    pub safety: TableDto,
    #[serde(default)]
    pub subject_column: Option<ColumnPairDto>,
    pub term_column: ColumnPairDto,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImagingCheckReq {
    pub subject: String,
    pub target: String,
    pub captured: Vec<String>,
    /// Raise a query when views are missing.
    #[serde(default)]
    pub raise_query: bool,
}

/// Response for requests that may change state.
#[derive(Serialize)]
pub struct DispatchRes {
    pub view: View,
    pub raised: Vec<Query>,
    pub audited: usize,
}

impl From<DispatchOutcome> for DispatchRes {
    fn from(outcome: DispatchOutcome) -> Self {
        Self {
            view: outcome.view,
            raised: outcome.raised,
            audited: outcome.audited,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        crf,
        check_vitals,
        submit_vitals,
        correct_field,
        list_queries,
        raise_query,
        update_query_status,
        code_term,
        lab_reconciliation,
        ae_reconciliation,
        imaging_check,
        audit_trail,
        audit_export,
    ),
    components(schemas(
        HealthRes,
        VitalsReq,
        SubmitVitalsReq,
        CorrectFieldReq,
        RaiseQueryReq,
        QueryStatusDto,
        QueryStatusReq,
        CodingReq,
        TableDto,
        ColumnPairDto,
        LabReconciliationReq,
        AeReconciliationReq,
        ImagingCheckReq,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/crf", get(crf))
        .route("/data-entry/check", post(check_vitals))
        .route("/data-entry/submit", post(submit_vitals))
        .route("/data-entry/correct", post(correct_field))
        .route("/queries", get(list_queries).post(raise_query))
        .route("/queries/:id/status", post(update_query_status))
        .route("/coding", post(code_term))
        .route("/reconciliation/lab", post(lab_reconciliation))
        .route("/reconciliation/ae", post(ae_reconciliation))
        .route("/imaging/check", post(imaging_check))
        .route("/audit", get(audit_trail))
        .route("/audit/export", get(audit_export))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint used by monitoring and load balancers.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "CDM REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/crf",
    responses((status = 200, description = "eCRF specification"))
)]
#[axum::debug_handler]
async fn crf(State(state): State<AppState>) -> Result<Json<View>, ApiError> {
    Ok(Json(dispatch(&state, ScreenRequest::StudyDesign)?.view))
}

#[utoipa::path(
    post,
    path = "/data-entry/check",
    request_body = VitalsReq,
    responses((status = 200, description = "Edit check findings"))
)]
/// Runs the edit checks without saving anything.
#[axum::debug_handler]
async fn check_vitals(
    State(state): State<AppState>,
    Json(req): Json<VitalsReq>,
) -> Result<Json<View>, ApiError> {
    Ok(Json(
        dispatch(&state, ScreenRequest::CheckVitals(req.into()))?.view,
    ))
}

#[utoipa::path(
    post,
    path = "/data-entry/submit",
    request_body = SubmitVitalsReq,
    responses(
        (status = 200, description = "Entry saved and audited"),
        (status = 400, description = "Edit check errors block the submission")
    )
)]
/// Saves a vitals entry. Each field is written to the audit trail with the given reason.
///
/// # Errors
/// Returns `400 Bad Request` if any edit check reports an error or the reason is blank.
#[axum::debug_handler]
async fn submit_vitals(
    State(state): State<AppState>,
    Json(req): Json<SubmitVitalsReq>,
) -> Result<Json<DispatchRes>, ApiError> {
    let request = ScreenRequest::SubmitVitals {
        entry: req.vitals.into(),
        reason: req.reason,
    };
    Ok(Json(dispatch(&state, request)?.into()))
}

#[utoipa::path(
    post,
    path = "/data-entry/correct",
    request_body = CorrectFieldReq,
    responses(
        (status = 200, description = "Correction audited"),
        (status = 400, description = "Unknown field, missing reason or failed edit check")
    )
)]
#[axum::debug_handler]
async fn correct_field(
    State(state): State<AppState>,
    Json(req): Json<CorrectFieldReq>,
) -> Result<Json<DispatchRes>, ApiError> {
    let request = ScreenRequest::CorrectField {
        subject: req.subject,
        field: req.field,
        new_value: req.new_value,
        reason: req.reason,
    };
    Ok(Json(dispatch(&state, request)?.into()))
}

#[utoipa::path(
    get,
    path = "/queries",
    responses((status = 200, description = "All queries with aging"))
)]
#[axum::debug_handler]
async fn list_queries(State(state): State<AppState>) -> Result<Json<View>, ApiError> {
    Ok(Json(dispatch(&state, ScreenRequest::ListQueries)?.view))
}

#[utoipa::path(
    post,
    path = "/queries",
    request_body = RaiseQueryReq,
    responses(
        (status = 201, description = "Query raised"),
        (status = 400, description = "Blank field or issue")
    )
)]
#[axum::debug_handler]
async fn raise_query(
    State(state): State<AppState>,
    Json(req): Json<RaiseQueryReq>,
) -> Result<(StatusCode, Json<DispatchRes>), ApiError> {
    let new_query = NewQuery::new(req.subject, &req.field, &req.issue).map_err(api_error)?;
    let outcome = dispatch(&state, ScreenRequest::RaiseQuery(new_query))?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

#[utoipa::path(
    post,
    path = "/queries/{id}/status",
    request_body = QueryStatusReq,
    params(("id" = String, Path, description = "Query id, e.g. Q1")),
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Transition not allowed"),
        (status = 404, description = "Unknown query")
    )
)]
#[axum::debug_handler]
async fn update_query_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<QueryStatusReq>,
) -> Result<Json<DispatchRes>, ApiError> {
    let request = ScreenRequest::UpdateQuery {
        id,
        status: req.status.into(),
    };
    Ok(Json(dispatch(&state, request)?.into()))
}

#[utoipa::path(
    post,
    path = "/coding",
    request_body = CodingReq,
    responses((status = 200, description = "Coded or uncoded term"))
)]
#[axum::debug_handler]
async fn code_term(
    State(state): State<AppState>,
    Json(req): Json<CodingReq>,
) -> Result<Json<View>, ApiError> {
    let request = ScreenRequest::CodeTerm {
        verbatim: req.verbatim,
    };
    Ok(Json(dispatch(&state, request)?.view))
}

#[utoipa::path(
    post,
    path = "/reconciliation/lab",
    request_body = LabReconciliationReq,
    responses(
        (status = 200, description = "Reconciliation rows and summary"),
        (status = 400, description = "Malformed table or missing key column")
    )
)]
#[axum::debug_handler]
async fn lab_reconciliation(
    State(state): State<AppState>,
    Json(req): Json<LabReconciliationReq>,
) -> Result<Json<View>, ApiError> {
    let request = ScreenRequest::LabReconciliation {
        edc: req.reference.into_table("reference")?,
        lab: req.external.into_table("external")?,
        key: req.key.into_iter().map(ColumnPair::from).collect(),
        compare: req.compare.into_iter().map(ColumnPair::from).collect(),
    };
    Ok(Json(dispatch(&state, request)?.view))
}

#[utoipa::path(
    post,
    path = "/reconciliation/ae",
    request_body = AeReconciliationReq,
    responses(
        (status = 200, description = "AE reconciliation rows and summary"),
        (status = 400, description = "Malformed table or missing column")
    )
)]
#[axum::debug_handler]
async fn ae_reconciliation(
    State(state): State<AppState>,
    Json(req): Json<AeReconciliationReq>,
) -> Result<Json<View>, ApiError> {
    let subject_column = req
        .subject_column
        .map(ColumnPair::from)
        .unwrap_or_else(|| ColumnPair::same(DEFAULT_SUBJECT_COLUMN));
    let request = ScreenRequest::AeReconciliation {
        edc: req.reference.into_table("reference")?,
        safety: req.safety.into_table("safety")?,
        subject_column,
        term_column: req.term_column.into(),
    };
    Ok(Json(dispatch(&state, request)?.view))
}

#[utoipa::path(
    post,
    path = "/imaging/check",
    request_body = ImagingCheckReq,
    responses(
        (status = 200, description = "Checklist report, plus any raised query"),
        (status = 404, description = "No protocol for the target")
    )
)]
#[axum::debug_handler]
async fn imaging_check(
    State(state): State<AppState>,
    Json(req): Json<ImagingCheckReq>,
) -> Result<Json<DispatchRes>, ApiError> {
    let request = ScreenRequest::ImagingCheck {
        subject: req.subject,
        target: req.target,
        captured: req.captured,
        raise_query: req.raise_query,
    };
    Ok(Json(dispatch(&state, request)?.into()))
}

#[utoipa::path(
    get,
    path = "/audit",
    responses((status = 200, description = "Audit trail in append order"))
)]
#[axum::debug_handler]
async fn audit_trail(State(state): State<AppState>) -> Result<Json<View>, ApiError> {
    Ok(Json(dispatch(&state, ScreenRequest::AuditTrail)?.view))
}

#[utoipa::path(
    get,
    path = "/audit/export",
    responses((status = 200, description = "Audit trail as CSV", body = String, content_type = "text/csv"))
)]
#[axum::debug_handler]
async fn audit_export(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    match dispatch(&state, ScreenRequest::AuditExport)?.view {
        View::AuditExport { csv } => Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"audit_trail.csv\"",
                ),
            ],
            csv,
        )),
        other => {
            tracing::error!("audit export rendered unexpected view: {:?}", other);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into()))
        }
    }
}
