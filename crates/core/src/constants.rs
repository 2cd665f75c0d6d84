//! Constants used throughout the CDM core crate.
//!
//! Clinical limits, default labels and export column names live here so the edit checks, the
//! eCRF specification and the exporters cannot drift apart.

/// Default user recorded on audit entries when none is configured.
pub const DEFAULT_AUDIT_USER: &str = "cdm_user";

/// Default display label for the reference (internal) side of a reconciliation.
pub const DEFAULT_REFERENCE_LABEL: &str = "EDC";

/// Default display label for the external side of a reconciliation.
pub const DEFAULT_EXTERNAL_LABEL: &str = "Lab";

/// Default label for the safety database side of an AE reconciliation.
pub const DEFAULT_SAFETY_LABEL: &str = "Safety";

/// Default column holding the subject identifier in uploaded tables.
pub const DEFAULT_SUBJECT_COLUMN: &str = "SUBJID";

/// Default REST listen address.
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Header row of the audit trail CSV export.
pub const AUDIT_EXPORT_HEADER: [&str; 6] =
    ["Timestamp", "User", "Subject", "Field", "New Value", "Reason"];

/// Version label of the built-in eCRF specification.
pub const CRF_SPEC_VERSION: &str = "1.0";

/// MedDRA release the built-in coding dictionary follows.
pub const MEDDRA_VERSION: &str = "26.1";

/// Systolic blood pressure plausibility range used by `SYSBP_RANGE` (mmHg).
pub const SYSTOLIC_BP_RANGE: (i32, i32) = (70, 200);

/// Diastolic blood pressure range used by `DIABP_RANGE` (mmHg).
pub const DIASTOLIC_BP_RANGE: (i32, i32) = (20, 150);

/// eCRF variable names.
pub const VAR_SUBJECT_ID: &str = "SUBJID";
pub const VAR_VISIT_DATE: &str = "VISDAT";
pub const VAR_SYSTOLIC_BP: &str = "SYSBP";
pub const VAR_DIASTOLIC_BP: &str = "DIABP";
pub const VAR_ADVERSE_EVENT: &str = "AE_YN";
