//! # CDM Core
//!
//! Core logic for the clinical data management workbench.
//!
//! This crate contains pure data operations and the append-only audit trail:
//! - Outer-join reconciliation of a reference dataset (EDC) against an external one (lab, safety)
//! - Required-item checklists, including imaging protocol completeness
//! - eCRF definition, edit checks, query management and medical coding
//! - Screen dispatch for the workbench, with effects applied by [`workbench::Workbench`]
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `api-rest` and `cli`.

pub mod audit;
pub mod checklist;
pub mod coding;
pub mod config;
pub mod constants;
pub mod crf;
pub mod edit_checks;
pub mod error;
pub mod imaging;
pub mod queries;
pub mod reconcile;
pub mod screens;
pub mod table;
pub mod validation;
pub mod workbench;

pub use error::{CdmError, CdmResult};

pub use audit::{export_csv, AuditEntry, AuditStore, InMemoryAuditStore, JsonlAuditStore};
pub use checklist::{Checklist, ChecklistReport};
pub use coding::{CodingDictionary, CodingResult};
pub use config::{CdmConfig, RawConfig};
pub use imaging::ImagingProtocol;
pub use queries::{NewQuery, Query, QueryRegister, QueryStatus};
pub use reconcile::{
    reconcile, ColumnPair, ReconcileSpec, Reconciliation, ReconciliationStatus, SideLabels,
};
pub use table::Table;
pub use workbench::{DispatchOutcome, Workbench};
