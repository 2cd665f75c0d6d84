//! Workbench screens.
//!
//! Each screen is a variant of [`ScreenRequest`] carrying that screen's input. [`render`] maps a
//! request plus the current data to a [`View`] and a list of [`Effect`]s, and touches nothing
//! itself. [`crate::workbench::Workbench`] applies the effects to the audit store and query
//! register.

use crate::audit::{export_csv, AuditEntry};
use crate::checklist::ChecklistReport;
use crate::coding::{CodingDictionary, CodingResult};
use crate::constants::VAR_SUBJECT_ID;
use crate::crf::CrfSpecification;
use crate::edit_checks::{check_field_value, run_edit_checks, EditCheckReport, VitalsEntry};
use crate::imaging::ImagingProtocol;
use crate::queries::{NewQuery, Query, QueryRegister, QueryStatus};
use crate::reconcile::{reconcile, ColumnPair, ReconcileSpec, Reconciliation, SideLabels};
use crate::table::Table;
use crate::{CdmError, CdmResult};
use cdm_types::NonEmptyText;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// The workbench menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Screen {
    StudyDesign,
    DataEntry,
    QueryManagement,
    MedicalCoding,
    LabReconciliation,
    AeReconciliation,
    ImagingCompleteness,
    AuditTrail,
}

impl Screen {
    pub const ALL: [Screen; 8] = [
        Screen::StudyDesign,
        Screen::DataEntry,
        Screen::QueryManagement,
        Screen::MedicalCoding,
        Screen::LabReconciliation,
        Screen::AeReconciliation,
        Screen::ImagingCompleteness,
        Screen::AuditTrail,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::StudyDesign => "Study Design (eCRF)",
            Self::DataEntry => "Data Entry & Edit Checks",
            Self::QueryManagement => "Query Management",
            Self::MedicalCoding => "Medical Coding",
            Self::LabReconciliation => "Lab Reconciliation",
            Self::AeReconciliation => "SAE/AE Reconciliation",
            Self::ImagingCompleteness => "Imaging Completeness",
            Self::AuditTrail => "Audit Trail",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ScreenRequest {
    StudyDesign,
    /// Live edit checks while the form is being filled in.
    CheckVitals(VitalsEntry),
    SubmitVitals {
        entry: VitalsEntry,
        reason: String,
    },
    CorrectField {
        subject: String,
        field: String,
        new_value: String,
        reason: String,
    },
    ListQueries,
    RaiseQuery(NewQuery),
    UpdateQuery {
        id: String,
        status: QueryStatus,
    },
    CodeTerm {
        verbatim: String,
    },
    LabReconciliation {
        edc: Table,
        lab: Table,
        key: Vec<ColumnPair>,
        compare: Vec<ColumnPair>,
    },
    AeReconciliation {
        edc: Table,
        safety: Table,
        subject_column: ColumnPair,
        term_column: ColumnPair,
    },
    ImagingCheck {
        subject: String,
        target: String,
        captured: Vec<String>,
        raise_query: bool,
    },
    AuditTrail,
    AuditExport,
}

impl ScreenRequest {
    pub fn screen(&self) -> Screen {
        match self {
            Self::StudyDesign => Screen::StudyDesign,
            Self::CheckVitals(_) | Self::SubmitVitals { .. } | Self::CorrectField { .. } => {
                Screen::DataEntry
            }
            Self::ListQueries | Self::RaiseQuery(_) | Self::UpdateQuery { .. } => {
                Screen::QueryManagement
            }
            Self::CodeTerm { .. } => Screen::MedicalCoding,
            Self::LabReconciliation { .. } => Screen::LabReconciliation,
            Self::AeReconciliation { .. } => Screen::AeReconciliation,
            Self::ImagingCheck { .. } => Screen::ImagingCompleteness,
            Self::AuditTrail | Self::AuditExport => Screen::AuditTrail,
        }
    }

    /// Whether rendering needs the audit trail loaded.
    pub fn reads_audit_trail(&self) -> bool {
        matches!(self, Self::AuditTrail | Self::AuditExport)
    }
}

/// Everything a screen may read.
pub struct ScreenData<'a> {
    pub now: DateTime<Utc>,
    /// The site's calendar date, used for date edit checks.
    pub today: NaiveDate,
    pub audit_user: &'a str,
    /// Labels for lab reconciliation.
    pub labels: &'a SideLabels,
    /// Labels for AE reconciliation (reference against the safety database).
    pub safety_labels: &'a SideLabels,
    pub crf: &'a CrfSpecification,
    pub queries: &'a QueryRegister,
    pub dictionary: &'a CodingDictionary,
    pub imaging: &'a ImagingProtocol,
    /// Loaded only for requests where [`ScreenRequest::reads_audit_trail`] is true.
    pub audit_trail: &'a [AuditEntry],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryRow {
    #[serde(flatten)]
    pub query: Query,
    pub aging_days: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    StudyDesign {
        specification: CrfSpecification,
    },
    DataEntry {
        report: EditCheckReport,
        submitted: bool,
    },
    FieldCorrected {
        subject: String,
        field: String,
    },
    Queries {
        queries: Vec<QueryRow>,
    },
    QueryUpdated {
        id: String,
        status: QueryStatus,
    },
    Coding {
        result: CodingResult,
    },
    Reconciliation {
        reconciliation: Reconciliation,
    },
    Imaging {
        subject: String,
        report: ChecklistReport,
    },
    AuditTrail {
        entries: Vec<AuditEntry>,
    },
    AuditExport {
        csv: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    AppendAudit(AuditEntry),
    RaiseQuery(NewQuery),
    TransitionQuery { id: String, status: QueryStatus },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenOutcome {
    pub view: View,
    pub effects: Vec<Effect>,
}

impl ScreenOutcome {
    fn view(view: View) -> Self {
        Self {
            view,
            effects: Vec::new(),
        }
    }
}

pub(crate) fn query_rows(register: &QueryRegister, now: DateTime<Utc>) -> Vec<QueryRow> {
    register
        .list()
        .iter()
        .map(|q| QueryRow {
            query: q.clone(),
            aging_days: q.aging_days(now),
        })
        .collect()
}

fn submit_vitals(
    entry: &VitalsEntry,
    reason: &str,
    data: &ScreenData<'_>,
) -> CdmResult<ScreenOutcome> {
    let report = run_edit_checks(entry, data.today);
    if report.blocks_submission() {
        return Ok(ScreenOutcome::view(View::DataEntry {
            report,
            submitted: false,
        }));
    }

    let subject = entry.subject_id.trim();
    let effects = entry
        .field_values()
        .into_iter()
        .filter(|(field, _)| *field != VAR_SUBJECT_ID)
        .map(|(field, value)| {
            AuditEntry::new(data.now, data.audit_user, subject, field, value, reason)
                .map(Effect::AppendAudit)
        })
        .collect::<CdmResult<Vec<_>>>()?;

    Ok(ScreenOutcome {
        view: View::DataEntry {
            report,
            submitted: true,
        },
        effects,
    })
}

fn imaging_check(
    subject: &str,
    target: &str,
    captured: &[String],
    raise_query: bool,
    data: &ScreenData<'_>,
) -> CdmResult<ScreenOutcome> {
    let report = data.imaging.evaluate(target, captured)?;
    let mut effects = Vec::new();

    if raise_query && !report.is_complete() {
        effects.push(Effect::RaiseQuery(NewQuery {
            subject: Some(subject.to_string()),
            field: NonEmptyText::new(report.target.as_str())?,
            issue: NonEmptyText::new(format!(
                "Missing protocol views: {}",
                report.missing.join(", ")
            ))?,
        }));
    }

    Ok(ScreenOutcome {
        view: View::Imaging {
            subject: subject.to_string(),
            report,
        },
        effects,
    })
}

/// Renders `request` against `data`.
///
/// # Errors
///
/// Returns an error for structurally invalid input (malformed tables, unknown imaging
/// targets, unknown query ids, blank audit reasons). Edit check findings are not errors; they
/// appear in the view.
pub fn render(request: &ScreenRequest, data: &ScreenData<'_>) -> CdmResult<ScreenOutcome> {
    tracing::debug!("rendering {}", request.screen().title());

    match request {
        ScreenRequest::StudyDesign => Ok(ScreenOutcome::view(View::StudyDesign {
            specification: data.crf.clone(),
        })),

        ScreenRequest::CheckVitals(entry) => Ok(ScreenOutcome::view(View::DataEntry {
            report: run_edit_checks(entry, data.today),
            submitted: false,
        })),

        ScreenRequest::SubmitVitals { entry, reason } => submit_vitals(entry, reason, data),

        ScreenRequest::CorrectField {
            subject,
            field,
            new_value,
            reason,
        } => {
            let field = field.trim();
            if data.crf.field(field).is_none() {
                return Err(CdmError::InvalidInput(format!(
                    "'{field}' is not a field of the eCRF"
                )));
            }
            let check = check_field_value(field, new_value, data.today)?;
            if check.report.blocks_submission() {
                tracing::warn!(
                    "correction of {field} blocked by {} edit check error(s)",
                    check.report.error_count()
                );
                return Err(CdmError::SubmissionBlocked(check.report.error_count()));
            }
            let entry = AuditEntry::new(
                data.now,
                data.audit_user,
                subject,
                field,
                check.value,
                reason,
            )?;
            Ok(ScreenOutcome {
                view: View::FieldCorrected {
                    subject: entry.subject().to_string(),
                    field: entry.field().to_string(),
                },
                effects: vec![Effect::AppendAudit(entry)],
            })
        }

        ScreenRequest::ListQueries => Ok(ScreenOutcome::view(View::Queries {
            queries: query_rows(data.queries, data.now),
        })),

        ScreenRequest::RaiseQuery(new_query) => Ok(ScreenOutcome {
            view: View::Queries {
                queries: query_rows(data.queries, data.now),
            },
            effects: vec![Effect::RaiseQuery(new_query.clone())],
        }),

        ScreenRequest::UpdateQuery { id, status } => {
            data.queries.get(id)?;
            Ok(ScreenOutcome {
                view: View::QueryUpdated {
                    id: id.clone(),
                    status: *status,
                },
                effects: vec![Effect::TransitionQuery {
                    id: id.clone(),
                    status: *status,
                }],
            })
        }

        ScreenRequest::CodeTerm { verbatim } => Ok(ScreenOutcome::view(View::Coding {
            result: data.dictionary.code(verbatim),
        })),

        ScreenRequest::LabReconciliation {
            edc,
            lab,
            key,
            compare,
        } => {
            let spec = ReconcileSpec::new(key.clone())?
                .with_compare(compare.clone())
                .with_labels(data.labels.clone());
            Ok(ScreenOutcome::view(View::Reconciliation {
                reconciliation: reconcile(edc, lab, &spec)?,
            }))
        }

        ScreenRequest::AeReconciliation {
            edc,
            safety,
            subject_column,
            term_column,
        } => {
            let spec = ReconcileSpec::new(vec![subject_column.clone()])?
                .with_compare(vec![term_column.clone()])
                .with_labels(data.safety_labels.clone());
            Ok(ScreenOutcome::view(View::Reconciliation {
                reconciliation: reconcile(edc, safety, &spec)?,
            }))
        }

        ScreenRequest::ImagingCheck {
            subject,
            target,
            captured,
            raise_query,
        } => imaging_check(subject, target, captured, *raise_query, data),

        ScreenRequest::AuditTrail => Ok(ScreenOutcome::view(View::AuditTrail {
            entries: data.audit_trail.to_vec(),
        })),

        ScreenRequest::AuditExport => Ok(ScreenOutcome::view(View::AuditExport {
            csv: export_csv(data.audit_trail)?,
        })),
    }
}
