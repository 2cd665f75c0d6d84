//! Edit checks (the data validation plan) for the vital signs form.
//!
//! Checks never fail: they return findings. An entry with any [`Severity::Error`] finding
//! cannot be submitted; warnings are reminders only.

use crate::constants::{
    DIASTOLIC_BP_RANGE, SYSTOLIC_BP_RANGE, VAR_ADVERSE_EVENT, VAR_DIASTOLIC_BP, VAR_SUBJECT_ID,
    VAR_SYSTOLIC_BP, VAR_VISIT_DATE,
};
use crate::{CdmError, CdmResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One vital signs form as entered at the site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalsEntry {
    pub subject_id: String,
    #[serde(default)]
    pub visit_date: Option<NaiveDate>,
    pub systolic_bp: i32,
    pub diastolic_bp: i32,
    pub adverse_event: bool,
}

impl VitalsEntry {
    /// `(variable, value)` pairs as they would be written to the audit trail.
    pub fn field_values(&self) -> Vec<(&'static str, String)> {
        let mut values = vec![(VAR_SUBJECT_ID, self.subject_id.trim().to_string())];
        if let Some(date) = self.visit_date {
            values.push((VAR_VISIT_DATE, date.format("%Y-%m-%d").to_string()));
        }
        values.push((VAR_SYSTOLIC_BP, self.systolic_bp.to_string()));
        values.push((VAR_DIASTOLIC_BP, self.diastolic_bp.to_string()));
        values.push((
            VAR_ADVERSE_EVENT,
            if self.adverse_event { "Y" } else { "N" }.to_string(),
        ));
        values
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditCheckCode {
    #[serde(rename = "SUBJID_REQUIRED")]
    SubjectRequired,
    #[serde(rename = "SYSBP_RANGE")]
    SystolicRange,
    #[serde(rename = "DIABP_RANGE")]
    DiastolicRange,
    #[serde(rename = "BP_CONSISTENCY")]
    BloodPressureConsistency,
    #[serde(rename = "VISDAT_FUTURE")]
    VisitDateInFuture,
    #[serde(rename = "AE_RECON")]
    AdverseEventReconciliation,
}

impl EditCheckCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubjectRequired => "SUBJID_REQUIRED",
            Self::SystolicRange => "SYSBP_RANGE",
            Self::DiastolicRange => "DIABP_RANGE",
            Self::BloodPressureConsistency => "BP_CONSISTENCY",
            Self::VisitDateInFuture => "VISDAT_FUTURE",
            Self::AdverseEventReconciliation => "AE_RECON",
        }
    }
}

impl std::fmt::Display for EditCheckCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCheckFinding {
    pub code: EditCheckCode,
    pub severity: Severity,
    pub field: String,
    pub message: String,
}

impl EditCheckFinding {
    fn error(code: EditCheckCode, field: &str, message: String) -> Self {
        Self {
            code,
            severity: Severity::Error,
            field: field.to_string(),
            message,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCheckReport {
    pub findings: Vec<EditCheckFinding>,
}

impl EditCheckReport {
    /// No findings at all.
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn blocks_submission(&self) -> bool {
        self.error_count() > 0
    }
}

fn systolic_finding(systolic_bp: i32) -> Option<EditCheckFinding> {
    let (low, high) = SYSTOLIC_BP_RANGE;
    (!(low..=high).contains(&systolic_bp)).then(|| {
        EditCheckFinding::error(
            EditCheckCode::SystolicRange,
            VAR_SYSTOLIC_BP,
            format!("{systolic_bp} mmHg is outside clinical limits ({low}-{high})"),
        )
    })
}

fn diastolic_finding(diastolic_bp: i32) -> Option<EditCheckFinding> {
    let (low, high) = DIASTOLIC_BP_RANGE;
    (!(low..=high).contains(&diastolic_bp)).then(|| {
        EditCheckFinding::error(
            EditCheckCode::DiastolicRange,
            VAR_DIASTOLIC_BP,
            format!("{diastolic_bp} mmHg is outside clinical limits ({low}-{high})"),
        )
    })
}

fn visit_date_finding(visit_date: NaiveDate, today: NaiveDate) -> Option<EditCheckFinding> {
    (visit_date > today).then(|| {
        EditCheckFinding::error(
            EditCheckCode::VisitDateInFuture,
            VAR_VISIT_DATE,
            format!("Visit date {visit_date} is in the future"),
        )
    })
}

fn adverse_event_finding() -> EditCheckFinding {
    EditCheckFinding {
        code: EditCheckCode::AdverseEventReconciliation,
        severity: Severity::Warning,
        field: VAR_ADVERSE_EVENT.to_string(),
        message: "Adverse event reported: complete the AE form".into(),
    }
}

/// Runs every edit check against `entry`. `today` is the site's current date.
pub fn run_edit_checks(entry: &VitalsEntry, today: NaiveDate) -> EditCheckReport {
    let mut findings = Vec::new();

    if entry.subject_id.trim().is_empty() {
        findings.push(EditCheckFinding::error(
            EditCheckCode::SubjectRequired,
            VAR_SUBJECT_ID,
            "Subject ID is required".into(),
        ));
    }

    findings.extend(systolic_finding(entry.systolic_bp));
    findings.extend(diastolic_finding(entry.diastolic_bp));

    if entry.systolic_bp <= entry.diastolic_bp {
        findings.push(EditCheckFinding::error(
            EditCheckCode::BloodPressureConsistency,
            VAR_SYSTOLIC_BP,
            "Systolic value cannot be less than or equal to diastolic".into(),
        ));
    }

    if let Some(visit_date) = entry.visit_date {
        findings.extend(visit_date_finding(visit_date, today));
    }

    if entry.adverse_event {
        findings.push(adverse_event_finding());
    }

    EditCheckReport { findings }
}

/// A single corrected value, normalised to its eCRF type, with the checks that apply to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldCheck {
    pub value: String,
    pub report: EditCheckReport,
}

fn parse_whole_number(variable: &str, value: &str) -> CdmResult<i32> {
    value.parse().map_err(|_| {
        CdmError::InvalidInput(format!("'{value}' is not a whole number for {variable}"))
    })
}

/// Checks one corrected field value against the same rules as [`run_edit_checks`].
///
/// Cross-field rules (`BP_CONSISTENCY`) need the whole form and are not applied here.
///
/// # Errors
///
/// Returns `CdmError::InvalidInput` if the value does not parse as the field's eCRF type, if
/// the field is not a correctable eCRF variable, or if the subject identifier is targeted.
pub fn check_field_value(variable: &str, value: &str, today: NaiveDate) -> CdmResult<FieldCheck> {
    let value = value.trim();
    let mut findings = Vec::new();

    let value = match variable {
        VAR_SYSTOLIC_BP => {
            let systolic_bp = parse_whole_number(variable, value)?;
            findings.extend(systolic_finding(systolic_bp));
            systolic_bp.to_string()
        }
        VAR_DIASTOLIC_BP => {
            let diastolic_bp = parse_whole_number(variable, value)?;
            findings.extend(diastolic_finding(diastolic_bp));
            diastolic_bp.to_string()
        }
        VAR_VISIT_DATE => {
            let visit_date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                CdmError::InvalidInput(format!("'{value}' is not a YYYY-MM-DD date"))
            })?;
            findings.extend(visit_date_finding(visit_date, today));
            visit_date.format("%Y-%m-%d").to_string()
        }
        VAR_ADVERSE_EVENT => match value {
            "Y" => {
                findings.push(adverse_event_finding());
                value.to_string()
            }
            "N" => value.to_string(),
            _ => {
                return Err(CdmError::InvalidInput(format!(
                    "'{value}' is not Y or N for {variable}"
                )))
            }
        },
        VAR_SUBJECT_ID => {
            return Err(CdmError::InvalidInput(
                "subject identifiers cannot be corrected in place".into(),
            ))
        }
        _ => {
            return Err(CdmError::InvalidInput(format!(
                "'{variable}' is not a field of the eCRF"
            )))
        }
    };

    Ok(FieldCheck {
        value,
        report: EditCheckReport { findings },
    })
}

/// The site's calendar date. Hosts resolve this once per request and pass it down.
pub fn site_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
