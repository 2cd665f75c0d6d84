//! eCRF specification: the data-entry schema for the study.

use crate::constants::{
    CRF_SPEC_VERSION, DIASTOLIC_BP_RANGE, VAR_ADVERSE_EVENT, VAR_DIASTOLIC_BP, VAR_SUBJECT_ID,
    VAR_SYSTOLIC_BP, VAR_VISIT_DATE,
};
use crate::{CdmError, CdmResult};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Numeric,
    Date,
    Number,
    Boolean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrfField {
    pub label: String,
    pub variable: String,
    pub field_type: FieldType,
    /// Validation rule shown on the form (e.g. `Required`, `30-250`).
    pub validation: String,
}

impl CrfField {
    fn new(label: &str, variable: &str, field_type: FieldType, validation: String) -> Self {
        Self {
            label: label.to_string(),
            variable: variable.to_string(),
            field_type,
            validation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrfSpecification {
    pub version: String,
    pub fields: Vec<CrfField>,
}

impl CrfSpecification {
    /// Vital signs form, specification v1.0.
    ///
    /// The SYSBP range here is the form-level acceptance range; the tighter plausibility range
    /// lives in the `SYSBP_RANGE` edit check.
    pub fn default_v1() -> Self {
        Self {
            version: CRF_SPEC_VERSION.to_string(),
            fields: vec![
                CrfField::new("Subject ID", VAR_SUBJECT_ID, FieldType::Numeric, "Required".into()),
                CrfField::new("Visit Date", VAR_VISIT_DATE, FieldType::Date, "Current/Past".into()),
                CrfField::new("Systolic BP", VAR_SYSTOLIC_BP, FieldType::Number, "30-250".into()),
                CrfField::new(
                    "Diastolic BP",
                    VAR_DIASTOLIC_BP,
                    FieldType::Number,
                    format!("{}-{}", DIASTOLIC_BP_RANGE.0, DIASTOLIC_BP_RANGE.1),
                ),
                CrfField::new(
                    "Adverse Event?",
                    VAR_ADVERSE_EVENT,
                    FieldType::Boolean,
                    "Required".into(),
                ),
            ],
        }
    }

    pub fn field(&self, variable: &str) -> Option<&CrfField> {
        self.fields.iter().find(|f| f.variable == variable)
    }

    pub fn to_yaml(&self) -> CdmResult<String> {
        serde_yaml::to_string(self).map_err(CdmError::YamlSerialization)
    }
}
