//! Reference-vs-external reconciliation.
//!
//! Pairs the rows of two tables (for example an EDC listing and a central lab extract) by a
//! shared key and classifies every key into exactly one of three outcomes:
//!
//! - [`ReconciliationStatus::Match`]: the key is present on both sides
//! - [`ReconciliationStatus::MissingInExternal`]: only the reference side has it
//! - [`ReconciliationStatus::MissingInReference`]: only the external side has it
//!
//! The output has one row per key in `keys(left) ∪ keys(right)`, in ascending key order, so the
//! same inputs always produce the same output.
//!
//! Classification is presence-only. When compare columns are requested, value differences on
//! matched rows are reported in [`ReconciliationRow::discrepancies`] without changing the status.
//!
//! Keys are expected to be unique per table. When a key repeats, its first row represents it and
//! the repeats are counted in the summary.

use crate::constants::{DEFAULT_EXTERNAL_LABEL, DEFAULT_REFERENCE_LABEL};
use crate::table::{RecordFields, Table};
use crate::{CdmError, CdmResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tri-state outcome for one reconciliation key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Match,
    MissingInExternal,
    MissingInReference,
}

impl ReconciliationStatus {
    /// Human-readable status using the configured side labels, e.g. "Missing in Lab".
    pub fn describe(&self, labels: &SideLabels) -> String {
        match self {
            Self::Match => "Match".to_string(),
            Self::MissingInExternal => format!("Missing in {}", labels.external),
            Self::MissingInReference => format!("Missing in {}", labels.reference),
        }
    }
}

/// Display names for the two sides of a reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideLabels {
    pub reference: String,
    pub external: String,
}

impl SideLabels {
    pub fn new(reference: impl Into<String>, external: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            external: external.into(),
        }
    }
}

impl Default for SideLabels {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_LABEL, DEFAULT_EXTERNAL_LABEL)
    }
}

/// A column on the reference side and its counterpart on the external side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPair {
    pub reference: String,
    pub external: String,
}

impl ColumnPair {
    /// Same column name on both sides.
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            reference: name.clone(),
            external: name,
        }
    }

    pub fn mapped(reference: impl Into<String>, external: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            external: external.into(),
        }
    }
}

/// What to join on and what to compare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileSpec {
    key: Vec<ColumnPair>,
    compare: Vec<ColumnPair>,
    labels: SideLabels,
}

impl ReconcileSpec {
    /// Creates a spec joining on `key` (one pair per key part, e.g. subject then visit).
    pub fn new(key: Vec<ColumnPair>) -> CdmResult<Self> {
        if key.is_empty() {
            return Err(CdmError::InvalidInput(
                "reconciliation needs at least one key column".into(),
            ));
        }
        Ok(Self {
            key,
            compare: Vec::new(),
            labels: SideLabels::default(),
        })
    }

    /// Joins on a single column that has the same name in both tables.
    pub fn on(column: impl Into<String>) -> Self {
        Self {
            key: vec![ColumnPair::same(column)],
            compare: Vec::new(),
            labels: SideLabels::default(),
        }
    }

    pub fn with_compare(mut self, compare: Vec<ColumnPair>) -> Self {
        self.compare = compare;
        self
    }

    pub fn with_labels(mut self, labels: SideLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn labels(&self) -> &SideLabels {
        &self.labels
    }
}

/// The (possibly composite) key of a reconciliation row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationKey(Vec<String>);

impl ReconciliationKey {
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for ReconciliationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" / "))
    }
}

/// A compare column whose values differ between the paired records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiscrepancy {
    pub reference_field: String,
    pub external_field: String,
    pub reference_value: String,
    pub external_value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRow {
    pub key: ReconciliationKey,
    pub reference: Option<RecordFields>,
    pub external: Option<RecordFields>,
    pub status: ReconciliationStatus,
    pub discrepancies: Vec<FieldDiscrepancy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub matched: usize,
    pub missing_in_external: usize,
    pub missing_in_reference: usize,
    pub matched_with_discrepancies: usize,
    pub duplicate_reference_rows: usize,
    pub duplicate_external_rows: usize,
}

impl ReconciliationSummary {
    pub fn total(&self) -> usize {
        self.matched + self.missing_in_external + self.missing_in_reference
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub labels: SideLabels,
    pub rows: Vec<ReconciliationRow>,
    pub summary: ReconciliationSummary,
}

impl Reconciliation {
    /// Rows with the given status, in output order.
    pub fn with_status(
        &self,
        status: ReconciliationStatus,
    ) -> impl Iterator<Item = &ReconciliationRow> {
        self.rows.iter().filter(move |r| r.status == status)
    }
}

struct SideIndex {
    first_row: BTreeMap<ReconciliationKey, usize>,
    duplicates: usize,
}

fn index_side(table: &Table, key_columns: &[(usize, &str)]) -> CdmResult<SideIndex> {
    let mut first_row = BTreeMap::new();
    let mut duplicates = 0;

    for row in 0..table.len() {
        let mut parts = Vec::with_capacity(key_columns.len());
        for (column, field) in key_columns {
            let value = table.cell(row, *column).unwrap_or("").trim();
            if value.is_empty() {
                return Err(CdmError::MissingKeyValue {
                    table: table.name().to_string(),
                    row: row + 1,
                    field: (*field).to_string(),
                });
            }
            parts.push(value.to_string());
        }

        let key = ReconciliationKey(parts);
        if first_row.contains_key(&key) {
            tracing::warn!(
                "{} table repeats key '{}' at row {}; keeping the first occurrence",
                table.name(),
                key,
                row + 1
            );
            duplicates += 1;
        } else {
            first_row.insert(key, row);
        }
    }

    Ok(SideIndex {
        first_row,
        duplicates,
    })
}

/// Reconciles `reference` against `external` according to `spec`.
///
/// # Errors
///
/// - [`CdmError::MissingRequiredField`] if a key or compare column is absent from either table.
/// - [`CdmError::MissingKeyValue`] if any row has an empty key cell.
pub fn reconcile(
    reference: &Table,
    external: &Table,
    spec: &ReconcileSpec,
) -> CdmResult<Reconciliation> {
    let mut reference_keys = Vec::with_capacity(spec.key.len());
    let mut external_keys = Vec::with_capacity(spec.key.len());
    for pair in &spec.key {
        reference_keys.push((reference.require_column(&pair.reference)?, pair.reference.as_str()));
        external_keys.push((external.require_column(&pair.external)?, pair.external.as_str()));
    }

    let mut compare_columns = Vec::with_capacity(spec.compare.len());
    for pair in &spec.compare {
        compare_columns.push((
            pair,
            reference.require_column(&pair.reference)?,
            external.require_column(&pair.external)?,
        ));
    }

    let reference_index = index_side(reference, &reference_keys)?;
    let external_index = index_side(external, &external_keys)?;

    let all_keys: BTreeSet<&ReconciliationKey> = reference_index
        .first_row
        .keys()
        .chain(external_index.first_row.keys())
        .collect();

    let mut summary = ReconciliationSummary {
        duplicate_reference_rows: reference_index.duplicates,
        duplicate_external_rows: external_index.duplicates,
        ..Default::default()
    };
    let mut rows = Vec::with_capacity(all_keys.len());

    for key in all_keys {
        let reference_row = reference_index.first_row.get(key).copied();
        let external_row = external_index.first_row.get(key).copied();

        let (status, discrepancies) = match (reference_row, external_row) {
            (Some(r), Some(e)) => {
                let discrepancies: Vec<FieldDiscrepancy> = compare_columns
                    .iter()
                    .filter_map(|(pair, rc, ec)| {
                        let reference_value = reference.cell(r, *rc).unwrap_or("").trim();
                        let external_value = external.cell(e, *ec).unwrap_or("").trim();
                        (reference_value != external_value).then(|| FieldDiscrepancy {
                            reference_field: pair.reference.clone(),
                            external_field: pair.external.clone(),
                            reference_value: reference_value.to_string(),
                            external_value: external_value.to_string(),
                        })
                    })
                    .collect();
                summary.matched += 1;
                if !discrepancies.is_empty() {
                    summary.matched_with_discrepancies += 1;
                }
                (ReconciliationStatus::Match, discrepancies)
            }
            (Some(_), None) => {
                summary.missing_in_external += 1;
                (ReconciliationStatus::MissingInExternal, Vec::new())
            }
            (None, Some(_)) => {
                summary.missing_in_reference += 1;
                (ReconciliationStatus::MissingInReference, Vec::new())
            }
            // Every key came from at least one index.
            (None, None) => continue,
        };

        rows.push(ReconciliationRow {
            key: key.clone(),
            reference: reference_row.and_then(|r| reference.record(r)),
            external: external_row.and_then(|e| external.record(e)),
            status,
            discrepancies,
        });
    }

    tracing::debug!(
        "reconciled {} vs {}: {} match, {} missing in {}, {} missing in {}",
        reference.name(),
        external.name(),
        summary.matched,
        summary.missing_in_external,
        spec.labels.external,
        summary.missing_in_reference,
        spec.labels.reference
    );

    Ok(Reconciliation {
        labels: spec.labels.clone(),
        rows,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn subjects(name: &str, ids: &[&str]) -> Table {
        Table::new(
            name,
            vec!["SUBJID".into()],
            ids.iter().map(|id| vec![id.to_string()]).collect(),
        )
        .unwrap()
    }

    fn statuses(result: &Reconciliation) -> Vec<(String, ReconciliationStatus)> {
        result
            .rows
            .iter()
            .map(|r| (r.key.to_string(), r.status))
            .collect()
    }

    #[test]
    fn classifies_lab_example() {
        let edc = subjects("EDC", &["SUB-001", "SUB-002", "SUB-003"]);
        let lab = subjects("Lab", &["SUB-001", "SUB-003", "SUB-004"]);

        let result = reconcile(&edc, &lab, &ReconcileSpec::on("SUBJID")).unwrap();

        assert_eq!(
            statuses(&result),
            vec![
                ("SUB-001".to_string(), ReconciliationStatus::Match),
                ("SUB-002".to_string(), ReconciliationStatus::MissingInExternal),
                ("SUB-003".to_string(), ReconciliationStatus::Match),
                ("SUB-004".to_string(), ReconciliationStatus::MissingInReference),
            ]
        );
        assert_eq!(result.summary.total(), 4);

        let labels = SideLabels::default();
        assert_eq!(result.rows[1].status.describe(&labels), "Missing in Lab");
        assert_eq!(result.rows[3].status.describe(&labels), "Missing in EDC");
    }

    #[test]
    fn empty_reference_marks_everything_missing_in_reference() {
        let edc = subjects("EDC", &[]);
        let lab = subjects("Lab", &["SUB-010", "SUB-011"]);

        let result = reconcile(&edc, &lab, &ReconcileSpec::on("SUBJID")).unwrap();

        assert_eq!(result.rows.len(), 2);
        assert!(result
            .rows
            .iter()
            .all(|r| r.status == ReconciliationStatus::MissingInReference));
        assert!(result.rows.iter().all(|r| r.reference.is_none()));
    }

    #[test]
    fn missing_key_column_is_reported() {
        let edc = subjects("EDC", &["SUB-001"]);
        let lab = Table::new("Lab", vec!["PATIENT".into()], vec![vec!["SUB-001".into()]])
            .unwrap();

        let err = reconcile(&edc, &lab, &ReconcileSpec::on("SUBJID")).unwrap_err();
        assert!(matches!(
            err,
            CdmError::MissingRequiredField { ref table, ref field } if table == "Lab" && field == "SUBJID"
        ));
    }

    #[test]
    fn empty_key_value_is_reported() {
        let edc = subjects("EDC", &["SUB-001", "  "]);
        let lab = subjects("Lab", &["SUB-001"]);

        let err = reconcile(&edc, &lab, &ReconcileSpec::on("SUBJID")).unwrap_err();
        assert!(matches!(err, CdmError::MissingKeyValue { row: 2, .. }));
    }

    #[test]
    fn mapped_composite_key_joins_on_subject_and_visit() {
        let edc = Table::new(
            "EDC",
            vec!["SUBJID".into(), "VISIT".into()],
            vec![
                vec!["SUB-001".into(), "Screening".into()],
                vec!["SUB-001".into(), "Week 4".into()],
            ],
        )
        .unwrap();
        let lab = Table::new(
            "Lab",
            vec!["PATIENT".into(), "VISITNAME".into()],
            vec![
                vec!["SUB-001".into(), "Screening".into()],
                vec!["SUB-001".into(), "Unscheduled".into()],
            ],
        )
        .unwrap();
        let spec = ReconcileSpec::new(vec![
            ColumnPair::mapped("SUBJID", "PATIENT"),
            ColumnPair::mapped("VISIT", "VISITNAME"),
        ])
        .unwrap();

        let result = reconcile(&edc, &lab, &spec).unwrap();

        assert_eq!(
            statuses(&result),
            vec![
                ("SUB-001 / Screening".to_string(), ReconciliationStatus::Match),
                (
                    "SUB-001 / Unscheduled".to_string(),
                    ReconciliationStatus::MissingInReference
                ),
                ("SUB-001 / Week 4".to_string(), ReconciliationStatus::MissingInExternal),
            ]
        );
    }

    #[test]
    fn compare_columns_report_discrepancies_without_changing_status() {
        let edc = Table::new(
            "EDC",
            vec!["SUBJID".into(), "AETERM".into()],
            vec![
                vec!["SUB-001".into(), "Headache".into()],
                vec!["SUB-002".into(), "Nausea".into()],
            ],
        )
        .unwrap();
        let safety = Table::new(
            "Safety",
            vec!["SUBJID".into(), "EVENT".into()],
            vec![
                vec!["SUB-001".into(), "Headache ".into()],
                vec!["SUB-002".into(), "Vomiting".into()],
            ],
        )
        .unwrap();
        let spec = ReconcileSpec::on("SUBJID")
            .with_compare(vec![ColumnPair::mapped("AETERM", "EVENT")])
            .with_labels(SideLabels::new("EDC", "Safety"));

        let result = reconcile(&edc, &safety, &spec).unwrap();

        assert!(result
            .rows
            .iter()
            .all(|r| r.status == ReconciliationStatus::Match));
        assert!(result.rows[0].discrepancies.is_empty());
        assert_eq!(
            result.rows[1].discrepancies,
            vec![FieldDiscrepancy {
                reference_field: "AETERM".into(),
                external_field: "EVENT".into(),
                reference_value: "Nausea".into(),
                external_value: "Vomiting".into(),
            }]
        );
        assert_eq!(result.summary.matched_with_discrepancies, 1);
    }

    #[test]
    fn missing_compare_column_is_reported() {
        let edc = subjects("EDC", &["SUB-001"]);
        let lab = subjects("Lab", &["SUB-001"]);
        let spec = ReconcileSpec::on("SUBJID").with_compare(vec![ColumnPair::same("LBORRES")]);

        let err = reconcile(&edc, &lab, &spec).unwrap_err();
        assert!(matches!(err, CdmError::MissingRequiredField { ref field, .. } if field == "LBORRES"));
    }

    #[test]
    fn duplicate_keys_keep_first_row_and_are_counted() {
        let edc = Table::new(
            "EDC",
            vec!["SUBJID".into(), "VISIT".into()],
            vec![
                vec!["SUB-001".into(), "Screening".into()],
                vec!["SUB-001".into(), "Week 4".into()],
            ],
        )
        .unwrap();
        let lab = subjects("Lab", &["SUB-001"]);

        let result = reconcile(&edc, &lab, &ReconcileSpec::on("SUBJID")).unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.summary.duplicate_reference_rows, 1);
        let reference = result.rows[0].reference.as_ref().unwrap();
        assert_eq!(reference.get("VISIT").map(String::as_str), Some("Screening"));
    }

    #[test]
    fn new_rejects_empty_key() {
        assert!(matches!(
            ReconcileSpec::new(vec![]),
            Err(CdmError::InvalidInput(_))
        ));
    }

    fn partitioned_keys() -> impl Strategy<Value = (Vec<String>, Vec<u8>)> {
        proptest::collection::btree_set("SUB-[0-9]{4}", 0..40).prop_flat_map(|keys| {
            let n = keys.len();
            (
                Just(keys.into_iter().collect::<Vec<_>>()),
                proptest::collection::vec(0u8..3, n),
            )
        })
    }

    proptest! {
        #[test]
        fn counts_follow_partition((keys, sides) in partitioned_keys()) {
            // 0 = reference only, 1 = external only, 2 = both
            let mut left = Vec::new();
            let mut right = Vec::new();
            for (key, side) in keys.iter().zip(&sides) {
                if *side != 1 { left.push(vec![key.clone()]); }
                if *side != 0 { right.push(vec![key.clone()]); }
            }
            let edc = Table::new("EDC", vec!["SUBJID".into()], left).unwrap();
            let lab = Table::new("Lab", vec!["SUBJID".into()], right).unwrap();

            let result = reconcile(&edc, &lab, &ReconcileSpec::on("SUBJID")).unwrap();

            let count = |s: u8| sides.iter().filter(|x| **x == s).count();
            prop_assert_eq!(result.summary.missing_in_external, count(0));
            prop_assert_eq!(result.summary.missing_in_reference, count(1));
            prop_assert_eq!(result.summary.matched, count(2));
            prop_assert_eq!(result.rows.len(), keys.len());
        }

        #[test]
        fn reconcile_is_idempotent((keys, sides) in partitioned_keys()) {
            let mut left = Vec::new();
            let mut right = Vec::new();
            for (key, side) in keys.iter().zip(&sides).rev() {
                if *side != 1 { left.push(vec![key.clone()]); }
                if *side != 0 { right.push(vec![key.clone()]); }
            }
            let edc = Table::new("EDC", vec!["SUBJID".into()], left).unwrap();
            let lab = Table::new("Lab", vec!["SUBJID".into()], right).unwrap();
            let spec = ReconcileSpec::on("SUBJID");

            let first = reconcile(&edc, &lab, &spec).unwrap();
            let second = reconcile(&edc, &lab, &spec).unwrap();
            prop_assert_eq!(&first, &second);

            let order: Vec<_> = first.rows.iter().map(|r| r.key.clone()).collect();
            let mut sorted = order.clone();
            sorted.sort();
            prop_assert_eq!(order, sorted);
        }
    }
}
