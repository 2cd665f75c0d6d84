//! The stateful side of the workbench.
//!
//! [`Workbench`] owns the audit store, the query register and the reference data loaded at
//! startup. [`Workbench::dispatch`] renders a screen and then applies its effects, in order.

use crate::audit::{AuditEntry, AuditStore};
use crate::coding::CodingDictionary;
use crate::config::CdmConfig;
use crate::crf::CrfSpecification;
use crate::imaging::ImagingProtocol;
use crate::queries::{Query, QueryRegister};
use crate::screens::{query_rows, render, Effect, ScreenData, ScreenRequest, View};
use crate::{CdmError, CdmResult};
use chrono::{DateTime, NaiveDate, Utc};

/// What a dispatched request produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub view: View,
    /// Queries created by this request, with their assigned ids.
    pub raised: Vec<Query>,
    pub audited: usize,
}

pub struct Workbench {
    config: CdmConfig,
    crf: CrfSpecification,
    dictionary: CodingDictionary,
    imaging: ImagingProtocol,
    queries: QueryRegister,
    audit: Box<dyn AuditStore>,
}

impl Workbench {
    pub fn new(
        config: CdmConfig,
        audit: Box<dyn AuditStore>,
        imaging: ImagingProtocol,
        dictionary: CodingDictionary,
    ) -> Self {
        Self {
            config,
            crf: CrfSpecification::default_v1(),
            dictionary,
            imaging,
            queries: QueryRegister::new(),
            audit,
        }
    }

    /// Opens the configured audit store and loads the imaging protocols.
    pub fn from_config(config: CdmConfig) -> CdmResult<Self> {
        let audit = config.open_audit_store()?;
        let imaging = config.load_imaging_protocol()?;
        let dictionary = CodingDictionary::builtin()?;
        tracing::info!(
            "workbench ready: {} imaging targets, MedDRA {}",
            imaging.targets().count(),
            dictionary.version()
        );
        Ok(Self::new(config, audit, imaging, dictionary))
    }

    /// Replaces the query register, e.g. with [`QueryRegister::seed_demo`].
    pub fn with_queries(mut self, queries: QueryRegister) -> Self {
        self.queries = queries;
        self
    }

    pub fn config(&self) -> &CdmConfig {
        &self.config
    }

    pub fn queries(&self) -> &QueryRegister {
        &self.queries
    }

    pub fn audit_entries(&self) -> CdmResult<Vec<AuditEntry>> {
        self.audit.entries()
    }

    /// Renders `request` and applies its effects.
    ///
    /// `today` is the site's calendar date, resolved once by the caller, and is what date edit
    /// checks compare against. A vitals submission or field correction whose edit checks report
    /// errors fails with [`CdmError::SubmissionBlocked`] and writes nothing. Audit entries from one
    /// request are appended as a single batch before any query effect is applied.
    pub fn dispatch(
        &mut self,
        request: ScreenRequest,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> CdmResult<DispatchOutcome> {
        let trail = if request.reads_audit_trail() {
            self.audit.entries()?
        } else {
            Vec::new()
        };

        let outcome = render(
            &request,
            &ScreenData {
                now,
                today,
                audit_user: self.config.audit_user(),
                labels: self.config.labels(),
                safety_labels: self.config.safety_labels(),
                crf: &self.crf,
                queries: &self.queries,
                dictionary: &self.dictionary,
                imaging: &self.imaging,
                audit_trail: &trail,
            },
        )?;

        if let (ScreenRequest::SubmitVitals { .. }, View::DataEntry { report, submitted: false }) =
            (&request, &outcome.view)
        {
            tracing::warn!("submission blocked by {} edit check error(s)", report.error_count());
            return Err(CdmError::SubmissionBlocked(report.error_count()));
        }

        let mut entries = Vec::new();
        let mut query_effects = Vec::new();
        for effect in outcome.effects {
            match effect {
                Effect::AppendAudit(entry) => entries.push(entry),
                other => query_effects.push(other),
            }
        }
        let audited = entries.len();
        if audited > 0 {
            self.audit.append_all(entries)?;
        }

        let mut raised = Vec::new();
        for effect in query_effects {
            match effect {
                Effect::RaiseQuery(new_query) => {
                    raised.push(self.queries.raise(new_query, now).clone());
                }
                Effect::TransitionQuery { id, status } => {
                    self.queries.transition(&id, status, now)?;
                }
                Effect::AppendAudit(_) => {}
            }
        }

        // The query list reflects the register after this request's own effects.
        let view = match (&request, outcome.view) {
            (ScreenRequest::RaiseQuery(_), View::Queries { .. }) => View::Queries {
                queries: query_rows(&self.queries, now),
            },
            (_, view) => view,
        };

        Ok(DispatchOutcome {
            view,
            raised,
            audited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{InMemoryAuditStore, JsonlAuditStore};
    use crate::edit_checks::VitalsEntry;
    use crate::queries::{NewQuery, QueryStatus};
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn workbench() -> Workbench {
        Workbench::new(
            CdmConfig::default(),
            Box::new(InMemoryAuditStore::new()),
            ImagingProtocol::builtin().unwrap(),
            CodingDictionary::builtin().unwrap(),
        )
        .with_queries(QueryRegister::seed_demo(now()).unwrap())
    }

    fn vitals(systolic_bp: i32) -> VitalsEntry {
        VitalsEntry {
            subject_id: "1001".into(),
            visit_date: NaiveDate::from_ymd_opt(2026, 3, 9),
            systolic_bp,
            diastolic_bp: 80,
            adverse_event: true,
        }
    }

    #[test]
    fn blocked_submission_is_an_error_and_leaves_trail_empty() {
        let mut wb = workbench();
        let err = wb
            .dispatch(
                ScreenRequest::SubmitVitals {
                    entry: vitals(12),
                    reason: "Initial entry".into(),
                },
                now(),
                today(),
            )
            .unwrap_err();

        assert!(matches!(err, CdmError::SubmissionBlocked(2)));
        assert!(wb.audit_entries().unwrap().is_empty());
    }

    #[test]
    fn warning_does_not_block_submission() {
        let mut wb = workbench();
        let outcome = wb
            .dispatch(
                ScreenRequest::SubmitVitals {
                    entry: vitals(120),
                    reason: "Initial entry".into(),
                },
                now(),
                today(),
            )
            .unwrap();

        assert_eq!(outcome.audited, 4);
        let entries = wb.audit_entries().unwrap();
        assert_eq!(entries[3].field(), "AE_YN");
        assert_eq!(entries[3].new_value(), "Y");
        assert!(entries.iter().all(|e| e.user() == "cdm_user"));
    }

    #[test]
    fn raised_query_gets_next_id() {
        let mut wb = workbench();
        let outcome = wb
            .dispatch(
                ScreenRequest::ImagingCheck {
                    subject: "SUB-001".into(),
                    target: "Knee MRI".into(),
                    captured: vec!["Sagittal T1".into()],
                    raise_query: true,
                },
                now(),
                today(),
            )
            .unwrap();

        assert_eq!(outcome.raised.len(), 1);
        assert_eq!(outcome.raised[0].id, "Q3");
        assert_eq!(outcome.raised[0].subject.as_deref(), Some("SUB-001"));
        assert_eq!(wb.queries().open_count(), 2);
    }

    #[test]
    fn closed_query_cannot_reopen() {
        let mut wb = workbench();
        wb.dispatch(
            ScreenRequest::UpdateQuery {
                id: "Q2".into(),
                status: QueryStatus::Closed,
            },
            now(),
            today(),
        )
        .unwrap();

        let err = wb
            .dispatch(
                ScreenRequest::UpdateQuery {
                    id: "Q2".into(),
                    status: QueryStatus::Open,
                },
                now(),
                today(),
            )
            .unwrap_err();
        assert!(matches!(err, CdmError::InvalidQueryTransition { .. }));
    }

    #[test]
    fn corrections_reach_the_export() {
        let temp = TempDir::new().unwrap();
        let store = JsonlAuditStore::open(temp.path().join("audit.jsonl")).unwrap();
        let mut wb = Workbench::new(
            CdmConfig::default(),
            Box::new(store),
            ImagingProtocol::builtin().unwrap(),
            CodingDictionary::builtin().unwrap(),
        );

        wb.dispatch(
            ScreenRequest::CorrectField {
                subject: "1001".into(),
                field: "SYSBP".into(),
                new_value: "128".into(),
                reason: "Transcription error".into(),
            },
            now(),
            today(),
        )
        .unwrap();

        let outcome = wb.dispatch(ScreenRequest::AuditExport, now(), today()).unwrap();
        match outcome.view {
            View::AuditExport { csv } => assert_eq!(
                csv,
                "Timestamp,User,Subject,Field,New Value,Reason\n\
                 2026-03-10T09:00:00Z,cdm_user,1001,SYSBP,128,Transcription error\n"
            ),
            other => panic!("unexpected view: {other:?}"),
        }
    }

    /// Accepts a limited number of batches, then fails. Stores nothing from a failed batch.
    struct FlakyStore {
        stored: Arc<Mutex<Vec<AuditEntry>>>,
        calls: Arc<Mutex<usize>>,
        accept: usize,
    }

    impl AuditStore for FlakyStore {
        fn append_all(&mut self, entries: Vec<AuditEntry>) -> CdmResult<()> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls > self.accept {
                return Err(CdmError::FileWrite(std::io::Error::other("disk full")));
            }
            self.stored.lock().unwrap().extend(entries);
            Ok(())
        }

        fn entries(&self) -> CdmResult<Vec<AuditEntry>> {
            Ok(self.stored.lock().unwrap().clone())
        }
    }

    #[test]
    fn failed_audit_write_appends_nothing_from_the_submission() {
        let stored = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0));
        let mut wb = Workbench::new(
            CdmConfig::default(),
            Box::new(FlakyStore {
                stored: Arc::clone(&stored),
                calls: Arc::clone(&calls),
                accept: 0,
            }),
            ImagingProtocol::builtin().unwrap(),
            CodingDictionary::builtin().unwrap(),
        );

        let err = wb
            .dispatch(
                ScreenRequest::SubmitVitals {
                    entry: vitals(120),
                    reason: "Initial entry".into(),
                },
                now(),
                today(),
            )
            .unwrap_err();

        assert!(matches!(err, CdmError::FileWrite(_)));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(stored.lock().unwrap().is_empty());
    }

    #[test]
    fn submission_is_written_as_one_batch() {
        let stored = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0));
        let mut wb = Workbench::new(
            CdmConfig::default(),
            Box::new(FlakyStore {
                stored: Arc::clone(&stored),
                calls: Arc::clone(&calls),
                accept: 1,
            }),
            ImagingProtocol::builtin().unwrap(),
            CodingDictionary::builtin().unwrap(),
        );

        let outcome = wb
            .dispatch(
                ScreenRequest::SubmitVitals {
                    entry: vitals(120),
                    reason: "Initial entry".into(),
                },
                now(),
                today(),
            )
            .unwrap();

        assert_eq!(outcome.audited, 4);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(stored.lock().unwrap().len(), 4);
    }

    #[test]
    fn out_of_range_corrections_are_rejected() {
        let mut wb = workbench();
        let mut correct = |field: &str, value: &str| {
            wb.dispatch(
                ScreenRequest::CorrectField {
                    subject: "1001".into(),
                    field: field.into(),
                    new_value: value.into(),
                    reason: "Source document check".into(),
                },
                now(),
                today(),
            )
        };

        assert!(matches!(correct("SYSBP", "999"), Err(CdmError::SubmissionBlocked(1))));
        assert!(matches!(correct("SYSBP", "banana"), Err(CdmError::InvalidInput(_))));
        assert!(matches!(correct("AE_YN", "maybe"), Err(CdmError::InvalidInput(_))));
        assert!(wb.audit_entries().unwrap().is_empty());
    }

    #[test]
    fn raised_query_appears_in_returned_list() {
        let mut wb = workbench();
        let outcome = wb
            .dispatch(
                ScreenRequest::RaiseQuery(
                    NewQuery::new(Some("1002".into()), "DIABP", "Value missing").unwrap(),
                ),
                now(),
                today(),
            )
            .unwrap();

        match outcome.view {
            View::Queries { queries } => {
                let ids: Vec<&str> = queries.iter().map(|row| row.query.id.as_str()).collect();
                assert_eq!(ids, vec!["Q1", "Q2", "Q3"]);
            }
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[test]
    fn visit_dated_site_today_is_accepted_before_utc_midnight() {
        let mut wb = workbench();
        let late_evening = Utc.with_ymd_and_hms(2026, 3, 10, 23, 30, 0).unwrap();
        let site_today = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        let mut entry = vitals(120);
        entry.visit_date = Some(site_today);

        let outcome = wb
            .dispatch(
                ScreenRequest::SubmitVitals {
                    entry,
                    reason: "Initial entry".into(),
                },
                late_evening,
                site_today,
            )
            .unwrap();
        assert_eq!(outcome.audited, 4);
    }
}
