//! Query management: discrepancies sent to sites for resolution.
//!
//! Queries are numbered `Q1`, `Q2`, ... in the order they are raised. Status only moves
//! forward: `Open -> Answered -> Closed`, or straight from `Open` to `Closed`.

use crate::{CdmError, CdmResult};
use cdm_types::NonEmptyText;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Open,
    Answered,
    Closed,
}

impl QueryStatus {
    fn can_move_to(self, next: QueryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Answered) | (Self::Open, Self::Closed) | (Self::Answered, Self::Closed)
        )
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "Open",
            Self::Answered => "Answered",
            Self::Closed => "Closed",
        };
        f.write_str(s)
    }
}

/// Request to raise a query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuery {
    #[serde(default)]
    pub subject: Option<String>,
    pub field: NonEmptyText,
    pub issue: NonEmptyText,
}

impl NewQuery {
    pub fn new(subject: Option<String>, field: &str, issue: &str) -> CdmResult<Self> {
        Ok(Self {
            subject,
            field: NonEmptyText::new(field)?,
            issue: NonEmptyText::new(issue)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub subject: Option<String>,
    pub field: String,
    pub issue: String,
    pub status: QueryStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Query {
    /// Whole days since the query was opened.
    pub fn aging_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_days().max(0)
    }
}

/// In-process register of queries for one study.
#[derive(Clone, Debug, Default)]
pub struct QueryRegister {
    queries: Vec<Query>,
}

impl QueryRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// A register holding the two example queries shown on the demo dashboard.
    pub fn seed_demo(now: DateTime<Utc>) -> CdmResult<Self> {
        let mut register = Self::new();
        register.raise(
            NewQuery {
                subject: Some("1001".into()),
                field: NonEmptyText::new("SYSBP")?,
                issue: NonEmptyText::new("Value 12 mmHg is improbable")?,
            },
            now - Duration::days(3),
        );
        let answered = register
            .raise(
                NewQuery {
                    subject: Some("1002".into()),
                    field: NonEmptyText::new("VISDAT")?,
                    issue: NonEmptyText::new("Future date entered")?,
                },
                now - Duration::days(1),
            )
            .id
            .clone();
        register.transition(&answered, QueryStatus::Answered, now)?;
        Ok(register)
    }

    pub fn raise(&mut self, request: NewQuery, now: DateTime<Utc>) -> &Query {
        let id = format!("Q{}", self.queries.len() + 1);
        tracing::info!("raised query {} on {}", id, request.field);
        self.queries.push(Query {
            id,
            subject: request
                .subject
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            field: request.field.into_inner(),
            issue: request.issue.into_inner(),
            status: QueryStatus::Open,
            opened_at: now,
            updated_at: now,
        });
        &self.queries[self.queries.len() - 1]
    }

    pub fn get(&self, id: &str) -> CdmResult<&Query> {
        self.queries
            .iter()
            .find(|q| q.id == id)
            .ok_or_else(|| CdmError::QueryNotFound(id.to_string()))
    }

    pub fn transition(
        &mut self,
        id: &str,
        next: QueryStatus,
        now: DateTime<Utc>,
    ) -> CdmResult<&Query> {
        let query = self
            .queries
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| CdmError::QueryNotFound(id.to_string()))?;

        if !query.status.can_move_to(next) {
            return Err(CdmError::InvalidQueryTransition {
                id: id.to_string(),
                from: query.status.to_string(),
                to: next.to_string(),
            });
        }

        query.status = next;
        query.updated_at = now;
        Ok(query)
    }

    pub fn list(&self) -> &[Query] {
        &self.queries
    }

    pub fn open_count(&self) -> usize {
        self.queries
            .iter()
            .filter(|q| q.status == QueryStatus::Open)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn new_query(field: &str, issue: &str) -> NewQuery {
        NewQuery {
            subject: Some("1001".into()),
            field: NonEmptyText::new(field).unwrap(),
            issue: NonEmptyText::new(issue).unwrap(),
        }
    }

    #[test]
    fn ids_are_sequential() {
        let mut register = QueryRegister::new();
        assert_eq!(register.raise(new_query("SYSBP", "check"), now()).id, "Q1");
        assert_eq!(register.raise(new_query("DIABP", "check"), now()).id, "Q2");
        assert_eq!(register.open_count(), 2);
    }

    #[test]
    fn seed_demo_matches_dashboard() {
        let register = QueryRegister::seed_demo(now()).unwrap();
        let q1 = register.get("Q1").unwrap();
        let q2 = register.get("Q2").unwrap();

        assert_eq!(q1.status, QueryStatus::Open);
        assert_eq!(q1.aging_days(now()), 3);
        assert_eq!(q2.status, QueryStatus::Answered);
        assert_eq!(q2.aging_days(now()), 1);
    }

    #[test]
    fn status_moves_forward() {
        let mut register = QueryRegister::new();
        register.raise(new_query("SYSBP", "check"), now());

        register.transition("Q1", QueryStatus::Answered, now()).unwrap();
        let closed = register.transition("Q1", QueryStatus::Closed, now()).unwrap();
        assert_eq!(closed.status, QueryStatus::Closed);
    }

    #[test]
    fn closed_query_cannot_reopen() {
        let mut register = QueryRegister::new();
        register.raise(new_query("SYSBP", "check"), now());
        register.transition("Q1", QueryStatus::Closed, now()).unwrap();

        let err = register
            .transition("Q1", QueryStatus::Open, now())
            .unwrap_err();
        assert!(matches!(err, CdmError::InvalidQueryTransition { ref from, .. } if from == "Closed"));
    }

    #[test]
    fn unknown_query_is_not_found() {
        let mut register = QueryRegister::new();
        let err = register
            .transition("Q9", QueryStatus::Closed, now())
            .unwrap_err();
        assert!(matches!(err, CdmError::QueryNotFound(id) if id == "Q9"));
    }

    #[test]
    fn blank_subject_is_dropped() {
        let mut register = QueryRegister::new();
        let mut request = new_query("SYSBP", "check");
        request.subject = Some("   ".into());
        assert_eq!(register.raise(request, now()).subject, None);
    }
}
