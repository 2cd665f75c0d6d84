//! Checklist completeness.
//!
//! A [`Checklist`] is a fixed, ordered list of required item names (for example the views an
//! imaging protocol demands). Evaluating it against what was actually captured yields per-item
//! presence and the missing items, both in the checklist's canonical order.
//!
//! Matching is exact after trimming surrounding whitespace. Deciding what to do about missing
//! items (raising a query, say) is up to the caller.

use crate::{CdmError, CdmResult};
use cdm_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Checklist {
    target: NonEmptyText,
    required: Vec<NonEmptyText>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub name: String,
    pub present: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistReport {
    pub target: String,
    /// One entry per required item, in checklist order.
    pub items: Vec<ChecklistItem>,
    pub missing: Vec<String>,
    /// Observed items the checklist does not ask for, in first-seen order.
    pub unexpected: Vec<String>,
}

impl ChecklistReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl Checklist {
    /// Creates a checklist for `target`.
    ///
    /// # Errors
    ///
    /// Returns `CdmError::InvalidInput` if the target or any item is blank, if there are no
    /// items, or if an item is listed twice.
    pub fn new<I, S>(target: impl AsRef<str>, required: I) -> CdmResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let target = NonEmptyText::new(target)
            .map_err(|_| CdmError::InvalidInput("checklist target cannot be empty".into()))?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for item in required {
            let item = NonEmptyText::new(item).map_err(|_| {
                CdmError::InvalidInput(format!("checklist '{target}' has an empty item"))
            })?;
            if !seen.insert(item.clone()) {
                return Err(CdmError::InvalidInput(format!(
                    "checklist '{target}' lists '{item}' more than once"
                )));
            }
            items.push(item);
        }

        if items.is_empty() {
            return Err(CdmError::InvalidInput(format!(
                "checklist '{target}' has no required items"
            )));
        }

        Ok(Self {
            target,
            required: items,
        })
    }

    pub fn target(&self) -> &str {
        self.target.as_str()
    }

    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(NonEmptyText::as_str)
    }

    /// Compares `observed` against the required items.
    pub fn evaluate<I, S>(&self, observed: I) -> ChecklistReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let observed: Vec<String> = observed
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let observed_set: HashSet<&str> = observed.iter().map(String::as_str).collect();

        let items: Vec<ChecklistItem> = self
            .required
            .iter()
            .map(|name| ChecklistItem {
                name: name.to_string(),
                present: observed_set.contains(name.as_str()),
            })
            .collect();

        let missing = items
            .iter()
            .filter(|i| !i.present)
            .map(|i| i.name.clone())
            .collect();

        let required: HashSet<&str> = self.required().collect();
        let mut reported = HashSet::new();
        let unexpected = observed
            .iter()
            .filter(|o| !required.contains(o.as_str()) && reported.insert(o.as_str()))
            .cloned()
            .collect();

        ChecklistReport {
            target: self.target.to_string(),
            items,
            missing,
            unexpected,
        }
    }
}
