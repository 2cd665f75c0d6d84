//! Medical coding of verbatim terms against a MedDRA-style hierarchy.
//!
//! Only the three levels the coding screen shows are modelled: lowest level term (LLT),
//! preferred term (PT) and system organ class (SOC). Verbatim terms are matched against LLT
//! names after trimming, ignoring case. Anything else is left for manual coding.

use crate::constants::MEDDRA_VERSION;
use crate::{CdmError, CdmResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeddraTerm {
    pub llt: String,
    pub pt: String,
    pub soc: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CodingResult {
    Coded {
        verbatim: String,
        term: MeddraTerm,
        version: String,
    },
    Uncoded {
        verbatim: String,
    },
}

#[derive(Clone, Debug)]
pub struct CodingDictionary {
    version: String,
    by_llt: HashMap<String, MeddraTerm>,
}

fn normalise(term: &str) -> String {
    term.trim().to_lowercase()
}

impl CodingDictionary {
    pub fn new(version: impl Into<String>, terms: Vec<MeddraTerm>) -> CdmResult<Self> {
        let version = version.into();
        let mut by_llt = HashMap::with_capacity(terms.len());
        for term in terms {
            let key = normalise(&term.llt);
            if key.is_empty() {
                return Err(CdmError::InvalidInput(
                    "coding dictionary has an empty LLT".into(),
                ));
            }
            if by_llt.insert(key, term.clone()).is_some() {
                return Err(CdmError::InvalidInput(format!(
                    "coding dictionary lists LLT '{}' more than once",
                    term.llt
                )));
            }
        }
        Ok(Self { version, by_llt })
    }

    /// A small dictionary of common adverse event terms.
    pub fn builtin() -> CdmResult<Self> {
        let term = |llt: &str, pt: &str, soc: &str| MeddraTerm {
            llt: llt.to_string(),
            pt: pt.to_string(),
            soc: soc.to_string(),
        };
        Self::new(
            MEDDRA_VERSION,
            vec![
                term("Heartburn", "Dyspepsia", "Gastrointestinal disorders"),
                term("Stomach ache", "Abdominal pain upper", "Gastrointestinal disorders"),
                term("Gastric pain", "Gastrointestinal pain", "Gastrointestinal disorders"),
                term("Nausea", "Nausea", "Gastrointestinal disorders"),
                term("Headache", "Headache", "Nervous system disorders"),
                term("Dizziness", "Dizziness", "Nervous system disorders"),
                term("Fatigue", "Fatigue", "General disorders and administration site conditions"),
                term("Skin rash", "Rash", "Skin and subcutaneous tissue disorders"),
                term("High blood pressure", "Hypertension", "Vascular disorders"),
            ],
        )
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn code(&self, verbatim: &str) -> CodingResult {
        let verbatim_trimmed = verbatim.trim().to_string();
        match self.by_llt.get(&normalise(verbatim)) {
            Some(term) => CodingResult::Coded {
                verbatim: verbatim_trimmed,
                term: term.clone(),
                version: self.version.clone(),
            },
            None => {
                tracing::debug!("no LLT match for verbatim '{}'", verbatim_trimmed);
                CodingResult::Uncoded {
                    verbatim: verbatim_trimmed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_verbatim_ignoring_case_and_whitespace() {
        let dictionary = CodingDictionary::builtin().unwrap();
        match dictionary.code("  heartburn ") {
            CodingResult::Coded {
                verbatim,
                term,
                version,
            } => {
                assert_eq!(verbatim, "heartburn");
                assert_eq!(term.pt, "Dyspepsia");
                assert_eq!(term.soc, "Gastrointestinal disorders");
                assert_eq!(version, "26.1");
            }
            other => panic!("expected coded term, got {other:?}"),
        }
    }

    #[test]
    fn unknown_verbatim_is_left_uncoded() {
        let dictionary = CodingDictionary::builtin().unwrap();
        assert_eq!(
            dictionary.code("burning and pain in stomach"),
            CodingResult::Uncoded {
                verbatim: "burning and pain in stomach".into()
            }
        );
    }

    #[test]
    fn duplicate_llt_is_rejected() {
        let term = MeddraTerm {
            llt: "Headache".into(),
            pt: "Headache".into(),
            soc: "Nervous system disorders".into(),
        };
        let err = CodingDictionary::new("26.1", vec![term.clone(), term]).unwrap_err();
        assert!(matches!(err, CdmError::InvalidInput(msg) if msg.contains("more than once")));
    }

    #[test]
    fn coding_result_serializes_with_outcome_tag() {
        let dictionary = CodingDictionary::builtin().unwrap();
        let json = serde_json::to_value(dictionary.code("Nausea")).unwrap();
        assert_eq!(json["outcome"], "coded");
        assert_eq!(json["term"]["pt"], "Nausea");
    }
}
