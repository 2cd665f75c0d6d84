//! Imaging protocols: required views per anatomical target.
//!
//! Each target maps to a [`Checklist`] of view names. A small built-in set covers the targets
//! the workbench demos use; sites replace it with a YAML file of the form:
//!
//! ```yaml
//! protocols:
//!   - target: Chest X-ray
//!     views: [PA, Lateral]
//! ```

use crate::checklist::{Checklist, ChecklistReport};
use crate::{CdmError, CdmResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagingProtocol {
    checklists: BTreeMap<String, Checklist>,
}

impl ImagingProtocol {
    /// Builds a protocol set from checklists. Target names must be unique.
    pub fn new(checklists: Vec<Checklist>) -> CdmResult<Self> {
        let mut map = BTreeMap::new();
        for checklist in checklists {
            let target = checklist.target().to_string();
            if map.insert(target.clone(), checklist).is_some() {
                return Err(CdmError::InvalidInput(format!(
                    "imaging target '{target}' is defined more than once"
                )));
            }
        }
        if map.is_empty() {
            return Err(CdmError::InvalidInput(
                "imaging protocol defines no targets".into(),
            ));
        }
        Ok(Self { checklists: map })
    }

    /// The built-in protocol set.
    pub fn builtin() -> CdmResult<Self> {
        Self::new(vec![
            Checklist::new("Chest X-ray", ["PA", "Lateral"])?,
            Checklist::new("Hand X-ray", ["PA", "Oblique", "Lateral"])?,
            Checklist::new(
                "Knee MRI",
                [
                    "Sagittal T1",
                    "Sagittal PD FS",
                    "Coronal PD FS",
                    "Axial PD FS",
                    "Coronal T1",
                ],
            )?,
            Checklist::new(
                "Brain MRI",
                ["Axial T1", "Axial T2", "Axial FLAIR", "Axial DWI", "Sagittal T1"],
            )?,
        ])
    }

    /// Parses a protocol set from YAML text.
    ///
    /// Schema errors carry the path of the offending field (e.g. `protocols[1].views`).
    pub fn parse(yaml_text: &str) -> CdmResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let wire = match serde_path_to_error::deserialize::<_, ProtocolFileWire>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let path = if path.is_empty() || path == "." {
                    "<root>".to_string()
                } else {
                    path
                };
                return Err(CdmError::ProtocolSchema {
                    path,
                    message: err.into_inner().to_string(),
                });
            }
        };

        let checklists = wire
            .protocols
            .into_iter()
            .map(|p| Checklist::new(p.target, p.views))
            .collect::<CdmResult<Vec<_>>>()?;
        Self::new(checklists)
    }

    pub fn load(path: &Path) -> CdmResult<Self> {
        let text = std::fs::read_to_string(path).map_err(CdmError::FileRead)?;
        let protocol = Self::parse(&text)?;
        tracing::info!(
            "loaded {} imaging protocol target(s) from {}",
            protocol.checklists.len(),
            path.display()
        );
        Ok(protocol)
    }

    /// Renders the protocol set in the same YAML shape [`ImagingProtocol::parse`] accepts.
    pub fn render(&self) -> CdmResult<String> {
        let wire = ProtocolFileWire {
            protocols: self
                .checklists
                .values()
                .map(|c| ProtocolWire {
                    target: c.target().to_string(),
                    views: c.required().map(str::to_string).collect(),
                })
                .collect(),
        };
        serde_yaml::to_string(&wire).map_err(CdmError::YamlSerialization)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.checklists.keys().map(String::as_str)
    }

    pub fn checklist(&self, target: &str) -> CdmResult<&Checklist> {
        self.checklists
            .get(target.trim())
            .ok_or_else(|| CdmError::UnknownTarget(target.to_string()))
    }

    /// Evaluates captured views for one subject against the target's required views.
    pub fn evaluate<I, S>(&self, target: &str, captured: I) -> CdmResult<ChecklistReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.checklist(target)?.evaluate(captured))
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ProtocolFileWire {
    protocols: Vec<ProtocolWire>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ProtocolWire {
    target: String,
    views: Vec<String>,
}
