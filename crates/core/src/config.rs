//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Binaries read the environment (after loading `.env`) and hand the
//! raw values to [`CdmConfig::from_env_values`]; nothing in the core reads process-wide
//! environment variables while handling a request.

use crate::audit::{AuditStore, InMemoryAuditStore, JsonlAuditStore};
use crate::constants::{
    DEFAULT_AUDIT_USER, DEFAULT_EXTERNAL_LABEL, DEFAULT_REFERENCE_LABEL, DEFAULT_REST_ADDR,
    DEFAULT_SAFETY_LABEL,
};
use crate::imaging::ImagingProtocol;
use crate::reconcile::SideLabels;
use crate::validation::{validate_audit_user, validate_side_label};
use crate::{CdmError, CdmResult};
use std::path::{Path, PathBuf};

/// Environment variable names read by the binaries.
pub const ENV_AUDIT_USER: &str = "CDM_AUDIT_USER";
pub const ENV_AUDIT_LOG: &str = "CDM_AUDIT_LOG";
pub const ENV_IMAGING_PROTOCOLS: &str = "CDM_IMAGING_PROTOCOLS";
pub const ENV_REFERENCE_LABEL: &str = "CDM_REFERENCE_LABEL";
pub const ENV_EXTERNAL_LABEL: &str = "CDM_EXTERNAL_LABEL";
pub const ENV_SAFETY_LABEL: &str = "CDM_SAFETY_LABEL";
pub const ENV_REST_ADDR: &str = "CDM_REST_ADDR";

/// Unvalidated configuration values, typically straight from the environment.
#[derive(Clone, Debug, Default)]
pub struct RawConfig {
    pub audit_user: Option<String>,
    pub audit_log: Option<String>,
    pub imaging_protocols: Option<String>,
    pub reference_label: Option<String>,
    pub external_label: Option<String>,
    pub safety_label: Option<String>,
    pub rest_addr: Option<String>,
}

impl RawConfig {
    /// Reads every `CDM_*` variable. Call once at startup.
    pub fn from_process_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self {
            audit_user: var(ENV_AUDIT_USER),
            audit_log: var(ENV_AUDIT_LOG),
            imaging_protocols: var(ENV_IMAGING_PROTOCOLS),
            reference_label: var(ENV_REFERENCE_LABEL),
            external_label: var(ENV_EXTERNAL_LABEL),
            safety_label: var(ENV_SAFETY_LABEL),
            rest_addr: var(ENV_REST_ADDR),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CdmConfig {
    audit_user: String,
    audit_log_path: Option<PathBuf>,
    imaging_protocol_path: Option<PathBuf>,
    labels: SideLabels,
    safety_labels: SideLabels,
    rest_addr: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CdmConfig {
    /// Resolves defaults and validates every value.
    pub fn from_env_values(raw: RawConfig) -> CdmResult<Self> {
        let audit_user =
            non_blank(raw.audit_user).unwrap_or_else(|| DEFAULT_AUDIT_USER.to_string());
        validate_audit_user(&audit_user)?;

        let reference =
            non_blank(raw.reference_label).unwrap_or_else(|| DEFAULT_REFERENCE_LABEL.to_string());
        let external =
            non_blank(raw.external_label).unwrap_or_else(|| DEFAULT_EXTERNAL_LABEL.to_string());
        validate_side_label(&reference)?;
        validate_side_label(&external)?;
        if reference.eq_ignore_ascii_case(&external) {
            return Err(CdmError::InvalidInput(format!(
                "reference and external labels must differ (both '{reference}')"
            )));
        }
        let safety =
            non_blank(raw.safety_label).unwrap_or_else(|| DEFAULT_SAFETY_LABEL.to_string());
        validate_side_label(&safety)?;
        if reference.eq_ignore_ascii_case(&safety) {
            return Err(CdmError::InvalidInput(format!(
                "reference and safety labels must differ (both '{reference}')"
            )));
        }

        Ok(Self {
            audit_user,
            audit_log_path: non_blank(raw.audit_log).map(PathBuf::from),
            imaging_protocol_path: non_blank(raw.imaging_protocols).map(PathBuf::from),
            safety_labels: SideLabels::new(reference.clone(), safety),
            labels: SideLabels::new(reference, external),
            rest_addr: non_blank(raw.rest_addr).unwrap_or_else(|| DEFAULT_REST_ADDR.to_string()),
        })
    }

    pub fn audit_user(&self) -> &str {
        &self.audit_user
    }

    pub fn audit_log_path(&self) -> Option<&Path> {
        self.audit_log_path.as_deref()
    }

    pub fn imaging_protocol_path(&self) -> Option<&Path> {
        self.imaging_protocol_path.as_deref()
    }

    pub fn labels(&self) -> &SideLabels {
        &self.labels
    }

    /// Labels for AE reconciliation: the reference side against the safety database.
    pub fn safety_labels(&self) -> &SideLabels {
        &self.safety_labels
    }

    pub fn rest_addr(&self) -> &str {
        &self.rest_addr
    }

    /// The durable store when an audit log path is configured, otherwise an in-memory one.
    pub fn open_audit_store(&self) -> CdmResult<Box<dyn AuditStore>> {
        match &self.audit_log_path {
            Some(path) => {
                tracing::info!("audit trail: {}", path.display());
                Ok(Box::new(JsonlAuditStore::open(path)?))
            }
            None => {
                tracing::warn!("audit trail is in memory only; set {ENV_AUDIT_LOG} to persist it");
                Ok(Box::new(InMemoryAuditStore::new()))
            }
        }
    }

    /// The configured protocol file, or the built-in protocols.
    pub fn load_imaging_protocol(&self) -> CdmResult<ImagingProtocol> {
        match &self.imaging_protocol_path {
            Some(path) => ImagingProtocol::load(path),
            None => ImagingProtocol::builtin(),
        }
    }
}

impl Default for CdmConfig {
    fn default() -> Self {
        Self {
            audit_user: DEFAULT_AUDIT_USER.to_string(),
            audit_log_path: None,
            imaging_protocol_path: None,
            labels: SideLabels::default(),
            safety_labels: SideLabels::new(DEFAULT_REFERENCE_LABEL, DEFAULT_SAFETY_LABEL),
            rest_addr: DEFAULT_REST_ADDR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_values_resolve_to_defaults() {
        let cfg = CdmConfig::from_env_values(RawConfig {
            audit_user: Some("   ".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(cfg.audit_user(), "cdm_user");
        assert_eq!(cfg.labels(), &SideLabels::new("EDC", "Lab"));
        assert_eq!(cfg.safety_labels(), &SideLabels::new("EDC", "Safety"));
        assert_eq!(cfg.rest_addr(), "0.0.0.0:3000");
        assert!(cfg.audit_log_path().is_none());
    }

    #[test]
    fn identical_labels_are_rejected() {
        let err = CdmConfig::from_env_values(RawConfig {
            reference_label: Some("lab".into()),
            external_label: Some("Lab".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, CdmError::InvalidInput(msg) if msg.contains("must differ")));
    }

    #[test]
    fn safety_label_is_configurable() {
        let cfg = CdmConfig::from_env_values(RawConfig {
            reference_label: Some("Rave".into()),
            safety_label: Some("Argus".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.safety_labels(), &SideLabels::new("Rave", "Argus"));
        assert_eq!(cfg.labels(), &SideLabels::new("Rave", "Lab"));

        let err = CdmConfig::from_env_values(RawConfig {
            safety_label: Some("edc".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, CdmError::InvalidInput(msg) if msg.contains("safety")));
    }

    #[test]
    fn invalid_user_is_rejected() {
        let err = CdmConfig::from_env_values(RawConfig {
            audit_user: Some("bad user".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, CdmError::InvalidInput(_)));
    }

    #[test]
    fn audit_log_path_selects_durable_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");
        let cfg = CdmConfig::from_env_values(RawConfig {
            audit_log: Some(path.display().to_string()),
            ..Default::default()
        })
        .unwrap();

        let store = cfg.open_audit_store().unwrap();
        assert!(store.entries().unwrap().is_empty());
        assert!(path.is_file());
    }

    #[test]
    fn missing_protocol_file_is_a_read_error() {
        let temp = TempDir::new().unwrap();
        let cfg = CdmConfig::from_env_values(RawConfig {
            imaging_protocols: Some(temp.path().join("absent.yaml").display().to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            cfg.load_imaging_protocol(),
            Err(CdmError::FileRead(_))
        ));
    }
}
