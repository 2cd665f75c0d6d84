//! Audit trail.
//!
//! Every data change is recorded as an [`AuditEntry`]: who changed which field of which
//! subject, to what, when and why. Entries are append-only. Stores expose `append` and
//! `entries` and nothing else, so an entry cannot be edited or removed once written.
//!
//! Two stores are provided:
//! - [`InMemoryAuditStore`], lost on restart (tests, demos)
//! - [`JsonlAuditStore`], one JSON object per line in a file that is only ever appended to

use crate::constants::AUDIT_EXPORT_HEADER;
use crate::{CdmError, CdmResult};
use cdm_types::{NonEmptyText, SubjectId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One immutable audit trail record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    timestamp: DateTime<Utc>,
    user: NonEmptyText,
    subject: SubjectId,
    field: NonEmptyText,
    new_value: String,
    reason: NonEmptyText,
}

impl AuditEntry {
    /// Builds an entry.
    ///
    /// # Errors
    ///
    /// Returns `CdmError::InvalidInput` if the user, subject, field or reason for change is blank.
    pub fn new(
        timestamp: DateTime<Utc>,
        user: &str,
        subject: &str,
        field: &str,
        new_value: impl Into<String>,
        reason: &str,
    ) -> CdmResult<Self> {
        let required = |name: &str, value: &str| {
            NonEmptyText::new(value)
                .map_err(|_| CdmError::InvalidInput(format!("audit entry {name} is required")))
        };
        Ok(Self {
            timestamp,
            user: required("user", user)?,
            subject: SubjectId::parse(subject)
                .map_err(|e| CdmError::InvalidInput(format!("audit entry subject: {e}")))?,
            field: required("field", field)?,
            new_value: new_value.into(),
            reason: required("reason for change", reason)?,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn user(&self) -> &str {
        self.user.as_str()
    }

    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    pub fn field(&self) -> &str {
        self.field.as_str()
    }

    pub fn new_value(&self) -> &str {
        &self.new_value
    }

    pub fn reason(&self) -> &str {
        self.reason.as_str()
    }
}

/// Append-only audit trail storage.
pub trait AuditStore: Send {
    /// Appends a batch. Either every entry is stored or none is.
    fn append_all(&mut self, entries: Vec<AuditEntry>) -> CdmResult<()>;

    fn append(&mut self, entry: AuditEntry) -> CdmResult<()> {
        self.append_all(vec![entry])
    }

    /// All entries in append order.
    fn entries(&self) -> CdmResult<Vec<AuditEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: Vec<AuditEntry>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn log_appended(entries: &[AuditEntry]) {
    for entry in entries {
        tracing::info!(
            "audit: {} set {}.{} ({})",
            entry.user(),
            entry.subject(),
            entry.field(),
            entry.reason()
        );
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append_all(&mut self, entries: Vec<AuditEntry>) -> CdmResult<()> {
        log_appended(&entries);
        self.entries.extend(entries);
        Ok(())
    }

    fn entries(&self) -> CdmResult<Vec<AuditEntry>> {
        Ok(self.entries.clone())
    }
}

/// Durable store writing one JSON entry per line.
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
}

impl JsonlAuditStore {
    /// Opens (creating if needed) the audit log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> CdmResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(CdmError::FileWrite)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(CdmError::FileWrite)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for JsonlAuditStore {
    fn append_all(&mut self, entries: Vec<AuditEntry>) -> CdmResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        // Serialize the whole batch before touching the file.
        let mut batch = String::new();
        for entry in &entries {
            batch.push_str(&serde_json::to_string(entry).map_err(CdmError::Serialization)?);
            batch.push('\n');
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(CdmError::FileWrite)?;
        file.write_all(batch.as_bytes())
            .map_err(CdmError::FileWrite)?;
        file.sync_data().map_err(CdmError::FileWrite)?;

        log_appended(&entries);
        Ok(())
    }

    fn entries(&self) -> CdmResult<Vec<AuditEntry>> {
        let contents = fs::read_to_string(&self.path).map_err(CdmError::FileRead)?;
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|source| CdmError::Deserialization {
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }
}

/// Renders entries as CSV with the header `Timestamp,User,Subject,Field,New Value,Reason`.
pub fn export_csv(entries: &[AuditEntry]) -> CdmResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(AUDIT_EXPORT_HEADER)?;
    for entry in entries {
        writer.write_record([
            entry
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .as_str(),
            entry.user(),
            entry.subject(),
            entry.field(),
            entry.new_value(),
            entry.reason(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(CdmError::CsvWrite)?;
    String::from_utf8(bytes).map_err(CdmError::ExportEncoding)
}
