//! Input validation utilities.
//!
//! This module contains functions for validating configuration and user inputs before they are
//! written into audit records or exports.

use crate::{CdmError, CdmResult};

/// Validates a user name recorded on audit entries.
///
/// User names end up in every audit row and in CSV exports, so they are restricted to a
/// conservative ASCII set:
/// - Rejects empty or whitespace-only strings
/// - Bounds the length to avoid pathological inputs
/// - Allows only alphanumerics and `.`, `-`, `_`, `@`
///
/// # Errors
///
/// Returns a `CdmError::InvalidInput` if the user name is invalid.
pub fn validate_audit_user(user: &str) -> CdmResult<()> {
    const MAX_USER_LEN: usize = 64;

    if user.trim().is_empty() {
        return Err(CdmError::InvalidInput("audit user cannot be empty".into()));
    }

    if user.len() > MAX_USER_LEN {
        return Err(CdmError::InvalidInput(format!(
            "audit user exceeds maximum length of {} characters",
            MAX_USER_LEN
        )));
    }

    if !user.is_ascii() {
        return Err(CdmError::InvalidInput(
            "audit user must contain only ASCII characters".into(),
        ));
    }

    let ok = user.bytes().all(
        |b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'-' | b'_' | b'@'),
    );

    if !ok {
        return Err(CdmError::InvalidInput(
            "audit user contains invalid characters (only alphanumeric, '.', '-', '_', '@' allowed)"
                .into(),
        ));
    }

    Ok(())
}

/// Validates a side label used in reconciliation status text ("Missing in {label}").
pub fn validate_side_label(label: &str) -> CdmResult<()> {
    const MAX_LABEL_LEN: usize = 32;

    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(CdmError::InvalidInput(
            "reconciliation label cannot be empty".into(),
        ));
    }
    if trimmed.chars().count() > MAX_LABEL_LEN {
        return Err(CdmError::InvalidInput(format!(
            "reconciliation label exceeds maximum length of {} characters",
            MAX_LABEL_LEN
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(CdmError::InvalidInput(
            "reconciliation label must not contain control characters".into(),
        ));
    }
    Ok(())
}
