//! Append-only audit sinks for mandate lifecycle events.

use ap2_mandate::AuditEvent;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode audit record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit sink lock poisoned")]
    Poisoned,
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(flatten)]
    pub event: AuditEvent,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,

    /// Base64 Ed25519 signature over the JCS bytes of `event`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Write-only audit trail.
///
/// Both methods return the id of the recorded event.
pub trait AuditLogger: Send + Sync {
    fn log_event(&self, event: &AuditEvent) -> Result<String, AuditError>;

    fn log_signed_event(
        &self,
        event: &AuditEvent,
        signer_id: &str,
        signature: &str,
    ) -> Result<String, AuditError>;
}

/// Newline-delimited JSON file, opened in append mode.
pub struct NdjsonAuditLogger {
    file: Mutex<File>,
}

impl NdjsonAuditLogger {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn append(&self, record: &AuditRecord) -> Result<String, AuditError> {
        let json = serde_json::to_string(record)?;
        let mut file = self.file.lock().map_err(|_| AuditError::Poisoned)?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(record.event.id.clone())
    }
}

impl AuditLogger for NdjsonAuditLogger {
    fn log_event(&self, event: &AuditEvent) -> Result<String, AuditError> {
        self.append(&AuditRecord {
            event: event.clone(),
            signer_id: None,
            signature: None,
        })
    }

    fn log_signed_event(
        &self,
        event: &AuditEvent,
        signer_id: &str,
        signature: &str,
    ) -> Result<String, AuditError> {
        self.append(&AuditRecord {
            event: event.clone(),
            signer_id: Some(signer_id.to_string()),
            signature: Some(signature.to_string()),
        })
    }
}

/// In-memory trail, for tests and embedding.
#[derive(Default)]
pub struct MemoryAuditLogger {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Event types in logging order.
    pub fn event_types(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|r| r.event.type_)
            .collect()
    }

    fn push(&self, record: AuditRecord) -> Result<String, AuditError> {
        let id = record.event.id.clone();
        self.records
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(record);
        Ok(id)
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log_event(&self, event: &AuditEvent) -> Result<String, AuditError> {
        self.push(AuditRecord {
            event: event.clone(),
            signer_id: None,
            signature: None,
        })
    }

    fn log_signed_event(
        &self,
        event: &AuditEvent,
        signer_id: &str,
        signature: &str,
    ) -> Result<String, AuditError> {
        self.push(AuditRecord {
            event: event.clone(),
            signer_id: Some(signer_id.to_string()),
            signature: Some(signature.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_mandate::events::{
        mandate_revoked_event, MandateRevokedPayload, DEFAULT_EVENT_SOURCE,
        EVENT_TYPE_MANDATE_REVOKED,
    };
    use chrono::{TimeZone, Utc};

    fn event() -> AuditEvent {
        mandate_revoked_event(
            DEFAULT_EVENT_SOURCE,
            MandateRevokedPayload {
                mandate_id: "intent-1".to_string(),
                revoked_at: Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap(),
                reason: "lost device".to_string(),
            },
        )
        .with_id("evt-1")
        .into_audit_event()
        .unwrap()
    }

    #[test]
    fn test_ndjson_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");

        let logger = NdjsonAuditLogger::open(&path).unwrap();
        assert_eq!(logger.log_event(&event()).unwrap(), "evt-1");
        logger
            .log_signed_event(&event(), "enforcer-key", "c2ln")
            .unwrap();
        drop(logger);

        // Reopening appends rather than truncating
        NdjsonAuditLogger::open(&path)
            .unwrap()
            .log_event(&event())
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], EVENT_TYPE_MANDATE_REVOKED);
        assert_eq!(first["data"]["mandate_id"], "intent-1");
        assert!(first.get("signature").is_none());

        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.signer_id.as_deref(), Some("enforcer-key"));
        assert_eq!(second.signature.as_deref(), Some("c2ln"));
        assert_eq!(second.event, event());
    }

    #[test]
    fn test_memory_logger_keeps_order() {
        let logger = MemoryAuditLogger::new();
        logger.log_event(&event()).unwrap();
        logger.log_signed_event(&event(), "k", "s").unwrap();
        assert_eq!(
            logger.event_types(),
            vec![EVENT_TYPE_MANDATE_REVOKED, EVENT_TYPE_MANDATE_REVOKED]
        );
        assert_eq!(logger.records()[1].signer_id.as_deref(), Some("k"));
    }
}
