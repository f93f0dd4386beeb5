/// Audit logger for the authority gate and executor.
///
/// Writes structured JSON entries, one per line, to an append-only sink.
/// Every denial produces exactly one entry; executions and schema loads are
/// also recorded. Environment values never reach the log; execution
/// records carry key names only.
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use crate::types::DenialReason;

/// Audit event type discriminator.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// The gate refused a command.
    Denial,
    /// A command ran to completion (or timeout).
    Execution,
    /// A schema entered the store.
    SchemaLoaded,
}

/// A single structured audit log entry.
#[derive(Debug, Serialize)]
struct AuditEntry {
    timestamp: String,
    event_type: AuditEventType,
    tool_id: String,
    project_id: String,
    details: serde_json::Value,
}

/// Audit logger writing structured JSON lines to an append-only sink.
pub struct AuditLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl AuditLogger {
    /// Create an audit logger that appends to the given file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for append.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create an audit logger from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Record a denial: the rule that refused, the tool, and the binary.
    pub fn log_denial(
        &self,
        tool_id: &str,
        binary: &str,
        reason: DenialReason,
        project_id: [u8; 32],
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::Denial,
            tool_id,
            project_id,
            serde_json::json!({
                "denial_reason": reason.as_str(),
                "binary": binary,
            }),
        )
    }

    /// Record an execution outcome. `env_keys` names what the child's
    /// environment contained; values are deliberately absent.
    pub fn log_execution(
        &self,
        tool_id: &str,
        binary: &str,
        project_id: [u8; 32],
        exit_code: i32,
        timed_out: bool,
        env_keys: &[String],
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::Execution,
            tool_id,
            project_id,
            serde_json::json!({
                "binary": binary,
                "exit_code": exit_code,
                "timed_out": timed_out,
                "env_keys": env_keys,
            }),
        )
    }

    /// Record a schema entering the store.
    pub fn log_schema_loaded(
        &self,
        tool_id: &str,
        version: u32,
        project_id: [u8; 32],
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::SchemaLoaded,
            tool_id,
            project_id,
            serde_json::json!({ "version": version }),
        )
    }

    /// Write a single JSON line to the audit log.
    fn write_entry(
        &self,
        event_type: AuditEventType,
        tool_id: &str,
        project_id: [u8; 32],
        details: serde_json::Value,
    ) -> anyhow::Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            tool_id: tool_id.to_owned(),
            project_id: hex_lower(&project_id),
            details,
        };
        let line = serde_json::to_string(&entry)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Lowercase hex encoding of a byte slice.
fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
