//! The authority gate.
//!
//! The enforcer is the single point where untrusted structure meets
//! execution rights. Policy is explicit allow-lists only: no regex, no
//! glob, no prefix matching on tool ids. The decision short-circuits on
//! the first denial, and every denial emits one audit event before the
//! reason is returned.
//!
//! The enforcer performs no path canonicalisation. Both `fs_root` and the
//! command's `cwd` are canonicalised at their input boundaries (token
//! construction and command build); the jail check here compares path
//! components of what it is handed.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::kernel::audit::AuditLogger;
use crate::types::{AuthorityLevel, AuthorityToken, Command, DenialReason, NetworkPolicy};

/// Argv bounds applied at `ParameterizedTools`. `ScopedCommands` is
/// unbounded.
const MAX_ARG_BYTES: usize = 4096;
/// Maximum argv element count at `ParameterizedTools`.
const MAX_ARGV_ELEMENTS: usize = 256;

/// The schema capability name gated by the token's network policy.
const NETWORK_CAPABILITY: &str = "network";

/// The decision gate. Holds the loaded token, if any, and the audit sink.
pub struct Enforcer {
    token: Option<AuthorityToken>,
    audit: Arc<AuditLogger>,
}

impl Enforcer {
    /// Create an enforcer over an optional token. `None` denies everything
    /// with `NoAuthorityLoaded`.
    pub fn new(token: Option<AuthorityToken>, audit: Arc<AuditLogger>) -> Self {
        Self { token, audit }
    }

    /// The loaded token, if any.
    pub fn token(&self) -> Option<&AuthorityToken> {
        self.token.as_ref()
    }

    /// Decide whether `command` may execute. Exactly one of allowed or
    /// denied; a denial has already been audit-logged when this returns.
    pub fn check(&self, command: &Command) -> Result<(), DenialReason> {
        match self.decide(command) {
            Ok(()) => Ok(()),
            Err(reason) => {
                self.emit_denial(&command.tool_id, &command.binary, reason);
                Err(reason)
            }
        }
    }

    /// Record a denial for a command that was refused upstream of the gate
    /// (schema validation). Keeps all denial events flowing through one
    /// emitter.
    pub fn report_validation_denial(&self, tool_id: &str, binary: &str) {
        self.emit_denial(tool_id, binary, DenialReason::SchemaValidationFailed);
    }

    /// The decision procedure, short-circuiting on the first denial.
    fn decide(&self, command: &Command) -> Result<(), DenialReason> {
        let Some(token) = &self.token else {
            return Err(DenialReason::NoAuthorityLoaded);
        };

        // Observe confers no execute rights.
        if token.level == AuthorityLevel::Observe {
            return Err(DenialReason::InsufficientLevel);
        }

        if !token.allowed_tools.iter().any(|t| t == &command.tool_id) {
            return Err(DenialReason::ToolNotInAllowList);
        }

        // String equality; binary resolution happened at schema load.
        if !token.allowed_bins.iter().any(|b| b == &command.binary) {
            return Err(DenialReason::BinaryNotInAllowList);
        }

        // Component-wise prefix so /srv/proj never authorizes /srv/project2.
        if !command.cwd.starts_with(&token.fs_root) {
            return Err(DenialReason::CwdOutsideFsRoot);
        }

        if token.expiration != 0 && Utc::now().timestamp() > token.expiration {
            return Err(DenialReason::AuthorityExpired);
        }

        // Tools-only forbids any parameterisation.
        if token.level == AuthorityLevel::ToolsOnly && !command.args.is_empty() {
            return Err(DenialReason::InsufficientLevel);
        }

        if token.level == AuthorityLevel::ParameterizedTools {
            let oversized = command.args.iter().any(|a| a.len() > MAX_ARG_BYTES);
            if oversized || command.args.len() > MAX_ARGV_ELEMENTS {
                return Err(DenialReason::ParametersOutOfBounds);
            }
        }

        if token.network == NetworkPolicy::Deny
            && command
                .requested_capabilities
                .iter()
                .any(|c| c == NETWORK_CAPABILITY)
        {
            return Err(DenialReason::NetworkPolicyViolation);
        }

        Ok(())
    }

    /// Best-effort audit write; the sink must never block the decision.
    fn emit_denial(&self, tool_id: &str, binary: &str, reason: DenialReason) {
        let project_id = self
            .token
            .as_ref()
            .map(|t| t.project_id)
            .unwrap_or([0u8; 32]);
        if let Err(e) = self.audit.log_denial(tool_id, binary, reason, project_id) {
            warn!(error = %e, tool_id, "failed to audit-log denial");
        }
    }
}
