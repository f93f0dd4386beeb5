//! Structured executor: child-process spawn with no shell interpretation.
//!
//! The argv handed to the OS is exactly `[command.binary] ++ command.args`,
//! one discrete element each; nothing is joined, re-split, or interpreted.
//! Host process-creation APIs are confined to this file; an integration
//! test walks `src/` and fails the build of trust if they appear anywhere
//! else.
//!
//! Environment policy: the child starts from an empty environment and
//! receives exactly `command.env_delta`. The audit execution record lists
//! the key names the child saw, which makes the policy checkable after the
//! fact.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::kernel::audit::AuditLogger;
use crate::kernel::enforcer::Enforcer;
use crate::types::{Command, DenialReason};

/// Execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecConfig {
    /// Maximum child runtime in milliseconds; `0` means no timeout.
    pub timeout_ms: u64,
}

/// Outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Child exit code mapped into `[0, 255]`.
    pub exit_code: i32,
    /// Whether the timeout elapsed and the child was killed.
    pub timed_out: bool,
}

/// Errors from the execution pipeline.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The pre-spawn authority re-check refused the command.
    #[error("authority denied: {0}")]
    AuthorityDenied(DenialReason),
    /// The OS refused to spawn or wait on the child.
    #[error("failed to spawn '{binary}': {source}")]
    SpawnFailed {
        /// The binary that failed to spawn.
        binary: String,
        /// The underlying OS error.
        source: std::io::Error,
    },
    /// The OS reported memory exhaustion while building the child spec.
    #[error("out of memory while building child process spec")]
    OutOfMemory,
}

/// The executor. Re-checks authority itself; it does not trust that the
/// caller already did.
pub struct Executor {
    enforcer: Arc<Enforcer>,
    audit: Arc<AuditLogger>,
}

impl Executor {
    /// Create an executor over the gate and the audit sink.
    pub fn new(enforcer: Arc<Enforcer>, audit: Arc<AuditLogger>) -> Self {
        Self { enforcer, audit }
    }

    /// Run `command` to completion.
    ///
    /// Pipeline: authority re-check, child spec from the argv array
    /// directly, cwd binding, empty-base environment plus `env_delta`,
    /// spawn, wait (bounded by `timeout_ms` when nonzero), exit mapping.
    pub async fn execute(
        &self,
        command: &Command,
        config: &ExecConfig,
    ) -> Result<ExecResult, ExecError> {
        self.enforcer
            .check(command)
            .map_err(ExecError::AuthorityDenied)?;

        let mut child_spec = tokio::process::Command::new(&command.binary);
        child_spec
            .args(&command.args)
            .current_dir(&command.cwd)
            .env_clear()
            .kill_on_drop(true);
        for (key, value) in &command.env_delta {
            child_spec.env(key, value);
        }

        let mut child = child_spec.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::OutOfMemory {
                ExecError::OutOfMemory
            } else {
                ExecError::SpawnFailed {
                    binary: command.binary.clone(),
                    source,
                }
            }
        })?;

        let (status, timed_out) = if config.timeout_ms == 0 {
            let status = child.wait().await.map_err(|source| ExecError::SpawnFailed {
                binary: command.binary.clone(),
                source,
            })?;
            (status, false)
        } else {
            match tokio::time::timeout(Duration::from_millis(config.timeout_ms), child.wait())
                .await
            {
                Ok(waited) => {
                    let status = waited.map_err(|source| ExecError::SpawnFailed {
                        binary: command.binary.clone(),
                        source,
                    })?;
                    (status, false)
                }
                Err(_elapsed) => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, binary = %command.binary, "failed to kill timed-out child");
                    }
                    let status = child.wait().await.map_err(|source| ExecError::SpawnFailed {
                        binary: command.binary.clone(),
                        source,
                    })?;
                    (status, true)
                }
            }
        };

        let exit_code = map_exit_status(status);
        info!(
            tool_id = %command.tool_id,
            exit_code,
            timed_out,
            "command completed"
        );

        let project_id = self
            .enforcer
            .token()
            .map(|t| t.project_id)
            .unwrap_or([0u8; 32]);
        let env_keys: Vec<String> = command.env_delta.iter().map(|(k, _)| k.clone()).collect();
        if let Err(e) = self.audit.log_execution(
            &command.tool_id,
            &command.binary,
            project_id,
            exit_code,
            timed_out,
            &env_keys,
        ) {
            warn!(error = %e, "failed to audit-log execution");
        }

        Ok(ExecResult {
            exit_code,
            timed_out,
        })
    }
}

/// Map a child termination to an exit code in `[0, 255]`:
/// exited(c) → c, killed by signal → 128, stopped → 127, unknown → 1.
#[cfg(unix)]
fn map_exit_status(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        return code.clamp(0, 255);
    }
    if status.stopped_signal().is_some() {
        return 127;
    }
    if status.signal().is_some() {
        return 128;
    }
    1
}

#[cfg(not(unix))]
fn map_exit_status(status: std::process::ExitStatus) -> i32 {
    status.code().map_or(1, |code| code.clamp(0, 255))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthorityLevel, AuthorityToken, NetworkPolicy};
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Shared buffer for capturing audit output in tests.
    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Cursor<Vec<u8>>>>);

    impl SharedBuf {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Cursor::new(Vec::new()))))
        }

        fn contents(&self) -> String {
            let cursor = self.0.lock().expect("test lock");
            String::from_utf8_lossy(cursor.get_ref()).to_string()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("test lock").write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.0.lock().expect("test lock").flush()
        }
    }

    fn token(level: AuthorityLevel) -> AuthorityToken {
        AuthorityToken {
            project_id: [2; 32],
            level,
            expiration: 0,
            allowed_tools: vec![
                "test.true".to_owned(),
                "test.false".to_owned(),
                "test.sleep".to_owned(),
                "test.printenv".to_owned(),
                "test.ls".to_owned(),
            ],
            allowed_bins: vec![
                "/bin/true".to_owned(),
                "/bin/false".to_owned(),
                "/bin/sleep".to_owned(),
                "/usr/bin/printenv".to_owned(),
                "/bin/ls".to_owned(),
            ],
            fs_root: PathBuf::from("/"),
            network: NetworkPolicy::Deny,
        }
    }

    fn command(tool_id: &str, binary: &str, args: Vec<&str>, cwd: PathBuf) -> Command {
        Command {
            tool_id: tool_id.to_owned(),
            binary: binary.to_owned(),
            args: args.into_iter().map(str::to_owned).collect(),
            cwd,
            env_delta: vec![],
            requested_capabilities: vec![],
        }
    }

    fn executor(level: AuthorityLevel, buf: &SharedBuf) -> Executor {
        let audit = Arc::new(AuditLogger::from_writer(Box::new(buf.clone())));
        let enforcer = Arc::new(Enforcer::new(Some(token(level)), Arc::clone(&audit)));
        Executor::new(enforcer, audit)
    }

    fn workdir() -> PathBuf {
        tempfile::tempdir()
            .expect("tempdir")
            .keep()
            .canonicalize()
            .expect("canonical")
    }

    #[tokio::test]
    async fn test_exit_zero() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);
        let result = exec
            .execute(
                &command("test.true", "/bin/true", vec![], workdir()),
                &ExecConfig::default(),
            )
            .await
            .expect("spawns");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_nonzero_exit_mapped() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);
        let result = exec
            .execute(
                &command("test.false", "/bin/false", vec![], workdir()),
                &ExecConfig::default(),
            )
            .await
            .expect("spawns");
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_denied_before_spawn_with_one_audit_event() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::Observe, &buf);
        let result = exec
            .execute(
                &command("test.true", "/bin/true", vec![], workdir()),
                &ExecConfig::default(),
            )
            .await;
        assert!(matches!(
            result,
            Err(ExecError::AuthorityDenied(DenialReason::InsufficientLevel))
        ));

        let lines: Vec<String> = buf.contents().trim().lines().map(str::to_owned).collect();
        assert_eq!(lines.len(), 1, "exactly one audit event per denial");
        let entry: serde_json::Value = serde_json::from_str(&lines[0]).expect("valid JSON");
        assert_eq!(entry["event_type"], "denial");
        assert_eq!(entry["details"]["denial_reason"], "insufficient_level");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let buf = SharedBuf::new();
        let audit = Arc::new(AuditLogger::from_writer(Box::new(buf.clone())));
        let mut tok = token(AuthorityLevel::ParameterizedTools);
        tok.allowed_tools.push("test.missing".to_owned());
        tok.allowed_bins.push("/nonexistent/cordon-binary".to_owned());
        let enforcer = Arc::new(Enforcer::new(Some(tok), Arc::clone(&audit)));
        let exec = Executor::new(enforcer, audit);

        let result = exec
            .execute(
                &command(
                    "test.missing",
                    "/nonexistent/cordon-binary",
                    vec![],
                    workdir(),
                ),
                &ExecConfig::default(),
            )
            .await;
        assert!(matches!(result, Err(ExecError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);
        let result = exec
            .execute(
                &command("test.sleep", "/bin/sleep", vec!["5"], workdir()),
                &ExecConfig { timeout_ms: 100 },
            )
            .await
            .expect("killed child still reaps");
        assert!(result.timed_out);
        assert_eq!(result.exit_code, 128, "killed by signal maps to 128");
    }

    #[tokio::test]
    async fn test_zero_timeout_means_none() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);
        let result = exec
            .execute(
                &command("test.sleep", "/bin/sleep", vec!["0"], workdir()),
                &ExecConfig { timeout_ms: 0 },
            )
            .await
            .expect("spawns");
        assert!(!result.timed_out);
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_child_environment_is_exactly_env_delta() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);

        // printenv exits 1 when the variable is absent. HOME is set in the
        // parent; an empty base means the child must not see it.
        let inherited = exec
            .execute(
                &command("test.printenv", "/usr/bin/printenv", vec!["HOME"], workdir()),
                &ExecConfig::default(),
            )
            .await
            .expect("spawns");
        assert_eq!(inherited.exit_code, 1, "parent environment must not leak");

        let mut with_delta =
            command("test.printenv", "/usr/bin/printenv", vec!["CORDON_MARK"], workdir());
        with_delta.env_delta = vec![("CORDON_MARK".to_owned(), "1".to_owned())];
        let delta = exec
            .execute(&with_delta, &ExecConfig::default())
            .await
            .expect("spawns");
        assert_eq!(delta.exit_code, 0, "env_delta is the child's environment");
    }

    #[tokio::test]
    async fn test_cwd_bound_to_command_cwd() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);

        let dir = workdir();
        std::fs::write(dir.join("marker"), b"x").expect("write marker");

        // ls of a relative name only succeeds from the bound cwd.
        let found = exec
            .execute(
                &command("test.ls", "/bin/ls", vec!["marker"], dir.clone()),
                &ExecConfig::default(),
            )
            .await
            .expect("spawns");
        assert_eq!(found.exit_code, 0);

        let elsewhere = workdir();
        let missing = exec
            .execute(
                &command("test.ls", "/bin/ls", vec!["marker"], elsewhere),
                &ExecConfig::default(),
            )
            .await
            .expect("spawns");
        assert_ne!(missing.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execution_audited_with_env_keys() {
        let buf = SharedBuf::new();
        let exec = executor(AuthorityLevel::ParameterizedTools, &buf);

        let mut cmd = command("test.true", "/bin/true", vec![], workdir());
        cmd.env_delta = vec![("SECRET_TOKEN".to_owned(), "hunter2".to_owned())];
        exec.execute(&cmd, &ExecConfig::default())
            .await
            .expect("spawns");

        let output = buf.contents();
        assert!(output.contains("\"event_type\":\"execution\""));
        assert!(output.contains("SECRET_TOKEN"), "key name is recorded");
        assert!(!output.contains("hunter2"), "value never reaches the log");
    }
}
