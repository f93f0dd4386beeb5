//! End-to-end scenarios over the public engine API: literal inputs in,
//! expected outcomes out.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cordon::kernel::audit::AuditLogger;
use cordon::kernel::builder::{self, BuildError};
use cordon::kernel::enforcer::Enforcer;
use cordon::kernel::executor::{ExecConfig, ExecError, Executor};
use cordon::kernel::plan::{parse_plan, validate_plan, StepResult};
use cordon::kernel::schema::{SchemaError, SchemaStore};
use cordon::kernel::validate::{validate, ValidationErrorKind};
use cordon::types::{
    AuthorityLevel, AuthorityToken, DenialReason, NetworkPolicy, ParsedArgs, ParsedFlag,
};

/// Shared buffer for capturing audit output.
#[derive(Clone)]
struct SharedBuf(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedBuf {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Cursor::new(Vec::new()))))
    }

    fn lines(&self) -> Vec<serde_json::Value> {
        let cursor = self.0.lock().expect("test lock");
        String::from_utf8_lossy(cursor.get_ref())
            .trim()
            .lines()
            .map(|l| serde_json::from_str(l).expect("audit lines are JSON"))
            .collect()
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

const TRUE_SCHEMA: &[u8] = br#"{
    "id": "test.true",
    "name": "true",
    "binary": "/bin/true",
    "version": 1,
    "risk": "safe",
    "flags": [],
    "positionals": []
}"#;

const COMMIT_SCHEMA: &[u8] = br#"{
    "id": "git.commit",
    "name": "git commit",
    "binary": "/usr/bin/git",
    "version": 1,
    "risk": "local_write",
    "flags": [
        {"name": "message", "short": 109, "arg_type": "string", "required": true},
        {"name": "all", "short": 97, "arg_type": "bool"}
    ]
}"#;

fn token(level: AuthorityLevel) -> AuthorityToken {
    AuthorityToken {
        project_id: [9; 32],
        level,
        expiration: 0,
        allowed_tools: vec![
            "test.true".to_owned(),
            "test.ls".to_owned(),
            "git.commit".to_owned(),
        ],
        allowed_bins: vec![
            "/bin/true".to_owned(),
            "/bin/ls".to_owned(),
            "/usr/bin/git".to_owned(),
        ],
        fs_root: PathBuf::from("/"),
        network: NetworkPolicy::Deny,
    }
}

fn engine(level: AuthorityLevel, buf: &SharedBuf) -> (Arc<Enforcer>, Executor) {
    let audit = Arc::new(AuditLogger::from_writer(Box::new(buf.clone())));
    let enforcer = Arc::new(Enforcer::new(Some(token(level)), Arc::clone(&audit)));
    let executor = Executor::new(Arc::clone(&enforcer), audit);
    (enforcer, executor)
}

fn workdir() -> PathBuf {
    tempfile::tempdir()
        .expect("tempdir")
        .keep()
        .canonicalize()
        .expect("canonical")
}

/// A permitted no-argument tool executes with exit 0.
#[tokio::test]
async fn happy_path_executes_with_exit_zero() {
    let mut store = SchemaStore::new();
    store.load(TRUE_SCHEMA).expect("schema loads");
    let schema = store.get("test.true").expect("stored");

    let command =
        builder::build(schema, &ParsedArgs::default(), &workdir(), vec![]).expect("builds");
    assert_eq!(command.binary, "/bin/true");
    assert_eq!(command.args, vec!["true"]);

    let buf = SharedBuf::new();
    let (enforcer, executor) = engine(AuthorityLevel::ParameterizedTools, &buf);
    enforcer.check(&command).expect("allowed");

    let result = executor
        .execute(&command, &ExecConfig::default())
        .await
        .expect("executes");
    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);
}

/// Observe-level authority refuses execution, with exactly
/// one audit event for the refusal.
#[tokio::test]
async fn observe_level_denies_execution_and_audits_once() {
    let mut store = SchemaStore::new();
    store.load(TRUE_SCHEMA).expect("schema loads");
    let schema = store.get("test.true").expect("stored");
    let command =
        builder::build(schema, &ParsedArgs::default(), &workdir(), vec![]).expect("builds");

    let buf = SharedBuf::new();
    let (_, executor) = engine(AuthorityLevel::Observe, &buf);

    let result = executor.execute(&command, &ExecConfig::default()).await;
    assert!(matches!(
        result,
        Err(ExecError::AuthorityDenied(DenialReason::InsufficientLevel))
    ));

    let events = buf.lines();
    assert_eq!(events.len(), 1, "one audit event per denial");
    assert_eq!(events[0]["event_type"], "denial");
    assert_eq!(events[0]["tool_id"], "test.true");
    assert_eq!(events[0]["details"]["denial_reason"], "insufficient_level");
}

/// Reloading the same version is a downgrade; the store keeps
/// the schema it had.
#[test]
fn version_downgrade_leaves_store_unchanged() {
    let mut store = SchemaStore::new();
    store.load(COMMIT_SCHEMA).expect("v1 loads");

    let result = store.load(COMMIT_SCHEMA);
    assert!(matches!(
        result,
        Err(SchemaError::VersionDowngrade {
            stored: 1,
            incoming: 1,
            ..
        })
    ));
    assert_eq!(store.count(), 1);
    assert_eq!(store.get("git.commit").expect("kept").version, 1);
}

/// A missing required flag is one failure naming the flag,
/// and the builder builds nothing.
#[test]
fn missing_required_flag_fails_validation_and_build() {
    let mut store = SchemaStore::new();
    store.load(COMMIT_SCHEMA).expect("schema loads");
    let schema = store.get("git.commit").expect("stored");

    let failures = validate(schema, &ParsedArgs::default());
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ValidationErrorKind::MissingRequiredFlag);
    assert_eq!(failures[0].context, "message");

    let result = builder::build(schema, &ParsedArgs::default(), &workdir(), vec![]);
    assert!(matches!(
        result,
        Err(BuildError::SchemaValidationFailed { .. })
    ));
}

/// A three-step plan with one valid, one unknown-tool, and
/// one schema-invalid step reports every outcome.
#[test]
fn plan_with_mixed_outcomes() {
    let mut store = SchemaStore::new();
    store.load(COMMIT_SCHEMA).expect("schema loads");

    let raw = br#"{
        "plan_id": "plan-7",
        "description": "mixed",
        "steps": [
            {
                "tool_id": "git.commit",
                "params": [{"name": "message", "value": "add feature"}],
                "justification": "commit the work",
                "risk_score": 0.1
            },
            {"tool_id": "rm.everything", "params": []},
            {"tool_id": "git.commit", "params": []}
        ]
    }"#;
    let plan = parse_plan(raw).expect("document decodes");

    let buf = SharedBuf::new();
    let (enforcer, _) = engine(AuthorityLevel::ParameterizedTools, &buf);
    let validation = validate_plan(&plan, &store, &enforcer);

    assert!(!validation.all_valid);
    assert_eq!(validation.failed_count, 2);
    assert_eq!(validation.step_results[0].result, StepResult::Valid);
    assert_eq!(validation.step_results[1].result, StepResult::UnknownTool);
    match &validation.step_results[2].result {
        StepResult::SchemaInvalid { failures } => {
            assert_eq!(failures[0].kind, ValidationErrorKind::MissingRequiredFlag);
            assert_eq!(failures[0].context, "message");
        }
        other => panic!("expected SchemaInvalid, got {other:?}"),
    }
}

/// The built argv is exactly the normalized long form, and
/// two independent builds agree element-wise.
#[test]
fn argv_is_deterministic_and_normalized() {
    let mut store = SchemaStore::new();
    store.load(COMMIT_SCHEMA).expect("schema loads");
    let schema = store.get("git.commit").expect("stored");

    let parsed = ParsedArgs {
        flags: vec![
            ParsedFlag {
                name: "message".to_owned(),
                value: Some("test commit".to_owned()),
            },
            ParsedFlag {
                name: "all".to_owned(),
                value: None,
            },
        ],
        positionals: vec![],
    };

    let dir = workdir();
    let first = builder::build(schema, &parsed, &dir, vec![]).expect("builds");
    let second = builder::build(schema, &parsed, &dir, vec![]).expect("builds");

    assert_eq!(first.args, vec!["commit", "--message", "test commit", "--all"]);
    assert_eq!(first.args, second.args);
}

/// An argv element containing a space reaches the child as one argument;
/// nothing between the builder and the OS re-splits it.
#[tokio::test]
async fn argv_elements_are_never_resplit() {
    let dir = workdir();
    std::fs::write(dir.join("a b"), b"x").expect("write spaced file");

    let mut store = SchemaStore::new();
    store
        .load(
            br#"{
                "id": "test.ls",
                "name": "ls",
                "binary": "/bin/ls",
                "version": 1,
                "risk": "safe",
                "positionals": [
                    {"name": "entry", "arg_type": "path", "required": true}
                ]
            }"#,
        )
        .expect("schema loads");
    let schema = store.get("test.ls").expect("stored");

    let parsed = ParsedArgs {
        flags: vec![],
        positionals: vec!["a b".to_owned()],
    };
    let command = builder::build(schema, &parsed, &dir, vec![]).expect("builds");
    assert_eq!(command.args, vec!["a b"]);

    let buf = SharedBuf::new();
    let (_, executor) = engine(AuthorityLevel::ParameterizedTools, &buf);
    let result = executor
        .execute(&command, &ExecConfig::default())
        .await
        .expect("executes");
    // Re-splitting would hand ls two nonexistent names and a nonzero exit.
    assert_eq!(result.exit_code, 0);
}
