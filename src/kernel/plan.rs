//! Plan protocol: validation of multi-step plans from untrusted producers.
//!
//! A plan is the usual AI-producer shape: an ordered list of tool
//! invocations with justifications and self-assessed risk. Every step is
//! evaluated; a failing step never blocks the evaluation of later steps,
//! so the producer sees every problem in one pass. Dry-run is this same
//! pipeline; the executor is never invoked from here.

use serde::Serialize;
use thiserror::Error;

use crate::kernel::enforcer::Enforcer;
use crate::kernel::schema::SchemaStore;
use crate::kernel::validate::{validate, ValidationFailure};
use crate::types::{Command, DenialReason, Plan};

/// Errors from plan document decoding.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The document could not be decoded into a plan.
    #[error("plan document malformed: {0}")]
    Malformed(String),
}

/// Decode a plan document. Unknown top-level keys are ignored.
pub fn parse_plan(raw: &[u8]) -> Result<Plan, PlanError> {
    serde_json::from_slice(raw).map_err(|e| PlanError::Malformed(e.to_string()))
}

/// Outcome of validating one plan step. Exactly one variant per step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum StepResult {
    /// The step may execute under the current token.
    Valid,
    /// The step names a tool with no activated schema.
    UnknownTool,
    /// The step's arguments failed schema validation.
    SchemaInvalid {
        /// Every failure the validator found.
        failures: Vec<ValidationFailure>,
    },
    /// The authority gate refused the step.
    AuthorityDenied {
        /// The rule that refused.
        reason: DenialReason,
    },
}

/// Validation outcome for one step, in document order.
#[derive(Debug, Clone, Serialize)]
pub struct StepValidation {
    /// Zero-based step index in document order.
    pub index: usize,
    /// The tool the step named.
    pub tool_id: String,
    /// The step's outcome.
    pub result: StepResult,
}

/// Validation outcome for a whole plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanValidation {
    /// The producer's plan id.
    pub plan_id: String,
    /// True when the plan carried zero steps. Distinct from malformed
    /// input, which never reaches this type.
    pub empty: bool,
    /// Per-step outcomes, one per step, in document order.
    pub step_results: Vec<StepValidation>,
    /// True when every step validated.
    pub all_valid: bool,
    /// Number of non-valid step results.
    pub failed_count: usize,
}

/// Validate every step of `plan` against the store and the gate.
///
/// Per step: schema lookup, then argument validation, then an authority
/// check on a provisional command (empty argv, cwd bound to the token's
/// filesystem root — the plan's binding site is the project root, with no
/// per-step cwd override at this stage).
pub fn validate_plan(plan: &Plan, store: &SchemaStore, enforcer: &Enforcer) -> PlanValidation {
    let mut step_results = Vec::with_capacity(plan.steps.len());

    for (index, step) in plan.steps.iter().enumerate() {
        let result = match store.get(&step.tool_id) {
            None => StepResult::UnknownTool,
            Some(schema) => {
                let failures = validate(schema, &step.parsed_args());
                if !failures.is_empty() {
                    // The step was refused; record it on the audit stream
                    // alongside gate denials.
                    enforcer.report_validation_denial(&schema.id, &schema.binary);
                    StepResult::SchemaInvalid { failures }
                } else {
                    let provisional = Command {
                        tool_id: schema.id.clone(),
                        binary: schema.binary.clone(),
                        args: vec![],
                        cwd: enforcer
                            .token()
                            .map(|t| t.fs_root.clone())
                            .unwrap_or_default(),
                        env_delta: vec![],
                        requested_capabilities: schema.capabilities.clone(),
                    };
                    match enforcer.check(&provisional) {
                        Ok(()) => StepResult::Valid,
                        Err(reason) => StepResult::AuthorityDenied { reason },
                    }
                }
            }
        };
        step_results.push(StepValidation {
            index,
            tool_id: step.tool_id.clone(),
            result,
        });
    }

    let failed_count = step_results
        .iter()
        .filter(|s| s.result != StepResult::Valid)
        .count();

    PlanValidation {
        plan_id: plan.plan_id.clone(),
        empty: plan.steps.is_empty(),
        all_valid: failed_count == 0,
        failed_count,
        step_results,
    }
}
