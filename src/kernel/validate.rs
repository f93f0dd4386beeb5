//! Argument validation against a tool schema.
//!
//! Validation is pure: no I/O, no state. All failures in one invocation are
//! collected and returned together so a producer, typically an AI emitting
//! a plan, can correct every problem in one pass instead of replaying the
//! pipeline failure by failure.

use serde::Serialize;

use crate::types::{ArgType, ParsedArgs, ToolSchema};

/// What a single check found wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Flag name is not declared by the schema.
    UnknownFlag,
    /// Value does not conform to the declared argument type.
    TypeMismatch,
    /// Integer value falls outside the declared range.
    IntOutOfRange,
    /// Value is not a member of the declared enum set.
    EnumValueInvalid,
    /// Flag supplied more than once without `multiple`.
    DuplicateFlagNotAllowed,
    /// Required flag absent.
    MissingRequiredFlag,
    /// Required positional slot unfilled.
    MissingRequiredPositional,
    /// More positionals supplied than the schema declares slots.
    TooManyPositionals,
    /// More than one member of an exclusive group supplied.
    MutualExclusionViolation,
}

/// One validation failure, carrying the flag or positional it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    /// The kind of failure.
    pub kind: ValidationErrorKind,
    /// The offending flag or positional name. For surplus positionals,
    /// the first surplus value itself (no slot name exists for it).
    pub context: String,
}

impl ValidationFailure {
    fn new(kind: ValidationErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}

/// Validate `parsed` against `schema`, returning every failure found.
///
/// A known-valid input yields an empty list; every violating flag or
/// positional contributes at least one entry.
pub fn validate(schema: &ToolSchema, parsed: &ParsedArgs) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();

    // Unknown flags and per-occurrence type conformance, in supplied order.
    for occurrence in &parsed.flags {
        let Some(def) = schema.flags.iter().find(|f| f.name == occurrence.name) else {
            failures.push(ValidationFailure::new(
                ValidationErrorKind::UnknownFlag,
                &occurrence.name,
            ));
            continue;
        };
        check_value(
            def.arg_type,
            &def.enum_values,
            def.range_min,
            def.range_max,
            occurrence.value.as_deref(),
            &def.name,
            &mut failures,
        );
    }

    // Duplicates: one failure per flag seen more than once without `multiple`.
    for def in &schema.flags {
        let seen = parsed.flags.iter().filter(|f| f.name == def.name).count();
        if seen > 1 && !def.multiple {
            failures.push(ValidationFailure::new(
                ValidationErrorKind::DuplicateFlagNotAllowed,
                &def.name,
            ));
        }
    }

    // Missing required flags.
    for def in &schema.flags {
        if def.required && !parsed.flags.iter().any(|f| f.name == def.name) {
            failures.push(ValidationFailure::new(
                ValidationErrorKind::MissingRequiredFlag,
                &def.name,
            ));
        }
    }

    // Positional arity. Slots fill in order, so the first missing required
    // slot is the first required definition at or past the supplied count.
    let supplied = parsed.positionals.len();
    let required = schema.positionals.iter().filter(|p| p.required).count();
    if supplied < required {
        let first_missing = schema
            .positionals
            .iter()
            .enumerate()
            .find(|(i, p)| *i >= supplied && p.required)
            .map(|(_, p)| p.name.clone())
            .unwrap_or_default();
        failures.push(ValidationFailure::new(
            ValidationErrorKind::MissingRequiredPositional,
            first_missing,
        ));
    }
    if supplied > schema.positionals.len() {
        failures.push(ValidationFailure::new(
            ValidationErrorKind::TooManyPositionals,
            &parsed.positionals[schema.positionals.len()],
        ));
    }

    // Positional type conformance for the slots that were filled.
    for (value, def) in parsed.positionals.iter().zip(&schema.positionals) {
        check_value(
            def.arg_type,
            &def.enum_values,
            None,
            None,
            Some(value),
            &def.name,
            &mut failures,
        );
    }

    // Mutual exclusion.
    for group in &schema.exclusive_groups {
        let seen = group
            .iter()
            .filter(|m| parsed.flags.iter().any(|f| &&f.name == m))
            .count();
        if seen > 1 {
            failures.push(ValidationFailure::new(
                ValidationErrorKind::MutualExclusionViolation,
                group.first().cloned().unwrap_or_default(),
            ));
        }
    }

    failures
}

/// Type-check a single supplied value against its declaration.
fn check_value(
    arg_type: ArgType,
    enum_values: &[String],
    range_min: Option<i64>,
    range_max: Option<i64>,
    value: Option<&str>,
    context: &str,
    failures: &mut Vec<ValidationFailure>,
) {
    match (arg_type, value) {
        // Toggle form.
        (ArgType::Bool, None) => {}
        (ArgType::Bool, Some("true" | "false")) => {}
        (ArgType::Bool, Some(_)) => {
            failures.push(ValidationFailure::new(
                ValidationErrorKind::TypeMismatch,
                context,
            ));
        }
        // Every non-bool type requires a value.
        (_, None) => {
            failures.push(ValidationFailure::new(
                ValidationErrorKind::TypeMismatch,
                context,
            ));
        }
        (ArgType::Int, Some(v)) => match v.parse::<i64>() {
            Ok(n) => {
                let below = range_min.is_some_and(|min| n < min);
                let above = range_max.is_some_and(|max| n > max);
                if below || above {
                    failures.push(ValidationFailure::new(
                        ValidationErrorKind::IntOutOfRange,
                        context,
                    ));
                }
            }
            Err(_) => {
                failures.push(ValidationFailure::new(
                    ValidationErrorKind::TypeMismatch,
                    context,
                ));
            }
        },
        (ArgType::Float, Some(v)) => {
            if v.parse::<f64>().is_err() {
                failures.push(ValidationFailure::new(
                    ValidationErrorKind::TypeMismatch,
                    context,
                ));
            }
        }
        (ArgType::Enum, Some(v)) => {
            // Byte-exact membership.
            if !enum_values.iter().any(|e| e == v) {
                failures.push(ValidationFailure::new(
                    ValidationErrorKind::EnumValueInvalid,
                    context,
                ));
            }
        }
        (ArgType::String | ArgType::Path, Some(_)) => {}
    }
}
