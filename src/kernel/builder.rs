//! Command construction from a validated schema and parsed arguments.
//!
//! The builder normalizes every invocation into a fixed argv shape:
//! subcommand token from the dotted id, long-form flags in the order the
//! producer supplied them, positionals last. The argv is fully determined
//! by `(schema, parsed)`, which is what reduces a security review of argv
//! to a review of the schema. Nothing is partially built: any validation
//! failure aborts before the first argv element exists.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::kernel::validate::{validate, ValidationFailure};
use crate::types::{Command, ParsedArgs, ToolSchema};

/// Errors from command construction.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Validation found failures; nothing was built.
    #[error("schema validation failed for '{tool_id}' ({} failure(s))", failures.len())]
    SchemaValidationFailed {
        /// The tool the invocation targeted.
        tool_id: String,
        /// Every failure the validator found.
        failures: Vec<ValidationFailure>,
    },
    /// The working directory could not be canonicalised at the input
    /// boundary; the enforcer's jail check requires canonical paths.
    #[error("working directory '{}' cannot be canonicalised: {source}", cwd.display())]
    CwdUnresolvable {
        /// The path as supplied.
        cwd: PathBuf,
        /// The underlying filesystem error.
        source: std::io::Error,
    },
}

/// Build a [`Command`] from a schema and parsed arguments.
///
/// argv order: the dotted id's tail as a leading subcommand token (when the
/// id contains a `.`), then each supplied flag re-emitted in long form with
/// its value as the following discrete element, then positionals in order.
/// Short forms never reach argv.
pub fn build(
    schema: &ToolSchema,
    parsed: &ParsedArgs,
    cwd: &Path,
    env_delta: Vec<(String, String)>,
) -> Result<Command, BuildError> {
    let failures = validate(schema, parsed);
    if !failures.is_empty() {
        return Err(BuildError::SchemaValidationFailed {
            tool_id: schema.id.clone(),
            failures,
        });
    }

    let cwd = cwd
        .canonicalize()
        .map_err(|source| BuildError::CwdUnresolvable {
            cwd: cwd.to_path_buf(),
            source,
        })?;

    let mut args = Vec::new();
    if let Some((_, subcommand)) = schema.id.rsplit_once('.') {
        args.push(subcommand.to_owned());
    }
    for flag in &parsed.flags {
        args.push(format!("--{}", flag.name));
        if let Some(value) = &flag.value {
            args.push(value.clone());
        }
    }
    args.extend(parsed.positionals.iter().cloned());

    Ok(Command {
        tool_id: schema.id.clone(),
        binary: schema.binary.clone(),
        args,
        cwd,
        env_delta,
        requested_capabilities: schema.capabilities.clone(),
    })
}
