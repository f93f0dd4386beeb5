//! Cordon — a deterministic, capability-gated command execution engine.
//!
//! Invocations described by untrusted producers (AI-generated plans,
//! interactive users, stored plan files) are validated against versioned
//! tool schemas, gated by a project-scoped authority token, and spawned as
//! child processes. No string-interpreting shell is ever in the path; the
//! argv handed to the OS is fully determined by the schema and the parsed
//! arguments.
//!
//! See `DESIGN.md` for the grounding ledger and resolved design decisions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod kernel;
pub mod logging;
pub mod types;
