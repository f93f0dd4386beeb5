//! Core data model for the execution engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Argument type tag for flags and positionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    /// Toggle flag; value absent, or literally `"true"` / `"false"`.
    Bool,
    /// Arbitrary string value.
    String,
    /// Decimal integer, optionally range-bounded by the flag definition.
    Int,
    /// Floating-point value.
    Float,
    /// Filesystem path, passed through verbatim.
    Path,
    /// Value drawn from the definition's closed `enum_values` set.
    Enum,
}

/// Risk classification for a tool, lowest to highest. Metadata only; the
/// enforcer never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only observation.
    Safe,
    /// Writes confined to the project tree.
    LocalWrite,
    /// Writes visible outside the project (remotes, registries).
    SharedWrite,
    /// Irreversible deletion or overwrite.
    Destructive,
}

/// Definition of one named flag in a tool schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDef {
    /// Long flag name, without the leading dashes.
    pub name: String,
    /// Optional single-byte short form. Producers may accept it; the
    /// builder re-emits long form only.
    #[serde(default)]
    pub short: Option<u8>,
    /// Value type this flag accepts.
    pub arg_type: ArgType,
    /// Whether the flag must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Closed value set; non-empty exactly when `arg_type` is `Enum`.
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Inclusive lower bound; only meaningful for `Int` / `Float`.
    #[serde(default)]
    pub range_min: Option<i64>,
    /// Inclusive upper bound; only meaningful for `Int` / `Float`.
    #[serde(default)]
    pub range_max: Option<i64>,
    /// Whether the flag may be supplied more than once.
    #[serde(default)]
    pub multiple: bool,
    /// Human-readable description for producers.
    #[serde(default)]
    pub description: String,
    /// Recorded for producers; the builder never injects it into argv.
    /// A flag that is both `required` and defaulted is rejected at load.
    #[serde(default)]
    pub default: Option<String>,
}

/// Definition of one positional argument slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionalDef {
    /// Slot name, used as failure context.
    pub name: String,
    /// Value type this slot accepts.
    pub arg_type: ArgType,
    /// Whether the slot must be filled.
    #[serde(default)]
    pub required: bool,
    /// Closed value set; non-empty exactly when `arg_type` is `Enum`.
    #[serde(default)]
    pub enum_values: Vec<String>,
}

/// A versioned tool schema: the trusted contract defining how arguments to
/// one tool (or one subcommand, via dotted id) are interpreted.
///
/// The `subcommands` key some documents carry is reserved and ignored;
/// subcommands are separate top-level schemas whose id uses dot notation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool id: `"tool"` or `"tool.sub"`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Binary path used as argv\[0\]. Resolved before load; compared by
    /// string equality at the gate.
    pub binary: String,
    /// Schema version; the store only accepts strict upgrades.
    pub version: u32,
    /// Risk classification.
    pub risk: RiskLevel,
    /// Capabilities this tool requests (e.g. `"network"`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Flag definitions.
    #[serde(default)]
    pub flags: Vec<FlagDef>,
    /// Positional slot definitions, in argv order.
    #[serde(default)]
    pub positionals: Vec<PositionalDef>,
    /// Groups of mutually exclusive flag names.
    #[serde(default)]
    pub exclusive_groups: Vec<Vec<String>>,
}

/// One flag occurrence as supplied by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFlag {
    /// Long flag name, without dashes.
    pub name: String,
    /// Value, if one was supplied.
    #[serde(default)]
    pub value: Option<String>,
}

/// Producer-supplied arguments for one invocation. Flag order is the order
/// the producer gave; positional order is argv order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedArgs {
    /// Flag occurrences, in supplied order.
    #[serde(default)]
    pub flags: Vec<ParsedFlag>,
    /// Positional values, in argv order.
    #[serde(default)]
    pub positionals: Vec<String>,
}

/// A fully built invocation. Every argument is a discrete argv element; no
/// element is ever re-split downstream. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Schema id this command was built from.
    pub tool_id: String,
    /// Binary path handed to the OS as the program.
    pub binary: String,
    /// argv\[1..\], one discrete element per argument.
    pub args: Vec<String>,
    /// Canonical working directory for the child.
    pub cwd: PathBuf,
    /// The child's complete environment, applied over an empty base.
    pub env_delta: Vec<(String, String)>,
    /// Capabilities carried over from the schema.
    pub requested_capabilities: Vec<String>,
}

/// Authority level. Deliberately non-inheriting: each level is a distinct
/// contract, not a superset of the levels below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityLevel {
    /// No execute rights at all.
    Observe,
    /// Allow-listed tools with an empty argv only.
    ToolsOnly,
    /// Allow-listed tools with schema-validated, size-bounded arguments.
    ParameterizedTools,
    /// Allow-listed tools with unbounded schema-validated arguments.
    ScopedCommands,
}

/// Outbound network policy carried by the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// No network capability may be requested.
    Deny,
    /// Loopback only.
    Localhost,
    /// Restricted to an out-of-core allowlist.
    Allowlist,
}

/// The capability envelope scoped to one project. Produced by the config
/// loader, treated as immutable for its lifetime, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityToken {
    /// SHA-256 of the canonical project root path.
    pub project_id: [u8; 32],
    /// Granted authority level.
    pub level: AuthorityLevel,
    /// Absolute unix expiry; `0` means session-only (never expires).
    pub expiration: i64,
    /// Tool ids the token authorizes.
    pub allowed_tools: Vec<String>,
    /// Binary paths the token authorizes, compared by string equality.
    pub allowed_bins: Vec<String>,
    /// Canonical filesystem jail root for `cwd`.
    pub fs_root: PathBuf,
    /// Outbound network policy.
    pub network: NetworkPolicy,
}

/// The rule that refused a command; the atom the audit log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No authority token is loaded.
    NoAuthorityLoaded,
    /// Tool id is not in the token's allow-list.
    ToolNotInAllowList,
    /// Binary path is not in the token's allow-list.
    BinaryNotInAllowList,
    /// Argument sizes exceed the bounds of `ParameterizedTools`.
    ParametersOutOfBounds,
    /// Working directory is outside the token's filesystem root.
    CwdOutsideFsRoot,
    /// The token's expiry has passed.
    AuthorityExpired,
    /// The token's level does not permit this shape of command.
    InsufficientLevel,
    /// The invocation failed schema validation.
    SchemaValidationFailed,
    /// A requested capability violates the token's network policy.
    NetworkPolicyViolation,
}

impl DenialReason {
    /// Stable snake_case tag, as recorded by the audit log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAuthorityLoaded => "no_authority_loaded",
            Self::ToolNotInAllowList => "tool_not_in_allow_list",
            Self::BinaryNotInAllowList => "binary_not_in_allow_list",
            Self::ParametersOutOfBounds => "parameters_out_of_bounds",
            Self::CwdOutsideFsRoot => "cwd_outside_fs_root",
            Self::AuthorityExpired => "authority_expired",
            Self::InsufficientLevel => "insufficient_level",
            Self::SchemaValidationFailed => "schema_validation_failed",
            Self::NetworkPolicyViolation => "network_policy_violation",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A multi-step declarative invocation from an untrusted producer.
///
/// Unknown top-level document keys are ignored at decode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Producer-assigned plan identifier.
    pub plan_id: String,
    /// Human-readable intent.
    #[serde(default)]
    pub description: String,
    /// Steps, in document order.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Tool id the step invokes.
    pub tool_id: String,
    /// Flag occurrences, same shape the validator consumes.
    #[serde(default)]
    pub params: Vec<ParsedFlag>,
    /// Positional values.
    #[serde(default)]
    pub positionals: Vec<String>,
    /// Producer's stated reason for the step.
    #[serde(default)]
    pub justification: String,
    /// Producer's self-assessed risk in `[0, 1]`.
    #[serde(default)]
    pub risk_score: f64,
    /// Capabilities the producer asks for.
    #[serde(default)]
    pub capability_requests: Vec<String>,
}

impl PlanStep {
    /// The step's params and positionals as the validator's input shape.
    pub fn parsed_args(&self) -> ParsedArgs {
        ParsedArgs {
            flags: self.params.clone(),
            positionals: self.positionals.clone(),
        }
    }
}
