//! Runtime paths and authority configuration loading.
//!
//! A project's engine state lives under `<project>/.cordon/`:
//! - `schemas/` — the activated schema pack, one JSON document per tool
//! - `authority.toml` — the human-owned authority configuration
//! - `audit.jsonl` — the append-only audit stream
//! - `learning.json` — persisted execution-outcome statistics
//! - `logs/` — structured runtime logs
//!
//! The authority file is the only input that grants rights, so its loader
//! is strict: a malformed document, an unknown level, or an unknown
//! network policy are distinct errors, and absence of the file yields a
//! default observe-level token rather than any implicit grant.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{AuthorityLevel, AuthorityToken, NetworkPolicy};

/// Resolved paths under `<project>/.cordon/`.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Canonical project root; the token's binding site.
    pub project_root: PathBuf,
    /// Engine state directory.
    pub cordon_dir: PathBuf,
    /// Activated schema pack directory.
    pub schemas_dir: PathBuf,
    /// Authority configuration file.
    pub authority_toml: PathBuf,
    /// Append-only audit stream.
    pub audit_log: PathBuf,
    /// Persisted learning store.
    pub learning_json: PathBuf,
    /// Structured log directory.
    pub logs_dir: PathBuf,
}

/// Resolve runtime paths for a project root.
///
/// The root is canonicalised here, once, so that everything derived from
/// it (project id, default `fs_root`) is canonical by construction.
///
/// # Errors
///
/// Returns an error if the project root cannot be canonicalised.
pub fn runtime_paths(project_root: &Path) -> anyhow::Result<RuntimePaths> {
    let project_root = project_root.canonicalize().map_err(|e| {
        anyhow::anyhow!(
            "cannot canonicalise project root {}: {e}",
            project_root.display()
        )
    })?;
    let cordon_dir = project_root.join(".cordon");
    Ok(RuntimePaths {
        schemas_dir: cordon_dir.join("schemas"),
        authority_toml: cordon_dir.join("authority.toml"),
        audit_log: cordon_dir.join("audit.jsonl"),
        learning_json: cordon_dir.join("learning.json"),
        logs_dir: cordon_dir.join("logs"),
        cordon_dir,
        project_root,
    })
}

/// SHA-256 of the canonical project root path bytes.
pub fn project_id(canonical_root: &Path) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(canonical_root.as_os_str().as_encoded_bytes());
    hasher.finalize().into()
}

/// Errors from authority configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or parsed.
    #[error("authority config malformed: {0}")]
    Malformed(String),
    /// `authority_level` names no known level.
    #[error("unknown authority level '{0}'")]
    InvalidLevel(String),
    /// `network` names no known policy.
    #[error("unknown network policy '{0}'")]
    InvalidNetworkPolicy(String),
    /// `fs_root` could not be canonicalised at token construction.
    #[error("fs_root '{path}' cannot be canonicalised: {source}")]
    FsRootUnresolvable {
        /// The configured value.
        path: String,
        /// The underlying filesystem error.
        source: std::io::Error,
    },
}

/// On-disk shape of `authority.toml`. Levels and policies are decoded as
/// strings so an unknown value yields its own error rather than a generic
/// parse failure.
#[derive(Debug, Deserialize)]
struct AuthorityConfig {
    authority_level: String,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    allowed_bins: Vec<String>,
    #[serde(default = "default_fs_root")]
    fs_root: String,
    #[serde(default = "default_network")]
    network: String,
    #[serde(default)]
    expiration_seconds: i64,
}

fn default_fs_root() -> String {
    ".".to_owned()
}

fn default_network() -> String {
    "deny".to_owned()
}

/// Load the authority token for a project.
///
/// Absence of the file yields the default observe-level token bound to the
/// project root. `expiration_seconds > 0` becomes an absolute unix expiry
/// at load time; `0` stays session-only.
pub fn load_authority(paths: &RuntimePaths) -> Result<AuthorityToken, ConfigError> {
    if !paths.authority_toml.exists() {
        return Ok(default_token(&paths.project_root));
    }

    let raw = std::fs::read_to_string(&paths.authority_toml)
        .map_err(|e| ConfigError::Malformed(e.to_string()))?;
    let config: AuthorityConfig =
        toml::from_str(&raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;

    let level = parse_level(&config.authority_level)?;
    let network = parse_network(&config.network)?;

    let fs_root = if config.fs_root == "." {
        paths.project_root.clone()
    } else {
        let configured = PathBuf::from(&config.fs_root);
        configured
            .canonicalize()
            .map_err(|source| ConfigError::FsRootUnresolvable {
                path: config.fs_root.clone(),
                source,
            })?
    };

    let expiration = if config.expiration_seconds > 0 {
        chrono::Utc::now().timestamp() + config.expiration_seconds
    } else {
        0
    };

    Ok(AuthorityToken {
        project_id: project_id(&paths.project_root),
        level,
        expiration,
        allowed_tools: config.allowed_tools,
        allowed_bins: config.allowed_bins,
        fs_root,
        network,
    })
}

/// The token granted when no authority file exists: observe, no
/// allow-lists, jailed to the project root.
fn default_token(project_root: &Path) -> AuthorityToken {
    AuthorityToken {
        project_id: project_id(project_root),
        level: AuthorityLevel::Observe,
        expiration: 0,
        allowed_tools: vec![],
        allowed_bins: vec![],
        fs_root: project_root.to_path_buf(),
        network: NetworkPolicy::Deny,
    }
}

fn parse_level(raw: &str) -> Result<AuthorityLevel, ConfigError> {
    match raw {
        "observe" => Ok(AuthorityLevel::Observe),
        "tools_only" => Ok(AuthorityLevel::ToolsOnly),
        "parameterized_tools" => Ok(AuthorityLevel::ParameterizedTools),
        "scoped_commands" => Ok(AuthorityLevel::ScopedCommands),
        other => Err(ConfigError::InvalidLevel(other.to_owned())),
    }
}

fn parse_network(raw: &str) -> Result<NetworkPolicy, ConfigError> {
    match raw {
        "deny" => Ok(NetworkPolicy::Deny),
        "localhost" => Ok(NetworkPolicy::Localhost),
        "allowlist" => Ok(NetworkPolicy::Allowlist),
        other => Err(ConfigError::InvalidNetworkPolicy(other.to_owned())),
    }
}
