//! Tool schema store.
//!
//! Schemas are the trusted contract defining how arguments are interpreted.
//! They enter the store only through [`SchemaStore::load`], which decodes a
//! JSON schema document, checks it for internal consistency, and enforces
//! strict monotonic versioning: replacing a stored schema with an equal or
//! lesser version is equivalent to rolling back a security fix and is
//! rejected. Directory loading reads the activated pack only; candidate
//! schemas produced by out-of-core tooling are never consulted.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{ArgType, ToolSchema};

/// Errors from schema loading.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document could not be decoded into a schema.
    #[error("schema document malformed: {0}")]
    Malformed(String),
    /// The document decoded but contradicts itself.
    #[error("schema '{id}' internally inconsistent: {detail}")]
    InternallyInconsistent {
        /// Offending schema id.
        id: String,
        /// What contradicted what.
        detail: String,
    },
    /// The incoming version does not strictly upgrade the stored one.
    #[error("schema '{id}' version {incoming} does not upgrade stored version {stored}")]
    VersionDowngrade {
        /// Offending schema id.
        id: String,
        /// Version currently in the store.
        stored: u32,
        /// Version the document carried.
        incoming: u32,
    },
}

/// Mapping from tool id to its activated schema.
///
/// `load` is the only mutating operation; `get` and `count` borrow. The
/// store holds no interior mutability, so the borrow checker rules out a
/// mutation overlapping a lookup within one runtime.
#[derive(Debug, Default)]
pub struct SchemaStore {
    schemas: HashMap<String, ToolSchema>,
}

impl SchemaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode, check, and store one schema document.
    ///
    /// On success the new schema replaces any previous version atomically.
    /// On any error the store is left unchanged.
    pub fn load(&mut self, raw: &[u8]) -> Result<(), SchemaError> {
        let schema: ToolSchema =
            serde_json::from_slice(raw).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        check_consistency(&schema)?;

        if let Some(existing) = self.schemas.get(&schema.id) {
            if schema.version <= existing.version {
                return Err(SchemaError::VersionDowngrade {
                    id: schema.id,
                    stored: existing.version,
                    incoming: schema.version,
                });
            }
        }

        debug!(id = %schema.id, version = schema.version, "schema stored");
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    /// Look up a schema by tool id.
    pub fn get(&self, tool_id: &str) -> Option<&ToolSchema> {
        self.schemas.get(tool_id)
    }

    /// Number of schemas in the store.
    pub fn count(&self) -> usize {
        self.schemas.len()
    }

    /// All stored ids, sorted for stable listing.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Load every `*.json` document in `dir` through [`SchemaStore::load`].
    ///
    /// A file that fails to load is skipped with a warning naming the path
    /// and error; it never aborts the walk. Returns the number of schemas
    /// loaded. A missing directory loads nothing.
    ///
    /// # Errors
    ///
    /// Returns an error only when the directory itself cannot be read.
    pub fn load_dir(&mut self, dir: &Path) -> anyhow::Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        // Deterministic load order so version conflicts resolve the same
        // way on every run.
        entries.sort();

        let mut loaded = 0;
        for path in entries {
            let raw = match std::fs::read(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable schema file");
                    continue;
                }
            };
            match self.load(&raw) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid schema file");
                }
            }
        }
        Ok(loaded)
    }
}

/// Reject documents that decoded but contradict themselves.
fn check_consistency(schema: &ToolSchema) -> Result<(), SchemaError> {
    let inconsistent = |detail: String| SchemaError::InternallyInconsistent {
        id: schema.id.clone(),
        detail,
    };

    if schema.id.is_empty() || schema.id.split('.').any(str::is_empty) {
        return Err(inconsistent(format!("invalid tool id '{}'", schema.id)));
    }
    if schema.binary.is_empty() {
        return Err(inconsistent("empty binary path".to_owned()));
    }

    for flag in &schema.flags {
        if flag.arg_type == ArgType::Enum && flag.enum_values.is_empty() {
            return Err(inconsistent(format!(
                "flag '{}' is an enum with no enum_values",
                flag.name
            )));
        }
        if flag.required && flag.default.is_some() {
            return Err(inconsistent(format!(
                "flag '{}' is required but carries a default",
                flag.name
            )));
        }
        let ranged = matches!(flag.arg_type, ArgType::Int | ArgType::Float);
        if !ranged && (flag.range_min.is_some() || flag.range_max.is_some()) {
            return Err(inconsistent(format!(
                "flag '{}' carries range bounds but is not int or float",
                flag.name
            )));
        }
        if let (Some(min), Some(max)) = (flag.range_min, flag.range_max) {
            if min > max {
                return Err(inconsistent(format!(
                    "flag '{}' range_min {min} exceeds range_max {max}",
                    flag.name
                )));
            }
        }
    }

    for positional in &schema.positionals {
        if positional.arg_type == ArgType::Enum && positional.enum_values.is_empty() {
            return Err(inconsistent(format!(
                "positional '{}' is an enum with no enum_values",
                positional.name
            )));
        }
    }

    for group in &schema.exclusive_groups {
        for member in group {
            if !schema.flags.iter().any(|f| &f.name == member) {
                return Err(inconsistent(format!(
                    "exclusive group references undeclared flag '{member}'"
                )));
            }
        }
    }

    Ok(())
}
