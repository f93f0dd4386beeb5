//! Learning store: a read-only observer of execution outcomes.
//!
//! Records per-tool invocation counts, a running success rate, and a
//! running average duration, and ranks tools by reliability and recency.
//! It observes; it never feeds back: nothing here can reach the schema
//! store or the authority token, and persistence is an explicit
//! `save`/`load`, never a side effect of recording.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Outcome statistics for one tool, updated after each invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeStats {
    /// Total number of recorded invocations.
    pub invocations: u64,
    /// Running success rate (0.0–1.0).
    pub success_rate: f64,
    /// Running average execution duration in milliseconds.
    pub avg_duration_ms: u64,
    /// ISO 8601 timestamp of the last recorded invocation.
    pub last_used: Option<String>,
    /// Last error message, if any, truncated.
    pub last_error: Option<String>,
}

impl OutcomeStats {
    fn new_initial() -> Self {
        Self {
            invocations: 0,
            success_rate: 1.0,
            avg_duration_ms: 0,
            last_used: None,
            last_error: None,
        }
    }
}

/// In-memory outcome store keyed by tool id.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LearningStore {
    stats: HashMap<String, OutcomeStats>,
}

impl LearningStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution outcome.
    pub fn record(&mut self, tool_id: &str, success: bool, duration_ms: u64, error: Option<&str>) {
        let stats = self
            .stats
            .entry(tool_id.to_owned())
            .or_insert_with(OutcomeStats::new_initial);

        stats.invocations = stats.invocations.saturating_add(1);
        stats.last_used = Some(chrono::Utc::now().to_rfc3339());

        // Running averages, same bookkeeping for rate and duration.
        #[allow(clippy::cast_precision_loss)]
        let n = stats.invocations as f64;
        let success_val = if success { 1.0 } else { 0.0 };
        stats.success_rate += (success_val - stats.success_rate) / n;

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        {
            let avg = stats.avg_duration_ms as f64;
            stats.avg_duration_ms = (avg + (duration_ms as f64 - avg) / n) as u64;
        }

        if !success {
            stats.last_error = error.map(|e| e.chars().take(500).collect());
        }
    }

    /// Statistics for one tool.
    pub fn get(&self, tool_id: &str) -> Option<&OutcomeStats> {
        self.stats.get(tool_id)
    }

    /// Number of tools with recorded outcomes.
    pub fn count(&self) -> usize {
        self.stats.len()
    }

    /// Up to `max_count` tool ids ordered by success rate, then recency.
    pub fn ranked(&self, max_count: usize) -> Vec<(String, f64)> {
        let mut scored: Vec<(String, f64, Option<String>)> = self
            .stats
            .iter()
            .map(|(id, s)| (id.clone(), s.success_rate, s.last_used.clone()))
            .collect();
        // RFC 3339 timestamps order lexicographically.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.2.cmp(&a.2)));
        scored
            .into_iter()
            .take(max_count)
            .map(|(id, rate, _)| (id, rate))
            .collect()
    }

    /// Persist the store as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized or written.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a persisted store; a missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
