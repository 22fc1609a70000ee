use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variable consulted when `classifier.api_key` is unset.
pub const API_KEY_ENV: &str = "REVIEW_TUNNEL_API_KEY";

// ── Root ─────────────────────────────────────────────────────────

/// Top-level configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub breaker: BreakerConfig,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub classifier: ClassifierConfig,
    /// Channels registered at startup.
    pub channels: Vec<ChannelConfig>,
}

// ── Filter ───────────────────────────────────────────────────────

/// Keyword sets for the critical filter, matched case-insensitively
/// against suggestion descriptions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FilterConfig {
    pub optimization_keywords: Vec<String>,
    pub critical_keywords: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let to_vec = |words: &[&str]| words.iter().map(|w| (*w).to_string()).collect();
        Self {
            optimization_keywords: to_vec(&[
                "optimize",
                "optimization",
                "performance",
                "faster",
                "refactor",
                "readability",
                "style",
                "formatting",
                "naming",
                "cleanup",
                "clean up",
                "simplify",
                "idiomatic",
                "nitpick",
            ]),
            critical_keywords: to_vec(&[
                "crash",
                "vulnerability",
                "data loss",
                "security",
                "exploit",
                "injection",
                "corruption",
                "deadlock",
                "race condition",
                "memory leak",
                "panic",
                "undefined behavior",
                "overflow",
                "null pointer",
            ]),
        }
    }
}

// ── Circuit breaker ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Seconds an open circuit stays open before it lazily resets.
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60,
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LedgerConfig {
    /// Minutes since the last evaluation before an agent is due again.
    pub eligibility_window_mins: u64,
    /// Retained ledger entries per agent; older entries are folded into a
    /// carried-forward balance. Unset keeps every entry.
    pub max_entries_per_agent: Option<usize>,
    /// Retained evaluation history records per agent.
    pub max_history_per_agent: Option<usize>,
    /// SQLite journal for ledger entries. Unset keeps the ledger in memory.
    pub journal_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            eligibility_window_mins: 30,
            max_entries_per_agent: None,
            max_history_per_agent: None,
            journal_path: None,
        }
    }
}

// ── Scheduler ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Lower bound of the random wait between evaluation cycles. Must be
    /// positive; waits are never shorter than one second.
    pub min_interval_hours: f64,
    /// Upper bound of the random wait between evaluation cycles.
    pub max_interval_hours: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_hours: 1.0,
            max_interval_hours: 3.0,
        }
    }
}

// ── Classifier ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Service name used as the circuit breaker key.
    pub service: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Recent suggestions per agent handed to agent evaluation.
    pub recent_window: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            service: "classifier".into(),
            api_key: None,
            model: "claude-sonnet-4-6".into(),
            base_url: "https://api.anthropic.com".into(),
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            recent_window: 20,
        }
    }
}

impl ClassifierConfig {
    /// API key from config, falling back to [`API_KEY_ENV`].
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
    }
}

// ── Channels ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub criteria: BTreeMap<String, serde_json::Value>,
}
