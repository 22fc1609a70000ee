//! Domain types for the suggestion tunnel.
//!
//! Suggestions arrive from reviewers, survive (or not) the critical
//! filter, and are grouped into [`Bin`]s that belong to a [`Channel`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::TunnelError;

/// Bin priority when it holds at least one critical-severity suggestion.
pub const PRIORITY_CRITICAL: u8 = 100;

/// Bin priority when it holds at least one high-severity suggestion.
pub const PRIORITY_HIGH: u8 = 50;

// ── Severity ─────────────────────────────────────────────────────

/// Severity level attached to a suggestion by its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Below the severity gate; only binned for always-critical categories.
    Medium,
    /// Passes the severity gate.
    High,
    /// Passes the severity gate and raises the bin to [`PRIORITY_CRITICAL`].
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(TunnelError::Validation(format!("unknown severity '{other}'"))),
        }
    }
}

// ── Category ─────────────────────────────────────────────────────

/// Kind of issue a suggestion addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Incorrect behavior in existing code; always critical.
    BugFix,
    /// Exploitable weakness; always critical.
    SecurityVulnerability,
    /// Change that breaks callers or stored data; always critical.
    BreakingChange,
    /// Panic, crash or failed call at runtime; always critical.
    RuntimeError,
    /// Mismatched or unsound types; always critical.
    TypeError,
    /// Wrong result from a flawed condition or calculation; always critical.
    LogicError,
    /// Restructuring that only counts with a critical signal in its text.
    CriticalRefactor,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::BugFix,
        Self::SecurityVulnerability,
        Self::BreakingChange,
        Self::RuntimeError,
        Self::TypeError,
        Self::LogicError,
        Self::CriticalRefactor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BugFix => "bug-fix",
            Self::SecurityVulnerability => "security-vulnerability",
            Self::BreakingChange => "breaking-change",
            Self::RuntimeError => "runtime-error",
            Self::TypeError => "type-error",
            Self::LogicError => "logic-error",
            Self::CriticalRefactor => "critical-refactor",
        }
    }

    /// Categories admitted by the filter regardless of description.
    pub fn is_always_critical(self) -> bool {
        !matches!(self, Self::CriticalRefactor)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| TunnelError::Validation(format!("unknown category '{}'", s.trim())))
    }
}

// ── Suggestion ───────────────────────────────────────────────────

/// A single flagged code issue awaiting triage.
///
/// Immutable after creation except for the `filtered` and `dispatched`
/// flags, which the tunnel flips as the suggestion moves through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    /// File path, optionally with a `:line` suffix.
    pub location: String,
    /// Offending code excerpt.
    pub code: String,
    pub description: String,
    pub fix: Option<String>,
    /// Which reviewer or agent produced this suggestion.
    pub origin: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub filtered: bool,
    #[serde(default)]
    pub dispatched: bool,
}

impl Suggestion {
    /// Create a suggestion with a fresh id and the current timestamp.
    pub fn new(
        category: Category,
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            severity,
            location: location.into(),
            code: String::new(),
            description: description.into(),
            fix: None,
            origin: origin.into(),
            created_at: Utc::now(),
            filtered: false,
            dispatched: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

/// Suggestion as received over the wire, before enum validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSuggestion {
    #[serde(default)]
    pub id: Option<String>,
    pub category: String,
    pub severity: String,
    #[serde(default, alias = "file")]
    pub location: String,
    #[serde(default)]
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub fix: Option<String>,
    #[serde(default, alias = "source")]
    pub origin: String,
}

impl TryFrom<RawSuggestion> for Suggestion {
    type Error = TunnelError;

    fn try_from(raw: RawSuggestion) -> Result<Self, Self::Error> {
        let category: Category = raw.category.parse()?;
        let severity: Severity = raw.severity.parse()?;
        let mut suggestion = Suggestion::new(
            category,
            severity,
            raw.location,
            raw.description,
            raw.origin,
        )
        .with_code(raw.code);
        suggestion.fix = raw.fix;
        if let Some(id) = raw.id.filter(|id| !id.trim().is_empty()) {
            suggestion.id = id;
        }
        Ok(suggestion)
    }
}

// ── Channel ──────────────────────────────────────────────────────

/// A named routing destination. Bins reference channels by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Opaque routing criteria, carried for downstream consumers.
    #[serde(default)]
    pub criteria: BTreeMap<String, serde_json::Value>,
    pub active: bool,
}

// ── Bin ──────────────────────────────────────────────────────────

/// Lifecycle of a bin: `open → processing → closed`, or `error` when
/// dispatch fails while processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinStatus {
    /// Created and accepting suggestions.
    Open,
    /// Handed to the dispatch callback.
    Processing,
    /// Done. Terminal.
    Closed,
    /// Dispatch failed. Terminal; the bin stays listed as active.
    Error,
}

impl BinStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Processing => "processing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

/// A batch of critical suggestions created per ingest call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bin {
    pub id: String,
    pub name: String,
    pub channel_id: String,
    pub suggestions: Vec<Suggestion>,
    pub status: BinStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bin {
    pub fn new(channel_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            channel_id: channel_id.into(),
            suggestions: Vec::new(),
            status: BinStatus::Open,
            priority: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a suggestion, raising priority if its severity warrants it.
    /// Priority never decreases.
    pub fn push(&mut self, suggestion: Suggestion) {
        let floor = match suggestion.severity {
            Severity::Critical => PRIORITY_CRITICAL,
            Severity::High => PRIORITY_HIGH,
            Severity::Medium => 0,
        };
        self.priority = self.priority.max(floor);
        self.suggestions.push(suggestion);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: BinStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.suggestions
            .iter()
            .filter(|s| s.severity == severity)
            .count()
    }
}

// ── Ingest result ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    NoCriticalIssues,
}

/// Per-severity counts of the suggestions that passed the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
}

impl SeverityBreakdown {
    pub fn tally(suggestions: &[Suggestion]) -> Self {
        let mut breakdown = Self::default();
        for s in suggestions {
            match s.severity {
                Severity::Critical => breakdown.critical += 1,
                Severity::High => breakdown.high += 1,
                Severity::Medium => breakdown.medium += 1,
            }
        }
        breakdown
    }
}

/// Outcome of a single `ingest` call. Returned even when nothing passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub status: IngestStatus,
    pub channel_id: String,
    pub received: usize,
    pub filtered_out: usize,
    pub critical_count: usize,
    pub severity: SeverityBreakdown,
    pub bin_id: Option<String>,
}

// ── Tests ────────────────────────────────────────────────────────
