//! Agent performance tracking and the token ledger.
//!
//! Every change to an agent's token total goes through an appended
//! [`LedgerEntry`], so for each agent `total_tokens` equals the sum of
//! its retained entries. Performance records and entries live behind a
//! single lock; the ingestion path and the evaluation scheduler both
//! write here.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::journal::LedgerJournal;
use crate::config::LedgerConfig;

pub const FEAR_MIN: f64 = 0.5;
pub const FEAR_MAX: f64 = 3.0;

/// Fear level on first registration.
const FEAR_BASELINE: f64 = 1.0;

/// Fear growth per hour since the last evaluation.
const FEAR_DECAY_PER_HOUR: f64 = 0.1;

/// Fear added by a penalty.
const PENALTY_FEAR_STEP: f64 = 0.5;

/// Score at or above which an award extends the streak.
const STREAK_SCORE: f64 = 70.0;

/// Authority recorded on penalty entries.
const PENALTY_AUTHORITY: &str = "ledger-penalty";

/// Authority recorded on carried-forward entries produced by retention.
const RETENTION_AUTHORITY: &str = "ledger-retention";

// ── Records ──────────────────────────────────────────────────────

/// An immutable, signed reward or penalty record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub agent_id: String,
    pub amount: i64,
    pub reason: String,
    pub awarded_by: String,
    pub timestamp: DateTime<Utc>,
    pub multiplier: f64,
    /// Evaluation score behind an award; `None` for penalties.
    pub score: Option<f64>,
}

/// One completed evaluation, kept in the agent's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub tokens: i64,
    pub multiplier: f64,
    pub reason: String,
}

/// Cumulative performance of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: String,
    pub suggestions_processed: u64,
    pub critical_found: u64,
    pub false_positives: u64,
    /// `(processed - false_positives) / processed`, 0 before any suggestion.
    pub success_rate: f64,
    pub total_tokens: i64,
    pub last_evaluation: Option<DateTime<Utc>>,
    pub streak: u32,
    /// Bounded to `[FEAR_MIN, FEAR_MAX]`.
    pub fear_level: f64,
    pub history: Vec<EvaluationRecord>,
}

impl AgentPerformance {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            suggestions_processed: 0,
            critical_found: 0,
            false_positives: 0,
            success_rate: 0.0,
            total_tokens: 0,
            last_evaluation: None,
            streak: 0,
            fear_level: FEAR_BASELINE,
            history: Vec::new(),
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Default)]
struct LedgerState {
    agents: HashMap<String, AgentPerformance>,
    entries: HashMap<String, Vec<LedgerEntry>>,
}

impl LedgerState {
    fn agent_mut(&mut self, agent_id: &str) -> &mut AgentPerformance {
        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentPerformance::new(agent_id))
    }
}

/// Shared reward ledger and performance tracker.
pub struct RewardLedger {
    state: Mutex<LedgerState>,
    journal: Option<LedgerJournal>,
    eligibility_window: Duration,
    max_entries_per_agent: Option<usize>,
    max_history_per_agent: Option<usize>,
}

impl RewardLedger {
    /// In-memory ledger.
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            journal: None,
            eligibility_window: i64::try_from(config.eligibility_window_mins)
                .ok()
                .and_then(Duration::try_minutes)
                .unwrap_or(Duration::MAX),
            max_entries_per_agent: config.max_entries_per_agent,
            max_history_per_agent: config.max_history_per_agent,
        }
    }

    /// Ledger backed by a journal. Saved counters are restored first, then
    /// entries are replayed to rebuild totals and last-evaluation times.
    pub fn with_journal(config: &LedgerConfig, journal: LedgerJournal) -> Result<Self> {
        let mut ledger = Self::new(config);
        let agents = journal.load_agents()?;
        let entries = journal.load_all()?;
        let (restored, replayed) = (agents.len(), entries.len());
        {
            let mut state = ledger.state.lock();
            for agent in agents {
                state.agents.insert(agent.agent_id.clone(), agent);
            }
            for entry in entries {
                let agent = state.agent_mut(&entry.agent_id);
                agent.total_tokens = agent
                    .total_tokens
                    .checked_add(entry.amount)
                    .ok_or_else(|| anyhow!("Token total overflow replaying {}", entry.id))?;
                if entry.score.is_some() {
                    agent.last_evaluation = Some(
                        agent
                            .last_evaluation
                            .map_or(entry.timestamp, |t| t.max(entry.timestamp)),
                    );
                }
                ledger.append_entry(&mut state, entry);
            }
        }
        ledger.journal = Some(journal);
        tracing::info!(agents = restored, entries = replayed, "Replayed ledger journal");
        Ok(ledger)
    }

    /// Build from config, opening the journal when `journal_path` is set.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        match &config.journal_path {
            Some(path) => Self::with_journal(config, LedgerJournal::open(path)?),
            None => Ok(Self::new(config)),
        }
    }

    // ── Agents ───────────────────────────────────────────────────

    /// Create the agent's record if it does not exist yet.
    pub fn register_agent(&self, agent_id: &str) -> AgentPerformance {
        let mut state = self.state.lock();
        if !state.agents.contains_key(agent_id) {
            tracing::debug!(agent_id, "Registered agent");
        }
        state.agent_mut(agent_id).clone()
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.state.lock().agents.contains_key(agent_id)
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentPerformance> {
        self.state.lock().agents.get(agent_id).cloned()
    }

    pub fn agent_count(&self) -> usize {
        self.state.lock().agents.len()
    }

    // ── Ingestion-side updates ───────────────────────────────────

    pub fn record_suggestion_processed(
        &self,
        agent_id: &str,
        was_critical: bool,
        was_accurate: bool,
    ) -> AgentPerformance {
        self.record_suggestion_processed_at(agent_id, was_critical, was_accurate, Utc::now())
    }

    /// Count one processed suggestion. Fear drifts up with time since the
    /// last evaluation; it is not reset here.
    pub fn record_suggestion_processed_at(
        &self,
        agent_id: &str,
        was_critical: bool,
        was_accurate: bool,
        now: DateTime<Utc>,
    ) -> AgentPerformance {
        let mut state = self.state.lock();
        let agent = state.agent_mut(agent_id);

        agent.suggestions_processed += 1;
        if was_critical {
            agent.critical_found += 1;
        }
        if !was_accurate {
            agent.false_positives += 1;
        }
        agent.success_rate = (agent.suggestions_processed - agent.false_positives) as f64
            / agent.suggestions_processed as f64;

        if let Some(last) = agent.last_evaluation {
            let hours = hours_between(last, now);
            agent.fear_level = (1.0 + hours * FEAR_DECAY_PER_HOUR).min(FEAR_MAX);
        }

        let snapshot = agent.clone();
        self.save_counters(&snapshot);
        snapshot
    }

    // ── Evaluation-side updates ──────────────────────────────────

    pub fn award_tokens(
        &self,
        agent_id: &str,
        base_amount: i64,
        reason: &str,
        multiplier: f64,
        score: f64,
    ) -> Result<LedgerEntry> {
        self.award_tokens_at(agent_id, base_amount, reason, multiplier, score, Utc::now())
    }

    /// Append an award of `floor(base_amount * multiplier)` and apply the
    /// discrete streak and fear rules for `score`.
    pub fn award_tokens_at(
        &self,
        agent_id: &str,
        base_amount: i64,
        reason: &str,
        multiplier: f64,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let amount = (base_amount as f64 * multiplier).floor() as i64;
        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            amount,
            reason: reason.to_string(),
            awarded_by: "adjudicator".into(),
            timestamp: now,
            multiplier,
            score: Some(score),
        };

        let mut state = self.state.lock();
        let total = checked_total(&state, agent_id, amount)?;
        if let Some(journal) = &self.journal {
            journal.append(&entry)?;
        }

        let agent = state.agent_mut(agent_id);
        agent.total_tokens = total;
        agent.last_evaluation = Some(now);
        if score >= STREAK_SCORE {
            agent.streak += 1;
        } else {
            agent.streak = 0;
        }
        agent.fear_level = if score >= 80.0 {
            FEAR_MIN
        } else if score >= 60.0 {
            1.0
        } else {
            2.0
        };
        agent.history.push(EvaluationRecord {
            timestamp: now,
            score,
            tokens: amount,
            multiplier,
            reason: reason.to_string(),
        });
        if let Some(max) = self.max_history_per_agent {
            let excess = agent.history.len().saturating_sub(max);
            agent.history.drain(..excess);
        }
        let (streak, fear) = (agent.streak, agent.fear_level);
        let snapshot = agent.clone();

        self.append_entry(&mut state, entry.clone());
        self.save_counters(&snapshot);
        drop(state);

        tracing::info!(
            agent_id,
            amount,
            score,
            multiplier,
            total,
            streak,
            fear,
            "Awarded tokens"
        );
        Ok(entry)
    }

    /// Append a negative entry and raise fear. The total may go negative.
    pub fn penalize_agent(&self, agent_id: &str, amount: i64, reason: &str) -> Result<LedgerEntry> {
        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            amount: -amount.saturating_abs(),
            reason: reason.to_string(),
            awarded_by: PENALTY_AUTHORITY.into(),
            timestamp: Utc::now(),
            multiplier: 1.0,
            score: None,
        };

        let mut state = self.state.lock();
        let total = checked_total(&state, agent_id, entry.amount)?;
        if let Some(journal) = &self.journal {
            journal.append(&entry)?;
        }

        let agent = state.agent_mut(agent_id);
        agent.total_tokens = total;
        agent.fear_level = (agent.fear_level + PENALTY_FEAR_STEP).min(FEAR_MAX);
        let fear = agent.fear_level;
        let snapshot = agent.clone();

        self.append_entry(&mut state, entry.clone());
        self.save_counters(&snapshot);
        drop(state);

        tracing::warn!(agent_id, amount = entry.amount, total, fear, reason, "Penalized agent");
        Ok(entry)
    }

    /// Persist the agent's counters. Called with the state lock held so
    /// snapshots reach the journal in mutation order. A failure here costs
    /// only counter freshness after a restart, never token totals.
    fn save_counters(&self, agent: &AgentPerformance) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.save_agent(agent) {
            tracing::warn!(
                agent_id = %agent.agent_id,
                error = %e,
                "Failed to persist agent counters"
            );
        }
    }

    /// Push an entry, folding the oldest ones into a carried-forward
    /// balance when the retention limit is exceeded.
    fn append_entry(&self, state: &mut LedgerState, entry: LedgerEntry) {
        let entries = state.entries.entry(entry.agent_id.clone()).or_default();
        entries.push(entry);

        let Some(max) = self.max_entries_per_agent else {
            return;
        };
        if entries.len() <= max {
            return;
        }

        let fold = entries.len() - max + 1;
        let folded: Vec<LedgerEntry> = entries.drain(..fold).collect();
        let Some(last) = folded.last() else {
            return;
        };
        let carried = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: last.agent_id.clone(),
            amount: folded.iter().map(|e| e.amount).sum(),
            reason: format!("balance carried forward ({} entries)", folded.len()),
            awarded_by: RETENTION_AUTHORITY.into(),
            timestamp: last.timestamp,
            multiplier: 1.0,
            score: None,
        };
        tracing::debug!(agent_id = %carried.agent_id, folded = folded.len(), "Compacted ledger");
        entries.insert(0, carried);
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn get_agents_for_evaluation(&self) -> Vec<String> {
        self.get_agents_for_evaluation_at(Utc::now())
    }

    /// Agents that processed something and were never evaluated, or were
    /// last evaluated longer ago than the eligibility window. Sorted by id.
    pub fn get_agents_for_evaluation_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let state = self.state.lock();
        let mut due: Vec<String> = state
            .agents
            .values()
            .filter(|a| a.suggestions_processed > 0)
            .filter(|a| match a.last_evaluation {
                None => true,
                Some(last) => now - last > self.eligibility_window,
            })
            .map(|a| a.agent_id.clone())
            .collect();
        due.sort();
        due
    }

    /// Top `top_n` agents by token total, descending.
    pub fn get_leaderboard(&self, top_n: usize) -> Vec<AgentPerformance> {
        let mut agents: Vec<AgentPerformance> =
            self.state.lock().agents.values().cloned().collect();
        agents.sort_by(|a, b| {
            b.total_tokens
                .cmp(&a.total_tokens)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        agents.truncate(top_n);
        agents
    }

    /// Retained entries for one agent, oldest first.
    pub fn ledger_entries(&self, agent_id: &str) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .entries
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether every agent's total equals the sum of its entries.
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        state.agents.values().all(|agent| {
            let sum: i64 = state
                .entries
                .get(&agent.agent_id)
                .map(|entries| entries.iter().map(|e| e.amount).sum())
                .unwrap_or(0);
            sum == agent.total_tokens
        })
    }
}

/// The agent's total after adding `amount`, or an error if it would
/// overflow. Checked before anything is journaled.
fn checked_total(state: &LedgerState, agent_id: &str, amount: i64) -> Result<i64> {
    let current = state.agents.get(agent_id).map_or(0, |a| a.total_tokens);
    current
        .checked_add(amount)
        .ok_or_else(|| anyhow!("Token total for agent {agent_id} would overflow"))
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 3_600_000.0).max(0.0)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RewardLedger {
        RewardLedger::new(&LedgerConfig::default())
    }

    #[test]
    fn register_is_idempotent() {
        let l = ledger();
        l.register_agent("a");
        l.record_suggestion_processed("a", true, true);
        let again = l.register_agent("a");
        assert_eq!(again.suggestions_processed, 1);
        assert_eq!(l.agent_count(), 1);
    }

    #[test]
    fn processed_counters_and_success_rate() {
        let l = ledger();
        l.record_suggestion_processed("a", true, true);
        l.record_suggestion_processed("a", false, false);
        l.record_suggestion_processed("a", true, true);
        let a = l.record_suggestion_processed("a", false, false);
        assert_eq!(a.suggestions_processed, 4);
        assert_eq!(a.critical_found, 2);
        assert_eq!(a.false_positives, 2);
        assert!((a.success_rate - 0.5).abs() < 1e-9);
        // Never evaluated: fear untouched.
        assert!((a.fear_level - FEAR_BASELINE).abs() < 1e-9);
    }

    #[test]
    fn award_scales_and_updates_streak_and_fear() {
        let l = ledger();
        l.register_agent("a");
        let entry = l.award_tokens("a", 100, "solid review", 1.5, 85.0).unwrap();
        assert_eq!(entry.amount, 150);
        let a = l.get_agent("a").unwrap();
        assert_eq!(a.total_tokens, 150);
        assert_eq!(a.streak, 1);
        assert!((a.fear_level - 0.5).abs() < 1e-9);
        assert!(a.last_evaluation.is_some());
        assert_eq!(a.history.len(), 1);
    }

    #[test]
    fn award_floors_fractional_amount() {
        let l = ledger();
        let entry = l.award_tokens("a", 33, "r", 1.25, 75.0).unwrap();
        assert_eq!(entry.amount, 41);
    }

    #[test]
    fn low_score_resets_streak_and_sets_fear() {
        let l = ledger();
        l.award_tokens("a", 10, "r", 1.0, 90.0).unwrap();
        l.award_tokens("a", 10, "r", 1.0, 72.0).unwrap();
        assert_eq!(l.get_agent("a").unwrap().streak, 2);
        let a = {
            l.award_tokens("a", 10, "r", 1.0, 65.0).unwrap();
            l.get_agent("a").unwrap()
        };
        assert_eq!(a.streak, 0);
        assert!((a.fear_level - 1.0).abs() < 1e-9);
        l.award_tokens("a", 0, "r", 1.0, 40.0).unwrap();
        assert!((l.get_agent("a").unwrap().fear_level - 2.0).abs() < 1e-9);
    }

    #[test]
    fn fear_drifts_with_time_since_evaluation() {
        let l = ledger();
        let t0 = Utc::now();
        l.award_tokens_at("a", 10, "r", 1.0, 85.0, t0).unwrap();
        let a = l.record_suggestion_processed_at("a", true, true, t0 + Duration::hours(5));
        assert!((a.fear_level - 1.5).abs() < 1e-9);
        let a = l.record_suggestion_processed_at("a", true, true, t0 + Duration::hours(100));
        assert!((a.fear_level - FEAR_MAX).abs() < 1e-9);
    }

    #[test]
    fn penalty_subtracts_and_raises_fear() {
        let l = ledger();
        l.award_tokens("a", 10, "r", 1.0, 85.0).unwrap();
        let entry = l.penalize_agent("a", 25, "false alarm spam").unwrap();
        assert_eq!(entry.amount, -25);
        let a = l.get_agent("a").unwrap();
        assert_eq!(a.total_tokens, -15);
        assert!((a.fear_level - 1.0).abs() < 1e-9);
        for _ in 0..10 {
            l.penalize_agent("a", 1, "r").unwrap();
        }
        assert!((l.get_agent("a").unwrap().fear_level - FEAR_MAX).abs() < 1e-9);
    }

    #[test]
    fn total_matches_entries_after_every_call() {
        let l = ledger();
        let ops: [(bool, i64, f64); 6] = [
            (true, 100, 1.5),
            (false, 30, 1.0),
            (true, 7, 1.9),
            (false, 500, 1.0),
            (true, 0, 2.0),
            (true, 999, 1.1),
        ];
        for (award, amount, mult) in ops {
            if award {
                l.award_tokens("a", amount, "r", mult, 77.0).unwrap();
            } else {
                l.penalize_agent("a", amount, "r").unwrap();
            }
            assert!(l.is_consistent());
            let sum: i64 = l.ledger_entries("a").iter().map(|e| e.amount).sum();
            assert_eq!(sum, l.get_agent("a").unwrap().total_tokens);
        }
    }

    #[test]
    fn retention_folds_oldest_entries() {
        let config = LedgerConfig {
            max_entries_per_agent: Some(3),
            max_history_per_agent: Some(2),
            ..LedgerConfig::default()
        };
        let l = RewardLedger::new(&config);
        for i in 1..=6 {
            l.award_tokens("a", i * 10, "r", 1.0, 80.0).unwrap();
        }
        let entries = l.ledger_entries("a");
        assert_eq!(entries.len(), 3);
        assert!(entries[0].reason.starts_with("balance carried forward"));
        assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), 210);
        assert_eq!(l.get_agent("a").unwrap().total_tokens, 210);
        assert_eq!(l.get_agent("a").unwrap().history.len(), 2);
        assert!(l.is_consistent());
    }

    #[test]
    fn evaluation_eligibility() {
        let l = ledger();
        let now = Utc::now();
        l.register_agent("idle");
        l.record_suggestion_processed("fresh", true, true);
        l.record_suggestion_processed("stale", true, true);
        l.record_suggestion_processed("recent", true, true);
        l.award_tokens_at("stale", 10, "r", 1.0, 80.0, now - Duration::minutes(31))
            .unwrap();
        l.award_tokens_at("recent", 10, "r", 1.0, 80.0, now - Duration::minutes(10))
            .unwrap();

        let due = l.get_agents_for_evaluation_at(now);
        assert_eq!(due, vec!["fresh".to_string(), "stale".to_string()]);
    }

    #[test]
    fn leaderboard_sorted_by_total() {
        let l = ledger();
        l.award_tokens("low", 10, "r", 1.0, 80.0).unwrap();
        l.award_tokens("high", 300, "r", 1.0, 80.0).unwrap();
        l.award_tokens("mid", 100, "r", 1.0, 80.0).unwrap();
        let board: Vec<String> = l
            .get_leaderboard(2)
            .into_iter()
            .map(|a| a.agent_id)
            .collect();
        assert_eq!(board, vec!["high", "mid"]);
    }

    #[test]
    fn journal_replay_restores_totals() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = LedgerConfig {
            journal_path: Some(tmp.path().join("ledger.db")),
            ..LedgerConfig::default()
        };
        {
            let l = RewardLedger::open(&config).unwrap();
            l.award_tokens("a", 100, "r", 1.5, 85.0).unwrap();
            l.penalize_agent("a", 20, "r").unwrap();
            l.award_tokens("b", 10, "r", 1.0, 50.0).unwrap();
        }
        let l = RewardLedger::open(&config).unwrap();
        assert_eq!(l.get_agent("a").unwrap().total_tokens, 130);
        assert_eq!(l.get_agent("b").unwrap().total_tokens, 10);
        assert!(l.get_agent("a").unwrap().last_evaluation.is_some());
        assert!(l.is_consistent());
    }

    #[test]
    fn overflowing_award_is_rejected_without_side_effects() {
        let l = ledger();
        l.award_tokens("a", i64::MAX, "r", 1.0, 90.0).unwrap();
        assert!(l.award_tokens("a", 1, "r", 1.0, 90.0).is_err());

        let a = l.get_agent("a").unwrap();
        assert_eq!(a.total_tokens, i64::MAX);
        assert_eq!(a.streak, 1);
        assert_eq!(l.ledger_entries("a").len(), 1);
        assert!(l.is_consistent());
    }

    #[test]
    fn underflowing_penalty_is_rejected() {
        let l = ledger();
        l.penalize_agent("a", i64::MAX, "r").unwrap();
        l.penalize_agent("a", 1, "r").unwrap();
        assert_eq!(l.get_agent("a").unwrap().total_tokens, i64::MIN);
        assert!(l.penalize_agent("a", 1, "r").is_err());
        assert_eq!(l.ledger_entries("a").len(), 2);
        assert!(l.is_consistent());
    }

    #[test]
    fn rejected_award_is_not_journaled() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = LedgerConfig {
            journal_path: Some(tmp.path().join("ledger.db")),
            ..LedgerConfig::default()
        };
        {
            let l = RewardLedger::open(&config).unwrap();
            l.award_tokens("a", i64::MAX, "r", 1.0, 90.0).unwrap();
            assert!(l.award_tokens("a", 1, "r", 1.0, 90.0).is_err());
        }
        let l = RewardLedger::open(&config).unwrap();
        assert_eq!(l.get_agent("a").unwrap().total_tokens, i64::MAX);
        assert!(l.is_consistent());
    }

    #[test]
    fn journal_replay_restores_counters() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = LedgerConfig {
            journal_path: Some(tmp.path().join("ledger.db")),
            ..LedgerConfig::default()
        };
        {
            let l = RewardLedger::open(&config).unwrap();
            l.record_suggestion_processed("a", true, true);
            l.record_suggestion_processed("a", true, false);
            l.record_suggestion_processed("b", false, true);
            l.award_tokens("b", 50, "r", 1.0, 90.0).unwrap();
        }
        let l = RewardLedger::open(&config).unwrap();
        let a = l.get_agent("a").unwrap();
        assert_eq!(a.suggestions_processed, 2);
        assert_eq!(a.critical_found, 2);
        assert_eq!(a.false_positives, 1);
        assert!((a.success_rate - 0.5).abs() < 1e-9);
        assert!(a.last_evaluation.is_none());

        let b = l.get_agent("b").unwrap();
        assert_eq!(b.suggestions_processed, 1);
        assert_eq!(b.total_tokens, 50);
        assert_eq!(b.streak, 1);
        assert!((b.fear_level - FEAR_MIN).abs() < 1e-9);

        // Never-evaluated agent with work is still due after the restart.
        assert_eq!(l.get_agents_for_evaluation(), vec!["a".to_string()]);
        assert!(l.is_consistent());
    }

    #[test]
    fn concurrent_updates_keep_totals_exact() {
        let l = ledger();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let l = &l;
                scope.spawn(move || {
                    for k in 0..50 {
                        l.award_tokens("shared", 10, "r", 1.0, 80.0).unwrap();
                        l.penalize_agent("shared", 3, "r").unwrap();
                        l.record_suggestion_processed("shared", true, k % 2 == 0);
                        l.record_suggestion_processed(&format!("own-{t}"), false, true);
                    }
                });
            }
        });

        let shared = l.get_agent("shared").unwrap();
        assert_eq!(shared.total_tokens, 4 * 50 * 7);
        assert_eq!(shared.suggestions_processed, 200);
        assert_eq!(shared.critical_found, 200);
        assert_eq!(shared.false_positives, 100);
        assert_eq!(l.ledger_entries("shared").len(), 400);
        for t in 0..4 {
            assert_eq!(
                l.get_agent(&format!("own-{t}")).unwrap().suggestions_processed,
                50
            );
        }
        assert!(l.is_consistent());
    }
}
