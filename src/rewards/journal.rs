//! Append-only SQLite journal for ledger entries.
//!
//! The in-memory ledger may compact old entries; the journal keeps every
//! entry so totals can be rebuilt on startup. A second table holds the
//! latest counters per agent (processed, critical, false positives,
//! streak, fear) so evaluation eligibility survives a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

use super::ledger::{AgentPerformance, LedgerEntry};

pub struct LedgerJournal {
    conn: Mutex<Connection>,
}

impl LedgerJournal {
    /// Open (or create) the journal database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger journal {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory journal, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL UNIQUE,
                agent_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                reason TEXT NOT NULL,
                awarded_by TEXT NOT NULL,
                multiplier REAL NOT NULL DEFAULT 1.0,
                score REAL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_agent ON ledger_entries(agent_id);
            CREATE TABLE IF NOT EXISTS agent_stats (
                agent_id TEXT PRIMARY KEY,
                suggestions_processed INTEGER NOT NULL,
                critical_found INTEGER NOT NULL,
                false_positives INTEGER NOT NULL,
                streak INTEGER NOT NULL,
                fear_level REAL NOT NULL,
                last_evaluation TEXT,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ledger_entries
                (entry_id, agent_id, amount, reason, awarded_by, multiplier, score, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.agent_id,
                entry.amount,
                entry.reason,
                entry.awarded_by,
                entry.multiplier,
                entry.score,
                entry.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Every entry, in append order.
    pub fn load_all(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT entry_id, agent_id, amount, reason, awarded_by, multiplier, score, timestamp
             FROM ledger_entries ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, agent_id, amount, reason, awarded_by, multiplier, score, ts) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .with_context(|| format!("Bad timestamp in ledger entry {id}"))?
                .with_timezone(&Utc);
            entries.push(LedgerEntry {
                id,
                agent_id,
                amount,
                reason,
                awarded_by,
                timestamp,
                multiplier,
                score,
            });
        }
        Ok(entries)
    }

    /// Upsert the agent's counters. Totals are not stored here; they are
    /// always the sum of the agent's entries.
    pub fn save_agent(&self, agent: &AgentPerformance) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agent_stats
                (agent_id, suggestions_processed, critical_found, false_positives,
                 streak, fear_level, last_evaluation, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(agent_id) DO UPDATE SET
                suggestions_processed = excluded.suggestions_processed,
                critical_found = excluded.critical_found,
                false_positives = excluded.false_positives,
                streak = excluded.streak,
                fear_level = excluded.fear_level,
                last_evaluation = excluded.last_evaluation,
                updated_at = excluded.updated_at",
            params![
                agent.agent_id,
                to_sql_count(agent.suggestions_processed),
                to_sql_count(agent.critical_found),
                to_sql_count(agent.false_positives),
                i64::from(agent.streak),
                agent.fear_level,
                agent.last_evaluation.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Saved agent counters with zero totals and empty history, ordered by id.
    pub fn load_agents(&self) -> Result<Vec<AgentPerformance>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT agent_id, suggestions_processed, critical_found, false_positives,
                    streak, fear_level, last_evaluation
             FROM agent_stats ORDER BY agent_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut agents = Vec::new();
        for row in rows {
            let (agent_id, processed, critical, false_positives, streak, fear, last) = row?;
            let last_evaluation = match last {
                Some(ts) => Some(
                    DateTime::parse_from_rfc3339(&ts)
                        .with_context(|| format!("Bad last_evaluation for agent {agent_id}"))?
                        .with_timezone(&Utc),
                ),
                None => None,
            };
            let suggestions_processed = from_sql_count(processed);
            let false_positives = from_sql_count(false_positives);
            let success_rate = if suggestions_processed == 0 {
                0.0
            } else {
                suggestions_processed.saturating_sub(false_positives) as f64
                    / suggestions_processed as f64
            };
            agents.push(AgentPerformance {
                agent_id,
                suggestions_processed,
                critical_found: from_sql_count(critical),
                false_positives,
                success_rate,
                total_tokens: 0,
                last_evaluation,
                streak: u32::try_from(streak).unwrap_or(0),
                fear_level: fear,
                history: Vec::new(),
            });
        }
        Ok(agents)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))?)
    }
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(agent: &str, amount: i64, score: Option<f64>) -> LedgerEntry {
        LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent.into(),
            amount,
            reason: "test".into(),
            awarded_by: "adjudicator".into(),
            timestamp: Utc::now(),
            multiplier: 1.5,
            score,
        }
    }

    #[test]
    fn append_and_load_in_order() {
        let journal = LedgerJournal::open_in_memory().unwrap();
        journal.append(&entry("a", 150, Some(85.0))).unwrap();
        journal.append(&entry("a", -20, None)).unwrap();
        journal.append(&entry("b", 40, Some(61.0))).unwrap();

        let all = journal.load_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].amount, 150);
        assert_eq!(all[1].score, None);
        assert_eq!(all[2].agent_id, "b");
        assert_eq!(journal.count().unwrap(), 3);
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("ledger.db");
        let e = entry("agent-x", 77, Some(90.0));
        {
            let journal = LedgerJournal::open(&path).unwrap();
            journal.append(&e).unwrap();
        }
        let journal = LedgerJournal::open(&path).unwrap();
        let all = journal.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, e.id);
        assert_eq!(all[0].timestamp.timestamp(), e.timestamp.timestamp());
    }

    #[test]
    fn duplicate_entry_id_is_rejected() {
        let journal = LedgerJournal::open_in_memory().unwrap();
        let e = entry("a", 1, None);
        journal.append(&e).unwrap();
        assert!(journal.append(&e).is_err());
    }

    #[test]
    fn agent_counters_upsert_and_reload() {
        let journal = LedgerJournal::open_in_memory().unwrap();
        let mut agent = AgentPerformance {
            agent_id: "agent-a".into(),
            suggestions_processed: 3,
            critical_found: 2,
            false_positives: 1,
            success_rate: 0.0,
            total_tokens: 999,
            last_evaluation: None,
            streak: 0,
            fear_level: 1.0,
            history: Vec::new(),
        };
        journal.save_agent(&agent).unwrap();
        agent.suggestions_processed = 4;
        agent.streak = 2;
        agent.last_evaluation = Some(Utc::now());
        journal.save_agent(&agent).unwrap();

        let loaded = journal.load_agents().unwrap();
        assert_eq!(loaded.len(), 1);
        let a = &loaded[0];
        assert_eq!(a.suggestions_processed, 4);
        assert_eq!(a.critical_found, 2);
        assert_eq!(a.false_positives, 1);
        assert_eq!(a.streak, 2);
        assert!((a.success_rate - 0.75).abs() < 1e-9);
        assert!(a.last_evaluation.is_some());
        // Totals come from entries, never from this table.
        assert_eq!(a.total_tokens, 0);
    }
}
