//! Reward ledger and agent performance tracking.
//!
//! ## Design
//! - One [`AgentPerformance`] record per agent, created on first reference
//! - Append-only [`LedgerEntry`] records; totals are their sum
//! - Optional SQLite journal ([`LedgerJournal`]) for durability
//! - Configurable retention: old entries fold into a carried-forward balance

pub mod journal;
pub mod ledger;

#[allow(unused_imports)]
pub use journal::LedgerJournal;
#[allow(unused_imports)]
pub use ledger::{AgentPerformance, EvaluationRecord, LedgerEntry, RewardLedger, FEAR_MAX, FEAR_MIN};
