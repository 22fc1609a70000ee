//! Adjudication: external judgment of suggestions and agents.
//!
//! ```text
//!   EvaluationScheduler ──(random 1-3h)──▶ RewardLedger::get_agents_for_evaluation
//!          │
//!          ▼
//!     Adjudicator ──▶ CircuitBreaker ──▶ ExternalClassifier (HostedClassifier)
//!          │
//!          ▼
//!     RewardLedger::award_tokens / record_suggestion_processed
//! ```
//!
//! Classifier outages never abort a caller: suggestion examinations come
//! back degraded, agent evaluations come back as [`AdjudicationError`]
//! values and leave the ledger untouched.
//!
//! [`AdjudicationError`]: crate::error::AdjudicationError

pub mod adjudicator;
pub mod breaker;
pub mod classifier;
pub mod hosted;
pub mod scheduler;

#[allow(unused_imports)]
pub use adjudicator::{judgment_message, Adjudicator, AgentJudgment};
#[allow(unused_imports)]
pub use breaker::{CircuitBreaker, CircuitStatus};
#[allow(unused_imports)]
pub use classifier::{
    AgentAssessment, Examination, ExternalClassifier, UnconfiguredClassifier, Verdict,
};
#[allow(unused_imports)]
pub use hosted::HostedClassifier;
#[allow(unused_imports)]
pub use scheduler::{CycleReport, EvaluationScheduler, SchedulerPhase};
