//! Adjudicator: the external classifier behind a circuit breaker, with
//! outcomes written into the reward ledger.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::breaker::CircuitBreaker;
use super::classifier::{AgentAssessment, Examination, ExternalClassifier};
use crate::error::AdjudicationError;
use crate::rewards::RewardLedger;
use crate::tunnel::Suggestion;

/// Recent suggestions kept per agent when no window is configured.
const DEFAULT_RECENT_WINDOW: usize = 20;

/// Result of a completed agent evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentJudgment {
    pub agent_id: String,
    pub score: f64,
    /// Base award proposed by the classifier.
    pub base_tokens: i64,
    pub multiplier: f64,
    /// Amount actually credited: `floor(base_tokens * multiplier)`.
    pub tokens_awarded: i64,
    pub total_tokens: i64,
    pub streak: u32,
    pub fear_level: f64,
    pub reasoning: String,
    pub improvements: Vec<String>,
    /// Human-readable verdict tiered by score.
    pub judgment: String,
    pub ledger_entry_id: String,
}

/// Human-readable judgment for a score in `[0, 100]`.
pub fn judgment_message(score: f64) -> &'static str {
    if score >= 90.0 {
        "Exceptional: critical findings are precise and well-founded."
    } else if score >= 80.0 {
        "Good: findings are mostly accurate and actionable."
    } else if score >= 70.0 {
        "Adequate: useful work, but critical detection needs sharpening."
    } else if score >= 60.0 {
        "Marginal: too many findings miss the mark."
    } else if score >= 50.0 {
        "Poor: accuracy must improve before the next evaluation."
    } else {
        "Unacceptable: findings are unreliable."
    }
}

pub struct Adjudicator {
    classifier: Arc<dyn ExternalClassifier>,
    breaker: Arc<CircuitBreaker>,
    ledger: Arc<RewardLedger>,
    /// Circuit breaker key for the classifier.
    service: String,
    recent_window: usize,
    recent: Mutex<HashMap<String, VecDeque<Suggestion>>>,
}

impl Adjudicator {
    pub fn new(
        classifier: Arc<dyn ExternalClassifier>,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<RewardLedger>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            breaker,
            ledger,
            service: service.into(),
            recent_window: DEFAULT_RECENT_WINDOW,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Number of recent suggestions per agent passed to agent evaluation.
    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window;
        self
    }

    pub fn ledger(&self) -> &Arc<RewardLedger> {
        &self.ledger
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    // ── Suggestions ──────────────────────────────────────────────

    /// Classify one suggestion. Never fails: an open circuit or a
    /// classifier error yields a degraded non-critical result.
    ///
    /// With `agent_id`, the result is recorded on the ledger with
    /// `is_critical` standing in for accuracy too. Degraded results count
    /// as processed, non-critical and inaccurate.
    pub async fn examine(&self, suggestion: &Suggestion, agent_id: Option<&str>) -> Examination {
        let examination = if self.breaker.is_open(&self.service) {
            tracing::debug!(service = %self.service, "Circuit open, skipping classifier");
            Examination::degraded(&suggestion.id, self.circuit_open().to_string())
        } else {
            match self.classifier.examine(suggestion).await {
                Ok(result) => {
                    self.breaker.record_success(&self.service);
                    result.normalized()
                }
                Err(e) => {
                    self.breaker.record_failure(&self.service);
                    tracing::warn!(
                        classifier = self.classifier.name(),
                        suggestion_id = %suggestion.id,
                        error = %e,
                        "Classifier failed, degrading examination"
                    );
                    Examination::degraded(
                        &suggestion.id,
                        AdjudicationError::ClassificationUnavailable(e.to_string()).to_string(),
                    )
                }
            }
        };

        if let Some(agent_id) = agent_id {
            self.remember(agent_id, suggestion);
            self.ledger.record_suggestion_processed(
                agent_id,
                examination.is_critical,
                examination.is_critical,
            );
        }
        examination
    }

    /// Classify a batch with one classifier call. Results follow input
    /// order; missing or failed results are degraded.
    pub async fn examine_batch(
        &self,
        suggestions: &[Suggestion],
        agent_id: Option<&str>,
    ) -> Vec<Examination> {
        if suggestions.is_empty() {
            return Vec::new();
        }

        let results: Vec<Examination> = if self.breaker.is_open(&self.service) {
            let reason = self.circuit_open().to_string();
            suggestions
                .iter()
                .map(|s| Examination::degraded(&s.id, reason.clone()))
                .collect()
        } else {
            match self.classifier.examine_batch(suggestions).await {
                Ok(mut results) => {
                    self.breaker.record_success(&self.service);
                    if results.len() != suggestions.len() {
                        tracing::warn!(
                            expected = suggestions.len(),
                            got = results.len(),
                            "Classifier batch size mismatch"
                        );
                    }
                    results.truncate(suggestions.len());
                    let returned = results.len();
                    let mut normalized: Vec<Examination> =
                        results.into_iter().map(Examination::normalized).collect();
                    normalized.extend(
                        suggestions[returned..]
                            .iter()
                            .map(|s| Examination::degraded(&s.id, "missing from batch result")),
                    );
                    normalized
                }
                Err(e) => {
                    self.breaker.record_failure(&self.service);
                    tracing::warn!(
                        classifier = self.classifier.name(),
                        count = suggestions.len(),
                        error = %e,
                        "Classifier batch failed, degrading examinations"
                    );
                    let reason =
                        AdjudicationError::ClassificationUnavailable(e.to_string()).to_string();
                    suggestions
                        .iter()
                        .map(|s| Examination::degraded(&s.id, reason.clone()))
                        .collect()
                }
            }
        };

        if let Some(agent_id) = agent_id {
            for (suggestion, examination) in suggestions.iter().zip(&results) {
                self.remember(agent_id, suggestion);
                self.ledger.record_suggestion_processed(
                    agent_id,
                    examination.is_critical,
                    examination.is_critical,
                );
            }
        }
        results
    }

    // ── Agents ───────────────────────────────────────────────────

    /// Judge an agent and credit the award to the ledger.
    ///
    /// Unknown agents, open circuits and classifier failures come back as
    /// errors; in those cases the ledger is left untouched.
    pub async fn evaluate_agent(&self, agent_id: &str) -> Result<AgentJudgment, AdjudicationError> {
        let performance = self
            .ledger
            .get_agent(agent_id)
            .ok_or_else(|| AdjudicationError::AgentNotRegistered(agent_id.to_string()))?;

        if self.breaker.is_open(&self.service) {
            return Err(self.circuit_open());
        }

        let recent: Vec<Suggestion> = self
            .recent
            .lock()
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default();

        let assessment: AgentAssessment = match self
            .classifier
            .evaluate_agent(agent_id, &recent, performance.success_rate)
            .await
        {
            Ok(a) => {
                self.breaker.record_success(&self.service);
                a.normalized()
            }
            Err(e) => {
                self.breaker.record_failure(&self.service);
                return Err(AdjudicationError::ClassificationUnavailable(e.to_string()));
            }
        };

        let judgment = judgment_message(assessment.score);
        let entry = self
            .ledger
            .award_tokens(
                agent_id,
                assessment.tokens,
                &format!("evaluation score {:.0}: {}", assessment.score, judgment),
                assessment.multiplier,
                assessment.score,
            )
            .map_err(AdjudicationError::Ledger)?;

        let updated = self
            .ledger
            .get_agent(agent_id)
            .ok_or_else(|| AdjudicationError::AgentNotRegistered(agent_id.to_string()))?;

        tracing::info!(
            agent_id,
            score = assessment.score,
            awarded = entry.amount,
            "Agent evaluated"
        );

        Ok(AgentJudgment {
            agent_id: agent_id.to_string(),
            score: assessment.score,
            base_tokens: assessment.tokens,
            multiplier: assessment.multiplier,
            tokens_awarded: entry.amount,
            total_tokens: updated.total_tokens,
            streak: updated.streak,
            fear_level: updated.fear_level,
            reasoning: assessment.reasoning,
            improvements: assessment.improvements,
            judgment: judgment.to_string(),
            ledger_entry_id: entry.id,
        })
    }

    fn circuit_open(&self) -> AdjudicationError {
        AdjudicationError::CircuitOpen {
            service: self.service.clone(),
        }
    }

    fn remember(&self, agent_id: &str, suggestion: &Suggestion) {
        if self.recent_window == 0 {
            return;
        }
        let mut recent = self.recent.lock();
        let queue = recent.entry(agent_id.to_string()).or_default();
        queue.push_back(suggestion.clone());
        while queue.len() > self.recent_window {
            queue.pop_front();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adjudication::classifier::Verdict;
    use crate::config::LedgerConfig;
    use crate::tunnel::{Category, Severity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Classifier stub with a switchable outage.
    pub(crate) struct StubClassifier {
        pub failing: AtomicBool,
        pub critical: bool,
        pub assessment: AgentAssessment,
        pub calls: AtomicUsize,
        pub last_recent: Mutex<usize>,
    }

    impl StubClassifier {
        pub(crate) fn new(score: f64, tokens: i64, multiplier: f64) -> Self {
            Self {
                failing: AtomicBool::new(false),
                critical: true,
                assessment: AgentAssessment {
                    score,
                    tokens,
                    multiplier,
                    reasoning: "stub".into(),
                    improvements: vec!["be precise".into()],
                },
                calls: AtomicUsize::new(0),
                last_recent: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ExternalClassifier for StubClassifier {
        fn name(&self) -> &str {
            "stub"
        }

        async fn examine(&self, suggestion: &Suggestion) -> anyhow::Result<Examination> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("stub outage");
            }
            Ok(Examination {
                suggestion_id: suggestion.id.clone(),
                verdict: Verdict::Critical,
                is_critical: self.critical,
                confidence: 0.9,
                reasoning: "stub".into(),
                error: None,
            })
        }

        async fn evaluate_agent(
            &self,
            agent_id: &str,
            recent: &[Suggestion],
            _success_rate: f64,
        ) -> anyhow::Result<AgentAssessment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_recent.lock() = recent.len();
            if self.failing.load(Ordering::SeqCst) || agent_id.starts_with("broken") {
                anyhow::bail!("stub outage");
            }
            Ok(self.assessment.clone())
        }
    }

    fn suggestion() -> Suggestion {
        Suggestion::new(
            Category::LogicError,
            Severity::High,
            "src/lib.rs:5",
            "inverted condition",
            "agent-a",
        )
    }

    fn setup(stub: StubClassifier, threshold: u32) -> (Arc<StubClassifier>, Adjudicator) {
        let stub = Arc::new(stub);
        let adjudicator = Adjudicator::new(
            stub.clone(),
            Arc::new(CircuitBreaker::with_limits(threshold, 60)),
            Arc::new(RewardLedger::new(&LedgerConfig::default())),
            "classifier",
        )
        .with_recent_window(3);
        (stub, adjudicator)
    }

    #[test]
    fn judgment_tiers() {
        assert!(judgment_message(95.0).starts_with("Exceptional"));
        assert!(judgment_message(90.0).starts_with("Exceptional"));
        assert!(judgment_message(85.0).starts_with("Good"));
        assert!(judgment_message(70.0).starts_with("Adequate"));
        assert!(judgment_message(60.0).starts_with("Marginal"));
        assert!(judgment_message(50.0).starts_with("Poor"));
        assert!(judgment_message(49.9).starts_with("Unacceptable"));
    }

    #[tokio::test]
    async fn examine_records_processed_event() {
        let (_stub, adj) = setup(StubClassifier::new(80.0, 100, 1.0), 5);
        let e = adj.examine(&suggestion(), Some("agent-a")).await;
        assert!(e.is_critical);
        let perf = adj.ledger().get_agent("agent-a").unwrap();
        assert_eq!(perf.suggestions_processed, 1);
        assert_eq!(perf.critical_found, 1);
        assert_eq!(perf.false_positives, 0);
    }

    #[tokio::test]
    async fn non_critical_verdict_counts_as_false_positive() {
        let mut stub = StubClassifier::new(80.0, 100, 1.0);
        stub.critical = false;
        let (_stub, adj) = setup(stub, 5);
        adj.examine(&suggestion(), Some("agent-a")).await;
        let perf = adj.ledger().get_agent("agent-a").unwrap();
        assert_eq!(perf.false_positives, 1);
        assert_eq!(perf.success_rate, 0.0);
    }

    #[tokio::test]
    async fn classifier_outage_degrades_and_opens_circuit() {
        let stub = StubClassifier::new(80.0, 100, 1.0);
        stub.failing.store(true, Ordering::SeqCst);
        let (stub, adj) = setup(stub, 2);

        for _ in 0..2 {
            let e = adj.examine(&suggestion(), Some("agent-a")).await;
            assert!(e.is_degraded());
            assert!(!e.is_critical);
            assert_eq!(e.confidence, 0.0);
        }
        assert!(adj.breaker().is_open("classifier"));

        // Degraded results still count against the agent.
        let agent = adj.ledger().get_agent("agent-a").unwrap();
        assert_eq!(agent.suggestions_processed, 2);
        assert_eq!(agent.critical_found, 0);
        assert_eq!(agent.false_positives, 2);
        assert_eq!(agent.success_rate, 0.0);
        assert_eq!(adj.ledger().get_agents_for_evaluation(), vec!["agent-a".to_string()]);

        // Open circuit: classifier is not called at all.
        let calls_before = stub.calls.load(Ordering::SeqCst);
        let e = adj.examine(&suggestion(), None).await;
        assert!(e.error.as_deref().unwrap().contains("circuit open"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn examine_batch_preserves_order() {
        let (_stub, adj) = setup(StubClassifier::new(80.0, 100, 1.0), 5);
        let batch = vec![suggestion(), suggestion(), suggestion()];
        let results = adj.examine_batch(&batch, Some("agent-a")).await;
        let ids: Vec<&str> = results.iter().map(|e| e.suggestion_id.as_str()).collect();
        let expected: Vec<&str> = batch.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(
            adj.ledger().get_agent("agent-a").unwrap().suggestions_processed,
            3
        );
    }

    #[tokio::test]
    async fn degraded_batch_is_recorded_as_processed() {
        let stub = StubClassifier::new(80.0, 100, 1.0);
        stub.failing.store(true, Ordering::SeqCst);
        let (_stub, adj) = setup(stub, 5);
        let batch = vec![suggestion(), suggestion(), suggestion()];
        let results = adj.examine_batch(&batch, Some("agent-a")).await;
        assert!(results.iter().all(Examination::is_degraded));

        let agent = adj.ledger().get_agent("agent-a").unwrap();
        assert_eq!(agent.suggestions_processed, 3);
        assert_eq!(agent.false_positives, 3);
    }

    #[tokio::test]
    async fn evaluate_unknown_agent_is_explicit_error() {
        let (stub, adj) = setup(StubClassifier::new(80.0, 100, 1.0), 5);
        let err = adj.evaluate_agent("ghost").await.unwrap_err();
        assert!(matches!(err, AdjudicationError::AgentNotRegistered(ref id) if id == "ghost"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evaluate_awards_tokens() {
        let (stub, adj) = setup(StubClassifier::new(85.0, 100, 1.5), 5);
        for _ in 0..5 {
            adj.examine(&suggestion(), Some("agent-a")).await;
        }
        let j = adj.evaluate_agent("agent-a").await.unwrap();
        assert_eq!(j.tokens_awarded, 150);
        assert_eq!(j.total_tokens, 150);
        assert_eq!(j.streak, 1);
        assert!((j.fear_level - 0.5).abs() < 1e-9);
        assert!(j.judgment.starts_with("Good"));
        assert_eq!(*stub.last_recent.lock(), 3);
        assert_eq!(adj.ledger().ledger_entries("agent-a").len(), 1);
    }

    #[tokio::test]
    async fn evaluate_outage_leaves_ledger_untouched() {
        let (stub, adj) = setup(StubClassifier::new(85.0, 100, 1.5), 5);
        adj.ledger().register_agent("agent-a");
        stub.failing.store(true, Ordering::SeqCst);
        let err = adj.evaluate_agent("agent-a").await.unwrap_err();
        assert!(err.is_degraded());
        assert!(adj.ledger().ledger_entries("agent-a").is_empty());
        assert_eq!(adj.breaker().failure_count("classifier"), 1);
    }
}
