//! External classifier capability consumed by the adjudicator.
//!
//! Implementations wrap a hosted model (see [`HostedClassifier`]) or a
//! local stub and return structured results. Free-text model output is
//! parsed inside the implementation; nothing past this seam sees it.
//!
//! [`HostedClassifier`]: super::hosted::HostedClassifier

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tunnel::Suggestion;

pub const MAX_SCORE: f64 = 100.0;
pub const MAX_TOKENS: i64 = 1000;
pub const MIN_MULTIPLIER: f64 = 1.0;
pub const MAX_MULTIPLIER: f64 = 2.0;

// ── Suggestion examination ───────────────────────────────────────

/// Classifier verdict on a single suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Critical,
    NotCritical,
    /// No judgment could be made (classifier unavailable or unparseable).
    Unknown,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::NotCritical => "NOT_CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Structured result of examining one suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Examination {
    pub suggestion_id: String,
    pub verdict: Verdict,
    pub is_critical: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    /// Set when the result is a degraded stand-in for a failed call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Examination {
    /// Non-critical, zero-confidence result used when no judgment was made.
    pub fn degraded(suggestion_id: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            suggestion_id: suggestion_id.to_string(),
            verdict: Verdict::Unknown,
            is_critical: false,
            confidence: 0.0,
            reasoning: format!("Classification unavailable: {error}"),
            error: Some(error),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// Clamp confidence into range and keep `verdict` consistent with `is_critical`.
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_finite(self.confidence, 0.0, 1.0);
        if self.verdict != Verdict::Unknown {
            self.verdict = if self.is_critical {
                Verdict::Critical
            } else {
                Verdict::NotCritical
            };
        }
        self
    }
}

// ── Agent assessment ─────────────────────────────────────────────

/// Classifier assessment of an agent's recent work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAssessment {
    /// Score in `[0, 100]`.
    pub score: f64,
    /// Base token award in `[0, 1000]`.
    pub tokens: i64,
    /// Award multiplier in `[1.0, 2.0]`.
    pub multiplier: f64,
    pub reasoning: String,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl AgentAssessment {
    /// Clamp every field into its documented range.
    pub fn normalized(mut self) -> Self {
        self.score = clamp_finite(self.score, 0.0, MAX_SCORE);
        self.tokens = self.tokens.clamp(0, MAX_TOKENS);
        self.multiplier = clamp_finite(self.multiplier, MIN_MULTIPLIER, MAX_MULTIPLIER);
        self
    }
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

// ── Classifier trait ─────────────────────────────────────────────

/// Judgment service for suggestions and agents.
///
/// Errors are returned, not swallowed: the adjudicator decides how to
/// degrade and feeds the outcome to the circuit breaker.
#[async_trait]
pub trait ExternalClassifier: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn examine(&self, suggestion: &Suggestion) -> anyhow::Result<Examination>;

    /// Examine several suggestions; results follow input order.
    async fn examine_batch(&self, suggestions: &[Suggestion]) -> anyhow::Result<Vec<Examination>> {
        let mut results = Vec::with_capacity(suggestions.len());
        for suggestion in suggestions {
            results.push(self.examine(suggestion).await?);
        }
        Ok(results)
    }

    async fn evaluate_agent(
        &self,
        agent_id: &str,
        recent_suggestions: &[Suggestion],
        success_rate: f64,
    ) -> anyhow::Result<AgentAssessment>;
}

/// Stand-in used when no hosted classifier is configured. Every call
/// fails, so examinations degrade and evaluations are skipped.
pub struct UnconfiguredClassifier;

#[async_trait]
impl ExternalClassifier for UnconfiguredClassifier {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn examine(&self, _suggestion: &Suggestion) -> anyhow::Result<Examination> {
        anyhow::bail!("no classifier API key configured")
    }

    async fn evaluate_agent(
        &self,
        _agent_id: &str,
        _recent_suggestions: &[Suggestion],
        _success_rate: f64,
    ) -> anyhow::Result<AgentAssessment> {
        anyhow::bail!("no classifier API key configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_examination_is_non_critical() {
        let e = Examination::degraded("s-1", "connection refused");
        assert!(e.is_degraded());
        assert!(!e.is_critical);
        assert_eq!(e.confidence, 0.0);
        assert_eq!(e.verdict, Verdict::Unknown);
        assert!(e.reasoning.contains("connection refused"));
    }

    #[test]
    fn assessment_is_clamped() {
        let a = AgentAssessment {
            score: 140.0,
            tokens: 5000,
            multiplier: 0.2,
            reasoning: String::new(),
            improvements: vec![],
        }
        .normalized();
        assert_eq!(a.score, 100.0);
        assert_eq!(a.tokens, 1000);
        assert_eq!(a.multiplier, 1.0);

        let a = AgentAssessment {
            score: f64::NAN,
            tokens: -4,
            multiplier: 9.0,
            reasoning: String::new(),
            improvements: vec![],
        }
        .normalized();
        assert_eq!(a.score, 0.0);
        assert_eq!(a.tokens, 0);
        assert_eq!(a.multiplier, 2.0);
    }

    #[test]
    fn examination_verdict_follows_flag() {
        let e = Examination {
            suggestion_id: "s".into(),
            verdict: Verdict::NotCritical,
            is_critical: true,
            confidence: 1.7,
            reasoning: String::new(),
            error: None,
        }
        .normalized();
        assert_eq!(e.verdict, Verdict::Critical);
        assert_eq!(e.confidence, 1.0);
    }

    #[tokio::test]
    async fn unconfigured_classifier_always_fails() {
        let s = Suggestion::new(
            crate::tunnel::Category::BugFix,
            crate::tunnel::Severity::High,
            "a.rs",
            "d",
            "o",
        );
        assert!(UnconfiguredClassifier.examine(&s).await.is_err());
        assert!(UnconfiguredClassifier.evaluate_agent("a", &[], 1.0).await.is_err());
    }
}
