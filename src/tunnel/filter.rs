//! Deterministic critical-issue filter.
//!
//! Admits only issues that can break something: always-critical
//! categories pass unconditionally, everything else must be high or
//! critical severity and must not read as an optimization-only remark.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use super::types::{Category, Severity, Suggestion};
use crate::config::FilterConfig;
use crate::error::TunnelError;

/// Why a suggestion did not pass the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Severity is below high.
    SeverityTooLow(Severity),
    /// Description only talks about optimization/style.
    OptimizationOnly,
    /// A critical-refactor with no critical signal in its description.
    RefactorWithoutCriticalSignal,
}

impl Rejection {
    pub fn describe(self) -> String {
        match self {
            Self::SeverityTooLow(sev) => format!(
                "severity '{sev}' is below the critical/high threshold"
            ),
            Self::OptimizationOnly => {
                "description is optimization-only with no critical keyword".into()
            }
            Self::RefactorWithoutCriticalSignal => {
                "critical-refactor without a critical keyword in its description".into()
            }
        }
    }
}

/// Keyword-driven gate over incoming suggestions.
pub struct CriticalFilter {
    optimization: AhoCorasick,
    critical: AhoCorasick,
}

impl CriticalFilter {
    /// Build the filter from configured keyword sets (matched case-insensitively).
    pub fn new(config: &FilterConfig) -> Result<Self, TunnelError> {
        Ok(Self {
            optimization: build_matcher(&config.optimization_keywords)?,
            critical: build_matcher(&config.critical_keywords)?,
        })
    }

    /// Filter with the built-in keyword sets.
    pub fn with_defaults() -> Result<Self, TunnelError> {
        Self::new(&FilterConfig::default())
    }

    pub fn is_critical(&self, suggestion: &Suggestion) -> bool {
        self.evaluate(suggestion).is_ok()
    }

    /// Run the rules in order; the first rule that decides wins.
    pub fn evaluate(&self, suggestion: &Suggestion) -> Result<(), Rejection> {
        if suggestion.category.is_always_critical() {
            return Ok(());
        }

        if !matches!(suggestion.severity, Severity::Critical | Severity::High) {
            return Err(Rejection::SeverityTooLow(suggestion.severity));
        }

        let has_critical = self.critical.is_match(&suggestion.description);
        if self.optimization.is_match(&suggestion.description) && !has_critical {
            return Err(Rejection::OptimizationOnly);
        }

        if suggestion.category == Category::CriticalRefactor && !has_critical {
            return Err(Rejection::RefactorWithoutCriticalSignal);
        }

        Ok(())
    }

    /// Keep the critical suggestions in input order, marking each as filtered.
    pub fn filter_batch(&self, suggestions: &[Suggestion]) -> Vec<Suggestion> {
        suggestions
            .iter()
            .filter(|s| self.is_critical(s))
            .cloned()
            .map(|mut s| {
                s.filtered = true;
                s
            })
            .collect()
    }

    /// Diagnostic text naming the first rule the suggestion fails.
    pub fn explain_rejection(&self, suggestion: &Suggestion) -> String {
        match self.evaluate(suggestion) {
            Ok(()) if suggestion.category.is_always_critical() => format!(
                "not rejected: category '{}' is always critical",
                suggestion.category
            ),
            Ok(()) => format!(
                "not rejected: severity '{}' with no optimization-only signal",
                suggestion.severity
            ),
            Err(rejection) => format!("rejected: {}", rejection.describe()),
        }
    }
}

fn build_matcher(keywords: &[String]) -> Result<AhoCorasick, TunnelError> {
    let patterns: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    Ok(AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostFirst)
        .build(patterns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CriticalFilter {
        CriticalFilter::with_defaults().unwrap()
    }

    fn make(category: Category, severity: Severity, description: &str) -> Suggestion {
        Suggestion::new(category, severity, "src/lib.rs:1", description, "reviewer")
    }

    #[test]
    fn always_critical_categories_pass_regardless_of_text() {
        let f = filter();
        for category in Category::ALL
            .into_iter()
            .filter(|c| c.is_always_critical())
        {
            for severity in [Severity::Medium, Severity::High, Severity::Critical] {
                let s = make(category, severity, "optimize style and refactor formatting");
                assert!(f.is_critical(&s), "{category} / {severity} should pass");
            }
        }
    }

    #[test]
    fn medium_refactor_without_keyword_is_rejected() {
        let f = filter();
        let s = make(
            Category::CriticalRefactor,
            Severity::Medium,
            "extract helper function",
        );
        assert!(!f.is_critical(&s));
        assert_eq!(
            f.evaluate(&s),
            Err(Rejection::SeverityTooLow(Severity::Medium))
        );
    }

    #[test]
    fn optimization_only_high_refactor_is_rejected() {
        let f = filter();
        let s = make(
            Category::CriticalRefactor,
            Severity::High,
            "Optimize the loop for readability",
        );
        assert_eq!(f.evaluate(&s), Err(Rejection::OptimizationOnly));
    }

    #[test]
    fn optimization_with_critical_keyword_passes() {
        let f = filter();
        let s = make(
            Category::CriticalRefactor,
            Severity::Critical,
            "Refactor this parser: it can crash on empty input",
        );
        assert!(f.is_critical(&s));
    }

    #[test]
    fn refactor_without_critical_signal_is_rejected() {
        let f = filter();
        let s = make(
            Category::CriticalRefactor,
            Severity::Critical,
            "split the module into two files",
        );
        assert_eq!(f.evaluate(&s), Err(Rejection::RefactorWithoutCriticalSignal));
    }

    #[test]
    fn filter_batch_preserves_order_and_is_idempotent() {
        let f = filter();
        let batch = vec![
            make(Category::SecurityVulnerability, Severity::Critical, "sql injection"),
            make(Category::CriticalRefactor, Severity::Medium, "refactor to use += operator"),
            make(Category::LogicError, Severity::High, "off by one"),
            make(Category::CriticalRefactor, Severity::High, "race condition in cache"),
        ];
        let once = f.filter_batch(&batch);
        let ids: Vec<&str> = once.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![batch[0].id.as_str(), batch[2].id.as_str(), batch[3].id.as_str()]);
        assert!(once.iter().all(|s| s.filtered));

        let twice = f.filter_batch(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn explain_rejection_names_first_failing_rule() {
        let f = filter();
        let low = make(Category::CriticalRefactor, Severity::Medium, "optimize");
        assert!(f.explain_rejection(&low).contains("severity 'medium'"));

        let opt = make(Category::CriticalRefactor, Severity::High, "style cleanup");
        assert!(f.explain_rejection(&opt).contains("optimization-only"));

        let ok = make(Category::BugFix, Severity::Medium, "anything");
        assert!(f.explain_rejection(&ok).starts_with("not rejected"));
    }

    #[test]
    fn custom_keywords() {
        let config = FilterConfig {
            optimization_keywords: vec!["tidy".into()],
            critical_keywords: vec!["BOOM".into()],
        };
        let f = CriticalFilter::new(&config).unwrap();
        let s = make(Category::CriticalRefactor, Severity::High, "this goes boom");
        assert!(f.is_critical(&s));
        let s = make(Category::CriticalRefactor, Severity::High, "tidy imports");
        assert!(!f.is_critical(&s));
    }
}
