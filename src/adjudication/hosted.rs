//! [`ExternalClassifier`] backed by a hosted Anthropic-style messages API.
//!
//! The model may answer with a JSON object or with `KEY: value` lines
//! (`VERDICT:`, `CONFIDENCE:`, `SCORE:` ...). Both shapes are converted
//! into structured results here; anything else is an error.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::classifier::{AgentAssessment, Examination, ExternalClassifier, Verdict};
use crate::config::ClassifierConfig;
use crate::tunnel::Suggestion;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct HostedClassifier {
    id: String,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    client: reqwest::Client,
}

/// Outcome of one failed HTTP attempt.
enum AttemptError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl HostedClassifier {
    /// Build from config; `None` when no API key is configured.
    pub fn from_config(config: &ClassifierConfig) -> Option<Self> {
        config
            .resolved_api_key()
            .map(|key| Self::from_parts(key, config))
    }

    fn from_parts(api_key: String, config: &ClassifierConfig) -> Self {
        Self {
            id: format!("hosted-{}", config.model),
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            client: reqwest::Client::new(),
        }
    }

    fn build_examine_prompt(suggestion: &Suggestion) -> String {
        format!(
            r#"Decide whether this code review suggestion describes a critical issue
(crash, security hole, data loss, wrong results) or merely an optimization/style remark.

Category: {category}
Severity: {severity}
Location: {location}
Description: {description}
Code:
```
{code}
```
Proposed fix: {fix}

Respond in JSON: {{"is_critical": true|false, "confidence": 0.0-1.0, "reasoning": "..."}}"#,
            category = suggestion.category,
            severity = suggestion.severity,
            location = suggestion.location,
            description = suggestion.description,
            code = suggestion.code,
            fix = suggestion.fix.as_deref().unwrap_or("none"),
        )
    }

    fn build_evaluation_prompt(agent_id: &str, recent: &[Suggestion], success_rate: f64) -> String {
        let listing = if recent.is_empty() {
            "(no recent suggestions)".to_string()
        } else {
            recent
                .iter()
                .map(|s| {
                    format!(
                        "- [{}/{}] {}: {}",
                        s.severity, s.category, s.location, s.description
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            r#"Evaluate the review agent `{agent_id}`.
Success rate: {rate:.1}%
Recent suggestions:
{listing}

Respond in JSON: {{"score": 0-100, "tokens": 0-1000, "multiplier": 1.0-2.0,
"reasoning": "...", "improvements": ["..."]}}"#,
            rate = success_rate * 100.0,
        )
    }

    /// Send a prompt, retrying transient failures with exponential backoff.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let mut attempt: u32 = 0;
        loop {
            match self.send_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) if attempt >= self.max_retries => {
                    return Err(e.context(format!("gave up after {} attempt(s)", attempt + 1)));
                }
                Err(AttemptError::Retryable(e)) => {
                    let backoff = self
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt))
                        .min(MAX_BACKOFF);
                    tracing::warn!(
                        classifier = %self.id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Classifier call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn send_once(&self, prompt: &str) -> Result<String, AttemptError> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": 1024,
            "temperature": 0.0,
            "messages": [{
                "role": "user",
                "content": prompt,
            }]
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("classifier API error {}: {}", status, body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AttemptError::Retryable(e.into()))?;
        body["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AttemptError::Fatal(anyhow::anyhow!("classifier response had no text")))
    }
}

#[async_trait]
impl ExternalClassifier for HostedClassifier {
    fn name(&self) -> &str {
        &self.id
    }

    async fn examine(&self, suggestion: &Suggestion) -> anyhow::Result<Examination> {
        let text = self.complete(&Self::build_examine_prompt(suggestion)).await?;
        parse_examination(&suggestion.id, &text)
    }

    async fn evaluate_agent(
        &self,
        agent_id: &str,
        recent_suggestions: &[Suggestion],
        success_rate: f64,
    ) -> anyhow::Result<AgentAssessment> {
        let prompt = Self::build_evaluation_prompt(agent_id, recent_suggestions, success_rate);
        let text = self.complete(&prompt).await?;
        parse_assessment(&text)
    }
}

// ── Response parsing ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExaminationJson {
    #[serde(default)]
    verdict: Option<String>,
    #[serde(default)]
    is_critical: Option<bool>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct AssessmentJson {
    score: f64,
    #[serde(default)]
    tokens: f64,
    #[serde(default = "default_multiplier")]
    multiplier: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    improvements: Vec<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

/// Convert model output into an [`Examination`].
fn parse_examination(suggestion_id: &str, text: &str) -> anyhow::Result<Examination> {
    let json =
        first_json_object(text).and_then(|j| serde_json::from_str::<ExaminationJson>(j).ok());
    if let Some(parsed) = json {
        let is_critical = parsed
            .is_critical
            .or_else(|| parsed.verdict.as_deref().and_then(parse_verdict_flag));
        if let Some(is_critical) = is_critical {
            return Ok(Examination {
                suggestion_id: suggestion_id.to_string(),
                verdict: Verdict::NotCritical,
                is_critical,
                confidence: parsed.confidence.unwrap_or(0.5),
                reasoning: parsed.reasoning,
                error: None,
            }
            .normalized());
        }
    }

    let fields = scan_prefixed_lines(text);
    let is_critical = fields
        .get("VERDICT")
        .or_else(|| fields.get("CRITICAL"))
        .and_then(|v| parse_verdict_flag(v))
        .ok_or_else(|| anyhow::anyhow!("unparseable examination response"))?;

    Ok(Examination {
        suggestion_id: suggestion_id.to_string(),
        verdict: Verdict::NotCritical,
        is_critical,
        confidence: fields
            .get("CONFIDENCE")
            .and_then(|v| parse_number(v))
            .unwrap_or(0.5),
        reasoning: fields.get("REASONING").cloned().unwrap_or_default(),
        error: None,
    }
    .normalized())
}

/// Convert model output into an [`AgentAssessment`].
fn parse_assessment(text: &str) -> anyhow::Result<AgentAssessment> {
    let json = first_json_object(text).and_then(|j| serde_json::from_str::<AssessmentJson>(j).ok());
    if let Some(parsed) = json {
        return Ok(AgentAssessment {
            score: parsed.score,
            tokens: parsed.tokens.round() as i64,
            multiplier: parsed.multiplier,
            reasoning: parsed.reasoning,
            improvements: parsed.improvements,
        }
        .normalized());
    }

    let fields = scan_prefixed_lines(text);
    let score = fields
        .get("SCORE")
        .and_then(|v| parse_number(v))
        .ok_or_else(|| anyhow::anyhow!("unparseable assessment response"))?;

    let mut improvements: Vec<String> = fields
        .get("IMPROVEMENTS")
        .map(|v| {
            v.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    // Bullet lines following an IMPROVEMENTS: header.
    let mut in_improvements = false;
    for line in text.lines().map(str::trim) {
        if line.to_ascii_uppercase().starts_with("IMPROVEMENTS:") {
            in_improvements = true;
        } else if in_improvements {
            match line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                Some(item) if !item.trim().is_empty() => improvements.push(item.trim().to_string()),
                _ => in_improvements = false,
            }
        }
    }

    Ok(AgentAssessment {
        score,
        tokens: fields
            .get("TOKENS")
            .and_then(|v| parse_number(v))
            .map_or(0, |t| t.round() as i64),
        multiplier: fields
            .get("MULTIPLIER")
            .and_then(|v| parse_number(v))
            .unwrap_or(1.0),
        reasoning: fields.get("REASONING").cloned().unwrap_or_default(),
        improvements,
    }
    .normalized())
}

/// Collect `KEY: value` lines, keys upper-cased. First occurrence wins.
fn scan_prefixed_lines(text: &str) -> std::collections::HashMap<String, String> {
    let mut fields = std::collections::HashMap::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['*', '#', ' ']);
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_end_matches('*').to_ascii_uppercase();
        if key.is_empty() || key.contains(' ') {
            continue;
        }
        fields
            .entry(key)
            .or_insert_with(|| value.trim().trim_start_matches('*').trim().to_string());
    }
    fields
}

fn parse_verdict_flag(value: &str) -> Option<bool> {
    let v = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match v.as_str() {
        "critical" | "true" | "yes" => Some(true),
        "not_critical" | "noncritical" | "non_critical" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Leading number of a value like `85`, `0.9`, `1.5x` or `85/100`.
fn parse_number(value: &str) -> Option<f64> {
    let numeric: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    numeric.parse().ok()
}

/// The first balanced `{...}` span in a model reply, wherever it sits:
/// bare, inside a code fence, or surrounded by prose. Braces inside JSON
/// strings do not count toward nesting.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────
