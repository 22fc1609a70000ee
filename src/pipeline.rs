//! Wiring: builds every store once from [`Config`] and hands out shared
//! references. Nothing here is global; tests build as many pipelines as
//! they like.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adjudication::{
    Adjudicator, CircuitBreaker, EvaluationScheduler, Examination, ExternalClassifier,
};
use crate::config::Config;
use crate::error::TunnelError;
use crate::rewards::RewardLedger;
use crate::tunnel::{CriticalFilter, IngestResult, Suggestion, Tunnel};

/// Ingestion outcome plus the classifier's view of the binned suggestions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdjudicatedIngest {
    pub ingest: IngestResult,
    pub examinations: Vec<Examination>,
}

pub struct Pipeline {
    tunnel: Arc<Tunnel>,
    ledger: Arc<RewardLedger>,
    breaker: Arc<CircuitBreaker>,
    adjudicator: Arc<Adjudicator>,
    scheduler: Arc<EvaluationScheduler>,
    scheduler_enabled: bool,
}

impl Pipeline {
    pub fn from_config(config: &Config, classifier: Arc<dyn ExternalClassifier>) -> Result<Self> {
        config.validate()?;

        let filter =
            CriticalFilter::new(&config.filter).context("Failed to build critical filter")?;
        let tunnel = Arc::new(Tunnel::new(filter));
        for channel in &config.channels {
            let criteria = (!channel.criteria.is_empty()).then(|| channel.criteria.clone());
            tunnel.register_channel(&channel.name, &channel.description, criteria);
        }

        let ledger =
            Arc::new(RewardLedger::open(&config.ledger).context("Failed to open reward ledger")?);
        let breaker = Arc::new(CircuitBreaker::new(&config.breaker));
        let adjudicator = Arc::new(
            Adjudicator::new(
                classifier,
                Arc::clone(&breaker),
                Arc::clone(&ledger),
                config.classifier.service.clone(),
            )
            .with_recent_window(config.classifier.recent_window),
        );
        let scheduler = Arc::new(EvaluationScheduler::new(
            Arc::clone(&adjudicator),
            config.scheduler.clone(),
        ));

        tracing::info!(
            channels = config.channels.len(),
            agents = ledger.agent_count(),
            "Pipeline ready"
        );

        Ok(Self {
            tunnel,
            ledger,
            breaker,
            adjudicator,
            scheduler,
            scheduler_enabled: config.scheduler.enabled,
        })
    }

    pub fn tunnel(&self) -> &Arc<Tunnel> {
        &self.tunnel
    }

    pub fn ledger(&self) -> &Arc<RewardLedger> {
        &self.ledger
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn adjudicator(&self) -> &Arc<Adjudicator> {
        &self.adjudicator
    }

    pub fn scheduler(&self) -> &Arc<EvaluationScheduler> {
        &self.scheduler
    }

    /// Channel id for `name_or_id`, checking names first.
    pub fn resolve_channel(&self, name_or_id: &str) -> Result<String, TunnelError> {
        if let Some(channel) = self.tunnel.find_channel_by_name(name_or_id) {
            return Ok(channel.id);
        }
        self.tunnel.get_channel(name_or_id).map(|c| c.id)
    }

    /// Route a batch through the tunnel, then examine whatever landed in
    /// the bin, crediting each suggestion to its origin agent.
    pub async fn ingest_and_adjudicate(
        &self,
        suggestions: Vec<Suggestion>,
        channel: &str,
        bin_name_hint: Option<&str>,
    ) -> Result<AdjudicatedIngest, TunnelError> {
        let channel_id = self.resolve_channel(channel)?;
        let ingest = self.tunnel.ingest(suggestions, &channel_id, bin_name_hint)?;

        let Some(bin_id) = ingest.bin_id.as_deref() else {
            return Ok(AdjudicatedIngest {
                ingest,
                examinations: Vec::new(),
            });
        };
        let bin = self.tunnel.get_bin(bin_id)?;

        let mut by_origin: BTreeMap<&str, Vec<Suggestion>> = BTreeMap::new();
        for suggestion in &bin.suggestions {
            by_origin
                .entry(suggestion.origin.as_str())
                .or_default()
                .push(suggestion.clone());
        }

        let mut examinations = Vec::with_capacity(bin.suggestions.len());
        for (origin, batch) in by_origin {
            let agent = (!origin.is_empty()).then_some(origin);
            examinations.extend(self.adjudicator.examine_batch(&batch, agent).await);
        }
        // Report in bin order.
        examinations.sort_by_key(|e| {
            bin.suggestions
                .iter()
                .position(|s| s.id == e.suggestion_id)
                .unwrap_or(usize::MAX)
        });

        Ok(AdjudicatedIngest {
            ingest,
            examinations,
        })
    }

    /// Start the evaluation scheduler if enabled in config.
    pub fn start(&self) -> bool {
        if !self.scheduler_enabled {
            tracing::info!("Evaluation scheduler disabled by config");
            return false;
        }
        self.scheduler.start()
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
    }
}
