//! Suggestion tunnel: channel/bin registries, ingestion, and dispatch.
//!
//! `ingest` runs the critical filter over a batch, places survivors in a
//! fresh [`Bin`] (preserving input order), and hands the bin to the
//! registered dispatch callback. The callback runs outside the registry
//! lock so it may call back into the tunnel.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::filter::CriticalFilter;
use super::types::{
    Bin, BinStatus, Channel, IngestResult, IngestStatus, SeverityBreakdown, Suggestion,
};
use crate::error::TunnelError;

/// Consumer-supplied function that forwards a bin downstream.
pub type DispatchCallback = Arc<dyn Fn(&Bin) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    channels: HashMap<String, Channel>,
    bins: HashMap<String, Bin>,
}

/// Routes critical suggestions into dispatchable bins.
pub struct Tunnel {
    filter: CriticalFilter,
    registry: Mutex<Registry>,
    dispatch: RwLock<Option<DispatchCallback>>,
}

impl Tunnel {
    pub fn new(filter: CriticalFilter) -> Self {
        Self {
            filter,
            registry: Mutex::new(Registry::default()),
            dispatch: RwLock::new(None),
        }
    }

    pub fn filter(&self) -> &CriticalFilter {
        &self.filter
    }

    // ── Channels ─────────────────────────────────────────────────

    /// Register a new active channel and return it.
    pub fn register_channel(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        criteria: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Channel {
        let channel = Channel {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            criteria: criteria.unwrap_or_default(),
            active: true,
        };
        tracing::info!(channel_id = %channel.id, name = %channel.name, "Registered channel");
        self.registry
            .lock()
            .channels
            .insert(channel.id.clone(), channel.clone());
        channel
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Channel, TunnelError> {
        self.registry
            .lock()
            .channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| TunnelError::ChannelNotFound(channel_id.to_string()))
    }

    pub fn find_channel_by_name(&self, name: &str) -> Option<Channel> {
        self.registry
            .lock()
            .channels
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    /// All channels, sorted by name.
    pub fn list_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.registry.lock().channels.values().cloned().collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }

    pub fn set_channel_active(&self, channel_id: &str, active: bool) -> Result<(), TunnelError> {
        let mut registry = self.registry.lock();
        let channel = registry
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| TunnelError::ChannelNotFound(channel_id.to_string()))?;
        channel.active = active;
        tracing::info!(channel_id, active, "Channel activity changed");
        Ok(())
    }

    // ── Dispatch ─────────────────────────────────────────────────

    /// Register (or replace) the dispatch callback.
    pub fn register_dispatch_callback<F>(&self, callback: F)
    where
        F: Fn(&Bin) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.dispatch.write() = Some(Arc::new(callback));
    }

    // ── Ingestion ────────────────────────────────────────────────

    /// Filter a batch of suggestions and bin the survivors.
    ///
    /// Returns a result even when nothing passes. Fails on an unknown or
    /// inactive channel, and when the dispatch callback fails (the bin
    /// is left in `error`).
    pub fn ingest(
        &self,
        suggestions: Vec<Suggestion>,
        channel_id: &str,
        bin_name_hint: Option<&str>,
    ) -> Result<IngestResult, TunnelError> {
        let channel = self.get_channel(channel_id)?;
        if !channel.active {
            return Err(TunnelError::ChannelInactive(channel_id.to_string()));
        }

        let received = suggestions.len();
        let survivors = self.filter.filter_batch(&suggestions);
        let filtered_out = received - survivors.len();
        let severity = SeverityBreakdown::tally(&survivors);

        if survivors.is_empty() {
            tracing::debug!(channel = %channel.name, received, "No critical issues in batch");
            return Ok(IngestResult {
                status: IngestStatus::NoCriticalIssues,
                channel_id: channel.id,
                received,
                filtered_out,
                critical_count: 0,
                severity,
                bin_id: None,
            });
        }

        let name = match bin_name_hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => hint.to_string(),
            None => format!(
                "{}-{}",
                channel.name,
                chrono::Utc::now().format("%Y%m%d%H%M%S")
            ),
        };

        let mut bin = Bin::new(channel.id.clone(), name);
        for suggestion in survivors {
            bin.push(suggestion);
        }
        bin.set_status(BinStatus::Processing);
        let critical_count = bin.suggestions.len();
        let bin_id = bin.id.clone();

        tracing::info!(
            bin_id = %bin_id,
            channel = %channel.name,
            received,
            filtered_out,
            critical_count,
            priority = bin.priority,
            "Created bin"
        );

        let snapshot = bin.clone();
        self.registry.lock().bins.insert(bin_id.clone(), bin);

        self.dispatch_bin(&snapshot)?;

        Ok(IngestResult {
            status: IngestStatus::Success,
            channel_id: channel.id,
            received,
            filtered_out,
            critical_count,
            severity,
            bin_id: Some(bin_id),
        })
    }

    /// Convenience wrapper around [`Tunnel::ingest`] for one suggestion.
    pub fn ingest_one(
        &self,
        suggestion: Suggestion,
        channel_id: &str,
    ) -> Result<IngestResult, TunnelError> {
        self.ingest(vec![suggestion], channel_id, None)
    }

    fn dispatch_bin(&self, bin: &Bin) -> Result<(), TunnelError> {
        let callback = self.dispatch.read().clone();
        let Some(callback) = callback else {
            return Ok(());
        };

        match callback(bin) {
            Ok(()) => {
                let mut registry = self.registry.lock();
                if let Some(stored) = registry.bins.get_mut(&bin.id) {
                    for s in &mut stored.suggestions {
                        s.dispatched = true;
                    }
                    stored.updated_at = chrono::Utc::now();
                }
                tracing::info!(bin_id = %bin.id, count = bin.suggestions.len(), "Dispatched bin");
                Ok(())
            }
            Err(e) => {
                if let Some(stored) = self.registry.lock().bins.get_mut(&bin.id) {
                    stored.set_status(BinStatus::Error);
                }
                tracing::warn!(bin_id = %bin.id, error = %e, "Dispatch failed, bin marked error");
                Err(TunnelError::DispatchFailure {
                    bin_id: bin.id.clone(),
                    source: e,
                })
            }
        }
    }

    // ── Bins ─────────────────────────────────────────────────────

    pub fn get_bin(&self, bin_id: &str) -> Result<Bin, TunnelError> {
        self.registry
            .lock()
            .bins
            .get(bin_id)
            .cloned()
            .ok_or_else(|| TunnelError::BinNotFound(bin_id.to_string()))
    }

    /// Non-closed bins, highest priority first (oldest first on ties).
    pub fn list_active_bins(&self, channel_id: Option<&str>) -> Vec<Bin> {
        let registry = self.registry.lock();
        let mut bins: Vec<Bin> = registry
            .bins
            .values()
            .filter(|b| b.status != BinStatus::Closed)
            .filter(|b| channel_id.is_none_or(|id| b.channel_id == id))
            .cloned()
            .collect();
        drop(registry);
        bins.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        bins
    }

    /// Move a bin to `closed`. `closed` and `error` are terminal, so
    /// closing a bin in either state leaves it untouched.
    pub fn close_bin(&self, bin_id: &str) -> Result<(), TunnelError> {
        let mut registry = self.registry.lock();
        let bin = registry
            .bins
            .get_mut(bin_id)
            .ok_or_else(|| TunnelError::BinNotFound(bin_id.to_string()))?;
        match bin.status {
            BinStatus::Closed => {}
            BinStatus::Error => {
                tracing::debug!(bin_id, "Bin is in error, leaving it unclosed");
            }
            previous => {
                bin.set_status(BinStatus::Closed);
                tracing::info!(bin_id, from = previous.as_str(), "Closed bin");
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
