use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::accrual::AccrualPlan;
use crate::db::prelude::*;
use crate::util::chatters::{ChatterSource, FetchErr};
use crate::util::config::ChannelConfig;

pub mod scheduler;


/// Collaborators shared by every channel run. Each run opens its own ledger through
/// `connector`; `cache` and `source` may be shared process-wide.
#[derive(Clone)]
pub struct RunContext {
    pub source: Arc<dyn ChatterSource>,
    pub cache: Arc<dyn PresenceCache>,
    pub connector: Arc<dyn LedgerConnector>,
    pub interval_minutes: i64,
}

/// Reconciles one channel's presence snapshot into its ledger and last-seen cache.
pub struct ChannelRun {
    channel: ChannelConfig,
    ctx: RunContext,
}

impl ChannelRun {
    pub fn new(channel: ChannelConfig, ctx: RunContext) -> Self {
        Self { channel, ctx }
    }

    /// Reconciles the channel. The outcome is returned, not logged; see
    /// [`RunReport::log_diagnostics`](scheduler::RunReport::log_diagnostics).
    #[instrument(skip(self), fields(channel = %self.channel.streamer))]
    pub async fn run(self) -> ChannelReport {
        let outcome = self.reconcile().await;

        ChannelReport {
            channel: self.channel.streamer,
            outcome,
        }
    }

    async fn reconcile(&self) -> ChannelResult<ChannelSummary> {
        let streamer = self.channel.streamer.as_str();

        // the live flag parameterizes the accrual, so it is read before anything else
        let online = self
            .ctx
            .cache
            .is_online(streamer)
            .await
            .map_err(ChannelError::PresenceState)?;

        let snapshot = self.ctx.source.fetch(streamer).await?;
        let active = snapshot.active_set();
        let seen_at = Utc::now().timestamp();

        let plan = AccrualPlan::new(&self.channel.rates(), online, self.ctx.interval_minutes);
        tracing::debug!(
            online,
            users = active.len(),
            regular_points = plan.regular.points,
            subscriber_points = plan.subscriber.points,
            "applying accrual"
        );

        let ledger = self.ctx.connector.connect(&self.channel).await?;
        let merged = ledger.merge(&active, &plan).await;
        ledger.close().await;
        let merge = merged?;

        // the ledger is committed at this point; a failed cache write is reported, not undone
        self.ctx
            .cache
            .record_last_seen(streamer, &active, seen_at)
            .await
            .map_err(ChannelError::CacheWrite)?;

        Ok(ChannelSummary {
            online,
            chatter_count: snapshot.chatter_count,
            merge,
            seen_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub online: bool,

    /// Count reported by the chatters endpoint, which may differ from the merged user count
    pub chatter_count: i64,
    pub merge: MergeSummary,
    pub seen_at: i64,
}

#[derive(Debug)]
pub struct ChannelReport {
    pub channel: String,
    pub outcome: ChannelResult<ChannelSummary>,
}

impl ChannelReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub type ChannelResult<T> = core::result::Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("chatter fetch failed: {0}")]
    Fetch(#[from] FetchErr),

    #[error("live-state lookup failed: {0}")]
    PresenceState(#[source] CacheErr),

    #[error("ledger transaction failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("ledger committed but last-seen write failed: {0}")]
    CacheWrite(#[source] CacheErr),

    #[error("channel task did not complete: {0}")]
    Task(String),
}

impl ChannelError {
    /// Stable label used in per-channel diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::Fetch(_) => "fetch",
            ChannelError::PresenceState(_) => "presence_state",
            ChannelError::Ledger(_) => "ledger",
            ChannelError::CacheWrite(_) => "cache_write",
            ChannelError::Task(_) => "task",
        }
    }
}
