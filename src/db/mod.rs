use async_trait::async_trait;
use thiserror::Error;

use crate::accrual::AccrualPlan;
use crate::db::models::{ActiveSet, MergeSummary};
use crate::db::redis::redis_pool::CacheResult;
use crate::util::config::ChannelConfig;

pub mod models;
pub mod pg;
pub mod redis;

#[cfg(test)]
pub mod tests;

pub mod prelude {
    pub use crate::db::models::{ActiveSet, LedgerEntry, MergeSummary, Username};
    pub use crate::db::pg::{PgConnector, PgLedger};
    pub use crate::db::redis::redis_pool::{CacheErr, RedisPool};
    pub use crate::db::{Ledger, LedgerConnector, LedgerError, LedgerResult, PresenceCache};
}

/// A channel's durable points ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Applies `plan` to every chatter in `active` as a single unit: new chatters are inserted
    /// at the baseline, existing chatters are incremented. Either all rows change or none do.
    async fn merge(&self, active: &ActiveSet, plan: &AccrualPlan) -> LedgerResult<MergeSummary>;

    /// Releases the ledger's connections; called once the run is finished with it.
    async fn close(&self) {}
}

/// Opens the ledger that belongs to a configured channel.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self, channel: &ChannelConfig) -> LedgerResult<Box<dyn Ledger>>;
}

/// Key-value store holding live-state flags and per-channel last-seen hashes.
#[async_trait]
pub trait PresenceCache: Send + Sync {
    async fn is_online(&self, channel: &str) -> CacheResult<bool>;

    /// Overwrites the last-seen timestamp of every chatter in `active` with `seen_at` in one
    /// batched write.
    async fn record_last_seen(
        &self,
        channel: &str,
        active: &ActiveSet,
        seen_at: i64,
    ) -> CacheResult<()>;
}

pub type LedgerResult<T> = core::result::Result<T, LedgerError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("ledger connection failed: {0}")]
    Connect(String),

    #[error("transaction already completed")]
    TxCompleted,
}
