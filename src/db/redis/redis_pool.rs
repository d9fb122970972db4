use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::db::PresenceCache;
use crate::db::models::ActiveSet;

const CANNOT_DEBUG: &str = "Debug called on ConnectionManager";

/// Hash holding per-streamer live-state fields (`<streamer>:online`).
pub const STREAM_DATA_KEY: &str = "stream_data";

/// Value of the live-state field while a stream is online.
pub const ONLINE_VALUE: &str = "True";

/// Maximum field/value pairs sent in one `HSET` within the pipeline.
const LAST_SEEN_CHUNK: usize = 1000;

const CONNECT_RETRIES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisKey {
    StreamData,
    LastSeen,
}

impl RedisKey {
    /// Builds the key (or hash field, for `StreamData`) for a streamer.
    pub fn with_name(&self, name: &str) -> String {
        match self {
            RedisKey::StreamData => format!("{}:online", name),
            RedisKey::LastSeen => format!("{}:users:last_seen", name),
        }
    }
}

/// Process-wide redis handle. The connection is opened on first use and shared by every clone,
/// so an unreachable server fails each lookup instead of the whole process.
#[derive(Clone)]
pub struct RedisPool {
    client: redis::Client,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", CANNOT_DEBUG)
    }
}

impl RedisPool {
    /// Parses `redis_url` without connecting.
    pub fn new(redis_url: &str) -> CacheResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            manager: Arc::new(OnceCell::new()),
        })
    }

    /// Returns the shared connection, connecting first if no attempt has succeeded yet.
    pub async fn connection(&self) -> CacheResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                tracing::debug!("connecting to redis server");
                let config = ConnectionManagerConfig::new().set_number_of_retries(CONNECT_RETRIES);
                ConnectionManager::new_with_config(self.client.clone(), config).await
            })
            .await?;

        Ok(manager.clone())
    }
}

#[async_trait]
impl PresenceCache for RedisPool {
    #[instrument(skip(self))]
    async fn is_online(&self, channel: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let field = RedisKey::StreamData.with_name(channel);

        let state: Option<String> = conn.hget(STREAM_DATA_KEY, &field).await?;
        if state.is_none() {
            tracing::debug!(field, "no live-state field, treating channel as offline");
        }

        Ok(state.as_deref() == Some(ONLINE_VALUE))
    }

    #[instrument(skip(self, active), fields(users = active.len()))]
    async fn record_last_seen(
        &self,
        channel: &str,
        active: &ActiveSet,
        seen_at: i64,
    ) -> CacheResult<()> {
        if active.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let key = RedisKey::LastSeen.with_name(channel);
        let fields: Vec<(String, i64)> = active.iter().map(|u| (u.0.clone(), seen_at)).collect();

        let mut pipe = redis::pipe();
        pipe.atomic();

        for chunk in fields.chunks(LAST_SEEN_CHUNK) {
            pipe.hset_multiple(&key, chunk).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }
}

pub type CacheResult<T> = core::result::Result<T, CacheErr>;

#[derive(Debug, Error)]
pub enum CacheErr {
    #[error(transparent)]
    RedisClientError(#[from] redis::RedisError),
}
