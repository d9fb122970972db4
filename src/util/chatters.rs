use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::db::models::ActiveSet;

pub const DEFAULT_CHATTERS_HOST: &str = "tmi.twitch.tv";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chatters observed in a channel at fetch time, grouped by badge category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    #[serde(default)]
    pub chatter_count: i64,

    /// `<category, [login, ...]>`, e.g. `moderators`, `vips`, `viewers`
    #[serde(default)]
    pub chatters: HashMap<String, Vec<String>>,
}

impl PresenceSnapshot {
    /// Union of every category list; a chatter listed under several categories appears once.
    pub fn active_set(&self) -> ActiveSet {
        self.chatters.values().flatten().cloned().collect()
    }
}

#[async_trait]
pub trait ChatterSource: Send + Sync {
    async fn fetch(&self, channel: &str) -> FetchResult<PresenceSnapshot>;
}

#[derive(Debug, Clone)]
pub struct TmiClient {
    client: reqwest::Client,
    base_url: String,
}

impl TmiClient {
    pub fn new(host: &str) -> FetchResult<Self> {
        Self::with_base_url(format!("https://{}", host))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn chatters_url(&self, channel: &str) -> String {
        format!("{}/group/user/{}/chatters", self.base_url, channel)
    }
}

#[async_trait]
impl ChatterSource for TmiClient {
    #[instrument(skip(self))]
    async fn fetch(&self, channel: &str) -> FetchResult<PresenceSnapshot> {
        let res = self.client.get(self.chatters_url(channel)).send().await?;

        if !res.status().is_success() {
            let status = res.status();
            tracing::error!(code = %status, "non-2xx chatters response");
            return Err(FetchErr::Status(status.to_string()));
        }

        let body = res.bytes().await?;
        let snapshot: PresenceSnapshot = serde_json::from_slice(&body)?;

        tracing::debug!(
            chatter_count = snapshot.chatter_count,
            categories = snapshot.chatters.len(),
            "fetched chatters"
        );

        Ok(snapshot)
    }
}

pub type FetchResult<T> = core::result::Result<T, FetchErr>;

#[derive(Debug, Error)]
pub enum FetchErr {
    #[error("chatters request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("chatters endpoint returned {0}")]
    Status(String),

    #[error("unable to decode chatters body: {0}")]
    Decode(#[from] serde_json::Error),
}
