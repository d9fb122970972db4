use core::fmt;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Level assigned to rows created by the ledger merge. Never mutated afterwards.
pub const BASELINE_LEVEL: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct Username(pub String);

/// Base `tb_user` table model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub username: Username,
    pub username_raw: String,
    pub level: i32,
    pub points: i64,
    pub subscriber: bool,
    pub minutes_in_chat_online: i64,
    pub minutes_in_chat_offline: i64,
}

impl LedgerEntry {
    /// Row as created on a chatter's first sighting.
    pub fn first_seen(username: &Username, points: i64, online: i64, offline: i64) -> Self {
        Self {
            username: username.clone(),
            username_raw: username.0.clone(),
            level: BASELINE_LEVEL,
            points,
            subscriber: false,
            minutes_in_chat_online: online,
            minutes_in_chat_offline: offline,
        }
    }
}

/// Deduplicated set of chatters present in a channel for one run.
///
/// Ordered so every store sees the same sequence for the same snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSet(BTreeSet<Username>);

impl ActiveSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Username> {
        self.0.iter()
    }

    pub fn logins(&self) -> Vec<String> {
        self.0.iter().map(|u| u.0.clone()).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ActiveSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(|s| Username(s.into())).collect())
    }
}

/// Outcome of a committed ledger merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub inserted: u64,
    pub updated: u64,
}

impl MergeSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl From<String> for Username {
    fn from(value: String) -> Self {
        Username(value)
    }
}

impl From<&str> for Username {
    fn from(value: &str) -> Self {
        Username(value.to_string())
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
