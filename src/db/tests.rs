//! In-memory stand-ins for the ledger and cache stores.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::accrual::{AccrualPlan, ChannelRates};
use crate::db::models::{ActiveSet, LedgerEntry, MergeSummary, Username};
use crate::db::redis::redis_pool::{CacheErr, CacheResult};
use crate::db::{Ledger, LedgerConnector, LedgerError, LedgerResult, PresenceCache};
use crate::util::config::ChannelConfig;

fn injected(channel: &str) -> CacheErr {
    CacheErr::RedisClientError(redis::RedisError::from(std::io::Error::other(format!(
        "injected failure for {channel}"
    ))))
}

/// Ledger whose merge stages every row on a copy and swaps it in only once all rows succeeded.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: Arc<Mutex<HashMap<Username, LedgerEntry>>>,
    fail_at: Option<usize>,
    closed: Arc<AtomicUsize>,
}

impl MemoryLedger {
    /// Fails the merge when it reaches the `n`th staged chatter.
    pub fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Self::default()
        }
    }

    pub fn seed(&self, entry: LedgerEntry) {
        self.rows
            .lock()
            .unwrap()
            .insert(entry.username.clone(), entry);
    }

    pub fn get(&self, username: &str) -> Option<LedgerEntry> {
        self.rows.lock().unwrap().get(&Username::from(username)).cloned()
    }

    pub fn snapshot(&self) -> HashMap<Username, LedgerEntry> {
        self.rows.lock().unwrap().clone()
    }

    /// Number of times a handle to this ledger has been closed.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn merge(&self, active: &ActiveSet, plan: &AccrualPlan) -> LedgerResult<MergeSummary> {
        let mut rows = self.rows.lock().unwrap();
        let mut staged = rows.clone();
        let mut summary = MergeSummary::default();

        for (idx, username) in active.iter().enumerate() {
            if self.fail_at == Some(idx) {
                return Err(LedgerError::SqlxError(sqlx::Error::Protocol(
                    "injected failure".into(),
                )));
            }

            match staged.get_mut(username) {
                Some(entry) => {
                    let accrual = plan.for_existing(entry.subscriber);
                    entry.points += accrual.points;
                    entry.minutes_in_chat_online += accrual.minutes_online;
                    entry.minutes_in_chat_offline += accrual.minutes_offline;
                    summary.updated += 1;
                }
                None => {
                    let accrual = plan.for_new();
                    staged.insert(
                        username.clone(),
                        LedgerEntry::first_seen(
                            username,
                            accrual.points,
                            accrual.minutes_online,
                            accrual.minutes_offline,
                        ),
                    );
                    summary.inserted += 1;
                }
            }
        }

        *rows = staged;
        Ok(summary)
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one shared [`MemoryLedger`] per DSN.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    ledgers: Arc<Mutex<HashMap<String, MemoryLedger>>>,
    unreachable: HashSet<String>,
}

impl MemoryConnector {
    pub fn with_ledger(self, dsn: &str, ledger: MemoryLedger) -> Self {
        self.ledgers.lock().unwrap().insert(dsn.to_string(), ledger);
        self
    }

    pub fn unreachable(mut self, dsn: &str) -> Self {
        self.unreachable.insert(dsn.to_string());
        self
    }

    pub fn ledger(&self, dsn: &str) -> MemoryLedger {
        self.ledgers
            .lock()
            .unwrap()
            .entry(dsn.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl LedgerConnector for MemoryConnector {
    async fn connect(&self, channel: &ChannelConfig) -> LedgerResult<Box<dyn Ledger>> {
        if self.unreachable.contains(&channel.dsn) {
            return Err(LedgerError::Connect(format!("{} unreachable", channel.dsn)));
        }

        Ok(Box::new(self.ledger(&channel.dsn)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockCache {
    live: HashSet<String>,
    state_failures: HashSet<String>,
    write_failures: HashSet<String>,
    last_seen: Arc<Mutex<HashMap<String, HashMap<String, i64>>>>,
}

impl MockCache {
    pub fn live(mut self, channel: &str) -> Self {
        self.live.insert(channel.to_string());
        self
    }

    pub fn failing_state(mut self, channel: &str) -> Self {
        self.state_failures.insert(channel.to_string());
        self
    }

    pub fn failing_writes(mut self, channel: &str) -> Self {
        self.write_failures.insert(channel.to_string());
        self
    }

    pub fn last_seen(&self, channel: &str) -> HashMap<String, i64> {
        self.last_seen
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PresenceCache for MockCache {
    async fn is_online(&self, channel: &str) -> CacheResult<bool> {
        if self.state_failures.contains(channel) {
            return Err(injected(channel));
        }

        Ok(self.live.contains(channel))
    }

    async fn record_last_seen(
        &self,
        channel: &str,
        active: &ActiveSet,
        seen_at: i64,
    ) -> CacheResult<()> {
        if self.write_failures.contains(channel) {
            return Err(injected(channel));
        }

        let mut last_seen = self.last_seen.lock().unwrap();
        let hash = last_seen.entry(channel.to_string()).or_default();
        for username in active.iter() {
            hash.insert(username.0.clone(), seen_at);
        }

        Ok(())
    }
}

fn subscriber(login: &str, points: i64) -> LedgerEntry {
    LedgerEntry {
        subscriber: true,
        points,
        ..LedgerEntry::first_seen(&Username::from(login), 0, 0, 0)
    }
}

#[tokio::test]
async fn test_merge_inserts_new_chatters_at_baseline() {
    let ledger = MemoryLedger::default();
    let active: ActiveSet = ["alice", "bob"].into_iter().collect();
    let plan = AccrualPlan::new(&ChannelRates::new(Some(2), Some(10), 0.0), true, 10);

    let summary = ledger.merge(&active, &plan).await.unwrap();
    assert_eq!(summary, MergeSummary { inserted: 2, updated: 0 });

    let alice = ledger.get("alice").unwrap();
    assert_eq!(alice.level, crate::db::models::BASELINE_LEVEL);
    assert_eq!(alice.username_raw, "alice");
    assert_eq!(alice.points, 2);
    assert_eq!(alice.minutes_in_chat_online, 10);
    assert_eq!(alice.minutes_in_chat_offline, 0);
    assert!(!alice.subscriber);
}

#[tokio::test]
async fn test_merge_increments_existing_by_row_subscriber_flag() {
    let ledger = MemoryLedger::default();
    ledger.seed(subscriber("subbed", 50));
    ledger.seed(LedgerEntry::first_seen(&Username::from("regular"), 7, 0, 30));

    let active: ActiveSet = ["subbed", "regular"].into_iter().collect();
    let plan = AccrualPlan::new(&ChannelRates::new(None, Some(10), 0.5), false, 10);

    let summary = ledger.merge(&active, &plan).await.unwrap();
    assert_eq!(summary, MergeSummary { inserted: 0, updated: 2 });

    let subbed = ledger.get("subbed").unwrap();
    assert_eq!(subbed.points, 55);
    assert_eq!(subbed.minutes_in_chat_offline, 10);
    assert!(subbed.subscriber);

    // round(2 * 0.5) = 1
    let regular = ledger.get("regular").unwrap();
    assert_eq!(regular.points, 8);
    assert_eq!(regular.minutes_in_chat_offline, 40);
}

#[tokio::test]
async fn test_merge_failure_leaves_ledger_unchanged() {
    let ledger = MemoryLedger::failing_at(2);
    ledger.seed(LedgerEntry::first_seen(&Username::from("alice"), 10, 10, 0));
    let before = ledger.snapshot();

    let active: ActiveSet = ["alice", "bob", "carol"].into_iter().collect();
    let plan = AccrualPlan::new(&ChannelRates::default(), true, 10);

    assert!(ledger.merge(&active, &plan).await.is_err());
    assert_eq!(ledger.snapshot(), before);
}

#[tokio::test]
async fn test_new_subscriber_is_credited_at_regular_rate() {
    // there is no subscriber information for unseen chatters, so a subscriber's first sighting
    // is credited as a regular chatter and stored as non-subscriber
    let ledger = MemoryLedger::default();
    let active: ActiveSet = ["fresh_sub"].into_iter().collect();
    let plan = AccrualPlan::new(&ChannelRates::new(Some(2), Some(10), 0.0), true, 10);

    ledger.merge(&active, &plan).await.unwrap();

    let entry = ledger.get("fresh_sub").unwrap();
    assert_eq!(entry.points, 2);
    assert!(!entry.subscriber);
}
