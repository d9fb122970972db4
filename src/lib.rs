//! Batch reconciler crediting chat presence to per-channel points ledgers.
//!
//! Each run reads every configured channel's live flag and chatter list, merges the accrued
//! points and minutes into that channel's Postgres ledger in one transaction, and records
//! last-seen timestamps in redis.

pub mod accrual;
pub mod db;
pub mod runner;
pub mod util;
