use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::accrual::AccrualPlan;
use crate::db::models::{ActiveSet, BASELINE_LEVEL, LedgerEntry, MergeSummary, Username};
use crate::db::{Ledger, LedgerConnector, LedgerError, LedgerResult};
use crate::util::config::ChannelConfig;

/// Opens one small pool per channel DSN; ledgers never share connections across channels.
#[derive(Debug, Clone)]
pub struct PgConnector {
    pub max_connections: u32,
    pub init_schema: bool,
}

impl Default for PgConnector {
    fn default() -> Self {
        Self {
            max_connections: 2,
            init_schema: false,
        }
    }
}

#[async_trait]
impl LedgerConnector for PgConnector {
    #[instrument(skip(self, channel), fields(channel = %channel.streamer))]
    async fn connect(&self, channel: &ChannelConfig) -> LedgerResult<Box<dyn Ledger>> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&channel.dsn)
            .await
            .map_err(|e| LedgerError::Connect(e.to_string()))?;

        let ledger = PgLedger::new(pool);
        if self.init_schema {
            ledger.ensure_schema().await?;
        }

        Ok(Box::new(ledger))
    }
}

#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tb_user (
                id BIGSERIAL PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                username_raw TEXT NOT NULL,
                level INTEGER NOT NULL DEFAULT 100,
                points BIGINT NOT NULL DEFAULT 0,
                subscriber BOOLEAN NOT NULL DEFAULT FALSE,
                minutes_in_chat_online BIGINT NOT NULL DEFAULT 0,
                minutes_in_chat_offline BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_by_username(&self, username: &Username) -> LedgerResult<Option<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT
                username,
                username_raw,
                level,
                points,
                subscriber,
                minutes_in_chat_online,
                minutes_in_chat_offline
            FROM tb_user
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl Ledger for PgLedger {
    #[instrument(skip(self, active, plan), fields(users = active.len(), online = plan.online))]
    async fn merge(&self, active: &ActiveSet, plan: &AccrualPlan) -> LedgerResult<MergeSummary> {
        if active.is_empty() {
            tracing::debug!("no chatters to merge");
            return Ok(MergeSummary::default());
        }

        let logins = active.logins();
        let summary = Tx::with_tx(&self.pool, |mut tx| async move {
            let result: SqlxResult<MergeSummary> = async {
                tx.stage_chatters(&logins).await?;
                tx.upsert_staged(plan).await
            }
            .await;

            (tx, result)
        })
        .await?;

        tracing::debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            "ledger merge committed"
        );

        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct Tx {
    inner: Option<Transaction<'static, Postgres>>,
}

impl Tx {
    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    #[instrument(skip(pool, f))]
    pub async fn with_tx<F, Fut, T>(pool: &PgPool, f: F) -> LedgerResult<T>
    where
        F: FnOnce(Tx) -> Fut,
        Fut: Future<Output = (Tx, SqlxResult<T>)>,
    {
        let tx = Self::begin(pool).await?;
        let (mut tx, result) = f(tx).await;

        match result {
            Ok(val) => {
                tx.commit().await?;
                Ok(val)
            }
            Err(e) => {
                tracing::warn!(error = ?e, "transacted query failure, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = ?rollback_err, "rollback failed");
                }
                Err(e.into())
            }
        }
    }

    #[instrument(skip(pool))]
    pub async fn begin(pool: &PgPool) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> LedgerResult<()> {
        match self.inner.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(LedgerError::TxCompleted),
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> LedgerResult<()> {
        match self.inner.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Err(LedgerError::TxCompleted),
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'static, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }

    /// Loads the active set into a scratch table that is dropped with the transaction.
    #[instrument(skip(self, logins), fields(count = logins.len()))]
    pub async fn stage_chatters(&mut self, logins: &[String]) -> SqlxResult<()> {
        sqlx::query(
            r#"
            CREATE TEMPORARY TABLE chatters_staging (
                username TEXT PRIMARY KEY
            ) ON COMMIT DROP
            "#,
        )
        .execute(&mut **self.inner_mut()?)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chatters_staging (username)
            SELECT DISTINCT login FROM UNNEST($1::text[]) AS login
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(logins)
        .execute(&mut **self.inner_mut()?)
        .await?;

        Ok(())
    }

    /// Inserts unseen chatters at the regular rate and increments existing rows using each
    /// row's own subscriber flag.
    #[instrument(skip(self, plan))]
    pub async fn upsert_staged(&mut self, plan: &AccrualPlan) -> SqlxResult<MergeSummary> {
        let fresh = plan.for_new();
        let inserted_flags = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO tb_user (
                username,
                username_raw,
                level,
                points,
                subscriber,
                minutes_in_chat_online,
                minutes_in_chat_offline
            )
            SELECT username, username, $1, $2, false, $4, $5
            FROM chatters_staging
            ORDER BY username
            ON CONFLICT (username)
            DO UPDATE SET
                points = tb_user.points
                    + CASE WHEN tb_user.subscriber THEN $3 ELSE $2 END,
                minutes_in_chat_online = tb_user.minutes_in_chat_online + $4,
                minutes_in_chat_offline = tb_user.minutes_in_chat_offline + $5
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(BASELINE_LEVEL)
        .bind(fresh.points)
        .bind(plan.for_existing(true).points)
        .bind(fresh.minutes_online)
        .bind(fresh.minutes_offline)
        .fetch_all(&mut **self.inner_mut()?)
        .await?;

        let inserted = inserted_flags.iter().filter(|i| **i).count() as u64;
        Ok(MergeSummary {
            inserted,
            updated: inserted_flags.len() as u64 - inserted,
        })
    }
}
