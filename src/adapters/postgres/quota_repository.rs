//! PostgreSQL implementation of QuotaStore.
//!
//! The active record for a tenant is locked with `SELECT ... FOR UPDATE`
//! before it is compared against the ceiling and incremented, so concurrent
//! reservations from any number of processes serialize on the row. A partial
//! unique index guarantees at most one active record per tenant.

use crate::domain::foundation::{QuotaRecordId, TenantId, Timestamp};
use crate::domain::quota::{BillingPeriod, QuotaPolicy, QuotaRecord, SubscriptionTier};
use crate::ports::{QuotaStore, QuotaStoreError, Reservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// PostgreSQL implementation of the QuotaStore port.
pub struct PostgresQuotaStore {
    pool: PgPool,
}

impl PostgresQuotaStore {
    /// Creates a new PostgresQuotaStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a quota record.
#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    id: Uuid,
    tenant_id: String,
    tier: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    requests_used: i32,
    created_at: DateTime<Utc>,
    superseded_at: Option<DateTime<Utc>>,
}

impl TryFrom<QuotaRow> for QuotaRecord {
    type Error = QuotaStoreError;

    fn try_from(row: QuotaRow) -> Result<Self, Self::Error> {
        let tenant_id = TenantId::new(row.tenant_id)
            .map_err(|e| QuotaStoreError::Corrupt(format!("invalid tenant_id: {}", e)))?;
        let tier: SubscriptionTier = row
            .tier
            .parse()
            .map_err(|e| QuotaStoreError::Corrupt(format!("invalid tier: {}", e)))?;
        let period = BillingPeriod::new(
            Timestamp::from_datetime(row.period_start),
            Timestamp::from_datetime(row.period_end),
        )
        .map_err(|e| QuotaStoreError::Corrupt(format!("invalid period: {}", e)))?;
        let requests_used = u32::try_from(row.requests_used).map_err(|_| {
            QuotaStoreError::Corrupt(format!("negative requests_used: {}", row.requests_used))
        })?;

        Ok(QuotaRecord {
            id: QuotaRecordId::from_uuid(row.id),
            tenant_id,
            tier,
            period,
            requests_used,
            created_at: Timestamp::from_datetime(row.created_at),
            superseded_at: row.superseded_at.map(Timestamp::from_datetime),
        })
    }
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> QuotaStoreError + '_ {
    move |e| QuotaStoreError::Unavailable(format!("{}: {}", context, e))
}

const SELECT_COLUMNS: &str = "id, tenant_id, tier, period_start, period_end, requests_used, created_at, superseded_at";

async fn lock_active(
    tx: &mut Transaction<'_, Postgres>,
    tenant: &TenantId,
) -> Result<Option<QuotaRecord>, QuotaStoreError> {
    let row: Option<QuotaRow> = sqlx::query_as(&format!(
        "SELECT {} FROM quota_records WHERE tenant_id = $1 AND superseded_at IS NULL FOR UPDATE",
        SELECT_COLUMNS
    ))
    .bind(tenant.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_error("Failed to lock quota record"))?;

    row.map(QuotaRecord::try_from).transpose()
}

async fn supersede_and_insert(
    tx: &mut Transaction<'_, Postgres>,
    record: &QuotaRecord,
) -> Result<(), QuotaStoreError> {
    sqlx::query(
        r#"
        UPDATE quota_records SET superseded_at = $2
        WHERE tenant_id = $1 AND superseded_at IS NULL
        "#,
    )
    .bind(record.tenant_id.as_str())
    .bind(record.created_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to supersede quota record"))?;

    sqlx::query(
        r#"
        INSERT INTO quota_records (
            id, tenant_id, tier, period_start, period_end, requests_used, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.tenant_id.as_str())
    .bind(record.tier.as_str())
    .bind(record.period.start.as_datetime())
    .bind(record.period.end.as_datetime())
    .bind(record.requests_used as i32)
    .bind(record.created_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.constraint() == Some("quota_records_one_active") {
                return QuotaStoreError::Unavailable(
                    "concurrent activation for tenant, retry".to_string(),
                );
            }
        }
        QuotaStoreError::Unavailable(format!("Failed to insert quota record: {}", e))
    })?;

    Ok(())
}

#[async_trait]
impl QuotaStore for PostgresQuotaStore {
    async fn reserve(
        &self,
        tenant: &TenantId,
        policy: &QuotaPolicy,
        now: Timestamp,
    ) -> Result<Reservation, QuotaStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to start transaction"))?;

        let Some(mut active) = lock_active(&mut tx, tenant).await? else {
            return Ok(Reservation::NoActiveRecord);
        };

        if active.period.has_ended(now) {
            return Ok(Reservation::PeriodEnded(active));
        }
        if active.requests_used >= policy.limit_for(active.tier) {
            return Ok(Reservation::Exhausted(active));
        }

        let used: i32 = sqlx::query_scalar(
            r#"
            UPDATE quota_records SET requests_used = requests_used + 1
            WHERE id = $1
            RETURNING requests_used
            "#,
        )
        .bind(active.id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to increment quota"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        active.requests_used = used.max(0) as u32;
        Ok(Reservation::Reserved(active))
    }

    async fn active(&self, tenant: &TenantId) -> Result<Option<QuotaRecord>, QuotaStoreError> {
        let row: Option<QuotaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quota_records WHERE tenant_id = $1 AND superseded_at IS NULL",
            SELECT_COLUMNS
        ))
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find quota record"))?;

        row.map(QuotaRecord::try_from).transpose()
    }

    async fn activate(
        &self,
        tenant: &TenantId,
        tier: SubscriptionTier,
        period: BillingPeriod,
    ) -> Result<QuotaRecord, QuotaStoreError> {
        let record = QuotaRecord::new(tenant.clone(), tier, period);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to start transaction"))?;
        lock_active(&mut tx, tenant).await?;
        supersede_and_insert(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        Ok(record)
    }

    async fn renew(
        &self,
        previous: &QuotaRecord,
        period: BillingPeriod,
    ) -> Result<QuotaRecord, QuotaStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to start transaction"))?;

        if let Some(current) = lock_active(&mut tx, &previous.tenant_id).await? {
            if current.id != previous.id {
                return Ok(current);
            }
        }

        let record = QuotaRecord::new(previous.tenant_id.clone(), previous.tier, period);
        supersede_and_insert(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        Ok(record)
    }

    async fn history(&self, tenant: &TenantId) -> Result<Vec<QuotaRecord>, QuotaStoreError> {
        let rows: Vec<QuotaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quota_records WHERE tenant_id = $1 ORDER BY period_start DESC, created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list quota records"))?;

        rows.into_iter().map(QuotaRecord::try_from).collect()
    }
}

impl std::fmt::Debug for PostgresQuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQuotaStore").finish_non_exhaustive()
    }
}
