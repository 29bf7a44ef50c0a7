//! Probe Record Database Layer
//!
//! PostgreSQL persistence for probe records. State changes use atomic CAS
//! updates (`WHERE id = $n AND state = $expected`), so a record observed as
//! terminal is never written again.

use super::record::{NewProbe, ProbeRecord, ProbeUpdate, cycle_minute};
use super::state::ProbeState;
use super::store::{ProbeStore, StoreError, check_transition};
use crate::core_types::ProbeId;
use crate::network::NetworkGroup;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS probe_records (
        id            BIGSERIAL PRIMARY KEY,
        network_group TEXT        NOT NULL,
        endpoint_url  TEXT        NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL,
        tx_hash       TEXT,
        state         SMALLINT    NOT NULL,
        diagnostic    TEXT,
        submitted_at  TIMESTAMPTZ,
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (endpoint_url, created_at)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_probe_records_state_created ON probe_records (state, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_probe_records_created ON probe_records (created_at)",
];

const COLUMNS: &str = "id, network_group, endpoint_url, created_at, tx_hash, state, diagnostic, submitted_at, updated_at";

pub struct PgProbeStore {
    pool: PgPool,
}

impl PgProbeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Create the table and indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<ProbeRecord, StoreError> {
        let id: ProbeId = row.try_get("id")?;

        let group_name: String = row.try_get("network_group")?;
        let group: NetworkGroup = group_name
            .parse()
            .map_err(|reason| StoreError::Corrupt { id, reason })?;

        let state_id: i16 = row.try_get("state")?;
        let state = ProbeState::from_id(state_id).ok_or_else(|| StoreError::Corrupt {
            id,
            reason: format!("Invalid state ID: {}", state_id),
        })?;

        Ok(ProbeRecord {
            id,
            group,
            endpoint_url: row.try_get("endpoint_url")?,
            created_at: row.try_get("created_at")?,
            tx_hash: row.try_get("tx_hash")?,
            state,
            diagnostic: row.try_get("diagnostic")?,
            submitted_at: row.try_get("submitted_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn rows_to_records(rows: &[PgRow]) -> Result<Vec<ProbeRecord>, StoreError> {
        rows.iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl ProbeStore for PgProbeStore {
    async fn create(&self, probe: &NewProbe) -> Result<ProbeRecord, StoreError> {
        let created_at = cycle_minute(probe.created_at);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO probe_records (network_group, endpoint_url, created_at, state, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (endpoint_url, created_at) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(probe.group.as_str())
        .bind(&probe.endpoint_url)
        .bind(created_at)
        .bind(ProbeState::Temp.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_record(&row),
            None => Err(StoreError::Duplicate {
                endpoint_url: probe.endpoint_url.clone(),
                created_at,
            }),
        }
    }

    async fn find_by_key(
        &self,
        endpoint_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ProbeRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM probe_records WHERE endpoint_url = $1 AND created_at = $2"
        ))
        .bind(endpoint_url)
        .bind(cycle_minute(created_at))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_outstanding(&self, limit: usize) -> Result<Vec<ProbeRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM probe_records
            WHERE state = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(ProbeState::Pending.id())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_records(&rows)
    }

    async fn find_stale_temp(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProbeRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM probe_records
            WHERE state = $1 AND created_at < $2
            ORDER BY created_at, id
            LIMIT $3
            "#
        ))
        .bind(ProbeState::Temp.id())
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_records(&rows)
    }

    async fn update(
        &self,
        id: ProbeId,
        expected: ProbeState,
        update: &ProbeUpdate,
    ) -> Result<bool, StoreError> {
        check_transition(expected, update.state)?;

        let result = sqlx::query(
            r#"
            UPDATE probe_records
            SET state = $1,
                tx_hash = COALESCE($2, tx_hash),
                diagnostic = $3,
                submitted_at = COALESCE($4, submitted_at),
                updated_at = NOW()
            WHERE id = $5 AND state = $6
            "#,
        )
        .bind(update.state.id())
        .bind(&update.tx_hash)
        .bind(&update.diagnostic)
        .bind(update.submitted_at)
        .bind(id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<NetworkGroup>,
    ) -> Result<Vec<ProbeRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM probe_records
            WHERE created_at >= $1 AND created_at < $2
              AND ($3::TEXT IS NULL OR network_group = $3)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(start)
        .bind(end)
        .bind(group.map(|g| g.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_records(&rows)
    }
}
