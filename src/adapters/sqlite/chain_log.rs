//! SQLite implementation of the ChainLog.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChainKey, ChainMeta, NewSample, Readiness, Sample};
use crate::domain::ports::{ChainLog, SampleQuery};

const SAMPLE_COLUMNS: &str = "id, owner, task, replica, trial, state_json, category, for_prior, is_proposal, picked, gatekeeper, current_dim, readiness_json, created_at";

#[derive(Clone)]
pub struct SqliteChainLog {
    pool: SqlitePool,
}

impl SqliteChainLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn insert_sample(conn: &mut SqliteConnection, key: &ChainKey, sample: &NewSample) -> DomainResult<Sample> {
    let state_json = serde_json::to_string(&sample.state)?;
    let readiness_json = sample.readiness.as_ref().map(serde_json::to_string).transpose()?;
    let created_at = Utc::now();

    let result = sqlx::query(
        r#"INSERT INTO chain_samples (owner, task, replica, trial, state_json, category, for_prior, is_proposal, picked, gatekeeper, current_dim, readiness_json, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&key.owner)
    .bind(&key.task)
    .bind(i64::from(key.replica))
    .bind(i64::from(sample.trial))
    .bind(&state_json)
    .bind(&sample.category)
    .bind(sample.for_prior)
    .bind(sample.is_proposal)
    .bind(sample.picked)
    .bind(sample.gatekeeper)
    .bind(sample.current_dim.map(|d| d as i64))
    .bind(&readiness_json)
    .bind(created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(Sample {
        id: result.last_insert_rowid(),
        key: key.clone(),
        trial: sample.trial,
        state: sample.state.clone(),
        category: sample.category.clone(),
        for_prior: sample.for_prior,
        is_proposal: sample.is_proposal,
        picked: sample.picked,
        gatekeeper: sample.gatekeeper,
        current_dim: sample.current_dim,
        readiness: sample.readiness.clone(),
        created_at,
    })
}

async fn mark_picked(conn: &mut SqliteConnection, key: &ChainKey, id: i64) -> DomainResult<()> {
    let result = sqlx::query("UPDATE chain_samples SET picked = 1 WHERE id = ? AND owner = ? AND task = ? AND replica = ?")
        .bind(id)
        .bind(&key.owner)
        .bind(&key.task)
        .bind(i64::from(key.replica))
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::ChainNotFound(format!("sample {id} on {key}")));
    }
    Ok(())
}

#[async_trait]
impl ChainLog for SqliteChainLog {
    async fn latest(&self, key: &ChainKey) -> DomainResult<Option<Sample>> {
        let row: Option<SampleRow> = sqlx::query_as(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM chain_samples WHERE owner = ? AND task = ? AND replica = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(&key.owner)
        .bind(&key.task)
        .bind(i64::from(key.replica))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Sample::try_from).transpose()
    }

    async fn latest_pair(&self, key: &ChainKey) -> DomainResult<Option<(Sample, Sample)>> {
        let rows: Vec<SampleRow> = sqlx::query_as(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM chain_samples WHERE owner = ? AND task = ? AND replica = ? ORDER BY id DESC LIMIT 2"
        ))
        .bind(&key.owner)
        .bind(&key.task)
        .bind(i64::from(key.replica))
        .fetch_all(&self.pool)
        .await?;

        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(proposal), Some(current)) => Ok(Some((current.try_into()?, proposal.try_into()?))),
            _ => Ok(None),
        }
    }

    async fn append(&self, key: &ChainKey, sample: &NewSample) -> DomainResult<Sample> {
        let mut conn = self.pool.acquire().await?;
        insert_sample(&mut conn, key, sample).await
    }

    async fn commit(&self, key: &ChainKey, picked: Option<i64>, rows: &[NewSample]) -> DomainResult<Vec<Sample>> {
        let mut tx = self.pool.begin().await?;
        if let Some(id) = picked {
            mark_picked(&mut tx, key, id).await?;
        }
        let mut written = Vec::with_capacity(rows.len());
        for row in rows {
            written.push(insert_sample(&mut tx, key, row).await?);
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn samples(&self, key: &ChainKey, query: SampleQuery) -> DomainResult<Vec<Sample>> {
        let mut sql = format!("SELECT {SAMPLE_COLUMNS} FROM chain_samples WHERE owner = ? AND task = ? AND replica = ?");
        if query.picked_only {
            sql.push_str(" AND picked = 1");
        }
        if query.human_only {
            sql.push_str(" AND gatekeeper = 0");
        }
        sql.push_str(" ORDER BY id ASC");

        let rows: Vec<SampleRow> = sqlx::query_as(&sql)
            .bind(&key.owner)
            .bind(&key.task)
            .bind(i64::from(key.replica))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Sample::try_from).collect()
    }

    async fn completed_trials(&self, owner: &str, task: &str) -> DomainResult<u32> {
        let (total,): (i64,) = sqlx::query_as(
            r#"SELECT COALESCE(SUM(max_trial), 0) FROM (
                   SELECT MAX(trial) AS max_trial FROM chain_samples
                   WHERE owner = ? AND task = ? GROUP BY replica
               )"#,
        )
        .bind(owner)
        .bind(task)
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(total).map_err(|_| DomainError::SerializationError(format!("trial count out of range: {total}")))
    }

    async fn replicas(&self, owner: &str, task: &str) -> DomainResult<Vec<u32>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT replica FROM chain_samples WHERE owner = ? AND task = ? ORDER BY replica",
        )
        .bind(owner)
        .bind(task)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(replica,)| replica as u32).collect())
    }

    async fn create_meta(&self, key: &ChainKey, turn_order: &[String]) -> DomainResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO chain_meta (owner, task, replica, turn_order_json, finished, created_at) VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&key.owner)
        .bind(&key.task)
        .bind(i64::from(key.replica))
        .bind(serde_json::to_string(turn_order)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn meta(&self, key: &ChainKey) -> DomainResult<Option<ChainMeta>> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT turn_order_json, finished FROM chain_meta WHERE owner = ? AND task = ? AND replica = ?",
        )
        .bind(&key.owner)
        .bind(&key.task)
        .bind(i64::from(key.replica))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(turn_order_json, finished)| {
            Ok(ChainMeta {
                turn_order: serde_json::from_str(&turn_order_json)?,
                finished,
            })
        })
        .transpose()
    }

    async fn seed(&self, key: &ChainKey, rows: &[NewSample]) -> DomainResult<Option<Vec<Sample>>> {
        let mut tx = self.pool.begin().await?;
        // The claim is the transaction's first statement, so it takes the write lock
        let claimed = sqlx::query(
            "UPDATE chain_meta SET seeded = 1 WHERE owner = ? AND task = ? AND replica = ? AND seeded = 0",
        )
        .bind(&key.owner)
        .bind(&key.task)
        .bind(i64::from(key.replica))
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let mut written = Vec::with_capacity(rows.len());
        for row in rows {
            written.push(insert_sample(&mut tx, key, row).await?);
        }
        tx.commit().await?;
        Ok(Some(written))
    }

    async fn finish(&self, key: &ChainKey, picked: Option<i64>) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(id) = picked {
            mark_picked(&mut tx, key, id).await?;
        }
        let result = sqlx::query("UPDATE chain_meta SET finished = 1 WHERE owner = ? AND task = ? AND replica = ?")
            .bind(&key.owner)
            .bind(&key.task)
            .bind(i64::from(key.replica))
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ChainNotFound(key.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    id: i64,
    owner: String,
    task: String,
    replica: i64,
    trial: i64,
    state_json: String,
    category: Option<String>,
    for_prior: bool,
    is_proposal: bool,
    picked: bool,
    gatekeeper: bool,
    current_dim: Option<i64>,
    readiness_json: Option<String>,
    created_at: String,
}

impl TryFrom<SampleRow> for Sample {
    type Error = DomainError;

    fn try_from(row: SampleRow) -> Result<Self, Self::Error> {
        let readiness: Option<Readiness> = row
            .readiness_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Sample {
            id: row.id,
            key: ChainKey::new(row.owner, row.task, row.replica as u32),
            trial: row.trial as u32,
            state: serde_json::from_str(&row.state_json)?,
            category: row.category,
            for_prior: row.for_prior,
            is_proposal: row.is_proposal,
            picked: row.picked,
            gatekeeper: row.gatekeeper,
            current_dim: row.current_dim.map(|d| d as usize),
            readiness,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
