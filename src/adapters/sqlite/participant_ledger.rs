//! SQLite implementation of the ParticipantLedger.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TeamAssignment;
use crate::domain::ports::ParticipantLedger;

#[derive(Clone)]
pub struct SqliteParticipantLedger {
    pool: SqlitePool,
}

impl SqliteParticipantLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn insert_participant(conn: &mut SqliteConnection, participant: &str) -> DomainResult<()> {
    sqlx::query("INSERT OR IGNORE INTO participants (participant, created_at) VALUES (?, ?)")
        .bind(participant)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn members_of(conn: &mut SqliteConnection, team_id: u32) -> DomainResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT participant FROM participants WHERE team_id = ? ORDER BY id")
        .bind(i64::from(team_id))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|(participant,)| participant).collect())
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[async_trait]
impl ParticipantLedger for SqliteParticipantLedger {
    async fn register(&self, participant: &str) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_participant(&mut conn, participant).await
    }

    async fn increment_success(&self, participant: &str, category: &str) -> DomainResult<u32> {
        let (count,): (i64,) = sqlx::query_as(
            r#"INSERT INTO category_successes (participant, category, successes) VALUES (?, ?, 1)
               ON CONFLICT (participant, category) DO UPDATE SET successes = successes + 1
               RETURNING successes"#,
        )
        .bind(participant)
        .bind(category)
        .fetch_one(&self.pool)
        .await?;
        Ok(to_count(count))
    }

    async fn success_count(&self, participant: &str, category: &str) -> DomainResult<u32> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT successes FROM category_successes WHERE participant = ? AND category = ?")
                .bind(participant)
                .bind(category)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(0, |(count,)| to_count(count)))
    }

    async fn record_attention_failure(&self, participant: &str) -> DomainResult<u32> {
        let mut tx = self.pool.begin().await?;
        insert_participant(&mut tx, participant).await?;
        let (failures,): (i64,) = sqlx::query_as(
            r#"UPDATE participants SET attention_check_failures = attention_check_failures + 1
               WHERE participant = ? RETURNING attention_check_failures"#,
        )
        .bind(participant)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(to_count(failures))
    }

    async fn attention_failures(&self, participant: &str) -> DomainResult<u32> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT attention_check_failures FROM participants WHERE participant = ?")
                .bind(participant)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(0, |(failures,)| to_count(failures)))
    }

    async fn assign_team(&self, participant: &str, team_size: u32) -> DomainResult<TeamAssignment> {
        if team_size == 0 {
            return Err(DomainError::ValidationFailed("team_size must be at least 1".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        insert_participant(&mut tx, participant).await?;

        let (existing,): (Option<i64>,) = sqlx::query_as("SELECT team_id FROM participants WHERE participant = ?")
            .bind(participant)
            .fetch_one(&mut *tx)
            .await?;

        let team_id = match existing {
            Some(team_id) => team_id as u32,
            None => {
                let (assigned,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM participants WHERE team_id IS NOT NULL")
                        .fetch_one(&mut *tx)
                        .await?;
                let team_id = to_count(assigned) / team_size + 1;
                sqlx::query("UPDATE participants SET team_id = ? WHERE participant = ?")
                    .bind(i64::from(team_id))
                    .bind(participant)
                    .execute(&mut *tx)
                    .await?;
                team_id
            }
        };

        let members = members_of(&mut tx, team_id).await?;
        tx.commit().await?;

        Ok(TeamAssignment {
            participant: participant.to_string(),
            team_id,
            members,
            team_size,
        })
    }

    async fn team_members(&self, team_id: u32) -> DomainResult<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        members_of(&mut conn, team_id).await
    }
}
