use async_trait::async_trait;
use chrono::Utc;
use common::{SagaId, UserId, Version};
use domain::{FriendRequest, Friendship, RequestStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::dead_letter::{DeadLetterEvent, DeadLetterId, NewDeadLetterEvent};
use crate::outbox::{NewOutboxEvent, OutboxEvent, OutboxEventId};
use crate::store::{InsertOutcome, SocialStore, StagingSession};
use crate::{Result, StorageError};

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresSocialStore {
    pool: PgPool,
}

impl PostgresSocialStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_request(row: PgRow) -> Result<FriendRequest> {
        let status_str: String = row.try_get("status")?;
        let status = RequestStatus::parse(&status_str).ok_or_else(|| {
            StorageError::Serialization(serde_json::Error::io(std::io::Error::other(format!(
                "unknown request status: {status_str}"
            ))))
        })?;

        Ok(FriendRequest::from_parts(
            UserId::from_uuid(row.try_get::<Uuid, _>("requester_id")?),
            UserId::from_uuid(row.try_get::<Uuid, _>("receiver_id")?),
            status,
            row.try_get("responded_at")?,
            Version::new(row.try_get("version")?),
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
        ))
    }

    fn row_to_friendship(row: PgRow) -> Result<Friendship> {
        Ok(Friendship {
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            friend_id: UserId::from_uuid(row.try_get::<Uuid, _>("friend_id")?),
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_outbox_event(row: PgRow) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            id: OutboxEventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            idempotency_key: row.try_get("idempotency_key")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_dead_letter(row: PgRow) -> Result<DeadLetterEvent> {
        Ok(DeadLetterEvent {
            id: DeadLetterId::from_uuid(row.try_get::<Uuid, _>("id")?),
            original_event_id: row
                .try_get::<Option<Uuid>, _>("original_event_id")?
                .map(OutboxEventId::from_uuid),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            saga_state: row.try_get("saga_state")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            failure_reason: row.try_get("failure_reason")?,
            failure_count: row.try_get("failure_count")?,
            last_failure_at: row.try_get("last_failure_at")?,
            created_at: row.try_get("created_at")?,
            resolved: row.try_get("resolved")?,
            resolved_at: row.try_get("resolved_at")?,
            resolved_by: row.try_get("resolved_by")?,
            resolution_note: row.try_get("resolution_note")?,
        })
    }
}

const SELECT_OUTBOX: &str = "SELECT id, saga_id, idempotency_key, event_type, payload, processed, \
     processed_at, retry_count, last_error, created_at, updated_at FROM outbox_events";

const SELECT_DEAD_LETTER: &str = "SELECT id, original_event_id, saga_id, saga_state, event_type, \
     payload, failure_reason, failure_count, last_failure_at, created_at, resolved, resolved_at, \
     resolved_by, resolution_note FROM dead_letter_events";

#[async_trait]
impl SocialStore for PostgresSocialStore {
    async fn insert_request(&self, request: &FriendRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO friend_requests
                (requester_id, receiver_id, status, responded_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(request.requester_id().as_uuid())
        .bind(request.receiver_id().as_uuid())
        .bind(request.status().as_str())
        .bind(request.responded_at())
        .bind(request.version().as_i64())
        .bind(request.created_at())
        .bind(request.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StorageError::AlreadyExists;
            }
            StorageError::Database(e)
        })?;

        Ok(())
    }

    async fn find_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<FriendRequest>> {
        let row = sqlx::query(
            r#"
            SELECT requester_id, receiver_id, status, responded_at, version, created_at, updated_at
            FROM friend_requests
            WHERE requester_id = $1 AND receiver_id = $2
            "#,
        )
        .bind(requester_id.as_uuid())
        .bind(receiver_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_request).transpose()
    }

    async fn find_pending_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<FriendRequest>> {
        let row = sqlx::query(
            r#"
            SELECT requester_id, receiver_id, status, responded_at, version, created_at, updated_at
            FROM friend_requests
            WHERE requester_id = $1 AND receiver_id = $2 AND status = 'pending'
            "#,
        )
        .bind(requester_id.as_uuid())
        .bind(receiver_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_request).transpose()
    }

    async fn update_request(
        &self,
        request: &FriendRequest,
        expected_version: Version,
    ) -> Result<Version> {
        let new_version = expected_version.next();

        let result = sqlx::query(
            r#"
            UPDATE friend_requests
            SET status = $3, responded_at = $4, version = $5, updated_at = $6
            WHERE requester_id = $1 AND receiver_id = $2 AND version = $7
            "#,
        )
        .bind(request.requester_id().as_uuid())
        .bind(request.receiver_id().as_uuid())
        .bind(request.status().as_str())
        .bind(request.responded_at())
        .bind(new_version.as_i64())
        .bind(Utc::now())
        .bind(expected_version.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Stale version or vanished row; read back to classify.
            let actual: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM friend_requests WHERE requester_id = $1 AND receiver_id = $2",
            )
            .bind(request.requester_id().as_uuid())
            .bind(request.receiver_id().as_uuid())
            .fetch_optional(&self.pool)
            .await?;

            return match actual {
                None => Err(StorageError::NotFound),
                Some(version) => Err(StorageError::ConcurrencyConflict {
                    expected: expected_version,
                    actual: Version::new(version),
                }),
            };
        }

        Ok(new_version)
    }

    async fn friendship_exists(&self, user_id: UserId, friend_id: UserId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM friendships WHERE user_id = $1 AND friend_id = $2",
        )
        .bind(user_id.as_uuid())
        .bind(friend_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn friendships_for(&self, user_id: UserId) -> Result<Vec<Friendship>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, friend_id, created_at
            FROM friendships
            WHERE user_id = $1
            ORDER BY created_at ASC, friend_id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_friendship).collect()
    }

    async fn delete_friendship(&self, user_id: UserId, friend_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM friendships WHERE user_id = $1 AND friend_id = $2")
            .bind(user_id.as_uuid())
            .bind(friend_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin_staging(&self) -> Result<Box<dyn StagingSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStagingSession { tx }))
    }

    async fn outbox_event_exists(&self, idempotency_key: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE idempotency_key = $1")
                .bind(idempotency_key)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    async fn outbox_events_for_saga(&self, saga_id: SagaId) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_OUTBOX} WHERE saga_id = $1 ORDER BY created_at ASC"
        ))
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox_event).collect()
    }

    async fn unprocessed_events(&self, limit: u32) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_OUTBOX} WHERE processed = FALSE ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox_event).collect()
    }

    async fn mark_processed(&self, id: OutboxEventId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = TRUE, processed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn record_relay_failure(&self, id: OutboxEventId, error: &str) -> Result<OutboxEvent> {
        let row = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, last_error = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, saga_id, idempotency_key, event_type, payload, processed,
                      processed_at, retry_count, last_error, created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;

        Self::row_to_outbox_event(row)
    }

    async fn remove_outbox_event(&self, id: OutboxEventId) -> Result<()> {
        sqlx::query("DELETE FROM outbox_events WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_unprocessed_for_saga(&self, saga_id: SagaId) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM outbox_events WHERE saga_id = $1 AND processed = FALSE")
                .bind(saga_id.as_uuid())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn insert_dead_letter(&self, dead_letter: NewDeadLetterEvent) -> Result<DeadLetterEvent> {
        let event = dead_letter.into_event();

        sqlx::query(
            r#"
            INSERT INTO dead_letter_events
                (id, original_event_id, saga_id, saga_state, event_type, payload,
                 failure_reason, failure_count, last_failure_at, created_at, resolved)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.original_event_id.map(|id| id.as_uuid()))
        .bind(event.saga_id.as_uuid())
        .bind(&event.saga_state)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.failure_reason)
        .bind(event.failure_count)
        .bind(event.last_failure_at)
        .bind(event.created_at)
        .bind(event.resolved)
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    async fn unresolved_dead_letters(&self) -> Result<Vec<DeadLetterEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DEAD_LETTER} WHERE resolved = FALSE ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dead_letter).collect()
    }

    async fn resolve_dead_letter(
        &self,
        id: DeadLetterId,
        resolved_by: &str,
        note: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_events
            SET resolved = TRUE, resolved_at = now(), resolved_by = $2, resolution_note = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(resolved_by)
        .bind(note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

/// Staging session backed by a real database transaction.
///
/// Conflict-tolerant inserts use `ON CONFLICT DO NOTHING`, so a concurrent
/// writer landing the same natural or idempotency key first is reported as
/// [`InsertOutcome::AlreadyExists`] rather than an error.
struct PgStagingSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StagingSession for PgStagingSession {
    async fn insert_friendship(&mut self, friendship: &Friendship) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO friendships (user_id, friend_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, friend_id) DO NOTHING
            "#,
        )
        .bind(friendship.user_id.as_uuid())
        .bind(friendship.friend_id.as_uuid())
        .bind(friendship.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn insert_outbox_event(&mut self, event: NewOutboxEvent) -> Result<InsertOutcome> {
        let event = event.into_event();

        let result = sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, saga_id, idempotency_key, event_type, payload, processed,
                 retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.saga_id.as_uuid())
        .bind(&event.idempotency_key)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.processed)
        .bind(event.retry_count)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
