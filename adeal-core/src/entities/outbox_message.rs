use crate::framework::DatabaseProcessor;
use adeal_sdk::objects::OutboxEnvelope;
use kanau::processor::Processor;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Gave up after the configured number of attempts.
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<PrimitiveDateTime>,
    pub processing_started_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
    pub processed_at: Option<PrimitiveDateTime>,
}

impl OutboxMessage {
    pub fn envelope(&self) -> Result<OutboxEnvelope, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Data for enqueueing a message inside the caller's transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxMessage {
    pub id: Uuid,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub created_at: PrimitiveDateTime,
}

impl NewOutboxMessage {
    pub fn from_envelope(
        envelope: &OutboxEnvelope,
        created_at: PrimitiveDateTime,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            message_type: envelope.notification.event_type().to_string(),
            payload: serde_json::to_value(envelope)?,
            created_at,
        })
    }
}

#[derive(Debug, Clone)]
/// Claim a batch of deliverable messages by flipping them to `processing`.
///
/// Picks `pending` rows, `failed` rows whose retry time has come, and
/// `processing` rows whose claim is older than `stale_before` (the worker
/// that claimed them died before recording an outcome).
pub struct ClaimOutboxBatch {
    pub now: PrimitiveDateTime,
    pub stale_before: PrimitiveDateTime,
    pub limit: i64,
}

impl Processor<ClaimOutboxBatch> for DatabaseProcessor {
    type Output = Vec<OutboxMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimOutboxBatch")]
    async fn process(&self, query: ClaimOutboxBatch) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let mut messages = sqlx::query_as::<_, OutboxMessage>(
            r#"
            WITH due AS (
                SELECT id
                FROM outbox_messages
                WHERE status = 'pending'
                   OR (status = 'failed' AND next_retry_at <= $1)
                   OR (status = 'processing' AND processing_started_at <= $2)
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_messages o
            SET status = 'processing', processing_started_at = $1
            FROM due
            WHERE o.id = due.id
            RETURNING o.*
            "#,
        )
        .bind(query.now)
        .bind(query.stale_before)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[derive(Debug, Clone)]
pub struct MarkOutboxCompleted {
    pub id: Uuid,
    pub at: PrimitiveDateTime,
}

impl Processor<MarkOutboxCompleted> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkOutboxCompleted")]
    async fn process(&self, cmd: MarkOutboxCompleted) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'completed', processed_at = $2, processing_started_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(cmd.id)
        .bind(cmd.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Record a failed delivery attempt.
///
/// `next_retry_at = None` dead-letters the message.
pub struct MarkOutboxFailed {
    pub id: Uuid,
    pub retry_count: i32,
    pub error: String,
    pub next_retry_at: Option<PrimitiveDateTime>,
}

impl Processor<MarkOutboxFailed> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkOutboxFailed")]
    async fn process(&self, cmd: MarkOutboxFailed) -> Result<(), sqlx::Error> {
        let status = if cmd.next_retry_at.is_some() {
            OutboxStatus::Failed
        } else {
            OutboxStatus::DeadLettered
        };
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $2,
                retry_count = $3,
                last_error = $4,
                next_retry_at = $5,
                processing_started_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(cmd.id)
        .bind(status)
        .bind(cmd.retry_count)
        .bind(&cmd.error)
        .bind(cmd.next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl OutboxMessage {
    pub async fn enqueue_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        message: &NewOutboxMessage,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, message_type, payload, status, retry_count, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4)
            "#,
        )
        .bind(message.id)
        .bind(&message.message_type)
        .bind(&message.payload)
        .bind(message.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
