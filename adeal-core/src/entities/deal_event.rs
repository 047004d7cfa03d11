use crate::entities::deal::DealStatus;
use crate::framework::DatabaseProcessor;
use adeal_sdk::objects::DealEventKind as SdkDealEventKind;
use kanau::processor::Processor;
use time::PrimitiveDateTime;
use uuid::Uuid;

/// Business occurrence recorded in the deal audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "deal_event_kind", rename_all = "snake_case")]
pub enum DealEventKind {
    ProposalAccepted,
    ProposalRejected,
    PaymentRequested,
    PaymentConfirmed,
    CreativeSubmitted,
    CreativeApproved,
    CreativeRejected,
    Posted,
    Verified,
    Released,
    Refunded,
    Cancelled,
    Expired,
}

impl From<DealEventKind> for SdkDealEventKind {
    fn from(value: DealEventKind) -> Self {
        match value {
            DealEventKind::ProposalAccepted => SdkDealEventKind::ProposalAccepted,
            DealEventKind::ProposalRejected => SdkDealEventKind::ProposalRejected,
            DealEventKind::PaymentRequested => SdkDealEventKind::PaymentRequested,
            DealEventKind::PaymentConfirmed => SdkDealEventKind::PaymentConfirmed,
            DealEventKind::CreativeSubmitted => SdkDealEventKind::CreativeSubmitted,
            DealEventKind::CreativeApproved => SdkDealEventKind::CreativeApproved,
            DealEventKind::CreativeRejected => SdkDealEventKind::CreativeRejected,
            DealEventKind::Posted => SdkDealEventKind::Posted,
            DealEventKind::Verified => SdkDealEventKind::Verified,
            DealEventKind::Released => SdkDealEventKind::Released,
            DealEventKind::Refunded => SdkDealEventKind::Refunded,
            DealEventKind::Cancelled => SdkDealEventKind::Cancelled,
            DealEventKind::Expired => SdkDealEventKind::Expired,
        }
    }
}

/// Immutable audit fact. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DealEvent {
    pub id: i64,
    pub deal_id: Uuid,
    pub kind: DealEventKind,
    pub from_status: Option<DealStatus>,
    pub to_status: Option<DealStatus>,
    pub actor_id: Option<Uuid>,
    pub payload: Option<serde_json::Value>,
    pub created_at: PrimitiveDateTime,
}

/// Data for appending an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDealEvent {
    pub deal_id: Uuid,
    pub kind: DealEventKind,
    pub from_status: Option<DealStatus>,
    pub to_status: Option<DealStatus>,
    pub actor_id: Option<Uuid>,
    pub payload: Option<serde_json::Value>,
    pub created_at: PrimitiveDateTime,
}

impl NewDealEvent {
    /// An event describing a status change.
    pub fn transition(
        deal_id: Uuid,
        kind: DealEventKind,
        from: DealStatus,
        to: DealStatus,
        at: PrimitiveDateTime,
    ) -> Self {
        Self {
            deal_id,
            kind,
            from_status: Some(from),
            to_status: Some(to),
            actor_id: None,
            payload: None,
            created_at: at,
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone)]
/// Full timeline of one deal, oldest first.
pub struct GetDealEvents {
    pub deal_id: Uuid,
}

impl Processor<GetDealEvents> for DatabaseProcessor {
    type Output = Vec<DealEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDealEvents")]
    async fn process(&self, query: GetDealEvents) -> Result<Vec<DealEvent>, sqlx::Error> {
        sqlx::query_as::<_, DealEvent>(
            r#"
            SELECT id, deal_id, kind, from_status, to_status, actor_id, payload, created_at
            FROM deal_events
            WHERE deal_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(query.deal_id)
        .fetch_all(&self.pool)
        .await
    }
}

impl DealEvent {
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &NewDealEvent,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO deal_events (deal_id, kind, from_status, to_status, actor_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(event.deal_id)
        .bind(event.kind)
        .bind(event.from_status)
        .bind(event.to_status)
        .bind(event.actor_id)
        .bind(event.payload.as_ref())
        .bind(event.created_at)
        .fetch_one(&mut **tx)
        .await
    }
}
