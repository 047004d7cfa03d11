use crate::framework::DatabaseProcessor;
use adeal_sdk::objects::DealStatus as SdkDealStatus;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;
use uuid::Uuid;

/// Deal status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `adeal_sdk::objects::DealStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "deal_status", rename_all = "snake_case")]
pub enum DealStatus {
    Agreed,
    AwaitingPayment,
    Paid,
    CreativeDraft,
    CreativeReview,
    Scheduled,
    Posted,
    Verified,
    Released,
    Refunded,
    Cancelled,
    Expired,
}

impl DealStatus {
    pub const ALL: [DealStatus; 12] = [
        DealStatus::Agreed,
        DealStatus::AwaitingPayment,
        DealStatus::Paid,
        DealStatus::CreativeDraft,
        DealStatus::CreativeReview,
        DealStatus::Scheduled,
        DealStatus::Posted,
        DealStatus::Verified,
        DealStatus::Released,
        DealStatus::Refunded,
        DealStatus::Cancelled,
        DealStatus::Expired,
    ];
}

impl From<DealStatus> for SdkDealStatus {
    fn from(value: DealStatus) -> Self {
        match value {
            DealStatus::Agreed => SdkDealStatus::Agreed,
            DealStatus::AwaitingPayment => SdkDealStatus::AwaitingPayment,
            DealStatus::Paid => SdkDealStatus::Paid,
            DealStatus::CreativeDraft => SdkDealStatus::CreativeDraft,
            DealStatus::CreativeReview => SdkDealStatus::CreativeReview,
            DealStatus::Scheduled => SdkDealStatus::Scheduled,
            DealStatus::Posted => SdkDealStatus::Posted,
            DealStatus::Verified => SdkDealStatus::Verified,
            DealStatus::Released => SdkDealStatus::Released,
            DealStatus::Refunded => SdkDealStatus::Refunded,
            DealStatus::Cancelled => SdkDealStatus::Cancelled,
            DealStatus::Expired => SdkDealStatus::Expired,
        }
    }
}

impl From<SdkDealStatus> for DealStatus {
    fn from(value: SdkDealStatus) -> Self {
        match value {
            SdkDealStatus::Agreed => DealStatus::Agreed,
            SdkDealStatus::AwaitingPayment => DealStatus::AwaitingPayment,
            SdkDealStatus::Paid => DealStatus::Paid,
            SdkDealStatus::CreativeDraft => DealStatus::CreativeDraft,
            SdkDealStatus::CreativeReview => DealStatus::CreativeReview,
            SdkDealStatus::Scheduled => DealStatus::Scheduled,
            SdkDealStatus::Posted => DealStatus::Posted,
            SdkDealStatus::Verified => DealStatus::Verified,
            SdkDealStatus::Released => DealStatus::Released,
            SdkDealStatus::Refunded => DealStatus::Refunded,
            SdkDealStatus::Cancelled => DealStatus::Cancelled,
            SdkDealStatus::Expired => DealStatus::Expired,
        }
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkDealStatus::from(*self).fmt(f)
    }
}

/// Media attached to a creative. Only one item per creative is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "media_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CreativeMedia {
    pub kind: MediaKind,
    /// Telegram file id of the uploaded media.
    pub file_id: String,
}

/// Advertising content to be published for a deal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Creative {
    pub text: Option<String>,
    pub media: Option<CreativeMedia>,
}

impl Creative {
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(|t| t.trim().is_empty()) && self.media.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Deal {
    pub id: Uuid,
    pub listing_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub advertiser_id: Uuid,
    pub payee_id: Uuid,
    pub campaign_id: Uuid,
    pub status: DealStatus,
    pub agreed_price: Decimal,
    pub scheduled_post_time: Option<PrimitiveDateTime>,
    pub escrow_address: Option<String>,
    pub creative_text: Option<String>,
    pub creative_media_kind: Option<MediaKind>,
    pub creative_media_file_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub posted_message_id: Option<i64>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
    pub posted_at: Option<PrimitiveDateTime>,
    pub verified_at: Option<PrimitiveDateTime>,
    pub expires_at: Option<PrimitiveDateTime>,
    pub escrow_released_at: Option<PrimitiveDateTime>,
    pub escrow_refunded_at: Option<PrimitiveDateTime>,
}

impl Deal {
    /// The creative stored on the deal, or `None` if nothing was submitted yet.
    pub fn creative(&self) -> Option<Creative> {
        let media = match (self.creative_media_kind, &self.creative_media_file_id) {
            (Some(kind), Some(file_id)) => Some(CreativeMedia {
                kind,
                file_id: file_id.clone(),
            }),
            _ => None,
        };
        let creative = Creative {
            text: self.creative_text.clone(),
            media,
        };
        (!creative.is_empty()).then_some(creative)
    }
}

/// Telegram chat ids of everyone a deal talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct DealParties {
    pub advertiser_chat_id: i64,
    pub payee_chat_id: i64,
    pub channel_chat_id: i64,
}

/// A deal together with the parties resolved from users and channels.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DealContext {
    #[sqlx(flatten)]
    pub deal: Deal,
    #[sqlx(flatten)]
    pub parties: DealParties,
}

/// Data for inserting a new deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeal {
    pub id: Uuid,
    pub listing_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub advertiser_id: Uuid,
    pub payee_id: Uuid,
    pub campaign_id: Uuid,
    pub agreed_price: Decimal,
    pub expires_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
}

/// Column updates applied together with a status change.
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DealStamps {
    pub scheduled_post_time: Option<PrimitiveDateTime>,
    pub escrow_address: Option<String>,
    pub expires_at: Option<PrimitiveDateTime>,
    pub rejection_reason: Option<String>,
    pub posted_at: Option<PrimitiveDateTime>,
    pub posted_message_id: Option<i64>,
    pub verified_at: Option<PrimitiveDateTime>,
    pub escrow_released_at: Option<PrimitiveDateTime>,
    pub escrow_refunded_at: Option<PrimitiveDateTime>,
}

/// A status change guarded by the status the caller last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealTransition {
    pub deal_id: Uuid,
    pub expected: DealStatus,
    pub to: DealStatus,
    pub at: PrimitiveDateTime,
    pub stamps: DealStamps,
}

macro_rules! deal_context_query {
    ($tail:literal) => {
        concat!(
            r#"
            SELECT
                d.*,
                a.telegram_id AS advertiser_chat_id,
                p.telegram_id AS payee_chat_id,
                c.telegram_chat_id AS channel_chat_id
            FROM deals d
            JOIN users a ON a.id = d.advertiser_id
            JOIN users p ON p.id = d.payee_id
            LEFT JOIN listings l ON l.id = d.listing_id
            JOIN channels c ON c.id = COALESCE(d.channel_id, l.channel_id)
            "#,
            $tail
        )
    };
}

#[derive(Debug, Clone)]
pub struct GetDealContext {
    pub deal_id: Uuid,
}

impl Processor<GetDealContext> for DatabaseProcessor {
    type Output = Option<DealContext>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDealContext")]
    async fn process(&self, query: GetDealContext) -> Result<Option<DealContext>, sqlx::Error> {
        sqlx::query_as::<_, DealContext>(deal_context_query!("WHERE d.id = $1"))
            .bind(query.deal_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Unpaid deals whose offer window has closed.
pub struct GetExpirableDeals {
    pub now: PrimitiveDateTime,
    pub limit: i64,
}

impl Processor<GetExpirableDeals> for DatabaseProcessor {
    type Output = Vec<DealContext>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetExpirableDeals")]
    async fn process(&self, query: GetExpirableDeals) -> Result<Vec<DealContext>, sqlx::Error> {
        sqlx::query_as::<_, DealContext>(deal_context_query!(
            r#"
            WHERE d.status IN ('agreed', 'awaiting_payment')
              AND d.expires_at IS NOT NULL
              AND d.expires_at <= $1
            ORDER BY d.expires_at ASC
            LIMIT $2
            "#
        ))
        .bind(query.now)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Scheduled deals whose post time has been reached.
pub struct GetDuePublications {
    pub now: PrimitiveDateTime,
    pub limit: i64,
}

impl Processor<GetDuePublications> for DatabaseProcessor {
    type Output = Vec<DealContext>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDuePublications")]
    async fn process(&self, query: GetDuePublications) -> Result<Vec<DealContext>, sqlx::Error> {
        sqlx::query_as::<_, DealContext>(deal_context_query!(
            r#"
            WHERE d.status = 'scheduled'
              AND d.scheduled_post_time IS NOT NULL
              AND d.scheduled_post_time <= $1
            ORDER BY d.scheduled_post_time ASC
            LIMIT $2
            "#
        ))
        .bind(query.now)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Posted deals whose campaign schedule window has ended.
pub struct GetDueSettlements {
    pub now: PrimitiveDateTime,
    pub limit: i64,
}

impl Processor<GetDueSettlements> for DatabaseProcessor {
    type Output = Vec<DealContext>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDueSettlements")]
    async fn process(&self, query: GetDueSettlements) -> Result<Vec<DealContext>, sqlx::Error> {
        sqlx::query_as::<_, DealContext>(deal_context_query!(
            r#"
            JOIN campaigns cp ON cp.id = d.campaign_id
            WHERE d.status = 'posted'
              AND d.posted_message_id IS NOT NULL
              AND cp.schedule_end <= $1
            ORDER BY cp.schedule_end ASC
            LIMIT $2
            "#
        ))
        .bind(query.now)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

impl Deal {
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        insert: &NewDeal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO deals
                (id, listing_id, channel_id, advertiser_id, payee_id, campaign_id,
                 status, agreed_price, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'agreed', $7, $8, $9, $9)
            "#,
        )
        .bind(insert.id)
        .bind(insert.listing_id)
        .bind(insert.channel_id)
        .bind(insert.advertiser_id)
        .bind(insert.payee_id)
        .bind(insert.campaign_id)
        .bind(insert.agreed_price)
        .bind(insert.expires_at)
        .bind(insert.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Apply a status change only if the row still has the expected status.
    ///
    /// Returns the number of rows updated, which is 0 on a status mismatch.
    pub async fn transition_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        transition: &DealTransition,
    ) -> Result<u64, sqlx::Error> {
        let stamps = &transition.stamps;
        let result = sqlx::query(
            r#"
            UPDATE deals SET
                status = $3,
                updated_at = $4,
                scheduled_post_time = COALESCE($5, scheduled_post_time),
                escrow_address = COALESCE($6, escrow_address),
                expires_at = COALESCE($7, expires_at),
                rejection_reason = COALESCE($8, rejection_reason),
                posted_at = COALESCE($9, posted_at),
                posted_message_id = COALESCE($10, posted_message_id),
                verified_at = COALESCE($11, verified_at),
                escrow_released_at = COALESCE($12, escrow_released_at),
                escrow_refunded_at = COALESCE($13, escrow_refunded_at)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(transition.deal_id)
        .bind(transition.expected)
        .bind(transition.to)
        .bind(transition.at)
        .bind(stamps.scheduled_post_time)
        .bind(stamps.escrow_address.as_deref())
        .bind(stamps.expires_at)
        .bind(stamps.rejection_reason.as_deref())
        .bind(stamps.posted_at)
        .bind(stamps.posted_message_id)
        .bind(stamps.verified_at)
        .bind(stamps.escrow_released_at)
        .bind(stamps.escrow_refunded_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Current status of a deal, read inside the transaction.
    pub async fn status_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        deal_id: Uuid,
    ) -> Result<Option<DealStatus>, sqlx::Error> {
        sqlx::query_scalar::<_, DealStatus>("SELECT status FROM deals WHERE id = $1")
            .bind(deal_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Replace the creative payload. Multiple media are never stored.
    pub async fn update_creative_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        deal_id: Uuid,
        creative: &Creative,
        at: PrimitiveDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE deals SET
                creative_text = $2,
                creative_media_kind = $3,
                creative_media_file_id = $4,
                rejection_reason = NULL,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(deal_id)
        .bind(creative.text.as_deref())
        .bind(creative.media.as_ref().map(|m| m.kind))
        .bind(creative.media.as_ref().map(|m| m.file_id.as_str()))
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
