use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub deal_id: Uuid,
    /// Reference the payer must put into the transfer comment.
    pub invoice_id: String,
    pub payment_uri: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub tx_hash: Option<String>,
    pub payer_address: Option<String>,
    pub actual_amount: Option<Decimal>,
    pub created_at: PrimitiveDateTime,
    pub expires_at: PrimitiveDateTime,
    pub confirmed_at: Option<PrimitiveDateTime>,
}

/// Data for inserting a new payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub invoice_id: String,
    pub payment_uri: String,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: PrimitiveDateTime,
    pub expires_at: PrimitiveDateTime,
}

/// Facts observed on chain that settle a pending payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub payment_id: Uuid,
    pub tx_hash: String,
    pub payer_address: Option<String>,
    pub actual_amount: Decimal,
    pub confirmed_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
/// Pending payments that can still be paid, oldest first.
pub struct GetPendingPayments {
    pub now: PrimitiveDateTime,
    pub limit: i64,
}

impl Processor<GetPendingPayments> for DatabaseProcessor {
    type Output = Vec<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPendingPayments")]
    async fn process(&self, query: GetPendingPayments) -> Result<Vec<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT *
            FROM payments
            WHERE status = 'pending'
              AND expires_at > $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(query.now)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Whether any payment already carries this transaction hash.
pub struct IsTransactionRecorded {
    pub tx_hash: String,
}

impl Processor<IsTransactionRecorded> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IsTransactionRecorded")]
    async fn process(&self, query: IsTransactionRecorded) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM payments WHERE tx_hash = $1)")
            .bind(query.tx_hash)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Most recent payment requested for a deal.
pub struct GetPaymentForDeal {
    pub deal_id: Uuid,
}

impl Processor<GetPaymentForDeal> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentForDeal")]
    async fn process(&self, query: GetPaymentForDeal) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE deal_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(query.deal_id)
        .fetch_optional(&self.pool)
        .await
    }
}

impl Payment {
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        insert: &NewPayment,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, deal_id, invoice_id, payment_uri, amount, currency, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
            "#,
        )
        .bind(insert.id)
        .bind(insert.deal_id)
        .bind(&insert.invoice_id)
        .bind(&insert.payment_uri)
        .bind(insert.amount)
        .bind(&insert.currency)
        .bind(insert.created_at)
        .bind(insert.expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Check the hash against every payment, locking nothing.
    ///
    /// The unique index on `tx_hash` is the final guard; this lets the caller
    /// tell a duplicate apart from other constraint failures.
    pub async fn tx_hash_exists_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tx_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM payments WHERE tx_hash = $1)")
            .bind(tx_hash)
            .fetch_one(&mut **tx)
            .await
    }

    /// Mark a pending payment confirmed. Returns rows updated (0 if it was
    /// no longer pending).
    pub async fn confirm_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        confirmation: &PaymentConfirmation,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = 'confirmed',
                tx_hash = $2,
                payer_address = $3,
                actual_amount = $4,
                confirmed_at = $5
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(confirmation.payment_id)
        .bind(&confirmation.tx_hash)
        .bind(confirmation.payer_address.as_deref())
        .bind(confirmation.actual_amount)
        .bind(confirmation.confirmed_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move every payment of a deal in `from` to `to`.
    pub async fn set_status_for_deal_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        deal_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE payments SET status = $3 WHERE deal_id = $1 AND status = $2")
            .bind(deal_id)
            .bind(from)
            .bind(to)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}
