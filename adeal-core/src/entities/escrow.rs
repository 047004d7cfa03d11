//! Escrow balances and the ledger that explains them.
//!
//! Balances are a mutable snapshot; `deal_escrow_transactions` is the
//! append-only trail they can be rebuilt from. For every row
//! `available + locked_in_deals = total_earned - withdrawn`.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EscrowBalance {
    pub user_id: Uuid,
    pub currency: String,
    pub total_earned: Decimal,
    pub available: Decimal,
    pub locked_in_deals: Decimal,
    pub withdrawn: Decimal,
    pub updated_at: PrimitiveDateTime,
}

impl EscrowBalance {
    pub fn empty(user_id: Uuid, currency: &str, at: PrimitiveDateTime) -> Self {
        Self {
            user_id,
            currency: currency.to_string(),
            total_earned: Decimal::ZERO,
            available: Decimal::ZERO,
            locked_in_deals: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
            updated_at: at,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.available + self.locked_in_deals == self.total_earned - self.withdrawn
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "escrow_transaction_kind", rename_all = "snake_case")]
pub enum EscrowTransactionKind {
    PaymentReceived,
    FundsReleased,
    FundsRefunded,
}

impl EscrowTransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowTransactionKind::PaymentReceived => "payment_received",
            EscrowTransactionKind::FundsReleased => "funds_released",
            EscrowTransactionKind::FundsRefunded => "funds_refunded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EscrowTransaction {
    pub id: i64,
    pub deal_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub user_id: Uuid,
    pub kind: EscrowTransactionKind,
    pub amount: Decimal,
    pub currency: String,
    pub tx_hash: Option<String>,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEscrowTransaction {
    pub deal_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub user_id: Uuid,
    pub kind: EscrowTransactionKind,
    pub amount: Decimal,
    pub currency: String,
    pub tx_hash: Option<String>,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct GetEscrowBalance {
    pub user_id: Uuid,
    pub currency: String,
}

impl Processor<GetEscrowBalance> for DatabaseProcessor {
    type Output = Option<EscrowBalance>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEscrowBalance")]
    async fn process(&self, query: GetEscrowBalance) -> Result<Option<EscrowBalance>, sqlx::Error> {
        sqlx::query_as::<_, EscrowBalance>(
            "SELECT * FROM escrow_balances WHERE user_id = $1 AND currency = $2",
        )
        .bind(query.user_id)
        .bind(query.currency)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Every money movement of one deal, in insertion order.
pub struct GetEscrowTransactionsForDeal {
    pub deal_id: Uuid,
}

impl Processor<GetEscrowTransactionsForDeal> for DatabaseProcessor {
    type Output = Vec<EscrowTransaction>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEscrowTransactionsForDeal")]
    async fn process(
        &self,
        query: GetEscrowTransactionsForDeal,
    ) -> Result<Vec<EscrowTransaction>, sqlx::Error> {
        sqlx::query_as::<_, EscrowTransaction>(
            "SELECT * FROM deal_escrow_transactions WHERE deal_id = $1 ORDER BY id ASC",
        )
        .bind(query.deal_id)
        .fetch_all(&self.pool)
        .await
    }
}

impl EscrowBalance {
    /// Credit newly captured funds as earned but locked.
    pub async fn lock_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        at: PrimitiveDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO escrow_balances
                (user_id, currency, total_earned, available, locked_in_deals, withdrawn, updated_at)
            VALUES ($1, $2, $3, 0, $3, 0, $4)
            ON CONFLICT (user_id, currency) DO UPDATE SET
                total_earned = escrow_balances.total_earned + EXCLUDED.total_earned,
                locked_in_deals = escrow_balances.locked_in_deals + EXCLUDED.locked_in_deals,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(amount)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Move locked funds to the withdrawable balance. Returns rows updated
    /// (0 if not enough is locked).
    pub async fn release_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        at: PrimitiveDateTime,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE escrow_balances SET
                locked_in_deals = locked_in_deals - $3,
                available = available + $3,
                updated_at = $4
            WHERE user_id = $1 AND currency = $2 AND locked_in_deals >= $3
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(amount)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Take locked funds back out of the payee's earnings. Returns rows
    /// updated (0 if not enough is locked).
    pub async fn reverse_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        currency: &str,
        amount: Decimal,
        at: PrimitiveDateTime,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE escrow_balances SET
                locked_in_deals = locked_in_deals - $3,
                total_earned = total_earned - $3,
                updated_at = $4
            WHERE user_id = $1 AND currency = $2 AND locked_in_deals >= $3
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(amount)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

impl EscrowTransaction {
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        line: &NewEscrowTransaction,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO deal_escrow_transactions
                (deal_id, payment_id, user_id, kind, amount, currency, tx_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(line.deal_id)
        .bind(line.payment_id)
        .bind(line.user_id)
        .bind(line.kind)
        .bind(line.amount)
        .bind(&line.currency)
        .bind(line.tx_hash.as_deref())
        .bind(line.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
