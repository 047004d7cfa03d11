use sqlx::PgPool;

/// Runs single-statement queries against the pool.
///
/// Each query is a plain struct with a `Processor` impl next to its entity.
/// Multi-statement units of work open a transaction with [`begin`](Self::begin)
/// and use the entities' `*_tx` helpers instead.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}
