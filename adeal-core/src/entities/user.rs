use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use uuid::Uuid;

#[derive(Debug, Clone)]
/// Telegram chat id of a registered user.
pub struct GetUserChatId {
    pub user_id: Uuid,
}

impl Processor<GetUserChatId> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetUserChatId")]
    async fn process(&self, query: GetUserChatId) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT telegram_id FROM users WHERE id = $1")
            .bind(query.user_id)
            .fetch_optional(&self.pool)
            .await
    }
}
