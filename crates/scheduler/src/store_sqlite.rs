//! SQLite-backed message store using sqlx.

use {
    async_trait::async_trait,
    chrono::{DateTime, SubsecRound, Utc},
    courier_common::{
        ChannelType, EXTERNAL_ID_KEY, Message, MessageStatus, Metadata, NewMessage,
        ScheduledFilter,
    },
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
};

use crate::{Error, Result, error::Context, store::MessageStore};

const COLUMNS: &str = "id, content, channel, direction, status, recipient, sender, scheduled_at, \
                       created_at, contact_id, user_id, team_id, metadata";

/// SQLite-backed persistence for messages.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::external(format!("connect to {database_url}"), e))?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("invalid timestamp: {ms}"))
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let channel: String = row.get("channel");
    let direction: String = row.get("direction");
    let status: String = row.get("status");
    let metadata: String = row.get("metadata");
    let scheduled_at = row
        .get::<Option<i64>, _>("scheduled_at")
        .map(from_millis)
        .transpose()?;

    Ok(Message {
        id: row.get("id"),
        content: row.get("content"),
        channel: channel.parse()?,
        direction: direction.parse()?,
        status: status.parse()?,
        to: row.get("recipient"),
        from: row.get("sender"),
        scheduled_at,
        created_at: from_millis(row.get("created_at"))?,
        contact_id: row.get("contact_id"),
        user_id: row.get("user_id"),
        team_id: row.get("team_id"),
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn rows_to_messages(rows: &[SqliteRow]) -> Result<Vec<Message>> {
    rows.iter().map(row_to_message).collect()
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create(&self, message: NewMessage) -> Result<Message> {
        // Stored at millisecond precision; return what a later read would see.
        let mut message =
            message.into_message(uuid::Uuid::new_v4().to_string(), Utc::now().trunc_subsecs(3));
        message.scheduled_at = message.scheduled_at.map(|at| at.trunc_subsecs(3));

        sqlx::query(
            "INSERT INTO messages (id, content, channel, direction, status, recipient, sender,
                                   scheduled_at, created_at, contact_id, user_id, team_id,
                                   external_id, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.content)
        .bind(message.channel.as_str())
        .bind(message.direction.as_str())
        .bind(message.status.as_str())
        .bind(&message.to)
        .bind(&message.from)
        .bind(message.scheduled_at.map(millis))
        .bind(millis(message.created_at))
        .bind(&message.contact_id)
        .bind(&message.user_id)
        .bind(&message.team_id)
        .bind(message.external_id())
        .bind(serde_json::to_string(&message.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::message_not_found(id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn find_by_status_and_scheduled_before(
        &self,
        status: MessageStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE status = ? AND scheduled_at IS NOT NULL AND scheduled_at <= ?
             ORDER BY scheduled_at, id"
        ))
        .bind(status.as_str())
        .bind(millis(before))
        .fetch_all(&self.pool)
        .await?;
        rows_to_messages(&rows)
    }

    async fn find_scheduled_by_filters(&self, filter: &ScheduledFilter) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE status = 'scheduled'
               AND (?1 IS NULL OR contact_id = ?1)
               AND (?2 IS NULL OR user_id = ?2)
               AND (?3 IS NULL OR team_id = ?3)
             ORDER BY scheduled_at, id"
        ))
        .bind(&filter.contact_id)
        .bind(&filter.user_id)
        .bind(&filter.team_id)
        .fetch_all(&self.pool)
        .await?;
        rows_to_messages(&rows)
    }

    async fn merge_metadata(&self, id: &str, patch: Metadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT metadata FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::message_not_found(id))?;
        let current: String = row.get("metadata");
        let mut metadata: Metadata = serde_json::from_str(&current)?;
        metadata.extend(patch);
        let external_id = metadata
            .get(EXTERNAL_ID_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        sqlx::query("UPDATE messages SET metadata = ?, external_id = ? WHERE id = ?")
            .bind(serde_json::to_string(&metadata)?)
            .bind(external_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        channel: ChannelType,
        external_id: &str,
    ) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE channel = ? AND external_id = ?
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(channel.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }
}
