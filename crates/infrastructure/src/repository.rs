use std::sync::Arc;

use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatMessage, Conversation, ConversationId, ConversationPartner, MessageContent, MessageId,
    NewMessage, PasswordHash, RepositoryError, Timestamp, User, UserEmail, UserId, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => RepositoryError::AlreadyExists,
            Some(FOREIGN_KEY_VIOLATION) | Some(CHECK_VIOLATION) => {
                RepositoryError::ConstraintViolation
            }
            _ => RepositoryError::storage(err.to_string()),
        },
        _ => RepositoryError::storage(err.to_string()),
    }
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId::from(value.id),
            username: Username::parse(value.username)?,
            email: UserEmail::parse(value.email)?,
            password: PasswordHash::new(value.password_hash)?,
            last_seen: value.last_seen,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    user1: Uuid,
    user2: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            user1: UserId::from(value.user1),
            user2: UserId::from(value.user2),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PartnerRecord {
    id: Uuid,
    username: String,
    last_seen: Option<DateTime<Utc>>,
    conversation_id: Uuid,
}

impl TryFrom<PartnerRecord> for ConversationPartner {
    type Error = RepositoryError;

    fn try_from(value: PartnerRecord) -> Result<Self, Self::Error> {
        Ok(ConversationPartner {
            id: UserId::from(value.id),
            username: Username::parse(value.username)?,
            last_seen: value.last_seen,
            conversation_id: ConversationId::from(value.conversation_id),
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    recipient_id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for ChatMessage {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            recipient_id: UserId::from(value.recipient_id),
            content: MessageContent::new(value.content)?,
            created_at: value.created_at,
            read_at: value.read_at,
        })
    }
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, email, password_hash, last_seen, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, password_hash, last_seen, created_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(user.last_seen)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, email, password_hash, last_seen, created_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(User::try_from)
        .transpose()
    }

    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, email, password_hash, last_seen, created_at
            FROM users WHERE email = $1
            "#,
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(User::try_from)
        .transpose()
    }

    async fn search(
        &self,
        requester: UserId,
        query: String,
        limit: i64,
    ) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, email, password_hash, last_seen, created_at
            FROM users
            WHERE id <> $1 AND username ILIKE '%' || $2 || '%'
            ORDER BY username
            LIMIT $3
            "#,
        )
        .bind(Uuid::from(requester))
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn update_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET last_seen = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, user1, user2, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user1, user2, created_at
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(Uuid::from(conversation.user1))
        .bind(Uuid::from(conversation.user2))
        .bind(conversation.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_by_members(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, user1, user2, created_at
            FROM conversations
            WHERE (user1 = $1 AND user2 = $2) OR (user1 = $2 AND user2 = $1)
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Conversation::from))
    }

    async fn list_partners(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationPartner>, RepositoryError> {
        let records = sqlx::query_as::<_, PartnerRecord>(
            r#"
            SELECT u.id, u.username, u.last_seen, c.id AS conversation_id
            FROM conversations c
            JOIN users u
              ON u.id = CASE WHEN c.user1 = $1 THEN c.user2 ELSE c.user1 END
            WHERE c.user1 = $1 OR c.user2 = $1
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(Uuid::from(user))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(ConversationPartner::try_from)
            .collect()
    }
}

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, RepositoryError> {
        // 会话由两位成员确定，不存在时不插入任何行
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, created_at)
            SELECT $1, c.id, $2, $3, $4, NOW()
            FROM conversations c
            WHERE (c.user1 = $2 AND c.user2 = $3) OR (c.user1 = $3 AND c.user2 = $2)
            RETURNING id, conversation_id, sender_id, recipient_id, content, created_at, read_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::from(message.sender_id))
        .bind(Uuid::from(message.recipient_id))
        .bind(message.content.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        ChatMessage::try_from(record)
    }

    async fn mark_read(
        &self,
        conversation: ConversationId,
        owner: UserId,
        at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE messages
            SET read_at = $3
            WHERE conversation_id = $1 AND sender_id = $2 AND read_at IS NULL
            RETURNING id
            "#,
        )
        .bind(Uuid::from(conversation))
        .bind(Uuid::from(owner))
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(MessageId::from).collect())
    }

    async fn list_by_conversation(
        &self,
        conversation: ConversationId,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, recipient_id, content, created_at, read_at
            FROM (
                SELECT id, conversation_id, sender_id, recipient_id, content, created_at, read_at
                FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC
            "#,
        )
        .bind(Uuid::from(conversation))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatMessage::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    min_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, min_connections, "postgres pool ready");
    Ok(pool)
}
