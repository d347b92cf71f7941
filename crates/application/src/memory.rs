//! 基于内存的存储实现，用于测试与本地开发（`STORAGE=memory`）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ChatMessage, Conversation, ConversationId, ConversationPartner, MessageId, NewMessage,
    RepositoryError, Timestamp, User, UserEmail, UserId,
};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::repository::{ConversationRepository, MessageRepository, UserRepository};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    conversations: HashMap<ConversationId, Conversation>,
    /// 按写入顺序追加
    messages: Vec<ChatMessage>,
}

/// 同时实现全部仓储接口的内存存储
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            clock,
        }
    }
}

fn conversation_between(tables: &Tables, a: UserId, b: UserId) -> Option<&Conversation> {
    tables.conversations.values().find(|c| c.has_members(a, b))
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.users.values().any(|existing| {
            existing.id == user.id
                || existing.email == user.email
                || existing.username == user.username
        });
        if duplicate {
            return Err(RepositoryError::AlreadyExists);
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn search(
        &self,
        requester: UserId,
        query: String,
        limit: i64,
    ) -> Result<Vec<User>, RepositoryError> {
        let needle = query.to_lowercase();
        let tables = self.tables.read().await;
        let mut found: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.id != requester)
            .filter(|u| u.username.as_str().to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.username.as_str().cmp(b.username.as_str()));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn update_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.mark_seen(at);
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&conversation.user1)
            || !tables.users.contains_key(&conversation.user2)
        {
            return Err(RepositoryError::ConstraintViolation);
        }
        if conversation_between(&tables, conversation.user1, conversation.user2).is_some() {
            return Err(RepositoryError::AlreadyExists);
        }
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_members(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(conversation_between(&tables, a, b).cloned())
    }

    async fn list_partners(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationPartner>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut partners: Vec<(Timestamp, ConversationPartner)> = tables
            .conversations
            .values()
            .filter_map(|c| {
                let partner = tables.users.get(&c.partner_of(user)?)?;
                Some((c.created_at, ConversationPartner::from_user(partner, c.id)))
            })
            .collect();
        partners.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(partners.into_iter().map(|(_, p)| p).collect())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, RepositoryError> {
        let mut tables = self.tables.write().await;
        let conversation_id = conversation_between(&tables, message.sender_id, message.recipient_id)
            .map(|c| c.id)
            .ok_or(RepositoryError::NotFound)?;
        let stored = ChatMessage {
            id: MessageId::generate(),
            conversation_id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            content: message.content,
            created_at: self.clock.now(),
            read_at: None,
        };
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn mark_read(
        &self,
        conversation: ConversationId,
        owner: UserId,
        at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let mut tables = self.tables.write().await;
        let ids = tables
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation && m.sender_id == owner && !m.is_read())
            .map(|m| {
                m.read_at = Some(at);
                m.id
            })
            .collect();
        Ok(ids)
    }

    async fn list_by_conversation(
        &self,
        conversation: ConversationId,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let tables = self.tables.read().await;
        let in_conversation: Vec<&ChatMessage> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation)
            .collect();
        let skip = in_conversation.len().saturating_sub(limit.max(0) as usize);
        Ok(in_conversation.into_iter().skip(skip).cloned().collect())
    }
}
