//! 存储协作方接口。
//!
//! 所有实现都必须是线程安全的，并自行负责一致性约束（唯一、外键），
//! 约束失败以 `RepositoryError` 的具体变体返回。

use async_trait::async_trait;
use domain::{
    ChatMessage, Conversation, ConversationId, ConversationPartner, MessageId, NewMessage,
    RepositoryError, Timestamp, User, UserEmail, UserId,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError>;
    /// 按用户名模糊搜索，结果中不包含 `requester` 本人
    async fn search(
        &self,
        requester: UserId,
        query: String,
        limit: i64,
    ) -> Result<Vec<User>, RepositoryError>;
    async fn update_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
    /// 成员无序匹配
    async fn find_by_members(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// `user` 参与的所有会话中的对方用户
    async fn list_partners(&self, user: UserId)
        -> Result<Vec<ConversationPartner>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 写入消息并分配标识与创建时间；两人之间不存在会话时返回 `NotFound`
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, RepositoryError>;

    /// 把会话中由 `owner` 发送且尚未读的消息标记为已读，返回受影响的消息标识
    async fn mark_read(
        &self,
        conversation: ConversationId,
        owner: UserId,
        at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError>;

    /// 会话最近的 `limit` 条消息，按时间正序
    async fn list_by_conversation(
        &self,
        conversation: ConversationId,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;
}
