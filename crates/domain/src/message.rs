use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

/// 已持久化的聊天消息。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
    pub read_at: Option<Timestamp>,
}

impl ChatMessage {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// 待写入的消息；标识、会话与时间戳由存储层分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: MessageContent,
}

impl NewMessage {
    pub fn new(sender_id: UserId, recipient_id: UserId, content: MessageContent) -> Self {
        Self {
            sender_id,
            recipient_id,
            content,
        }
    }
}
