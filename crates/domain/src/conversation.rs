use crate::errors::DomainError;
use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 两个用户之间的私聊会话，成员无序且唯一。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user1: UserId,
    pub user2: UserId,
    pub created_at: Timestamp,
}

impl Conversation {
    pub fn start(
        id: ConversationId,
        initiator: UserId,
        partner: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if initiator == partner {
            return Err(DomainError::invalid_argument(
                "user_id",
                "cannot start a conversation with yourself",
            ));
        }
        Ok(Self {
            id,
            user1: initiator,
            user2: partner,
            created_at: now,
        })
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.user1 == user || self.user2 == user
    }

    /// 返回 `user` 在该会话中的对方；`user` 不是成员时返回 `None`
    pub fn partner_of(&self, user: UserId) -> Option<UserId> {
        if self.user1 == user {
            Some(self.user2)
        } else if self.user2 == user {
            Some(self.user1)
        } else {
            None
        }
    }

    pub fn has_members(&self, a: UserId, b: UserId) -> bool {
        (self.user1 == a && self.user2 == b) || (self.user1 == b && self.user2 == a)
    }
}
