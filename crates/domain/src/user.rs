use crate::value_objects::{ConversationId, PasswordHash, Timestamp, UserEmail, UserId, Username};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    /// 最近一次断开实时连接的时间，从未连接过时为空
    pub last_seen: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password,
            last_seen: None,
            created_at: now,
        }
    }

    pub fn mark_seen(&mut self, at: Timestamp) {
        self.last_seen = Some(at);
    }
}

/// 会话中的对方用户视图，用于会话列表与会话创建通知。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConversationPartner {
    pub id: UserId,
    pub username: Username,
    pub last_seen: Option<Timestamp>,
    pub conversation_id: ConversationId,
}

impl ConversationPartner {
    pub fn from_user(user: &User, conversation_id: ConversationId) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            last_seen: user.last_seen,
            conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User::register(
            UserId::generate(),
            Username::parse("alice").unwrap(),
            UserEmail::parse("alice@example.com").unwrap(),
            PasswordHash::new("$2b$04$hash").unwrap(),
            Utc::now(),
        );
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["last_seen"], serde_json::Value::Null);
    }
}
