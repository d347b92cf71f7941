//! 聊天系统的领域模型：标识、用户、会话与消息。

pub mod conversation;
pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

pub use conversation::Conversation;
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{ChatMessage, NewMessage};
pub use user::{ConversationPartner, User};
pub use value_objects::{
    ConversationId, MessageContent, MessageId, PasswordHash, Timestamp, UserEmail, UserId,
    Username,
};
