//! 应用层实现。
//!
//! 这里提供实时连接中心、围绕领域模型的用例服务，以及对外部协作方
//! （存储、密码哈希、令牌校验）的抽象。

pub mod auth;
pub mod bounded;
pub mod clock;
pub mod error;
pub mod hub;
pub mod memory;
pub mod password;
pub mod repository;
pub mod services;

pub use auth::{AccessTokenVerifier, TokenPurpose, VerifiedToken};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use hub::{
    ConnectionHandle, ConnectionRegistry, FrameSource, HandshakeState, Hub, HubDependencies,
    Outbound, ServerFrame, Session,
};
pub use memory::MemoryStore;
pub use password::{PasswordHasher, PasswordHasherError};
pub use repository::{ConversationRepository, MessageRepository, UserRepository};
pub use services::{
    AuthenticateUserRequest, ConversationService, ConversationServiceDependencies,
    CreateConversationRequest, RegisterUserRequest, UserService, UserServiceDependencies,
    UserSummary,
};
