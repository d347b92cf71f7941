//! 实时连接中心。
//!
//! 负责在线连接注册、连接认证握手、入站帧分发，以及消息投递、已读回执、
//! 输入状态与在线状态的推送。传输层只需要实现 [`FrameSource`] 并消费
//! [`ConnectionHandle`] 对应的写队列。

mod connection;
mod delivery;
mod dispatcher;
mod handshake;
mod presence;
pub mod protocol;
mod registry;
mod relay;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::HubConfig;
use domain::UserId;
use tokio::sync::mpsc;

use crate::auth::AccessTokenVerifier;
use crate::clock::Clock;
use crate::repository::{ConversationRepository, MessageRepository, UserRepository};

pub use connection::{ConnectionHandle, ConnectionId, Outbound};
pub use handshake::{HandshakeState, Session};
pub use protocol::{ClientFrame, ServerFrame};
pub use registry::ConnectionRegistry;

/// 入站文本帧的来源
#[async_trait]
pub trait FrameSource: Send {
    /// 下一条文本帧；传输层关闭时返回 `None`
    async fn next_text(&mut self) -> Option<String>;
}

#[async_trait]
impl FrameSource for mpsc::UnboundedReceiver<String> {
    async fn next_text(&mut self) -> Option<String> {
        self.recv().await
    }
}

pub struct HubDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub token_verifier: Arc<dyn AccessTokenVerifier>,
    pub clock: Arc<dyn Clock>,
    pub config: HubConfig,
}

pub struct Hub {
    deps: HubDependencies,
    registry: Arc<ConnectionRegistry>,
}

impl Hub {
    pub fn new(deps: HubDependencies) -> Self {
        Self::with_registry(deps, Arc::new(ConnectionRegistry::new()))
    }

    pub fn with_registry(deps: HubDependencies, registry: Arc<ConnectionRegistry>) -> Self {
        Self { deps, registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.registry.is_online(user)
    }

    fn storage_budget(&self) -> Duration {
        self.deps.config.storage_timeout()
    }

    /// 驱动一条连接的完整生命周期：握手、逐帧分发、断开清理。
    ///
    /// 同一连接的帧按到达顺序依次处理。
    pub async fn drive<S: FrameSource>(&self, mut session: Session, mut source: S) {
        while session.state() == HandshakeState::Unauthenticated {
            match tokio::time::timeout_at(session.deadline(), source.next_text()).await {
                Ok(Some(text)) => self.authenticate(&mut session, &text).await,
                Ok(None) => {
                    tracing::debug!(connection = %session.connection().id(), "transport closed before authentication");
                    session.mark_closed();
                }
                Err(_) => self.expire(&mut session),
            }
        }

        let HandshakeState::Authenticated(user) = session.state() else {
            return;
        };

        while let Some(text) = source.next_text().await {
            self.dispatch(user, session.connection(), &text).await;
        }

        self.disconnect(&mut session).await;
    }
}
