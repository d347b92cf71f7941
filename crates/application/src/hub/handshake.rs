use domain::{User, UserId};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::connection::{ConnectionHandle, Outbound};
use super::protocol::{decode_auth_token, ServerFrame};
use super::Hub;
use crate::auth::TokenPurpose;
use crate::bounded::bounded;
use crate::error::ApplicationError;

const AUTH_FAILED_REASON: &str = "we couldn't authenticate you";

/// 单条连接的握手状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unauthenticated,
    Authenticated(UserId),
    Closed,
}

/// 传输层接入的一条连接及其握手进度
#[derive(Debug)]
pub struct Session {
    connection: ConnectionHandle,
    state: HandshakeState,
    deadline: Instant,
}

impl Session {
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// 未认证连接被强制关闭的时间点
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(super) fn mark_closed(&mut self) {
        self.state = HandshakeState::Closed;
    }
}

impl Hub {
    /// 接入新连接，进入未认证状态并开始计算握手期限
    pub fn accept(&self) -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (connection, outbound) = ConnectionHandle::open();
        let deadline = Instant::now() + self.deps.config.handshake_timeout();
        tracing::info!(connection = %connection.id(), "connection accepted, awaiting authentication");
        let session = Session {
            connection,
            state: HandshakeState::Unauthenticated,
            deadline,
        };
        (session, outbound)
    }

    /// 处理未认证状态下的一帧：任何文本帧都被视为认证请求
    pub async fn authenticate(&self, session: &mut Session, text: &str) {
        if session.state != HandshakeState::Unauthenticated {
            return;
        }

        match self.resolve_credentials(text).await {
            Ok(user) => {
                session.state = HandshakeState::Authenticated(user.id);
                if let Some(previous) = self.registry.register(user.id, session.connection.clone()) {
                    if previous.id() != session.connection.id() {
                        tracing::info!(
                            user_id = %user.id,
                            replaced = %previous.id(),
                            connection = %session.connection.id(),
                            "newer connection replaced an existing one"
                        );
                    }
                }
                session.connection.send(ServerFrame::welcome());
                tracing::info!(user_id = %user.id, connection = %session.connection.id(), "user authenticated");
                self.broadcast_online(user.id).await;
            }
            Err(err) => {
                tracing::warn!(connection = %session.connection.id(), error = %err, "authentication failed");
                session
                    .connection
                    .send(ServerFrame::error(401, AUTH_FAILED_REASON, None));
                session.connection.close();
                session.state = HandshakeState::Closed;
            }
        }
    }

    async fn resolve_credentials(&self, text: &str) -> Result<User, ApplicationError> {
        let token = decode_auth_token(text).map_err(|_| ApplicationError::Authentication)?;
        let verified = self.deps.token_verifier.verify_access_token(&token)?;
        if verified.purpose != TokenPurpose::Access {
            return Err(ApplicationError::Authentication);
        }
        let user_id =
            UserId::parse(&verified.subject, "sub").map_err(|_| ApplicationError::Authentication)?;

        bounded(
            "resolve user",
            self.storage_budget(),
            self.deps.user_repository.find_by_id(user_id),
        )
        .await?
        .ok_or(ApplicationError::Authentication)
    }

    /// 握手期限已到：仍未认证的连接被无条件关闭
    pub fn expire(&self, session: &mut Session) {
        if session.state != HandshakeState::Unauthenticated {
            return;
        }
        tracing::info!(connection = %session.connection.id(), "handshake deadline elapsed, closing connection");
        session.connection.close();
        session.state = HandshakeState::Closed;
    }

    /// 传输层断开后的清理：注销连接、记录最后在线时间、通知会话对方下线
    pub async fn disconnect(&self, session: &mut Session) {
        let previous = std::mem::replace(&mut session.state, HandshakeState::Closed);
        let HandshakeState::Authenticated(user) = previous else {
            return;
        };

        if !self
            .registry
            .deregister_connection(user, session.connection.id())
        {
            tracing::info!(
                user_id = %user,
                connection = %session.connection.id(),
                "displaced connection closed, newer connection stays registered"
            );
            return;
        }

        let now = self.deps.clock.now();
        if let Err(err) = bounded(
            "update last seen",
            self.storage_budget(),
            self.deps.user_repository.update_last_seen(user, now),
        )
        .await
        {
            tracing::warn!(user_id = %user, error = %err, "failed to persist last seen");
        }

        self.broadcast_offline(user, now).await;
        tracing::info!(user_id = %user, "user disconnected");
    }
}
