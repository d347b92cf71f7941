use domain::{MessageContent, NewMessage, UserId};

use super::connection::ConnectionHandle;
use super::protocol::{ChatDelivery, ChatSend, DeliveryAck, ServerFrame};
use super::Hub;
use crate::bounded::bounded;
use crate::error::ApplicationError;

/// 发送失败时回给发送方的错误帧，总是携带 `tempID`
fn send_failure(err: &ApplicationError, temp_id: &str) -> ServerFrame {
    let code = err.status_code();
    let reason = match code {
        400 => err.to_string(),
        404 => "recipient or conversation not found".to_string(),
        _ => "failed to send message".to_string(),
    };
    ServerFrame::error(code, reason, Some(temp_id.to_owned()))
}

impl Hub {
    /// 聊天消息投递：持久化、回执发送方、转发给在线的接收方。
    ///
    /// 任何一步失败都只向发送方回一条带 `tempID` 的错误帧，消息不会被转发。
    /// 接收方不在线时投递到此结束，不做离线排队。
    pub(crate) async fn deliver_chat(
        &self,
        sender: UserId,
        connection: &ConnectionHandle,
        chat: ChatSend,
    ) {
        let ChatSend {
            to,
            from,
            content,
            temp_id,
        } = chat;

        let message = match validate(sender, &to, &from, content) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(user_id = %sender, temp_id = %temp_id, error = %err, "rejected chat frame");
                connection.send(send_failure(&err, &temp_id));
                return;
            }
        };
        let recipient = message.recipient_id;

        let stored = match bounded(
            "create message",
            self.storage_budget(),
            self.deps.message_repository.create(message),
        )
        .await
        {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(user_id = %sender, recipient_id = %recipient, temp_id = %temp_id, error = %err, "failed to persist message");
                connection.send(send_failure(&err, &temp_id));
                return;
            }
        };

        connection.send(ServerFrame::Ack(DeliveryAck {
            recipient_id: recipient,
            temp_id: temp_id.clone(),
            created_at: stored.created_at,
            id: stored.id,
        }));

        let Some(target) = self.registry.lookup(recipient) else {
            tracing::debug!(message_id = %stored.id, recipient_id = %recipient, "recipient offline, message stored only");
            return;
        };

        let forwarded = target.send(ServerFrame::Chat(ChatDelivery {
            id: stored.id,
            to: recipient,
            from: sender,
            content: stored.content.as_str().to_owned(),
            temp_id,
            created_at: stored.created_at,
        }));
        if !forwarded {
            tracing::debug!(message_id = %stored.id, recipient_id = %recipient, "recipient transport already closed");
        }
    }
}

fn validate(
    sender: UserId,
    to: &str,
    from: &str,
    content: String,
) -> Result<NewMessage, ApplicationError> {
    let recipient = UserId::parse(to, "to")?;
    let author = UserId::parse(from, "from")?;
    if author != sender {
        return Err(domain::DomainError::invalid_argument(
            "from",
            "does not match the authenticated user",
        )
        .into());
    }
    let content = MessageContent::new(content)?;
    Ok(NewMessage::new(sender, recipient, content))
}
