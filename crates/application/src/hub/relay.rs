use domain::{ConversationId, UserId};

use super::connection::ConnectionHandle;
use super::protocol::{MarkRead, ReadReceipt, ServerFrame, TypingNotice, TypingTarget};
use super::Hub;
use crate::bounded::bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypingSignal {
    Started,
    Stopped,
}

impl Hub {
    /// 已读回执：任何失败都静默放弃，不回错误帧。
    ///
    /// 只有会话中的另一方才能把发送者的消息标记为已读。
    pub(crate) async fn mark_read(&self, reader: UserId, request: MarkRead) {
        let (conversation, owner) = match (
            ConversationId::parse(&request.conversation_id, "conversationID"),
            UserId::parse(&request.message_owner_id, "messageOwnerID"),
        ) {
            (Ok(conversation), Ok(owner)) => (conversation, owner),
            (Err(err), _) | (_, Err(err)) => {
                tracing::debug!(user_id = %reader, error = %err, "ignored mark-read with invalid identifiers");
                return;
            }
        };

        // 读者必须是该会话中消息发送者的对方
        match bounded(
            "find conversation",
            self.storage_budget(),
            self.deps.conversation_repository.find_by_members(reader, owner),
        )
        .await
        {
            Ok(Some(found)) if found.id == conversation => {}
            Ok(_) => {
                tracing::debug!(user_id = %reader, conversation_id = %conversation, "ignored mark-read outside the reader's conversation");
                return;
            }
            Err(err) => {
                tracing::warn!(user_id = %reader, conversation_id = %conversation, error = %err, "failed to look up conversation for mark-read");
                return;
            }
        }

        let message_ids = match bounded(
            "mark messages read",
            self.storage_budget(),
            self.deps
                .message_repository
                .mark_read(conversation, owner, self.deps.clock.now()),
        )
        .await
        {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(user_id = %reader, conversation_id = %conversation, error = %err, "failed to mark messages read");
                return;
            }
        };

        if message_ids.is_empty() {
            return;
        }

        if let Some(connection) = self.registry.lookup(owner) {
            connection.send(ServerFrame::Read(ReadReceipt {
                conversation_id: conversation,
                message_ids,
            }));
        }
    }

    /// 输入状态转发，不做持久化；只有目标标识非法时才回错误帧
    pub(crate) fn relay_typing(
        &self,
        sender: UserId,
        connection: &ConnectionHandle,
        target: TypingTarget,
        signal: TypingSignal,
    ) {
        let to = match UserId::parse(&target.to, "to") {
            Ok(to) => to,
            Err(err) => {
                connection.send(ServerFrame::error(400, err.to_string(), None));
                return;
            }
        };

        if let Some(recipient) = self.registry.lookup(to) {
            let notice = TypingNotice { to, from: sender };
            recipient.send(match signal {
                TypingSignal::Started => ServerFrame::Typing(notice),
                TypingSignal::Stopped => ServerFrame::StoppedTyping(notice),
            });
        }
    }
}
