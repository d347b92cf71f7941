use domain::UserId;

use super::connection::ConnectionHandle;
use super::protocol::{ClientFrame, ServerFrame};
use super::relay::TypingSignal;
use super::Hub;

impl Hub {
    /// 已认证连接的入站帧分发。解码失败只影响当前帧，连接保持可用。
    pub async fn dispatch(&self, user: UserId, connection: &ConnectionHandle, text: &str) {
        let frame = match ClientFrame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(user_id = %user, error = %err, "undecodable frame");
                connection.send(ServerFrame::error(
                    400,
                    err.to_string(),
                    err.temp_id().map(str::to_owned),
                ));
                return;
            }
        };

        match frame {
            ClientFrame::Chat(chat) => self.deliver_chat(user, connection, chat).await,
            ClientFrame::MarkRead(request) => self.mark_read(user, request).await,
            ClientFrame::Typing(target) => {
                self.relay_typing(user, connection, target, TypingSignal::Started)
            }
            ClientFrame::StoppedTyping(target) => {
                self.relay_typing(user, connection, target, TypingSignal::Stopped)
            }
            ClientFrame::Unknown(tag) => {
                tracing::debug!(user_id = %user, tag = %tag, "ignoring unknown frame type");
            }
        }
    }
}
