//! 实时连接的线上协议。
//!
//! 每一帧都是 `{"type": <tag>, "message": <object>}`。解码分两步：先读出标签，
//! 再按标签解析对应的负载结构，未知标签解析为 `ClientFrame::Unknown` 而不是错误。

use domain::{ConversationPartner, MessageId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const TAG_CHAT: &str = "CHAT";
pub const TAG_MARK_AS_READ: &str = "MARK_AS_READ";
pub const TAG_TYPING: &str = "TYPING";
pub const TAG_STOPPED_TYPING: &str = "STOPPED_TYPING";

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    tag: Option<String>,
    #[serde(default)]
    message: Value,
}

/// 客户端发送聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatSend {
    pub to: String,
    pub from: String,
    pub content: String,
    #[serde(rename = "tempID")]
    pub temp_id: String,
}

/// 客户端把会话中对方发来的消息标记为已读
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkRead {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "messageOwnerID")]
    pub message_owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingTarget {
    pub to: String,
}

/// 认证后的入站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Chat(ChatSend),
    MarkRead(MarkRead),
    Typing(TypingTarget),
    StoppedTyping(TypingTarget),
    /// 未识别的标签，按前向兼容处理，直接忽略
    Unknown(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("invalid {tag} payload: {reason}")]
    Payload {
        tag: &'static str,
        reason: String,
        temp_id: Option<String>,
    },
}

impl ProtocolError {
    /// 能从原始负载中取到的 `tempID`，便于客户端关联错误
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            ProtocolError::Payload { temp_id, .. } => temp_id.as_deref(),
            ProtocolError::Malformed(_) => None,
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    tag: &'static str,
    message: Value,
) -> Result<T, ProtocolError> {
    let temp_id = message
        .get("tempID")
        .and_then(Value::as_str)
        .map(str::to_owned);
    serde_json::from_value(message).map_err(|err| ProtocolError::Payload {
        tag,
        reason: err.to_string(),
        temp_id,
    })
}

impl ClientFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: RawEnvelope =
            serde_json::from_str(text).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
        let tag = envelope
            .tag
            .ok_or_else(|| ProtocolError::Malformed("missing `type`".to_string()))?;

        match tag.as_str() {
            TAG_CHAT => payload(TAG_CHAT, envelope.message).map(ClientFrame::Chat),
            TAG_MARK_AS_READ => {
                payload(TAG_MARK_AS_READ, envelope.message).map(ClientFrame::MarkRead)
            }
            TAG_TYPING => payload(TAG_TYPING, envelope.message).map(ClientFrame::Typing),
            TAG_STOPPED_TYPING => {
                payload(TAG_STOPPED_TYPING, envelope.message).map(ClientFrame::StoppedTyping)
            }
            _ => Ok(ClientFrame::Unknown(tag)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    message: AuthPayload,
}

#[derive(Debug, Deserialize)]
struct AuthPayload {
    token: String,
}

/// 解析连接上的第一帧 `{"message": {"token": ...}}`，`type` 字段即使存在也被忽略
pub fn decode_auth_token(text: &str) -> Result<String, ProtocolError> {
    let envelope: AuthEnvelope =
        serde_json::from_str(text).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    let token = envelope.message.token.trim().to_owned();
    if token.is_empty() {
        return Err(ProtocolError::Malformed("empty token".to_string()));
    }
    Ok(token)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Welcome {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub reason: String,
    pub code: u16,
    #[serde(rename = "tempID", skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryAck {
    #[serde(rename = "recipientID")]
    pub recipient_id: UserId,
    #[serde(rename = "tempID")]
    pub temp_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    pub id: MessageId,
}

/// 转发给接收方的完整消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatDelivery {
    pub id: MessageId,
    pub to: UserId,
    pub from: UserId,
    pub content: String,
    #[serde(rename = "tempID")]
    pub temp_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlinePresence {
    #[serde(rename = "userID")]
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineStatus {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "lastSeen")]
    pub last_seen: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadReceipt {
    #[serde(rename = "conversationID")]
    pub conversation_id: domain::ConversationId,
    #[serde(rename = "messageIDs")]
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingNotice {
    pub to: UserId,
    pub from: UserId,
}

/// 会话对方及其在线状态；既用于会话列表，也作为 `CONVO_CREATED` 的负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    pub user_data: ConversationPartner,
    pub is_online: bool,
}

/// 服务端发出的帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum ServerFrame {
    #[serde(rename = "WELCOME")]
    Welcome(Welcome),
    #[serde(rename = "ERR")]
    Error(ErrorPayload),
    #[serde(rename = "ACK_MSG_DELIVERED")]
    Ack(DeliveryAck),
    #[serde(rename = "CHAT")]
    Chat(ChatDelivery),
    #[serde(rename = "ONLINE_PRESENCE")]
    Online(OnlinePresence),
    #[serde(rename = "OFFLINE_STATUS")]
    Offline(OfflineStatus),
    #[serde(rename = "MSG_READ")]
    Read(ReadReceipt),
    #[serde(rename = "TYPING")]
    Typing(TypingNotice),
    #[serde(rename = "STOPPED_TYPING")]
    StoppedTyping(TypingNotice),
    #[serde(rename = "CONVO_CREATED")]
    ConversationCreated(ConversationView),
}

impl ServerFrame {
    pub fn welcome() -> Self {
        ServerFrame::Welcome(Welcome {})
    }

    pub fn error(code: u16, reason: impl Into<String>, temp_id: Option<String>) -> Self {
        ServerFrame::Error(ErrorPayload {
            reason: reason.into(),
            code,
            temp_id,
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ServerFrame::Welcome(_) => "WELCOME",
            ServerFrame::Error(_) => "ERR",
            ServerFrame::Ack(_) => "ACK_MSG_DELIVERED",
            ServerFrame::Chat(_) => TAG_CHAT,
            ServerFrame::Online(_) => "ONLINE_PRESENCE",
            ServerFrame::Offline(_) => "OFFLINE_STATUS",
            ServerFrame::Read(_) => "MSG_READ",
            ServerFrame::Typing(_) => TAG_TYPING,
            ServerFrame::StoppedTyping(_) => TAG_STOPPED_TYPING,
            ServerFrame::ConversationCreated(_) => "CONVO_CREATED",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
