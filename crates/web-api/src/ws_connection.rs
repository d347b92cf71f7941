use std::sync::Arc;

use application::{FrameSource, Hub, Outbound};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 写操作命令
///
/// 读取端需要回应 ping，但 sender 由写任务独占，因此经由命令通道转交
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}

/// 把一个已升级的 WebSocket 接入连接中心。
///
/// 写任务独占 sender，消费连接中心的写队列；当前任务读取客户端帧并交给
/// [`Hub::drive`]，直到客户端断开或握手失败。
pub async fn serve_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (session, outbound) = hub.accept();
    let connection = session.connection().id();
    tracing::info!(connection = %connection, "websocket connected");

    let (sender, incoming) = socket.split();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();

    let send_task = tokio::spawn(write_loop(sender, outbound, cmd_rx));

    hub.drive(
        session,
        SocketFrames {
            incoming,
            commands: cmd_tx,
        },
    )
    .await;

    if let Err(err) = send_task.await {
        tracing::warn!(connection = %connection, error = %err, "websocket writer task failed");
    }
    tracing::info!(connection = %connection, "websocket closed");
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
) {
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Frame(frame)) => {
                    let payload = match frame.to_json() {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, frame = frame.tag(), "failed to serialize websocket payload");
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        tracing::warn!("failed to send text message");
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
                None => break,
            },
            Some(cmd) = commands.recv() => match cmd {
                WsCommand::SendPong(data) => {
                    if sender.send(WsMessage::Pong(data)).await.is_err() {
                        tracing::warn!("failed to send pong message");
                        break;
                    }
                }
            },
        }
    }
    let _ = sender.close().await;
}

/// 客户端文本帧的来源，顺带处理控制帧
struct SocketFrames {
    incoming: SplitStream<WebSocket>,
    commands: mpsc::UnboundedSender<WsCommand>,
}

#[async_trait]
impl FrameSource for SocketFrames {
    async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.incoming.next().await? {
                Ok(WsMessage::Text(text)) => return Some(text.as_str().to_owned()),
                Ok(WsMessage::Close(_)) => {
                    tracing::debug!("client sent close frame");
                    return None;
                }
                Ok(WsMessage::Ping(data)) => {
                    let _ = self.commands.send(WsCommand::SendPong(data));
                }
                Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Binary(_)) => {
                    tracing::debug!("ignoring binary websocket frame");
                }
                Err(err) => {
                    tracing::debug!(error = %err, "websocket read failed");
                    return None;
                }
            }
        }
    }
}
