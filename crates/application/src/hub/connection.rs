use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::protocol::ServerFrame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的连接标识，用于区分同一用户的新旧连接
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// 发往传输层写任务的指令
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ServerFrame),
    Close,
}

/// 单条实时连接的发送端句柄。
///
/// 句柄只负责把帧投递到传输层的写队列，写队列无界，投递不会阻塞调用方。
/// 连接本身由传输层持有，注册表只保存句柄的克隆。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// 创建句柄以及传输层消费的接收端
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 投递一帧；传输层已经关闭时返回 `false`
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.sender.send(Outbound::Frame(frame)).is_ok()
    }

    /// 要求传输层在写完已排队的帧后关闭连接
    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}
