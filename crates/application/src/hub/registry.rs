use dashmap::DashMap;
use domain::UserId;

use super::connection::{ConnectionHandle, ConnectionId};

/// 在线连接注册表：已认证用户到其当前连接的映射。
///
/// 每个用户至多一条记录，后注册的连接覆盖先前的记录。`DashMap` 的分段锁
/// 保证同一键上的读写可线性化，调用方无需额外加锁。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接，返回被替换的旧连接（若有）
    pub fn register(&self, user: UserId, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.insert(user, connection)
    }

    pub fn deregister(&self, user: UserId) -> Option<ConnectionHandle> {
        self.entries.remove(&user).map(|(_, handle)| handle)
    }

    /// 仅当记录仍指向 `connection` 时才移除，避免旧连接断开时把新连接一并摘掉
    pub fn deregister_connection(&self, user: UserId, connection: ConnectionId) -> bool {
        self.entries
            .remove_if(&user, |_, handle| handle.id() == connection)
            .is_some()
    }

    pub fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.entries.get(&user).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.entries.contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
