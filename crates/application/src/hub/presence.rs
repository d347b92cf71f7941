use domain::{Timestamp, UserId};

use super::protocol::{OfflineStatus, OnlinePresence, ServerFrame};
use super::Hub;
use crate::bounded::bounded;

impl Hub {
    pub(crate) async fn broadcast_online(&self, user: UserId) {
        self.notify_partners(user, ServerFrame::Online(OnlinePresence { user_id: user }))
            .await;
    }

    pub(crate) async fn broadcast_offline(&self, user: UserId, at: Timestamp) {
        let frame = ServerFrame::Offline(OfflineStatus {
            user_id: user,
            last_seen: at,
        });
        self.notify_partners(user, frame).await;
    }

    /// 尽力而为：查询失败只记录日志并放弃本次推送，不重试；离线的对方直接跳过
    async fn notify_partners(&self, user: UserId, frame: ServerFrame) {
        let partners = match bounded(
            "list conversation partners",
            self.storage_budget(),
            self.deps.conversation_repository.list_partners(user),
        )
        .await
        {
            Ok(partners) => partners,
            Err(err) => {
                tracing::warn!(user_id = %user, error = %err, frame = frame.tag(), "presence broadcast abandoned");
                return;
            }
        };

        let mut delivered = 0usize;
        for partner in partners {
            if let Some(connection) = self.registry.lookup(partner.id) {
                if connection.send(frame.clone()) {
                    delivered += 1;
                }
            }
        }
        tracing::debug!(user_id = %user, frame = frame.tag(), delivered, "presence broadcast");
    }
}
