use std::sync::Arc;
use std::time::Duration;

use domain::{
    ChatMessage, Conversation, ConversationId, ConversationPartner, DomainError, RepositoryError,
    UserId,
};

use crate::{
    bounded::bounded,
    clock::Clock,
    error::ApplicationError,
    hub::{protocol::ConversationView, ConnectionRegistry, ServerFrame},
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

/// 历史消息单次返回上限
pub const HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    /// 发起方，必须是当前认证用户
    pub user1: UserId,
    pub user2: UserId,
}

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<ConnectionRegistry>,
    pub storage_timeout: Duration,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 创建会话；对方在线时推送 `CONVO_CREATED`
    pub async fn create(
        &self,
        requester: UserId,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApplicationError> {
        if request.user1 != requester {
            return Err(DomainError::invalid_argument(
                "user1",
                "must be the authenticated user",
            )
            .into());
        }

        let initiator = bounded(
            "find user",
            self.deps.storage_timeout,
            self.deps.user_repository.find_by_id(requester),
        )
        .await?
        .ok_or(DomainError::UserNotFound)?;

        let conversation = Conversation::start(
            ConversationId::generate(),
            request.user1,
            request.user2,
            self.deps.clock.now(),
        )?;

        let created = bounded(
            "create conversation",
            self.deps.storage_timeout,
            self.deps.conversation_repository.create(conversation),
        )
        .await
        .map_err(|err| match err {
            ApplicationError::Repository(RepositoryError::AlreadyExists) => {
                DomainError::ConversationAlreadyExists.into()
            }
            ApplicationError::Repository(RepositoryError::ConstraintViolation) => {
                DomainError::invalid_argument("user2", "unknown user").into()
            }
            other => other,
        })?;

        if let Some(partner) = self.deps.registry.lookup(request.user2) {
            partner.send(ServerFrame::ConversationCreated(ConversationView {
                user_data: ConversationPartner::from_user(&initiator, created.id),
                is_online: self.deps.registry.is_online(requester),
            }));
        }
        tracing::info!(conversation_id = %created.id, user1 = %created.user1, user2 = %created.user2, "conversation created");

        Ok(created)
    }

    /// 当前用户的会话列表，附带对方在线状态
    pub async fn list(&self, requester: UserId) -> Result<Vec<ConversationView>, ApplicationError> {
        let partners = bounded(
            "list conversation partners",
            self.deps.storage_timeout,
            self.deps.conversation_repository.list_partners(requester),
        )
        .await?;

        Ok(partners
            .into_iter()
            .map(|partner| ConversationView {
                is_online: self.deps.registry.is_online(partner.id),
                user_data: partner,
            })
            .collect())
    }

    /// 与 `with` 之间会话的最近消息
    pub async fn history(
        &self,
        requester: UserId,
        with: UserId,
    ) -> Result<Vec<ChatMessage>, ApplicationError> {
        let conversation = bounded(
            "find conversation",
            self.deps.storage_timeout,
            self.deps.conversation_repository.find_by_members(requester, with),
        )
        .await?
        .ok_or(DomainError::ConversationNotFound)?;

        bounded(
            "list messages",
            self.deps.storage_timeout,
            self.deps
                .message_repository
                .list_by_conversation(conversation.id, HISTORY_LIMIT),
        )
        .await
    }
}
