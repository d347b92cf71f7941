use std::sync::Arc;

use application::{
    Clock, ConversationRepository, ConversationService, ConversationServiceDependencies, Hub,
    HubDependencies, MessageRepository, PasswordHasher, SystemClock, UserRepository, UserService,
    UserServiceDependencies,
};
use config::AppConfig;

use crate::auth::JwtService;

/// 存储后端提供的仓储集合，Postgres 与内存实现均可
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub user_service: Arc<UserService>,
    pub conversation_service: Arc<ConversationService>,
    pub jwt_service: Arc<JwtService>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    /// 组装连接中心与用例服务，三者共享同一个在线连接注册表
    pub fn assemble(
        config: &AppConfig,
        repositories: Repositories,
        password_hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
        let storage_timeout = config.hub.storage_timeout();

        let hub = Arc::new(Hub::new(HubDependencies {
            user_repository: repositories.users.clone(),
            conversation_repository: repositories.conversations.clone(),
            message_repository: repositories.messages.clone(),
            token_verifier: jwt_service.clone(),
            clock: clock.clone(),
            config: config.hub.clone(),
        }));

        let user_service = UserService::new(UserServiceDependencies {
            user_repository: repositories.users.clone(),
            password_hasher,
            clock: clock.clone(),
            registry: hub.registry().clone(),
            storage_timeout,
        });

        let conversation_service = ConversationService::new(ConversationServiceDependencies {
            conversation_repository: repositories.conversations,
            message_repository: repositories.messages,
            user_repository: repositories.users,
            clock,
            registry: hub.registry().clone(),
            storage_timeout,
        });

        Self {
            hub,
            user_service: Arc::new(user_service),
            conversation_service: Arc::new(conversation_service),
            jwt_service,
            allowed_origins: Arc::new(config.server.allowed_origins.clone()),
        }
    }
}
