mod conversation_service;
mod user_service;

pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
    HISTORY_LIMIT,
};
pub use user_service::{
    AuthenticateUserRequest, RegisterUserRequest, UserService, UserServiceDependencies,
    UserSummary, SEARCH_LIMIT,
};
