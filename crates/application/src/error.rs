use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::password::PasswordHasherError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("authentication failed")]
    Authentication,
    /// 存储调用超出时间预算，按存储内部故障处理
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 是否属于存储侧的内部故障（含超时）
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ApplicationError::Repository(RepositoryError::Storage { .. })
                | ApplicationError::Timeout { .. }
                | ApplicationError::Infrastructure(_)
                | ApplicationError::Password(_)
        )
    }

    /// 对外使用的 HTTP 语义状态码，同时用于实时协议的 `ERR.code`
    pub fn status_code(&self) -> u16 {
        match self {
            ApplicationError::Domain(DomainError::InvalidArgument { .. }) => 400,
            ApplicationError::Domain(
                DomainError::UserNotFound | DomainError::ConversationNotFound,
            ) => 404,
            ApplicationError::Domain(
                DomainError::UserAlreadyExists | DomainError::ConversationAlreadyExists,
            ) => 409,
            ApplicationError::Repository(RepositoryError::NotFound) => 404,
            ApplicationError::Repository(RepositoryError::AlreadyExists) => 409,
            ApplicationError::Repository(RepositoryError::ConstraintViolation) => 400,
            ApplicationError::Authentication => 401,
            _ => 500,
        }
    }
}
