//! 领域模型错误定义
//!
//! `DomainError` 描述业务规则层面的失败，`RepositoryError` 描述存储协作方
//! 返回的失败，二者都由上层映射为对外可见的错误。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("user not found")]
    UserNotFound,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("conversation already exists")]
    ConversationAlreadyExists,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 存储层错误
///
/// 与具体数据库无关：唯一约束冲突映射为 `AlreadyExists`，外键约束映射为
/// `ConstraintViolation`，其余一律归为 `Storage`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("resource not found")]
    NotFound,

    #[error("resource already exists")]
    AlreadyExists,

    #[error("operation violated a storage constraint")]
    ConstraintViolation,

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<DomainError> for RepositoryError {
    /// 存储中的数据无法还原为领域对象，视为存储故障
    fn from(err: DomainError) -> Self {
        Self::storage(err.to_string())
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
