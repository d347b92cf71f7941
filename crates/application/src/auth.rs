use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

/// 令牌用途，对应声明中的 `type` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Refresh,
}

/// 通过校验的令牌声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    pub expires_at: i64,
    pub audience: String,
    pub issuer: String,
    pub purpose: TokenPurpose,
}

/// 访问令牌校验器。
///
/// 实现必须拒绝用途不是 `access`、受众或签发方不匹配、已过期或格式错误的
/// 令牌，失败一律返回 `ApplicationError::Authentication`。
#[cfg_attr(test, mockall::automock)]
pub trait AccessTokenVerifier: Send + Sync {
    fn verify_access_token(&self, raw: &str) -> Result<VerifiedToken, ApplicationError>;
}
