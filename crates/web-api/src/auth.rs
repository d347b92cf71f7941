//! JWT 认证模块
//!
//! 访问令牌与刷新令牌使用不同的密钥签名，声明中的 `type` 区分用途。
//! `JwtService` 同时实现应用层的 [`AccessTokenVerifier`]，供连接握手使用。

use application::{AccessTokenVerifier, ApplicationError, TokenPurpose, VerifiedToken};
use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use config::JwtConfig;
use domain::{User, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub purpose: TokenPurpose,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// JWT Token 服务
pub struct JwtService {
    config: JwtConfig,
    access: KeyPair,
    refresh: KeyPair,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let access = KeyPair::from_secret(&config.access_secret);
        let refresh = KeyPair::from_secret(&config.refresh_secret);
        Self {
            config,
            access,
            refresh,
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::hours(self.config.refresh_ttl_hours)
    }

    pub fn issue_access(&self, user: UserId) -> Result<String, ApiError> {
        self.issue(
            user,
            TokenPurpose::Access,
            Duration::hours(self.config.access_ttl_hours),
        )
    }

    pub fn issue_refresh(&self, user: UserId) -> Result<String, ApiError> {
        self.issue(user, TokenPurpose::Refresh, self.refresh_ttl())
    }

    fn issue(&self, user: UserId, purpose: TokenPurpose, ttl: Duration) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.to_string(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            purpose,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.keys(purpose).encoding)
            .map_err(|err| {
                tracing::error!(error = %err, "token generation failed");
                ApiError::internal_server_error("token generation failed")
            })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, ApplicationError> {
        self.verify(token, TokenPurpose::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, ApplicationError> {
        self.verify(token, TokenPurpose::Refresh)
    }

    fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<Claims, ApplicationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let claims = decode::<Claims>(token, &self.keys(purpose).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                ApplicationError::Authentication
            })?;

        if claims.purpose != purpose {
            return Err(ApplicationError::Authentication);
        }
        Ok(claims)
    }

    fn keys(&self, purpose: TokenPurpose) -> &KeyPair {
        match purpose {
            TokenPurpose::Access => &self.access,
            TokenPurpose::Refresh => &self.refresh,
        }
    }

    /// 从 `Authorization: Bearer` 头中提取并校验访问令牌
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        let claims = self.verify_access(token)?;
        UserId::parse(&claims.sub, "sub").map_err(|_| ApiError::unauthorized("Invalid token subject"))
    }
}

impl AccessTokenVerifier for JwtService {
    fn verify_access_token(&self, raw: &str) -> Result<VerifiedToken, ApplicationError> {
        let claims = self.verify_access(raw)?;
        Ok(VerifiedToken {
            subject: claims.sub,
            expires_at: claims.exp,
            audience: claims.aud,
            issuer: claims.iss,
            purpose: claims.purpose,
        })
    }
}

/// 登录、注册与刷新的响应结构
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,
}
