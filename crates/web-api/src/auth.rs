//! JWT 认证模块
//!
//! 提供 HS256 token 生成与验证，实现应用层的 `TokenValidator`。

use application::{AuthError, TokenValidator};
use async_trait::async_trait;
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{Claims, CourierId, CustomerId, Role};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

/// token 中携带的声明
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    customer_id: Option<CustomerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    courier_id: Option<CourierId>,
    exp: i64, // 过期时间 (Unix timestamp)
}

impl From<TokenClaims> for Claims {
    fn from(value: TokenClaims) -> Self {
        Claims {
            identity: value.sub,
            role: value.role,
            customer_id: value.customer_id,
            courier_id: value.courier_id,
        }
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 为给定身份签发 token，有效期取配置的小时数
    pub fn generate_token(&self, claims: &Claims) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        self.encode_with_expiry(claims, exp.timestamp())
    }

    fn encode_with_expiry(&self, claims: &Claims, exp: i64) -> Result<String, AuthError> {
        let token_claims = TokenClaims {
            sub: claims.identity.clone(),
            role: claims.role,
            customer_id: claims.customer_id,
            courier_id: claims.courier_id,
            exp,
        };

        encode(&Header::default(), &token_claims, &self.encoding_key)
            .map_err(|err| AuthError::Invalid(format!("token generation failed: {err}")))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        decode::<TokenClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims.into())
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(err.to_string()),
            })
    }
}

#[async_trait]
impl TokenValidator for JwtService {
    async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_token(token)
    }
}

/// 从 `Authorization: Bearer <token>` 头中取出 token
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthError::Invalid("invalid authorization header format".to_string()))
}
