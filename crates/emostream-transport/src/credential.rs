//! 访问令牌获取
//!
//! 令牌在每次建立连接前获取一次。HTTP 令牌端点返回：
//!
//! ```text
//! 200 { "accessToken": "<token>" }
//! 500 { "error": "<message>" }
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// 默认 API key 环境变量
pub const DEFAULT_API_KEY_VAR: &str = "HUME_API_KEY";

/// 短期访问令牌（Debug 输出打码）
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(***)")
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
    #[error("Token endpoint returned an empty token")]
    EmptyToken,
    #[error("Token endpoint error (HTTP {status}): {message}")]
    Endpoint { status: u16, message: String },
    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed token response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// 令牌提供者
pub trait CredentialProvider: Send {
    fn fetch(&self) -> Result<AccessToken, CredentialError>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Result<AccessToken, CredentialError> + Send,
{
    fn fetch(&self) -> Result<AccessToken, CredentialError> {
        self()
    }
}

/// 固定令牌
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: AccessToken,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

impl CredentialProvider for StaticCredential {
    fn fetch(&self) -> Result<AccessToken, CredentialError> {
        if self.token.as_str().is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        Ok(self.token.clone())
    }
}

/// 从环境变量读取 API key
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(DEFAULT_API_KEY_VAR)
    }
}

impl CredentialProvider for EnvCredential {
    fn fetch(&self) -> Result<AccessToken, CredentialError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(AccessToken::new(value.trim())),
            _ => Err(CredentialError::MissingEnv(self.var.clone())),
        }
    }
}

/// 通过 HTTP GET 从令牌端点获取
pub struct HttpCredentialProvider {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, CredentialError> {
        Self::with_timeout(url, Duration::from_secs(10))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, CredentialError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl CredentialProvider for HttpCredentialProvider {
    fn fetch(&self) -> Result<AccessToken, CredentialError> {
        debug!("Requesting access token from {}", self.url);
        let response = self.client.get(&self.url).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        parse_token_body(status, &body)
    }
}

/// 解析令牌端点的响应体
pub fn parse_token_body(status: u16, body: &str) -> Result<AccessToken, CredentialError> {
    let error_field = |value: &serde_json::Value| {
        value.get("error").and_then(|e| e.as_str()).map(str::to_string)
    };

    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| error_field(&v))
            .unwrap_or_else(|| body.trim().to_string());
        return Err(CredentialError::Endpoint { status, message });
    }

    let parsed: serde_json::Value = serde_json::from_str(body)?;
    if let Some(message) = error_field(&parsed) {
        return Err(CredentialError::Endpoint { status, message });
    }
    match parsed.get("accessToken").and_then(|t| t.as_str()) {
        Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
        _ => Err(CredentialError::EmptyToken),
    }
}
