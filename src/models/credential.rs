//! 凭据与会话

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, ConnectionError};

/// 支持的 LMS 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Canvas,
    Moodle,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Canvas, ProviderKind::Moodle];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Canvas => "canvas",
            ProviderKind::Moodle => "moodle",
        }
    }

    /// 网关上该 LMS 的路径前缀
    pub fn path_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Canvas => "/canvas",
            ProviderKind::Moodle => "/moodle",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "canvas" => Ok(ProviderKind::Canvas),
            "moodle" => Ok(ProviderKind::Moodle),
            other => Err(ConfigError::UnknownProvider {
                value: other.to_string(),
            }),
        }
    }
}

/// LMS 凭据
///
/// 只在会话存储中落盘，用于恢复会话；`Debug` 输出不包含 token。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub provider: ProviderKind,
    /// LMS 实例地址，例如 https://school.instructure.com
    pub endpoint: String,
    /// API token
    pub token: String,
}

impl Credential {
    pub fn new(provider: ProviderKind, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// 本地校验凭据格式，不发网络请求
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.token.trim().is_empty() {
            return Err(ConnectionError::InvalidCredential {
                reason: "token 为空".to_string(),
            });
        }
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConnectionError::InvalidCredential {
                reason: "LMS 地址为空".to_string(),
            });
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConnectionError::InvalidCredential {
                reason: format!("LMS 地址必须以 http:// 或 https:// 开头: {}", endpoint),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("token", &"***")
            .finish()
    }
}

/// 已建立的 LMS 会话
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub provider: ProviderKind,
    pub endpoint: String,
    access_token: String,
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        provider: ProviderKind,
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            provider,
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            user_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user_name(mut self, user_name: Option<String>) -> Self {
        self.user_name = user_name;
        self
    }

    /// 网关下发的会话 token，所有后续请求都用它鉴权
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("user_name", &self.user_name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
