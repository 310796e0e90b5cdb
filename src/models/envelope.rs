//! 网关响应信封
//!
//! 所有网关响应都带 `status` 字段：`success` 时其余字段是业务数据，
//! `error` 时带 `message` 和可选的 `code`。在边界处一次性解析，业务代码只看到 `Result`。

use serde::Deserialize;

use super::wire::deserialize_opt_id;
use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiEnvelope<T> {
    Success(T),
    Error(ApiFailure),
}

/// 网关报告的业务错误
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiFailure {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub code: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self, endpoint: &str) -> Result<T, ApiError> {
        match self {
            ApiEnvelope::Success(body) => Ok(body),
            ApiEnvelope::Error(failure) => Err(ApiError::Rejected {
                endpoint: endpoint.to_string(),
                code: failure.code,
                message: failure
                    .message
                    .unwrap_or_else(|| "网关未返回错误信息".to_string()),
            }),
        }
    }
}
