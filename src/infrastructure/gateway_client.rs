//! 网关 HTTP 客户端 - 基础设施层
//!
//! 持有唯一的 `reqwest::Client`（内部连接池），只暴露"发请求、拆信封"的能力

use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::models::{ApiEnvelope, ApiFailure};

/// 网关响应：信封里的业务数据 + 分页用的 Link 头
#[derive(Debug, Clone)]
pub struct GatewayResponse<T> {
    pub body: T,
    pub link_header: Option<String>,
}

/// 网关客户端
///
/// 职责：
/// - 持有唯一的 Client 资源
/// - 统一鉴权头、超时和状态码映射
/// - 不认识 Canvas / Moodle / 批改任务
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    /// 创建新的网关客户端
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ApiError::transport(&base_url, e))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 拼接完整 URL，已经是绝对地址的（如 Link 头里的下一页）原样返回
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GET 请求
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<GatewayResponse<T>, ApiError> {
        let mut request = self.client.get(self.url(path));
        if !query.is_empty() {
            request = request.query(query);
        }
        self.send(path, request, bearer).await
    }

    /// POST JSON 请求
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<GatewayResponse<T>, ApiError> {
        let request = self.client.post(self.url(path)).json(body);
        self.send(path, request, bearer).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        mut request: RequestBuilder,
        bearer: Option<&str>,
    ) -> Result<GatewayResponse<T>, ApiError> {
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        debug!("📡 请求网关: {}", endpoint);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    endpoint: endpoint.to_string(),
                }
            } else {
                ApiError::transport(endpoint, e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::transport(endpoint, e))?;

        if !status.is_success() {
            let err = classify_status(endpoint, status, retry_after_secs(&headers), &text);
            warn!("⚠️ 网关返回 HTTP {} ({})", status.as_u16(), endpoint);
            return Err(err);
        }

        let envelope: ApiEnvelope<T> =
            serde_json::from_str(&text).map_err(|e| ApiError::decode(endpoint, e))?;
        let body = envelope.into_result(endpoint)?;

        Ok(GatewayResponse {
            body,
            link_header: header_string(&headers, LINK),
        })
    }
}

/// 把非 2xx 状态码映射为 [`ApiError`]
///
/// - 401 → Unauthorized，403 → Forbidden，404 → NotFound
/// - 429 → RateLimited（带 Retry-After 秒数）
/// - 5xx → ServerError
/// - 其他 4xx：响应体是错误信封时为 Rejected，否则为 BadResponse
fn classify_status(
    endpoint: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> ApiError {
    let endpoint = endpoint.to_string();
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized { endpoint },
        StatusCode::FORBIDDEN => ApiError::Forbidden { endpoint },
        StatusCode::NOT_FOUND => ApiError::NotFound { endpoint },
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            endpoint,
            retry_after,
        },
        s if s.is_server_error() => ApiError::ServerError {
            endpoint,
            status: s.as_u16(),
        },
        s => match serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body) {
            Ok(ApiEnvelope::Error(ApiFailure { message, code })) => ApiError::Rejected {
                endpoint,
                code,
                message: message.unwrap_or_else(|| format!("HTTP {}", s.as_u16())),
            },
            _ => ApiError::BadResponse {
                endpoint,
                status: s.as_u16(),
                message: (!body.trim().is_empty()).then(|| body.trim().to_string()),
            },
        },
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    header_string(headers, RETRY_AFTER).and_then(|v| v.trim().parse().ok())
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
