//! 客户端层：每个后端一个实现
//!
//! - [`LmsProvider`]：LMS 能力接口，Canvas 和 Moodle 各一个实现，由配置选择
//! - [`GradingBackend`]：批改后端接口，只有一个 HTTP 实现
//!
//! 服务层只依赖这两个 trait，测试里用内存实现替换。

pub mod canvas_client;
pub mod grading_client;
pub mod moodle_client;

pub use canvas_client::CanvasClient;
pub use grading_client::HttpGradingBackend;
pub use moodle_client::MoodleClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::error::ApiError;
use crate::infrastructure::GatewayClient;
use crate::models::wire::deserialize_id;
use crate::models::{
    Assignment, Course, Credential, DownloadReceipt, DownloadRequest, GradeRequest,
    JobStatusReport, Page, PageCursor, ProviderKind, RawGradingResult, RemoteSubmission, Session,
};

/// LMS 能力接口
///
/// 分页由调用方驱动：传入上一页返回的游标，拿到下一页。
#[async_trait]
pub trait LmsProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// 用凭据换取会话，不做重试
    async fn connect(&self, credential: &Credential) -> Result<Session, ApiError>;

    async fn courses_page(
        &self,
        session: &Session,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Course>, ApiError>;

    async fn assignments_page(
        &self,
        session: &Session,
        course_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Assignment>, ApiError>;

    /// 列出作业下的全部提交
    async fn list_submissions(
        &self,
        session: &Session,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<RemoteSubmission>, ApiError>;

    /// 下载单个提交的附件
    async fn download_submission(
        &self,
        session: &Session,
        request: &DownloadRequest,
    ) -> Result<DownloadReceipt, ApiError>;
}

/// 批改后端接口
#[async_trait]
pub trait GradingBackend: Send + Sync {
    /// 提交批改任务，立即返回任务 id
    async fn submit_job(&self, session: &Session, request: &GradeRequest) -> Result<String, ApiError>;

    async fn job_status(&self, session: &Session, job_id: &str) -> Result<JobStatusReport, ApiError>;

    async fn job_results(
        &self,
        session: &Session,
        job_id: &str,
    ) -> Result<Vec<RawGradingResult>, ApiError>;
}

const SUPPORTED_PROVIDER_KEYS: [&str; 2] = [
    ProviderKind::Canvas.as_str(),
    ProviderKind::Moodle.as_str(),
];

pub fn supported_provider_keys() -> &'static [&'static str] {
    &SUPPORTED_PROVIDER_KEYS
}

/// 按配置的 LMS 类型创建客户端
pub fn build_lms_provider(kind: ProviderKind, gateway: GatewayClient) -> Arc<dyn LmsProvider> {
    match kind {
        ProviderKind::Canvas => Arc::new(CanvasClient::new(gateway)),
        ProviderKind::Moodle => Arc::new(MoodleClient::new(gateway)),
    }
}

// ========== 两个 LMS 共用的翻页与连接、下载协议 ==========

/// 提交列表最多翻的页数
pub(crate) const MAX_SUBMISSION_PAGES: usize = 200;

/// 从第一页开始翻到底
///
/// 游标重复或超过 `max_pages` 页时返回 [`ApiError::Pagination`]，不返回不完整的列表。
pub(crate) async fn collect_pages<T, F, Fut>(
    endpoint: &str,
    max_pages: usize,
    mut fetch: F,
) -> Result<Vec<T>, ApiError>
where
    F: FnMut(Option<PageCursor>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<PageCursor>), ApiError>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<PageCursor> = None;
    for pages in 1..=max_pages {
        let (page, next) = fetch(cursor.clone()).await?;
        items.extend(page);
        match next {
            None => return Ok(items),
            Some(next) if cursor.as_ref() == Some(&next) => {
                return Err(ApiError::Pagination {
                    endpoint: endpoint.to_string(),
                    pages,
                    reason: format!("游标没有前进: {}", next.as_str()),
                });
            }
            Some(next) => cursor = Some(next),
        }
    }
    Err(ApiError::Pagination {
        endpoint: endpoint.to_string(),
        pages: max_pages,
        reason: format!("超过 {} 页上限", max_pages),
    })
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    provider: ProviderKind,
    endpoint: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
struct ConnectBody {
    session: WireSession,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSession {
    #[serde(alias = "id", alias = "session_id", deserialize_with = "deserialize_id")]
    session_id: String,
    #[serde(default, alias = "access_token", alias = "token")]
    access_token: Option<String>,
    #[serde(default, alias = "user_name", alias = "name")]
    user_name: Option<String>,
}

/// POST {prefix}/connect
///
/// 网关没有下发独立 token 时，后续请求沿用 LMS token。
pub(crate) async fn connect_via_gateway(
    gateway: &GatewayClient,
    kind: ProviderKind,
    credential: &Credential,
) -> Result<Session, ApiError> {
    let path = format!("{}/connect", kind.path_prefix());
    let request = ConnectRequest {
        provider: kind,
        endpoint: credential.endpoint.trim(),
        token: &credential.token,
    };
    let response = gateway.post::<_, ConnectBody>(&path, &request, None).await?;
    let wire = response.body.session;

    let token = wire
        .access_token
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| credential.token.clone());
    Ok(Session::new(wire.session_id, kind, credential.endpoint.trim(), token).with_user_name(wire.user_name))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncBody {
    #[serde(default, alias = "sync_job_id", deserialize_with = "crate::models::wire::deserialize_opt_id")]
    sync_job_id: Option<String>,
    #[serde(default)]
    summary: SyncBodySummary,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncBodySummary {
    #[serde(default, alias = "attachment_count", alias = "downloaded")]
    attachment_count: usize,
    #[serde(default)]
    files: Vec<String>,
}

/// POST {prefix}/sync，下载单个提交
pub(crate) async fn download_via_gateway(
    gateway: &GatewayClient,
    kind: ProviderKind,
    session: &Session,
    request: &DownloadRequest,
) -> Result<DownloadReceipt, ApiError> {
    let path = format!("{}/sync", kind.path_prefix());
    let response = gateway
        .post::<_, SyncBody>(&path, request, Some(session.access_token()))
        .await?;
    let body = response.body;

    Ok(DownloadReceipt {
        sync_job_id: body.sync_job_id,
        attachment_count: body.summary.attachment_count.max(body.summary.files.len()),
        files: body.summary.files,
    })
}
