//! 错误类型
//!
//! 每个阶段一个错误枚举，由 [`AppError`] 统一包装。
//! 可以重试或计入统计的错误在本地消化，影响最终报告正确性的错误一律向上返回。

use thiserror::Error;

use crate::models::SyncStatus;
use crate::workflow::WorkflowStage;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 网关调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),
    /// 连接 LMS 失败
    #[error("连接错误: {0}")]
    Connection(#[from] ConnectionError),
    /// 课程 / 作业目录错误
    #[error("目录错误: {0}")]
    Catalog(#[from] CatalogError),
    /// 提交同步错误
    #[error("同步错误: {0}")]
    Sync(#[from] SyncError),
    /// 选择集错误
    #[error("选择错误: {0}")]
    Selection(#[from] SelectionError),
    /// 批改任务派发错误
    #[error("派发错误: {0}")]
    Dispatch(#[from] DispatchError),
    /// 任务轮询错误
    #[error("轮询错误: {0}")]
    Poll(#[from] PollError),
    /// 流程跳转被拒绝
    #[error("流程错误: {0}")]
    Transition(#[from] TransitionError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 会话存储错误
    #[error("会话存储错误: {0}")]
    SessionStore(#[from] SessionStoreError),
}

/// 网关调用错误
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 网络请求失败（连接被拒、DNS 等）
    #[error("API请求失败 ({endpoint}): {message}")]
    Transport { endpoint: String, message: String },
    /// 请求超时
    #[error("API请求超时: {endpoint}")]
    Timeout { endpoint: String },
    /// 401
    #[error("API未授权: {endpoint}")]
    Unauthorized { endpoint: String },
    /// 403
    #[error("API拒绝访问: {endpoint}")]
    Forbidden { endpoint: String },
    /// 404
    #[error("API资源不存在: {endpoint}")]
    NotFound { endpoint: String },
    /// 请求频率限制
    #[error("API请求频率限制 ({endpoint}), 建议等待: {retry_after:?}秒")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },
    /// 5xx
    #[error("API服务端错误 ({endpoint}): HTTP {status}")]
    ServerError { endpoint: String, status: u16 },
    /// 其他非成功状态码
    #[error("API返回错误响应 ({endpoint}): HTTP {status}, message={message:?}")]
    BadResponse {
        endpoint: String,
        status: u16,
        message: Option<String>,
    },
    /// 响应 status 字段为 error
    #[error("API拒绝请求 ({endpoint}): code={code:?}, message={message}")]
    Rejected {
        endpoint: String,
        code: Option<String>,
        message: String,
    },
    /// JSON 解析失败
    #[error("JSON解析失败 ({endpoint}): {message}")]
    Decode { endpoint: String, message: String },
    /// 翻页超过上限或游标不前进
    #[error("分页未结束 ({endpoint}): 已读取 {pages} 页, {reason}")]
    Pagination {
        endpoint: String,
        pages: usize,
        reason: String,
    },
}

impl ApiError {
    /// 创建网络请求失败错误
    pub fn transport(endpoint: impl Into<String>, source: impl std::fmt::Display) -> Self {
        ApiError::Transport {
            endpoint: endpoint.into(),
            message: source.to_string(),
        }
    }

    /// 创建 JSON 解析错误
    pub fn decode(endpoint: impl Into<String>, source: impl std::fmt::Display) -> Self {
        ApiError::Decode {
            endpoint: endpoint.into(),
            message: source.to_string(),
        }
    }

    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Transport { .. }
                | ApiError::Timeout { .. }
                | ApiError::RateLimited { .. }
                | ApiError::ServerError { .. }
        )
    }

    /// 网关返回的机器可读错误码
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// 连接错误，对当前阶段是致命的
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// 凭据无效
    #[error("凭据无效: {reason}")]
    InvalidCredential { reason: String },
    /// 网络不可达
    #[error("网络错误: {message}")]
    Network { message: String },
    /// 账号没有所需权限
    #[error("权限不足: {message}")]
    Permission { message: String },
}

impl From<ApiError> for ConnectionError {
    fn from(err: ApiError) -> Self {
        match &err {
            ApiError::Unauthorized { .. } => ConnectionError::InvalidCredential {
                reason: err.to_string(),
            },
            ApiError::Forbidden { .. } => ConnectionError::Permission {
                message: err.to_string(),
            },
            ApiError::Rejected { code, message, .. } => match code.as_deref() {
                Some("invalid_credential") | Some("invalid_token") => {
                    ConnectionError::InvalidCredential {
                        reason: message.clone(),
                    }
                }
                Some("permission_denied") | Some("forbidden") => ConnectionError::Permission {
                    message: message.clone(),
                },
                _ => ConnectionError::Network {
                    message: err.to_string(),
                },
            },
            _ => ConnectionError::Network {
                message: err.to_string(),
            },
        }
    }
}

/// 目录错误：部分结果可接受，完全失败才返回
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// 第一页就拉取失败
    #[error("拉取{resource}失败: {source}")]
    FetchFailed {
        resource: String,
        #[source]
        source: ApiError,
    },
    /// 找不到指定的课程或作业
    #[error("找不到{kind}: {id}")]
    NotFound { kind: &'static str, id: String },
}

/// 同步错误，单个提交的失败只计入统计，不会走到这里
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// 无法列出提交
    #[error("无法列出提交 (课程 {course_id}, 作业 {assignment_id}): {source}")]
    ListFailed {
        course_id: String,
        assignment_id: String,
        #[source]
        source: ApiError,
    },
    /// 同步被取消，部分结果已缓存
    #[error("同步已取消 (课程 {course_id}, 作业 {assignment_id}): 已完成 {finished}/{total}")]
    Cancelled {
        course_id: String,
        assignment_id: String,
        finished: usize,
        total: usize,
    },
}

/// 选择集错误，可由用户操作恢复
#[derive(Debug, Clone, Error)]
pub enum SelectionError {
    /// 选择集为空
    #[error("未选择任何提交")]
    Empty,
    /// 提交不在同步结果中
    #[error("未知的提交: {submission_id}")]
    UnknownSubmission { submission_id: String },
    /// 提交状态不可批改
    #[error("提交 {submission_id} 状态为 {status}，不可批改")]
    NotGradable {
        submission_id: String,
        status: SyncStatus,
    },
}

/// 派发错误：参数不合法时阻止派发
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// 选择集为空
    #[error("选择集为空，无法派发批改任务")]
    EmptySelection,
    /// 选择集包含不可批改的提交
    #[error("选择集无效: {0}")]
    InvalidSelection(#[from] SelectionError),
    /// 严格度不在 [0, 1] 范围内
    #[error("严格度 {value} 不在 [0, 1] 范围内")]
    InvalidStrictness { value: f64 },
    /// 后端拒绝了任务
    #[error("批改后端拒绝任务: {source}")]
    Rejected {
        #[source]
        source: ApiError,
    },
}

/// 轮询错误
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// 超过等待时间
    #[error("任务 {job_id} 轮询超时 ({elapsed_secs}秒)")]
    Timeout { job_id: String, elapsed_secs: u64 },
    /// 后端报告任务失败
    #[error("任务 {job_id} 执行失败: {message}")]
    JobFailed { job_id: String, message: String },
    /// 瞬时错误重试耗尽
    #[error("任务 {job_id} 轮询失败，已尝试 {attempts} 次: {source}")]
    RetriesExhausted {
        job_id: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },
    /// 不可重试的后端错误
    #[error("任务 {job_id} 查询失败: {source}")]
    Backend {
        job_id: String,
        #[source]
        source: ApiError,
    },
    /// 调用方取消
    #[error("任务 {job_id} 轮询已取消")]
    Cancelled { job_id: String },
    /// 同一任务已有轮询在进行
    #[error("任务 {job_id} 已在轮询中")]
    AlreadyPolling { job_id: String },
}

impl PollError {
    pub fn job_id(&self) -> &str {
        match self {
            PollError::Timeout { job_id, .. }
            | PollError::JobFailed { job_id, .. }
            | PollError::RetriesExhausted { job_id, .. }
            | PollError::Backend { job_id, .. }
            | PollError::Cancelled { job_id }
            | PollError::AlreadyPolling { job_id } => job_id,
        }
    }
}

/// 流程跳转被拒绝，状态机保持原状
#[derive(Debug, Clone, Error)]
pub enum TransitionError {
    /// 只能前进一步
    #[error("不能从 {from} 直接跳到 {to}")]
    SkipAhead { from: WorkflowStage, to: WorkflowStage },
    /// 操作需要处于指定阶段
    #[error("当前阶段为 {actual}，该操作需要 {expected}")]
    WrongStage {
        expected: WorkflowStage,
        actual: WorkflowStage,
    },
    /// 尚未连接
    #[error("尚未连接 LMS")]
    NotConnected,
    /// 尚未选择课程和作业
    #[error("尚未选择课程和作业")]
    NoAssignmentChosen,
    /// 没有完整的同步结果
    #[error("没有完整的同步结果")]
    NoSyncSummary,
    /// 选择集无效
    #[error("选择集无效: {0}")]
    InvalidSelection(#[from] SelectionError),
    /// 尚未派发批改任务
    #[error("尚未派发批改任务")]
    NoJob,
    /// 报告尚未生成
    #[error("批改报告尚未生成")]
    NoReport,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 未知的 LMS 类型
    #[error("未知的 LMS 类型: {value} (支持: canvas, moodle)")]
    UnknownProvider { value: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 校验失败，列出全部问题
    #[error("配置校验失败: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },
}

/// 会话存储错误
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// 文件读写失败
    #[error("会话文件读写失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 文件内容损坏
    #[error("会话文件内容损坏 ({path}): {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
