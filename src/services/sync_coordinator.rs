//! 提交同步服务 - 业务能力层
//!
//! ## 职责
//!
//! 把一个 (课程, 作业) 下的所有提交附件下载到批改后端，并给每个提交一个同步状态。
//!
//! ## 并发控制
//!
//! 下载任务通过 Semaphore + tokio::spawn 并发执行，同时进行的下载数不超过配置的并发数，
//! 其余任务在信号量上排队。单个提交下载失败只计入统计，不会中断整批。
//!
//! ## 缓存
//!
//! - 完整的同步结果按 (课程, 作业) 缓存，非强制同步直接返回缓存，不发任何请求
//! - 已下载成功的提交单独记录，被取消的同步重新开始时不会重复下载
//! - 强制同步清空该作业的全部缓存

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::LmsProvider;
use crate::error::{ApiError, SyncError};
use crate::models::{
    DownloadReceipt, DownloadRequest, RemoteSubmission, Session, SubmissionRecord, SyncStatus,
    SyncSummary,
};

type PairKey = (String, String);

#[derive(Debug, Default)]
struct PairCache {
    summary: Option<SyncSummary>,
    /// 已下载成功的提交 id → 附件数
    downloaded: HashMap<String, usize>,
}

/// 提交同步服务
pub struct SyncCoordinator {
    provider: Arc<dyn LmsProvider>,
    concurrency: usize,
    cache: HashMap<PairKey, PairCache>,
}

impl SyncCoordinator {
    pub fn new(provider: Arc<dyn LmsProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
            cache: HashMap::new(),
        }
    }

    /// 同步一个作业的全部提交
    ///
    /// 被取消时，部分结果以 `complete = false` 缓存，返回 [`SyncError::Cancelled`]。
    pub async fn sync_submissions(
        &mut self,
        session: &Session,
        course_id: &str,
        assignment_id: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let key = (course_id.to_string(), assignment_id.to_string());

        if force {
            if self.cache.remove(&key).is_some() {
                info!("[作业 {}] 🔄 强制重新同步，已清空缓存", assignment_id);
            }
        } else if let Some(summary) = self.cached_summary(course_id, assignment_id) {
            info!("[作业 {}] ✓ 使用缓存的同步结果", assignment_id);
            return Ok(summary.clone());
        }

        let submissions = self
            .provider
            .list_submissions(session, course_id, assignment_id)
            .await
            .map_err(|source| SyncError::ListFailed {
                course_id: course_id.to_string(),
                assignment_id: assignment_id.to_string(),
                source,
            })?;

        let total = submissions.len();
        log_sync_start(assignment_id, total, self.concurrency);

        let downloaded = self
            .cache
            .get(&key)
            .map(|c| c.downloaded.clone())
            .unwrap_or_default();

        // 先处理不需要下载的提交
        let mut records: HashMap<String, SubmissionRecord> = HashMap::with_capacity(total);
        let mut to_download = Vec::new();
        for remote in &submissions {
            if !remote.submitted {
                records.insert(
                    remote.submission_id.clone(),
                    SubmissionRecord::from_remote(remote, SyncStatus::NotSubmitted),
                );
            } else if remote.attachment_count == 0 {
                records.insert(
                    remote.submission_id.clone(),
                    SubmissionRecord::from_remote(remote, SyncStatus::NoFiles),
                );
            } else if let Some(&count) = downloaded.get(&remote.submission_id) {
                debug!("[提交 {}] 已下载过，跳过", remote.submission_id);
                records.insert(
                    remote.submission_id.clone(),
                    SubmissionRecord::synced(remote, count),
                );
            } else {
                to_download.push(remote.clone());
            }
        }

        let outcomes = self
            .download_all(session, course_id, assignment_id, force, to_download, cancel)
            .await;

        let cache = self.cache.entry(key).or_default();
        cache.downloaded.extend(downloaded);
        for (remote, outcome) in outcomes {
            let record = match outcome {
                DownloadOutcome::Done(receipt) if receipt.attachment_count > 0 => {
                    cache
                        .downloaded
                        .insert(remote.submission_id.clone(), receipt.attachment_count);
                    SubmissionRecord::synced(&remote, receipt.attachment_count)
                }
                DownloadOutcome::Done(_) => SubmissionRecord::from_remote(&remote, SyncStatus::NoFiles),
                DownloadOutcome::Failed(message) => {
                    warn!("[提交 {}] ❌ 下载失败: {}", remote.submission_id, message);
                    SubmissionRecord::failed(&remote, message)
                }
                DownloadOutcome::NotStarted => SubmissionRecord::from_remote(&remote, SyncStatus::Pending),
            };
            records.insert(remote.submission_id.clone(), record);
        }

        // 按 LMS 返回的顺序输出
        let ordered: Vec<SubmissionRecord> = submissions
            .iter()
            .filter_map(|remote| records.remove(&remote.submission_id))
            .collect();

        let cancelled = cancel.is_cancelled() && ordered.iter().any(|r| r.sync_status == SyncStatus::Pending);
        let summary = SyncSummary::from_records(course_id, assignment_id, ordered, !cancelled);
        cache.summary = Some(summary.clone());

        if cancelled {
            warn!(
                "[作业 {}] ⚠️ 同步已取消: 完成 {}/{}",
                assignment_id,
                summary.total - summary.pending,
                summary.total
            );
            return Err(SyncError::Cancelled {
                course_id: course_id.to_string(),
                assignment_id: assignment_id.to_string(),
                finished: summary.total - summary.pending,
                total: summary.total,
            });
        }

        log_sync_summary(&summary);
        Ok(summary)
    }

    /// 并发下载，返回每个提交的结果（顺序不保证）
    async fn download_all(
        &self,
        session: &Session,
        course_id: &str,
        assignment_id: &str,
        force: bool,
        to_download: Vec<RemoteSubmission>,
        cancel: &CancellationToken,
    ) -> Vec<(RemoteSubmission, DownloadOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(to_download.len());
        let mut outcomes = Vec::new();
        let mut pending = to_download.into_iter();

        while let Some(remote) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcomes.push((remote, DownloadOutcome::NotStarted));
                break;
            };

            let provider = Arc::clone(&self.provider);
            let session = session.clone();
            let request = DownloadRequest {
                course_id: course_id.to_string(),
                assignment_id: assignment_id.to_string(),
                submission_id: remote.submission_id.clone(),
                force,
            };

            let handle = tokio::spawn(async move {
                let _permit = permit;
                provider.download_submission(&session, &request).await
            });
            handles.push((remote, handle));
        }

        // 取消后剩下的提交保持 pending
        outcomes.extend(pending.map(|remote| (remote, DownloadOutcome::NotStarted)));

        let (remotes, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (remote, joined) in remotes.into_iter().zip(join_all(futures).await) {
            let outcome = match joined {
                Ok(Ok(receipt)) => DownloadOutcome::Done(receipt),
                Ok(Err(e)) => DownloadOutcome::from_api_error(&e),
                Err(e) => {
                    error!("[提交 {}] 下载任务执行失败: {}", remote.submission_id, e);
                    DownloadOutcome::Failed(format!("下载任务执行失败: {}", e))
                }
            };
            outcomes.push((remote, outcome));
        }

        outcomes
    }

    /// 该作业的缓存结果，只返回完整的
    pub fn cached_summary(&self, course_id: &str, assignment_id: &str) -> Option<&SyncSummary> {
        self.cache
            .get(&(course_id.to_string(), assignment_id.to_string()))
            .and_then(|c| c.summary.as_ref())
            .filter(|s| s.complete)
    }

    /// 丢弃某个作业的缓存
    pub fn invalidate(&mut self, course_id: &str, assignment_id: &str) {
        self.cache
            .remove(&(course_id.to_string(), assignment_id.to_string()));
    }

    /// 丢弃全部缓存（注销时调用）
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

enum DownloadOutcome {
    Done(DownloadReceipt),
    Failed(String),
    NotStarted,
}

impl DownloadOutcome {
    fn from_api_error(err: &ApiError) -> Self {
        DownloadOutcome::Failed(err.to_string())
    }
}

// ========== 日志辅助函数 ==========

fn log_sync_start(assignment_id: &str, total: usize, concurrency: usize) {
    info!("{}", "=".repeat(60));
    info!("📥 [作业 {}] 开始同步 {} 份提交", assignment_id, total);
    info!("📊 最大并发下载数: {}", concurrency);
    info!("{}", "=".repeat(60));
}

fn log_sync_summary(summary: &SyncSummary) {
    info!("{}", "─".repeat(60));
    info!("✓ [作业 {}] 同步完成", summary.assignment_id);
    info!("✅ 成功: {}/{}", summary.successful, summary.total);
    info!("❌ 失败: {}", summary.failed);
    info!("📭 无附件: {}", summary.no_files);
    info!("🚫 未提交: {}", summary.not_submitted);
    info!("{}", "─".repeat(60));
}
