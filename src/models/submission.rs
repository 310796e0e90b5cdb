//! 提交记录与同步汇总

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 单个提交的同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// 尚未处理（同步被取消时才会留在汇总里）
    Pending,
    Synced,
    Failed,
    NoFiles,
    NotSubmitted,
}

impl SyncStatus {
    /// 可以进入选择集的状态
    pub fn is_gradable(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::NoFiles)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::NoFiles => "no_files",
            SyncStatus::NotSubmitted => "not_submitted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LMS 返回的原始提交信息
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSubmission {
    pub submission_id: String,
    pub student_id: String,
    /// 学生是否真正提交过
    pub submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    /// LMS 上登记的附件数量
    pub attachment_count: usize,
}

/// 单个提交的下载请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub course_id: String,
    pub assignment_id: String,
    pub submission_id: String,
    pub force: bool,
}

/// 下载结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadReceipt {
    pub sync_job_id: Option<String>,
    pub attachment_count: usize,
    pub files: Vec<String>,
}

/// 提交记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: String,
    pub student_id: String,
    pub sync_status: SyncStatus,
    /// synced 时必然大于 0
    pub attachment_count: usize,
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmissionRecord {
    pub fn from_remote(remote: &RemoteSubmission, sync_status: SyncStatus) -> Self {
        Self {
            submission_id: remote.submission_id.clone(),
            student_id: remote.student_id.clone(),
            sync_status,
            attachment_count: 0,
            submitted_at: remote.submitted_at,
            error: None,
        }
    }

    pub fn synced(remote: &RemoteSubmission, attachment_count: usize) -> Self {
        debug_assert!(attachment_count > 0);
        Self {
            attachment_count,
            ..Self::from_remote(remote, SyncStatus::Synced)
        }
    }

    pub fn failed(remote: &RemoteSubmission, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::from_remote(remote, SyncStatus::Failed)
        }
    }
}

/// 一个 (课程, 作业) 的同步汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub course_id: String,
    pub assignment_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub no_files: usize,
    pub not_submitted: usize,
    pub pending: usize,
    /// false 表示同步中途被取消，汇总不完整
    pub complete: bool,
    pub synced_at: DateTime<Utc>,
    pub records: Vec<SubmissionRecord>,
}

impl SyncSummary {
    pub fn from_records(
        course_id: impl Into<String>,
        assignment_id: impl Into<String>,
        records: Vec<SubmissionRecord>,
        complete: bool,
    ) -> Self {
        let count = |status: SyncStatus| records.iter().filter(|r| r.sync_status == status).count();

        Self {
            course_id: course_id.into(),
            assignment_id: assignment_id.into(),
            total: records.len(),
            successful: count(SyncStatus::Synced),
            failed: count(SyncStatus::Failed),
            no_files: count(SyncStatus::NoFiles),
            not_submitted: count(SyncStatus::NotSubmitted),
            pending: count(SyncStatus::Pending),
            complete,
            synced_at: Utc::now(),
            records,
        }
    }

    pub fn record(&self, submission_id: &str) -> Option<&SubmissionRecord> {
        self.records.iter().find(|r| r.submission_id == submission_id)
    }

    /// 可批改的提交 id，按记录顺序
    pub fn gradable_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.sync_status.is_gradable())
            .map(|r| r.submission_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, attachments: usize) -> RemoteSubmission {
        RemoteSubmission {
            submission_id: id.to_string(),
            student_id: format!("stu-{}", id),
            submitted: true,
            submitted_at: None,
            attachment_count: attachments,
        }
    }

    #[test]
    fn test_summary_counts() {
        let records = vec![
            SubmissionRecord::synced(&remote("1", 2), 2),
            SubmissionRecord::failed(&remote("2", 1), "timeout"),
            SubmissionRecord::from_remote(&remote("3", 0), SyncStatus::NoFiles),
            SubmissionRecord::from_remote(&remote("4", 0), SyncStatus::NotSubmitted),
        ];
        let summary = SyncSummary::from_records("c", "a", records, true);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.no_files, 1);
        assert_eq!(summary.not_submitted, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.gradable_ids(), vec!["1".to_string(), "3".to_string()]);
        assert_eq!(summary.record("2").and_then(|r| r.error.as_deref()), Some("timeout"));
    }

    #[test]
    fn test_gradable_states() {
        assert!(SyncStatus::Synced.is_gradable());
        assert!(SyncStatus::NoFiles.is_gradable());
        assert!(!SyncStatus::Failed.is_gradable());
        assert!(!SyncStatus::NotSubmitted.is_gradable());
        assert!(!SyncStatus::Pending.is_gradable());
    }
}
