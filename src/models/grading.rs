//! 批改任务与进度

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 后端任务状态
///
/// 只会按 queued → processing → {completed | failed} 前进，不会回退。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "running", alias = "in_progress")]
    Processing,
    #[serde(alias = "done", alias = "succeeded")]
    Completed,
    #[serde(alias = "error", alias = "cancelled")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// 两个终态同级
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 进度阶段，按声明顺序递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Downloading,
    Processing,
    Grading,
    Finalizing,
}

impl ProgressPhase {
    /// 后端给了阶段标签就用标签，否则按完成比例推断
    pub fn derive(stage: Option<&str>, completed: u32, total: u32) -> Self {
        if let Some(phase) = stage.and_then(Self::from_label) {
            return phase;
        }
        if total == 0 || completed == 0 {
            return ProgressPhase::Downloading;
        }
        let ratio = f64::from(completed) / f64::from(total);
        if ratio < 0.5 {
            ProgressPhase::Processing
        } else if ratio < 1.0 {
            ProgressPhase::Grading
        } else {
            ProgressPhase::Finalizing
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "downloading" | "download" => Some(ProgressPhase::Downloading),
            "processing" | "extracting" => Some(ProgressPhase::Processing),
            "grading" => Some(ProgressPhase::Grading),
            "finalizing" | "finishing" => Some(ProgressPhase::Finalizing),
            _ => None,
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressPhase::Downloading => "downloading",
            ProgressPhase::Processing => "processing",
            ProgressPhase::Grading => "grading",
            ProgressPhase::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// 后端报告的计数器
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default, alias = "processed", alias = "graded")]
    pub completed: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub stage: Option<String>,
}

/// GET /jobs/{id} 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_status: JobStatus,
    #[serde(default)]
    pub progress: JobProgress,
    #[serde(default)]
    pub message: Option<String>,
}

/// 轮询侧维护的任务状态
#[derive(Debug, Clone, PartialEq)]
pub struct GradingJob {
    pub job_id: String,
    pub status: JobStatus,
    pub phase: ProgressPhase,
    pub completed: u32,
    pub total: u32,
    pub message: Option<String>,
}

impl GradingJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            phase: ProgressPhase::Downloading,
            completed: 0,
            total: 0,
            message: None,
        }
    }

    /// 合并一次状态报告
    ///
    /// 状态、计数和阶段都只增不减。返回 false 表示报告的状态发生了回退，已被忽略。
    pub fn apply(&mut self, report: &JobStatusReport) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let accepted = report.job_status.rank() >= self.status.rank();
        if accepted {
            self.status = report.job_status;
        }

        self.total = self.total.max(report.progress.total);
        self.completed = self.completed.max(report.progress.completed);
        if self.total > 0 {
            self.completed = self.completed.min(self.total);
        }

        let derived = if self.status == JobStatus::Completed {
            ProgressPhase::Finalizing
        } else {
            ProgressPhase::derive(report.progress.stage.as_deref(), self.completed, self.total)
        };
        self.phase = self.phase.max(derived);

        if report.message.is_some() {
            self.message = report.message.clone();
        }

        accepted
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            phase: self.phase,
            completed: self.completed,
            total: self.total,
        }
    }
}

/// 推送给调用方的进度快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub phase: ProgressPhase,
    pub completed: u32,
    pub total: u32,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed) / f64::from(self.total) * 100.0
        }
    }
}

/// POST /grade 请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub course_id: String,
    pub assignment_id: String,
    pub selection: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
    pub strictness: f64,
}

/// 派发成功后拿到的任务句柄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub submission_ids: Vec<String>,
    pub rubric_id: Option<String>,
    pub strictness: f64,
    pub submitted_at: DateTime<Utc>,
}
