//! 批改任务派发服务 - 业务能力层
//!
//! 只负责"校验参数并提交任务"，拿到任务 id 立即返回，不等待批改完成

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::GradingBackend;
use crate::error::{DispatchError, SelectionError};
use crate::models::{GradeRequest, JobHandle, Session};
use crate::workflow::SelectionSet;

/// 批改任务派发服务
pub struct GradingJobDispatcher {
    backend: Arc<dyn GradingBackend>,
}

impl GradingJobDispatcher {
    pub fn new(backend: Arc<dyn GradingBackend>) -> Self {
        Self { backend }
    }

    /// 本地校验，不发请求
    pub fn validate(selection: &SelectionSet, strictness: f64) -> Result<(), DispatchError> {
        match selection.validate() {
            Ok(()) => {}
            Err(SelectionError::Empty) => return Err(DispatchError::EmptySelection),
            Err(e) => return Err(DispatchError::InvalidSelection(e)),
        }
        validate_strictness(strictness)
    }

    /// 提交批改任务
    pub async fn submit_job(
        &self,
        session: &Session,
        selection: &SelectionSet,
        rubric_id: Option<&str>,
        strictness: f64,
    ) -> Result<JobHandle, DispatchError> {
        Self::validate(selection, strictness)?;

        let rubric_id = rubric_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let request = GradeRequest {
            course_id: selection.course_id().to_string(),
            assignment_id: selection.assignment_id().to_string(),
            selection: selection.ids(),
            rubric_id: rubric_id.clone(),
            strictness,
        };

        let job_id = self
            .backend
            .submit_job(session, &request)
            .await
            .map_err(|source| {
                warn!("⚠️ 批改后端拒绝任务: {}", source);
                DispatchError::Rejected { source }
            })?;

        info!(
            "🚀 [作业 {}] 批改任务已提交: {} ({} 份提交, 严格度 {})",
            request.assignment_id,
            job_id,
            request.selection.len(),
            strictness
        );

        Ok(JobHandle {
            job_id,
            course_id: request.course_id,
            assignment_id: request.assignment_id,
            submission_ids: request.selection,
            rubric_id,
            strictness,
            submitted_at: Utc::now(),
        })
    }
}

/// 严格度必须是 [0, 1] 内的有限数
pub fn validate_strictness(strictness: f64) -> Result<(), DispatchError> {
    if strictness.is_finite() && (0.0..=1.0).contains(&strictness) {
        Ok(())
    } else {
        Err(DispatchError::InvalidStrictness { value: strictness })
    }
}
