//! 批改后端客户端
//!
//! `/grade`、`/jobs/{id}`、`/jobs/{id}/results` 三个接口，与 LMS 类型无关。

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::GradingBackend;
use crate::error::ApiError;
use crate::infrastructure::GatewayClient;
use crate::models::wire::deserialize_id;
use crate::models::{GradeRequest, JobStatusReport, RawGradingResult, Session};

/// 基于网关 HTTP 接口的批改后端
#[derive(Clone)]
pub struct HttpGradingBackend {
    gateway: GatewayClient,
}

impl HttpGradingBackend {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    #[serde(alias = "job_id", alias = "id", deserialize_with = "deserialize_id")]
    job_id: String,
}

#[derive(Deserialize)]
struct ResultsBody {
    #[serde(default)]
    results: Vec<RawGradingResult>,
}

#[async_trait]
impl GradingBackend for HttpGradingBackend {
    async fn submit_job(&self, session: &Session, request: &GradeRequest) -> Result<String, ApiError> {
        debug!(
            "提交批改任务: 课程 {}, 作业 {}, {} 份提交",
            request.course_id,
            request.assignment_id,
            request.selection.len()
        );
        let response = self
            .gateway
            .post::<_, JobAccepted>("/grade", request, Some(session.access_token()))
            .await?;
        Ok(response.body.job_id)
    }

    async fn job_status(&self, session: &Session, job_id: &str) -> Result<JobStatusReport, ApiError> {
        let path = format!("/jobs/{}", job_id);
        let response = self
            .gateway
            .get::<JobStatusReport>(&path, &[], Some(session.access_token()))
            .await?;
        Ok(response.body)
    }

    async fn job_results(
        &self,
        session: &Session,
        job_id: &str,
    ) -> Result<Vec<RawGradingResult>, ApiError> {
        let path = format!("/jobs/{}/results", job_id);
        let response = self
            .gateway
            .get::<ResultsBody>(&path, &[], Some(session.access_token()))
            .await?;
        Ok(response.body.results)
    }
}
