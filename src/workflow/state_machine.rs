//! 批改流程状态机 - 流程层
//!
//! ## 职责
//!
//! 按 连接 → 选课程作业 → 同步 → 选择 → 批改 → 结果 的顺序推进，
//! 每一步只在前一步的数据已经就绪时才允许进入。
//!
//! ## 规则
//!
//! - 前进每次只能一步，且要通过该阶段的守卫
//! - 后退可以跳任意步，回到同步或更早的阶段会清空选择集、任务和报告，并取消正在进行的轮询
//! - 操作失败时状态机停在原阶段
//! - 同步缓存跨后退保留，登出时才清空

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{build_lms_provider, GradingBackend, HttpGradingBackend, LmsProvider};
use crate::config::Config;
use crate::error::{AppError, CatalogError, TransitionError};
use crate::infrastructure::GatewayClient;
use crate::models::{Assignment, Course, Credential, JobHandle, Report, Session, SyncSummary};
use crate::services::{
    CatalogFetcher, ConnectionManager, GradingJobDispatcher, PollEvent, PollOptions,
    ProgressPoller, ResultAggregator, SessionStore, SyncCoordinator,
};
use crate::workflow::{SelectionSet, WorkflowContext};

/// 流程阶段，顺序即推进顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkflowStage {
    Connect,
    SelectCourse,
    Sync,
    Select,
    Grade,
    Results,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 6] = [
        WorkflowStage::Connect,
        WorkflowStage::SelectCourse,
        WorkflowStage::Sync,
        WorkflowStage::Select,
        WorkflowStage::Grade,
        WorkflowStage::Results,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Connect => "connect",
            WorkflowStage::SelectCourse => "select_course",
            WorkflowStage::Sync => "sync",
            WorkflowStage::Select => "select",
            WorkflowStage::Grade => "grade",
            WorkflowStage::Results => "results",
        }
    }

    /// 下一阶段，结果阶段之后没有
    pub fn next(&self) -> Option<WorkflowStage> {
        Self::ALL.get(*self as usize + 1).copied()
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 批改流程状态机
///
/// 职责：
/// - 持有各阶段服务和 [`WorkflowContext`]
/// - 校验阶段跳转
/// - 管理取消令牌：`shutdown_token` 取消全部操作，`cancel` 只取消当前操作
pub struct WorkflowStateMachine {
    stage: WorkflowStage,
    ctx: WorkflowContext,

    connection: ConnectionManager,
    catalog: CatalogFetcher,
    sync: SyncCoordinator,
    dispatcher: GradingJobDispatcher,
    poller: ProgressPoller,
    poll_options: PollOptions,

    shutdown: CancellationToken,
    cancel: CancellationToken,
}

impl WorkflowStateMachine {
    /// 用现成的 LMS 和批改后端构建
    pub fn new(provider: Arc<dyn LmsProvider>, backend: Arc<dyn GradingBackend>, config: &Config) -> Self {
        let shutdown = CancellationToken::new();
        let cancel = shutdown.child_token();
        Self {
            stage: WorkflowStage::Connect,
            ctx: WorkflowContext::default(),
            connection: ConnectionManager::new(
                Arc::clone(&provider),
                SessionStore::new(&config.session_file),
            ),
            catalog: CatalogFetcher::new(Arc::clone(&provider), config.max_catalog_pages),
            sync: SyncCoordinator::new(provider, config.sync_concurrency),
            dispatcher: GradingJobDispatcher::new(Arc::clone(&backend)),
            poller: ProgressPoller::new(backend, ResultAggregator::new(config.grade_thresholds)),
            poll_options: PollOptions::from_config(config),
            shutdown,
            cancel,
        }
    }

    /// 按配置创建网关客户端和对应的 LMS 实现
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let gateway = GatewayClient::new(&config.gateway_url, config.request_timeout())?;
        let provider = build_lms_provider(config.lms_provider, gateway.clone());
        let backend: Arc<dyn GradingBackend> = Arc::new(HttpGradingBackend::new(gateway));
        Ok(Self::new(provider, backend, config))
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    pub fn session(&self) -> Option<&Session> {
        self.ctx.session.as_ref()
    }

    pub fn sync_summary(&self) -> Option<&SyncSummary> {
        self.ctx.sync_summary.as_ref()
    }

    pub fn selection(&self) -> Option<&SelectionSet> {
        self.ctx.selection.as_ref()
    }

    pub fn job(&self) -> Option<&JobHandle> {
        self.ctx.job.as_ref()
    }

    pub fn report(&self) -> Option<&Report> {
        self.ctx.report.as_ref()
    }

    pub fn poll_options(&self) -> &PollOptions {
        &self.poll_options
    }

    /// 取消之后的全部操作（Ctrl-C 用）
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 取消当前操作，之后的操作照常进行
    pub fn cancel(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("{} 取消当前操作", self.ctx);
            self.cancel.cancel();
        }
        self.cancel = self.shutdown.child_token();
    }

    /// 给长时间操作用的令牌，上一次操作留下的取消状态不会带进来
    fn operation_token(&mut self) -> CancellationToken {
        if self.cancel.is_cancelled() && !self.shutdown.is_cancelled() {
            self.cancel = self.shutdown.child_token();
        }
        self.cancel.clone()
    }

    // ========== 阶段跳转 ==========

    /// 跳转到指定阶段
    ///
    /// 前进只能一步且必须通过守卫；后退总是允许，并清掉目标阶段之后产生的数据。
    pub fn transition_to(&mut self, target: WorkflowStage) -> Result<(), TransitionError> {
        if target == self.stage {
            return Ok(());
        }
        if target < self.stage {
            self.step_back(target);
            return Ok(());
        }
        if self.stage.next() != Some(target) {
            return Err(TransitionError::SkipAhead {
                from: self.stage,
                to: target,
            });
        }

        self.check_guard(target)?;
        debug!("{} {} → {}", self.ctx, self.stage, target);
        self.stage = target;
        Ok(())
    }

    fn check_guard(&self, target: WorkflowStage) -> Result<(), TransitionError> {
        match target {
            WorkflowStage::Connect => Ok(()),
            WorkflowStage::SelectCourse => self
                .ctx
                .session
                .as_ref()
                .map(|_| ())
                .ok_or(TransitionError::NotConnected),
            WorkflowStage::Sync => self
                .ctx
                .chosen_pair()
                .map(|_| ())
                .ok_or(TransitionError::NoAssignmentChosen),
            WorkflowStage::Select => match &self.ctx.sync_summary {
                Some(summary) if summary.complete => Ok(()),
                _ => Err(TransitionError::NoSyncSummary),
            },
            WorkflowStage::Grade => match &self.ctx.selection {
                Some(selection) => Ok(selection.validate()?),
                None => Err(TransitionError::NoSyncSummary),
            },
            WorkflowStage::Results => self
                .ctx
                .report
                .as_ref()
                .map(|_| ())
                .ok_or(TransitionError::NoReport),
        }
    }

    fn step_back(&mut self, target: WorkflowStage) {
        info!("{} ↩️ 返回 {} (当前 {})", self.ctx, target, self.stage);

        if target <= WorkflowStage::Sync && self.stage >= WorkflowStage::Grade {
            self.cancel();
        }
        match target {
            WorkflowStage::Connect => {
                self.ctx.courses.clear();
                self.ctx.clear_choice();
            }
            WorkflowStage::SelectCourse => self.ctx.clear_choice(),
            WorkflowStage::Sync => self.ctx.clear_sync(),
            WorkflowStage::Select => self.ctx.clear_grading(),
            WorkflowStage::Grade => self.ctx.report = None,
            WorkflowStage::Results => {}
        }
        self.stage = target;
    }

    fn ensure_stage(&self, expected: WorkflowStage) -> Result<(), TransitionError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(TransitionError::WrongStage {
                expected,
                actual: self.stage,
            })
        }
    }

    // ========== 连接 ==========

    /// 连接 LMS，成功后进入选课程阶段
    pub async fn connect(&mut self, credential: &Credential) -> Result<&Session, AppError> {
        self.transition_to(WorkflowStage::Connect)?;

        let session = self.connection.connect(credential).await?;
        self.ctx.session = Some(session);
        self.transition_to(WorkflowStage::SelectCourse)?;
        self.ctx.session.as_ref().ok_or_else(|| TransitionError::NotConnected.into())
    }

    /// 用保存的凭据恢复会话，没有保存的凭据时返回 false
    pub async fn resume(&mut self) -> Result<bool, AppError> {
        self.transition_to(WorkflowStage::Connect)?;

        match self.connection.resume().await? {
            Some(session) => {
                self.ctx.session = Some(session);
                self.transition_to(WorkflowStage::SelectCourse)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 登出：取消进行中的操作，清空凭据和同步缓存，回到连接阶段
    pub async fn logout(&mut self) -> Result<(), AppError> {
        self.cancel();
        self.connection.logout().await?;
        self.sync.clear();
        self.ctx = WorkflowContext::default();
        self.stage = WorkflowStage::Connect;
        info!("👋 已登出");
        Ok(())
    }

    // ========== 课程与作业 ==========

    /// 加载可批改的课程
    pub async fn load_courses(&mut self) -> Result<&[Course], AppError> {
        self.ensure_stage(WorkflowStage::SelectCourse)?;
        let session = self.ctx.session.as_ref().ok_or(TransitionError::NotConnected)?;

        let listing = self.catalog.list_courses(session).await?;
        if let Some(warning) = &listing.warning {
            warn!("⚠️ 课程列表不完整: {}", warning);
        }
        self.ctx.catalog_warning = listing.warning;
        self.ctx.courses = listing.items;
        Ok(&self.ctx.courses)
    }

    /// 加载课程下已发布的作业
    pub async fn load_assignments(&mut self, course_id: &str) -> Result<&[Assignment], AppError> {
        self.ensure_stage(WorkflowStage::SelectCourse)?;
        if !self.ctx.courses.iter().any(|c| c.id == course_id) {
            return Err(CatalogError::NotFound {
                kind: "课程",
                id: course_id.to_string(),
            }
            .into());
        }
        let session = self.ctx.session.as_ref().ok_or(TransitionError::NotConnected)?;

        let listing = self.catalog.list_assignments(session, course_id).await?;
        if let Some(warning) = &listing.warning {
            warn!("[课程 {}] ⚠️ 作业列表不完整: {}", course_id, warning);
        }
        self.ctx.catalog_warning = listing.warning;
        self.ctx.assignments = listing.items;
        Ok(&self.ctx.assignments)
    }

    /// 选定作业，进入同步阶段
    pub fn choose_assignment(&mut self, course_id: &str, assignment_id: &str) -> Result<(), AppError> {
        self.ensure_stage(WorkflowStage::SelectCourse)?;
        let known = self
            .ctx
            .assignments
            .iter()
            .any(|a| a.course_id == course_id && a.id == assignment_id);
        if !known {
            return Err(CatalogError::NotFound {
                kind: "作业",
                id: assignment_id.to_string(),
            }
            .into());
        }

        self.ctx.course_id = Some(course_id.to_string());
        self.ctx.assignment_id = Some(assignment_id.to_string());
        self.transition_to(WorkflowStage::Sync)?;
        info!("{} ✓ 已选定", self.ctx);
        Ok(())
    }

    // ========== 同步与选择 ==========

    /// 同步已选作业的提交，成功后进入选择阶段
    ///
    /// 在选择及之后的阶段调用会先退回同步阶段。
    pub async fn sync(&mut self, force: bool) -> Result<&SyncSummary, AppError> {
        self.transition_to(WorkflowStage::Sync)?;
        let session = self.ctx.session.clone().ok_or(TransitionError::NotConnected)?;
        let (course_id, assignment_id) = match self.ctx.chosen_pair() {
            Some((c, a)) => (c.to_string(), a.to_string()),
            None => return Err(TransitionError::NoAssignmentChosen.into()),
        };

        let cancel = self.operation_token();
        let summary = self
            .sync
            .sync_submissions(&session, &course_id, &assignment_id, force, &cancel)
            .await?;

        self.ctx.selection = Some(SelectionSet::from_summary(&summary));
        self.ctx.sync_summary = Some(summary);
        self.transition_to(WorkflowStage::Select)?;
        self.ctx
            .sync_summary
            .as_ref()
            .ok_or_else(|| TransitionError::NoSyncSummary.into())
    }

    /// 修改选择集，只在选择阶段可用
    pub fn selection_mut(&mut self) -> Result<&mut SelectionSet, TransitionError> {
        self.ensure_stage(WorkflowStage::Select)?;
        self.ctx.selection.as_mut().ok_or(TransitionError::NoSyncSummary)
    }

    // ========== 批改 ==========

    /// 派发批改任务，进入批改阶段
    ///
    /// 参数不合法或后端拒绝时停在选择阶段。
    pub async fn dispatch(&mut self, rubric_id: Option<&str>, strictness: f64) -> Result<&JobHandle, AppError> {
        self.ensure_stage(WorkflowStage::Select)?;
        let selection = self.ctx.selection.as_ref().ok_or(TransitionError::NoSyncSummary)?;
        GradingJobDispatcher::validate(selection, strictness)?;
        self.check_guard(WorkflowStage::Grade)?;
        let session = self.ctx.session.as_ref().ok_or(TransitionError::NotConnected)?;

        // 拿到任务句柄后才进入批改阶段，请求中途被丢弃时仍停在选择阶段
        let handle = self
            .dispatcher
            .submit_job(session, selection, rubric_id, strictness)
            .await?;
        self.ctx.job = Some(handle);
        self.transition_to(WorkflowStage::Grade)?;
        self.ctx.job.as_ref().ok_or_else(|| TransitionError::NoJob.into())
    }

    /// 轮询当前任务直到结束，成功后进入结果阶段
    ///
    /// 超时、取消或失败时停在批改阶段，任务句柄保留，可以再次调用。
    pub async fn await_results(
        &mut self,
        events: Option<&UnboundedSender<PollEvent>>,
    ) -> Result<&Report, AppError> {
        self.ensure_stage(WorkflowStage::Grade)?;
        let cancel = self.operation_token();
        let session = self.ctx.session.as_ref().ok_or(TransitionError::NotConnected)?;
        let job = self.ctx.job.as_ref().ok_or(TransitionError::NoJob)?;

        let report = self
            .poller
            .poll_until_terminal(session, job, &self.poll_options, &cancel, events)
            .await?;

        self.ctx.report = Some(report);
        self.transition_to(WorkflowStage::Results)?;
        self.ctx.report.as_ref().ok_or_else(|| TransitionError::NoReport.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, DispatchError, PollError, SelectionError};
    use crate::models::{AssignmentState, CourseState, EnrollmentRole, JobStatus, ProviderKind};
    use crate::test_support::{
        assignment, course, raw_result, remote_submission, status, FakeGrading, FakeLms,
    };
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        machine: WorkflowStateMachine,
        lms: Arc<FakeLms>,
        grading: Arc<FakeGrading>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            session_file: dir.path().join("session.json").display().to_string(),
            ..Default::default()
        };

        let lms = Arc::new(FakeLms::new());
        lms.set_course_pages(vec![vec![course("c1", CourseState::Available, &[EnrollmentRole::Teacher])]]);
        lms.set_assignment_pages("c1", vec![vec![assignment("c1", "a1", true, AssignmentState::Published)]]);
        lms.set_submissions(
            "c1",
            "a1",
            vec![
                remote_submission("s1", true, 1),
                remote_submission("s2", true, 2),
                remote_submission("s3", false, 0),
            ],
        );
        let grading = Arc::new(FakeGrading::new());

        Harness {
            machine: WorkflowStateMachine::new(lms.clone(), grading.clone(), &config),
            lms,
            grading,
            _dir: dir,
        }
    }

    fn credential() -> Credential {
        Credential::new(ProviderKind::Canvas, "https://lms.example.edu", "tok")
    }

    /// 走到选择阶段
    async fn to_select(h: &mut Harness) {
        h.machine.connect(&credential()).await.unwrap();
        h.machine.load_courses().await.unwrap();
        h.machine.load_assignments("c1").await.unwrap();
        h.machine.choose_assignment("c1", "a1").unwrap();
        h.machine.sync(false).await.unwrap();
        assert_eq!(h.machine.stage(), WorkflowStage::Select);
    }

    #[test]
    fn test_stage_order() {
        assert!(WorkflowStage::Connect < WorkflowStage::Results);
        assert_eq!(WorkflowStage::Sync.next(), Some(WorkflowStage::Select));
        assert_eq!(WorkflowStage::Results.next(), None);
        assert_eq!(WorkflowStage::SelectCourse.to_string(), "select_course");
    }

    #[tokio::test]
    async fn test_cannot_skip_ahead() {
        let mut h = harness();
        let err = assert_err!(h.machine.transition_to(WorkflowStage::Sync));
        assert!(matches!(err, TransitionError::SkipAhead { .. }));

        let err = assert_err!(h.machine.transition_to(WorkflowStage::SelectCourse));
        assert!(matches!(err, TransitionError::NotConnected));
        assert_eq!(h.machine.stage(), WorkflowStage::Connect);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_in_connect() {
        let mut h = harness();
        h.lms.fail_connect(ApiError::Unauthorized {
            endpoint: "/canvas/connect".into(),
        });

        assert!(h.machine.connect(&credential()).await.is_err());
        assert_eq!(h.machine.stage(), WorkflowStage::Connect);
        assert!(h.machine.session().is_none());
    }

    #[tokio::test]
    async fn test_unknown_assignment_is_rejected() {
        let mut h = harness();
        h.machine.connect(&credential()).await.unwrap();
        h.machine.load_courses().await.unwrap();

        assert!(matches!(
            h.machine.load_assignments("c9").await,
            Err(AppError::Catalog(CatalogError::NotFound { .. }))
        ));
        h.machine.load_assignments("c1").await.unwrap();
        assert!(h.machine.choose_assignment("c1", "a9").is_err());
        assert_eq!(h.machine.stage(), WorkflowStage::SelectCourse);
    }

    #[tokio::test]
    async fn test_empty_selection_keeps_machine_in_select() {
        let mut h = harness();
        to_select(&mut h).await;

        let err = h.machine.dispatch(Some("R1"), 0.5).await.unwrap_err();
        assert!(matches!(err, AppError::Dispatch(DispatchError::EmptySelection)));
        assert_eq!(h.machine.stage(), WorkflowStage::Select);
        assert!(h.grading.submitted().is_empty());

        let err = assert_err!(h.machine.transition_to(WorkflowStage::Grade));
        assert!(matches!(err, TransitionError::InvalidSelection(SelectionError::Empty)));
    }

    #[tokio::test]
    async fn test_selection_only_covers_gradable_submissions() {
        let mut h = harness();
        to_select(&mut h).await;

        let selection = h.machine.selection_mut().unwrap();
        assert_eq!(selection.select_all(), 2);
        assert!(selection.toggle("s3").is_err());
    }

    #[tokio::test]
    async fn test_backend_rejection_reverts_to_select() {
        let mut h = harness();
        to_select(&mut h).await;
        h.machine.selection_mut().unwrap().select_all();
        h.grading.reject_submit(ApiError::Rejected {
            endpoint: "/grade".into(),
            code: None,
            message: "unknown rubric".into(),
        });

        assert!(h.machine.dispatch(Some("R9"), 0.5).await.is_err());
        assert_eq!(h.machine.stage(), WorkflowStage::Select);
        assert!(h.machine.job().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_reaches_results() {
        let mut h = harness();
        to_select(&mut h).await;
        h.machine.selection_mut().unwrap().select_all();
        h.grading.script_status(vec![
            Ok(status(JobStatus::Processing, 1, 2)),
            Ok(status(JobStatus::Completed, 2, 2)),
        ]);
        h.grading.set_results(vec![raw_result("s1", 9.0, 10.0), raw_result("s2", 7.0, 10.0)]);

        let job_id = h.machine.dispatch(Some("R1"), 0.5).await.unwrap().job_id.clone();
        assert_eq!(job_id, "job-1");
        assert_eq!(h.machine.stage(), WorkflowStage::Grade);

        let report = h.machine.await_results(None).await.unwrap();
        assert_eq!(report.summary_stats().graded_count, 2);
        assert_eq!(report.summary_stats().average_percentage, 80.0);
        assert_eq!(h.machine.stage(), WorkflowStage::Results);
    }

    #[tokio::test(start_paused = true)]
    async fn test_going_back_to_sync_clears_downstream_state() {
        let mut h = harness();
        to_select(&mut h).await;
        h.machine.selection_mut().unwrap().select_all();
        h.grading.script_status(vec![Ok(status(JobStatus::Completed, 2, 2))]);
        h.grading.set_results(vec![raw_result("s1", 9.0, 10.0)]);
        h.machine.dispatch(None, 0.5).await.unwrap();
        h.machine.await_results(None).await.unwrap();

        assert_ok!(h.machine.transition_to(WorkflowStage::Sync));
        assert!(h.machine.selection().is_none());
        assert!(h.machine.job().is_none());
        assert!(h.machine.report().is_none());
        assert!(h.machine.sync_summary().is_none());

        // 再次同步走缓存，不重新列出提交
        let list_calls = h.lms.list_calls();
        h.machine.sync(false).await.unwrap();
        assert_eq!(h.lms.list_calls(), list_calls);
        assert_eq!(h.machine.selection().map(|s| s.len()), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_poll_stays_in_grade_and_can_resume() {
        let mut h = harness();
        to_select(&mut h).await;
        h.machine.selection_mut().unwrap().select_all();
        h.grading.script_status(vec![Ok(status(JobStatus::Processing, 1, 2))]);
        h.machine.dispatch(None, 0.5).await.unwrap();

        let token = h.machine.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            token.cancel();
        });
        let err = h.machine.await_results(None).await.unwrap_err();
        assert!(matches!(err, AppError::Poll(PollError::Cancelled { .. })));
        assert_eq!(h.machine.stage(), WorkflowStage::Grade);
        assert!(h.machine.job().is_some());

        // 上一次的取消不影响下一次轮询
        h.grading.script_status(vec![Ok(status(JobStatus::Completed, 2, 2))]);
        h.grading.set_results(vec![raw_result("s1", 9.0, 10.0)]);
        assert!(h.machine.await_results(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sync() {
        let mut h = harness();
        h.machine.connect(&credential()).await.unwrap();
        h.machine.load_courses().await.unwrap();
        h.machine.load_assignments("c1").await.unwrap();
        h.machine.choose_assignment("c1", "a1").unwrap();

        h.machine.shutdown_token().cancel();
        assert!(matches!(h.machine.sync(false).await, Err(AppError::Sync(_))));
        assert_eq!(h.machine.stage(), WorkflowStage::Sync);
    }

    #[tokio::test]
    async fn test_logout_resets_everything() {
        let mut h = harness();
        to_select(&mut h).await;

        h.machine.logout().await.unwrap();
        assert_eq!(h.machine.stage(), WorkflowStage::Connect);
        assert!(h.machine.session().is_none());
        assert!(!h.machine.resume().await.unwrap());
    }

    #[tokio::test]
    async fn test_resume_uses_saved_credential() {
        let mut h = harness();
        h.machine.connect(&credential()).await.unwrap();
        h.machine.transition_to(WorkflowStage::Connect).unwrap();

        assert!(h.machine.resume().await.unwrap());
        assert_eq!(h.machine.stage(), WorkflowStage::SelectCourse);
        assert_eq!(h.lms.connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_dispatch_stays_in_select() {
        let mut h = harness();
        to_select(&mut h).await;
        h.machine.selection_mut().unwrap().select_all();
        h.grading.set_submit_delay(std::time::Duration::from_secs(5));

        let dispatched = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            h.machine.dispatch(Some("R1"), 0.5),
        )
        .await;

        assert!(dispatched.is_err());
        assert_eq!(h.machine.stage(), WorkflowStage::Select);
        assert!(h.machine.job().is_none());
        assert_eq!(h.machine.selection().map(|s| s.len()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_resync_from_results_requires_reselection() {
        let mut h = harness();
        to_select(&mut h).await;
        h.machine.selection_mut().unwrap().select_all();
        h.grading.script_status(vec![Ok(status(JobStatus::Completed, 2, 2))]);
        h.grading.set_results(vec![raw_result("s1", 9.0, 10.0), raw_result("s2", 7.0, 10.0)]);
        h.machine.dispatch(None, 0.5).await.unwrap();
        h.machine.await_results(None).await.unwrap();
        assert_eq!(h.machine.stage(), WorkflowStage::Results);

        let list_calls = h.lms.list_calls();
        let forced_before = h.lms.forced_downloads();
        assert_ok!(h.machine.transition_to(WorkflowStage::Sync));
        let summary = h.machine.sync(true).await.unwrap().clone();

        // 强制同步重新列出并重新下载
        assert_eq!(h.lms.list_calls(), list_calls + 1);
        assert_eq!(h.lms.forced_downloads(), forced_before + 2);
        assert_eq!(summary.total, 3);
        assert_eq!(h.machine.stage(), WorkflowStage::Select);
        assert_eq!(h.machine.selection().map(|s| s.len()), Some(0));
        assert!(h.machine.job().is_none());
        assert!(h.machine.report().is_none());

        let err = assert_err!(h.machine.transition_to(WorkflowStage::Grade));
        assert!(matches!(err, TransitionError::InvalidSelection(SelectionError::Empty)));
    }
}
