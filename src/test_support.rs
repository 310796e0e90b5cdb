//! 测试用的内存实现
//!
//! [`FakeLms`] 和 [`FakeGrading`] 分别实现 [`LmsProvider`] 和 [`GradingBackend`]，
//! 可以脚本化失败、延迟和调用计数。

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clients::{GradingBackend, LmsProvider};
use crate::error::ApiError;
use crate::models::{
    Assignment, AssignmentState, Course, CourseState, Credential, DownloadReceipt,
    DownloadRequest, EnrollmentRole, GradeRequest, JobHandle, JobProgress, JobStatus,
    JobStatusReport, Page, PageCursor, ProviderKind, RawGradingResult, RemoteSubmission, Session,
    SubmissionRecord, SyncSummary,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ========== 构造辅助函数 ==========

pub fn session() -> Session {
    Session::new("sess-1", ProviderKind::Canvas, "https://lms.example.edu", "session-token")
}

pub fn course(id: &str, state: CourseState, roles: &[EnrollmentRole]) -> Course {
    Course {
        id: id.to_string(),
        name: format!("课程 {}", id),
        course_code: None,
        workflow_state: state,
        enrollment_roles: roles.to_vec(),
    }
}

pub fn assignment(course_id: &str, id: &str, published: bool, state: AssignmentState) -> Assignment {
    Assignment {
        id: id.to_string(),
        course_id: course_id.to_string(),
        name: format!("作业 {}", id),
        published,
        workflow_state: state,
        points_possible: Some(100.0),
        due_at: None,
    }
}

pub fn remote_submission(id: &str, submitted: bool, attachments: usize) -> RemoteSubmission {
    RemoteSubmission {
        submission_id: id.to_string(),
        student_id: format!("stu-{}", id),
        submitted,
        submitted_at: None,
        attachment_count: attachments,
    }
}

/// 课程 c1 / 作业 a1 的同步汇总：前 `synced` 个成功，后 `failed` 个失败
pub fn summary_with(synced: usize, failed: usize) -> SyncSummary {
    let mut records = Vec::with_capacity(synced + failed);
    for i in 0..synced {
        records.push(SubmissionRecord::synced(&remote_submission(&format!("s{}", i), true, 1), 1));
    }
    for i in synced..synced + failed {
        records.push(SubmissionRecord::failed(
            &remote_submission(&format!("s{}", i), true, 1),
            "下载失败",
        ));
    }
    SyncSummary::from_records("c1", "a1", records, true)
}

pub fn job_handle(job_id: &str) -> JobHandle {
    JobHandle {
        job_id: job_id.to_string(),
        course_id: "c1".to_string(),
        assignment_id: "a1".to_string(),
        submission_ids: vec!["s1".to_string(), "s2".to_string()],
        rubric_id: None,
        strictness: 0.5,
        submitted_at: chrono::Utc::now(),
    }
}

/// 学生 id 为 `stu-{submission_id}`，和 [`remote_submission`] 一致
pub fn raw_result(submission_id: &str, score: f64, max_score: f64) -> RawGradingResult {
    RawGradingResult {
        submission_id: Some(submission_id.to_string()),
        student_id: Some(format!("stu-{}", submission_id)),
        score: Some(score),
        max_score: Some(max_score),
        ..Default::default()
    }
}

pub fn status(job_status: JobStatus, completed: u32, total: u32) -> JobStatusReport {
    JobStatusReport {
        job_status,
        progress: JobProgress {
            completed,
            total,
            stage: None,
        },
        message: None,
    }
}

// ========== FakeLms ==========

#[derive(Default)]
struct LmsState {
    connect_failure: Option<ApiError>,
    connect_calls: usize,

    course_pages: Vec<Vec<Course>>,
    course_page_failures: HashMap<usize, ApiError>,
    assignment_pages: HashMap<String, Vec<Vec<Assignment>>>,

    submissions: HashMap<(String, String), Vec<RemoteSubmission>>,
    list_failure: Option<ApiError>,
    list_calls: usize,

    download_failures: HashSet<String>,
    download_files: HashMap<String, usize>,
    download_delay: Option<Duration>,
    download_calls: usize,
    forced_downloads: usize,
    in_flight: usize,
    max_in_flight: usize,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// 内存版 LMS，游标就是页码
pub struct FakeLms {
    kind: ProviderKind,
    state: Mutex<LmsState>,
}

impl FakeLms {
    pub fn new() -> Self {
        Self::with_kind(ProviderKind::Canvas)
    }

    pub fn with_kind(kind: ProviderKind) -> Self {
        Self {
            kind,
            state: Mutex::new(LmsState::default()),
        }
    }

    /// 下一次 connect 失败
    pub fn fail_connect(&self, err: ApiError) {
        lock(&self.state).connect_failure = Some(err);
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.state).connect_calls
    }

    pub fn set_course_pages(&self, pages: Vec<Vec<Course>>) {
        lock(&self.state).course_pages = pages;
    }

    pub fn fail_course_page(&self, index: usize, err: ApiError) {
        lock(&self.state).course_page_failures.insert(index, err);
    }

    pub fn set_assignment_pages(&self, course_id: &str, pages: Vec<Vec<Assignment>>) {
        lock(&self.state)
            .assignment_pages
            .insert(course_id.to_string(), pages);
    }

    pub fn set_submissions(&self, course_id: &str, assignment_id: &str, submissions: Vec<RemoteSubmission>) {
        lock(&self.state)
            .submissions
            .insert((course_id.to_string(), assignment_id.to_string()), submissions);
    }

    pub fn fail_list_submissions(&self, err: ApiError) {
        lock(&self.state).list_failure = Some(err);
    }

    pub fn list_calls(&self) -> usize {
        lock(&self.state).list_calls
    }

    pub fn fail_download(&self, submission_id: &str) {
        lock(&self.state).download_failures.insert(submission_id.to_string());
    }

    /// 覆盖下载时实际拿到的附件数
    pub fn set_download_files(&self, submission_id: &str, files: usize) {
        lock(&self.state)
            .download_files
            .insert(submission_id.to_string(), files);
    }

    pub fn set_download_delay(&self, delay: Duration) {
        lock(&self.state).download_delay = Some(delay);
    }

    /// 第 n 次下载返回前取消 token
    pub fn cancel_after_downloads(&self, n: usize, token: CancellationToken) {
        lock(&self.state).cancel_after = Some((n, token));
    }

    pub fn download_calls(&self) -> usize {
        lock(&self.state).download_calls
    }

    pub fn forced_downloads(&self) -> usize {
        lock(&self.state).forced_downloads
    }

    pub fn max_in_flight(&self) -> usize {
        lock(&self.state).max_in_flight
    }
}

fn page_of<T: Clone>(pages: &[Vec<T>], cursor: Option<&PageCursor>) -> (usize, Page<T>) {
    let index = cursor
        .and_then(|c| c.as_str().parse::<usize>().ok())
        .unwrap_or(0);
    let items = pages.get(index).cloned().unwrap_or_default();
    let next = (index + 1 < pages.len()).then(|| PageCursor((index + 1).to_string()));
    (index, Page { items, next })
}

#[async_trait]
impl LmsProvider for FakeLms {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn connect(&self, credential: &Credential) -> Result<Session, ApiError> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;
        if let Some(err) = state.connect_failure.take() {
            return Err(err);
        }
        Ok(
            Session::new("sess-1", credential.provider, credential.endpoint.clone(), "session-token")
                .with_user_name(Some("王老师".to_string())),
        )
    }

    async fn courses_page(
        &self,
        _session: &Session,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Course>, ApiError> {
        let state = lock(&self.state);
        let (index, page) = page_of(&state.course_pages, cursor);
        match state.course_page_failures.get(&index) {
            Some(err) => Err(err.clone()),
            None => Ok(page),
        }
    }

    async fn assignments_page(
        &self,
        _session: &Session,
        course_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Assignment>, ApiError> {
        let state = lock(&self.state);
        let pages = state.assignment_pages.get(course_id).cloned().unwrap_or_default();
        Ok(page_of(&pages, cursor).1)
    }

    async fn list_submissions(
        &self,
        _session: &Session,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<RemoteSubmission>, ApiError> {
        let mut state = lock(&self.state);
        state.list_calls += 1;
        if let Some(err) = &state.list_failure {
            return Err(err.clone());
        }
        Ok(state
            .submissions
            .get(&(course_id.to_string(), assignment_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn download_submission(
        &self,
        _session: &Session,
        request: &DownloadRequest,
    ) -> Result<DownloadReceipt, ApiError> {
        let delay = {
            let mut state = lock(&self.state);
            state.download_calls += 1;
            if request.force {
                state.forced_downloads += 1;
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.download_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.in_flight -= 1;
        if let Some((n, token)) = &state.cancel_after {
            if state.download_calls >= *n {
                token.cancel();
            }
        }

        if state.download_failures.contains(&request.submission_id) {
            return Err(ApiError::ServerError {
                endpoint: "/canvas/sync".to_string(),
                status: 500,
            });
        }

        let registered = state
            .submissions
            .get(&(request.course_id.clone(), request.assignment_id.clone()))
            .and_then(|subs| subs.iter().find(|s| s.submission_id == request.submission_id))
            .map(|s| s.attachment_count)
            .unwrap_or(1);
        let attachment_count = state
            .download_files
            .get(&request.submission_id)
            .copied()
            .unwrap_or(registered);

        Ok(DownloadReceipt {
            sync_job_id: Some(format!("sync-{}", request.submission_id)),
            attachment_count,
            files: (0..attachment_count)
                .map(|i| format!("{}/{}.pdf", request.submission_id, i))
                .collect(),
        })
    }
}

// ========== FakeGrading ==========

#[derive(Default)]
struct GradingState {
    submitted: Vec<GradeRequest>,
    submit_failure: Option<ApiError>,
    submit_delay: Option<Duration>,
    status_script: VecDeque<Result<JobStatusReport, ApiError>>,
    status_calls: usize,
    results: Vec<RawGradingResult>,
    results_failure: Option<ApiError>,
    results_calls: usize,
}

/// 内存版批改后端，任务 id 固定为 job-1
#[derive(Default)]
pub struct FakeGrading {
    state: Mutex<GradingState>,
}

impl FakeGrading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<GradeRequest> {
        lock(&self.state).submitted.clone()
    }

    pub fn reject_submit(&self, err: ApiError) {
        lock(&self.state).submit_failure = Some(err);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        lock(&self.state).submit_delay = Some(delay);
    }

    /// 状态查询按顺序返回脚本，最后一条会一直重复
    pub fn script_status(&self, script: Vec<Result<JobStatusReport, ApiError>>) {
        lock(&self.state).status_script = script.into();
    }

    pub fn status_calls(&self) -> usize {
        lock(&self.state).status_calls
    }

    pub fn set_results(&self, results: Vec<RawGradingResult>) {
        lock(&self.state).results = results;
    }

    pub fn fail_results_once(&self, err: ApiError) {
        lock(&self.state).results_failure = Some(err);
    }

    pub fn results_calls(&self) -> usize {
        lock(&self.state).results_calls
    }
}

#[async_trait]
impl GradingBackend for FakeGrading {
    async fn submit_job(&self, _session: &Session, request: &GradeRequest) -> Result<String, ApiError> {
        let delay = lock(&self.state).submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if let Some(err) = state.submit_failure.clone() {
            return Err(err);
        }
        state.submitted.push(request.clone());
        Ok("job-1".to_string())
    }

    async fn job_status(&self, _session: &Session, _job_id: &str) -> Result<JobStatusReport, ApiError> {
        let mut state = lock(&self.state);
        state.status_calls += 1;
        let next = if state.status_script.len() > 1 {
            state.status_script.pop_front()
        } else {
            state.status_script.front().cloned()
        };
        next.unwrap_or_else(|| Ok(status(JobStatus::Queued, 0, 0)))
    }

    async fn job_results(
        &self,
        _session: &Session,
        _job_id: &str,
    ) -> Result<Vec<RawGradingResult>, ApiError> {
        let mut state = lock(&self.state);
        state.results_calls += 1;
        if let Some(err) = state.results_failure.take() {
            return Err(err);
        }
        Ok(state.results.clone())
    }
}
