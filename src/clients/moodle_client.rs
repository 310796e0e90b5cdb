//! Moodle 客户端
//!
//! 网关路径前缀 `/moodle`。分页放在响应体里（`page` + `has_more`），游标是下一页页码。
//! Moodle 用 0/1 的 `visible` 代替状态字段，时间是 Unix 秒。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phf::phf_map;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    collect_pages, connect_via_gateway, download_via_gateway, LmsProvider, MAX_SUBMISSION_PAGES,
};
use crate::error::ApiError;
use crate::infrastructure::GatewayClient;
use crate::models::wire::{deserialize_flag, deserialize_id};
use crate::models::{
    Assignment, AssignmentState, Course, CourseState, Credential, DownloadReceipt,
    DownloadRequest, EnrollmentRole, Page, PageCursor, ProviderKind, RemoteSubmission, Session,
};

/// Moodle 角色短名 → 角色
static MOODLE_ROLES: phf::Map<&'static str, EnrollmentRole> = phf_map! {
    "editingteacher" => EnrollmentRole::Teacher,
    "teacher" => EnrollmentRole::TeachingAssistant,
    "noneditingteacher" => EnrollmentRole::TeachingAssistant,
    "coursecreator" => EnrollmentRole::Designer,
    "student" => EnrollmentRole::Student,
    "guest" => EnrollmentRole::Observer,
};

/// Moodle 客户端
#[derive(Clone)]
pub struct MoodleClient {
    gateway: GatewayClient,
}

impl MoodleClient {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }

    fn prefixed(path: &str) -> String {
        format!("{}{}", ProviderKind::Moodle.path_prefix(), path)
    }

    async fn fetch_page<T: serde::de::DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        extra_query: &[(&str, String)],
        cursor: Option<&PageCursor>,
    ) -> Result<T, ApiError> {
        let page = cursor.map(|c| c.as_str().to_string()).unwrap_or_else(|| "1".to_string());
        let mut query = vec![("page", page)];
        query.extend(extra_query.iter().cloned());
        let response = self
            .gateway
            .get::<T>(path, &query, Some(session.access_token()))
            .await?;
        Ok(response.body)
    }
}

#[async_trait]
impl LmsProvider for MoodleClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Moodle
    }

    async fn connect(&self, credential: &Credential) -> Result<Session, ApiError> {
        connect_via_gateway(&self.gateway, ProviderKind::Moodle, credential).await
    }

    async fn courses_page(
        &self,
        session: &Session,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Course>, ApiError> {
        let body: CoursesBody = self
            .fetch_page(session, &Self::prefixed("/courses"), &[], cursor)
            .await?;
        let next = body.paging.next_cursor(cursor);
        debug!("Moodle 课程页: {} 条, 有下一页: {}", body.courses.len(), next.is_some());

        Ok(Page {
            items: body.courses.into_iter().map(MoodleCourse::into_course).collect(),
            next,
        })
    }

    async fn assignments_page(
        &self,
        session: &Session,
        course_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Assignment>, ApiError> {
        let path = Self::prefixed(&format!("/courses/{}/assignments", course_id));
        let query = [("published", "true".to_string())];
        let body: AssignmentsBody = self.fetch_page(session, &path, &query, cursor).await?;
        let next = body.paging.next_cursor(cursor);

        Ok(Page {
            items: body
                .assignments
                .into_iter()
                .map(|a| a.into_assignment(course_id))
                .collect(),
            next,
        })
    }

    async fn list_submissions(
        &self,
        session: &Session,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<RemoteSubmission>, ApiError> {
        let path = Self::prefixed(&format!(
            "/courses/{}/assignments/{}/submissions",
            course_id, assignment_id
        ));

        collect_pages(&path, MAX_SUBMISSION_PAGES, |cursor| {
            let path = &path;
            async move {
                let body: SubmissionsBody = self.fetch_page(session, path, &[], cursor.as_ref()).await?;
                let next = body.paging.next_cursor(cursor.as_ref());
                let page = body
                    .submissions
                    .into_iter()
                    .map(MoodleSubmission::into_remote)
                    .collect();
                Ok((page, next))
            }
        })
        .await
    }

    async fn download_submission(
        &self,
        session: &Session,
        request: &DownloadRequest,
    ) -> Result<DownloadReceipt, ApiError> {
        download_via_gateway(&self.gateway, ProviderKind::Moodle, session, request).await
    }
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
}

// ========== 网关返回的 Moodle 原始结构 ==========

#[derive(Default, Deserialize)]
struct Paging {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    has_more: bool,
}

impl Paging {
    /// 响应里没写页码时按请求的页码推算；页码已到上限时视为最后一页
    fn next_cursor(&self, requested: Option<&PageCursor>) -> Option<PageCursor> {
        if !self.has_more {
            return None;
        }
        let current = self
            .page
            .or_else(|| requested.and_then(|c| c.as_str().parse().ok()))
            .unwrap_or(1);
        match current.checked_add(1) {
            Some(next) => Some(PageCursor(next.to_string())),
            None => {
                warn!("Moodle 页码已到上限 {}，停止翻页", current);
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct CoursesBody {
    #[serde(default)]
    courses: Vec<MoodleCourse>,
    #[serde(flatten)]
    paging: Paging,
}

#[derive(Deserialize)]
struct MoodleCourse {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default, alias = "name")]
    fullname: String,
    #[serde(default)]
    shortname: Option<String>,
    #[serde(default = "visible_by_default", deserialize_with = "deserialize_flag")]
    visible: bool,
    #[serde(default)]
    roles: Vec<MoodleRole>,
}

#[derive(Deserialize)]
struct MoodleRole {
    shortname: String,
}

fn visible_by_default() -> bool {
    true
}

impl MoodleCourse {
    fn into_course(self) -> Course {
        let enrollment_roles = self
            .roles
            .iter()
            .map(|r| {
                MOODLE_ROLES
                    .get(r.shortname.to_ascii_lowercase().as_str())
                    .copied()
                    .unwrap_or(EnrollmentRole::Other)
            })
            .collect();

        Course {
            id: self.id,
            name: self.fullname,
            course_code: self.shortname,
            workflow_state: if self.visible {
                CourseState::Available
            } else {
                CourseState::Unpublished
            },
            enrollment_roles,
        }
    }
}

#[derive(Deserialize)]
struct AssignmentsBody {
    #[serde(default)]
    assignments: Vec<MoodleAssignment>,
    #[serde(flatten)]
    paging: Paging,
}

#[derive(Deserialize)]
struct MoodleAssignment {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default = "visible_by_default", deserialize_with = "deserialize_flag")]
    visible: bool,
    #[serde(default)]
    grade: Option<f64>,
    #[serde(default)]
    duedate: Option<i64>,
}

impl MoodleAssignment {
    fn into_assignment(self, course_id: &str) -> Assignment {
        Assignment {
            id: self.id,
            course_id: course_id.to_string(),
            name: self.name,
            published: self.visible,
            workflow_state: if self.visible {
                AssignmentState::Published
            } else {
                AssignmentState::Unpublished
            },
            // Moodle 用负数表示量表评分
            points_possible: self.grade.filter(|g| *g > 0.0),
            due_at: from_unix(self.duedate),
        }
    }
}

#[derive(Deserialize)]
struct SubmissionsBody {
    #[serde(default)]
    submissions: Vec<MoodleSubmission>,
    #[serde(flatten)]
    paging: Paging,
}

#[derive(Deserialize)]
struct MoodleSubmission {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(deserialize_with = "deserialize_id")]
    userid: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timemodified: Option<i64>,
    #[serde(default)]
    files: Vec<serde_json::Value>,
    #[serde(default)]
    filecount: Option<usize>,
}

impl MoodleSubmission {
    fn into_remote(self) -> RemoteSubmission {
        let submitted = !matches!(self.status.as_deref(), Some("new") | None);

        RemoteSubmission {
            submission_id: self.id,
            student_id: self.userid,
            submitted,
            submitted_at: if submitted {
                from_unix(self.timemodified)
            } else {
                None
            },
            attachment_count: self.filecount.unwrap_or(0).max(self.files.len()),
        }
    }
}
