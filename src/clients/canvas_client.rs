//! Canvas 客户端
//!
//! 网关路径前缀 `/canvas`。分页走 HTTP `Link` 头的 `rel="next"`，
//! 游标就是下一页的完整 URL。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phf::phf_map;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{
    collect_pages, connect_via_gateway, download_via_gateway, LmsProvider, MAX_SUBMISSION_PAGES,
};
use crate::error::ApiError;
use crate::infrastructure::GatewayClient;
use crate::models::wire::deserialize_id;
use crate::models::{
    Assignment, AssignmentState, Course, CourseState, Credential, DownloadReceipt,
    DownloadRequest, EnrollmentRole, Page, PageCursor, ProviderKind, RemoteSubmission, Session,
};

const PER_PAGE: &str = "50";

/// Canvas 选课类型 → 角色（同时兼容 `teacher` 和 `TeacherEnrollment` 两种写法）
static CANVAS_ROLES: phf::Map<&'static str, EnrollmentRole> = phf_map! {
    "teacher" => EnrollmentRole::Teacher,
    "teacherenrollment" => EnrollmentRole::Teacher,
    "ta" => EnrollmentRole::TeachingAssistant,
    "taenrollment" => EnrollmentRole::TeachingAssistant,
    "designer" => EnrollmentRole::Designer,
    "designerenrollment" => EnrollmentRole::Designer,
    "student" => EnrollmentRole::Student,
    "studentenrollment" => EnrollmentRole::Student,
    "observer" => EnrollmentRole::Observer,
    "observerenrollment" => EnrollmentRole::Observer,
};

/// Canvas 客户端
#[derive(Clone)]
pub struct CanvasClient {
    gateway: GatewayClient,
}

impl CanvasClient {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }

    fn prefixed(path: &str) -> String {
        format!("{}{}", ProviderKind::Canvas.path_prefix(), path)
    }

    /// 第一页用相对路径加查询参数，之后直接请求 Link 头给出的 URL
    async fn fetch_page<T: serde::de::DeserializeOwned>(
        &self,
        session: &Session,
        first_page_path: &str,
        extra_query: &[(&str, String)],
        cursor: Option<&PageCursor>,
    ) -> Result<(T, Option<PageCursor>), ApiError> {
        let response = match cursor {
            Some(next) => {
                self.gateway
                    .get::<T>(next.as_str(), &[], Some(session.access_token()))
                    .await?
            }
            None => {
                let mut query = vec![("per_page", PER_PAGE.to_string())];
                query.extend(extra_query.iter().cloned());
                self.gateway
                    .get::<T>(first_page_path, &query, Some(session.access_token()))
                    .await?
            }
        };
        let next = next_link(response.link_header.as_deref());
        Ok((response.body, next))
    }
}

#[async_trait]
impl LmsProvider for CanvasClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Canvas
    }

    async fn connect(&self, credential: &Credential) -> Result<Session, ApiError> {
        connect_via_gateway(&self.gateway, ProviderKind::Canvas, credential).await
    }

    async fn courses_page(
        &self,
        session: &Session,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<Course>, ApiError> {
        let (body, next) = self
            .fetch_page::<CoursesBody>(session, &Self::prefixed("/courses"), &[], cursor)
            .await?;
        debug!("Canvas 课程页: {} 条, 有下一页: {}", body.courses.len(), next.is_some());

        Ok(Page {
            items: body.courses.into_iter().map(CanvasCourse::into_course).collect(),
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
        let (body, next) = self
            .fetch_page::<AssignmentsBody>(session, &path, &query, cursor)
            .await?;

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
                let (body, next) = self
                    .fetch_page::<SubmissionsBody>(session, path, &[], cursor.as_ref())
                    .await?;
                let page = body
                    .submissions
                    .into_iter()
                    .map(CanvasSubmission::into_remote)
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
        download_via_gateway(&self.gateway, ProviderKind::Canvas, session, request).await
    }
}

/// 从 `Link` 头里取出 `rel="next"` 的 URL
fn next_link(header: Option<&str>) -> Option<PageCursor> {
    let header = header?;
    let re = Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).ok()?;
    header
        .split(',')
        .find_map(|part| re.captures(part))
        .and_then(|caps| caps.get(1))
        .map(|m| PageCursor(m.as_str().to_string()))
}

// ========== 网关返回的 Canvas 原始结构 ==========

#[derive(Deserialize)]
struct CoursesBody {
    #[serde(default)]
    courses: Vec<CanvasCourse>,
}

#[derive(Deserialize)]
struct CanvasCourse {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    course_code: Option<String>,
    #[serde(default)]
    workflow_state: Option<String>,
    #[serde(default)]
    enrollments: Vec<CanvasEnrollment>,
}

#[derive(Deserialize)]
struct CanvasEnrollment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    enrollment_state: Option<String>,
}

impl CanvasCourse {
    fn into_course(self) -> Course {
        let workflow_state = match self.workflow_state.as_deref() {
            Some("available") => CourseState::Available,
            Some("unpublished") | Some("created") | Some("claimed") => CourseState::Unpublished,
            Some("completed") => CourseState::Completed,
            Some("deleted") => CourseState::Deleted,
            _ => CourseState::Unknown,
        };

        let enrollment_roles = self
            .enrollments
            .iter()
            .filter(|e| e.enrollment_state.as_deref().map_or(true, |s| s == "active"))
            .map(|e| {
                CANVAS_ROLES
                    .get(e.kind.to_ascii_lowercase().as_str())
                    .copied()
                    .unwrap_or(EnrollmentRole::Other)
            })
            .collect();

        Course {
            id: self.id,
            name: self.name,
            course_code: self.course_code,
            workflow_state,
            enrollment_roles,
        }
    }
}

#[derive(Deserialize)]
struct AssignmentsBody {
    #[serde(default)]
    assignments: Vec<CanvasAssignment>,
}

#[derive(Deserialize)]
struct CanvasAssignment {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    published: bool,
    #[serde(default)]
    workflow_state: Option<String>,
    #[serde(default)]
    points_possible: Option<f64>,
    #[serde(default)]
    due_at: Option<DateTime<Utc>>,
}

impl CanvasAssignment {
    fn into_assignment(self, course_id: &str) -> Assignment {
        let workflow_state = match self.workflow_state.as_deref() {
            Some("published") => AssignmentState::Published,
            Some("unpublished") => AssignmentState::Unpublished,
            Some("deleted") => AssignmentState::Deleted,
            None if self.published => AssignmentState::Published,
            None => AssignmentState::Unpublished,
            Some(_) => AssignmentState::Unknown,
        };

        Assignment {
            id: self.id,
            course_id: course_id.to_string(),
            name: self.name,
            published: self.published,
            workflow_state,
            points_possible: self.points_possible,
            due_at: self.due_at,
        }
    }
}

#[derive(Deserialize)]
struct SubmissionsBody {
    #[serde(default)]
    submissions: Vec<CanvasSubmission>,
}

#[derive(Deserialize)]
struct CanvasSubmission {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(deserialize_with = "deserialize_id")]
    user_id: String,
    #[serde(default)]
    workflow_state: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
}

impl CanvasSubmission {
    fn into_remote(self) -> RemoteSubmission {
        let submitted = match self.workflow_state.as_deref() {
            Some("unsubmitted") => false,
            Some(_) => true,
            None => self.submitted_at.is_some(),
        };

        RemoteSubmission {
            submission_id: self.id,
            student_id: self.user_id,
            submitted,
            submitted_at: self.submitted_at,
            attachment_count: self.attachments.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_link_parsing() {
        let header = r#"<https://gw.local/canvas/courses?page=1>; rel="current", <https://gw.local/canvas/courses?page=2&per_page=50>; rel="next", <https://gw.local/canvas/courses?page=9>; rel="last""#;
        assert_eq!(
            next_link(Some(header)),
            Some(PageCursor("https://gw.local/canvas/courses?page=2&per_page=50".into()))
        );

        let last_page = r#"<https://gw.local/canvas/courses?page=9>; rel="last""#;
        assert_eq!(next_link(Some(last_page)), None);
        assert_eq!(next_link(None), None);
    }

    #[test]
    fn test_course_roles_only_count_active_enrollments() {
        let raw: CanvasCourse = serde_json::from_str(
            r#"{
                "id": 101,
                "name": "Biology",
                "workflow_state": "available",
                "enrollments": [
                    {"type": "TeacherEnrollment", "enrollment_state": "completed"},
                    {"type": "student", "enrollment_state": "active"},
                    {"type": "ta"}
                ]
            }"#,
        )
        .unwrap();
        let course = raw.into_course();

        assert_eq!(course.id, "101");
        assert_eq!(
            course.enrollment_roles,
            vec![EnrollmentRole::Student, EnrollmentRole::TeachingAssistant]
        );
        assert!(course.is_gradable_by_user());
    }

    #[test]
    fn test_assignment_state_falls_back_to_published_flag() {
        let raw: CanvasAssignment =
            serde_json::from_str(r#"{"id": 5, "name": "Lab 1", "published": true}"#).unwrap();
        let assignment = raw.into_assignment("101");
        assert_eq!(assignment.workflow_state, AssignmentState::Published);
        assert_eq!(assignment.course_id, "101");
        assert!(assignment.is_listable());
    }

    #[test]
    fn test_unsubmitted_submission() {
        let raw: CanvasSubmission = serde_json::from_str(
            r#"{"id": 1, "user_id": 42, "workflow_state": "unsubmitted", "attachments": []}"#,
        )
        .unwrap();
        let remote = raw.into_remote();
        assert!(!remote.submitted);
        assert_eq!(remote.student_id, "42");

        let raw: CanvasSubmission = serde_json::from_str(
            r#"{"id": 2, "user_id": 43, "workflow_state": "submitted", "attachments": [{"id": 9}]}"#,
        )
        .unwrap();
        let remote = raw.into_remote();
        assert!(remote.submitted);
        assert_eq!(remote.attachment_count, 1);
    }
}
