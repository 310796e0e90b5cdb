//! 课程与作业目录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 当前用户在课程中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentRole {
    Teacher,
    TeachingAssistant,
    Designer,
    Student,
    Observer,
    Other,
}

impl EnrollmentRole {
    /// 教师或助教才能批改
    pub fn is_instructional(&self) -> bool {
        matches!(self, EnrollmentRole::Teacher | EnrollmentRole::TeachingAssistant)
    }
}

/// 课程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseState {
    Available,
    Unpublished,
    Completed,
    Deleted,
    Unknown,
}

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Published,
    Unpublished,
    Deleted,
    Unknown,
}

/// 课程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub course_code: Option<String>,
    pub workflow_state: CourseState,
    /// 只包含处于激活状态的选课角色
    pub enrollment_roles: Vec<EnrollmentRole>,
}

impl Course {
    /// 当前用户可以批改的课程：激活的教师/助教身份且课程可用
    pub fn is_gradable_by_user(&self) -> bool {
        self.workflow_state == CourseState::Available
            && self.enrollment_roles.iter().any(EnrollmentRole::is_instructional)
    }
}

/// 作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub course_id: String,
    pub name: String,
    pub published: bool,
    pub workflow_state: AssignmentState,
    pub points_possible: Option<f64>,
    pub due_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn is_listable(&self) -> bool {
        self.published
            && !matches!(
                self.workflow_state,
                AssignmentState::Unpublished | AssignmentState::Deleted
            )
    }
}

/// 分页游标，Canvas 为下一页 URL，Moodle 为页码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(pub String);

impl PageCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 一页数据
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// None 表示已经是最后一页
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// 聚合所有分页后的目录结果
#[derive(Debug, Clone)]
pub struct CatalogListing<T> {
    pub items: Vec<T>,
    pub pages_fetched: usize,
    /// 某一页失败时保留已拿到的部分，并在这里说明原因
    pub warning: Option<String>,
}

impl<T> CatalogListing<T> {
    pub fn is_partial(&self) -> bool {
        self.warning.is_some()
    }
}
