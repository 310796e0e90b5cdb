//! 工作流上下文
//!
//! 封装"当前连的是谁、选的是哪门课哪个作业、同步和批改走到哪一步"这一信息

use std::fmt::Display;

use crate::models::{Assignment, Course, JobHandle, Report, Session, SyncSummary};
use crate::workflow::SelectionSet;

/// 工作流上下文
///
/// 每个阶段产出的数据都放在这里，后一阶段只读取前一阶段已经产出的数据。
#[derive(Debug, Default)]
pub struct WorkflowContext {
    pub session: Option<Session>,

    /// 最近一次加载的课程列表
    pub courses: Vec<Course>,

    /// 最近一次加载的作业列表
    pub assignments: Vec<Assignment>,

    /// 最近一次目录加载的警告（部分结果）
    pub catalog_warning: Option<String>,

    pub course_id: Option<String>,
    pub assignment_id: Option<String>,

    pub sync_summary: Option<SyncSummary>,
    pub selection: Option<SelectionSet>,
    pub job: Option<JobHandle>,
    pub report: Option<Report>,
}

impl WorkflowContext {
    /// 已选定的 (课程, 作业)
    pub fn chosen_pair(&self) -> Option<(&str, &str)> {
        match (&self.course_id, &self.assignment_id) {
            (Some(course), Some(assignment)) => Some((course, assignment)),
            _ => None,
        }
    }

    /// 清掉批改任务和报告
    pub(crate) fn clear_grading(&mut self) {
        self.job = None;
        self.report = None;
    }

    /// 清掉同步结果及之后的全部数据
    pub(crate) fn clear_sync(&mut self) {
        self.sync_summary = None;
        self.selection = None;
        self.clear_grading();
    }

    /// 清掉课程/作业选择及之后的全部数据
    pub(crate) fn clear_choice(&mut self) {
        self.assignments.clear();
        self.course_id = None;
        self.assignment_id = None;
        self.clear_sync();
    }
}

impl Display for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[课程 {} 作业 {}]",
            self.course_id.as_deref().unwrap_or("-"),
            self.assignment_id.as_deref().unwrap_or("-")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_choice_cascades() {
        let mut ctx = WorkflowContext {
            course_id: Some("c1".into()),
            assignment_id: Some("a1".into()),
            ..Default::default()
        };
        assert_eq!(ctx.chosen_pair(), Some(("c1", "a1")));
        assert_eq!(ctx.to_string(), "[课程 c1 作业 a1]");

        ctx.clear_choice();
        assert_eq!(ctx.chosen_pair(), None);
        assert_eq!(ctx.to_string(), "[课程 - 作业 -]");
    }
}
