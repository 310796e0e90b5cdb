//! 选择集
//!
//! 从一次同步结果里挑出要批改的提交。只有 synced / no_files 的提交可以被选中。

use std::collections::{HashMap, HashSet};

use crate::error::SelectionError;
use crate::models::{SyncStatus, SyncSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSet {
    course_id: String,
    assignment_id: String,
    /// 可选的提交，保持同步结果中的顺序
    eligible: Vec<String>,
    statuses: HashMap<String, SyncStatus>,
    selected: HashSet<String>,
}

impl SelectionSet {
    /// 初始为空选择
    pub fn from_summary(summary: &SyncSummary) -> Self {
        Self {
            course_id: summary.course_id.clone(),
            assignment_id: summary.assignment_id.clone(),
            eligible: summary.gradable_ids(),
            statuses: summary
                .records
                .iter()
                .map(|r| (r.submission_id.clone(), r.sync_status))
                .collect(),
            selected: HashSet::new(),
        }
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn assignment_id(&self) -> &str {
        &self.assignment_id
    }

    pub fn eligible(&self) -> &[String] {
        &self.eligible
    }

    /// 切换选中状态，返回切换后是否选中
    pub fn toggle(&mut self, submission_id: &str) -> Result<bool, SelectionError> {
        self.check_gradable(submission_id)?;
        if self.selected.remove(submission_id) {
            Ok(false)
        } else {
            self.selected.insert(submission_id.to_string());
            Ok(true)
        }
    }

    /// 选中全部可批改的提交，返回选中数量
    pub fn select_all(&mut self) -> usize {
        self.selected = self.eligible.iter().cloned().collect();
        self.selected.len()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, submission_id: &str) -> bool {
        self.selected.contains(submission_id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// 非空，且每个选中的提交都可批改
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.selected.is_empty() {
            return Err(SelectionError::Empty);
        }
        self.ids()
            .iter()
            .try_for_each(|id| self.check_gradable(id))
    }

    /// 选中的提交 id，按同步结果中的顺序
    pub fn ids(&self) -> Vec<String> {
        self.eligible
            .iter()
            .filter(|id| self.selected.contains(*id))
            .cloned()
            .collect()
    }

    fn check_gradable(&self, submission_id: &str) -> Result<(), SelectionError> {
        match self.statuses.get(submission_id) {
            None => Err(SelectionError::UnknownSubmission {
                submission_id: submission_id.to_string(),
            }),
            Some(status) if !status.is_gradable() => Err(SelectionError::NotGradable {
                submission_id: submission_id.to_string(),
                status: *status,
            }),
            Some(_) => Ok(()),
        }
    }
}
