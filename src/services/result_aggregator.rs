//! 结果汇总服务 - 业务能力层
//!
//! 把后端返回的异构结果规范化成统一的 [`GradingResult`]，并计算汇总统计

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::models::{
    CriterionScore, GradeScale, GradingResult, LetterGrade, RawGradingResult, Report,
    ResultStatus, SummaryStats,
};

/// 结果汇总服务
///
/// - 百分比 = score / max_score * 100；max_score 缺失或为 0 时才用后端给的百分比
/// - 等级只由百分比决定
/// - 平均分只统计批改成功的结果，没有时为 0
/// - 百分比保留两位小数
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    scale: GradeScale,
}

impl ResultAggregator {
    pub fn new(scale: GradeScale) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> &GradeScale {
        &self.scale
    }

    /// 生成报告，结果按学生 id 排序
    ///
    /// 只保留派发时选中的提交，每个提交一条结果：
    /// - 未选中提交的结果和缺少提交 id 的结果被丢弃
    /// - 同一提交的重复结果只保留第一条
    /// - 选中但后端没有返回结果的提交记为失败
    pub fn normalize(
        &self,
        job_id: &str,
        selected: &[String],
        raw_results: Vec<RawGradingResult>,
    ) -> Report {
        let wanted: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let mut by_submission: HashMap<String, RawGradingResult> = HashMap::new();
        for raw in raw_results {
            let Some(submission_id) = raw.submission_id.clone() else {
                warn!(
                    "[任务 {}] ⚠️ 丢弃缺少提交 id 的结果 (学生 {})",
                    job_id,
                    raw.student_id.as_deref().unwrap_or("-")
                );
                continue;
            };
            if !wanted.contains(submission_id.as_str()) {
                warn!("[任务 {}] ⚠️ 丢弃未选中提交的结果: {}", job_id, submission_id);
                continue;
            }
            if by_submission.contains_key(&submission_id) {
                warn!("[任务 {}] ⚠️ 提交 {} 有重复结果，只保留第一条", job_id, submission_id);
                continue;
            }
            by_submission.insert(submission_id, raw);
        }

        let mut emitted: HashSet<&str> = HashSet::new();
        let mut results: Vec<GradingResult> = Vec::with_capacity(wanted.len());
        for submission_id in selected {
            if !emitted.insert(submission_id.as_str()) {
                continue;
            }
            match by_submission.remove(submission_id) {
                Some(raw) => results.push(self.normalize_one(raw)),
                None => {
                    warn!("[任务 {}] ⚠️ 提交 {} 没有批改结果", job_id, submission_id);
                    results.push(self.missing_result(submission_id));
                }
            }
        }
        results.sort_by(|a, b| {
            a.student_id
                .cmp(&b.student_id)
                .then_with(|| a.submission_id.cmp(&b.submission_id))
        });

        let stats = self.summarize(&results);
        debug!(
            "[任务 {}] 汇总完成: {} 条结果, 平均 {:.2}%",
            job_id, stats.submission_count, stats.average_percentage
        );
        Report::new(job_id, stats, results)
    }

    fn missing_result(&self, submission_id: &str) -> GradingResult {
        GradingResult {
            submission_id: Some(submission_id.to_string()),
            student_id: submission_id.to_string(),
            score: 0.0,
            max_score: 0.0,
            percentage: 0.0,
            letter_grade: self.scale.letter_for(0.0),
            feedback: String::new(),
            criteria_scores: Vec::new(),
            status: ResultStatus::Failed,
            error: Some("后端未返回结果".to_string()),
        }
    }

    fn normalize_one(&self, raw: RawGradingResult) -> GradingResult {
        let student_id = raw
            .student_id
            .clone()
            .or_else(|| raw.submission_id.clone())
            .unwrap_or_default();

        let backend_failed = matches!(
            raw.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("failed") | Some("error")
        ) || raw.error.is_some();
        let error = if backend_failed {
            Some(raw.error.clone().unwrap_or_else(|| "批改失败".to_string()))
        } else if raw.score.is_none() && raw.percentage.is_none() {
            Some("结果缺少分数".to_string())
        } else {
            None
        };
        if let Some(e) = &error {
            warn!("[学生 {}] ⚠️ 批改结果无效: {}", student_id, e);
        }

        let score = raw.score.unwrap_or(0.0);
        let max_score = raw.max_score.unwrap_or(0.0);
        let percentage = if error.is_some() {
            0.0
        } else if max_score > 0.0 {
            score / max_score * 100.0
        } else {
            raw.percentage.unwrap_or(0.0)
        };
        let percentage = round2(percentage.max(0.0));

        let criteria_scores = raw
            .criteria_scores
            .into_iter()
            .enumerate()
            .map(|(i, c)| CriterionScore {
                criterion: c.criterion.unwrap_or_else(|| format!("评分项 {}", i + 1)),
                points: c.points.unwrap_or(0.0),
                max_points: c.max_points,
                comment: c.comment,
            })
            .collect();

        GradingResult {
            submission_id: raw.submission_id,
            student_id,
            score,
            max_score,
            percentage,
            letter_grade: self.scale.letter_for(percentage),
            feedback: raw.feedback.unwrap_or_default(),
            criteria_scores,
            status: if error.is_some() {
                ResultStatus::Failed
            } else {
                ResultStatus::Graded
            },
            error,
        }
    }

    fn summarize(&self, results: &[GradingResult]) -> SummaryStats {
        let graded: Vec<&GradingResult> = results
            .iter()
            .filter(|r| r.status == ResultStatus::Graded)
            .collect();

        let mut grade_distribution: BTreeMap<String, usize> = LetterGrade::ALL
            .iter()
            .map(|g| (g.as_str().to_string(), 0))
            .collect();
        for result in &graded {
            *grade_distribution
                .entry(result.letter_grade.as_str().to_string())
                .or_insert(0) += 1;
        }

        let average_percentage = if graded.is_empty() {
            0.0
        } else {
            round2(graded.iter().map(|r| r.percentage).sum::<f64>() / graded.len() as f64)
        };

        SummaryStats {
            submission_count: results.len(),
            graded_count: graded.len(),
            failed_count: results.len() - graded.len(),
            average_percentage,
            passing_count: graded
                .iter()
                .filter(|r| r.percentage >= self.scale.passing_threshold())
                .count(),
            grade_distribution,
            highest_percentage: graded.iter().map(|r| r.percentage).reduce(f64::max),
            lowest_percentage: graded.iter().map(|r| r.percentage).reduce(f64::min),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
