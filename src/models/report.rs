//! 批改结果与报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::wire::deserialize_opt_id;

/// 等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 5] = [
        LetterGrade::A,
        LetterGrade::B,
        LetterGrade::C,
        LetterGrade::D,
        LetterGrade::F,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 等级分界线（百分比下限）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeScale {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for GradeScale {
    fn default() -> Self {
        Self {
            a: 90.0,
            b: 80.0,
            c: 70.0,
            d: 60.0,
        }
    }
}

impl GradeScale {
    pub fn letter_for(&self, percentage: f64) -> LetterGrade {
        if percentage >= self.a {
            LetterGrade::A
        } else if percentage >= self.b {
            LetterGrade::B
        } else if percentage >= self.c {
            LetterGrade::C
        } else if percentage >= self.d {
            LetterGrade::D
        } else {
            LetterGrade::F
        }
    }

    /// D 线即及格线
    pub fn passing_threshold(&self) -> f64 {
        self.d
    }

    /// 返回所有问题，空表示合法
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let bands = [("a", self.a), ("b", self.b), ("c", self.c), ("d", self.d)];
        for (name, value) in bands {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                problems.push(format!("grade_thresholds.{} 必须在 [0, 100] 内: {}", name, value));
            }
        }
        if !(self.a > self.b && self.b > self.c && self.c > self.d) {
            problems.push("grade_thresholds 必须满足 a > b > c > d".to_string());
        }
        problems
    }
}

/// 后端返回的单条评分细项（字段名因后端而异）
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCriterion {
    #[serde(default, alias = "name", alias = "description")]
    pub criterion: Option<String>,
    #[serde(default, alias = "points", alias = "score")]
    pub points: Option<f64>,
    #[serde(default, alias = "points_possible", alias = "max_score")]
    pub max_points: Option<f64>,
    #[serde(default, alias = "comments", alias = "feedback")]
    pub comment: Option<String>,
}

/// 后端返回的单条原始结果（字段名因后端而异）
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawGradingResult {
    #[serde(default, alias = "submissionId", deserialize_with = "deserialize_opt_id")]
    pub submission_id: Option<String>,
    #[serde(
        default,
        alias = "studentId",
        alias = "user_id",
        alias = "userid",
        deserialize_with = "deserialize_opt_id"
    )]
    pub student_id: Option<String>,
    #[serde(default, alias = "points")]
    pub score: Option<f64>,
    #[serde(default, alias = "maxScore", alias = "points_possible")]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default, alias = "comments")]
    pub feedback: Option<String>,
    #[serde(default, alias = "criteriaScores", alias = "rubric_assessment")]
    pub criteria_scores: Vec<RawCriterion>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 规范化后的评分细项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub points: f64,
    pub max_points: Option<f64>,
    pub comment: Option<String>,
}

/// 单条结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Graded,
    Failed,
}

/// 规范化后的单个学生结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub submission_id: Option<String>,
    pub student_id: String,
    pub score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub letter_grade: LetterGrade,
    pub feedback: String,
    pub criteria_scores: Vec<CriterionScore>,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 汇总统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub submission_count: usize,
    pub graded_count: usize,
    pub failed_count: usize,
    /// 只统计 graded 的结果；没有结果时为 0
    pub average_percentage: f64,
    pub passing_count: usize,
    pub grade_distribution: BTreeMap<String, usize>,
    pub highest_percentage: Option<f64>,
    pub lowest_percentage: Option<f64>,
}

/// 批改报告，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    job_id: String,
    generated_at: DateTime<Utc>,
    summary_stats: SummaryStats,
    results: Vec<GradingResult>,
}

impl Report {
    pub(crate) fn new(
        job_id: impl Into<String>,
        summary_stats: SummaryStats,
        results: Vec<GradingResult>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            generated_at: Utc::now(),
            summary_stats,
            results,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn summary_stats(&self) -> &SummaryStats {
        &self.summary_stats
    }

    pub fn results(&self) -> &[GradingResult] {
        &self.results
    }

    /// 导出为 JSON 文件
    pub async fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        use anyhow::Context;

        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("无法写入报告文件: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bands() {
        let scale = GradeScale::default();
        assert_eq!(scale.letter_for(100.0), LetterGrade::A);
        assert_eq!(scale.letter_for(90.0), LetterGrade::A);
        assert_eq!(scale.letter_for(89.99), LetterGrade::B);
        assert_eq!(scale.letter_for(80.0), LetterGrade::B);
        assert_eq!(scale.letter_for(70.0), LetterGrade::C);
        assert_eq!(scale.letter_for(60.0), LetterGrade::D);
        assert_eq!(scale.letter_for(59.9), LetterGrade::F);
        assert_eq!(scale.letter_for(0.0), LetterGrade::F);
    }

    #[test]
    fn test_scale_problems() {
        assert!(GradeScale::default().problems().is_empty());

        let inverted = GradeScale {
            a: 60.0,
            b: 70.0,
            c: 80.0,
            d: 90.0,
        };
        assert_eq!(inverted.problems().len(), 1);

        let out_of_range = GradeScale {
            a: 120.0,
            ..GradeScale::default()
        };
        assert_eq!(out_of_range.problems().len(), 1);
    }

    #[test]
    fn test_raw_result_accepts_backend_spellings() {
        let raw: RawGradingResult = serde_json::from_str(
            r#"{
                "submissionId": 501,
                "user_id": 77,
                "points": 8.5,
                "points_possible": 10,
                "comments": "good",
                "rubric_assessment": [{"name": "Clarity", "points": 4, "points_possible": 5}]
            }"#,
        )
        .unwrap();

        assert_eq!(raw.submission_id.as_deref(), Some("501"));
        assert_eq!(raw.student_id.as_deref(), Some("77"));
        assert_eq!(raw.score, Some(8.5));
        assert_eq!(raw.max_score, Some(10.0));
        assert_eq!(raw.feedback.as_deref(), Some("good"));
        assert_eq!(raw.criteria_scores.len(), 1);
        assert_eq!(raw.criteria_scores[0].criterion.as_deref(), Some("Clarity"));
        assert_eq!(raw.criteria_scores[0].max_points, Some(5.0));
    }

    #[tokio::test]
    async fn test_write_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let stats = SummaryStats {
            submission_count: 0,
            graded_count: 0,
            failed_count: 0,
            average_percentage: 0.0,
            passing_count: 0,
            grade_distribution: BTreeMap::new(),
            highest_percentage: None,
            lowest_percentage: None,
        };
        let report = Report::new("job-x", stats, Vec::new());

        report.write_json(&path).await.unwrap();

        let loaded: Report =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }
}
