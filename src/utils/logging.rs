/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::models::{ProgressSnapshot, Report, ResultStatus};

/// 初始化日志
///
/// `RUST_LOG` 优先，否则按 `verbose` 选择 debug 或 info。重复调用不会报错。
///
/// # 参数
/// - `verbose`: 是否显示详细日志
pub fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("lms_auto_grade=debug,info")
            } else {
                EnvFilter::try_new("lms_auto_grade=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(verbose))
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - LMS 自动批改");
    info!("🏫 LMS: {} ({})", config.lms_provider, config.gateway_url);
    info!("📊 同步并发数: {}", config.sync_concurrency);
    info!(
        "⏱️  轮询间隔: {}秒, 超时: {}秒",
        config.poll_interval_secs, config.poll_timeout_secs
    );
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
///
/// # 参数
/// - `step`: 阶段编号
/// - `title`: 阶段名称
pub fn log_stage(step: usize, title: &str) {
    info!("\n{}", "─".repeat(60));
    info!("📦 第 {} 步: {}", step, title);
    info!("{}", "─".repeat(60));
}

/// 记录批改进度
pub fn log_progress(snapshot: &ProgressSnapshot) {
    info!(
        "[任务 {}] ⏳ {} / {}: {}/{} ({:.1}%)",
        snapshot.job_id,
        snapshot.status,
        snapshot.phase,
        snapshot.completed,
        snapshot.total,
        snapshot.percent()
    );
}

/// 打印最终统计信息
///
/// # 参数
/// - `report`: 批改报告
/// - `report_path`: 报告文件路径
pub fn print_final_stats(report: &Report, report_path: &str) {
    let stats = report.summary_stats();

    info!("\n{}", "=".repeat(60));
    info!("📊 批改完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 批改成功: {}/{}", stats.graded_count, stats.submission_count);
    info!("❌ 批改失败: {}", stats.failed_count);
    info!("📈 平均分: {:.2}%", stats.average_percentage);
    info!("🎯 及格人数: {}", stats.passing_count);
    let distribution: Vec<String> = stats
        .grade_distribution
        .iter()
        .map(|(grade, count)| format!("{}={}", grade, count))
        .collect();
    info!("🔤 等级分布: {}", distribution.join(", "));
    info!("{}", "=".repeat(60));

    for result in report.results() {
        match result.status {
            ResultStatus::Graded => info!(
                "  {} {:>6.2}% {} {}",
                result.student_id,
                result.percentage,
                result.letter_grade,
                truncate_text(&result.feedback, 40)
            ),
            ResultStatus::Failed => info!(
                "  {} 批改失败: {}",
                result.student_id,
                result.error.as_deref().unwrap_or("-")
            ),
        }
    }

    info!("\n报告已保存至: {}", report_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
