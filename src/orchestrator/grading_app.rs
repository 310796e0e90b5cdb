//! 无人值守批改运行器 - 编排层
//!
//! ## 职责
//!
//! 按配置把一次完整批改跑完：
//!
//! 1. **连接**：有 token 时用 token 连接，否则恢复保存的会话
//! 2. **定位目标**：列出课程和作业，按配置选中目标作业
//! 3. **同步**：下载全部提交
//! 4. **批改**：选中所有可批改的提交并派发任务
//! 5. **等待结果**：轮询进度并打印，Ctrl-C 取消
//! 6. **输出**：写报告文件并打印统计
//!
//! 本模块不做业务判断，只负责调度和输出。

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::Credential;
use crate::services::{PollEvent, TerminalOutcome};
use crate::utils::logging::{log_progress, log_stage, log_startup, print_final_stats};
use crate::workflow::WorkflowStateMachine;

/// 应用主结构
pub struct App {
    config: Config,
    machine: WorkflowStateMachine,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let machine = WorkflowStateMachine::from_config(&config).context("创建网关客户端失败")?;
        Ok(Self { config, machine })
    }

    /// 用现成的状态机初始化，测试时注入内存实现
    pub fn with_machine(config: Config, machine: WorkflowStateMachine) -> Self {
        Self { config, machine }
    }

    /// 运行应用主逻辑
    pub async fn run(mut self) -> Result<()> {
        let ctrl_c = watch_ctrl_c(self.machine.shutdown_token());
        let result = self.run_stages().await;
        ctrl_c.abort();
        result
    }

    async fn run_stages(&mut self) -> Result<()> {
        log_stage(1, "连接 LMS");
        self.connect().await?;

        log_stage(2, "选择课程和作业");
        let (course_id, assignment_id) = self.locate_target().await?;
        self.machine
            .choose_assignment(&course_id, &assignment_id)
            .context("选择作业失败")?;

        log_stage(3, "同步提交");
        self.machine.sync(false).await.context("同步提交失败")?;

        log_stage(4, "派发批改任务");
        let selected = self.machine.selection_mut()?.select_all();
        if selected == 0 {
            warn!("⚠️ 没有可批改的提交，程序结束");
            return Ok(());
        }
        info!("✓ 已选择 {} 份提交", selected);

        let strictness = self.config.strictness;
        let rubric_id = self.config.rubric_id.clone();
        self.machine
            .dispatch(rubric_id.as_deref(), strictness)
            .await
            .context("派发批改任务失败")?;

        log_stage(5, "等待批改结果");
        let (tx, rx) = mpsc::unbounded_channel();
        let printer = spawn_progress_printer(rx);
        let outcome = self.machine.await_results(Some(&tx)).await;
        drop(tx);
        if let Err(e) = printer.await {
            error!("进度输出任务异常退出: {}", e);
        }
        let report = outcome.context("等待批改结果失败")?;

        log_stage(6, "输出报告");
        report
            .write_json(&self.config.report_file)
            .await
            .with_context(|| format!("写入报告失败: {}", self.config.report_file))?;
        print_final_stats(report, &self.config.report_file);

        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        if !self.config.lms_token.trim().is_empty() {
            let credential = Credential::new(
                self.config.lms_provider,
                self.config.lms_endpoint.clone(),
                self.config.lms_token.clone(),
            );
            self.machine.connect(&credential).await.context("连接 LMS 失败")?;
            return Ok(());
        }

        if self.machine.resume().await.context("恢复会话失败")? {
            info!("✓ 已恢复上次的会话");
            Ok(())
        } else {
            bail!("没有保存的会话，请设置 LMS_TOKEN 和 LMS_ENDPOINT")
        }
    }

    /// 按配置找到目标课程和作业；只有一个候选时可以不配置
    async fn locate_target(&mut self) -> Result<(String, String)> {
        let courses = self.machine.load_courses().await.context("加载课程失败")?;
        let course_ids: Vec<String> = courses.iter().map(|c| c.id.clone()).collect();
        for course in courses {
            info!("  📚 {} {}", course.id, course.name);
        }
        let course_id = pick("课程", &course_ids, self.config.course_id.as_deref())?;

        let assignments = self
            .machine
            .load_assignments(&course_id)
            .await
            .context("加载作业失败")?;
        let assignment_ids: Vec<String> = assignments.iter().map(|a| a.id.clone()).collect();
        for assignment in assignments {
            info!("  📝 {} {}", assignment.id, assignment.name);
        }
        let assignment_id = pick("作业", &assignment_ids, self.config.assignment_id.as_deref())?;

        Ok((course_id, assignment_id))
    }
}

fn pick(kind: &str, ids: &[String], wanted: Option<&str>) -> Result<String> {
    match wanted {
        Some(id) if ids.iter().any(|c| c == id) => Ok(id.to_string()),
        Some(id) => bail!("找不到{} {} (可选: {})", kind, id, ids.join(", ")),
        None if ids.len() == 1 => Ok(ids[0].clone()),
        None if ids.is_empty() => bail!("没有可用的{}", kind),
        None => bail!("有多个{}可选，请在配置中指定: {}", kind, ids.join(", ")),
    }
}

/// Ctrl-C 时取消全部操作
fn watch_ctrl_c(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    warn!("⚠️ 收到 Ctrl-C，正在取消...");
                    shutdown.cancel();
                }
            }
        }
    })
}

fn spawn_progress_printer(mut rx: mpsc::UnboundedReceiver<PollEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PollEvent::Progress(snapshot) => log_progress(&snapshot),
                PollEvent::Terminal(TerminalOutcome::Completed { .. }) => break,
                PollEvent::Terminal(other) => {
                    warn!("⚠️ 批改未完成: {:?}", other);
                    break;
                }
            }
        }
    })
}
