//! # LMS Auto Grade
//!
//! 连接 LMS（Canvas / Moodle），同步作业提交，派发自动批改任务并汇总成绩报告
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有 HTTP 连接，只暴露"发请求、解信封"的能力
//! - `GatewayClient` - 唯一的 reqwest 持有者
//!
//! ### ② 客户端层（Clients）
//! - `clients/` - 每个后端一个实现
//! - `LmsProvider` - Canvas / Moodle 能力接口，由配置选择
//! - `GradingBackend` - 批改后端接口
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `ConnectionManager` / `CatalogFetcher` / `SyncCoordinator`
//! - `GradingJobDispatcher` / `ProgressPoller` / `ResultAggregator`
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 定义一次批改的完整流程
//! - `WorkflowContext` - 各阶段产出的数据
//! - `WorkflowStateMachine` - 阶段顺序与守卫（connect → select_course → sync → select → grade → results）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/` - 无人值守运行器，处理配置、Ctrl-C 和报告输出
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出常用类型
pub use clients::{GradingBackend, LmsProvider};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::GatewayClient;
pub use orchestrator::App;
pub use services::{PollEvent, PollOptions, TerminalOutcome};
pub use workflow::{SelectionSet, WorkflowContext, WorkflowStage, WorkflowStateMachine};
