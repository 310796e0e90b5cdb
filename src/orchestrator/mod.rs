//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 把配置、日志、状态机和输出串起来，跑完一次无人值守的批改。
//!
//! ## 层次关系
//!
//! ```text
//! orchestrator::App (读配置、处理 Ctrl-C、写报告)
//!     ↓
//! workflow::WorkflowStateMachine (阶段顺序和守卫)
//!     ↓
//! services (能力层：连接 / 目录 / 同步 / 派发 / 轮询 / 汇总)
//!     ↓
//! clients (Canvas / Moodle / 批改后端)
//!     ↓
//! infrastructure (网关 HTTP 客户端)
//! ```

pub mod grading_app;

pub use grading_app::App;
