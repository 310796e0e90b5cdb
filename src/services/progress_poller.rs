//! 任务进度轮询服务 - 业务能力层
//!
//! ## 职责
//!
//! 按固定间隔查询批改任务状态，直到任务结束、超时或被取消。
//!
//! ## 规则
//!
//! - 每个任务一个计时器，第一次查询立即发出
//! - 状态、计数和阶段只增不减，后端报告的回退被忽略
//! - 进度快照有变化时才推送，每次轮询恰好推送一次终止事件
//! - 瞬时错误按指数退避重试，连续失败超过上限后放弃
//! - 同一个任务同时只允许一个轮询
//! - 取消只停止本地轮询，不影响后端任务

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::GradingBackend;
use crate::config::Config;
use crate::error::{ApiError, PollError};
use crate::models::{GradingJob, JobHandle, JobStatus, ProgressSnapshot, Report, Session};
use crate::services::ResultAggregator;
use crate::utils::backoff::ExponentialBackoff;

/// 轮询参数
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
    /// 首次失败后最多再重试几次
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(30 * 60),
            max_retries: 3,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl PollOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(config.poll_timeout_secs),
            max_retries: config.poll_max_retries,
            backoff_initial: Duration::from_millis(config.poll_backoff_initial_ms),
            backoff_max: Duration::from_millis(config.poll_backoff_max_ms),
        }
    }
}

/// 推送给调用方的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress(ProgressSnapshot),
    Terminal(TerminalOutcome),
}

/// 轮询的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed { job_id: String, result_count: usize },
    Failed { job_id: String, message: String },
    TimedOut { job_id: String },
    Cancelled { job_id: String },
    Error { job_id: String, message: String },
}

impl TerminalOutcome {
    fn from_result(job_id: &str, result: &Result<Report, PollError>) -> Self {
        let job_id = job_id.to_string();
        match result {
            Ok(report) => TerminalOutcome::Completed {
                job_id,
                result_count: report.results().len(),
            },
            Err(PollError::JobFailed { message, .. }) => TerminalOutcome::Failed {
                job_id,
                message: message.clone(),
            },
            Err(PollError::Timeout { .. }) => TerminalOutcome::TimedOut { job_id },
            Err(PollError::Cancelled { .. }) => TerminalOutcome::Cancelled { job_id },
            Err(other) => TerminalOutcome::Error {
                job_id,
                message: other.to_string(),
            },
        }
    }
}

/// 任务进度轮询服务
pub struct ProgressPoller {
    backend: Arc<dyn GradingBackend>,
    aggregator: ResultAggregator,
    active: Arc<Mutex<HashSet<String>>>,
}

impl ProgressPoller {
    pub fn new(backend: Arc<dyn GradingBackend>, aggregator: ResultAggregator) -> Self {
        Self {
            backend,
            aggregator,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.active).contains(job_id)
    }

    /// 轮询直到任务结束，完成时拉取结果并生成报告
    pub async fn poll_until_terminal(
        &self,
        session: &Session,
        handle: &JobHandle,
        options: &PollOptions,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<PollEvent>>,
    ) -> Result<Report, PollError> {
        let job_id = handle.job_id.as_str();
        let Some(_guard) = PollGuard::acquire(&self.active, job_id) else {
            warn!("[任务 {}] ⚠️ 已有轮询在进行，拒绝重复轮询", job_id);
            return Err(PollError::AlreadyPolling {
                job_id: job_id.to_string(),
            });
        };

        info!(
            "[任务 {}] ⏳ 开始轮询 (间隔 {}秒, 超时 {}秒)",
            job_id,
            options.interval.as_secs(),
            options.timeout.as_secs()
        );

        let run = PollRun {
            job_id,
            options,
            cancel,
            started: Instant::now(),
            deadline: Instant::now() + options.timeout,
        };
        let result = self.run(&run, session, handle, events).await;

        log_terminal(job_id, &result);
        send(events, PollEvent::Terminal(TerminalOutcome::from_result(job_id, &result)));
        result
    }

    async fn run(
        &self,
        run: &PollRun<'_>,
        session: &Session,
        handle: &JobHandle,
        events: Option<&UnboundedSender<PollEvent>>,
    ) -> Result<Report, PollError> {
        let mut job = GradingJob::new(run.job_id);
        let mut last_seen: Option<ProgressSnapshot> = None;
        let mut ticker = tokio::time::interval(run.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(run.cancelled()),
                _ = sleep_until(run.deadline) => return Err(run.timed_out()),
                _ = ticker.tick() => {}
            }

            let report = run
                .with_retry(|| self.backend.job_status(session, run.job_id))
                .await?;
            if !job.apply(&report) {
                debug!(
                    "[任务 {}] 忽略回退的状态: {} → {}",
                    run.job_id, job.status, report.job_status
                );
            }

            let snapshot = job.snapshot();
            if last_seen.as_ref() != Some(&snapshot) {
                log_progress(&snapshot);
                send(events, PollEvent::Progress(snapshot.clone()));
                last_seen = Some(snapshot);
            }

            match job.status {
                JobStatus::Completed => {
                    let raw = run
                        .with_retry(|| self.backend.job_results(session, run.job_id))
                        .await?;
                    return Ok(self.aggregator.normalize(run.job_id, &handle.submission_ids, raw));
                }
                JobStatus::Failed => {
                    return Err(PollError::JobFailed {
                        job_id: run.job_id.to_string(),
                        message: job
                            .message
                            .clone()
                            .unwrap_or_else(|| "后端未说明失败原因".to_string()),
                    });
                }
                JobStatus::Queued | JobStatus::Processing => {}
            }
        }
    }
}

/// 一次轮询的上下文
struct PollRun<'a> {
    job_id: &'a str,
    options: &'a PollOptions,
    cancel: &'a CancellationToken,
    started: Instant,
    deadline: Instant,
}

impl PollRun<'_> {
    /// 调用后端，瞬时错误按指数退避重试；等待期间同样响应取消和超时
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut backoff = ExponentialBackoff::new(self.options.backoff_initial, self.options.backoff_max);
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = sleep_until(self.deadline) => return Err(self.timed_out()),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    return Err(PollError::Backend {
                        job_id: self.job_id.to_string(),
                        source: e,
                    });
                }
                Err(e) => e,
            };

            if backoff.attempts() >= self.options.max_retries {
                return Err(PollError::RetriesExhausted {
                    job_id: self.job_id.to_string(),
                    attempts: backoff.attempts() + 1,
                    source: err,
                });
            }

            let mut delay = backoff.next_delay();
            if let ApiError::RateLimited {
                retry_after: Some(secs),
                ..
            } = &err
            {
                delay = delay.max(Duration::from_secs(*secs));
            }
            warn!(
                "[任务 {}] 查询失败 (重试 {}/{}), {}毫秒后重试: {}",
                self.job_id,
                backoff.attempts(),
                self.options.max_retries,
                delay.as_millis(),
                err
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = sleep_until(self.deadline) => return Err(self.timed_out()),
                _ = sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self) -> PollError {
        PollError::Cancelled {
            job_id: self.job_id.to_string(),
        }
    }

    fn timed_out(&self) -> PollError {
        PollError::Timeout {
            job_id: self.job_id.to_string(),
            elapsed_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// 轮询期间占住任务 id，结束（包括取消）时释放
struct PollGuard {
    active: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl PollGuard {
    fn acquire(active: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Option<Self> {
        if !lock(active).insert(job_id.to_string()) {
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.job_id);
    }
}

fn lock(active: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 接收端已关闭时静默丢弃
fn send(events: Option<&UnboundedSender<PollEvent>>, event: PollEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

// ========== 日志辅助函数 ==========

fn log_progress(snapshot: &ProgressSnapshot) {
    debug!(
        "[任务 {}] 📊 {} / {}: {}/{} ({:.0}%)",
        snapshot.job_id,
        snapshot.status,
        snapshot.phase,
        snapshot.completed,
        snapshot.total,
        snapshot.percent()
    );
}

fn log_terminal(job_id: &str, result: &Result<Report, PollError>) {
    match result {
        Ok(report) => info!("[任务 {}] ✅ 批改完成，共 {} 条结果", job_id, report.results().len()),
        Err(PollError::Cancelled { .. }) => info!("[任务 {}] ⏹️ 轮询已取消", job_id),
        Err(e) => warn!("[任务 {}] ❌ {}", job_id, e),
    }
}
