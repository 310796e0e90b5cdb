//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，不关心流程顺序，顺序由 `workflow` 负责。

pub mod catalog_fetcher;
pub mod connection_manager;
pub mod job_dispatcher;
pub mod progress_poller;
pub mod result_aggregator;
pub mod session_store;
pub mod sync_coordinator;

pub use catalog_fetcher::CatalogFetcher;
pub use connection_manager::ConnectionManager;
pub use job_dispatcher::GradingJobDispatcher;
pub use progress_poller::{PollEvent, PollOptions, ProgressPoller, TerminalOutcome};
pub use result_aggregator::ResultAggregator;
pub use session_store::SessionStore;
pub use sync_coordinator::SyncCoordinator;
