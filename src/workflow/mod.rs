pub mod selection;
pub mod state_machine;
pub mod workflow_ctx;

pub use selection::SelectionSet;
pub use state_machine::{WorkflowStage, WorkflowStateMachine};
pub use workflow_ctx::WorkflowContext;
