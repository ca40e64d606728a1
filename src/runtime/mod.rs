// Flow 实例生命周期管理

mod components;
mod hooks;
mod subsystem;
mod types;

pub use hooks::{CascadeRuntime, FlowRuntime, TracingRuntime};
pub use subsystem::{FlowSubsystem, FlowSubsystemBuilder};
pub use types::StartOutcome;
