use std::sync::Arc;

use tracing::{debug, warn};

use crate::flow::{FlowInstanceInfo, SubGraphNodeRef};

use super::subsystem::FlowSubsystem;

/// 图节点运行时
///
/// 生命周期管理器在不持有内部锁的情况下调用这些钩子，钩子内可以回调 `FlowSubsystem`。
pub trait FlowRuntime: Send + Sync {
    /// 实例创建完成，从入口节点开始执行
    fn activate_entry(&self, subsystem: &FlowSubsystem, instance: &FlowInstanceInfo);

    /// 实例即将销毁；子实例的终止序列总是先于父实例执行
    fn run_termination_sequence(&self, subsystem: &FlowSubsystem, instance: &FlowInstanceInfo);

    /// SubGraph 节点的子实例已就绪，在子实例入口激活之前调用
    fn on_child_instance_ready(
        &self,
        _subsystem: &FlowSubsystem,
        _node: &SubGraphNodeRef,
        _child: &FlowInstanceInfo,
    ) {
    }
}

/// 只记录日志的默认运行时
#[derive(Default)]
pub struct TracingRuntime;

impl FlowRuntime for TracingRuntime {
    fn activate_entry(&self, _subsystem: &FlowSubsystem, instance: &FlowInstanceInfo) {
        let entries: Vec<&str> = instance
            .template
            .asset()
            .entry_nodes()
            .map(|node| node.id.as_str())
            .collect();
        debug!(instance = %instance.id, asset = %instance.asset, ?entries, "activate entry");
    }

    fn run_termination_sequence(&self, _subsystem: &FlowSubsystem, instance: &FlowInstanceInfo) {
        debug!(instance = %instance.id, asset = %instance.asset, "run termination sequence");
    }

    fn on_child_instance_ready(
        &self,
        _subsystem: &FlowSubsystem,
        node: &SubGraphNodeRef,
        child: &FlowInstanceInfo,
    ) {
        debug!(node = %node, child = %child.id, "child instance ready");
    }
}

/// 入口激活时启动实例内所有 SubGraph 节点，其余钩子转发给内部运行时
pub struct CascadeRuntime {
    inner: Arc<dyn FlowRuntime>,
}

impl Default for CascadeRuntime {
    fn default() -> Self {
        Self::new(Arc::new(TracingRuntime))
    }
}

impl CascadeRuntime {
    pub fn new(inner: Arc<dyn FlowRuntime>) -> Self {
        Self { inner }
    }
}

impl FlowRuntime for CascadeRuntime {
    fn activate_entry(&self, subsystem: &FlowSubsystem, instance: &FlowInstanceInfo) {
        self.inner.activate_entry(subsystem, instance);
        for (node, _) in instance.template.asset().sub_graph_nodes() {
            let node = SubGraphNodeRef::new(instance.id, node.clone());
            if let Err(err) = subsystem.start_sub_flow(&node, false) {
                warn!(node = %node, error = %err, "failed to start sub flow");
            }
        }
    }

    fn run_termination_sequence(&self, subsystem: &FlowSubsystem, instance: &FlowInstanceInfo) {
        self.inner.run_termination_sequence(subsystem, instance);
    }

    fn on_child_instance_ready(
        &self,
        subsystem: &FlowSubsystem,
        node: &SubGraphNodeRef,
        child: &FlowInstanceInfo,
    ) {
        self.inner.on_child_instance_ready(subsystem, node, child);
    }
}
