use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::asset::{AssetId, FlowAsset, NodeId};
use super::binding::{BindingKey, InstanceId, SubGraphNodeRef};

/// 已加载并缓存的模板，每个 AssetId 至多一个
#[derive(Debug)]
pub struct InstancedTemplate {
    asset: Arc<FlowAsset>,
}

impl InstancedTemplate {
    pub fn new(asset: Arc<FlowAsset>) -> Self {
        Self { asset }
    }

    pub fn id(&self) -> &AssetId {
        &self.asset.id
    }

    pub fn asset(&self) -> &FlowAsset {
        &self.asset
    }

    /// 为新实例生成变量工作副本
    fn spawn_variables(&self) -> HashMap<String, Value> {
        self.asset
            .variables
            .iter()
            .map(|variable| (variable.name.clone(), variable.default.clone()))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Finishing,
}

/// 运行中的 Flow 实例
pub struct FlowInstance {
    id: InstanceId,
    template: Arc<InstancedTemplate>,
    binding: BindingKey,
    depth: u32,
    state: InstanceState,
    variables: HashMap<String, Value>,
    /// 持有存活或挂起子实例的 SubGraph 节点，按启动顺序
    active_sub_graphs: Vec<NodeId>,
}

impl FlowInstance {
    pub(crate) fn new(
        id: InstanceId,
        template: Arc<InstancedTemplate>,
        binding: BindingKey,
        depth: u32,
    ) -> Self {
        let variables = template.spawn_variables();
        Self {
            id,
            template,
            binding,
            depth,
            state: InstanceState::Running,
            variables,
            active_sub_graphs: Vec::new(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn template(&self) -> &Arc<InstancedTemplate> {
        &self.template
    }

    pub fn asset_id(&self) -> &AssetId {
        self.template.id()
    }

    pub fn binding(&self) -> &BindingKey {
        &self.binding
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.binding.parent_instance()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub(crate) fn mark_finishing(&mut self) {
        self.state = InstanceState::Finishing;
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn active_sub_graphs(&self) -> impl Iterator<Item = SubGraphNodeRef> + '_ {
        self.active_sub_graphs
            .iter()
            .map(move |node| SubGraphNodeRef::new(self.id, node.clone()))
    }

    pub(crate) fn attach_sub_graph(&mut self, node: NodeId) {
        if !self.active_sub_graphs.contains(&node) {
            self.active_sub_graphs.push(node);
        }
    }

    pub(crate) fn detach_sub_graph(&mut self, node: &NodeId) {
        self.active_sub_graphs.retain(|existing| existing != node);
    }

    pub fn info(&self) -> FlowInstanceInfo {
        FlowInstanceInfo {
            id: self.id,
            asset: self.template.id().clone(),
            binding: self.binding.clone(),
            depth: self.depth,
            template: Arc::clone(&self.template),
        }
    }
}

/// 实例快照，交给运行时钩子和外部调用方
#[derive(Clone, Debug)]
pub struct FlowInstanceInfo {
    pub id: InstanceId,
    pub asset: AssetId,
    pub binding: BindingKey,
    pub depth: u32,
    pub template: Arc<InstancedTemplate>,
}

impl FlowInstanceInfo {
    pub fn parent(&self) -> Option<InstanceId> {
        self.binding.parent_instance()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.binding, BindingKey::Root(_))
    }
}
