use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::world::{HandleTable, ObjectId};

use super::asset::{AssetId, FlowAsset};
use super::binding::{BindingKey, InstanceId, LoadTicket, SubGraphNodeRef};
use super::instance::{FlowInstance, InstancedTemplate};
use super::templates::{Continuation, TemplateCache, TemplateRequest};

/// 绑定键当前的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingState {
    /// 模板仍在加载，启动可被取消
    Pending(LoadTicket),
    Live(InstanceId),
}

/// Flow 实例存储
///
/// 独占所有实例；外部只持有 `InstanceId`。本身不加锁，由生命周期管理器串行访问。
#[derive(Default)]
pub struct FlowInstanceStore {
    instances: HandleTable<FlowInstance>,
    bindings: HashMap<BindingKey, BindingState>,
    templates: TemplateCache,
    next_ticket: u64,
}

impl FlowInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_instance_template(
        &mut self,
        asset: &AssetId,
        continuation: Continuation,
    ) -> TemplateRequest {
        self.templates.request(asset, continuation)
    }

    pub fn resolve_template(
        &mut self,
        asset: &AssetId,
        loaded: Arc<FlowAsset>,
    ) -> (Arc<InstancedTemplate>, Vec<Continuation>) {
        self.templates.resolve(asset, loaded)
    }

    pub fn fail_template(&mut self, asset: &AssetId) -> Vec<Continuation> {
        self.templates.fail(asset)
    }

    /// 预留绑定键，实例在模板就绪后创建
    pub fn reserve(&mut self, binding: BindingKey) -> Result<LoadTicket> {
        if self.bindings.contains_key(&binding) {
            return Err(FlowError::DuplicateBinding(binding));
        }
        if let BindingKey::SubGraph(node) = &binding {
            let parent = self
                .instances
                .get_mut(node.instance.0)
                .ok_or(FlowError::InactiveInstance(node.instance))?;
            parent.attach_sub_graph(node.node.clone());
        }
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.bindings.insert(binding, BindingState::Pending(ticket));
        Ok(ticket)
    }

    pub fn create_instance(
        &mut self,
        template: Arc<InstancedTemplate>,
        binding: BindingKey,
    ) -> Result<InstanceId> {
        if let Some(BindingState::Live(_)) = self.bindings.get(&binding) {
            return Err(FlowError::DuplicateBinding(binding));
        }
        let depth = match &binding {
            BindingKey::Root(_) => 0,
            BindingKey::SubGraph(node) => {
                let parent = self
                    .instances
                    .get_mut(node.instance.0)
                    .filter(|parent| parent.is_running())
                    .ok_or(FlowError::InactiveInstance(node.instance))?;
                parent.attach_sub_graph(node.node.clone());
                parent.depth() + 1
            }
        };

        self.templates.retain(template.id());
        let handle = self.instances.insert_with(|handle| {
            FlowInstance::new(InstanceId(handle), template, binding.clone(), depth)
        });
        let id = InstanceId(handle);
        self.bindings.insert(binding, BindingState::Live(id));
        Ok(id)
    }

    /// 移除绑定键（不销毁实例），并从父实例的子节点列表中摘除
    pub fn unbind(&mut self, binding: &BindingKey) -> Option<BindingState> {
        let state = self.bindings.remove(binding)?;
        if let BindingKey::SubGraph(node) = binding {
            if let Some(parent) = self.instances.get_mut(node.instance.0) {
                parent.detach_sub_graph(&node.node);
            }
        }
        Some(state)
    }

    /// 销毁实例并释放其模板引用
    pub fn destroy(&mut self, id: InstanceId) -> Option<FlowInstance> {
        let binding = self.instances.get(id.0)?.binding().clone();
        if self.bindings.get(&binding) == Some(&BindingState::Live(id)) {
            self.unbind(&binding);
        }
        let instance = self.instances.remove(id.0)?;
        self.release_instanced_template_if_unused(instance.asset_id());
        Some(instance)
    }

    /// 未绑定时为空操作
    pub fn destroy_instance(&mut self, binding: &BindingKey) -> Option<FlowInstance> {
        match self.unbind(binding)? {
            BindingState::Live(id) => self.destroy(id),
            BindingState::Pending(_) => None,
        }
    }

    pub fn release_instanced_template_if_unused(&mut self, asset: &AssetId) -> bool {
        self.templates.release(asset)
    }

    /// 为拆除一棵实例子树做准备：按后序（叶子优先）收集实例，立即移除整棵子树的绑定键
    /// 并标记为 Finishing
    pub fn begin_teardown(&mut self, root: InstanceId) -> Vec<InstanceId> {
        let mut order = Vec::new();
        let mut bindings = Vec::new();
        self.collect_subtree(root, &mut order, &mut bindings);
        for binding in &bindings {
            self.unbind(binding);
        }
        for id in &order {
            if let Some(instance) = self.instances.get_mut(id.0) {
                instance.mark_finishing();
            }
        }
        order
    }

    fn collect_subtree(
        &self,
        id: InstanceId,
        order: &mut Vec<InstanceId>,
        bindings: &mut Vec<BindingKey>,
    ) {
        let Some(instance) = self.instances.get(id.0) else {
            return;
        };
        for node in instance.active_sub_graphs() {
            let binding = BindingKey::SubGraph(node);
            match self.bindings.get(&binding) {
                Some(BindingState::Live(child)) => {
                    self.collect_subtree(*child, order, bindings);
                }
                Some(BindingState::Pending(_)) => bindings.push(binding),
                None => {}
            }
        }
        if self.bindings.get(instance.binding()) == Some(&BindingState::Live(id)) {
            bindings.push(instance.binding().clone());
        }
        order.push(id);
    }

    pub fn binding_state(&self, binding: &BindingKey) -> Option<BindingState> {
        self.bindings.get(binding).copied()
    }

    pub fn pending_ticket(&self, binding: &BindingKey) -> Option<LoadTicket> {
        match self.bindings.get(binding) {
            Some(BindingState::Pending(ticket)) => Some(*ticket),
            _ => None,
        }
    }

    pub fn live_instance(&self, binding: &BindingKey) -> Option<InstanceId> {
        match self.bindings.get(binding) {
            Some(BindingState::Live(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn instance(&self, id: InstanceId) -> Option<&FlowInstance> {
        self.instances.get(id.0)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut FlowInstance> {
        self.instances.get_mut(id.0)
    }

    pub fn root_instance(&self, owner: ObjectId) -> Option<InstanceId> {
        self.live_instance(&BindingKey::Root(owner))
    }

    pub fn root_instances(&self) -> Vec<(ObjectId, InstanceId)> {
        self.bindings
            .iter()
            .filter_map(|(binding, state)| match (binding, state) {
                (BindingKey::Root(owner), BindingState::Live(id)) => Some((*owner, *id)),
                _ => None,
            })
            .collect()
    }

    pub fn sub_flow_instances(&self) -> Vec<(SubGraphNodeRef, InstanceId)> {
        self.bindings
            .iter()
            .filter_map(|(binding, state)| match (binding, state) {
                (BindingKey::SubGraph(node), BindingState::Live(id)) => Some((node.clone(), *id)),
                _ => None,
            })
            .collect()
    }

    pub fn instanced_template(&self, asset: &AssetId) -> Option<Arc<InstancedTemplate>> {
        self.templates.get(asset)
    }

    pub fn instanced_templates(&self) -> Vec<AssetId> {
        self.templates.ready_ids()
    }

    pub fn template_ref_count(&self, asset: &AssetId) -> usize {
        self.templates.ref_count(asset)
    }

    pub fn loading_count(&self) -> usize {
        self.templates.loading_count()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.bindings.clear();
        self.templates.clear();
    }
}
