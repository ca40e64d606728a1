use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SubsystemConfig;
use crate::error::{FlowError, Result};
use crate::flow::{
    AssetId, AssetLoader, BindingKey, BindingState, Continuation, FlowAsset, FlowInstance,
    FlowInstanceInfo, FlowInstanceStore, InstanceId, InstancedTemplate, SubGraphNodeRef,
    TemplateRequest,
};
use crate::log_error;
use crate::registry::ComponentTracker;
use crate::world::{ObjectHost, ObjectId};

use super::hooks::{FlowRuntime, TracingRuntime};
use super::types::StartOutcome;

/// 锁外执行的运行时钩子
enum Effect {
    ChildReady {
        node: SubGraphNodeRef,
        child: FlowInstanceInfo,
    },
    Activate(FlowInstanceInfo),
}

pub(crate) struct SubsystemInner {
    config: SubsystemConfig,
    host: Arc<dyn ObjectHost>,
    loader: Arc<dyn AssetLoader>,
    runtime: Arc<dyn FlowRuntime>,
    store: Mutex<FlowInstanceStore>,
    pub(crate) components: ComponentTracker,
    initialized: AtomicBool,
    loads: Mutex<Vec<JoinHandle<()>>>,
}

/// Flow Subsystem
/// - 管理 Flow 图实例的生命周期
/// - 把 Flow 图与带 Flow 组件的 Actor 连接起来
///
/// 可廉价克隆的句柄；所有克隆共享同一份状态。
#[derive(Clone)]
pub struct FlowSubsystem {
    pub(crate) inner: Arc<SubsystemInner>,
}

/// Flow Subsystem 构建器
pub struct FlowSubsystemBuilder {
    host: Arc<dyn ObjectHost>,
    loader: Arc<dyn AssetLoader>,
    runtime: Arc<dyn FlowRuntime>,
    config: SubsystemConfig,
}

impl FlowSubsystemBuilder {
    pub fn with_runtime(mut self, runtime: Arc<dyn FlowRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_config(mut self, config: SubsystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> FlowSubsystem {
        FlowSubsystem {
            inner: Arc::new(SubsystemInner {
                config: self.config,
                components: ComponentTracker::new(Arc::clone(&self.host)),
                host: self.host,
                loader: self.loader,
                runtime: self.runtime,
                store: Mutex::new(FlowInstanceStore::new()),
                initialized: AtomicBool::new(false),
                loads: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl FlowSubsystem {
    pub fn builder(host: Arc<dyn ObjectHost>, loader: Arc<dyn AssetLoader>) -> FlowSubsystemBuilder {
        FlowSubsystemBuilder {
            host,
            loader,
            runtime: Arc::new(TracingRuntime),
            config: SubsystemConfig::default(),
        }
    }

    pub fn initialize(&self) {
        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            info!(
                max_nesting_depth = self.inner.config.max_nesting_depth,
                "flow subsystem initialized"
            );
        }
    }

    /// 结束所有根 Flow（叶子优先），取消挂起的启动并清空模板与组件注册表
    pub fn deinitialize(&self) {
        if !self.inner.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in self.inner.loads.lock().drain(..) {
            handle.abort();
        }

        let owners: Vec<ObjectId> = self
            .inner
            .store
            .lock()
            .root_instances()
            .into_iter()
            .map(|(owner, _)| owner)
            .collect();
        for owner in owners {
            self.finish_binding(BindingKey::Root(owner));
        }

        self.inner.store.lock().clear();
        self.inner.components.clear();
        info!("flow subsystem deinitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SubsystemConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &Arc<dyn ObjectHost> {
        &self.inner.host
    }

    /// 启动根 Flow；owner 已有根实例（含挂起中）时为空操作
    pub fn start_root_flow(
        &self,
        owner: impl Into<ObjectId>,
        asset: &AssetId,
    ) -> Result<StartOutcome> {
        let owner = owner.into();
        self.ensure_initialized()?;
        if !self.inner.host.is_alive(owner) {
            return Err(FlowError::ObjectGone(owner));
        }
        let store = self.inner.store.lock();
        self.begin_start(store, BindingKey::Root(owner), asset)
    }

    /// 结束根 Flow；asset 参数只用于诊断
    pub fn finish_root_flow(&self, owner: impl Into<ObjectId>, asset: &AssetId) -> bool {
        let owner = owner.into();
        let binding = BindingKey::Root(owner);
        if let Some(bound) = self.bound_asset(&binding) {
            if &bound != asset {
                debug!(%owner, requested = %asset, %bound, "finishing root flow of another asset");
            }
        }
        self.finish_binding(binding)
    }

    /// SubGraph 节点激活时调用；preloading 只预热模板
    pub fn start_sub_flow(&self, node: &SubGraphNodeRef, preloading: bool) -> Result<StartOutcome> {
        self.ensure_initialized()?;
        let mut store = self.inner.store.lock();
        let (child_asset, depth) = {
            let parent = store
                .instance(node.instance)
                .filter(|parent| parent.is_running())
                .ok_or(FlowError::InactiveInstance(node.instance))?;
            let definition = parent
                .template()
                .asset()
                .node(&node.node)
                .ok_or_else(|| FlowError::UnknownNode {
                    asset: parent.asset_id().clone(),
                    node: node.node.clone(),
                })?;
            let child_asset = definition.sub_graph_asset().cloned().ok_or_else(|| {
                FlowError::NotSubGraph {
                    asset: parent.asset_id().clone(),
                    node: node.node.clone(),
                }
            })?;
            (child_asset, parent.depth() + 1)
        };

        if preloading {
            let request = store.get_or_create_instance_template(&child_asset, Continuation::Preload);
            drop(store);
            if let TemplateRequest::Load = request {
                self.spawn_load(child_asset)?;
            }
            return Ok(StartOutcome::Preloaded);
        }

        if depth > self.inner.config.max_nesting_depth {
            return Err(FlowError::NestingTooDeep(self.inner.config.max_nesting_depth));
        }
        self.begin_start(store, BindingKey::SubGraph(node.clone()), &child_asset)
    }

    /// 只结束该节点的子实例（及其嵌套实例），兄弟节点不受影响
    pub fn finish_sub_flow(&self, node: &SubGraphNodeRef) -> bool {
        self.finish_binding(BindingKey::SubGraph(node.clone()))
    }

    pub fn root_flow(&self, owner: impl Into<ObjectId>) -> Option<InstanceId> {
        self.inner.store.lock().root_instance(owner.into())
    }

    /// 跳过已被销毁的 owner
    pub fn root_instances(&self) -> HashMap<ObjectId, InstanceId> {
        let roots = self.inner.store.lock().root_instances();
        roots
            .into_iter()
            .filter(|(owner, _)| self.inner.host.is_alive(*owner))
            .collect()
    }

    pub fn instanced_sub_flows(&self) -> HashMap<SubGraphNodeRef, InstanceId> {
        self.inner
            .store
            .lock()
            .sub_flow_instances()
            .into_iter()
            .collect()
    }

    pub fn instance_info(&self, id: InstanceId) -> Option<FlowInstanceInfo> {
        self.inner.store.lock().instance(id).map(FlowInstance::info)
    }

    pub fn active_sub_flows(&self, id: InstanceId) -> Vec<SubGraphNodeRef> {
        self.inner
            .store
            .lock()
            .instance(id)
            .map(|instance| instance.active_sub_graphs().collect())
            .unwrap_or_default()
    }

    pub fn instanced_templates(&self) -> Vec<AssetId> {
        self.inner.store.lock().instanced_templates()
    }

    pub fn instanced_template(&self, asset: &AssetId) -> Option<Arc<InstancedTemplate>> {
        self.inner.store.lock().instanced_template(asset)
    }

    pub fn template_ref_count(&self, asset: &AssetId) -> usize {
        self.inner.store.lock().template_ref_count(asset)
    }

    pub fn is_pending(&self, binding: &BindingKey) -> bool {
        self.inner.store.lock().pending_ticket(binding).is_some()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.store.lock().instance_count()
    }

    pub fn instance_variable(&self, id: InstanceId, name: &str) -> Option<Value> {
        self.inner
            .store
            .lock()
            .instance(id)
            .and_then(|instance| instance.variable(name).cloned())
    }

    pub fn set_instance_variable(
        &self,
        id: InstanceId,
        name: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>> {
        self.with_instance_mut(id, |instance| instance.set_variable(name, value))
            .ok_or(FlowError::InactiveInstance(id))
    }

    /// 闭包在存储锁内执行，不能回调 subsystem
    pub fn with_instance_mut<R>(
        &self,
        id: InstanceId,
        apply: impl FnOnce(&mut FlowInstance) -> R,
    ) -> Option<R> {
        self.inner.store.lock().instance_mut(id).map(apply)
    }

    /// 等待所有进行中的模板加载完成，包括加载回调中新发起的加载
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = self.inner.loads.lock().drain(..).collect();
            if pending.is_empty() {
                break;
            }
            for result in futures::future::join_all(pending).await {
                if let Err(err) = result {
                    if !err.is_cancelled() {
                        warn!(error = %err, "template load task failed");
                    }
                }
            }
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(FlowError::NotInitialized)
        }
    }

    fn bound_asset(&self, binding: &BindingKey) -> Option<AssetId> {
        let store = self.inner.store.lock();
        let id = store.live_instance(binding)?;
        store.instance(id).map(|instance| instance.asset_id().clone())
    }

    fn begin_start(
        &self,
        mut store: MutexGuard<'_, FlowInstanceStore>,
        binding: BindingKey,
        asset: &AssetId,
    ) -> Result<StartOutcome> {
        if store.binding_state(&binding).is_some() {
            drop(store);
            if self.inner.config.warn_on_duplicate_start {
                warn!(%binding, %asset, "flow already running");
            } else {
                debug!(%binding, %asset, "flow already running");
            }
            return Ok(StartOutcome::AlreadyRunning);
        }

        let ticket = store.reserve(binding.clone())?;
        let continuation = Continuation::Start {
            binding: binding.clone(),
            ticket,
        };
        match store.get_or_create_instance_template(asset, continuation) {
            TemplateRequest::Ready(template) => {
                let (id, effects) = self.finalize_start(&mut store, &binding, template)?;
                drop(store);
                self.run_effects(effects);
                Ok(StartOutcome::Started(id))
            }
            TemplateRequest::Queued => {
                debug!(%binding, %asset, "waiting for template load");
                Ok(StartOutcome::Pending)
            }
            TemplateRequest::Load => {
                drop(store);
                self.spawn_load(asset.clone())?;
                Ok(StartOutcome::Pending)
            }
        }
    }

    fn finalize_start(
        &self,
        store: &mut FlowInstanceStore,
        binding: &BindingKey,
        template: Arc<InstancedTemplate>,
    ) -> Result<(InstanceId, Vec<Effect>)> {
        let id = match store.create_instance(template, binding.clone()) {
            Ok(id) => id,
            Err(err) => {
                store.unbind(binding);
                return Err(err);
            }
        };
        let Some(info) = store.instance(id).map(FlowInstance::info) else {
            return Err(FlowError::InactiveInstance(id));
        };
        info!(instance = %id, asset = %info.asset, %binding, depth = info.depth, "flow instance created");

        let mut effects = Vec::with_capacity(2);
        if let BindingKey::SubGraph(node) = binding {
            effects.push(Effect::ChildReady {
                node: node.clone(),
                child: info.clone(),
            });
        }
        effects.push(Effect::Activate(info));
        Ok((id, effects))
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ChildReady { node, child } => {
                    if self.is_running(child.id) {
                        self.inner
                            .runtime
                            .on_child_instance_ready(self, &node, &child);
                    }
                }
                Effect::Activate(info) => {
                    if self.is_running(info.id) {
                        self.inner.runtime.activate_entry(self, &info);
                    }
                }
            }
        }
    }

    fn is_running(&self, id: InstanceId) -> bool {
        self.inner
            .store
            .lock()
            .instance(id)
            .map(FlowInstance::is_running)
            .unwrap_or(false)
    }

    fn spawn_load(&self, asset: AssetId) -> Result<()> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.complete_load(&asset, Err(FlowError::NoAsyncRuntime));
            return Err(FlowError::NoAsyncRuntime);
        };

        debug!(%asset, "template load started");
        let this = self.clone();
        let handle = runtime.spawn(async move {
            let result = match AssertUnwindSafe(this.inner.loader.load(&asset))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(FlowError::AssetLoad {
                    asset: asset.clone(),
                    reason: panic_reason(payload.as_ref()),
                }),
            };
            this.complete_load(&asset, result);
        });
        let mut loads = self.inner.loads.lock();
        loads.retain(|running| !running.is_finished());
        loads.push(handle);
        Ok(())
    }

    /// 尚未回收的加载任务数
    pub fn tracked_loads(&self) -> usize {
        self.inner.loads.lock().len()
    }

    /// 加载完成的后续处理：只有票据仍匹配的挂起启动才会创建实例
    fn complete_load(&self, asset: &AssetId, result: Result<Arc<FlowAsset>>) {
        let mut store = self.inner.store.lock();
        if !self.is_initialized() {
            debug!(%asset, "discarding template load after deinitialize");
            return;
        }

        let mut effects = Vec::new();
        match result {
            Ok(loaded) => {
                let (template, waiters) = store.resolve_template(asset, loaded);
                let mut preloaded = false;
                for waiter in waiters {
                    let (binding, ticket) = match waiter {
                        Continuation::Start { binding, ticket } => (binding, ticket),
                        Continuation::Preload => {
                            preloaded = true;
                            continue;
                        }
                    };
                    if store.pending_ticket(&binding) != Some(ticket) {
                        debug!(%binding, %asset, "pending start was cancelled, discarding");
                        continue;
                    }
                    match self.finalize_start(&mut store, &binding, Arc::clone(&template)) {
                        Ok((_, mut created)) => effects.append(&mut created),
                        Err(err) => warn!(%binding, error = %err, "failed to create flow instance"),
                    }
                }
                if !preloaded && store.template_ref_count(asset) == 0 {
                    store.release_instanced_template_if_unused(asset);
                }
            }
            Err(err) => {
                log_error!(err, asset = asset.as_str());
                for waiter in store.fail_template(asset) {
                    if let Continuation::Start { binding, ticket } = waiter {
                        if store.pending_ticket(&binding) == Some(ticket) {
                            store.unbind(&binding);
                            warn!(%binding, %asset, "flow start abandoned");
                        }
                    }
                }
            }
        }
        drop(store);
        self.run_effects(effects);
    }

    /// 取消挂起的启动，或按叶子优先拆除实例树
    fn finish_binding(&self, binding: BindingKey) -> bool {
        let teardown: Vec<FlowInstanceInfo> = {
            let mut store = self.inner.store.lock();
            match store.binding_state(&binding) {
                None => return false,
                Some(BindingState::Pending(_)) => {
                    store.unbind(&binding);
                    debug!(%binding, "pending flow start cancelled");
                    return true;
                }
                Some(BindingState::Live(id)) => store
                    .begin_teardown(id)
                    .into_iter()
                    .filter_map(|id| store.instance(id).map(FlowInstance::info))
                    .collect(),
            }
        };

        for info in teardown {
            self.inner.runtime.run_termination_sequence(self, &info);
            self.inner.store.lock().destroy(info.id);
            info!(instance = %info.id, asset = %info.asset, "flow instance finished");
        }
        true
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("loader panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("loader panicked: {message}")
    } else {
        "loader panicked".to_string()
    }
}
