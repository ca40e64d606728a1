use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use flowsub::{
    AssetId, AssetLoader, BindingKey, CascadeRuntime, FlowAsset, FlowAssetBuilder, FlowError,
    FlowInstanceInfo, FlowRuntime, FlowSubsystem, MemoryAssetLoader, ObjectId, StartOutcome,
    SubGraphNodeRef, SubsystemConfig, World,
};

#[derive(Default)]
struct RecordingRuntime {
    log: Mutex<Vec<String>>,
}

impl RecordingRuntime {
    fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl FlowRuntime for RecordingRuntime {
    fn activate_entry(&self, _subsystem: &FlowSubsystem, instance: &FlowInstanceInfo) {
        self.log.lock().push(format!("activate:{}", instance.asset));
    }

    fn run_termination_sequence(&self, _subsystem: &FlowSubsystem, instance: &FlowInstanceInfo) {
        self.log.lock().push(format!("terminate:{}", instance.asset));
    }

    fn on_child_instance_ready(
        &self,
        _subsystem: &FlowSubsystem,
        node: &SubGraphNodeRef,
        child: &FlowInstanceInfo,
    ) {
        self.log
            .lock()
            .push(format!("child:{}:{}", node.node, child.asset));
    }
}

/// 指定资产的加载会阻塞，直到测试放行
struct GatedLoader {
    inner: MemoryAssetLoader,
    gated: HashSet<AssetId>,
    gate: Semaphore,
}

impl GatedLoader {
    fn new(inner: MemoryAssetLoader, gated: &[&str]) -> Self {
        Self {
            inner,
            gated: gated.iter().map(|id| AssetId::new(id)).collect(),
            gate: Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS);
    }
}

#[async_trait]
impl AssetLoader for GatedLoader {
    async fn load(&self, asset: &AssetId) -> flowsub::Result<Arc<FlowAsset>> {
        if self.gated.contains(asset) {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|err| FlowError::Other(err.into()))?;
        }
        self.inner.load(asset).await
    }
}

/// 第一次加载时 panic，之后正常加载
struct PanicOnceLoader {
    inner: MemoryAssetLoader,
    panicked: AtomicBool,
}

#[async_trait]
impl AssetLoader for PanicOnceLoader {
    async fn load(&self, asset: &AssetId) -> flowsub::Result<Arc<FlowAsset>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("asset backend crashed");
        }
        self.inner.load(asset).await
    }
}

fn leaf(id: &str) -> FlowAsset {
    FlowAssetBuilder::new(id)
        .add_entry_node("start")
        .add_finish_node("done")
        .connect("start", "done")
        .build()
        .unwrap()
}

fn encounter() -> FlowAsset {
    FlowAssetBuilder::new("Flows/Encounter")
        .add_entry_node("start")
        .add_sub_graph_node("patrol", "Flows/Patrol")
        .add_sub_graph_node("combat", "Flows/Combat")
        .connect("start", "patrol")
        .connect("start", "combat")
        .variable("wave", json!(1))
        .build()
        .unwrap()
}

fn library() -> MemoryAssetLoader {
    let loader = MemoryAssetLoader::new();
    loader.insert(encounter());
    loader.insert(leaf("Flows/Patrol"));
    loader.insert(leaf("Flows/Combat"));
    loader
}

struct Harness {
    world: Arc<World>,
    runtime: Arc<RecordingRuntime>,
    subsystem: FlowSubsystem,
}

fn harness(loader: Arc<dyn AssetLoader>, cascade: bool, config: SubsystemConfig) -> Harness {
    let world = Arc::new(World::new());
    let runtime = Arc::new(RecordingRuntime::default());
    let hooks: Arc<dyn FlowRuntime> = if cascade {
        Arc::new(CascadeRuntime::new(runtime.clone()))
    } else {
        runtime.clone()
    };
    let subsystem = FlowSubsystem::builder(world.clone(), loader)
        .with_runtime(hooks)
        .with_config(config)
        .build();
    subsystem.initialize();
    Harness {
        world,
        runtime,
        subsystem,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

fn owner(world: &World, name: &str) -> ObjectId {
    world.spawn_actor(name).into()
}

#[tokio::test]
async fn starting_a_root_twice_is_idempotent() -> anyhow::Result<()> {
    let loader = Arc::new(library());
    let h = harness(loader.clone(), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");

    assert_eq!(h.subsystem.start_root_flow(actor, &asset)?, StartOutcome::Pending);
    assert_eq!(
        h.subsystem.start_root_flow(actor, &asset)?,
        StartOutcome::AlreadyRunning
    );
    h.subsystem.settle().await;

    assert_eq!(
        h.subsystem.start_root_flow(actor, &asset)?,
        StartOutcome::AlreadyRunning
    );
    assert_eq!(h.subsystem.instance_count(), 1);
    assert_eq!(loader.load_count(), 1);
    assert_eq!(h.runtime.entries(), vec!["activate:Flows/Encounter"]);

    // 模板已驻留，第二个 owner 同步启动
    let other = owner(&h.world, "Sidekick");
    let outcome = h.subsystem.start_root_flow(other, &asset)?;
    assert!(outcome.instance().is_some());
    assert_eq!(h.subsystem.root_instances().len(), 2);
    Ok(())
}

#[tokio::test]
async fn children_terminate_before_their_root() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), true, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");

    h.subsystem.start_root_flow(actor, &asset)?;
    h.subsystem.settle().await;
    assert_eq!(h.subsystem.instance_count(), 3);
    let root = h.subsystem.root_flow(actor).expect("root is live");
    assert_eq!(h.subsystem.active_sub_flows(root).len(), 2);
    assert_eq!(h.subsystem.instanced_sub_flows().len(), 2);

    assert!(h.subsystem.finish_root_flow(actor, &asset));
    let terminations: Vec<String> = h
        .runtime
        .entries()
        .into_iter()
        .filter(|entry| entry.starts_with("terminate:"))
        .collect();
    assert_eq!(terminations.len(), 3);
    assert_eq!(terminations[2], "terminate:Flows/Encounter");
    let children: HashSet<&str> = terminations[..2].iter().map(String::as_str).collect();
    assert_eq!(
        children,
        HashSet::from(["terminate:Flows/Patrol", "terminate:Flows/Combat"])
    );

    assert_eq!(h.subsystem.instance_count(), 0);
    assert!(h.subsystem.instanced_templates().is_empty());
    assert!(!h.subsystem.finish_root_flow(actor, &asset));
    Ok(())
}

#[tokio::test]
async fn child_ready_hook_runs_before_child_activation() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    h.subsystem
        .start_root_flow(actor, &AssetId::new("Flows/Encounter"))?;
    h.subsystem.settle().await;
    let root = h.subsystem.root_flow(actor).unwrap();

    let node = SubGraphNodeRef::new(root, "patrol");
    h.subsystem.start_sub_flow(&node, false)?;
    h.subsystem.settle().await;

    let child = h.subsystem.instanced_sub_flows()[&node];
    let info = h.subsystem.instance_info(child).unwrap();
    assert_eq!(info.parent(), Some(root));
    assert_eq!(info.depth, 1);
    assert_eq!(
        h.runtime.entries(),
        vec![
            "activate:Flows/Encounter",
            "child:patrol:Flows/Patrol",
            "activate:Flows/Patrol",
        ]
    );

    // 结束一个子节点不影响根实例
    assert!(h.subsystem.finish_sub_flow(&node));
    assert!(h.subsystem.active_sub_flows(root).is_empty());
    assert_eq!(h.subsystem.root_flow(actor), Some(root));
    Ok(())
}

#[tokio::test]
async fn cancelled_sub_flow_never_materializes() -> anyhow::Result<()> {
    let loader = Arc::new(GatedLoader::new(library(), &["Flows/Combat"]));
    let h = harness(loader.clone(), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    h.subsystem
        .start_root_flow(actor, &AssetId::new("Flows/Encounter"))?;
    h.subsystem.settle().await;
    let root = h.subsystem.root_flow(actor).unwrap();

    let node = SubGraphNodeRef::new(root, "combat");
    assert_eq!(h.subsystem.start_sub_flow(&node, false)?, StartOutcome::Pending);
    let binding = BindingKey::SubGraph(node.clone());
    assert!(h.subsystem.is_pending(&binding));

    assert!(h.subsystem.finish_sub_flow(&node));
    assert!(!h.subsystem.is_pending(&binding));

    loader.open();
    h.subsystem.settle().await;

    assert!(h.subsystem.instanced_sub_flows().is_empty());
    assert_eq!(h.subsystem.instance_count(), 1);
    assert!(!h
        .runtime
        .entries()
        .contains(&"activate:Flows/Combat".to_string()));
    assert_eq!(
        h.subsystem.instanced_templates(),
        vec![AssetId::new("Flows/Encounter")]
    );
    Ok(())
}

#[tokio::test]
async fn cancelled_root_start_frees_the_owner() -> anyhow::Result<()> {
    let loader = Arc::new(GatedLoader::new(library(), &["Flows/Encounter"]));
    let h = harness(loader.clone(), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");

    h.subsystem.start_root_flow(actor, &asset)?;
    assert!(h.subsystem.finish_root_flow(actor, &asset));
    loader.open();
    h.subsystem.settle().await;

    assert_eq!(h.subsystem.root_flow(actor), None);
    assert!(h.runtime.entries().is_empty());

    // 没有实例引用的模板随取消一起释放
    assert!(h.subsystem.instanced_template(&asset).is_none());
    assert_eq!(h.subsystem.start_root_flow(actor, &asset)?, StartOutcome::Pending);
    h.subsystem.settle().await;
    assert!(h.subsystem.root_flow(actor).is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_starts_share_a_single_load() -> anyhow::Result<()> {
    let loader = Arc::new(GatedLoader::new(library(), &["Flows/Encounter"]));
    let h = harness(loader.clone(), false, SubsystemConfig::default());
    let asset = AssetId::new("Flows/Encounter");

    let owners: Vec<ObjectId> = (0..3)
        .map(|index| owner(&h.world, &format!("Hero_{index}")))
        .collect();
    for actor in &owners {
        assert_eq!(h.subsystem.start_root_flow(*actor, &asset)?, StartOutcome::Pending);
    }
    loader.open();
    h.subsystem.settle().await;

    assert_eq!(loader.inner.load_count(), 1);
    assert_eq!(h.subsystem.root_instances().len(), 3);
    assert_eq!(h.subsystem.template_ref_count(&asset), 3);
    Ok(())
}

#[tokio::test]
async fn instances_get_independent_variables() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let asset = AssetId::new("Flows/Encounter");
    let first = owner(&h.world, "Hero");
    let second = owner(&h.world, "Sidekick");

    h.subsystem.start_root_flow(first, &asset)?;
    h.subsystem.start_root_flow(second, &asset)?;
    h.subsystem.settle().await;
    let a = h.subsystem.root_flow(first).unwrap();
    let b = h.subsystem.root_flow(second).unwrap();
    assert_ne!(a, b);

    let previous = h.subsystem.set_instance_variable(a, "wave", json!(5))?;
    assert_eq!(previous, Some(json!(1)));
    assert_eq!(h.subsystem.instance_variable(a, "wave"), Some(json!(5)));
    assert_eq!(h.subsystem.instance_variable(b, "wave"), Some(json!(1)));

    let info_a = h.subsystem.instance_info(a).unwrap();
    let info_b = h.subsystem.instance_info(b).unwrap();
    assert!(Arc::ptr_eq(&info_a.template, &info_b.template));
    Ok(())
}

#[tokio::test]
async fn template_is_released_with_its_last_instance() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let asset = AssetId::new("Flows/Encounter");
    let first = owner(&h.world, "Hero");
    let second = owner(&h.world, "Sidekick");

    h.subsystem.start_root_flow(first, &asset)?;
    h.subsystem.settle().await;
    h.subsystem.start_root_flow(second, &asset)?;
    assert_eq!(h.subsystem.template_ref_count(&asset), 2);

    h.subsystem.finish_root_flow(first, &asset);
    assert_eq!(h.subsystem.template_ref_count(&asset), 1);
    assert!(h.subsystem.instanced_template(&asset).is_some());

    h.subsystem.finish_root_flow(second, &asset);
    assert!(h.subsystem.instanced_template(&asset).is_none());
    Ok(())
}

#[tokio::test]
async fn failed_load_leaves_nothing_behind() -> anyhow::Result<()> {
    let loader = Arc::new(MemoryAssetLoader::new());
    let h = harness(loader.clone(), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Patrol");

    assert_eq!(h.subsystem.start_root_flow(actor, &asset)?, StartOutcome::Pending);
    h.subsystem.settle().await;
    assert_eq!(h.subsystem.root_flow(actor), None);
    assert!(!h.subsystem.is_pending(&BindingKey::Root(actor)));
    assert_eq!(h.subsystem.instance_count(), 0);
    assert!(h.subsystem.instanced_templates().is_empty());

    loader.insert(leaf("Flows/Patrol"));
    h.subsystem.start_root_flow(actor, &asset)?;
    h.subsystem.settle().await;
    assert!(h.subsystem.root_flow(actor).is_some());
    Ok(())
}

#[tokio::test]
async fn preloading_warms_the_template_only() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    h.subsystem
        .start_root_flow(actor, &AssetId::new("Flows/Encounter"))?;
    h.subsystem.settle().await;
    let root = h.subsystem.root_flow(actor).unwrap();
    let node = SubGraphNodeRef::new(root, "patrol");
    let patrol = AssetId::new("Flows/Patrol");

    assert_eq!(h.subsystem.start_sub_flow(&node, true)?, StartOutcome::Preloaded);
    h.subsystem.settle().await;
    assert!(h.subsystem.instanced_template(&patrol).is_some());
    assert_eq!(h.subsystem.template_ref_count(&patrol), 0);
    assert_eq!(h.subsystem.instance_count(), 1);
    assert!(h.subsystem.active_sub_flows(root).is_empty());

    let outcome = h.subsystem.start_sub_flow(&node, false)?;
    assert!(matches!(outcome, StartOutcome::Started(_)));
    Ok(())
}

#[tokio::test]
async fn nesting_depth_is_capped() -> anyhow::Result<()> {
    let loader = MemoryAssetLoader::new();
    loader.insert(
        FlowAssetBuilder::new("Flows/Recursive")
            .add_entry_node("start")
            .add_sub_graph_node("deeper", "Flows/Recursive")
            .connect("start", "deeper")
            .build()?,
    );
    let config = SubsystemConfig::default().with_max_nesting_depth(1);
    let h = harness(Arc::new(loader), true, config);
    let actor = owner(&h.world, "Hero");

    h.subsystem
        .start_root_flow(actor, &AssetId::new("Flows/Recursive"))?;
    h.subsystem.settle().await;
    assert_eq!(h.subsystem.instance_count(), 2);

    let root = h.subsystem.root_flow(actor).unwrap();
    let child = h.subsystem.instanced_sub_flows()[&SubGraphNodeRef::new(root, "deeper")];
    let err = h
        .subsystem
        .start_sub_flow(&SubGraphNodeRef::new(child, "deeper"), false)
        .unwrap_err();
    assert!(matches!(err, FlowError::NestingTooDeep(1)));
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_reported() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");
    h.subsystem.start_root_flow(actor, &asset)?;
    h.subsystem.settle().await;
    let root = h.subsystem.root_flow(actor).unwrap();

    let err = h
        .subsystem
        .start_sub_flow(&SubGraphNodeRef::new(root, "missing"), false)
        .unwrap_err();
    assert!(matches!(err, FlowError::UnknownNode { .. }));
    let err = h
        .subsystem
        .start_sub_flow(&SubGraphNodeRef::new(root, "start"), false)
        .unwrap_err();
    assert!(matches!(err, FlowError::NotSubGraph { .. }));

    h.subsystem.finish_root_flow(actor, &asset);
    let err = h
        .subsystem
        .start_sub_flow(&SubGraphNodeRef::new(root, "patrol"), false)
        .unwrap_err();
    assert!(matches!(err, FlowError::InactiveInstance(id) if id == root));

    let ghost = owner(&h.world, "Ghost");
    h.world.destroy(ghost);
    let err = h.subsystem.start_root_flow(ghost, &asset).unwrap_err();
    assert!(matches!(err, FlowError::ObjectGone(_)));
    Ok(())
}

#[tokio::test]
async fn destroyed_owners_drop_out_of_root_queries() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let actor = h.world.spawn_actor("Hero");
    h.subsystem
        .start_root_flow(actor, &AssetId::new("Flows/Encounter"))?;
    h.subsystem.settle().await;
    assert_eq!(h.subsystem.root_instances().len(), 1);

    h.world.destroy(actor);
    assert!(h.subsystem.root_instances().is_empty());
    Ok(())
}

#[tokio::test]
async fn deinitialize_tears_everything_down() -> anyhow::Result<()> {
    let loader = Arc::new(GatedLoader::new(library(), &["Flows/Combat"]));
    let h = harness(loader.clone(), true, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");
    h.subsystem.start_root_flow(actor, &asset)?;
    // combat 子实例仍在等待加载
    wait_until(|| h.subsystem.instance_count() == 2).await;
    let root = h.subsystem.root_flow(actor).unwrap();
    assert!(h
        .subsystem
        .is_pending(&BindingKey::SubGraph(SubGraphNodeRef::new(root, "combat"))));

    h.subsystem.deinitialize();
    loader.open();
    h.subsystem.settle().await;

    assert_eq!(h.subsystem.instance_count(), 0);
    assert!(h.subsystem.instanced_templates().is_empty());
    let terminations = h
        .runtime
        .entries()
        .into_iter()
        .filter(|entry| entry.starts_with("terminate:"))
        .count();
    assert_eq!(terminations, 2);
    assert!(matches!(
        h.subsystem.start_root_flow(actor, &asset),
        Err(FlowError::NotInitialized)
    ));
    Ok(())
}

#[test]
fn loading_without_async_runtime_fails_cleanly() {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let err = h
        .subsystem
        .start_root_flow(actor, &AssetId::new("Flows/Encounter"))
        .unwrap_err();
    assert!(matches!(err, FlowError::NoAsyncRuntime));
    assert!(!h.subsystem.is_pending(&BindingKey::Root(actor)));
}

#[test]
fn config_loads_from_file() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{ "max_nesting_depth": 3, "warn_on_duplicate_start": true }}"#
    )?;
    let config = SubsystemConfig::from_path(file.path())?;
    assert_eq!(config.max_nesting_depth, 3);
    assert!(config.warn_on_duplicate_start);

    let missing = SubsystemConfig::from_path(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(FlowError::Config(_))));
    Ok(())
}

#[tokio::test]
async fn panicking_loader_releases_pending_start() -> anyhow::Result<()> {
    let loader = Arc::new(PanicOnceLoader {
        inner: library(),
        panicked: AtomicBool::new(false),
    });
    let h = harness(loader, false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");

    assert_eq!(h.subsystem.start_root_flow(actor, &asset)?, StartOutcome::Pending);
    h.subsystem.settle().await;
    assert!(!h.subsystem.is_pending(&BindingKey::Root(actor)));
    assert_eq!(h.subsystem.root_flow(actor), None);
    assert!(h.subsystem.instanced_templates().is_empty());

    assert_eq!(h.subsystem.start_root_flow(actor, &asset)?, StartOutcome::Pending);
    h.subsystem.settle().await;
    assert!(h.subsystem.root_flow(actor).is_some());
    assert_eq!(h.runtime.entries(), vec!["activate:Flows/Encounter"]);
    Ok(())
}

#[tokio::test]
async fn finished_load_tasks_are_reaped_without_settle() -> anyhow::Result<()> {
    let h = harness(Arc::new(library()), false, SubsystemConfig::default());
    let actor = owner(&h.world, "Hero");
    let asset = AssetId::new("Flows/Encounter");

    for _ in 0..100 {
        assert_eq!(h.subsystem.start_root_flow(actor, &asset)?, StartOutcome::Pending);
        wait_until(|| h.subsystem.root_flow(actor).is_some()).await;
        assert!(h.subsystem.finish_root_flow(actor, &asset));
    }
    assert!(h.subsystem.tracked_loads() <= 1);
    Ok(())
}
