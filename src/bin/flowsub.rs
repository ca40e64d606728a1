use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use flowsub::{
    tags, AssetId, CascadeRuntime, FlowAssetBuilder, FlowSubsystem, InstanceId, MatchType,
    MemoryAssetLoader, SubsystemConfig, Tag, World,
};
use flowsub::utils::LoggingConfig;

#[derive(Parser)]
#[command(name = "flowsub", version, about = "Flow Subsystem CLI", author)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 在内存世界中运行一组嵌套 Flow
    Demo {
        #[arg(long, default_value_t = 2)]
        owners: usize,
        #[arg(long)]
        config: Option<PathBuf>,
        /// 模拟的资产加载延迟（毫秒）
        #[arg(long, default_value_t = 10)]
        latency_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggingConfig::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo {
            owners,
            config,
            latency_ms,
        } => handle_demo(owners, config, latency_ms).await?,
    }
    Ok(())
}

fn demo_loader(latency_ms: u64) -> anyhow::Result<MemoryAssetLoader> {
    let loader = MemoryAssetLoader::new().with_latency(Duration::from_millis(latency_ms));
    loader.insert(
        FlowAssetBuilder::new("Flows/Encounter")
            .add_entry_node("start")
            .add_sub_graph_node("patrol", "Flows/Patrol")
            .add_sub_graph_node("combat", "Flows/Combat")
            .add_finish_node("done")
            .connect("start", "patrol")
            .connect("start", "combat")
            .connect("combat", "done")
            .variable("wave", serde_json::json!(1))
            .build()?,
    );
    loader.insert(
        FlowAssetBuilder::new("Flows/Patrol")
            .add_entry_node("start")
            .add_custom_node("walk", "MoveTo")
            .connect("start", "walk")
            .build()?,
    );
    loader.insert(
        FlowAssetBuilder::new("Flows/Combat")
            .add_entry_node("start")
            .add_sub_graph_node("reinforce", "Flows/Reinforce")
            .connect("start", "reinforce")
            .variable("alerted", serde_json::json!(false))
            .build()?,
    );
    loader.insert(
        FlowAssetBuilder::new("Flows/Reinforce")
            .add_entry_node("start")
            .add_finish_node("done")
            .connect("start", "done")
            .build()?,
    );
    Ok(loader)
}

async fn handle_demo(
    owners: usize,
    config: Option<PathBuf>,
    latency_ms: u64,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => SubsystemConfig::from_path(path)?.with_env_overrides()?,
        None => SubsystemConfig::from_env()?,
    };

    let world = Arc::new(World::new());
    let loader = Arc::new(demo_loader(latency_ms)?);
    let subsystem = FlowSubsystem::builder(world.clone(), loader.clone())
        .with_runtime(Arc::new(CascadeRuntime::default()))
        .with_config(config)
        .build();
    subsystem.initialize();

    let encounter = AssetId::new("Flows/Encounter");
    for index in 0..owners {
        let actor = world.spawn_actor(format!("Enemy_{index}"));
        let tags = if index == 0 {
            tags!["Enemy", "Boss"]
        } else {
            tags!["Enemy"]
        };
        let Some(component) = world.add_component(actor, tags) else {
            continue;
        };
        world.begin_play(component);
        subsystem.register_component(component);
        let outcome = subsystem.start_root_flow(actor, &encounter)?;
        println!("{actor}: {outcome:?}");
    }
    subsystem.settle().await;

    let mut roots: Vec<_> = subsystem.root_instances().into_iter().collect();
    roots.sort_by_key(|(owner, _)| owner.to_string());
    for (owner, root) in &roots {
        let name = world.name(*owner).unwrap_or_default();
        println!("{name}");
        print_tree(&subsystem, *root, 1);
    }

    let enemies = subsystem.actors_by_tag(&Tag::new("Enemy"));
    let bosses = subsystem.actors_by_tags(&tags!["Enemy", "Boss"], MatchType::All);
    println!("enemies: {}, bosses: {}", enemies.len(), bosses.len());
    println!(
        "templates: {:?}, loads: {}",
        subsystem
            .instanced_templates()
            .iter()
            .map(|asset| asset.as_str())
            .collect::<Vec<_>>(),
        loader.load_count()
    );

    if let Some((owner, _)) = roots.first() {
        subsystem.finish_root_flow(*owner, &encounter);
        println!("finished one root, {} instances left", subsystem.instance_count());
    }
    subsystem.deinitialize();
    Ok(())
}

fn print_tree(subsystem: &FlowSubsystem, id: InstanceId, depth: usize) {
    let Some(info) = subsystem.instance_info(id) else {
        return;
    };
    println!("{}{} [{}]", "  ".repeat(depth), info.asset, info.id);
    let children = subsystem.instanced_sub_flows();
    for node in subsystem.active_sub_flows(id) {
        match children.get(&node) {
            Some(child) => print_tree(subsystem, *child, depth + 1),
            None => println!("{}{} (pending)", "  ".repeat(depth + 1), node.node),
        }
    }
}
