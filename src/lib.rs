pub mod config;
pub mod error;
pub mod flow;
pub mod registry;
pub mod runtime;
pub mod utils;
pub mod world;

pub use config::{EnvConfig, SubsystemConfig};
pub use error::{FlowError, Result};
pub use flow::{
    AssetId, AssetLoader, BindingKey, FlowAsset, FlowAssetBuilder, FlowInstance, FlowInstanceInfo,
    FlowNodeKind, InstanceId, InstancedTemplate, MemoryAssetLoader, NodeId, SubGraphNodeRef,
};
pub use registry::{
    ComponentEvent, ComponentTracker, MatchType, Multicast, Tag, TagContainer,
    TagRegistryIndex, TaggedComponentEvent,
};
pub use runtime::{
    CascadeRuntime, FlowRuntime, FlowSubsystem, FlowSubsystemBuilder, StartOutcome,
    TracingRuntime,
};
pub use utils::logging;
pub use world::{ActorId, ComponentId, Facet, ObjectHost, ObjectId, World};
