// Flow 模块 - 图资产、模板缓存与实例存储

pub mod asset;
pub mod binding;
pub mod builder;
pub mod instance;
pub mod loader;
pub mod store;
pub mod templates;

// 重新导出核心类型
pub use asset::{AssetId, FlowAsset, FlowConnection, FlowNodeDef, FlowNodeKind, FlowVariableDef, NodeId};
pub use binding::{BindingKey, InstanceId, LoadTicket, SubGraphNodeRef};
pub use builder::FlowAssetBuilder;
pub use instance::{FlowInstance, FlowInstanceInfo, InstanceState, InstancedTemplate};
pub use loader::{AssetLoader, MemoryAssetLoader};
pub use store::{BindingState, FlowInstanceStore};
pub use templates::{Continuation, TemplateCache, TemplateRequest};
