use thiserror::Error;

use crate::flow::{AssetId, BindingKey, InstanceId, NodeId};
use crate::world::{ComponentId, ObjectId};

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("binding `{0}` already has a flow instance")]
    DuplicateBinding(BindingKey),
    #[error("component `{0}` has not begun play")]
    ComponentNotReady(ComponentId),
    #[error("flow asset `{0}` not found")]
    AssetNotFound(AssetId),
    #[error("flow asset `{asset}` failed to load: {reason}")]
    AssetLoad { asset: AssetId, reason: String },
    #[error("invalid flow asset `{asset}`: {reason}")]
    InvalidAsset { asset: AssetId, reason: String },
    #[error("unknown node `{node}` in flow asset `{asset}`")]
    UnknownNode { asset: AssetId, node: NodeId },
    #[error("node `{node}` in flow asset `{asset}` is not a sub graph node")]
    NotSubGraph { asset: AssetId, node: NodeId },
    #[error("flow instance `{0}` is not active")]
    InactiveInstance(InstanceId),
    #[error("sub graph nesting exceeds maximum depth {0}")]
    NestingTooDeep(u32),
    #[error("object `{0}` no longer exists")]
    ObjectGone(ObjectId),
    #[error("flow subsystem is not initialized")]
    NotInitialized,
    #[error("template loading requires a tokio runtime")]
    NoAsyncRuntime,
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
