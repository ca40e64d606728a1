use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Flow 资产标识（软引用路径）
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(Arc<str>);

impl AssetId {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        AssetId::new(value)
    }
}

/// 资产内的节点标识
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId::new(value)
    }
}

/// Flow 节点类型
#[derive(Clone, Debug, PartialEq)]
pub enum FlowNodeKind {
    Entry,
    /// 运行时生成嵌套图实例的节点
    SubGraph { asset: AssetId },
    Finish,
    Custom(String),
}

/// Flow 节点定义
#[derive(Clone, Debug)]
pub struct FlowNodeDef {
    pub id: NodeId,
    pub kind: FlowNodeKind,
    pub metadata: Option<Value>,
}

impl FlowNodeDef {
    pub fn is_entry(&self) -> bool {
        matches!(self.kind, FlowNodeKind::Entry)
    }

    pub fn sub_graph_asset(&self) -> Option<&AssetId> {
        match &self.kind {
            FlowNodeKind::SubGraph { asset } => Some(asset),
            _ => None,
        }
    }
}

/// 节点连线
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowConnection {
    pub from: NodeId,
    pub to: NodeId,
}

/// 实例变量声明，每个实例从默认值开始拥有独立副本
#[derive(Clone, Debug)]
pub struct FlowVariableDef {
    pub name: String,
    pub default: Value,
    pub description: Option<String>,
}

impl FlowVariableDef {
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// 不可变的 Flow 图定义
#[derive(Clone, Debug)]
pub struct FlowAsset {
    pub id: AssetId,
    pub nodes: Vec<FlowNodeDef>,
    pub connections: Vec<FlowConnection>,
    pub variables: Vec<FlowVariableDef>,
}

impl FlowAsset {
    pub fn node(&self, id: &NodeId) -> Option<&FlowNodeDef> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    pub fn entry_nodes(&self) -> impl Iterator<Item = &FlowNodeDef> {
        self.nodes.iter().filter(|node| node.is_entry())
    }

    pub fn sub_graph_nodes(&self) -> impl Iterator<Item = (&NodeId, &AssetId)> {
        self.nodes
            .iter()
            .filter_map(|node| node.sub_graph_asset().map(|asset| (&node.id, asset)))
    }

    pub fn outputs(&self, from: &NodeId) -> impl Iterator<Item = &NodeId> {
        let from = from.clone();
        self.connections
            .iter()
            .filter(move |connection| connection.from == from)
            .map(|connection| &connection.to)
    }
}
