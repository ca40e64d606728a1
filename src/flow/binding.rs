use std::fmt;

use crate::world::{define_handle_id, ObjectId};

use super::asset::NodeId;

define_handle_id!(
    /// Flow 实例句柄，由实例存储独占分配
    InstanceId,
    "instance"
);

/// 某个父实例中的 SubGraph 节点
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubGraphNodeRef {
    pub instance: InstanceId,
    pub node: NodeId,
}

impl SubGraphNodeRef {
    pub fn new(instance: InstanceId, node: impl Into<NodeId>) -> Self {
        Self {
            instance,
            node: node.into(),
        }
    }
}

impl fmt::Display for SubGraphNodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.node)
    }
}

/// 实例绑定键：根实例绑定到外部对象，嵌套实例绑定到 SubGraph 节点
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKey {
    Root(ObjectId),
    SubGraph(SubGraphNodeRef),
}

impl BindingKey {
    pub fn parent_instance(&self) -> Option<InstanceId> {
        match self {
            BindingKey::Root(_) => None,
            BindingKey::SubGraph(node) => Some(node.instance),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKey::Root(owner) => write!(f, "root:{owner}"),
            BindingKey::SubGraph(node) => write!(f, "sub:{node}"),
        }
    }
}

/// 挂起启动的票据；取消后的加载结果凭票据丢弃
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoadTicket(pub(crate) u64);
