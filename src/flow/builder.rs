use std::collections::HashSet;

use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::flow::asset::{
    AssetId, FlowAsset, FlowConnection, FlowNodeDef, FlowNodeKind, FlowVariableDef, NodeId,
};

/// Flow 资产构建器
pub struct FlowAssetBuilder {
    id: AssetId,
    nodes: Vec<FlowNodeDef>,
    connections: Vec<FlowConnection>,
    variables: Vec<FlowVariableDef>,
}

impl FlowAssetBuilder {
    pub fn new(id: impl Into<AssetId>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn add_entry_node(&mut self, name: &str) -> &mut Self {
        self.add_node(name, FlowNodeKind::Entry)
    }

    pub fn add_sub_graph_node(&mut self, name: &str, asset: impl Into<AssetId>) -> &mut Self {
        self.add_node(
            name,
            FlowNodeKind::SubGraph {
                asset: asset.into(),
            },
        )
    }

    pub fn add_finish_node(&mut self, name: &str) -> &mut Self {
        self.add_node(name, FlowNodeKind::Finish)
    }

    pub fn add_custom_node(&mut self, name: &str, node_type: &str) -> &mut Self {
        self.add_node(name, FlowNodeKind::Custom(node_type.to_string()))
    }

    pub fn add_node(&mut self, name: &str, kind: FlowNodeKind) -> &mut Self {
        self.nodes.push(FlowNodeDef {
            id: NodeId::new(name),
            kind,
            metadata: None,
        });
        self
    }

    pub fn with_metadata(&mut self, name: &str, metadata: Value) -> &mut Self {
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id.as_str() == name) {
            node.metadata = Some(metadata);
        }
        self
    }

    pub fn connect(&mut self, from: &str, to: &str) -> &mut Self {
        self.connections.push(FlowConnection {
            from: NodeId::new(from),
            to: NodeId::new(to),
        });
        self
    }

    pub fn declare_variable(&mut self, variable: FlowVariableDef) -> &mut Self {
        self.variables.push(variable);
        self
    }

    pub fn variable(&mut self, name: &str, default: Value) -> &mut Self {
        self.declare_variable(FlowVariableDef::new(name, default))
    }

    /// 校验并生成资产：至少一个入口节点，节点名唯一，连线两端存在
    pub fn build(&self) -> Result<FlowAsset> {
        let invalid = |reason: String| FlowError::InvalidAsset {
            asset: self.id.clone(),
            reason,
        };

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(invalid(format!("duplicate node `{}`", node.id)));
            }
        }
        if !self.nodes.iter().any(FlowNodeDef::is_entry) {
            return Err(invalid("no entry node".to_string()));
        }
        for connection in &self.connections {
            for end in [&connection.from, &connection.to] {
                if !seen.contains(end) {
                    return Err(invalid(format!("connection references unknown node `{end}`")));
                }
            }
        }
        let mut names = HashSet::new();
        for variable in &self.variables {
            if !names.insert(variable.name.as_str()) {
                return Err(invalid(format!("duplicate variable `{}`", variable.name)));
            }
        }

        Ok(FlowAsset {
            id: self.id.clone(),
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
            variables: self.variables.clone(),
        })
    }
}
