//! Process definitions: the static graph a document instance walks
//!
//! A definition is owned by the design collaborator and read-only to the
//! runtime. Node and edge order is significant: outgoing edges are always
//! considered in the order they were defined.

use crate::types::{
    EdgeId, EdgeKey, FormDefinitionId, NodeId, ProcessDefinitionId, ProjectId, ValidatorKey,
};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Kind of graph vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    /// A step binding a form
    Step,
    /// A routing point without a form
    Gateway,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_definition_id: Option<FormDefinitionId>,
    /// Gateway condition, kept for designers; routing follows edge order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Field-visibility validators active while an instance sits here
    #[serde(default)]
    pub validator_keys: Vec<ValidatorKey>,
}

impl Node {
    fn bare(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: NodeId::new(id),
            node_type,
            label: String::new(),
            form_definition_id: None,
            expression: None,
            validator_keys: Vec::new(),
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::bare(id, NodeType::Start)
    }

    pub fn step(id: impl Into<String>, form: FormDefinitionId) -> Self {
        Self {
            form_definition_id: Some(form),
            ..Self::bare(id, NodeType::Step)
        }
    }

    pub fn gateway(id: impl Into<String>) -> Self {
        Self::bare(id, NodeType::Gateway)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::bare(id, NodeType::End)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_validator(mut self, key: impl Into<String>) -> Self {
        self.validator_keys.push(ValidatorKey::new(key));
        self
    }

    pub fn is_end(&self) -> bool {
        self.node_type == NodeType::End
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub key: EdgeKey,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    /// Step-access validators gating traversal
    #[serde(default)]
    pub transition_validator_keys: Vec<ValidatorKey>,
}

impl Edge {
    /// Edge whose key defaults to its id
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            key: EdgeKey::new(id.clone()),
            id: EdgeId::new(id),
            source_node_id: NodeId::new(source),
            target_node_id: NodeId::new(target),
            label: String::new(),
            condition_expression: None,
            transition_validator_keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = EdgeKey::new(key);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition_expression = Some(expression.into());
        self
    }

    pub fn with_validator(mut self, key: impl Into<String>) -> Self {
        self.transition_validator_keys.push(ValidatorKey::new(key));
        self
    }
}

impl Default for EdgeKey {
    fn default() -> Self {
        EdgeKey::new("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: ProcessDefinitionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

fn default_version() -> u32 {
    1
}

/// Where resolve-forward stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// A node bound to a form: the next actionable step
    Form(&'a Node),
    /// An `end` node with nothing after it
    End(&'a Node),
    /// A form-less, non-end node with no outgoing edges
    DeadEnd(&'a Node),
    /// The walk came back to an already visited node
    Cycle(NodeId),
    /// The walk reached a node id the definition does not contain
    Missing(NodeId),
}

impl<'a> Resolution<'a> {
    pub fn form_node(&self) -> Option<&'a Node> {
        match self {
            Resolution::Form(node) => Some(node),
            _ => None,
        }
    }
}

/// Structural problem found by [`ProcessDefinition::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum GraphIssue {
    NoStartNode,
    MultipleStartNodes { nodes: Vec<NodeId> },
    DuplicateNodeId { node: NodeId },
    DanglingEdge { edge: EdgeId, missing: NodeId },
    StepWithoutForm { node: NodeId },
    UnreachableNode { node: NodeId },
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProcessDefinitionId::generate(),
            name: name.into(),
            description: String::new(),
            version: 1,
            project_id: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// First node of type `start`
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.node_type == NodeType::Start)
    }

    /// Outgoing edges of a node, in definition order
    pub fn edges_from<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source_node_id == node_id)
    }

    pub fn has_outgoing(&self, node_id: &NodeId) -> bool {
        self.edges_from(node_id).next().is_some()
    }

    /// Walk from `from` to the next form-bearing node.
    ///
    /// Form-less nodes are skipped by following their first outgoing edge.
    /// The walk never visits a node twice.
    pub fn resolve_forward(&self, from: &NodeId) -> Resolution<'_> {
        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut current = from;
        loop {
            if !visited.insert(current) {
                return Resolution::Cycle(current.clone());
            }
            let Some(node) = self.get_node(current) else {
                return Resolution::Missing(current.clone());
            };
            if node.form_definition_id.is_some() {
                return Resolution::Form(node);
            }
            match self.edges.iter().find(|e| e.source_node_id == node.id) {
                Some(edge) => current = &edge.target_node_id,
                None if node.is_end() => return Resolution::End(node),
                None => return Resolution::DeadEnd(node),
            }
        }
    }

    /// Check the graph for problems a designer should fix.
    ///
    /// An empty result means the definition is well formed. The runtime
    /// does not refuse to run definitions with issues.
    pub fn validate(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();

        let starts: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .map(|n| n.id.clone())
            .collect();
        match starts.len() {
            0 => issues.push(GraphIssue::NoStartNode),
            1 => {}
            _ => issues.push(GraphIssue::MultipleStartNodes {
                nodes: starts.clone(),
            }),
        }

        let mut graph: DiGraph<&NodeId, ()> = DiGraph::new();
        let mut index: HashMap<&NodeId, NodeIndex> = HashMap::new();
        for node in &self.nodes {
            if index.contains_key(&node.id) {
                issues.push(GraphIssue::DuplicateNodeId {
                    node: node.id.clone(),
                });
                continue;
            }
            index.insert(&node.id, graph.add_node(&node.id));
            if node.node_type == NodeType::Step && node.form_definition_id.is_none() {
                issues.push(GraphIssue::StepWithoutForm {
                    node: node.id.clone(),
                });
            }
        }

        for edge in &self.edges {
            let source = index.get(&edge.source_node_id);
            let target = index.get(&edge.target_node_id);
            match (source, target) {
                (Some(s), Some(t)) => {
                    graph.add_edge(*s, *t, ());
                }
                (None, _) => issues.push(GraphIssue::DanglingEdge {
                    edge: edge.id.clone(),
                    missing: edge.source_node_id.clone(),
                }),
                (_, None) => issues.push(GraphIssue::DanglingEdge {
                    edge: edge.id.clone(),
                    missing: edge.target_node_id.clone(),
                }),
            }
        }

        if let Some(start) = starts.first().and_then(|id| index.get(id)) {
            let mut reachable = HashSet::new();
            let mut bfs = Bfs::new(&graph, *start);
            while let Some(ix) = bfs.next(&graph) {
                reachable.insert(ix);
            }
            for node in &self.nodes {
                if let Some(ix) = index.get(&node.id) {
                    if !reachable.contains(ix) {
                        issues.push(GraphIssue::UnreachableNode {
                            node: node.id.clone(),
                        });
                    }
                }
            }
        }

        issues
    }
}
