//! Validated graph index
//!
//! [`WorkflowGraph`] wraps a [`WorkflowGraphDef`] after structural validation
//! and pre-computes the adjacency indexes the scheduler queries on its hot
//! path: outgoing edges keyed by `(source node, source port)` and incoming
//! edges keyed by target node.
//!
//! Validation is pure: building twice from the same definition yields
//! identical results and mutates nothing.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::definitions::{NodeId, PortId, WorkflowEdge, WorkflowGraphDef, WorkflowNode};
use crate::error::{Result, WorkflowError};

/// Registry id anchoring the entry node
pub const START_NODE: &str = "Start";
/// Registry id anchoring the exit node
pub const END_NODE: &str = "End";

/// A structurally valid workflow graph with adjacency indexes
#[derive(Debug)]
pub struct WorkflowGraph {
    nodes: HashMap<NodeId, WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    /// `(source node, source port)` → edge indexes
    out_by_port: HashMap<(NodeId, PortId), Vec<usize>>,
    /// target node → edge indexes
    incoming: HashMap<NodeId, Vec<usize>>,
    /// direct successors per node, deduplicated, in edge order
    successors: HashMap<NodeId, Vec<NodeId>>,
    /// direct predecessors per node, deduplicated, in edge order
    predecessors: HashMap<NodeId, Vec<NodeId>>,
    start_id: NodeId,
    end_id: NodeId,
}

impl WorkflowGraph {
    /// Validate a definition and build the index.
    ///
    /// Checks, in order: unique node ids, edges referencing known nodes,
    /// exactly one Start and one End, acyclicity, and full reachability
    /// from Start.
    pub fn build(def: WorkflowGraphDef) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(def.nodes.len());
        for node in def.nodes {
            if nodes.insert(node.id.clone(), node).is_some() {
                return Err(WorkflowError::Structure(
                    "duplicate node id in definition".to_string(),
                ));
            }
        }

        for edge in &def.edges {
            for node_id in [&edge.source_node_id, &edge.target_node_id] {
                if !nodes.contains_key(node_id) {
                    return Err(WorkflowError::Structure(format!(
                        "edge references unknown node '{node_id}'"
                    )));
                }
            }
        }

        let start_id = single_anchor(&nodes, START_NODE)?;
        let end_id = single_anchor(&nodes, END_NODE)?;

        let mut out_by_port: HashMap<(NodeId, PortId), Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (i, edge) in def.edges.iter().enumerate() {
            out_by_port
                .entry((edge.source_node_id.clone(), edge.source_port_id.clone()))
                .or_default()
                .push(i);
            incoming.entry(edge.target_node_id.clone()).or_default().push(i);
            push_unique(
                successors.entry(edge.source_node_id.clone()).or_default(),
                &edge.target_node_id,
            );
            push_unique(
                predecessors.entry(edge.target_node_id.clone()).or_default(),
                &edge.source_node_id,
            );
        }

        let graph = Self {
            nodes,
            edges: def.edges,
            out_by_port,
            incoming,
            successors,
            predecessors,
            start_id,
            end_id,
        };
        graph.check_acyclic()?;
        graph.check_reachable()?;
        Ok(graph)
    }

    /// Kahn's algorithm: any node left with live in-degree means a cycle
    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(edge.target_node_id.as_str()) {
                *d += 1;
            }
        }
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for succ in self.successors(id) {
                // multi-edges decrement once per edge, so count them all
                let parallel = self
                    .edges
                    .iter()
                    .filter(|e| e.source_node_id == id && e.target_node_id == *succ)
                    .count();
                if let Some(d) = in_degree.get_mut(succ.as_str()) {
                    *d -= parallel;
                    if *d == 0 {
                        queue.push_back(succ.as_str());
                    }
                }
            }
        }
        if visited != self.nodes.len() {
            return Err(WorkflowError::Structure(
                "workflow graph contains a cycle".to_string(),
            ));
        }
        Ok(())
    }

    fn check_reachable(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([self.start_id.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for succ in self.successors(id) {
                queue.push_back(succ.as_str());
            }
        }
        if seen.len() != self.nodes.len() {
            let orphan = self
                .nodes
                .keys()
                .find(|id| !seen.contains(id.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(WorkflowError::Structure(format!(
                "node '{orphan}' is unreachable from the start node"
            )));
        }
        Ok(())
    }

    pub fn node(&self, node_id: &str) -> Result<&WorkflowNode> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.values()
    }

    pub fn start_id(&self) -> &NodeId {
        &self.start_id
    }

    pub fn end_id(&self) -> &NodeId {
        &self.end_id
    }

    /// Direct successors across all ports, deduplicated
    pub fn successors(&self, node_id: &str) -> &[NodeId] {
        self.successors.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct predecessors, deduplicated
    pub fn predecessors(&self, node_id: &str) -> &[NodeId] {
        self.predecessors.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Target nodes wired to one output port, deduplicated
    pub fn targets_from_port(&self, node_id: &str, port: &str) -> Vec<NodeId> {
        let Some(indexes) = self
            .out_by_port
            .get(&(node_id.to_string(), port.to_string()))
        else {
            return Vec::new();
        };
        let mut targets = Vec::with_capacity(indexes.len());
        for &i in indexes {
            push_unique(&mut targets, &self.edges[i].target_node_id);
        }
        targets
    }

    /// All edges arriving at a node
    pub fn incoming_edges(&self, node_id: &str) -> Vec<&WorkflowEdge> {
        self.incoming
            .get(node_id)
            .map(|indexes| indexes.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }
}

fn single_anchor(nodes: &HashMap<NodeId, WorkflowNode>, registry_id: &str) -> Result<NodeId> {
    let mut found: Vec<&NodeId> = nodes
        .iter()
        .filter(|(_, n)| n.data.registry_id == registry_id)
        .map(|(id, _)| id)
        .collect();
    match found.len() {
        1 => Ok(found.remove(0).clone()),
        0 => Err(WorkflowError::Structure(format!(
            "workflow must contain exactly one {registry_id} node, found none"
        ))),
        n => Err(WorkflowError::Structure(format!(
            "workflow must contain exactly one {registry_id} node, found {n}"
        ))),
    }
}

fn push_unique(list: &mut Vec<NodeId>, id: &NodeId) {
    if !list.iter().any(|existing| existing == id) {
        list.push(id.clone());
    }
}
