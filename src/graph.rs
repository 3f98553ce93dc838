//! Lymphatic drainage graph.
//!
//! Nodes are stored in an arena (tumors and lymph node levels in declaration
//! order) and edges refer to nodes by index. The graph is validated once at
//! construction and is immutable afterwards; only the spread probabilities
//! attached to its edges change, and those live outside the graph.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{LymphError, Result};
use crate::state_space::MAX_LNLS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Tumor,
    Lnl,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Tumor => "tumor",
            NodeKind::Lnl => "lnl",
        }
    }

    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "tumor" => Ok(NodeKind::Tumor),
            "lnl" => Ok(NodeKind::Lnl),
            other => Err(LymphError::Graph(format!(
                "unknown node kind '{}' (expected 'tumor' or 'lnl')",
                other
            ))),
        }
    }
}

/// Whether an edge starts at the tumor or at another LNL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeRole {
    /// Tumor → LNL.
    Base,
    /// LNL → LNL.
    Transition,
}

/// Declared graph: `(kind, name) → [target LNL names]`, in declaration order.
///
/// The order of LNL entries fixes the LNL indices and the order of the
/// edges fixes the layout of the parameter vector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphSpec {
    entries: Vec<(NodeKind, String, Vec<String>)>,
}

impl GraphSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: NodeKind, name: &str, targets: &[&str]) {
        self.entries.push((
            kind,
            name.to_string(),
            targets.iter().map(|t| t.to_string()).collect(),
        ));
    }

    /// Builder form of [`GraphSpec::push`] for a tumor node.
    pub fn tumor(mut self, name: &str, targets: &[&str]) -> Self {
        self.push(NodeKind::Tumor, name, targets);
        self
    }

    /// Builder form of [`GraphSpec::push`] for an LNL node.
    pub fn lnl(mut self, name: &str, targets: &[&str]) -> Self {
        self.push(NodeKind::Lnl, name, targets);
        self
    }

    pub fn entries(&self) -> &[(NodeKind, String, Vec<String>)] {
        &self.entries
    }
}

impl FromIterator<(NodeKind, String, Vec<String>)> for GraphSpec {
    fn from_iter<I: IntoIterator<Item = (NodeKind, String, Vec<String>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Indices into [`Graph::edges`].
    pub outgoing: Vec<usize>,
}

/// Directed edge carrying one spread probability.
#[derive(Clone, Debug)]
pub struct Edge {
    /// Arena index of the source node.
    pub source: usize,
    /// LNL index of the source, `None` for a tumor.
    pub parent_lnl: Option<usize>,
    /// LNL index of the target.
    pub target: usize,
    pub role: EdgeRole,
}

#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    /// Arena index of each LNL, in LNL order.
    lnl_nodes: Vec<usize>,
    lnl_index: HashMap<String, usize>,
    /// Base edges first, then transition edges. Position = parameter index.
    edges: Vec<Edge>,
    num_base: usize,
    /// Per LNL: indices of incoming edges.
    incoming: Vec<Vec<usize>>,
    spec: GraphSpec,
}

impl Graph {
    /// Validate a declared graph and build the node/edge arena.
    ///
    /// Fails with [`LymphError::Graph`] on duplicate nodes, unknown targets,
    /// edges pointing at a tumor, duplicate edges, cycles among LNLs, or a
    /// graph without tumor or LNL nodes.
    pub fn new(spec: GraphSpec) -> Result<Self> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut node_by_name: HashMap<&str, usize> = HashMap::new();
        let mut lnl_nodes = Vec::new();
        let mut lnl_index = HashMap::new();

        for (kind, name, _) in spec.entries() {
            if name.is_empty() {
                return Err(LymphError::Graph("node names must not be empty".to_string()));
            }
            if node_by_name.contains_key(name.as_str()) {
                return Err(LymphError::Graph(format!("node '{}' is declared twice", name)));
            }
            node_by_name.insert(name.as_str(), nodes.len());
            if *kind == NodeKind::Lnl {
                lnl_index.insert(name.clone(), lnl_nodes.len());
                lnl_nodes.push(nodes.len());
            }
            nodes.push(Node {
                name: name.clone(),
                kind: *kind,
                outgoing: Vec::new(),
            });
        }

        if lnl_nodes.is_empty() {
            return Err(LymphError::Graph("graph has no LNL nodes".to_string()));
        }
        if lnl_nodes.len() > MAX_LNLS {
            return Err(LymphError::Graph(format!(
                "graph has {} LNLs, at most {} are supported",
                lnl_nodes.len(),
                MAX_LNLS
            )));
        }
        if !nodes.iter().any(|n| n.kind == NodeKind::Tumor) {
            return Err(LymphError::Graph("graph has no tumor node".to_string()));
        }

        let mut base_edges = Vec::new();
        let mut trans_edges = Vec::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();

        for (kind, name, targets) in spec.entries() {
            let source = node_by_name[name.as_str()];
            for target_name in targets {
                let target_node = *node_by_name.get(target_name.as_str()).ok_or_else(|| {
                    LymphError::Graph(format!(
                        "edge {} -> {} targets a node that does not exist",
                        name, target_name
                    ))
                })?;
                if nodes[target_node].kind == NodeKind::Tumor {
                    return Err(LymphError::Graph(format!(
                        "edge {} -> {} targets a tumor node",
                        name, target_name
                    )));
                }
                if !seen.insert((source, target_node)) {
                    return Err(LymphError::Graph(format!(
                        "edge {} -> {} is declared twice",
                        name, target_name
                    )));
                }
                let target = lnl_index[target_name.as_str()];
                match kind {
                    NodeKind::Tumor => base_edges.push(Edge {
                        source,
                        parent_lnl: None,
                        target,
                        role: EdgeRole::Base,
                    }),
                    NodeKind::Lnl => trans_edges.push(Edge {
                        source,
                        parent_lnl: Some(lnl_index[name.as_str()]),
                        target,
                        role: EdgeRole::Transition,
                    }),
                }
            }
        }

        let num_base = base_edges.len();
        let mut edges = base_edges;
        edges.extend(trans_edges);

        let mut incoming = vec![Vec::new(); lnl_nodes.len()];
        for (edge_idx, edge) in edges.iter().enumerate() {
            nodes[edge.source].outgoing.push(edge_idx);
            incoming[edge.target].push(edge_idx);
        }

        let graph = Graph {
            nodes,
            lnl_nodes,
            lnl_index,
            edges,
            num_base,
            incoming,
            spec,
        };
        graph.check_acyclic()?;

        for (lnl, inc) in graph.incoming.iter().enumerate() {
            if inc.is_empty() {
                log::warn!(
                    "LNL '{}' has no incoming edges and can never become involved",
                    graph.lnl_name(lnl)
                );
            }
        }
        log::debug!(
            "built graph with {} LNLs, {} base and {} transition edges",
            graph.num_lnls(),
            graph.num_base_edges(),
            graph.num_transition_edges()
        );

        Ok(graph)
    }

    /// Kahn's algorithm over the LNL subgraph.
    fn check_acyclic(&self) -> Result<()> {
        let n = self.num_lnls();
        let mut in_degree = vec![0usize; n];
        for edge in self.transition_edges() {
            in_degree[edge.target] += 1;
        }

        let mut queue: Vec<usize> = (0..n).filter(|&k| in_degree[k] == 0).collect();
        let mut visited = 0;
        while let Some(lnl) = queue.pop() {
            visited += 1;
            let node = &self.nodes[self.lnl_nodes[lnl]];
            for &edge_idx in &node.outgoing {
                let target = self.edges[edge_idx].target;
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    queue.push(target);
                }
            }
        }

        if visited < n {
            let on_cycle: Vec<&str> = (0..n)
                .filter(|&k| in_degree[k] > 0)
                .map(|k| self.lnl_name(k))
                .collect();
            return Err(LymphError::Graph(format!(
                "LNL graph contains a cycle through {:?}",
                on_cycle
            )));
        }
        Ok(())
    }

    pub fn spec(&self) -> &GraphSpec {
        &self.spec
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub fn num_lnls(&self) -> usize {
        self.lnl_nodes.len()
    }

    pub fn lnl_name(&self, lnl: usize) -> &str {
        &self.nodes[self.lnl_nodes[lnl]].name
    }

    pub fn lnl_names(&self) -> Vec<String> {
        (0..self.num_lnls()).map(|k| self.lnl_name(k).to_string()).collect()
    }

    /// Stable LNL name → index lookup.
    pub fn lnl_index(&self, name: &str) -> Option<usize> {
        self.lnl_index.get(name).copied()
    }

    pub fn tumor_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Tumor)
            .map(|n| n.name.as_str())
            .collect()
    }

    /// All edges; the position of an edge is its parameter index.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn base_edges(&self) -> &[Edge] {
        &self.edges[..self.num_base]
    }

    pub fn transition_edges(&self) -> &[Edge] {
        &self.edges[self.num_base..]
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn num_base_edges(&self) -> usize {
        self.num_base
    }

    #[inline]
    pub fn num_transition_edges(&self) -> usize {
        self.edges.len() - self.num_base
    }

    /// Indices of the edges that drain into an LNL.
    #[inline]
    pub fn incoming(&self, lnl: usize) -> &[usize] {
        &self.incoming[lnl]
    }

    /// Human-readable `source->target` label of an edge.
    pub fn edge_name(&self, edge_idx: usize) -> String {
        let edge = &self.edges[edge_idx];
        format!(
            "{}->{}",
            self.nodes[edge.source].name,
            self.lnl_name(edge.target)
        )
    }
}
