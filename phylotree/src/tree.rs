//! Rooted phylogenetic trees stored as a node arena.
//!
//! Nodes are referenced by `NodeId` and keep a parent index instead of a
//! back-pointer, so ancestry queries are simple index walks.

use anyhow::{Result, anyhow};

pub type NodeId = usize;

/// Branch length assigned to nodes whose length is not given.
pub const DEFAULT_BRANCH_LENGTH: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Distance from this node to its parent.
    pub branch_length: f64,
    pub name: String,
}

impl Node {
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PhyloTree {
    /// A tree holding a single unnamed root.
    pub fn new() -> Self {
        let root = Node {
            id: 0,
            parent: None,
            children: Vec::new(),
            branch_length: DEFAULT_BRANCH_LENGTH,
            name: String::new(),
        };
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str, branch_length: f64) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(anyhow!(
                "parent index {parent} out of range ({})",
                self.nodes.len()
            ));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            name: name.to_string(),
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Tip node ids in left-to-right (pre-order) order.
    pub fn tips(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.is_tip() {
                out.push(id);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    pub fn tip_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_tip()).count()
    }

    pub fn tip_names(&self) -> Vec<String> {
        self.tips()
            .into_iter()
            .map(|id| self.nodes[id].name.clone())
            .collect()
    }

    /// First node, in pre-order, carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.name == name {
                return Some(id);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    pub fn find_tip_by_name(&self, name: &str) -> Option<NodeId> {
        self.tips()
            .into_iter()
            .find(|&id| self.nodes[id].name == name)
    }

    /// The node itself followed by every ancestor up to the root.
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            out.push(c);
            cur = self.nodes.get(c).and_then(|n| n.parent);
        }
        out
    }

    /// True when `query` lies strictly below `ancestor`.
    pub fn is_descendant(&self, ancestor: NodeId, query: NodeId) -> bool {
        query != ancestor && self.lineage(query).contains(&ancestor)
    }

    /// Deepest node that has both `a` and `b` in its subtree (either may be
    /// the ancestor of the other).
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let lineage_a = self.lineage(a);
        self.lineage(b)
            .into_iter()
            .find(|id| lineage_a.contains(id))
            .unwrap_or(self.root)
    }

    /// Sum of branch lengths walking from `node` up to `ancestor`. `None`
    /// when `ancestor` is not on the path to the root.
    pub fn distance_to_ancestor(&self, node: NodeId, ancestor: NodeId) -> Option<f64> {
        let mut distance = 0.0;
        let mut cur = node;
        while cur != ancestor {
            let n = self.nodes.get(cur)?;
            distance += n.branch_length;
            cur = n.parent?;
        }
        Some(distance)
    }

    /// Path length separating two nodes.
    pub fn distance_on_tree(&self, a: NodeId, b: NodeId) -> f64 {
        let anc = self.common_ancestor(a, b);
        self.distance_to_ancestor(a, anc).unwrap_or(0.0)
            + self.distance_to_ancestor(b, anc).unwrap_or(0.0)
    }

    /// Longest path from the node to any of its tips, counting the node's
    /// own branch.
    pub fn max_node_tip_length(&self, id: NodeId) -> f64 {
        let node = &self.nodes[id];
        let below = node
            .children
            .iter()
            .map(|&c| self.max_node_tip_length(c))
            .fold(0.0, f64::max);
        below + node.branch_length
    }
}
