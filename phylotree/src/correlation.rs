//! Tree-derived correlation between observations.
//!
//! Two observations are correlated by the share of evolutionary history
//! their tips have in common: the path from their common ancestor up to the
//! common ancestor of every included tip, scaled by the deepest included tip.

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::tree::{NodeId, PhyloTree};

/// Queries the correlation builder needs from a rooted tree.
pub trait PhylogeneticTree {
    type Node: Copy + PartialEq;

    fn tip_names(&self) -> Vec<String>;
    fn find_tip_by_name(&self, name: &str) -> Option<Self::Node>;
    fn common_ancestor(&self, a: Self::Node, b: Self::Node) -> Self::Node;
    fn distance_to_ancestor(&self, node: Self::Node, ancestor: Self::Node) -> Option<f64>;
    fn max_node_tip_length(&self, node: Self::Node) -> f64;
}

impl PhylogeneticTree for PhyloTree {
    type Node = NodeId;

    fn tip_names(&self) -> Vec<String> {
        PhyloTree::tip_names(self)
    }

    fn find_tip_by_name(&self, name: &str) -> Option<NodeId> {
        PhyloTree::find_tip_by_name(self, name)
    }

    fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        PhyloTree::common_ancestor(self, a, b)
    }

    fn distance_to_ancestor(&self, node: NodeId, ancestor: NodeId) -> Option<f64> {
        PhyloTree::distance_to_ancestor(self, node, ancestor)
    }

    fn max_node_tip_length(&self, node: NodeId) -> f64 {
        PhyloTree::max_node_tip_length(self, node)
    }
}

/// Row-major `n x n` correlation matrix for the given tip names (repeats
/// allowed). Diagonal entries are 1.
pub fn phylogenetic_correlation<T: PhylogeneticTree>(
    tree: &T,
    tip_names: &[String],
) -> Result<Vec<Vec<f64>>> {
    let n = tip_names.len();
    let mut tips = Vec::with_capacity(n);
    for name in tip_names {
        let tip = tree
            .find_tip_by_name(name)
            .ok_or_else(|| anyhow!("tip '{name}' not found in tree"))?;
        tips.push(tip);
    }
    let Some(&first) = tips.first() else {
        return Ok(Vec::new());
    };

    let mrca = tips
        .iter()
        .skip(1)
        .fold(first, |acc, &tip| tree.common_ancestor(tip, acc));

    let mut max_depth = 0.0_f64;
    for &tip in &tips {
        let depth = tree
            .distance_to_ancestor(tip, mrca)
            .ok_or_else(|| anyhow!("tip is not below the common ancestor of the sample"))?;
        max_depth = max_depth.max(depth);
    }
    debug!("phylogenetic correlation: {n} tips, max depth {max_depth}");

    let mut p = vec![vec![0.0; n]; n];
    for i in 0..n {
        p[i][i] = 1.0;
        for j in 0..i {
            let anc = tree.common_ancestor(tips[i], tips[j]);
            let shared = tree
                .distance_to_ancestor(anc, mrca)
                .ok_or_else(|| anyhow!("pairwise ancestor is not below the sample ancestor"))?;
            let value = if max_depth > 0.0 { shared / max_depth } else { 0.0 };
            p[i][j] = value;
            p[j][i] = value;
        }
    }
    Ok(p)
}
