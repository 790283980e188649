//! Phylogenetic tree support for metastat: arena trees, Newick I/O and
//! tree-derived correlation matrices.

pub mod correlation;
pub mod newick;
pub mod tree;

pub use correlation::{PhylogeneticTree, phylogenetic_correlation};
pub use newick::{parse_newick, to_newick};
pub use tree::{DEFAULT_BRANCH_LENGTH, Node, NodeId, PhyloTree};
