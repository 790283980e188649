use std::str::FromStr;

use anyhow::{Result, anyhow};
use chumsky::prelude::*;

use crate::tree::{DEFAULT_BRANCH_LENGTH, NodeId, PhyloTree};

#[derive(Debug, Clone)]
struct RawNode {
    name: String,
    length: Option<f64>,
    children: Vec<RawNode>,
}

type ParseErr<'a> = chumsky::extra::Err<chumsky::error::Simple<'a, char>>;

fn any_char<'a>() -> impl Parser<'a, &'a str, char, ParseErr<'a>> + Copy {
    any()
}

fn newick_parser<'a>() -> impl Parser<'a, &'a str, RawNode, ParseErr<'a>> {
    let label = any_char()
        .filter(|c: &char| !"(),;:".contains(*c))
        .repeated()
        .collect::<String>()
        .map(|s| s.trim().trim_matches('\'').to_string());

    let number = any_char()
        .filter(|c: &char| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .repeated()
        .at_least(1)
        .collect::<String>()
        .map(|s| f64::from_str(&s).unwrap_or(f64::NAN))
        .padded();

    let length = just(':').padded().ignore_then(number).or_not();

    let subtree = recursive(|subtree| {
        let children = subtree
            .separated_by(just(',').padded())
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just('(').padded(), just(')').padded());
        children
            .or_not()
            .then(label)
            .then(length)
            .map(|((children, name), length)| RawNode {
                name,
                length,
                children: children.unwrap_or_default(),
            })
    });

    subtree.then_ignore(just(';').padded()).then_ignore(end())
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Parse a single Newick tree. Missing branch lengths default to 1.
pub fn parse_newick(text: &str) -> Result<PhyloTree> {
    let cleaned = strip_comments(text);
    let cleaned = cleaned.trim();
    let raw = newick_parser().parse(cleaned).into_result().map_err(|errs| {
        let msg = errs
            .into_iter()
            .map(|e: chumsky::error::Simple<char>| {
                format!("parse error at {:?}: found {:?}", e.span(), e.found())
            })
            .collect::<Vec<_>>()
            .join("; ");
        anyhow!("Failed to parse Newick tree. {msg}")
    })?;

    let mut tree = PhyloTree::new();
    let root = tree.root();
    apply_raw(&mut tree, root, &raw)?;
    let mut stack: Vec<(NodeId, &RawNode)> = vec![(root, &raw)];
    while let Some((id, node)) = stack.pop() {
        for child in &node.children {
            let child_id = tree.add_child(id, "", DEFAULT_BRANCH_LENGTH)?;
            apply_raw(&mut tree, child_id, child)?;
            stack.push((child_id, child));
        }
    }
    Ok(tree)
}

fn apply_raw(tree: &mut PhyloTree, id: NodeId, raw: &RawNode) -> Result<()> {
    let node = tree
        .node_mut(id)
        .ok_or_else(|| anyhow!("node {id} missing from tree"))?;
    node.name = raw.name.clone();
    if let Some(length) = raw.length {
        if !length.is_finite() {
            return Err(anyhow!("invalid branch length for node '{}'", raw.name));
        }
        node.branch_length = length;
    }
    Ok(())
}

/// Newick text with branch lengths printed to `decimals` places, or no
/// branch lengths at all when `decimals` is `None`.
pub fn to_newick(tree: &PhyloTree, decimals: Option<usize>) -> String {
    let mut out = write_node(tree, tree.root(), decimals);
    out.push(';');
    out
}

fn write_node(tree: &PhyloTree, id: NodeId, decimals: Option<usize>) -> String {
    let Some(node) = tree.node(id) else {
        return String::new();
    };
    let mut out = if node.is_tip() {
        node.name.clone()
    } else {
        let inner = node
            .children
            .iter()
            .map(|&c| write_node(tree, c, decimals))
            .collect::<Vec<_>>()
            .join(",");
        format!("({inner}){}", node.name)
    };
    if let Some(dp) = decimals {
        out.push_str(&format!(":{:.*}", dp, node.branch_length));
    }
    out
}
