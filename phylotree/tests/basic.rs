use phylotree::{parse_newick, phylogenetic_correlation, to_newick};

#[test]
fn parse_newick_tip_names_and_lengths() {
    let tree = parse_newick("((A:1,B:1):1,C:2);").expect("parse tree");
    assert_eq!(tree.tip_names(), vec!["A", "B", "C"]);
    let a = tree.find_tip_by_name("A").expect("tip A");
    let c = tree.find_tip_by_name("C").expect("tip C");
    let root = tree.root();
    assert!((tree.distance_to_ancestor(a, root).expect("ancestor") - 2.0).abs() < 1e-12);
    assert!((tree.distance_on_tree(a, c) - 4.0).abs() < 1e-12);
    assert!(tree.is_descendant(root, a));
    assert!(!tree.is_descendant(a, root));
}

#[test]
fn missing_lengths_default_to_one() {
    let tree = parse_newick("((A,B),C);").expect("parse tree");
    assert!((tree.max_node_tip_length(tree.root()) - 3.0).abs() < 1e-12);
    assert_eq!(to_newick(&tree, Some(2)), "((A:1.00,B:1.00):1.00,C:1.00):1.00;");
    assert_eq!(to_newick(&tree, None), "((A,B),C);");
}

#[test]
fn comments_and_whitespace_are_ignored() {
    let tree = parse_newick(" ( A : 0.5 , [note] B : 0.5 ) ; ").expect("parse tree");
    assert_eq!(tree.tip_count(), 2);
    assert!(tree.find_tip_by_name("B").is_some());
}

#[test]
fn malformed_newick_is_an_error() {
    assert!(parse_newick("((A,B),C").is_err());
}

#[test]
fn correlation_is_shared_path_over_depth() {
    let tree = parse_newick("((A:1,B:1):1,C:2);").expect("parse tree");
    let names = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    let p = phylogenetic_correlation(&tree, &names).expect("correlation");
    assert!((p[0][0] - 1.0).abs() < 1e-12);
    assert!((p[0][1] - 0.5).abs() < 1e-12);
    assert!((p[1][0] - 0.5).abs() < 1e-12);
    assert!(p[0][2].abs() < 1e-12);
    assert!(p[2][1].abs() < 1e-12);
}

#[test]
fn correlation_depth_uses_included_tips_only() {
    let tree = parse_newick("(((A:1,B:1):1,D:2):3,C:5);").expect("parse tree");
    let names = vec!["A".to_string(), "B".to_string(), "D".to_string()];
    let p = phylogenetic_correlation(&tree, &names).expect("correlation");
    assert!((p[0][1] - 0.5).abs() < 1e-12);
    assert!(p[0][2].abs() < 1e-12);
}

#[test]
fn correlation_unknown_tip_is_an_error() {
    let tree = parse_newick("(A,B);").expect("parse tree");
    assert!(phylogenetic_correlation(&tree, &["Z".to_string()]).is_err());
}

#[test]
fn internal_nodes_keep_their_names() {
    let tree = parse_newick("((A:1,B:1)ab:1,C:2)root;").expect("parse tree");
    let ab = tree.find_by_name("ab").expect("internal node");
    assert!(!tree.node(ab).expect("node").is_tip());
    assert!(tree.find_tip_by_name("ab").is_none());
    assert_eq!(tree.find_by_name("root"), Some(tree.root()));
    let a = tree.find_tip_by_name("A").expect("tip A");
    assert_eq!(tree.common_ancestor(a, tree.find_tip_by_name("B").expect("tip B")), ab);
}
