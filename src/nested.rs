//! Nested (hierarchical) grouping. Groups are kept in an arena: each node
//! stores its parent and children by index.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{
    AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, fewer_than_two_groups, preamble,
    q_test,
};
use crate::chart::{ForestKind, forest_plot};
use crate::data::{DataSource, ExtractSpec, extract};
use crate::output::{
    global_output, heading, heterogeneity_table, included_line, mean_effects_table,
};
use crate::resampling::Resampler;
use crate::stats::{
    mean_of, reciprocal, select, weighted_mean, weighted_mean_var_q, weighted_median,
};
use crate::types::{AnalysisValues, Column, GlobalValues, HeterogeneityTest, MeanEffect, NestedValues};

#[derive(Debug, Clone, PartialEq)]
pub struct NestedGroupNode {
    pub name: String,
    /// Nesting depth, zero for the outermost grouping.
    pub level: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Observation indices belonging to this group.
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct NestedTree {
    pub nodes: Vec<NestedGroupNode>,
    pub roots: Vec<usize>,
    pub depth: usize,
}

impl NestedTree {
    /// Build the hierarchy from each observation's group path, outermost
    /// first. Sibling groups are in sorted order.
    pub fn build(paths: &[Vec<String>]) -> Self {
        let depth = paths.first().map(Vec::len).unwrap_or(0);
        let mut tree = NestedTree {
            depth,
            ..Self::default()
        };
        if depth == 0 {
            return tree;
        }
        let all: Vec<usize> = (0..paths.len()).collect();
        tree.roots = tree.add_level(paths, 0, None, &all);
        tree
    }

    fn add_level(
        &mut self,
        paths: &[Vec<String>],
        level: usize,
        parent: Option<usize>,
        candidates: &[usize],
    ) -> Vec<usize> {
        let names: BTreeSet<&String> = candidates.iter().map(|&r| &paths[r][level]).collect();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let rows: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&r| &paths[r][level] == name)
                .collect();
            let id = self.nodes.len();
            self.nodes.push(NestedGroupNode {
                name: name.clone(),
                level,
                parent,
                children: Vec::new(),
                rows: rows.clone(),
            });
            if level + 1 < self.depth {
                let children = self.add_level(paths, level + 1, Some(id), &rows);
                self.nodes[id].children = children;
            }
            ids.push(id);
        }
        ids
    }

    /// Node indices in depth-first pre-order.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    /// Every group with fewer than two observations; groups below such a
    /// group are not examined.
    pub fn violations(&self, level_labels: &[String]) -> Vec<String> {
        let mut found = Vec::new();
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.rows.len() < 2 {
                let column = level_labels
                    .get(node.level)
                    .map(String::as_str)
                    .unwrap_or("");
                found.push(format!(
                    "Fewer than two valid studies were identified for group {} of column {column}, based on specified nested structure.",
                    node.name
                ));
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        found
    }

    /// Weighted mean of every node.
    pub fn node_means(&self, effects: &[f64], weights: &[f64]) -> Vec<f64> {
        self.nodes
            .iter()
            .map(|node| weighted_mean(&select(effects, &node.rows), &select(weights, &node.rows)))
            .collect()
    }

    /// Between-group Q at `level`: each group's weighted squared deviation
    /// from its parent's mean (the overall mean for the outermost level),
    /// and the number of groups at that level.
    pub fn level_qm(&self, level: usize, means: &[f64], weights: &[f64], overall: f64) -> (f64, usize) {
        let mut q = 0.0;
        let mut count = 0;
        for (id, node) in self.nodes.iter().enumerate() {
            if node.level != level {
                continue;
            }
            let parent_mean = node.parent.map(|p| means[p]).unwrap_or(overall);
            q += node
                .rows
                .iter()
                .map(|&r| weights[r] * (means[id] - parent_mean).powi(2))
                .sum::<f64>();
            count += 1;
        }
        (q, count)
    }
}

fn indent(level: usize) -> String {
    if level > 0 {
        format!("  {}", "→ ".repeat(level))
    } else {
        String::new()
    }
}

struct NodeResults {
    heterogeneity: Vec<HeterogeneityTest>,
    means: Vec<MeanEffect>,
    /// Within-group Q by node index.
    qw: Vec<f64>,
}

fn node_results(
    ctx: &AnalysisContext<'_>,
    tree: &NestedTree,
    effects: &[f64],
    variances: &[f64],
    weights: &[f64],
) -> Result<NodeResults> {
    let mut results = NodeResults {
        heterogeneity: Vec::with_capacity(tree.nodes.len()),
        means: Vec::with_capacity(tree.nodes.len()),
        qw: vec![0.0; tree.nodes.len()],
    };
    for id in tree.preorder() {
        let node = &tree.nodes[id];
        let ge = select(effects, &node.rows);
        let gv = select(variances, &node.rows);
        let gw = select(weights, &node.rows);
        let s = weighted_mean_var_q(&ge, &gw)?;
        let gn = node.rows.len();
        let df = gn as f64 - 1.0;
        let (lower_ci, upper_ci) = ctx.interval(s.mean, s.variance, df);
        let bootstrap = ctx.resampler.bootstrap_mean_ci(
            ctx.options.bootstrap_iterations,
            &ge.iter().copied().zip(gv.iter().copied()).collect::<Vec<_>>(),
            s.mean,
            0.0,
            false,
            ctx.options.alpha,
        )?;
        let label = format!("{}{}", indent(node.level), node.name);
        results
            .heterogeneity
            .push(q_test(format!("{label} (within)"), s.q, gn as i64 - 1));
        results.means.push(MeanEffect {
            name: label,
            n: gn,
            mean: s.mean,
            median: Some(weighted_median(&ge, &gw)),
            variance: s.variance,
            avg_var: 0.0,
            lower_ci,
            upper_ci,
            bootstrap,
        });
        results.qw[id] = s.q;
    }
    Ok(results)
}

/// Randomization p-values for every level's model Q. Effects are shuffled
/// across observations; the hierarchy and weights stay fixed.
fn randomize_levels(
    resampler: &Resampler<'_>,
    iterations: usize,
    tree: &NestedTree,
    effects: &[f64],
    weights: &[f64],
    overall: f64,
    observed: &[f64],
) -> Result<Vec<f64>> {
    resampler.permutation_test_multi(iterations, effects, observed, |permuted| {
        let means = tree.node_means(permuted, weights);
        (0..tree.depth)
            .map(|level| tree.level_qm(level, &means, weights, overall).0)
            .collect()
    })
}

pub fn nested(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    levels: &[Column],
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            categories: levels.iter().map(|c| c.index).collect(),
            ..ExtractSpec::default()
        },
    )?;
    let mut output = preamble(&extracted);
    let n = extracted.len();
    if n < 2 || levels.is_empty() {
        return Ok(AnalysisReport::insufficient(output, FEWER_THAN_TWO_STUDIES));
    }
    let labels: Vec<String> = levels.iter().map(|c| c.label.clone()).collect();
    let paths: Vec<Vec<String>> = extracted
        .observations
        .iter()
        .map(|o| o.groups.clone())
        .collect();
    let tree = NestedTree::build(&paths);
    if tree.roots.len() < 2 {
        return Ok(AnalysisReport::insufficient(
            output,
            &fewer_than_two_groups(&labels[0]),
        ));
    }
    let violations = tree.violations(&labels);
    if !violations.is_empty() {
        return Ok(AnalysisReport::violations(output, violations, None));
    }
    info!(
        "{n} studies in {} nested groups will be included in this analysis",
        tree.nodes.len()
    );
    output.push(included_line(n));

    let effects = extracted.effects();
    let variances = extracted.variances();
    let w = reciprocal(&variances);
    let summary = weighted_mean_var_q(&effects, &w)?;
    let (lower_ci, upper_ci) = ctx.interval(summary.mean, summary.variance, n as f64 - 1.0);
    let samples: Vec<(f64, f64)> = effects.iter().copied().zip(variances.iter().copied()).collect();
    let bootstrap = ctx.resampler.bootstrap_mean_ci(
        options.bootstrap_iterations,
        &samples,
        summary.mean,
        0.0,
        false,
        options.alpha,
    )?;
    let global = GlobalValues {
        mean: MeanEffect {
            name: "Global".to_string(),
            n,
            mean: summary.mean,
            median: Some(weighted_median(&effects, &w)),
            variance: summary.variance,
            avg_var: mean_of(&variances),
            lower_ci,
            upper_ci,
            bootstrap,
        },
        pooled_var: 0.0,
        total: q_test("Total", summary.q, n as i64 - 1),
        i2: ctx.i2(summary.q, n),
    };

    let nodes = node_results(ctx, &tree, &effects, &variances, &w)?;
    let means = tree.node_means(&effects, &w);

    let mut models = Vec::with_capacity(tree.depth);
    let mut prev_count = 1;
    for (level, label) in labels.iter().enumerate() {
        let (qm, count) = tree.level_qm(level, &means, &w, summary.mean);
        models.push(q_test(
            format!("Qm ({label})"),
            qm,
            count as i64 - prev_count as i64,
        ));
        prev_count = count;
    }
    let deepest = tree.depth - 1;
    let (qe, leaf_count) = tree
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.level == deepest)
        .fold((0.0, 0usize), |(q, c), (id, _)| (q + nodes.qw[id], c + 1));
    let error = q_test("Qe", qe, n as i64 - leaf_count as i64);
    debug!(
        "nested: qt={}, qm={:?}, qe={qe}",
        summary.q,
        models.iter().map(|m| m.q).collect::<Vec<_>>()
    );

    if let Some(iterations) = options.randomization_iterations {
        let observed: Vec<f64> = models.iter().map(|m| m.q).collect();
        let p = randomize_levels(
            &ctx.resampler,
            iterations,
            &tree,
            &effects,
            &w,
            summary.mean,
            &observed,
        )?;
        for (model, p) in models.iter_mut().zip(p) {
            model.p_randomization = Some(p);
        }
    }

    let dp = ctx.decimals();
    output.push(heading("Group Results"));
    output.push(heading("Heterogeneity"));
    output.push(heterogeneity_table(&nodes.heterogeneity, dp, false, None));
    let mut model_table = models.clone();
    model_table.push(error.clone());
    model_table.push(global.total.clone());
    output.push(heterogeneity_table(
        &model_table,
        dp,
        true,
        options.randomization_iterations,
    ));
    output.push(heading("Mean Effect Sizes"));
    output.push(mean_effects_table(
        ctx.effect_label(),
        &nodes.means,
        dp,
        options.alpha,
        options.log_transformed,
        true,
    ));
    output.push(heading("Global Results"));
    let citations = global_output(&mut output, &global, &ctx.global_output(true));

    let chart = options.create_chart.then(|| {
        let mut rows = vec![global.mean.clone()];
        rows.extend(nodes.means.iter().cloned());
        forest_plot(
            ForestKind::Nested,
            ctx.effect_label(),
            &rows,
            options.alpha,
            options.bootstrap_iterations,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Nested(NestedValues {
            global,
            group_means: nodes.means,
            group_heterogeneity: nodes.heterogeneity,
            models,
            error,
        }),
        citations,
    ))
}
