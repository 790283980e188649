use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info};

use crate::analysis::{
    AnalysisContext, AnalysisReport, FEWER_THAN_TWO_STUDIES, FILTER_PROBLEM_DATA,
    fewer_than_two_groups, fewer_than_two_in_group, preamble, q_test,
};
use crate::chart::{ForestKind, forest_plot};
use crate::data::{DataSource, ExtractSpec, Observation, extract};
use crate::output::{
    global_output, heading, heterogeneity_table, i2_table, included_line, mean_effects_table,
    pooled_variance_line,
};
use crate::stats::{
    mean_of, pooled_var_group_structure, pooled_within_q, random_weights, reciprocal, select,
    weighted_mean_var_q, weighted_median,
};
use crate::types::{
    AnalysisValues, Column, GlobalValues, GroupedValues, I2Row, MeanEffect,
};

/// Row indices of each distinct value of the first category, in sorted order.
pub(crate) fn partition(observations: &[Observation]) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, obs) in observations.iter().enumerate() {
        if let Some(g) = obs.groups.first() {
            groups.entry(g.clone()).or_default().push(i);
        }
    }
    groups
}

pub fn grouped(
    data: &dyn DataSource,
    ctx: &AnalysisContext<'_>,
    group: &Column,
) -> Result<AnalysisReport> {
    let options = ctx.options;
    let extracted = extract(
        data,
        options.effect.index,
        options.variance.index,
        &ExtractSpec {
            categories: vec![group.index],
            ..ExtractSpec::default()
        },
    )?;
    let mut output = preamble(&extracted);
    let n = extracted.len();
    if n < 2 {
        return Ok(AnalysisReport::insufficient(output, FEWER_THAN_TWO_STUDIES));
    }
    let groups = partition(&extracted.observations);
    if groups.len() < 2 {
        return Ok(AnalysisReport::insufficient(
            output,
            &fewer_than_two_groups(&group.label),
        ));
    }
    let small: Vec<String> = groups
        .iter()
        .filter(|(_, members)| members.len() < 2)
        .map(|(name, _)| fewer_than_two_in_group(name, &group.label))
        .collect();
    if !small.is_empty() {
        return Ok(AnalysisReport::violations(
            output,
            small,
            Some(FILTER_PROBLEM_DATA),
        ));
    }
    info!("{n} studies in {} groups will be included in this analysis", groups.len());
    output.push(included_line(n));

    let effects = extracted.effects();
    let variances = extracted.variances();
    let w = reciprocal(&variances);
    let g_cnt = groups.len();
    let members: Vec<Vec<usize>> = groups.values().cloned().collect();

    let mut group_sums = Vec::with_capacity(g_cnt);
    let mut qe_fixed = 0.0;
    for idx in &members {
        let s = weighted_mean_var_q(&select(&effects, idx), &select(&w, idx))?;
        qe_fixed += s.q;
        group_sums.push((s.sum_w, s.sum_w2));
    }
    let pooled_var = pooled_var_group_structure(qe_fixed, &group_sums, n, g_cnt);
    let ws = if options.random_effects {
        output.push(pooled_variance_line(pooled_var, ctx.decimals()));
        random_weights(&variances, pooled_var)
    } else {
        w.clone()
    };
    let summary = weighted_mean_var_q(&effects, &ws)?;
    let median = weighted_median(&effects, &ws);
    let qt = summary.q;

    let mut group_means = Vec::with_capacity(g_cnt);
    let mut group_heterogeneity = Vec::with_capacity(g_cnt);
    let mut group_i2 = Vec::with_capacity(g_cnt);
    let mut qe = 0.0;
    for (name, idx) in &groups {
        let ge = select(&effects, idx);
        let gv = select(&variances, idx);
        let gw = select(&ws, idx);
        let gs = weighted_mean_var_q(&ge, &gw)?;
        let gn = idx.len();
        qe += gs.q;
        let (lower_ci, upper_ci) = ctx.interval(gs.mean, gs.variance, gn as f64 - 1.0);
        let bootstrap = ctx.bootstrap(&ge, &gv, gs.mean, pooled_var)?;
        let source = format!("{name} (within)");
        group_heterogeneity.push(q_test(source.clone(), gs.q, gn as i64 - 1));
        group_i2.push(I2Row {
            source,
            value: ctx.i2(gs.q, gn),
        });
        group_means.push(MeanEffect {
            name: name.clone(),
            n: gn,
            mean: gs.mean,
            median: Some(weighted_median(&ge, &gw)),
            variance: gs.variance,
            avg_var: 0.0,
            lower_ci,
            upper_ci,
            bootstrap,
        });
    }

    let (lower_ci, upper_ci) = ctx.interval(summary.mean, summary.variance, n as f64 - 1.0);
    let bootstrap = ctx.bootstrap(&effects, &variances, summary.mean, pooled_var)?;
    let global = GlobalValues {
        mean: MeanEffect {
            name: "Global".to_string(),
            n,
            mean: summary.mean,
            median: Some(median),
            variance: summary.variance,
            avg_var: mean_of(&variances),
            lower_ci,
            upper_ci,
            bootstrap,
        },
        pooled_var,
        total: q_test("Total", qt, n as i64 - 1),
        i2: ctx.i2(qt, n),
    };

    let qm = qt - qe;
    debug!("grouped: qt={qt}, qm={qm}, qe={qe}");
    let mut model = q_test("Model (Between)", qm, g_cnt as i64 - 1);
    if let Some(iterations) = options.randomization_iterations {
        model.p_randomization = Some(ctx.resampler.permutation_test(
            iterations,
            &effects,
            qm,
            |permuted| qt - pooled_within_q(permuted, &ws, &members),
        )?);
    }
    let error = q_test("Error (Within)", qe, (n - g_cnt) as i64);

    let dp = ctx.decimals();
    output.push(heading("Group Results"));
    output.push(heading("Heterogeneity"));
    output.push(heterogeneity_table(&group_heterogeneity, dp, false, None));
    output.extend(i2_table(&group_i2, dp, options.alpha));
    output.push(heterogeneity_table(
        &[model.clone(), error.clone(), global.total.clone()],
        dp,
        true,
        options.randomization_iterations,
    ));
    output.push(heading("Mean Effect Sizes"));
    output.push(mean_effects_table(
        ctx.effect_label(),
        &group_means,
        dp,
        options.alpha,
        options.log_transformed,
        true,
    ));
    output.push(heading("Global Results"));
    let citations = global_output(&mut output, &global, &ctx.global_output(true));

    let chart = options.create_chart.then(|| {
        let mut rows = vec![global.mean.clone()];
        rows.extend(group_means.iter().cloned());
        forest_plot(
            ForestKind::Grouped {
                group_label: group.label.clone(),
            },
            ctx.effect_label(),
            &rows,
            options.alpha,
            options.bootstrap_iterations,
        )
    });

    Ok(AnalysisReport::ok(
        output,
        chart,
        AnalysisValues::Grouped(GroupedValues {
            global,
            group_means,
            group_heterogeneity,
            group_i2,
            model,
            error,
        }),
        citations,
    ))
}
