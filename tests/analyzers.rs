mod common;

use common::{TOL, has_line, options, run, run_with_tree, simple_table, study_table, text, values};
use metastat::data::Cell;
use metastat::phylo::EXPERIMENTAL_WARNING;
use metastat::phylotree::parse_newick;
use metastat::regression::regression_fit;
use metastat::resampling::Progress;
use metastat::run_analysis;
use metastat::stats::RegressionSums;
use metastat::types::{
    AnalysisOutcome, AnalysisRequest, AnalysisValues, CiDistribution, Column, ResampleConfig,
    Structure,
};

fn group_table() -> metastat::data::DataTable {
    study_table(
        &["group"],
        vec![
            (1.0, 1.0, vec![text("A")]),
            (2.0, 1.0, vec![text("A")]),
            (3.0, 1.0, vec![text("B")]),
            (4.0, 1.0, vec![text("B")]),
        ],
    )
}

fn regression_table() -> metastat::data::DataTable {
    study_table(
        &["dose"],
        vec![
            (2.4, 1.0, vec![Cell::Number(1.0)]),
            (4.7, 1.0, vec![Cell::Number(2.0)]),
            (6.3, 1.0, vec![Cell::Number(3.0)]),
            (8.6, 1.0, vec![Cell::Number(4.0)]),
        ],
    )
}

#[test]
fn simple_fixed_effects() {
    let table = simple_table(&[1.0, 2.0, 3.0], &[1.0, 1.0, 0.5]);
    let report = run(&table, options(), Structure::Simple);
    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    let g = &simple.global;
    assert_eq!(g.mean.n, 3);
    assert!((g.mean.mean - 2.25).abs() < TOL);
    assert!((g.mean.variance - 0.25).abs() < TOL);
    assert!((g.mean.upper_ci - (2.25 + 1.959963984540054 * 0.5)).abs() < 1e-7);
    assert!((g.total.q - 2.75).abs() < TOL);
    assert_eq!(g.total.df, 2);
    assert!((g.total.p_chi - (-1.375f64).exp()).abs() < 1e-8);
    assert!((g.pooled_var - 0.3).abs() < TOL);
    assert!((g.mean.avg_var - 2.5 / 3.0).abs() < TOL);
    assert!(g.mean.bootstrap.is_none());
    assert!(report.chart.is_none());
    assert!(has_line(&report, "3 studies will be included in this analysis"));
}

#[test]
fn simple_random_effects_reweights_by_pooled_variance() {
    let table = simple_table(&[1.0, 2.0, 3.0], &[1.0, 1.0, 0.5]);
    let mut opts = options();
    opts.random_effects = true;
    let report = run(&table, opts, Structure::Simple);
    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    let w = [1.0 / 1.3, 1.0 / 1.3, 1.0 / 0.8];
    let sum_w: f64 = w.iter().sum();
    let mean = (w[0] + 2.0 * w[1] + 3.0 * w[2]) / sum_w;
    assert!((simple.global.mean.mean - mean).abs() < TOL);
    assert!((simple.global.mean.variance - 1.0 / sum_w).abs() < TOL);
    assert!(has_line(&report, "Estimate of pooled variance: 0.3000"));
}

#[test]
fn t_intervals_are_wider_than_normal() {
    let table = simple_table(&[1.0, 2.0, 3.0], &[1.0, 1.0, 0.5]);
    let mut opts = options();
    opts.ci_distribution = CiDistribution::T;
    let report = run(&table, opts, Structure::Simple);
    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    assert!(simple.global.mean.upper_ci > 2.25 + 1.959963984540054 * 0.5);
}

#[test]
fn invalid_and_filtered_rows_are_reported() {
    let mut table = study_table(
        &[],
        vec![
            (1.0, 1.0, Vec::new()),
            (2.0, 0.0, Vec::new()),
            (3.0, 1.0, Vec::new()),
            (4.0, 1.0, Vec::new()),
        ],
    );
    table.set_included(3, false).expect("set included");
    let report = run(&table, options(), Structure::Simple);
    assert!(has_line(&report, "Pre-filtered studies excluded from analysis: S4"));
    assert!(has_line(&report, "Studies with invalid data: S2"));
    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    assert_eq!(simple.global.mean.n, 2);
    assert!((simple.global.mean.mean - 2.0).abs() < TOL);
}

#[test]
fn one_valid_study_is_insufficient() {
    let table = simple_table(&[1.0, 2.0], &[1.0, -1.0]);
    let report = run(&table, options(), Structure::Simple);
    assert!(matches!(report.outcome, AnalysisOutcome::InsufficientData(_)));
    assert!(report.chart.is_none());
}

#[test]
fn simple_bootstrap_is_seeded() {
    let table = simple_table(&[0.1, 0.4, 0.35, 0.8, -0.2], &[0.05, 0.02, 0.1, 0.2, 0.08]);
    let mut opts = options();
    opts.bootstrap_iterations = Some(199);
    opts.resampling = ResampleConfig {
        seed: Some(2024),
        parallel: false,
        cores: None,
    };
    let first = run(&table, opts.clone(), Structure::Simple);
    let second = run(&table, opts, Structure::Simple);
    let (AnalysisValues::Simple(a), AnalysisValues::Simple(b)) = (values(&first), values(&second))
    else {
        panic!("expected simple values");
    };
    let ci = a.global.mean.bootstrap.expect("bootstrap interval");
    assert_eq!(a.global.mean.bootstrap, b.global.mean.bootstrap);
    assert!(ci.lower <= a.global.mean.mean && a.global.mean.mean <= ci.upper);
}

#[test]
fn grouped_partitions_heterogeneity() {
    let report = run(
        &group_table(),
        options(),
        Structure::Grouped {
            group: Column::new(2, "group"),
        },
    );
    let AnalysisValues::Grouped(grouped) = values(&report) else {
        panic!("expected grouped values");
    };
    assert!((grouped.global.mean.mean - 2.5).abs() < TOL);
    assert!((grouped.global.total.q - 5.0).abs() < TOL);
    assert!((grouped.model.q - 4.0).abs() < TOL);
    assert_eq!(grouped.model.df, 1);
    assert!((grouped.error.q - 1.0).abs() < TOL);
    assert_eq!(grouped.error.df, 2);
    assert_eq!(grouped.global.pooled_var, 0.0);

    let names: Vec<&str> = grouped.group_means.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert!((grouped.group_means[0].mean - 1.5).abs() < TOL);
    assert!((grouped.group_means[1].mean - 3.5).abs() < TOL);
    assert_eq!(grouped.group_heterogeneity[1].source, "B (within)");
}

#[test]
fn grouped_randomization_is_a_probability() {
    let mut opts = options();
    opts.randomization_iterations = Some(99);
    opts.resampling.seed = Some(9);
    let report = run(
        &group_table(),
        opts,
        Structure::Grouped {
            group: Column::new(2, "group"),
        },
    );
    let AnalysisValues::Grouped(grouped) = values(&report) else {
        panic!("expected grouped values");
    };
    let p = grouped.model.p_randomization.expect("randomization p");
    assert!((0.01..=1.0).contains(&p));
}

#[test]
fn grouped_single_study_group_is_a_violation() {
    let table = study_table(
        &["group"],
        vec![
            (1.0, 1.0, vec![text("A")]),
            (2.0, 1.0, vec![text("A")]),
            (3.0, 1.0, vec![text("B")]),
        ],
    );
    let report = run(
        &table,
        options(),
        Structure::Grouped {
            group: Column::new(2, "group"),
        },
    );
    let AnalysisOutcome::StructuralViolation(details) = &report.outcome else {
        panic!("expected a structural violation");
    };
    assert_eq!(details.len(), 1);
    assert!(details[0].contains("group B"));
}

#[test]
fn excluded_group_values_are_filtered() {
    let mut table = group_table();
    table.exclude_group_value(2, "B");
    let report = run(&table, options(), Structure::Simple);
    assert!(has_line(&report, "Pre-filtered studies excluded from analysis: S3, S4"));
    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    assert!((simple.global.mean.mean - 1.5).abs() < TOL);
}

#[test]
fn effect_column_cannot_be_a_predictor() {
    let report = run(
        &group_table(),
        options(),
        Structure::Grouped {
            group: Column::new(0, "effect"),
        },
    );
    assert!(matches!(
        report.outcome,
        AnalysisOutcome::StructuralViolation(_)
    ));
}

#[test]
fn nested_levels_decompose_total_q() {
    let rows = [
        ("X", "x1", 1.0),
        ("X", "x1", 1.2),
        ("X", "x2", 2.0),
        ("X", "x2", 2.4),
        ("Y", "y1", 3.0),
        ("Y", "y1", 3.1),
        ("Y", "y2", 4.5),
        ("Y", "y2", 5.0),
    ];
    let table = study_table(
        &["outer", "inner"],
        rows.iter()
            .map(|(outer, inner, e)| (*e, 0.5, vec![text(outer), text(inner)]))
            .collect(),
    );
    let report = run(
        &table,
        options(),
        Structure::Nested {
            levels: vec![Column::new(2, "outer"), Column::new(3, "inner")],
        },
    );
    let AnalysisValues::Nested(nested) = values(&report) else {
        panic!("expected nested values");
    };
    assert_eq!(nested.models.len(), 2);
    assert_eq!(nested.models[0].source, "Qm (outer)");
    assert_eq!(nested.models[0].df, 1);
    assert_eq!(nested.models[1].df, 2);
    assert_eq!(nested.error.df, 4);
    let parts: f64 = nested.models.iter().map(|m| m.q).sum::<f64>() + nested.error.q;
    assert!((parts - nested.global.total.q).abs() < 1e-8);
}

#[test]
fn nested_small_leaf_is_a_violation() {
    let table = study_table(
        &["outer", "inner"],
        vec![
            (1.0, 1.0, vec![text("X"), text("x1")]),
            (1.5, 1.0, vec![text("X"), text("x1")]),
            (2.0, 1.0, vec![text("X"), text("x2")]),
            (3.0, 1.0, vec![text("Y"), text("y1")]),
            (3.5, 1.0, vec![text("Y"), text("y1")]),
        ],
    );
    let report = run(
        &table,
        options(),
        Structure::Nested {
            levels: vec![Column::new(2, "outer"), Column::new(3, "inner")],
        },
    );
    let AnalysisOutcome::StructuralViolation(details) = &report.outcome else {
        panic!("expected a structural violation");
    };
    assert_eq!(details.len(), 1);
    assert!(details[0].contains("group x2"));
}

#[test]
fn regression_slope_and_model_q() {
    let report = run(
        &regression_table(),
        options(),
        Structure::Regression {
            predictor: Column::new(2, "dose"),
        },
    );
    let AnalysisValues::Regression(reg) = values(&report) else {
        panic!("expected regression values");
    };
    assert_eq!(reg.predictors[0].predictor, "Intercept");
    assert!((reg.predictors[0].value - 0.45).abs() < 1e-10);
    assert!((reg.predictors[1].value - 2.02).abs() < 1e-10);
    assert!((reg.predictors[1].se - (1.0f64 / 5.0).sqrt()).abs() < 1e-10);
    assert!((reg.model.q - 20.402).abs() < 1e-9);
    assert_eq!(reg.model.df, 1);
    assert!((reg.error.q - 0.098).abs() < 1e-9);
    assert_eq!(reg.error.df, 2);
    assert!((reg.global.total.q - 20.5).abs() < 1e-9);
}

#[test]
fn regression_fit_keeps_weighted_predictor_sums() {
    let effects = [2.4, 4.7, 6.3, 8.6];
    let fit = regression_fit(&effects, &[1.0; 4], &[1.0, 2.0, 3.0, 4.0], 20.5);
    assert_eq!(
        fit.sums,
        RegressionSums {
            sum_w: 4.0,
            sum_wx: 10.0,
            sum_wx2: 30.0,
        }
    );
    assert!((fit.qe - 0.098).abs() < 1e-9);
    let again = regression_fit(&effects, &[1.0; 4], &[1.0, 2.0, 3.0, 4.0], 20.5);
    assert_eq!(fit, again);
}

#[test]
fn regression_chart_carries_fit_line() {
    let mut opts = options();
    opts.create_chart = true;
    let report = run(
        &regression_table(),
        opts,
        Structure::Regression {
            predictor: Column::new(2, "dose"),
        },
    );
    let chart = report.chart.expect("chart");
    assert_eq!(chart.x_label, "dose");
    assert!(chart.caption_text.contains("fixed effects"));
    assert!(chart.caption_text.contains("Hedges_Olkin_1985, Greenland_1987"));
}

#[test]
fn glm_with_one_factor_matches_grouped() {
    let report = run(
        &group_table(),
        options(),
        Structure::Glm {
            continuous: Vec::new(),
            categorical: vec![Column::new(2, "group")],
        },
    );
    let AnalysisValues::Glm(glm) = values(&report) else {
        panic!("expected glm values");
    };
    let model = glm.model.as_ref().expect("model test");
    let error = glm.error.as_ref().expect("error test");
    assert!((model.q - 4.0).abs() < 1e-9);
    assert_eq!(model.df, 1);
    assert!((error.q - 1.0).abs() < 1e-9);
    assert_eq!(error.df, 2);
    assert_eq!(glm.predictors[0].predictor, "β0 (intercept)");
    assert_eq!(glm.predictors[1].predictor, "β1 (group)");
    assert!((glm.predictors[0].value - 2.5).abs() < 1e-9);
    assert!((glm.predictors[1].value - 1.0).abs() < 1e-9);
    assert!(report.chart.is_none());
}

#[test]
fn glm_with_one_covariate_matches_regression() {
    let report = run(
        &regression_table(),
        options(),
        Structure::Glm {
            continuous: vec![Column::new(2, "dose")],
            categorical: Vec::new(),
        },
    );
    let AnalysisValues::Glm(glm) = values(&report) else {
        panic!("expected glm values");
    };
    assert_eq!(glm.predictors[1].predictor, "β1 (dose)");
    assert!((glm.predictors[1].value - 2.02).abs() < 1e-9);
    assert!((glm.model.as_ref().expect("model").q - 20.402).abs() < 1e-8);
}

#[test]
fn glm_without_predictors_is_the_mean() {
    let table = simple_table(&[1.0, 2.0, 3.0], &[1.0, 1.0, 0.5]);
    let report = run(
        &table,
        options(),
        Structure::Glm {
            continuous: Vec::new(),
            categorical: Vec::new(),
        },
    );
    let AnalysisValues::Glm(glm) = values(&report) else {
        panic!("expected glm values");
    };
    assert!(glm.model.is_none());
    assert_eq!(glm.predictors.len(), 1);
    assert_eq!(glm.predictors[0].predictor, "β0 (mean)");
    assert!((glm.predictors[0].value - 2.25).abs() < 1e-9);
    assert!((glm.global.total.q - 2.75).abs() < 1e-9);
    let heterogeneity_headings = report
        .output
        .iter()
        .filter(|block| block.len() == 1 && block[0] == "Heterogeneity")
        .count();
    assert_eq!(heterogeneity_headings, 1);
}

#[test]
fn glm_collinear_predictors_are_singular() {
    let table = study_table(
        &["a", "b"],
        vec![
            (1.0, 1.0, vec![Cell::Number(1.0), Cell::Number(2.0)]),
            (2.0, 1.0, vec![Cell::Number(2.0), Cell::Number(4.0)]),
            (3.5, 1.0, vec![Cell::Number(3.0), Cell::Number(6.0)]),
            (3.0, 1.0, vec![Cell::Number(4.0), Cell::Number(8.0)]),
        ],
    );
    let report = run(
        &table,
        options(),
        Structure::Glm {
            continuous: vec![Column::new(2, "a"), Column::new(3, "b")],
            categorical: Vec::new(),
        },
    );
    assert!(matches!(report.outcome, AnalysisOutcome::SingularModel(_)));
    assert!(has_line(&report, "Analysis Error Encountered"));
}

#[test]
fn cumulative_follows_the_sort_column() {
    let table = study_table(
        &["year"],
        vec![
            (1.0, 1.0, vec![Cell::Number(2003.0)]),
            (3.0, 1.0, vec![Cell::Number(2001.0)]),
            (2.0, 1.0, vec![Cell::Number(2002.0)]),
        ],
    );
    let report = run(
        &table,
        options(),
        Structure::Cumulative {
            order: Column::new(2, "year"),
        },
    );
    let AnalysisValues::Cumulative(cum) = values(&report) else {
        panic!("expected cumulative values");
    };
    assert_eq!(cum.means.len(), 2);
    assert_eq!(cum.means[0].name, "2 studies");
    assert!((cum.means[0].mean - 2.5).abs() < TOL);
    assert!((cum.means[1].mean - 2.0).abs() < TOL);
    assert_eq!(cum.heterogeneity[1].source, "3 studies Qtotal");
    assert!((cum.heterogeneity[0].q - 0.5).abs() < TOL);
    assert!((cum.heterogeneity[1].q - 2.0).abs() < TOL);
    assert!(report.citations.is_empty());
}

#[test]
fn jackknife_leaves_each_study_out() {
    let mut opts = options();
    opts.create_chart = true;
    let report = run(&simple_table(&[1.0, 2.0, 3.0], &[1.0; 3]), opts, Structure::Jackknife);
    let AnalysisValues::Jackknife(jack) = values(&report) else {
        panic!("expected jackknife values");
    };
    assert!((jack.global.mean.mean - 2.0).abs() < TOL);
    let names: Vec<&str> = jack.means.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["w/o S1", "w/o S2", "w/o S3"]);
    let means: Vec<f64> = jack.means.iter().map(|m| m.mean).collect();
    for (got, want) in means.iter().zip([2.5, 2.0, 1.5]) {
        assert!((got - want).abs() < TOL);
    }
    assert_eq!(jack.heterogeneity[0].source, "w/o S1 Qtotal");
    assert!(report.chart.is_some());
}

#[test]
fn phylogenetic_star_tree_reduces_to_weighted_mean() {
    let tree = parse_newick("(A:1,B:1,C:1);").expect("parse tree");
    let table = study_table(
        &["species"],
        vec![
            (1.0, 1.0, vec![text("A")]),
            (2.0, 1.0, vec![text("B")]),
            (3.0, 0.5, vec![text("C")]),
            (4.0, 1.0, vec![text("D")]),
        ],
    );
    let report = run_with_tree(
        &table,
        options(),
        Structure::Phylogenetic {
            tips: Column::new(2, "species"),
            continuous: Vec::new(),
            categorical: Vec::new(),
        },
        Some(&tree),
    );
    assert!(has_line(&report, EXPERIMENTAL_WARNING));
    assert!(has_line(&report, "Studies with invalid data: S4"));
    let AnalysisValues::Phylogenetic(phylo) = values(&report) else {
        panic!("expected phylogenetic values");
    };
    assert!(phylo.experimental);
    assert!(phylo.model.is_none());
    let mean = phylo.mean.as_ref().expect("mean");
    assert!((mean.mean - 2.25).abs() < 1e-9);
    assert!((mean.variance - 0.25).abs() < 1e-9);
    assert!(mean.median.is_none());
    assert!((phylo.total.q - 2.75).abs() < 1e-9);
}

#[test]
fn phylogenetic_with_factor_tests_the_model() {
    let tree = parse_newick("((A:1,B:1):1,(C:1,D:1):1);").expect("parse tree");
    let table = study_table(
        &["species", "habitat"],
        vec![
            (1.0, 1.0, vec![text("A"), text("land")]),
            (2.0, 1.0, vec![text("B"), text("land")]),
            (3.0, 1.0, vec![text("C"), text("sea")]),
            (4.0, 1.0, vec![text("D"), text("sea")]),
        ],
    );
    let report = run_with_tree(
        &table,
        options(),
        Structure::Phylogenetic {
            tips: Column::new(2, "species"),
            continuous: Vec::new(),
            categorical: vec![Column::new(3, "habitat")],
        },
        Some(&tree),
    );
    let AnalysisValues::Phylogenetic(phylo) = values(&report) else {
        panic!("expected phylogenetic values");
    };
    let model = phylo.model.as_ref().expect("model");
    assert_eq!(model.df, 1);
    assert!(model.p_randomization.is_none());
    assert!(phylo.mean.is_none());
    let error = phylo.error.as_ref().expect("error");
    assert!((model.q + error.q - phylo.total.q).abs() < 1e-9);
}

#[test]
fn phylogenetic_analysis_needs_a_tree() {
    let table = study_table(&["species"], vec![(1.0, 1.0, vec![text("A")])]);
    let progress = Progress::none();
    let request = AnalysisRequest {
        options: options(),
        structure: Structure::Phylogenetic {
            tips: Column::new(2, "species"),
            continuous: Vec::new(),
            categorical: Vec::new(),
        },
    };
    assert!(run_analysis(&table, &request, None, &progress).is_err());
}
