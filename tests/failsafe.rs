mod common;

use common::{TOL, options, run, simple_table, values};
use metastat::failsafe::{orwin, rosenberg_fixed, rosenberg_random, rosenthal};
use metastat::types::{AnalysisValues, RosenbergRandom, RosenbergResult, Structure};

const Z_975: f64 = 1.959963984540054;

#[test]
fn rosenthal_from_summed_z_scores() {
    let k = rosenthal(&[2.0, 2.0, 2.0], &[1.0, 1.0, 1.0], 0.05);
    assert!((k - (36.0 / Z_975.powi(2) - 3.0)).abs() < 1e-9);
    // a non-significant sum gives zero rather than a negative count
    assert_eq!(rosenthal(&[1.0, 1.0], &[1.0, 1.0], 0.05), 0.0);
}

#[test]
fn orwin_is_linear_in_the_mean() {
    assert!((orwin(10, 0.5, 0.1) - 40.0).abs() < 1e-12);
    assert_eq!(orwin(10, 0.05, 0.1), 0.0);
}

#[test]
fn rosenberg_fixed_normal_and_t_forms() {
    let r = rosenberg_fixed(3, 6.0, 3.0, 0.05);
    assert!((r.k_normal - (36.0 / Z_975.powi(2) - 3.0)).abs() < 1e-9);
    assert!(r.k_one_study < r.k_normal);
    assert!(r.k_n_studies >= 0.0);
    assert!(r.converged);
}

#[test]
fn rosenberg_random_needs_positive_pooled_variance() {
    let r = rosenberg_random(&[0.5, 0.5, 0.5], &[0.1, 0.2, 0.3], 0.05).expect("rosenberg");
    assert_eq!(r, RosenbergRandom::NonPositivePooledVariance);

    let r = rosenberg_random(
        &[0.1, 0.9, 0.4, 1.3, 0.7],
        &[0.01, 0.02, 0.015, 0.03, 0.01],
        0.05,
    )
    .expect("rosenberg");
    match r {
        RosenbergRandom::Estimated {
            k_one_study,
            k_n_studies,
            ..
        } => {
            assert!(k_one_study.is_none_or(|k| k >= 0.0));
            assert!(k_n_studies.is_none_or(|k| k >= 0.0));
        }
        RosenbergRandom::NonPositivePooledVariance => panic!("pooled variance should be positive"),
    }
}

fn estimated(effects: &[f64], variances: &[f64]) -> (f64, f64, bool) {
    match rosenberg_random(effects, variances, 0.05).expect("rosenberg") {
        RosenbergRandom::Estimated {
            k_one_study,
            k_n_studies,
            converged,
        } => (
            k_one_study.expect("one study estimate"),
            k_n_studies.expect("n studies estimate"),
            converged,
        ),
        RosenbergRandom::NonPositivePooledVariance => panic!("pooled variance should be positive"),
    }
}

#[test]
fn rosenberg_random_average_weight_starts_from_last_weight_sum() {
    let (one, many, converged) = estimated(
        &[0.1, 0.9, 0.4, 1.3, 0.7],
        &[0.01, 0.02, 0.015, 0.03, 0.01],
    );
    assert!((one - 0.303_014_119_834_804_5).abs() < 1e-6);
    assert!((many - 0.333_936_592_873_696_1).abs() < 1e-6);
    assert!(converged);

    let (one, many, converged) = estimated(
        &[0.2, 1.1, 0.5, 0.9, 1.6, 0.3],
        &[0.02, 0.05, 0.01, 0.04, 0.08, 0.03],
    );
    assert!((one - 1.197_728_929_982_665).abs() < 1e-6);
    assert!((many - 1.039_141_727_251_427_4).abs() < 1e-6);
    assert!(converged);
}

#[test]
fn rosenberg_fixed_stops_without_converging_when_df_vanishes() {
    // with one study the first update gives df = 1 + k - 1 = k; a tiny effect
    // drives k negative and the loop has to stop before the rounding test holds
    let r = rosenberg_fixed(1, 0.001, 1.0, 0.05);
    assert!(!r.converged);
    assert_eq!(r.k_n_studies, 0.0);
}

#[test]
fn simple_analysis_reports_requested_failsafe_numbers() {
    let table = simple_table(&[1.0, 2.0, 3.0], &[1.0, 1.0, 0.5]);
    let mut opts = options();
    opts.failsafe.rosenberg = Some(0.05);
    opts.failsafe.rosenthal = Some(0.05);
    opts.failsafe.orwin = Some(0.5);
    let report = run(&table, opts, Structure::Simple);

    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    let fs = &simple.failsafe;
    assert!((fs.orwin.expect("orwin") - 10.5).abs() < TOL);
    assert!(fs.rosenthal.expect("rosenthal") > 0.0);
    assert!(matches!(fs.rosenberg, Some(RosenbergResult::Fixed(_))));
    for key in ["Rosenberg_2005", "Rosenthal_1979", "Orwin_1983"] {
        assert!(report.citations.contains(&key), "missing citation {key}");
    }
    assert!(common::has_line(&report, "Orwin's Fail-safe Number"));
}

#[test]
fn random_effects_rosenberg_is_reported_as_random() {
    let table = simple_table(&[0.1, 0.9, 0.4, 1.3, 0.7], &[0.01, 0.02, 0.015, 0.03, 0.01]);
    let mut opts = options();
    opts.random_effects = true;
    opts.failsafe.rosenberg = Some(0.05);
    let report = run(&table, opts, Structure::Simple);
    let AnalysisValues::Simple(simple) = values(&report) else {
        panic!("expected simple values");
    };
    assert!(matches!(
        simple.failsafe.rosenberg,
        Some(RosenbergResult::Random(_))
    ));
    assert!(simple.failsafe.rosenthal.is_none());
}
