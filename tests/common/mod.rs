#![allow(dead_code)]

use metastat::data::{Cell, DataTable};
use metastat::phylotree::PhyloTree;
use metastat::resampling::Progress;
use metastat::types::{AnalysisOptions, AnalysisRequest, AnalysisValues, Column, Structure};
use metastat::{AnalysisReport, run_analysis};

pub const TOL: f64 = 1e-8;

/// Effect in column 0, variance in column 1, then `extra` columns. Rows are
/// labelled S1, S2, ...
pub fn study_table(extra: &[&str], rows: Vec<(f64, f64, Vec<Cell>)>) -> DataTable {
    let mut headers = vec!["effect".to_string(), "var".to_string()];
    headers.extend(extra.iter().map(|h| h.to_string()));
    let mut table = DataTable::new(headers);
    for (i, (effect, variance, rest)) in rows.into_iter().enumerate() {
        let mut cells = vec![Cell::Number(effect), Cell::Number(variance)];
        cells.extend(rest);
        table
            .push_row(format!("S{}", i + 1), cells)
            .expect("push row");
    }
    table
}

pub fn simple_table(effects: &[f64], variances: &[f64]) -> DataTable {
    study_table(
        &[],
        effects
            .iter()
            .zip(variances)
            .map(|(e, v)| (*e, *v, Vec::new()))
            .collect(),
    )
}

pub fn text(value: &str) -> Cell {
    Cell::Text(value.to_string())
}

pub fn options() -> AnalysisOptions {
    AnalysisOptions::new(Column::new(0, "effect"), Column::new(1, "var"))
}

pub fn run(table: &DataTable, options: AnalysisOptions, structure: Structure) -> AnalysisReport {
    run_with_tree(table, options, structure, None)
}

pub fn run_with_tree(
    table: &DataTable,
    options: AnalysisOptions,
    structure: Structure,
    tree: Option<&PhyloTree>,
) -> AnalysisReport {
    let progress = Progress::none();
    run_analysis(
        table,
        &AnalysisRequest { options, structure },
        tree,
        &progress,
    )
    .expect("run analysis")
}

pub fn values(report: &AnalysisReport) -> &AnalysisValues {
    report.outcome.values().expect("analysis values")
}

pub fn has_line(report: &AnalysisReport, needle: &str) -> bool {
    report
        .output
        .iter()
        .flatten()
        .any(|line| line.contains(needle))
}
