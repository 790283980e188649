use std::fs;
use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use metastat::data::{Cell, DataSource, DataTable, ExtractSpec, SortKey, extract};
use metastat::io::{read_table, read_tree, write_chart_json, write_report};
use metastat::qc::{check_equal_length, check_range_f64, validate_request};
use metastat::schema::{resolve_column, resolve_columns};
use metastat::types::{AnalysisOptions, AnalysisRequest, Column, FunnelAxis, Structure};

const CSV: &str = "study,effect,var,group\nSmith,0.5,0.1,x\nJones,0.7,0.2,y\nLee,NA,0.1,x\n";

#[test]
fn read_csv_with_label_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("studies.csv");
    fs::write(&path, CSV).expect("write csv");

    let table = read_table(&path).expect("read table");
    assert_eq!(table.column_labels(), ["effect", "var", "group"]);
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.row_label(1), "Jones");
    assert_eq!(table.get_numeric(0, 0), Some(0.5));
    assert_eq!(table.get_numeric(2, 0), None);
    assert_eq!(table.get_string(1, 2).as_deref(), Some("y"));
}

#[test]
fn read_gzipped_csv() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("studies.csv.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(CSV.as_bytes()).expect("compress");
    fs::write(&path, encoder.finish().expect("finish gzip")).expect("write gz");

    let table = read_table(&path).expect("read table");
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.row_label(2), "Lee");
    assert_eq!(table.get_numeric(1, 1), Some(0.2));
}

#[test]
fn read_whitespace_table_without_labels() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("studies.txt");
    fs::write(&path, "effect var habitat\n1.5 0.25 \"open water\"\n-0.5 0.5 NA\n")
        .expect("write table");

    let table = read_table(&path).expect("read table");
    assert_eq!(table.column_labels(), ["effect", "var", "habitat"]);
    assert_eq!(table.row_label(0), "1");
    assert_eq!(table.cell(0, 2), &Cell::Text("open water".to_string()));
    assert_eq!(table.cell(1, 2), &Cell::Missing);
    assert_eq!(table.get_numeric(1, 0), Some(-0.5));
}

#[test]
fn read_tree_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tree.nwk");
    fs::write(&path, "((A:1,B:1):1,C:2);\n").expect("write tree");
    let tree = read_tree(&path).expect("read tree");
    assert_eq!(tree.tip_count(), 3);
    assert!(read_tree(&dir.path().join("missing.nwk")).is_err());
}

#[test]
fn report_and_chart_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report = dir.path().join("report.txt");
    write_report(
        &[
            vec!["Heading".to_string()],
            vec!["a".to_string(), "b".to_string()],
        ],
        &report,
    )
    .expect("write report");
    let text = fs::read_to_string(&report).expect("read report");
    assert!(text.contains("Heading"));
    assert!(text.contains('b'));

    let mut chart = metastat::chart::ChartData::new(
        "effect",
        "standard error",
        metastat::chart::Caption::TrimFill {
            effect_label: "effect".to_string(),
        },
    );
    chart.add_scatter(
        "Studies",
        vec![0.1, 0.2],
        vec![0.3, 0.4],
        metastat::chart::Marker::Circle,
    );
    let json_path = dir.path().join("chart.json");
    write_chart_json(&chart, &json_path).expect("write chart");
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&json_path).expect("read chart"))
            .expect("parse chart json");
    assert_eq!(json["x_label"], "effect");
    assert_eq!(json["series"][0]["name"], "Studies");
}

#[test]
fn columns_resolve_case_insensitively() {
    let headers = vec!["Effect".to_string(), " Var ".to_string(), "group".to_string()];
    let col = resolve_column(&headers, "effect").expect("resolve");
    assert_eq!(col, Column::new(0, "Effect"));
    assert_eq!(resolve_column(&headers, "VAR").expect("resolve").label, "Var");
    assert!(resolve_column(&headers, "weight").is_err());

    let dup = vec!["x".to_string(), "X".to_string()];
    assert!(resolve_column(&dup, "x").is_err());
    let cols = resolve_columns(&headers, &["group".to_string(), "effect".to_string()])
        .expect("resolve columns");
    assert_eq!(cols.iter().map(|c| c.index).collect::<Vec<_>>(), vec![2, 0]);
}

#[test]
fn extraction_splits_valid_filtered_and_invalid_rows() {
    let mut table = DataTable::new(vec![
        "effect".to_string(),
        "var".to_string(),
        "year".to_string(),
    ]);
    let rows = [
        ("A", Cell::Number(0.1), Cell::Number(0.2), Cell::Number(2001.0)),
        ("B", Cell::Number(0.3), Cell::Number(-0.2), Cell::Number(2002.0)),
        ("C", Cell::Text("0.4".to_string()), Cell::Number(0.1), Cell::Text("unpublished".to_string())),
        ("D", Cell::Number(0.5), Cell::Missing, Cell::Number(2003.0)),
        ("E", Cell::Number(0.6), Cell::Number(0.3), Cell::Number(2004.0)),
    ];
    for (label, e, v, y) in rows {
        table.push_row(label, vec![e, v, y]).expect("push row");
    }
    table.set_included(4, false).expect("set included");
    assert!(table.push_row("F", vec![Cell::Missing]).is_err());

    let extracted = extract(
        &table,
        0,
        1,
        &ExtractSpec {
            order: Some(2),
            ..ExtractSpec::default()
        },
    )
    .expect("extract");
    assert_eq!(extracted.len(), 2);
    assert_eq!(extracted.filtered, vec!["E"]);
    assert_eq!(extracted.invalid, vec!["B", "D"]);
    assert_eq!(extracted.observations[1].effect, 0.4);
    assert_eq!(
        extracted.observations[1].order,
        Some(SortKey::Text("unpublished".to_string()))
    );
    assert!(extract(&table, 0, 9, &ExtractSpec::default()).is_err());
}

#[test]
fn non_positive_sample_size_is_invalid() {
    let mut table = DataTable::new(vec!["effect".to_string(), "var".to_string(), "n".to_string()]);
    table
        .push_row("A", vec![Cell::Number(0.1), Cell::Number(0.2), Cell::Number(20.0)])
        .expect("push row");
    table
        .push_row("B", vec![Cell::Number(0.1), Cell::Number(0.2), Cell::Number(0.0)])
        .expect("push row");
    let extracted = extract(
        &table,
        0,
        1,
        &ExtractSpec {
            sample_size: Some(2),
            ..ExtractSpec::default()
        },
    )
    .expect("extract");
    assert_eq!(extracted.observations[0].sample_size, Some(20.0));
    assert_eq!(extracted.invalid, vec!["B"]);
}

fn request(options: AnalysisOptions, structure: Structure) -> AnalysisRequest {
    AnalysisRequest { options, structure }
}

#[test]
fn request_validation() {
    let base = AnalysisOptions::new(Column::new(0, "effect"), Column::new(1, "var"));
    assert!(validate_request(&request(base.clone(), Structure::Simple)).is_ok());

    let mut bad_alpha = base.clone();
    bad_alpha.alpha = 1.5;
    assert!(validate_request(&request(bad_alpha, Structure::Simple)).is_err());

    let mut zero_iterations = base.clone();
    zero_iterations.bootstrap_iterations = Some(0);
    assert!(validate_request(&request(zero_iterations, Structure::Simple)).is_err());

    let mut orwin = base.clone();
    orwin.failsafe.orwin = Some(0.0);
    assert!(validate_request(&request(orwin, Structure::Simple)).is_err());

    let funnel = Structure::Funnel {
        axis: FunnelAxis::SampleSize,
        sample_size: None,
        pseudo_ci: false,
        contours: false,
        power: false,
    };
    assert!(validate_request(&request(base, funnel)).is_err());
}

#[test]
fn qc_checks() {
    assert!(check_equal_length(3, 3, "a", "b").is_ok());
    assert!(check_equal_length(2, 3, "a", "b").is_err());
    assert!(check_range_f64(0.5, 0.0, 1.0, true, "alpha").is_ok());
    assert!(check_range_f64(1.0, 0.0, 1.0, true, "alpha").is_err());
    assert!(check_range_f64(1.0, 0.0, 1.0, false, "alpha").is_ok());
}
