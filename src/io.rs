use std::fs::{File, read_to_string};
use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::Path;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use phylotree::{PhyloTree, parse_newick};
use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::info;

use crate::chart::ChartData;
use crate::data::{Cell, DataTable};
use crate::logging::log_blocks;

const LABEL_HEADERS: [&str; 3] = ["", "LABEL", "STUDY"];

/// Read a delimited study table. `.gz` and `.bz2` files are decompressed
/// first. The first column holds row labels when its header is empty,
/// `label` or `study`; otherwise rows are labelled by their 1-based position.
pub fn read_table(path: &Path) -> Result<DataTable> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = if ext == "gz" || ext == "bz2" {
        let tmp = decompress_to_temp(path, &ext)?;
        read_table_plain(tmp.path())?
    } else {
        read_table_plain(path)?
    };
    info!(
        "Read {} rows and {} columns from {}",
        crate::data::DataSource::row_count(&table),
        table.column_labels().len(),
        path.display()
    );
    Ok(table)
}

fn read_table_plain(path: &Path) -> Result<DataTable> {
    let delimiter = detect_delimiter(path)?;
    if delimiter == b' ' {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        return read_table_whitespace(BufReader::new(file));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(delimiter)
                .with_null_values(Some(NullValues::AllColumns(vec![
                    "".into(),
                    "NA".into(),
                    "NaN".into(),
                    ".".into(),
                ])))
                .with_missing_is_null(true),
        )
        .with_ignore_errors(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("read {}", path.display()))?;
    dataframe_to_table(&df)
}

fn dataframe_to_table(df: &DataFrame) -> Result<DataTable> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut columns: Vec<Vec<Cell>> = Vec::with_capacity(names.len());
    for name in &names {
        let series = df.column(name)?.as_series().context("series")?;
        let cells = if series.dtype() == &DataType::String {
            series
                .str()?
                .into_iter()
                .map(|v| match v.map(str::trim) {
                    Some(s) if !s.is_empty() => Cell::Text(s.to_string()),
                    _ => Cell::Missing,
                })
                .collect()
        } else {
            let cast = series.cast(&DataType::Float64)?;
            cast.f64()?
                .into_iter()
                .map(|v| match v {
                    Some(x) if x.is_finite() => Cell::Number(x),
                    _ => Cell::Missing,
                })
                .collect()
        };
        columns.push(cells);
    }
    build_table(names, columns, df.height())
}

fn build_table(headers: Vec<String>, mut columns: Vec<Vec<Cell>>, height: usize) -> Result<DataTable> {
    let has_labels = headers
        .first()
        .is_some_and(|h| LABEL_HEADERS.contains(&h.trim().to_ascii_uppercase().as_str()));
    let (headers, labels) = if has_labels {
        let labels = columns.remove(0);
        (headers[1..].to_vec(), Some(labels))
    } else {
        (headers, None)
    };
    let mut table = DataTable::new(headers);
    for row in 0..height {
        let label = match labels.as_ref().map(|l| &l[row]) {
            Some(Cell::Missing) | None => (row + 1).to_string(),
            Some(cell) => cell.to_string(),
        };
        let cells = columns.iter().map(|col| col[row].clone()).collect();
        table.push_row(label, cells)?;
    }
    Ok(table)
}

fn read_table_whitespace<R: Read>(reader: R) -> Result<DataTable> {
    let mut reader = BufReader::new(reader);
    let mut header_line = String::new();
    reader.read_line(&mut header_line)?;
    if header_line.trim().is_empty() {
        return Err(anyhow::anyhow!("empty file"));
    }
    let headers = split_quoted_whitespace(&header_line);
    let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
    let mut height = 0;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parts = split_quoted_whitespace(&line);
        for (i, col) in columns.iter_mut().enumerate() {
            let value = parts.get(i).map(String::as_str).unwrap_or("");
            col.push(parse_token(value));
        }
        height += 1;
    }
    build_table(headers, columns, height)
}

fn parse_token(value: &str) -> Cell {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    if trimmed.is_empty() || upper == "NA" || upper == "NAN" || trimmed == "." {
        return Cell::Missing;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Cell::Number(v),
        _ => Cell::Text(trimmed.to_string()),
    }
}

fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    if first.contains('\t') {
        return Ok(b'\t');
    }
    if first.contains(',') {
        return Ok(b',');
    }
    Ok(b' ')
}

fn decompress_to_temp(path: &Path, ext: &str) -> Result<NamedTempFile> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut decoder: Box<dyn Read> = match ext {
        "gz" => Box::new(GzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    };
    let mut tmp = NamedTempFile::new()?;
    std::io::copy(&mut decoder, &mut tmp)?;
    Ok(tmp)
}

fn split_quoted_whitespace(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in line.chars() {
        if c == '"' {
            in_quote = !in_quote;
            continue;
        }
        if c.is_whitespace() && !in_quote {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

pub fn read_tree(path: &Path) -> Result<PhyloTree> {
    let text = read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let tree = parse_newick(&text).with_context(|| format!("parse tree {}", path.display()))?;
    info!("Read tree with {} tips from {}", tree.tip_count(), path.display());
    Ok(tree)
}

pub fn write_report(blocks: &[Vec<String>], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    log_blocks(&mut writer, blocks, false)
}

pub fn write_chart_json(chart: &ChartData, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), chart).context("write chart json")?;
    Ok(())
}
