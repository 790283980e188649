//! Study data as seen by the analyses, and the filtering step that turns
//! table rows into observations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::error::MetaError;
use crate::qc::check_equal_length;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) => write!(f, "{v}"),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Missing => Ok(()),
        }
    }
}

/// Read-only access to tabular study data.
pub trait DataSource {
    fn row_count(&self) -> usize;
    fn column_count(&self) -> usize;
    fn column_label(&self, col: usize) -> &str;
    fn row_label(&self, row: usize) -> &str;
    fn is_included(&self, row: usize) -> bool;
    fn get_numeric(&self, row: usize, col: usize) -> Option<f64>;
    fn get_string(&self, row: usize, col: usize) -> Option<String>;
    /// Category values of `col` removed from every analysis.
    fn excluded_group_values(&self, col: usize) -> Option<&BTreeSet<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: Vec<String>,
    row_labels: Vec<String>,
    cells: Vec<Vec<Cell>>,
    included: Vec<bool>,
    excluded: BTreeMap<usize, BTreeSet<String>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn push_row(&mut self, label: impl Into<String>, cells: Vec<Cell>) -> crate::error::Result<()> {
        check_equal_length(cells.len(), self.columns.len(), "row cells", "columns")?;
        self.row_labels.push(label.into());
        self.cells.push(cells);
        self.included.push(true);
        Ok(())
    }

    pub fn set_included(&mut self, row: usize, included: bool) -> crate::error::Result<()> {
        let flag = self
            .included
            .get_mut(row)
            .ok_or_else(|| MetaError::InvalidArgument(format!("row {row} out of range")))?;
        *flag = included;
        Ok(())
    }

    pub fn exclude_group_value(&mut self, col: usize, value: impl Into<String>) {
        self.excluded.entry(col).or_default().insert(value.into());
    }

    pub fn column_labels(&self) -> &[String] {
        &self.columns
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&Cell::Missing)
    }
}

impl DataSource for DataTable {
    fn row_count(&self) -> usize {
        self.cells.len()
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_label(&self, col: usize) -> &str {
        self.columns.get(col).map(String::as_str).unwrap_or("")
    }

    fn row_label(&self, row: usize) -> &str {
        self.row_labels.get(row).map(String::as_str).unwrap_or("")
    }

    fn is_included(&self, row: usize) -> bool {
        self.included.get(row).copied().unwrap_or(false)
    }

    fn get_numeric(&self, row: usize, col: usize) -> Option<f64> {
        match self.cell(row, col) {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    fn get_string(&self, row: usize, col: usize) -> Option<String> {
        match self.cell(row, col) {
            Cell::Missing => None,
            cell => Some(cell.to_string()),
        }
    }

    fn excluded_group_values(&self, col: usize) -> Option<&BTreeSet<String>> {
        self.excluded.get(&col)
    }
}

/// Ordering value for cumulative analyses: numbers sort before text.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Number(f64),
    Text(String),
}

impl SortKey {
    pub fn compare(&self, other: &SortKey) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
        }
    }
}

/// One study's contribution to an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub row: usize,
    pub label: String,
    pub effect: f64,
    pub variance: f64,
    /// Values of the requested category columns, in request order.
    pub groups: Vec<String>,
    /// Values of the requested numeric columns, in request order.
    pub covariates: Vec<f64>,
    pub sample_size: Option<f64>,
    pub tip: Option<String>,
    pub order: Option<SortKey>,
}

/// Which columns an analysis needs from each row beyond effect and variance.
#[derive(Debug, Clone, Default)]
pub struct ExtractSpec<'a> {
    pub categories: Vec<usize>,
    pub numbers: Vec<usize>,
    pub sample_size: Option<usize>,
    /// Tip column and the tip names present in the tree.
    pub tips: Option<(usize, &'a BTreeSet<String>)>,
    pub order: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub observations: Vec<Observation>,
    /// Labels of rows removed by the include flag or excluded categories.
    pub filtered: Vec<String>,
    /// Labels of rows with missing or unusable values.
    pub invalid: Vec<String>,
}

impl Extracted {
    pub fn effects(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.effect).collect()
    }

    pub fn variances(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.variance).collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

fn check_column(data: &dyn DataSource, col: usize) -> Result<()> {
    if col >= data.column_count() {
        return Err(anyhow!(
            "column index {col} out of range ({} columns)",
            data.column_count()
        ));
    }
    Ok(())
}

fn is_prefiltered(data: &dyn DataSource, row: usize) -> bool {
    if !data.is_included(row) {
        return true;
    }
    (0..data.column_count()).any(|col| match data.excluded_group_values(col) {
        Some(excluded) if !excluded.is_empty() => data
            .get_string(row, col)
            .is_some_and(|value| excluded.contains(&value)),
        _ => false,
    })
}

/// Split the rows of `data` into usable observations, pre-filtered rows and
/// invalid rows.
pub fn extract(
    data: &dyn DataSource,
    effect: usize,
    variance: usize,
    spec: &ExtractSpec<'_>,
) -> Result<Extracted> {
    let mut required = vec![effect, variance];
    required.extend(&spec.categories);
    required.extend(&spec.numbers);
    required.extend(spec.sample_size);
    required.extend(spec.tips.map(|(col, _)| col));
    required.extend(spec.order);
    for col in required {
        check_column(data, col)?;
    }

    let mut out = Extracted::default();
    for row in 0..data.row_count() {
        let label = data.row_label(row).to_string();
        if is_prefiltered(data, row) {
            out.filtered.push(label);
            continue;
        }
        match read_observation(data, row, effect, variance, spec) {
            Some(mut obs) => {
                obs.label = label;
                out.observations.push(obs);
            }
            None => out.invalid.push(label),
        }
    }
    if !out.invalid.is_empty() {
        warn!("{} rows with invalid data were excluded", out.invalid.len());
    }
    debug!(
        "extracted {} observations ({} filtered, {} invalid)",
        out.observations.len(),
        out.filtered.len(),
        out.invalid.len()
    );
    Ok(out)
}

fn read_observation(
    data: &dyn DataSource,
    row: usize,
    effect: usize,
    variance: usize,
    spec: &ExtractSpec<'_>,
) -> Option<Observation> {
    let e = data.get_numeric(row, effect)?;
    let v = data.get_numeric(row, variance).filter(|v| *v > 0.0)?;
    let groups = spec
        .categories
        .iter()
        .map(|&col| data.get_string(row, col))
        .collect::<Option<Vec<_>>>()?;
    let covariates = spec
        .numbers
        .iter()
        .map(|&col| data.get_numeric(row, col))
        .collect::<Option<Vec<_>>>()?;
    let sample_size = match spec.sample_size {
        Some(col) => Some(data.get_numeric(row, col).filter(|ns| *ns > 0.0)?),
        None => None,
    };
    let tip = match spec.tips {
        Some((col, names)) => {
            let name = data.get_string(row, col)?;
            if !names.contains(&name) {
                return None;
            }
            Some(name)
        }
        None => None,
    };
    let order = match spec.order {
        Some(col) => Some(match data.get_numeric(row, col) {
            Some(v) => SortKey::Number(v),
            None => SortKey::Text(data.get_string(row, col)?),
        }),
        None => None,
    };
    Some(Observation {
        row,
        label: String::new(),
        effect: e,
        variance: v,
        groups,
        covariates,
        sample_size,
        tip,
        order,
    })
}
