//! Plain-text report blocks. Each block is a list of lines; tables are
//! padded so columns line up in a fixed-width font.

use crate::types::{GlobalValues, HeterogeneityTest, I2Row, MeanEffect, PredictorTest};

pub type Block = Vec<String>;

const COLUMN_GAP: usize = 3;

pub fn fmt_float(value: f64, decimals: usize) -> String {
    format!("{value:.decimals$}")
}

pub fn interval_to_str(lower: f64, upper: f64, decimals: usize) -> String {
    format!("{} to {}", fmt_float(lower, decimals), fmt_float(upper, decimals))
}

/// Label for a back-transformed value: a leading `ln ` is dropped,
/// anything else is wrapped in `exp(...)`.
pub fn exponential_label(name: &str) -> String {
    match name.strip_prefix("ln ") {
        Some(rest) => rest.to_string(),
        None => format!("exp({name})"),
    }
}

pub fn ci_header(alpha: f64) -> String {
    format!("{:.0}% CI", 100.0 * (1.0 - alpha))
}

/// Decimal places for a randomization p-value: enough to show `1/(iterations+1)`.
pub fn randomization_decimals(decimals: usize, iterations: usize) -> usize {
    let needed = ((iterations + 1) as f64).log10().ceil() as usize;
    decimals.max(needed)
}

pub fn citation_line(keys: &[&str]) -> String {
    let word = if keys.len() > 1 { "Citations" } else { "Citation" };
    format!("→ {word}: {}", keys.join(", "))
}

pub fn heading(text: &str) -> Block {
    vec![text.to_string()]
}

pub fn included_line(n: usize) -> Block {
    vec![format!("{n} studies will be included in this analysis")]
}

pub fn pooled_variance_line(pooled_var: f64, decimals: usize) -> Block {
    vec![format!(
        "Estimate of pooled variance: {}",
        fmt_float(pooled_var, decimals)
    )]
}

/// Blocks listing rows removed before analysis and rows with invalid data.
pub fn filtered_invalid_blocks(filtered: &[String], invalid: &[String]) -> Vec<Block> {
    let mut blocks = Vec::new();
    if !filtered.is_empty() {
        blocks.push(vec![format!(
            "Pre-filtered studies excluded from analysis: {}",
            filtered.join(", ")
        )]);
    }
    if !invalid.is_empty() {
        blocks.push(vec![format!(
            "Studies with invalid data: {}",
            invalid.join(", ")
        )]);
    }
    blocks
}

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Value {
    fn render(&self, decimals: usize) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => fmt_float(*x, decimals),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

/// Fixed-width table: headers centred, first column left-aligned and the
/// rest right-aligned, with a rule under the header.
#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
    rules_after: Vec<usize>,
    decimals: usize,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>, decimals: usize) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            rules_after: Vec::new(),
            decimals,
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Draw a rule under the most recently pushed row.
    pub fn rule(&mut self) {
        if let Some(last) = self.rows.len().checked_sub(1) {
            self.rules_after.push(last);
        }
    }

    pub fn render(&self) -> Block {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.render(self.decimals)).collect())
            .collect();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }
        let gap = " ".repeat(COLUMN_GAP);
        let total = widths.iter().sum::<usize>() + COLUMN_GAP * widths.len().saturating_sub(1);

        let mut lines = Vec::with_capacity(cells.len() + 2);
        let header = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| format!("{h:^w$}"))
            .collect::<Vec<_>>()
            .join(&gap);
        lines.push(header.trim_end().to_string());
        lines.push("-".repeat(total));
        for (r, row) in cells.iter().enumerate() {
            let line = row
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (cell, w))| {
                    if i == 0 {
                        format!("{cell:<w$}")
                    } else {
                        format!("{cell:>w$}")
                    }
                })
                .collect::<Vec<_>>()
                .join(&gap);
            lines.push(line.trim_end().to_string());
            if self.rules_after.contains(&r) {
                lines.push("-".repeat(total));
            }
        }
        lines
    }
}

fn mean_row_name(name: &str, effect_label: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!("{name} {effect_label}")
    }
}

/// Mean effects with their intervals; log-transformed effects get a second
/// set of back-transformed rows.
pub fn mean_effects_table(
    effect_label: &str,
    means: &[MeanEffect],
    decimals: usize,
    alpha: f64,
    log_transformed: bool,
    include_median: bool,
) -> Block {
    let bootstrap = means.iter().any(|m| m.bootstrap.is_some());
    let mut headers = vec!["".to_string(), "n".to_string(), "Mean".to_string()];
    if include_median {
        headers.push("Median".to_string());
    }
    headers.push(ci_header(alpha));
    if bootstrap {
        headers.push("Bootstrap CI".to_string());
        headers.push("Bias-corrected CI".to_string());
    }
    let mut table = Table::new(headers, decimals);

    let rows = MeanRows {
        means,
        include_median,
        bootstrap,
        decimals,
    };
    rows.push(&mut table, |x| x, &|name: &str| mean_row_name(name, effect_label));
    if log_transformed {
        table.rule();
        let exp_label = exponential_label(effect_label);
        rows.push(&mut table, f64::exp, &|name: &str| {
            format!("{name} {exp_label}").trim().to_string()
        });
    }
    table.render()
}

struct MeanRows<'a> {
    means: &'a [MeanEffect],
    include_median: bool,
    bootstrap: bool,
    decimals: usize,
}

impl MeanRows<'_> {
    fn push(&self, table: &mut Table, transform: fn(f64) -> f64, label: &dyn Fn(&str) -> String) {
        let dp = self.decimals;
        for m in self.means {
            let mut row: Vec<Value> = vec![label(&m.name).into(), m.n.into(), transform(m.mean).into()];
            if self.include_median {
                row.push(match m.median {
                    Some(median) => transform(median).into(),
                    None => "".into(),
                });
            }
            row.push(interval_to_str(transform(m.lower_ci), transform(m.upper_ci), dp).into());
            if self.bootstrap {
                match &m.bootstrap {
                    Some(b) => {
                        row.push(interval_to_str(transform(b.lower), transform(b.upper), dp).into());
                        row.push(
                            interval_to_str(
                                transform(b.lower_bias_corrected),
                                transform(b.upper_bias_corrected),
                                dp,
                            )
                            .into(),
                        );
                    }
                    None => {
                        row.push("".into());
                        row.push("".into());
                    }
                }
            }
            table.push(row);
        }
    }
}

/// Q-statistic table. With `total_line` a rule separates the last row.
pub fn heterogeneity_table(
    tests: &[HeterogeneityTest],
    decimals: usize,
    total_line: bool,
    randomization: Option<usize>,
) -> Block {
    let mut headers = vec!["Source", "Q", "df", "P(χ²)"];
    if randomization.is_some() {
        headers.push("P(randomization)");
    }
    let mut table = Table::new(headers, decimals);
    for (i, test) in tests.iter().enumerate() {
        let mut row: Vec<Value> = vec![
            test.source.as_str().into(),
            test.q.into(),
            test.df.into(),
            test.p_chi.into(),
        ];
        if let Some(iterations) = randomization {
            row.push(match test.p_randomization {
                Some(p) => fmt_float(p, randomization_decimals(decimals, iterations)).into(),
                None => "".into(),
            });
        }
        table.push(row);
        if total_line && i + 2 == tests.len() {
            table.rule();
        }
    }
    table.render()
}

pub fn predictor_table(predictors: &[PredictorTest], decimals: usize, alpha: f64) -> Block {
    let mut table = Table::new(
        ["Predictor".to_string(), "Value".to_string(), "SE".to_string(), ci_header(alpha), "P(Normal)".to_string()],
        decimals,
    );
    for p in predictors {
        let (lower, upper) = crate::stats::normal_interval(p.value, p.se, alpha);
        table.push(vec![
            p.predictor.as_str().into(),
            p.value.into(),
            p.se.into(),
            interval_to_str(lower, upper, decimals).into(),
            p.p_norm.into(),
        ]);
    }
    table.render()
}

pub fn i2_table(rows: &[I2Row], decimals: usize, alpha: f64) -> Vec<Block> {
    let mut table = Table::new(
        ["Source".to_string(), "I²".to_string(), ci_header(alpha)],
        decimals,
    );
    for row in rows {
        table.push(vec![
            row.source.as_str().into(),
            row.value.i2.into(),
            interval_to_str(row.value.lower, row.value.upper, decimals).into(),
        ]);
    }
    vec![
        table.render(),
        vec![citation_line(&["Higgins_Thompson_2002", "Huedo-Medina_et_2006"])],
    ]
}

pub struct GlobalOutput<'a> {
    pub effect_label: &'a str,
    pub decimals: usize,
    pub alpha: f64,
    pub log_transformed: bool,
    pub include_median: bool,
}

/// Whole-sample heterogeneity, I², mean effect and the pooled variance
/// summary. Returns the citation keys used.
pub fn global_output(
    blocks: &mut Vec<Block>,
    global: &GlobalValues,
    settings: &GlobalOutput<'_>,
) -> Vec<&'static str> {
    let dp = settings.decimals;
    blocks.push(heading("Heterogeneity"));
    blocks.push(heterogeneity_table(
        std::slice::from_ref(&global.total),
        dp,
        false,
        None,
    ));
    blocks.push(vec![citation_line(&["Hedges_Olkin_1985"])]);
    blocks.extend(i2_table(
        &[I2Row {
            source: "Total".to_string(),
            value: global.i2,
        }],
        dp,
        settings.alpha,
    ));

    blocks.push(heading("Mean Effect Size"));
    blocks.push(mean_effects_table(
        settings.effect_label,
        std::slice::from_ref(&global.mean),
        dp,
        settings.alpha,
        settings.log_transformed,
        settings.include_median,
    ));

    let sqrt_pooled = global.pooled_var.sqrt();
    let ratio = sqrt_pooled / global.mean.avg_var;
    blocks.push(vec![
        format!("Sqrt Pooled Variance = {}", fmt_float(sqrt_pooled, dp)),
        format!("Mean Study Variance = {}", fmt_float(global.mean.avg_var, dp)),
        format!("ratio = {}", fmt_float(ratio, dp)),
    ]);
    vec!["Hedges_Olkin_1985", "Higgins_Thompson_2002", "Huedo-Medina_et_2006"]
}
