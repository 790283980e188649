//! Chart data handed to an external renderer, serialized as JSON.

use serde::Serialize;

use crate::stats::{norm_cdf, norm_ppf};
use crate::types::{FunnelAxis, MeanEffect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    Circle,
    OpenCircle,
    Cross,
    TriangleUp,
    TriangleDown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Series {
    Scatter {
        name: String,
        x: Vec<f64>,
        y: Vec<f64>,
        marker: Marker,
    },
    Line {
        name: String,
        x: Vec<f64>,
        y: Vec<f64>,
        style: LineStyle,
    },
    /// Horizontal interval segments at heights `y`.
    Intervals {
        name: String,
        min_x: Vec<f64>,
        max_x: Vec<f64>,
        y: Vec<f64>,
    },
    /// Filled region between two curves sharing `y`.
    Band {
        name: String,
        y: Vec<f64>,
        lower_x: Vec<f64>,
        upper_x: Vec<f64>,
    },
    /// Values on an `x` by `y` grid, `values[j][i]` at `(x[i], y[j])`.
    Grid {
        name: String,
        x: Vec<f64>,
        y: Vec<f64>,
        values: Vec<Vec<f64>>,
    },
    Labels {
        name: String,
        labels: Vec<String>,
        y: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForestKind {
    Basic,
    Grouped { group_label: String },
    Nested,
    Cumulative { order_label: String },
    Jackknife,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "chart", rename_all = "snake_case")]
pub enum Caption {
    Forest {
        kind: ForestKind,
        effect_label: String,
        alpha: f64,
        bootstrap: Option<usize>,
    },
    Regression {
        effect_label: String,
        predictor_label: String,
        random_effects: bool,
        citations: Vec<String>,
    },
    TrimFill {
        effect_label: String,
    },
    Funnel {
        effect_label: String,
        axis: FunnelAxis,
    },
}

fn forest_common(effect_label: &str, alpha: f64, bootstrap: Option<usize>) -> String {
    let mut text = format!(
        " Effect size measured as {effect_label}. The dotted vertical line represents no effect, or a mean of zero. Circles represent mean effect size, with the corresponding line the {:.0}% confidence interval.",
        100.0 * (1.0 - alpha)
    );
    text.push_str(" X's represent the median.");
    if let Some(iterations) = bootstrap {
        text.push_str(&format!(
            " Upward-pointing triangles mark the confidence interval from a bootstrap ({} iterations) procedure, following Adams_et_1997; downward-pointing triangles mark the bias-corrected bootstrap interval.",
            thousands(iterations)
        ));
    }
    text
}

fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl Caption {
    pub fn text(&self) -> String {
        match self {
            Caption::Forest {
                kind,
                effect_label,
                alpha,
                bootstrap,
            } => {
                let lead = match kind {
                    ForestKind::Basic => "Forest plot of individual effect sizes for each study, as well as the overall mean.".to_string(),
                    ForestKind::Grouped { group_label } => format!(
                        "Forest plot of effect sizes for the mean of all studies, as well as subgroups of studies designated by {group_label}."
                    ),
                    ForestKind::Nested => "Forest plot of effect sizes for the mean of all studies as well as nested subgroups. Arrows in front of labels along the y-axis indicate the degree of nesting.".to_string(),
                    ForestKind::Cumulative { order_label } => format!(
                        "Forest plot of effect sizes from a cumulative meta-analysis, ranging from the fewest studies at the top to the most at the bottom, ordered by {order_label}."
                    ),
                    ForestKind::Jackknife => "Forest plot of mean effect sizes from a jackknife meta-analysis, with the summary repeated with each study removed, one by one.".to_string(),
                };
                lead + &forest_common(effect_label, *alpha, *bootstrap)
            }
            Caption::Regression {
                effect_label,
                predictor_label,
                random_effects,
                citations,
            } => {
                let model = if *random_effects {
                    "random effects"
                } else {
                    "fixed effects"
                };
                format!(
                    "Plot of {effect_label} vs. {predictor_label}, with a {model} meta-analytic linear regression following the methods of {}.",
                    citations.join(", ")
                )
            }
            Caption::TrimFill { effect_label } => format!(
                "Funnel plot of {effect_label} vs. precision, showing the results of a Trim and Fill Analysis (Duval and Tweedie 2000a, b). Solid black circles represent the original data; open red circles represent inferred \"missing\" data. The dashed line represents the mean effect size of the original data, the dotted line the mean effect size including the inferred data."
            ),
            Caption::Funnel { effect_label, axis } => format!(
                "Funnel plot of {effect_label} vs. {}. The vertical line marks the fixed-effects mean effect size.",
                axis.label()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub x_label: String,
    pub y_label: String,
    /// Forest plots carry their own tick labels instead of a numeric y axis.
    pub suppress_y: bool,
    pub series: Vec<Series>,
    pub caption: Caption,
    pub caption_text: String,
}

impl ChartData {
    pub fn new(x_label: impl Into<String>, y_label: impl Into<String>, caption: Caption) -> Self {
        let caption_text = caption.text();
        Self {
            x_label: x_label.into(),
            y_label: y_label.into(),
            suppress_y: false,
            series: Vec::new(),
            caption,
            caption_text,
        }
    }

    pub fn add_scatter(&mut self, name: &str, x: Vec<f64>, y: Vec<f64>, marker: Marker) {
        self.series.push(Series::Scatter {
            name: name.to_string(),
            x,
            y,
            marker,
        });
    }

    pub fn add_line(&mut self, name: &str, from: (f64, f64), to: (f64, f64), style: LineStyle) {
        self.series.push(Series::Line {
            name: name.to_string(),
            x: vec![from.0, to.0],
            y: vec![from.1, to.1],
            style,
        });
    }

    pub fn add_curve(&mut self, name: &str, x: Vec<f64>, y: Vec<f64>, style: LineStyle) {
        self.series.push(Series::Line {
            name: name.to_string(),
            x,
            y,
            style,
        });
    }

    pub fn series_named(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| match s {
            Series::Scatter { name: n, .. }
            | Series::Line { name: n, .. }
            | Series::Intervals { name: n, .. }
            | Series::Band { name: n, .. }
            | Series::Grid { name: n, .. }
            | Series::Labels { name: n, .. } => n == name,
        })
    }
}

/// Forest plot of a list of means, first row at the top.
pub fn forest_plot(
    kind: ForestKind,
    effect_label: &str,
    means: &[MeanEffect],
    alpha: f64,
    bootstrap: Option<usize>,
) -> ChartData {
    let caption = Caption::Forest {
        kind,
        effect_label: effect_label.to_string(),
        alpha,
        bootstrap,
    };
    let mut chart = ChartData::new(effect_label, "", caption);
    chart.suppress_y = true;

    let n = means.len();
    let y: Vec<f64> = (1..=n).map(|i| -(i as f64)).collect();
    chart.add_line(
        "Line of No Effect",
        (0.0, 0.0),
        (0.0, -(n as f64 + 1.0)),
        LineStyle::Dotted,
    );
    chart.series.push(Series::Intervals {
        name: "Confidence Intervals".to_string(),
        min_x: means.iter().map(|m| m.lower_ci).collect(),
        max_x: means.iter().map(|m| m.upper_ci).collect(),
        y: y.clone(),
    });
    chart.add_scatter(
        "Means",
        means.iter().map(|m| m.mean).collect(),
        y.clone(),
        Marker::Circle,
    );
    if means.iter().any(|m| m.median.is_some()) {
        let (x, my): (Vec<f64>, Vec<f64>) = means
            .iter()
            .zip(&y)
            .filter_map(|(m, yy)| m.median.map(|med| (med, *yy)))
            .unzip();
        chart.add_scatter("Medians", x, my, Marker::Cross);
    }
    chart.series.push(Series::Labels {
        name: "Vertical Axis Tick Labels".to_string(),
        labels: means.iter().map(|m| m.name.clone()).collect(),
        y: y.clone(),
    });

    if bootstrap.is_some() {
        let mut bs_x = Vec::new();
        let mut bias_x = Vec::new();
        let mut ci_y = Vec::new();
        for (m, yy) in means.iter().zip(&y) {
            if let Some(b) = &m.bootstrap {
                bs_x.extend([b.lower, b.upper]);
                bias_x.extend([b.lower_bias_corrected, b.upper_bias_corrected]);
                ci_y.extend([*yy, *yy]);
            }
        }
        chart.add_scatter(
            "Bootstrap Confidence Limits",
            bs_x,
            ci_y.clone(),
            Marker::TriangleUp,
        );
        chart.add_scatter(
            "Bias-corrected Bootstrap Confidence Limits",
            bias_x,
            ci_y,
            Marker::TriangleDown,
        );
    }
    chart
}

pub struct RegressionLine<'a> {
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub slope: f64,
    pub intercept: f64,
    pub random_effects: bool,
    pub citations: &'a [&'a str],
}

/// Scatter of the data with the fitted line across the observed x range.
pub fn regression_plot(line: &RegressionLine<'_>, x: &[f64], y: &[f64]) -> ChartData {
    let caption = Caption::Regression {
        effect_label: line.y_label.to_string(),
        predictor_label: line.x_label.to_string(),
        random_effects: line.random_effects,
        citations: line.citations.iter().map(|c| c.to_string()).collect(),
    };
    let mut chart = ChartData::new(line.x_label, line.y_label, caption);
    let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let x_max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    chart.add_scatter("Point Data", x.to_vec(), y.to_vec(), Marker::Circle);
    chart.add_line(
        "Regression Line",
        (x_min, line.slope * x_min + line.intercept),
        (x_max, line.slope * x_max + line.intercept),
        LineStyle::Solid,
    );
    chart
}

/// Precision-axis funnel of the original and inferred studies. `data`
/// holds (effect, variance) pairs with the `n` original studies first.
pub fn trim_fill_plot(
    effect_label: &str,
    data: &[(f64, f64)],
    n: usize,
    original_mean: f64,
    new_mean: f64,
) -> ChartData {
    let caption = Caption::TrimFill {
        effect_label: effect_label.to_string(),
    };
    let mut chart = ChartData::new(effect_label, "Precision (1/SE)", caption);
    let precision = |v: f64| 1.0 / v.sqrt();
    let (original, inferred) = data.split_at(n.min(data.len()));

    let y: Vec<f64> = original.iter().map(|(_, v)| precision(*v)).collect();
    let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    chart.add_scatter(
        "Original Data",
        original.iter().map(|(e, _)| *e).collect(),
        y,
        Marker::Circle,
    );
    chart.add_scatter(
        "Inferred Data",
        inferred.iter().map(|(e, _)| *e).collect(),
        inferred.iter().map(|(_, v)| precision(*v)).collect(),
        Marker::OpenCircle,
    );
    chart.add_line(
        "Original Mean",
        (original_mean, y_min),
        (original_mean, y_max),
        LineStyle::Dashed,
    );
    chart.add_line(
        "Inferred Mean",
        (new_mean, y_min),
        (new_mean, y_max),
        LineStyle::Dotted,
    );
    chart
}

/// Which overlays to draw on a funnel plot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunnelOverlays {
    pub pseudo_ci: bool,
    pub contours: bool,
    pub power: bool,
}

const CURVE_POINTS: usize = 50;
const GRID_POINTS: usize = 40;
const CONTOUR_LEVELS: [f64; 3] = [0.10, 0.05, 0.01];

/// Standard error at a y position of the chosen axis.
fn se_at(axis: FunnelAxis, y: f64) -> Option<f64> {
    match axis {
        FunnelAxis::Variance => Some(y.max(0.0).sqrt()),
        FunnelAxis::InverseVariance => (y > 0.0).then(|| 1.0 / y.sqrt()),
        FunnelAxis::StandardError => Some(y.max(0.0)),
        FunnelAxis::Precision => (y > 0.0).then(|| 1.0 / y),
        FunnelAxis::SampleSize => None,
    }
}

fn axis_points(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    if count < 2 || hi <= lo {
        return vec![lo, hi];
    }
    let step = (hi - lo) / (count - 1) as f64;
    (0..count).map(|i| lo + step * i as f64).collect()
}

/// Funnel plot of effects against `axis`, with optional pseudo-confidence
/// curves around the mean, significance contours about zero and a power
/// grid. Overlays need a standard error and are skipped for sample size.
pub fn funnel_plot(
    effect_label: &str,
    effects: &[f64],
    y: &[f64],
    mean: f64,
    axis: FunnelAxis,
    alpha: f64,
    overlays: FunnelOverlays,
) -> ChartData {
    let caption = Caption::Funnel {
        effect_label: effect_label.to_string(),
        axis,
    };
    let mut chart = ChartData::new(effect_label, axis.label(), caption);
    let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    // variance and standard error curves start at the apex
    let curve_start = match axis {
        FunnelAxis::Variance | FunnelAxis::StandardError => 0.0,
        _ => y_min,
    };
    let ys = axis_points(curve_start, y_max, CURVE_POINTS);

    if overlays.contours && axis != FunnelAxis::SampleSize {
        for level in CONTOUR_LEVELS {
            let z = -norm_ppf(level / 2.0);
            let (band_y, upper): (Vec<f64>, Vec<f64>) = ys
                .iter()
                .filter_map(|&yy| se_at(axis, yy).map(|se| (yy, z * se)))
                .unzip();
            let lower = upper.iter().map(|x| -x).collect();
            chart.series.push(Series::Band {
                name: format!("{:.0}% Significance Contour", 100.0 * (1.0 - level)),
                y: band_y,
                lower_x: lower,
                upper_x: upper,
            });
        }
    }

    if overlays.power && axis != FunnelAxis::SampleSize {
        let x_min = effects.iter().copied().fold(f64::INFINITY, f64::min);
        let x_max = effects.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = (x_max - x_min).abs().max(f64::EPSILON);
        let gx = axis_points(x_min - 0.1 * span, x_max + 0.1 * span, GRID_POINTS);
        let gy = axis_points(y_min, y_max, GRID_POINTS);
        let z = -norm_ppf(alpha / 2.0);
        let values = gy
            .iter()
            .map(|&yy| {
                gx.iter()
                    .map(|&xx| match se_at(axis, yy) {
                        Some(se) if se > 0.0 => {
                            let shift = xx / se;
                            norm_cdf(shift - z) + norm_cdf(-shift - z)
                        }
                        _ => f64::NAN,
                    })
                    .collect()
            })
            .collect();
        chart.series.push(Series::Grid {
            name: "Power".to_string(),
            x: gx,
            y: gy,
            values,
        });
    }

    chart.add_scatter("Studies", effects.to_vec(), y.to_vec(), Marker::Circle);
    chart.add_line("Mean", (mean, y_min), (mean, y_max), LineStyle::Dashed);

    if overlays.pseudo_ci && axis != FunnelAxis::SampleSize {
        let z = -norm_ppf(alpha / 2.0);
        let (curve_y, half): (Vec<f64>, Vec<f64>) = ys
            .iter()
            .filter_map(|&yy| se_at(axis, yy).map(|se| (yy, z * se)))
            .unzip();
        chart.add_curve(
            "Lower Pseudo-confidence Limit",
            half.iter().map(|h| mean - h).collect(),
            curve_y.clone(),
            LineStyle::Dotted,
        );
        chart.add_curve(
            "Upper Pseudo-confidence Limit",
            half.iter().map(|h| mean + h).collect(),
            curve_y,
            LineStyle::Dotted,
        );
    }
    chart
}
