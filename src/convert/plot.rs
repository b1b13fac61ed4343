//! Preview plot of the primary signals against elapsed time.
//!
//! The plot is a plain SVG with two stacked panels: voltage and current against elapsed time.
//! It exists so a person can recognize a dataset at a glance; it is never required.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::{HarvestError, HarvestResult};
use crate::types::{DataSet, Schema};

pub const TIME_COLUMN: &str = "ElapsedTime_s";
pub const VOLTAGE_COLUMN: &str = "Voltage_V";
pub const CURRENT_COLUMN: &str = "Current_A";

const WIDTH: f64 = 1200.0;
const PANEL_HEIGHT: f64 = 300.0;
const MARGIN: f64 = 60.0;
const MAX_POINTS: usize = 4000;

/// Points gathered across partitions for the two panels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotSeries {
    pub voltage: Vec<(f64, f64)>,
    pub current: Vec<(f64, f64)>,
}

impl PlotSeries {
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty() && self.current.is_empty()
    }
}

/// Accumulates [`PlotSeries`] from converted batches.
///
/// Memory stays bounded: each series keeps every `stride`-th point, and the stride doubles
/// whenever a series reaches twice [`MAX_POINTS`].
#[derive(Debug, Clone)]
pub struct PlotCollector {
    time: usize,
    voltage: usize,
    current: usize,
    voltage_points: Thinned,
    current_points: Thinned,
}

#[derive(Debug, Clone, Default)]
struct Thinned {
    points: Vec<(f64, f64)>,
    stride: usize,
    seen: usize,
}

impl Thinned {
    fn push(&mut self, point: (f64, f64)) {
        let stride = self.stride.max(1);
        if self.seen % stride == 0 {
            self.points.push(point);
            if self.points.len() >= 2 * MAX_POINTS {
                let mut i = 0;
                self.points.retain(|_| {
                    i += 1;
                    i % 2 == 1
                });
                self.stride = stride * 2;
            }
        }
        self.seen += 1;
    }
}

impl PlotCollector {
    /// `None` unless the schema has the time, voltage and current columns.
    pub fn for_schema(schema: &Schema) -> Option<Self> {
        Some(Self {
            time: schema.index_of(TIME_COLUMN)?,
            voltage: schema.index_of(VOLTAGE_COLUMN)?,
            current: schema.index_of(CURRENT_COLUMN)?,
            voltage_points: Thinned::default(),
            current_points: Thinned::default(),
        })
    }

    pub fn observe(&mut self, batch: &DataSet) {
        for row in &batch.rows {
            let Some(t) = row.get(self.time).and_then(|v| v.as_f64()) else {
                continue;
            };
            if let Some(v) = row.get(self.voltage).and_then(|v| v.as_f64()) {
                self.voltage_points.push((t, v));
            }
            if let Some(i) = row.get(self.current).and_then(|v| v.as_f64()) {
                self.current_points.push((t, i));
            }
        }
    }

    pub fn finish(self) -> PlotSeries {
        PlotSeries {
            voltage: self.voltage_points.points,
            current: self.current_points.points,
        }
    }
}

/// Render `series` as an SVG file at `path`.
pub fn render_svg(series: &PlotSeries, path: &Path) -> HarvestResult<()> {
    if series.is_empty() {
        return Err(HarvestError::Plot {
            message: "no points to plot".to_string(),
        });
    }
    let height = PANEL_HEIGHT * 2.0;
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{height}" viewBox="0 0 {WIDTH} {height}">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    panel(&mut svg, &series.voltage, 0.0, VOLTAGE_COLUMN, "lightblue");
    panel(&mut svg, &series.current, PANEL_HEIGHT, CURRENT_COLUMN, "darkblue");
    svg.push_str("</svg>\n");

    std::fs::write(path, svg).map_err(|e| HarvestError::Plot {
        message: format!("cannot write {}: {e}", path.display()),
    })
}

fn panel(svg: &mut String, points: &[(f64, f64)], top: f64, label: &str, colour: &str) {
    let left = MARGIN;
    let right = WIDTH - MARGIN / 2.0;
    let upper = top + MARGIN / 2.0;
    let lower = top + PANEL_HEIGHT - MARGIN;

    let _ = writeln!(
        svg,
        r#"<rect x="{left}" y="{upper}" width="{}" height="{}" fill="none" stroke="black"/>"#,
        right - left,
        lower - upper
    );
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" font-family="sans-serif" font-size="14" text-anchor="middle">{label} vs {TIME_COLUMN}</text>"#,
        (left + right) / 2.0,
        upper - 8.0
    );
    let Some(((t_min, t_max), (y_min, y_max))) = bounds(points) else {
        return;
    };
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" font-family="sans-serif" font-size="11" text-anchor="end">{y_max:.3}</text>"#,
        left - 4.0,
        upper + 10.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{lower}" font-family="sans-serif" font-size="11" text-anchor="end">{y_min:.3}</text>"#,
        left - 4.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="{left}" y="{}" font-family="sans-serif" font-size="11">{t_min:.1}</text>"#,
        lower + 14.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="{right}" y="{}" font-family="sans-serif" font-size="11" text-anchor="end">{t_max:.1}</text>"#,
        lower + 14.0
    );

    let sx = (right - left) / span(t_min, t_max);
    let sy = (lower - upper) / span(y_min, y_max);
    let stride = points.len().div_ceil(MAX_POINTS).max(1);
    svg.push_str(&format!(r#"<polyline fill="none" stroke="{colour}" stroke-width="1" points=""#));
    for (t, y) in points.iter().step_by(stride) {
        let _ = write!(svg, "{:.1},{:.1} ", left + (t - t_min) * sx, lower - (y - y_min) * sy);
    }
    svg.push_str("\"/>\n");
}

fn bounds(points: &[(f64, f64)]) -> Option<((f64, f64), (f64, f64))> {
    let finite = points
        .iter()
        .filter(|(t, y)| t.is_finite() && y.is_finite());
    let mut out: Option<((f64, f64), (f64, f64))> = None;
    for &(t, y) in finite {
        out = Some(match out {
            None => ((t, t), (y, y)),
            Some(((t0, t1), (y0, y1))) => ((t0.min(t), t1.max(t)), (y0.min(y), y1.max(y))),
        });
    }
    out
}

fn span(min: f64, max: f64) -> f64 {
    if max > min { max - min } else { 1.0 }
}
