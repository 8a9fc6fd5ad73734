//! SVG rendering of diagnostic views with `plotters`.
//!
//! Panels are laid out on an even grid (two columns when there is more than
//! one panel). Log-scaled x axes are drawn as `log10(x)` on a linear axis with
//! tick labels converted back to the original units.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::debug;

use crate::review::view::{DiagnosticView, Marker, Panel, Series, SeriesStyle, ViewContent, ViewKind};

const PALETTE: [RGBColor; 5] = [
    RGBColor(0x1f, 0x77, 0xb4),
    RGBColor(0xff, 0x7f, 0x0e),
    RGBColor(0x2c, 0xa0, 0x2c),
    RGBColor(0x94, 0x67, 0xbd),
    RGBColor(0x8c, 0x56, 0x4b),
];
const VERTICAL_MARKER: RGBColor = RGBColor(0xd6, 0x27, 0x28);
const HORIZONTAL_MARKER: RGBColor = RGBColor(0x7f, 0x7f, 0x7f);

/// File-name-safe form of a star name.
pub fn file_stem(star: &str) -> String {
    star.trim()
        .chars()
        .map(|c| if c.is_whitespace() || matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

/// Writes views as SVG files under `<out_dir>/<view>_plots/<star>_<view>.svg`.
#[derive(Debug, Clone)]
pub struct SvgRenderer {
    out_dir: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl SvgRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            width: 1400,
            height: 1000,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Where the image of `kind` for `star` is written.
    pub fn image_path(&self, kind: ViewKind, star: &str) -> PathBuf {
        self.tagged_image_path(kind, star, None)
    }

    /// Like [`image_path`](Self::image_path), with `_<tag>` appended to the
    /// file stem when a tag is given.
    pub fn tagged_image_path(&self, kind: ViewKind, star: &str, tag: Option<&str>) -> PathBuf {
        let stem = match tag {
            Some(tag) => format!("{}_{}_{}", file_stem(star), kind.name(), tag),
            None => format!("{}_{}", file_stem(star), kind.name()),
        };
        self.out_dir
            .join(format!("{}_plots", kind.name()))
            .join(format!("{}.svg", stem))
    }

    /// Render `view` and return the image path. Image-backed views are
    /// already on disk and are returned as is.
    pub fn render(&self, view: &DiagnosticView) -> Result<PathBuf> {
        self.render_tagged(view, None)
    }

    /// Render `view` to [`tagged_image_path`](Self::tagged_image_path).
    pub fn render_tagged(&self, view: &DiagnosticView, tag: Option<&str>) -> Result<PathBuf> {
        let panels = match &view.content {
            ViewContent::Image(path) => return Ok(path.clone()),
            ViewContent::Panels(panels) => panels,
        };
        let path = self.tagged_image_path(view.kind, &view.star.name, tag);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        self.render_panels(&path, view, panels)
            .with_context(|| format!("cannot render {}", path.display()))?;
        debug!("Rendered {}", path.display());
        Ok(path)
    }

    fn render_panels(&self, path: &Path, view: &DiagnosticView, panels: &[Panel]) -> Result<()> {
        let root = SVGBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;
        let title = format!(
            "{} (i = {:.2}) | {}",
            view.star.name, view.star.i_magnitude, view.headline
        );
        let body = root.titled(&title, ("sans-serif", 22))?;

        let cols = if panels.len() > 1 { 2 } else { 1 };
        let rows = panels.len().div_ceil(cols).max(1);
        let areas = body.split_evenly((rows, cols));
        for (panel, area) in panels.iter().zip(areas.iter()) {
            draw_panel(area, panel)?;
        }
        root.present()?;
        Ok(())
    }
}

fn finite_points(series: &Series, log_x: bool) -> Vec<(f64, f64, f64)> {
    let err = match &series.style {
        SeriesStyle::ErrorBars { err } => Some(err),
        _ => None,
    };
    series
        .x
        .iter()
        .zip(&series.y)
        .enumerate()
        .filter_map(|(i, (&x, &y))| {
            let x = if log_x { if x > 0.0 { x.log10() } else { f64::NAN } } else { x };
            let e = err.and_then(|e| e.get(i)).copied().unwrap_or(0.0);
            (x.is_finite() && y.is_finite()).then_some((x, y, if e.is_finite() { e } else { 0.0 }))
        })
        .collect()
}

fn padded(lo: f64, hi: f64) -> (f64, f64) {
    if !(lo.is_finite() && hi.is_finite()) {
        return (0.0, 1.0);
    }
    if hi - lo <= f64::EPSILON * lo.abs().max(1.0) {
        let d = 0.1 * lo.abs().max(1e-6);
        return (lo - d, hi + d);
    }
    let pad = 0.05 * (hi - lo);
    (lo - pad, hi + pad)
}

fn draw_panel(area: &DrawingArea<SVGBackend<'_>, Shift>, panel: &Panel) -> Result<()> {
    let data: Vec<Vec<(f64, f64, f64)>> =
        panel.series.iter().map(|s| finite_points(s, panel.log_x)).collect();
    let to_x = |x: f64| if panel.log_x { x.log10() } else { x };

    let (x0, x1) = match panel.x_range {
        Some((a, b)) => (to_x(a), to_x(b)),
        None => data
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.0), hi.max(p.0))),
    };
    let (mut y0, mut y1) = data
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.1 - p.2), hi.max(p.1 + p.2))
        });
    for m in &panel.markers {
        if let Marker::Horizontal { y, .. } = m {
            y0 = y0.min(*y);
            y1 = y1.max(*y);
        }
    }
    let (x0, x1) = padded(x0, x1);
    let (y0, y1) = padded(y0, y1);

    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, ("sans-serif", 18))
        .margin(8)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x0..x1, y0..y1)?;

    let log_fmt = |v: &f64| format!("{:.3}", 10f64.powf(*v));
    let lin_fmt = |v: &f64| format!("{:.3}", v);
    let x_fmt: &dyn Fn(&f64) -> String = if panel.log_x { &log_fmt } else { &lin_fmt };
    let y_fmt = |v: &f64| format!("{:.2e}", v);

    chart
        .configure_mesh()
        .x_desc(panel.x_label.as_str())
        .y_desc(panel.y_label.as_str())
        .x_label_formatter(x_fmt)
        .y_label_formatter(&y_fmt)
        .light_line_style(WHITE)
        .draw()?;

    let mut labelled = false;
    for (i, (series, points)) in panel.series.iter().zip(&data).enumerate() {
        if points.is_empty() {
            continue;
        }
        let color = PALETTE[i % PALETTE.len()];
        let anno = match &series.style {
            SeriesStyle::Line => chart.draw_series(LineSeries::new(
                points.iter().map(|p| (p.0, p.1)),
                color.stroke_width(2),
            ))?,
            SeriesStyle::Points => {
                chart.draw_series(points.iter().map(|p| Circle::new((p.0, p.1), 2, color.filled())))?
            }
            SeriesStyle::ErrorBars { .. } => chart.draw_series(points.iter().map(|p| {
                ErrorBar::new_vertical(p.0, p.1 - p.2, p.1, p.1 + p.2, color.filled(), 4)
            }))?,
        };
        anno.label(series.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        labelled = true;
    }

    for m in &panel.markers {
        match m {
            Marker::Vertical { x, label } => {
                let x = to_x(*x);
                if !x.is_finite() {
                    continue;
                }
                let anno = chart.draw_series(std::iter::once(PathElement::new(
                    vec![(x, y0), (x, y1)],
                    VERTICAL_MARKER.stroke_width(1),
                )))?;
                if let Some(label) = label {
                    anno.label(label.as_str()).legend(|(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], VERTICAL_MARKER.stroke_width(1))
                    });
                    labelled = true;
                }
            }
            Marker::Horizontal { y, label } => {
                let anno = chart.draw_series(std::iter::once(PathElement::new(
                    vec![(x0, *y), (x1, *y)],
                    HORIZONTAL_MARKER.stroke_width(1),
                )))?;
                if let Some(label) = label {
                    anno.label(label.as_str()).legend(|(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], HORIZONTAL_MARKER.stroke_width(1))
                    });
                    labelled = true;
                }
            }
        }
    }

    if labelled {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", 12))
            .draw()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::view::StarHeader;

    fn view(kind: ViewKind) -> DiagnosticView {
        let x: Vec<f64> = (1..200).map(|i| i as f64 * 0.05).collect();
        let y: Vec<f64> = x.iter().map(|v| (v * 3.0).sin() * 0.01).collect();
        DiagnosticView {
            kind,
            star: StarHeader { name: "TIC 9 / test".into(), i_magnitude: 15.0 },
            headline: "Press 'y' if there are eclipses, 'n' if not".into(),
            notes: vec![],
            content: ViewContent::Panels(vec![
                Panel {
                    title: "Periodogram".into(),
                    log_x: true,
                    series: vec![Series::line("power", x.clone(), y.iter().map(|v| v.abs()).collect())],
                    markers: vec![
                        Marker::Vertical { x: 1.5, label: Some("1.5 d".into()) },
                        Marker::Horizontal { y: 0.005, label: Some("5σ".into()) },
                    ],
                    ..Default::default()
                },
                Panel {
                    title: "Folded".into(),
                    series: vec![
                        Series::error_bars("binned", x.clone(), y.clone(), vec![0.001; x.len()]),
                        Series::points("raw", x, y),
                    ],
                    ..Default::default()
                },
            ]),
        }
    }

    #[test]
    fn test_writes_svg_at_keyed_path() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = SvgRenderer::new(dir.path());
        let path = renderer.render(&view(ViewKind::Eclipsing)).unwrap();
        assert_eq!(
            path,
            dir.path().join("eclipsing_plots").join("TIC_9___test_eclipsing.svg")
        );
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg") || svg.contains("<svg"), "not an svg document");
    }

    #[test]
    fn test_image_view_passes_through() {
        let renderer = SvgRenderer::new("/nonexistent");
        let mut v = view(ViewKind::Flares);
        v.content = ViewContent::Image(PathBuf::from("flares_plots/a_flares.svg"));
        assert_eq!(renderer.render(&v).unwrap(), PathBuf::from("flares_plots/a_flares.svg"));
    }

    #[test]
    fn test_tagged_path() {
        let renderer = SvgRenderer::new("out");
        assert_eq!(
            renderer.tagged_image_path(ViewKind::Period, "TIC 5", Some("c3")),
            PathBuf::from("out/period_plots/TIC_5_period_c3.svg")
        );
        assert_eq!(
            renderer.tagged_image_path(ViewKind::Period, "TIC 5", None),
            renderer.image_path(ViewKind::Period, "TIC 5")
        );
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(" TIC 123 "), "TIC_123");
    }
}
