//! Rendering capability
//!
//! Charts and the circuit diagram are produced through the [`Renderer`]
//! trait. The pipeline asks [`Renderer::is_available`] once per phase and
//! skips image artifacts when it is false; structured outputs never depend
//! on rendering.

use std::path::Path;

use crate::optimizer::ParameterCircuit;
use crate::{PipelineError, PipelineResult};

/// One named line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

impl ChartSeries {
    pub fn new(label: &str, xs: &[f64], ys: &[f64]) -> Self {
        Self {
            label: label.to_string(),
            points: xs.iter().copied().zip(ys.iter().copied()).collect(),
        }
    }
}

/// One plot area.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<ChartSeries>,
}

impl Panel {
    pub fn new(title: &str, x_label: &str, y_label: &str) -> Self {
        Self {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            series: Vec::new(),
        }
    }

    pub fn with_series(mut self, series: ChartSeries) -> Self {
        self.series.push(series);
        self
    }
}

/// A figure of one or more panels laid out in a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: String,
    pub panels: Vec<Panel>,
}

impl Chart {
    pub fn single(title: &str, panel: Panel) -> Self {
        Self {
            title: title.to_string(),
            panels: vec![panel],
        }
    }

    /// Rows and columns of the panel grid.
    pub fn grid(&self) -> (usize, usize) {
        match self.panels.len() {
            0 | 1 => (1, 1),
            2 => (1, 2),
            n => {
                let cols = 2;
                ((n + cols - 1) / cols, cols)
            }
        }
    }
}

pub trait Renderer {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Write `chart` as a PNG at `path`. The path must not exist yet.
    fn render_chart(&self, chart: &Chart, path: &Path) -> PipelineResult<()>;

    fn render_circuit(&self, circuit: &ParameterCircuit, path: &Path) -> PipelineResult<()>;
}

/// Renderer used when no backend is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn render_chart(&self, chart: &Chart, _path: &Path) -> PipelineResult<()> {
        Err(PipelineError::RenderUnavailable(format!(
            "no renderer for chart {:?}",
            chart.title
        )))
    }

    fn render_circuit(&self, _circuit: &ParameterCircuit, _path: &Path) -> PipelineResult<()> {
        Err(PipelineError::RenderUnavailable(
            "no renderer for circuit diagram".to_string(),
        ))
    }
}

/// Axis ranges covering every point, padded so flat data still has extent.
pub fn bounds(series: &[ChartSeries]) -> ((f64, f64), (f64, f64)) {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);
    for &(px, py) in series.iter().flat_map(|s| s.points.iter()) {
        if px.is_finite() && py.is_finite() {
            x = (x.0.min(px), x.1.max(px));
            y = (y.0.min(py), y.1.max(py));
        }
    }
    let pad = |(lo, hi): (f64, f64)| {
        if !lo.is_finite() || !hi.is_finite() {
            (0.0, 1.0)
        } else if hi - lo < f64::EPSILON * lo.abs().max(1.0) {
            (lo - 0.5, hi + 0.5)
        } else {
            let margin = (hi - lo) * 0.05;
            (lo - margin, hi + margin)
        }
    };
    (pad(x), pad(y))
}

#[cfg(feature = "plot")]
pub use self::bitmap::PlottersRenderer;

#[cfg(feature = "plot")]
mod bitmap {
    use plotters::prelude::*;
    use std::path::Path;

    use super::{bounds, Chart, Renderer};
    use crate::optimizer::{Gate, ParameterCircuit};
    use crate::{PipelineError, PipelineResult};

    const PANEL_SIZE: (u32, u32) = (640, 480);
    const COLORS: [RGBColor; 6] = [BLUE, RED, GREEN, MAGENTA, CYAN, BLACK];

    fn render_err(e: impl std::fmt::Display) -> PipelineError {
        PipelineError::Render(e.to_string())
    }

    /// PNG output through the plotters bitmap backend.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PlottersRenderer;

    impl Renderer for PlottersRenderer {
        fn name(&self) -> &'static str {
            "plotters"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn render_chart(&self, chart: &Chart, path: &Path) -> PipelineResult<()> {
            let (rows, cols) = chart.grid();
            let size = (PANEL_SIZE.0 * cols as u32, PANEL_SIZE.1 * rows as u32);
            let root = BitMapBackend::new(path, size).into_drawing_area();
            root.fill(&WHITE).map_err(render_err)?;
            let root = root
                .titled(&chart.title, ("sans-serif", 24.0))
                .map_err(render_err)?;

            for (area, panel) in root.split_evenly((rows, cols)).iter().zip(&chart.panels) {
                let ((x0, x1), (y0, y1)) = bounds(&panel.series);
                let mut ctx = ChartBuilder::on(area)
                    .margin(10)
                    .caption(&panel.title, ("sans-serif", 18.0))
                    .set_label_area_size(LabelAreaPosition::Left, 60)
                    .set_label_area_size(LabelAreaPosition::Bottom, 40)
                    .build_cartesian_2d(x0..x1, y0..y1)
                    .map_err(render_err)?;
                ctx.configure_mesh()
                    .x_desc(panel.x_label.as_str())
                    .y_desc(panel.y_label.as_str())
                    .draw()
                    .map_err(render_err)?;
                for (i, series) in panel.series.iter().enumerate() {
                    let color = COLORS[i % COLORS.len()];
                    let points = series
                        .points
                        .iter()
                        .copied()
                        .filter(|p| p.0.is_finite() && p.1.is_finite());
                    ctx.draw_series(LineSeries::new(points, color.stroke_width(2)))
                    .map_err(render_err)?;
                }
            }
            root.present().map_err(render_err)?;
            Ok(())
        }

        fn render_circuit(&self, circuit: &ParameterCircuit, path: &Path) -> PipelineResult<()> {
            let n = circuit.num_qubits;
            let layers = circuit.layers();
            let depth = circuit.depth();
            let width = 120 + 60 * (depth as u32 + 2);
            let height = 80 + 60 * n as u32;

            let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
            root.fill(&WHITE).map_err(render_err)?;
            let mut ctx = ChartBuilder::on(&root)
                .margin(20)
                .caption("AEM parameter optimization circuit", ("sans-serif", 18.0))
                .build_cartesian_2d(-0.5f64..(depth as f64 + 1.5), -1.0f64..n as f64)
                .map_err(render_err)?;

            // Qubit 0 on top
            let wire_y = |q: usize| (n - 1 - q) as f64;
            for q in 0..n {
                ctx.draw_series(LineSeries::new(
                    vec![(0.0, wire_y(q)), (depth as f64 + 1.0, wire_y(q))],
                    BLACK.stroke_width(1),
                ))
                .map_err(render_err)?;
            }

            let mut last_layer = 0usize;
            for (gate, &layer) in circuit.gates.iter().zip(&layers) {
                let x = layer as f64;
                match *gate {
                    Gate::Barrier => {
                        let bx = last_layer as f64 + 0.5;
                        ctx.draw_series(LineSeries::new(
                            vec![(bx, -0.5), (bx, n as f64 - 0.5)],
                            RGBColor(150, 150, 150).stroke_width(2),
                        ))
                        .map_err(render_err)?;
                    }
                    Gate::Cx { control, target } => {
                        ctx.draw_series(LineSeries::new(
                            vec![(x, wire_y(control)), (x, wire_y(target))],
                            BLUE.stroke_width(2),
                        ))
                        .map_err(render_err)?;
                        ctx.draw_series([
                            Circle::new((x, wire_y(control)), 5, BLUE.filled()),
                            Circle::new((x, wire_y(target)), 10, BLUE.stroke_width(2)),
                        ])
                        .map_err(render_err)?;
                    }
                    Gate::H(q) | Gate::Ry { qubit: q, .. } | Gate::Measure(q) => {
                        let y = wire_y(q);
                        let fill = match gate {
                            Gate::Measure(_) => RGBColor(220, 220, 220),
                            _ => RGBColor(200, 220, 255),
                        };
                        ctx.draw_series(std::iter::once(Rectangle::new(
                            [(x - 0.3, y - 0.3), (x + 0.3, y + 0.3)],
                            fill.filled(),
                        )))
                        .map_err(render_err)?;
                        ctx.draw_series(std::iter::once(Text::new(
                            gate.label(),
                            (x - 0.2, y + 0.1),
                            ("sans-serif", 12.0).into_font(),
                        )))
                        .map_err(render_err)?;
                    }
                }
                last_layer = last_layer.max(layer);
            }
            root.present().map_err(render_err)?;
            Ok(())
        }
    }
}

/// Best renderer compiled into this build.
pub fn default_renderer() -> Box<dyn Renderer> {
    #[cfg(feature = "plot")]
    {
        Box::new(PlottersRenderer)
    }
    #[cfg(not(feature = "plot"))]
    {
        Box::new(NullRenderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_renderer_reports_unavailable() {
        let renderer = NullRenderer;
        assert!(!renderer.is_available());
        let chart = Chart::single("t", Panel::new("p", "x", "y"));
        let err = renderer.render_chart(&chart, Path::new("/nonexistent.png")).unwrap_err();
        assert_eq!(err.kind(), "render_unavailable");
    }

    #[test]
    fn test_bounds_pad_flat_data() {
        let flat = ChartSeries::new("c", &[0.0, 1.0], &[5.0, 5.0]);
        let ((x0, x1), (y0, y1)) = bounds(&[flat]);
        assert!(x0 < 0.0 && x1 > 1.0);
        assert!(y0 < 5.0 && y1 > 5.0);
        assert_eq!(bounds(&[]), ((0.0, 1.0), (0.0, 1.0)));
    }

    #[test]
    fn test_grid() {
        let panel = Panel::new("p", "x", "y");
        let chart = Chart {
            title: "four".to_string(),
            panels: vec![panel.clone(), panel.clone(), panel.clone(), panel],
        };
        assert_eq!(chart.grid(), (2, 2));
    }

    #[cfg(feature = "plot")]
    #[test]
    fn test_plotters_writes_png() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("chart.png");
        let chart = Chart::single(
            "line",
            Panel::new("p", "x", "y")
                .with_series(ChartSeries::new("s", &[0.0, 1.0, 2.0], &[1.0, 3.0, 2.0])),
        );
        PlottersRenderer.render_chart(&chart, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
