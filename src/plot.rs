use anyhow::{anyhow, Result};
use colorgrad::{preset::viridis, Gradient};
use plotters::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::cluster_log::ClusterMembers;
use crate::transitions::ClusterTrajectory;

const PLOT_WIDTH: u32 = 1280;
const PLOT_HEIGHT: u32 = 960;
const BAR_WIDTH: f64 = 0.35;
/// Above this many frames the time axis is drawn in ns instead of ps.
const NS_THRESHOLD: usize = 1000;

pub const DISTRIBUTION_PNG: &str = "cluster_distribution.png";
pub const TRAJECTORY_PNG: &str = "cluster_traj.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotType {
    /// Number of configurations in each cluster.
    Bar,
    /// Cluster index of each configuration over time.
    Xy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPlotType(String);

impl fmt::Display for InvalidPlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid plot type: {}. The plot type must be either \"bar\" or \"xy\"",
            self.0
        )
    }
}

impl std::error::Error for InvalidPlotType {}

impl FromStr for PlotType {
    type Err = InvalidPlotType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(Self::Bar),
            "xy" => Ok(Self::Xy),
            _ => Err(InvalidPlotType(s.to_string())),
        }
    }
}

impl PlotType {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Bar => DISTRIBUTION_PNG,
            Self::Xy => TRAJECTORY_PNG,
        }
    }
}

fn filled_style<C: Into<RGBAColor>>(color: C) -> ShapeStyle {
    ShapeStyle {
        color: color.into(),
        filled: true,
        stroke_width: 0,
    }
}

fn cluster_color<T: Gradient>(gradient: &T, cluster_i: usize, n_clusters: usize) -> RGBColor {
    let scaled = if n_clusters > 1 {
        cluster_i.saturating_sub(1) as f32 / (n_clusters - 1) as f32
    } else {
        0.5
    };
    let rgba = gradient.at(scaled).to_rgba8();
    RGBColor(rgba[0], rgba[1], rgba[2])
}

/// Draws the chart selected by `plot_type` into `output_dir` and returns the image path.
pub fn plot_clusters(
    plot_type: PlotType,
    members: &ClusterMembers,
    trajectory: &ClusterTrajectory,
    output_dir: &Path,
) -> Result<PathBuf> {
    let path = output_dir.join(plot_type.file_name());
    match plot_type {
        PlotType::Bar => plot_cluster_distribution(members, &path)?,
        PlotType::Xy => plot_cluster_trajectory(trajectory, &path)?,
    }
    Ok(path)
}

pub fn plot_cluster_distribution(members: &ClusterMembers, path: &Path) -> Result<()> {
    let n_clusters = members
        .max_index()
        .ok_or(anyhow!("No clusters to plot"))?;
    let max_count = members.counts().values().copied().max().unwrap_or_default().max(1);

    let drawing_area = BitMapBackend::new(path, (PLOT_WIDTH, PLOT_HEIGHT)).into_drawing_area();
    drawing_area.fill(&WHITE)?;
    let mut chart_context = ChartBuilder::on(&drawing_area)
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.5..n_clusters as f64 + 0.5, 0.0..max_count as f64 * 1.05)?;
    chart_context
        .configure_mesh()
        .x_labels(n_clusters)
        .x_label_formatter(&|x| format!("{x:.0}"))
        .y_label_formatter(&|y| format!("{y:.0}"))
        .x_desc("Cluster index")
        .y_desc("Number of configurations")
        .set_all_tick_mark_size(5)
        .axis_style(BLACK)
        .label_style(("sans-serif", 20).into_font().color(&BLACK))
        .draw()?;

    let gradient = viridis();
    chart_context.draw_series(members.iter().map(|(i, frames)| {
        let x = i as f64;
        Rectangle::new(
            [(x - BAR_WIDTH / 2.0, 0.0), (x + BAR_WIDTH / 2.0, frames.len() as f64)],
            filled_style(cluster_color(&gradient, i, n_clusters)),
        )
    }))?;
    drawing_area.present()?;
    Ok(())
}

pub fn plot_cluster_trajectory(trajectory: &ClusterTrajectory, path: &Path) -> Result<()> {
    if trajectory.is_empty() {
        return Err(anyhow!("No configurations to plot"));
    }
    let (scale, units) = if trajectory.len() > NS_THRESHOLD {
        (1000.0, "ns")
    } else {
        (1.0, "ps")
    };
    let points = trajectory
        .times()
        .iter()
        .zip(trajectory.clusters())
        .map(|(&t, &cluster_i)| (t as f64 / scale, cluster_i as f64))
        .collect::<Vec<_>>();
    let t_min = points.first().map_or(0.0, |p| p.0);
    let t_max = points.last().map_or(0.0, |p| p.0).max(t_min + 1.0 / scale);
    let n_clusters = trajectory.clusters().iter().copied().max().unwrap_or(1);

    let drawing_area = BitMapBackend::new(path, (PLOT_WIDTH, PLOT_HEIGHT)).into_drawing_area();
    drawing_area.fill(&WHITE)?;
    let mut chart_context = ChartBuilder::on(&drawing_area)
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(t_min..t_max, 0.5..n_clusters as f64 + 0.5)?;
    chart_context
        .configure_mesh()
        .y_labels(n_clusters)
        .y_label_formatter(&|y| format!("{y:.0}"))
        .x_desc(format!("Time frame ({units})"))
        .y_desc("Cluster index")
        .set_all_tick_mark_size(5)
        .axis_style(BLACK)
        .label_style(("sans-serif", 20).into_font().color(&BLACK))
        .draw()?;
    chart_context.draw_series(LineSeries::new(points, &BLUE))?;
    drawing_area.present()?;
    Ok(())
}
