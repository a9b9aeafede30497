mod cluster_log;
mod gmx;
mod ndx;
mod pipeline;
mod plot;
mod transitions;
mod xvg;

pub use cluster_log::{ClusterInfo, ClusterMembers, LogParsingError};
pub use gmx::{Gmx, GmxCommand, GmxOutput};
pub use ndx::IndexFile;
pub use pipeline::{
    ClusterGroups, ClusterInputs, ClusterOptions, ClusteringPipeline, ClusteringReport,
    ConfigError, FailedStep, OutputFiles,
};
pub use plot::{plot_clusters, InvalidPlotType, PlotType};
pub use transitions::{
    analyze_transitions, count_transitions, ClusterTrajectory, TransitionAnalysis,
    TransitionMatrix,
};
pub use xvg::{Xvg, XvgParsingError};
