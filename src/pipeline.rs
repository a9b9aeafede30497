use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cluster_log::{ClusterInfo, ClusterMembers};
use crate::gmx::{Gmx, GmxCommand};
use crate::ndx::IndexFile;
use crate::transitions::{analyze_transitions, count_transitions};
use crate::xvg::Xvg;

/// State index of the fully coupled configurations in the XVG time series.
pub const COUPLED_STATE: f64 = 0.0;
const DEFAULT_INDEX: &str = "index.ndx";

#[derive(Debug)]
pub enum ConfigError {
    MissingGroup(String),
    MissingXvg,
    MissingStateColumn(PathBuf),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGroup(group) => write!(
                f,
                "The group {group} is not present in the provided/generated index file."
            ),
            Self::MissingXvg => write!(
                f,
                "The parameter \"coupled_only\" is set to true but no XVG file is provided."
            ),
            Self::MissingStateColumn(path) => write!(
                f,
                "{} has no state index column",
                path.to_string_lossy()
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct ClusterInputs {
    /// Trajectory (XTC or TRR)
    pub traj: PathBuf,
    /// Configuration (TPR or GRO)
    pub config: PathBuf,
    /// Time series of the state index, e.g. `dhdl.xvg`
    pub xvg: Option<PathBuf>,
    /// Index file, generated with `gmx make_ndx` when missing
    pub index: Option<PathBuf>,
}

/// Index groups answering the selection prompts of `gmx`.
#[derive(Debug, Clone)]
pub struct ClusterGroups {
    pub center: String,
    pub rmsd: String,
    pub output: String,
}

impl ClusterGroups {
    pub fn names(&self) -> [&str; 3] {
        [&self.center, &self.rmsd, &self.output]
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub coupled_only: bool,
    pub method: String,
    /// RMSD cutoff (nm)
    pub cutoff: f64,
    pub suffix: Option<String>,
    pub work_dir: PathBuf,
    pub abort_on_failure: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            coupled_only: true,
            method: "linkage".to_string(),
            cutoff: 0.1,
            suffix: None,
            work_dir: PathBuf::from("."),
            abort_on_failure: false,
        }
    }
}

fn with_suffix(name: &str, suffix: Option<&str>) -> String {
    match (suffix, name.split_once('.')) {
        (Some(suffix), Some((stem, ext))) => format!("{stem}_{suffix}.{ext}"),
        (Some(suffix), None) => format!("{name}_{suffix}"),
        (None, _) => name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFiles {
    pub nojump: PathBuf,
    pub center: PathBuf,
    pub rmsd_clust: PathBuf,
    pub rmsd_dist: PathBuf,
    pub cluster_log: PathBuf,
    pub cluster_pdb: PathBuf,
    /// Inter-medoid RMSD
    pub rmsd: PathBuf,
}

impl OutputFiles {
    pub fn new(dir: &Path, suffix: Option<&str>) -> Self {
        let path = |name: &str| dir.join(with_suffix(name, suffix));
        Self {
            nojump: path("nojump.xtc"),
            center: path("center.xtc"),
            rmsd_clust: path("rmsd-clust.xpm"),
            rmsd_dist: path("rmsd-dist.xvg"),
            cluster_log: path("cluster.log"),
            cluster_pdb: path("clusters.pdb"),
            rmsd: path("rmsd.xvg"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedStep {
    pub step: &'static str,
    pub code: Option<i32>,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct ClusteringReport {
    pub outputs: OutputFiles,
    pub index: PathBuf,
    /// Fully coupled frames, counted only with `coupled_only`
    pub n_coupled: Option<usize>,
    /// `None` when no fully coupled frame was found
    pub info: Option<ClusterInfo>,
    pub sizes: BTreeMap<usize, f64>,
    /// Number and timeframes of transitions, for exactly two clusters
    pub transitions: Option<(usize, Vec<u64>)>,
    pub inter_medoid_rmsd: Option<f64>,
    pub failed_steps: Vec<FailedStep>,
}

impl ClusteringReport {
    fn new(outputs: OutputFiles, index: PathBuf) -> Self {
        Self {
            outputs,
            index,
            n_coupled: None,
            info: None,
            sizes: BTreeMap::new(),
            transitions: None,
            inter_medoid_rmsd: None,
            failed_steps: Vec::new(),
        }
    }
}

pub struct ClusteringPipeline {
    gmx: Gmx,
    inputs: ClusterInputs,
    groups: ClusterGroups,
    options: ClusterOptions,
}

impl ClusteringPipeline {
    pub fn new(gmx: Gmx, inputs: ClusterInputs, groups: ClusterGroups, options: ClusterOptions) -> Self {
        Self {
            gmx,
            inputs,
            groups,
            options,
        }
    }

    pub fn outputs(&self) -> OutputFiles {
        OutputFiles::new(&self.options.work_dir, self.options.suffix.as_deref())
    }

    pub fn run(&self) -> Result<ClusteringReport> {
        let mut failed_steps = Vec::new();
        let index = match &self.inputs.index {
            Some(index) => index.clone(),
            None => self.make_index(&mut failed_steps)?,
        };
        let ndx = IndexFile::read(&index)?;
        if let Some(group) = ndx.find_missing(self.groups.names()) {
            return Err(ConfigError::MissingGroup(group.to_string()).into());
        }

        let mut report = ClusteringReport::new(self.outputs(), index);
        report.failed_steps = failed_steps;

        let n_coupled = if self.options.coupled_only {
            let xvg = self.inputs.xvg.as_ref().ok_or(ConfigError::MissingXvg)?;
            let states = Xvg::read(xvg)?
                .column(1)
                .ok_or_else(|| ConfigError::MissingStateColumn(xvg.clone()))?;
            let n_coupled = states.iter().filter(|&&s| s == COUPLED_STATE).count();
            if n_coupled == 0 {
                report.n_coupled = Some(0);
                warn!("Terminating clustering analysis since no fully coupled state is present in the input trajectory while coupled_only is set to true.");
                return Ok(report);
            }
            Some(n_coupled)
        } else {
            None
        };

        info!("Eliminating jumps across periodic boundaries for the input trajectory ...");
        self.execute("trjconv -pbc nojump", self.nojump_command(&report), &mut report)?;

        info!("Centering the system ...");
        self.execute("trjconv -pbc mol", self.center_command(&report), &mut report)?;

        if let Some(n_coupled) = n_coupled {
            info!("Number of fully coupled configurations: {n_coupled}");
            report.n_coupled = Some(n_coupled);
        }

        info!("Performing clustering analysis ...");
        self.execute("cluster", self.cluster_command(&report), &mut report)?;

        let cluster_info = ClusterInfo::read(&report.outputs.cluster_log)?;
        info!(
            "Range of RMSD values: from {:.3} to {:.3} nm",
            cluster_info.rmsd_range[0], cluster_info.rmsd_range[1]
        );
        info!("Average RMSD: {:.3} nm", cluster_info.rmsd_avg);
        info!("Number of clusters: {}", cluster_info.n_clusters);
        report.info = Some(cluster_info);

        if cluster_info.n_clusters > 1 {
            let members = ClusterMembers::read(&report.outputs.cluster_log)?;
            report.sizes = members.sizes();
            for (i, size) in &report.sizes {
                info!("  - Cluster {i} accounts for {:.2}% of the total configurations.", size * 100.0);
            }

            if cluster_info.n_clusters == 2 {
                let analysis = analyze_transitions(&members, false)?;
                let n_transitions = analysis.matrix.off_diagonal_sum() as usize;
                let (_, t_transitions) = count_transitions(&members, 1, 2);
                info!("Number of transitions between the two clusters: {n_transitions}");
                info!("Time frames of the transitions (ps): {t_transitions:?}");
                report.transitions = Some((n_transitions, t_transitions));
            }

            info!("Calculating the inter-medoid RMSD between the two biggest clusters ...");
            self.execute("rms", self.rms_command(&report), &mut report)?;
            let rmsd = Xvg::read(&report.outputs.rmsd)?
                .value(1, 1)
                .ok_or(anyhow!(
                    "No inter-medoid RMSD in {}",
                    report.outputs.rmsd.to_string_lossy()
                ))?;
            info!("Inter-medoid RMSD between the two biggest clusters: {rmsd:.3} nm");
            report.inter_medoid_rmsd = Some(rmsd);
        }
        Ok(report)
    }

    fn make_index(&self, failed_steps: &mut Vec<FailedStep>) -> Result<PathBuf> {
        info!("Running gmx make_ndx to generate an index file ...");
        let index = self.options.work_dir.join(DEFAULT_INDEX);
        let command = self
            .gmx
            .command("make_ndx")
            .flag("-f", &self.inputs.config)
            .flag("-o", &index)
            .prompt(["q"]);
        let output = command.run()?;
        if !output.success() {
            self.on_failure("make_ndx", output.code(), output.stderr, failed_steps)?;
        }
        Ok(index)
    }

    fn execute(&self, step: &'static str, command: GmxCommand, report: &mut ClusteringReport) -> Result<()> {
        let output = command.run()?;
        if !output.success() {
            self.on_failure(step, output.code(), output.stderr, &mut report.failed_steps)?;
        }
        Ok(())
    }

    fn on_failure(
        &self,
        step: &'static str,
        code: Option<i32>,
        stderr: String,
        failed_steps: &mut Vec<FailedStep>,
    ) -> Result<()> {
        let code_s = code.map_or("none".to_string(), |c| c.to_string());
        error!("Error with return code: {code_s}:\n{stderr}");
        if self.options.abort_on_failure {
            return Err(anyhow!("gmx {step} failed with return code {code_s}:\n{stderr}"));
        }
        failed_steps.push(FailedStep { step, code, stderr });
        Ok(())
    }

    pub(crate) fn nojump_command(&self, report: &ClusteringReport) -> GmxCommand {
        let command = self
            .gmx
            .command("trjconv")
            .flag("-f", &self.inputs.traj)
            .flag("-s", &self.inputs.config)
            .flag("-n", &report.index)
            .flag("-o", &report.outputs.nojump)
            .flag("-center", "yes")
            .flag("-pbc", "nojump");
        let command = match (&self.inputs.xvg, self.options.coupled_only) {
            (Some(xvg), true) => command.flag("-drop", xvg).flag("-dropover", "0"),
            _ => command,
        };
        command.prompt([&self.groups.center, &self.groups.output])
    }

    pub(crate) fn center_command(&self, report: &ClusteringReport) -> GmxCommand {
        self.gmx
            .command("trjconv")
            .flag("-f", &report.outputs.nojump)
            .flag("-s", &self.inputs.config)
            .flag("-n", &report.index)
            .flag("-o", &report.outputs.center)
            .flag("-center", "yes")
            .flag("-pbc", "mol")
            .flag("-ur", "compact")
            .prompt([&self.groups.center, &self.groups.output])
    }

    pub(crate) fn cluster_command(&self, report: &ClusteringReport) -> GmxCommand {
        let outputs = &report.outputs;
        self.gmx
            .command("cluster")
            .flag("-f", &outputs.center)
            .flag("-s", &self.inputs.config)
            .flag("-n", &report.index)
            .flag("-o", &outputs.rmsd_clust)
            .flag("-dist", &outputs.rmsd_dist)
            .flag("-g", &outputs.cluster_log)
            .flag("-cl", &outputs.cluster_pdb)
            .flag("-cutoff", self.options.cutoff.to_string())
            .flag("-method", &self.options.method)
            .prompt([&self.groups.rmsd, &self.groups.output])
    }

    /// The first medoid in the PDB file serves as the reference structure, and the
    /// same group is used for fitting and for the RMSD.
    pub(crate) fn rms_command(&self, report: &ClusteringReport) -> GmxCommand {
        let outputs = &report.outputs;
        self.gmx
            .command("rms")
            .flag("-f", &outputs.cluster_pdb)
            .flag("-s", &outputs.cluster_pdb)
            .flag("-o", &outputs.rmsd)
            .flag("-n", &report.index)
            .prompt([&self.groups.rmsd, &self.groups.rmsd])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(coupled_only: bool, suffix: Option<&str>) -> ClusteringPipeline {
        ClusteringPipeline::new(
            Gmx::new("gmx"),
            ClusterInputs {
                traj: PathBuf::from("traj.xtc"),
                config: PathBuf::from("sys.tpr"),
                xvg: Some(PathBuf::from("dhdl.xvg")),
                index: Some(PathBuf::from("index.ndx")),
            },
            ClusterGroups {
                center: "Protein".to_string(),
                rmsd: "Backbone".to_string(),
                output: "System".to_string(),
            },
            ClusterOptions {
                coupled_only,
                suffix: suffix.map(str::to_string),
                work_dir: PathBuf::from("out"),
                ..Default::default()
            },
        )
    }

    fn args(command: &GmxCommand) -> Vec<String> {
        command
            .args()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn report(pipeline: &ClusteringPipeline) -> ClusteringReport {
        ClusteringReport::new(pipeline.outputs(), PathBuf::from("index.ndx"))
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("nojump.xtc", None), "nojump.xtc");
        assert_eq!(with_suffix("nojump.xtc", Some("A")), "nojump_A.xtc");
        assert_eq!(with_suffix("rmsd-clust.xpm", Some("2")), "rmsd-clust_2.xpm");
        assert_eq!(with_suffix("log", Some("2")), "log_2");
    }

    #[test]
    fn test_output_files() {
        let outputs = OutputFiles::new(Path::new("out"), Some("1"));
        assert_eq!(outputs.cluster_log, Path::new("out/cluster_1.log"));
        assert_eq!(outputs.cluster_pdb, Path::new("out/clusters_1.pdb"));
        assert_eq!(outputs.rmsd, Path::new("out/rmsd_1.xvg"));
    }

    #[test]
    fn test_nojump_command() {
        let pipeline = pipeline(true, None);
        let command = pipeline.nojump_command(&report(&pipeline));
        assert_eq!(
            args(&command),
            [
                "trjconv", "-f", "traj.xtc", "-s", "sys.tpr", "-n", "index.ndx", "-o",
                "out/nojump.xtc", "-center", "yes", "-pbc", "nojump", "-drop", "dhdl.xvg",
                "-dropover", "0"
            ]
        );
        assert_eq!(command.prompt_input(), Some("Protein\nSystem\n"));

        let pipeline = self::pipeline(false, None);
        let command = pipeline.nojump_command(&report(&pipeline));
        assert!(!args(&command).contains(&"-drop".to_string()));
    }

    #[test]
    fn test_center_command() {
        let pipeline = pipeline(true, Some("x"));
        let command = pipeline.center_command(&report(&pipeline));
        assert_eq!(
            args(&command),
            [
                "trjconv", "-f", "out/nojump_x.xtc", "-s", "sys.tpr", "-n", "index.ndx", "-o",
                "out/center_x.xtc", "-center", "yes", "-pbc", "mol", "-ur", "compact"
            ]
        );
    }

    #[test]
    fn test_cluster_command() {
        let pipeline = pipeline(true, None);
        let command = pipeline.cluster_command(&report(&pipeline));
        assert_eq!(
            args(&command),
            [
                "cluster", "-f", "out/center.xtc", "-s", "sys.tpr", "-n", "index.ndx", "-o",
                "out/rmsd-clust.xpm", "-dist", "out/rmsd-dist.xvg", "-g", "out/cluster.log",
                "-cl", "out/clusters.pdb", "-cutoff", "0.1", "-method", "linkage"
            ]
        );
        assert_eq!(command.prompt_input(), Some("Backbone\nSystem\n"));
    }

    #[test]
    fn test_rms_command() {
        let pipeline = pipeline(true, None);
        let command = pipeline.rms_command(&report(&pipeline));
        assert_eq!(
            args(&command),
            [
                "rms", "-f", "out/clusters.pdb", "-s", "out/clusters.pdb", "-o", "out/rmsd.xvg",
                "-n", "index.ndx"
            ]
        );
        assert_eq!(command.prompt_input(), Some("Backbone\nBackbone\n"));
    }

    #[test]
    fn test_abort_on_failure() {
        let mut pipeline = pipeline(true, None);
        let mut failed_steps = Vec::new();
        assert!(pipeline
            .on_failure("cluster", Some(1), "boom".to_string(), &mut failed_steps)
            .is_ok());
        assert_eq!(failed_steps.len(), 1);
        assert_eq!(failed_steps[0].code, Some(1));

        pipeline.options.abort_on_failure = true;
        let err = pipeline
            .on_failure("rms", Some(2), "boom".to_string(), &mut failed_steps)
            .unwrap_err();
        assert!(format!("{err:#}").contains("gmx rms failed with return code 2"));
        assert_eq!(failed_steps.len(), 1);
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::MissingGroup("LIG".to_string()).to_string(),
            "The group LIG is not present in the provided/generated index file."
        );
    }
}
