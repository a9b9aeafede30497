use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gmx_cluster_util::{
    analyze_transitions, count_transitions, plot_clusters, ClusterGroups, ClusterInfo,
    ClusterInputs, ClusterMembers, ClusterOptions, ClusteringPipeline, Gmx, PlotType,
};
use itertools::Itertools;
use log::info;
use rayon::{prelude::*, ThreadPoolBuilder};
use regex::Regex;
use std::{
    fs::read_dir,
    path::{Path, PathBuf},
};

/// Clustering of GROMACS trajectories and transitions between the clusters.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unwrap, center and cluster a trajectory with gmx, then analyze the clusters
    Run(RunArgs),

    /// RMSD statistics and number of clusters of a gmx cluster log
    Info(LogArgs),

    /// Members and sizes of the clusters of a gmx cluster log
    Members(LogArgs),

    /// Transition matrix and transition times between clusters
    Transitions(TransitionsArgs),

    /// Summary of the cluster logs of every sim_N directory of an ensemble
    Batch(BatchArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Input trajectory (XTC or TRR)
    #[arg(short, long)]
    traj: PathBuf,

    /// Configuration file (TPR or GRO)
    #[arg(short, long)]
    config: PathBuf,

    /// Time series of the state index, required with --coupled-only true
    #[arg(short, long)]
    xvg: Option<PathBuf>,

    /// Index file, generated with gmx make_ndx if omitted
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Group used for centering the system
    #[arg(long)]
    center_group: String,

    /// Group used for calculating the RMSD
    #[arg(long)]
    rmsd_group: String,

    /// Group written to the output trajectories
    #[arg(long)]
    output_group: String,

    /// Path to the gmx executable
    #[arg(long, default_value = "gmx")]
    gmx: PathBuf,

    /// Only cluster the fully coupled configurations
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    coupled_only: bool,

    /// Clustering method of gmx cluster
    #[arg(short, long, default_value = "linkage")]
    method: String,

    /// RMSD cutoff (nm)
    #[arg(long, default_value_t = 0.1)]
    cutoff: f64,

    /// Suffix appended to the names of the output files
    #[arg(short, long)]
    suffix: Option<String>,

    /// Directory where to write the output files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Stop at the first gmx call returning a non-zero code
    #[arg(long)]
    abort_on_failure: bool,
}

#[derive(Args)]
struct LogArgs {
    /// Log file written by gmx cluster -g
    cluster_log: PathBuf,
}

#[derive(Args)]
struct TransitionsArgs {
    /// Log file written by gmx cluster -g
    cluster_log: PathBuf,

    /// Normalize each row of the transition matrix
    #[arg(short, long)]
    normalize: bool,

    /// Plot "bar" (cluster distribution) or "xy" (cluster trajectory)
    #[arg(short, long)]
    plot: Option<PlotType>,

    /// First cluster of the pair whose transitions are counted
    #[arg(long, default_value_t = 1)]
    idx_1: usize,

    /// Second cluster of the pair whose transitions are counted
    #[arg(long, default_value_t = 2)]
    idx_2: usize,

    /// Directory where to save plots
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args)]
struct BatchArgs {
    /// Directory containing the sim_N directories
    results_dir: PathBuf,

    /// Name of the cluster log inside each sim_N directory
    #[arg(short, long, default_value = "cluster.log")]
    log: String,

    /// Number of threads to run in parallel
    #[arg(short, long, default_value_t = 2)]
    threads: usize,
}

fn format_row(values: impl IntoIterator<Item = f64>) -> String {
    values.into_iter().map(|x| format!("{x:10.4}")).join("\t")
}

fn do_run(args: &RunArgs) -> Result<()> {
    let pipeline = ClusteringPipeline::new(
        Gmx::new(&args.gmx),
        ClusterInputs {
            traj: args.traj.clone(),
            config: args.config.clone(),
            xvg: args.xvg.clone(),
            index: args.index.clone(),
        },
        ClusterGroups {
            center: args.center_group.clone(),
            rmsd: args.rmsd_group.clone(),
            output: args.output_group.clone(),
        },
        ClusterOptions {
            coupled_only: args.coupled_only,
            method: args.method.clone(),
            cutoff: args.cutoff,
            suffix: args.suffix.clone(),
            work_dir: args.output_dir.clone(),
            abort_on_failure: args.abort_on_failure,
        },
    );
    let report = pipeline.run()?;
    let Some(cluster_info) = report.info else {
        println!("no fully coupled configurations, nothing clustered");
        return Ok(());
    };
    println!(
        "rmsd_range: {:.3} {:.3} nm",
        cluster_info.rmsd_range[0], cluster_info.rmsd_range[1]
    );
    println!("rmsd_avg: {:.3} nm", cluster_info.rmsd_avg);
    println!("n_clusters: {}", cluster_info.n_clusters);
    for (i, size) in &report.sizes {
        println!("cluster {i}: {:.2}%", size * 100.0);
    }
    if let Some((n_transitions, t_transitions)) = &report.transitions {
        println!("n_transitions: {n_transitions}");
        println!("t_transitions (ps): {}", t_transitions.iter().join(" "));
    }
    if let Some(rmsd) = report.inter_medoid_rmsd {
        println!("inter_medoid_rmsd: {rmsd:.3} nm");
    }
    for step in &report.failed_steps {
        println!("failed: gmx {} (return code {:?})", step.step, step.code);
    }
    Ok(())
}

fn do_info(args: &LogArgs) -> Result<()> {
    let cluster_info = ClusterInfo::read(&args.cluster_log)?;
    println!(
        "rmsd_range: {} {}",
        cluster_info.rmsd_range[0], cluster_info.rmsd_range[1]
    );
    println!("rmsd_avg: {}", cluster_info.rmsd_avg);
    println!("n_clusters: {}", cluster_info.n_clusters);
    Ok(())
}

fn do_members(args: &LogArgs) -> Result<()> {
    let members = ClusterMembers::read(&args.cluster_log)?;
    let sizes = members.sizes();
    println!("# cluster count size members");
    for (i, frames) in members.iter() {
        println!(
            "{i} {} {:.4} {}",
            frames.len(),
            sizes[&i],
            frames.iter().join(" ")
        );
    }
    Ok(())
}

fn do_transitions(args: &TransitionsArgs) -> Result<()> {
    let members = ClusterMembers::read(&args.cluster_log)?;
    let analysis = analyze_transitions(&members, args.normalize)?;
    info!("trajectory of {} configurations", analysis.trajectory.len());

    println!("# transition matrix");
    for row in analysis.matrix.as_matrix().row_iter() {
        println!("{}", format_row(row.iter().copied()));
    }
    println!("# transition times (ps)");
    for ((a, b), times) in &analysis.t_transitions {
        println!("{a}-{b}: {}", times.iter().join(" "));
    }
    let (n_transitions, t_transitions) = count_transitions(&members, args.idx_1, args.idx_2);
    println!(
        "# {n_transitions} transitions between clusters {} and {}: {}",
        args.idx_1,
        args.idx_2,
        t_transitions.iter().join(" ")
    );

    if let Some(plot_type) = args.plot {
        let path = plot_clusters(plot_type, &members, &analysis.trajectory, &args.output_dir)?;
        info!("saved {}", path.to_string_lossy());
    }
    Ok(())
}

fn do_sim_dir(sim_num: usize, sim_dir: &Path, log: &str) -> Result<(usize, ClusterInfo, ClusterMembers)> {
    let log_path = sim_dir.join(log);
    let cluster_info = ClusterInfo::read(&log_path)?;
    let members = ClusterMembers::read(&log_path)?;
    Ok((sim_num, cluster_info, members))
}

fn do_batch(args: &BatchArgs) -> Result<()> {
    let tp = ThreadPoolBuilder::new().num_threads(args.threads).build()?;
    let re = Regex::new(r"^sim_(\d+)$")?;
    let mut sim_dirs = Vec::new();
    for entry in read_dir(&args.results_dir)? {
        let sim_dir = entry?.path();
        let name = sim_dir.file_name().unwrap_or_default().to_string_lossy().to_string();
        if let Some(num) = re.captures(&name).and_then(|c| c[1].parse::<usize>().ok()) {
            sim_dirs.push((num, sim_dir));
        }
    }
    let mut results = tp.install(|| {
        sim_dirs
            .par_iter()
            .map(|(num, dir)| do_sim_dir(*num, dir, &args.log))
            .collect::<Result<Vec<_>>>()
    })?;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    println!("# sim n_clusters rmsd_min rmsd_max rmsd_avg largest_size");
    for (sim_num, cluster_info, members) in results {
        let largest = members
            .sizes()
            .values()
            .copied()
            .fold(0.0, f64::max);
        println!(
            "{sim_num} {} {}",
            cluster_info.n_clusters,
            format_row([
                cluster_info.rmsd_range[0],
                cluster_info.rmsd_range[1],
                cluster_info.rmsd_avg,
                largest,
            ])
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => do_run(args)?,
        Commands::Info(args) => do_info(args)?,
        Commands::Members(args) => do_members(args)?,
        Commands::Transitions(args) => do_transitions(args)?,
        Commands::Batch(args) => do_batch(args)?,
    };
    Ok(())
}
