#![cfg(unix)]

use assert_float_eq::assert_f64_near;
use gmx_cluster_util::{
    ClusterGroups, ClusterInputs, ClusterOptions, ClusteringPipeline, ConfigError, Gmx,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const FAKE_GMX: &str = r#"#!/bin/sh
sub="$1"
shift
cat > /dev/null
echo "$sub" >> "$(dirname "$0")/calls.txt"
out=""
log=""
fail=0
while [ $# -gt 0 ]; do
    case "$1" in
        -o) out="$2" ;;
        -g) log="$2" ;;
        mol) fail=1 ;;
    esac
    shift
done
case "$sub" in
    cluster) cat > "$log" <<'LOG'
Using linkage method for clustering
Using RMSD cutoff 0.1 nm
The RMSD ranges from 0.0474 to 0.382 nm
Average RMSD is 0.201
Found 2 clusters

cl. | #st  rmsd | middle rmsd | cluster members
  1 |   7  0.155 |     20 .116 |      0   20   40   60
    |           |             |     80  100  180
  2 |   3  0.167 |    140 .130 |    120  140  160
LOG
    ;;
    make_ndx) printf '[ System ]\n1 2 3\n[ Protein ]\n1 2\n' > "$out" ;;
    rms) printf '@ title "RMSD"\n0.000 0.000\n1.000 0.312\n' > "$out" ;;
    *) : > "$out" ;;
esac
if [ "$fail" = 1 ]; then
    echo "Fatal error" >&2
    exit 1
fi
"#;

fn setup(dir: &Path) -> Gmx {
    if dir.exists() {
        fs::remove_dir_all(dir).unwrap();
    }
    fs::create_dir_all(dir).unwrap();
    let gmx = dir.join("gmx");
    fs::write(&gmx, FAKE_GMX).unwrap();
    fs::set_permissions(&gmx, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(
        dir.join("index.ndx"),
        "[ System ]\n1 2 3\n[ Protein ]\n1 2\n[ Backbone ]\n1\n",
    )
    .unwrap();
    fs::write(dir.join("dhdl.xvg"), "# gmx\n@ s0 legend \"state\"\n0 0\n2 1\n4 0\n").unwrap();
    fs::write(dir.join("decoupled.xvg"), "0 1\n2 3\n").unwrap();
    Gmx::new(gmx)
}

fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn pipeline(
    gmx: &Gmx,
    dir: &Path,
    index: Option<&str>,
    xvg: &str,
    groups: [&str; 3],
    abort_on_failure: bool,
) -> ClusteringPipeline {
    let [center, rmsd, output] = groups;
    ClusteringPipeline::new(
        gmx.clone(),
        ClusterInputs {
            traj: dir.join("traj.xtc"),
            config: dir.join("sys.tpr"),
            xvg: Some(dir.join(xvg)),
            index: index.map(|name| dir.join(name)),
        },
        ClusterGroups {
            center: center.to_string(),
            rmsd: rmsd.to_string(),
            output: output.to_string(),
        },
        ClusterOptions {
            work_dir: dir.to_path_buf(),
            abort_on_failure,
            ..Default::default()
        },
    )
}

const GROUPS: [&str; 3] = ["Protein", "Backbone", "System"];

// Kept as a single test so the fake executable is never written while another
// test thread is spawning processes.
#[test]
fn test_clustering_pipeline() {
    let dir: PathBuf = std::env::temp_dir().join(format!("gmx-cluster-util-{}", std::process::id()));
    let gmx = setup(&dir);

    let report = pipeline(&gmx, &dir, Some("index.ndx"), "dhdl.xvg", GROUPS, false).run().unwrap();
    assert_eq!(calls(&dir), ["trjconv", "trjconv", "cluster", "rms"]);
    assert_eq!(report.n_coupled, Some(2));
    let info = report.info.unwrap();
    assert_eq!(info.n_clusters, 2);
    assert_f64_near!(info.rmsd_avg, 0.201);
    assert_f64_near!(report.sizes[&1], 0.7);
    assert_f64_near!(report.sizes[&2], 0.3);
    assert_eq!(report.transitions, Some((2, vec![120, 180])));
    assert_f64_near!(report.inter_medoid_rmsd.unwrap(), 0.312);
    assert_eq!(report.failed_steps.len(), 1);
    assert_eq!(report.failed_steps[0].code, Some(1));
    assert!(report.failed_steps[0].stderr.contains("Fatal error"));

    fs::remove_file(dir.join("calls.txt")).unwrap();
    let err = pipeline(&gmx, &dir, Some("index.ndx"), "dhdl.xvg", ["LIG", "Backbone", "System"], false).run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingGroup(group)) if group == "LIG"
    ));
    assert!(calls(&dir).is_empty());

    let report = pipeline(&gmx, &dir, Some("index.ndx"), "decoupled.xvg", GROUPS, false).run().unwrap();
    assert!(report.info.is_none());
    assert_eq!(report.n_coupled, Some(0));
    assert!(calls(&dir).is_empty());

    let err = pipeline(&gmx, &dir, Some("index.ndx"), "dhdl.xvg", GROUPS, true).run().unwrap_err();
    assert!(err.to_string().contains("gmx trjconv -pbc mol failed with return code 1"));
    assert_eq!(calls(&dir), ["trjconv", "trjconv"]);

    // Without an index file one is generated with make_ndx in the working directory.
    fs::remove_file(dir.join("calls.txt")).unwrap();
    fs::remove_file(dir.join("index.ndx")).unwrap();
    let report = pipeline(&gmx, &dir, None, "dhdl.xvg", ["Protein", "Protein", "System"], false)
        .run()
        .unwrap();
    assert_eq!(report.index, dir.join("index.ndx"));
    assert!(report.index.is_file());
    assert_eq!(calls(&dir), ["make_ndx", "trjconv", "trjconv", "cluster", "rms"]);
    assert_eq!(report.info.unwrap().n_clusters, 2);

    fs::remove_file(dir.join("calls.txt")).unwrap();
    let err = pipeline(&gmx, &dir, None, "dhdl.xvg", ["Protein", "Protein", "Water"], false)
        .run()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingGroup(group)) if group == "Water"
    ));
    assert_eq!(calls(&dir), ["make_ndx"]);

    fs::remove_dir_all(&dir).unwrap();
}
