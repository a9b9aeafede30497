use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

const MARKER_RMSD_RANGE: &str = "ranges from";
const MARKER_RMSD_AVG: &str = "average rmsd";
const MARKER_FOUND: &str = "Found";
const MARKER_TABLE: &str = "cl.";

#[derive(Debug, Clone, PartialEq)]
pub enum LogParsingError {
    MissingRmsdRange,
    MissingAverageRmsd,
    MissingClusterCount,
    InvalidNumber { line_number: usize, token: String },
    MembersBeforeCluster { line_number: usize },
}

impl std::fmt::Display for LogParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRmsdRange => write!(f, "no \"The RMSD ranges from\" line in cluster log"),
            Self::MissingAverageRmsd => write!(f, "no \"Average RMSD\" line in cluster log"),
            Self::MissingClusterCount => write!(f, "no \"Found\" line in cluster log"),
            Self::InvalidNumber { line_number, token } => {
                write!(f, "line {line_number}: invalid number {token:?}")
            }
            Self::MembersBeforeCluster { line_number } => {
                write!(f, "line {line_number}: cluster members before any cluster index")
            }
        }
    }
}

impl std::error::Error for LogParsingError {}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).context(format!("Reading {}", path.to_string_lossy()))?;
    Ok(BufReader::new(file).lines().map_while(io::Result::ok).collect())
}

fn parse_number<T: std::str::FromStr>(token: &str, line_number: usize) -> Result<T, LogParsingError> {
    let token = token.trim();
    token.parse::<T>().map_err(|_| LogParsingError::InvalidNumber {
        line_number,
        token: token.to_string(),
    })
}

/// RMSD statistics and cluster count from the log header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterInfo {
    pub rmsd_range: [f64; 2],
    pub rmsd_avg: f64,
    pub n_clusters: usize,
}

impl ClusterInfo {
    pub fn read(path: &Path) -> Result<Self> {
        let lines = read_lines(path)?;
        Self::parse(&lines).with_context(|| format!("Parsing {}", path.to_string_lossy()))
    }

    pub fn parse<I, S>(lines: I) -> Result<Self, LogParsingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rmsd_range = None;
        let mut rmsd_avg = None;
        let mut n_clusters = None;
        for (line_number, line) in (1..).zip(lines) {
            let line = line.as_ref();
            let lower = line.to_lowercase();
            if lower.contains(MARKER_RMSD_RANGE) {
                let (_, values) = lower.rsplit_once("from").unwrap_or_default();
                let (lo, hi) = values.split_once("to").unwrap_or((values, ""));
                let hi = hi.split("nm").next().unwrap_or_default();
                rmsd_range = Some([
                    parse_number(lo, line_number)?,
                    parse_number(hi, line_number)?,
                ]);
            }
            if lower.contains(MARKER_RMSD_AVG) {
                let (_, value) = lower.rsplit_once("is").unwrap_or_default();
                rmsd_avg = Some(parse_number(value, line_number)?);
            }
            if line.trim_start().starts_with(MARKER_FOUND) {
                let count = line.split_whitespace().nth(1).unwrap_or_default();
                n_clusters = Some(parse_number(count, line_number)?);
                break;
            }
        }
        Ok(Self {
            rmsd_range: rmsd_range.ok_or(LogParsingError::MissingRmsdRange)?,
            rmsd_avg: rmsd_avg.ok_or(LogParsingError::MissingAverageRmsd)?,
            n_clusters: n_clusters.ok_or(LogParsingError::MissingClusterCount)?,
        })
    }
}

/// Timeframes belonging to each cluster, keyed by the 1-based cluster index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMembers {
    clusters: BTreeMap<usize, Vec<u64>>,
}

impl ClusterMembers {
    #[must_use]
    pub fn new(clusters: BTreeMap<usize, Vec<u64>>) -> Self {
        Self { clusters }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let lines = read_lines(path)?;
        Self::parse(&lines).with_context(|| format!("Parsing {}", path.to_string_lossy()))
    }

    pub fn parse<I, S>(lines: I) -> Result<Self, LogParsingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut clusters: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        let mut current = None;
        let mut in_table = false;
        for (line_number, line) in (1..).zip(lines) {
            let line = line.as_ref();
            if !in_table {
                in_table = line.trim().starts_with(MARKER_TABLE);
                continue;
            }
            let parts = line.split('|').collect::<Vec<_>>();
            if let Ok(cluster_i) = parts[0].trim().parse::<usize>() {
                clusters.insert(cluster_i, Vec::new());
                current = Some(cluster_i);
            }
            let members = parts[parts.len() - 1]
                .split_whitespace()
                .map(|token| parse_number::<u64>(token, line_number))
                .collect::<Result<Vec<_>, _>>()?;
            if members.is_empty() {
                continue;
            }
            let cluster_i = current.ok_or(LogParsingError::MembersBeforeCluster { line_number })?;
            clusters.entry(cluster_i).or_default().extend(members);
        }
        Ok(Self { clusters })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, cluster_i: usize) -> Option<&[u64]> {
        self.clusters.get(&cluster_i).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u64])> {
        self.clusters.iter().map(|(&i, members)| (i, members.as_slice()))
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.clusters.keys().copied()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.clusters.keys().next_back().copied()
    }

    pub fn total_count(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    pub fn counts(&self) -> BTreeMap<usize, usize> {
        self.iter().map(|(i, members)| (i, members.len())).collect()
    }

    /// Fraction of all configurations held by each cluster.
    pub fn sizes(&self) -> BTreeMap<usize, f64> {
        let total = self.total_count();
        self.iter()
            .map(|(i, members)| {
                let size = if total == 0 {
                    0.0
                } else {
                    members.len() as f64 / total as f64
                };
                (i, size)
            })
            .collect()
    }
}

impl FromIterator<(usize, Vec<u64>)> for ClusterMembers {
    fn from_iter<T: IntoIterator<Item = (usize, Vec<u64>)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
