use anyhow::{anyhow, Result};
use itertools::Itertools;
use nalgebra::DMatrix;
use std::collections::BTreeMap;

use crate::cluster_log::ClusterMembers;

/// Counts transitions between clusters `idx_1` and `idx_2`, ignoring every other cluster.
///
/// Returns the number of transitions and, for each one, the timeframe of the first
/// configuration in the new cluster. With fewer than two clusters there is nothing to count.
pub fn count_transitions(clusters: &ClusterMembers, idx_1: usize, idx_2: usize) -> (usize, Vec<u64>) {
    if clusters.len() < 2 {
        return (0, Vec::new());
    }
    let tagged = |idx: usize| {
        clusters
            .get(idx)
            .unwrap_or_default()
            .iter()
            .map(move |&t| (t, idx))
    };
    let t_transitions = tagged(idx_1)
        .chain(tagged(idx_2))
        .sorted()
        .tuple_windows::<(_, _)>()
        .filter(|((_, a), (_, b))| a != b)
        .map(|(_, (t, _))| t)
        .collect::<Vec<_>>();
    (t_transitions.len(), t_transitions)
}

/// Cluster index of every configuration, in time order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterTrajectory {
    times: Vec<u64>,
    clusters: Vec<usize>,
}

impl ClusterTrajectory {
    pub fn new(members: &ClusterMembers) -> Self {
        let (times, clusters) = members
            .iter()
            .flat_map(|(i, members)| members.iter().map(move |&t| (t, i)))
            .sorted()
            .unzip();
        Self { times, clusters }
    }

    #[inline]
    pub fn times(&self) -> &[u64] {
        &self.times
    }

    #[inline]
    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Adjacent frames whose clusters differ, as `(time_from, cluster_from, cluster_to)`.
    pub fn changes(&self) -> impl Iterator<Item = (u64, usize, usize)> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.clusters.iter().copied())
            .tuple_windows::<(_, _)>()
            .filter(|((_, a), (_, b))| a != b)
            .map(|((t, a), (_, b))| (t, a, b))
    }

    /// Timeframes of the transitions between each unordered pair of clusters.
    pub fn transition_times(&self) -> BTreeMap<(usize, usize), Vec<u64>> {
        self.changes()
            .fold(BTreeMap::new(), |mut t_transitions, (t, a, b)| {
                t_transitions
                    .entry((a.min(b), a.max(b)))
                    .or_insert_with(Vec::new)
                    .push(t);
                t_transitions
            })
    }
}

/// Square matrix of transitions between adjacent frames.
///
/// Clusters are numbered from 1 everywhere else in the crate, rows and
/// columns of the underlying matrix start at 0. Every accessor here takes
/// cluster indices; `slot` is the only place converting between the two.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    matrix: DMatrix<f64>,
}

impl TransitionMatrix {
    #[inline]
    fn slot(cluster_i: usize) -> Option<usize> {
        cluster_i.checked_sub(1)
    }

    pub fn from_trajectory(clusters: &[usize], n_clusters: usize, normalize: bool) -> Result<Self> {
        let mut matrix = DMatrix::<f64>::zeros(n_clusters, n_clusters);
        for (&a, &b) in clusters.iter().tuple_windows::<(_, _)>() {
            let (i, j) = Self::slot(a)
                .zip(Self::slot(b))
                .filter(|&(i, j)| i < n_clusters && j < n_clusters)
                .ok_or_else(|| {
                    anyhow!("transition {a} -> {b} is outside clusters 1..={n_clusters}")
                })?;
            matrix[(i, j)] += 1.0;
        }
        let transitions = Self { matrix };
        Ok(if normalize {
            transitions.normalized()
        } else {
            transitions
        })
    }

    /// Divides each row by its sum. Rows without outgoing transitions stay zero.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut matrix = self.matrix.clone();
        for mut row in matrix.row_iter_mut() {
            let sum = row.sum();
            if sum > 0.0 {
                row /= sum;
            }
        }
        Self { matrix }
    }

    #[inline]
    pub fn n_clusters(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn get(&self, from: usize, to: usize) -> Option<f64> {
        let (i, j) = Self::slot(from).zip(Self::slot(to))?;
        self.matrix.get((i, j)).copied()
    }

    #[inline]
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn row_sums(&self) -> Vec<f64> {
        self.matrix.row_iter().map(|row| row.sum()).collect()
    }

    pub fn off_diagonal_sum(&self) -> f64 {
        self.matrix.sum() - self.matrix.trace()
    }
}

#[derive(Debug, Clone)]
pub struct TransitionAnalysis {
    pub matrix: TransitionMatrix,
    pub trajectory: ClusterTrajectory,
    pub t_transitions: BTreeMap<(usize, usize), Vec<u64>>,
}

/// Builds the time-ordered cluster trajectory of all clusters, its transition matrix
/// (row-normalized if `normalize`) and the transition times of every pair of clusters
/// observed next to each other. Transition times are those of the last frame before the change.
pub fn analyze_transitions(clusters: &ClusterMembers, normalize: bool) -> Result<TransitionAnalysis> {
    let trajectory = ClusterTrajectory::new(clusters);
    let n_clusters = clusters.max_index().unwrap_or_default();
    let matrix = TransitionMatrix::from_trajectory(trajectory.clusters(), n_clusters, normalize)?;
    let t_transitions = trajectory.transition_times();
    Ok(TransitionAnalysis {
        matrix,
        trajectory,
        t_transitions,
    })
}
