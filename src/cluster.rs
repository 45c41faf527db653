//! Community structure of the contact network.
//!
//! Two views: a Louvain partition maximising modularity, and the spectrum of
//! the graph Laplacian, whose zero eigenvalues count connected components and
//! whose Fiedler vector bisects the packing.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info};
use nalgebra::{DMatrix, SymmetricEigen};

use crate::contact::{ContactNetwork, ParticleId};
use crate::error::{Result, StatsError};

/// Laplacian eigenvalues at or below this fraction of the largest one count as zero.
const ZERO_EIGENVALUE_TOLERANCE: f64 = 1e-9;

/// Smallest modularity gain that moves a node between communities.
const MIN_GAIN: f64 = 1e-12;


/// Unweighted Laplacian `D - A` over distinct neighbours, rows in particle id
/// order. Self contacts are ignored.
pub fn laplacian(network: &ContactNetwork) -> (Vec<ParticleId>, DMatrix<f64>) {
    let ids: Vec<ParticleId> = network.particle_ids().collect();
    let index: BTreeMap<ParticleId, usize> =
        ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let n = ids.len();
    let mut l = DMatrix::<f64>::zeros(n, n);
    for (i, &id) in ids.iter().enumerate() {
        for sibling in network.neighbours(id) {
            if sibling == id {
                continue;
            }
            if let Some(&j) = index.get(&sibling) {
                l[(i, j)] = -1.0;
                l[(i, i)] += 1.0;
            }
        }
    }
    (ids, l)
}

/// Spectrum of the Laplacian and the bisection by its Fiedler vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSplit {
    pub particles: Vec<ParticleId>,
    /// Ascending.
    pub eigenvalues: Vec<f64>,
    /// Number of (numerically) zero eigenvalues.
    pub num_components: usize,
    /// Eigenvector of the first non-zero eigenvalue, signed so that the first
    /// non-zero entry is negative. `None` when every eigenvalue is zero.
    pub fiedler: Option<Vec<f64>>,
    pub negative: BTreeSet<ParticleId>,
    pub non_negative: BTreeSet<ParticleId>,
}

pub fn spectral_split(network: &ContactNetwork) -> Result<SpectralSplit> {
    let (particles, l) = laplacian(network);
    if particles.is_empty() {
        return Err(StatsError::EmptyGeometry("contact network"));
    }

    let eigen = SymmetricEigen::new(l);
    let mut order: Vec<usize> = (0..particles.len()).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let eigenvalues: Vec<f64> = order.iter().map(|&i| eigen.eigenvalues[i]).collect();

    let largest = eigenvalues.last().copied().unwrap_or(0.0).max(1.0);
    let num_components = eigenvalues
        .iter()
        .filter(|&&v| v.abs() <= ZERO_EIGENVALUE_TOLERANCE * largest)
        .count();

    let fiedler = order.get(num_components).map(|&column| {
        let mut v: Vec<f64> = eigen.eigenvectors.column(column).iter().copied().collect();
        if let Some(&first) = v.iter().find(|x| x.abs() > ZERO_EIGENVALUE_TOLERANCE) {
            if first > 0.0 {
                v.iter_mut().for_each(|x| *x = -*x);
            }
        }
        v
    });

    let mut negative = BTreeSet::new();
    let mut non_negative = BTreeSet::new();
    for (i, &particle) in particles.iter().enumerate() {
        match &fiedler {
            Some(v) if v[i] < 0.0 => negative.insert(particle),
            _ => non_negative.insert(particle),
        };
    }

    debug!(
        "laplacian of {} particles: {} zero eigenvalues, fiedler split {}/{}",
        particles.len(),
        num_components,
        negative.len(),
        non_negative.len()
    );

    Ok(SpectralSplit {
        particles,
        eigenvalues,
        num_components,
        fiedler,
        negative,
        non_negative,
    })
}

/// Undirected weighted graph; self loops are kept apart from `adjacency`.
#[derive(Debug, Clone)]
struct WeightedGraph {
    adjacency: Vec<BTreeMap<usize, f64>>,
    self_loops: Vec<f64>,
}

impl WeightedGraph {
    fn from_network(network: &ContactNetwork, ids: &[ParticleId]) -> Self {
        let index: BTreeMap<ParticleId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let adjacency = ids
            .iter()
            .map(|&id| {
                network
                    .neighbours(id)
                    .into_iter()
                    .filter(|&sibling| sibling != id)
                    .filter_map(|sibling| index.get(&sibling).map(|&j| (j, 1.0)))
                    .collect()
            })
            .collect();
        Self {
            adjacency,
            self_loops: vec![0.0; ids.len()],
        }
    }

    fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// A self loop adds twice its weight.
    fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].values().sum::<f64>() + 2.0 * self.self_loops[node]
    }

    /// Collapses each community into one node.
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut adjacency = vec![BTreeMap::new(); count];
        let mut self_loops = vec![0.0; count];
        for node in 0..self.len() {
            let c = community[node];
            self_loops[c] += self.self_loops[node];
            for (&other, &w) in &self.adjacency[node] {
                let d = community[other];
                if c == d {
                    // seen from both ends
                    self_loops[c] += w / 2.0;
                } else {
                    *adjacency[c].entry(d).or_insert(0.0) += w;
                }
            }
        }
        Self {
            adjacency,
            self_loops,
        }
    }
}

/// Moves single nodes between communities while modularity improves.
/// Returns community labels numbered from zero, their count, and whether any
/// node moved.
fn local_moving(graph: &WeightedGraph, resolution: f64) -> (Vec<usize>, usize, bool) {
    let n = graph.len();
    let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
    let two_m: f64 = degrees.iter().sum();
    let mut community: Vec<usize> = (0..n).collect();
    if two_m == 0.0 {
        return (community, n, false);
    }

    let mut totals = degrees.clone();
    let mut improved = false;
    loop {
        let mut moved = false;
        for node in 0..n {
            let current = community[node];
            let k = degrees[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (&other, &w) in &graph.adjacency[node] {
                *links.entry(community[other]).or_insert(0.0) += w;
            }

            totals[current] -= k;
            let gain = |c: usize, w: f64| w - resolution * totals[c] * k / two_m;
            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&c, &w) in &links {
                let g = gain(c, w);
                if g > best_gain + MIN_GAIN {
                    best = c;
                    best_gain = g;
                }
            }
            totals[best] += k;

            if best != current {
                community[node] = best;
                moved = true;
                improved = true;
            }
        }
        if !moved {
            break;
        }
    }

    let mut labels: BTreeMap<usize, usize> = BTreeMap::new();
    for c in community.iter_mut() {
        let next = labels.len();
        *c = *labels.entry(*c).or_insert(next);
    }
    (community, labels.len(), improved)
}

/// Louvain communities of the contact graph (unit weight per contacting
/// pair), each sorted, ordered by their smallest particle id.
///
/// Nodes are visited in particle id order, so the partition is deterministic.
pub fn louvain_communities(network: &ContactNetwork, resolution: f64) -> Vec<BTreeSet<ParticleId>> {
    let ids: Vec<ParticleId> = network.particle_ids().collect();
    let mut graph = WeightedGraph::from_network(network, &ids);
    let mut membership: Vec<usize> = (0..ids.len()).collect();

    let mut level = 0;
    loop {
        let (community, count, improved) = local_moving(&graph, resolution);
        if !improved {
            break;
        }
        for m in membership.iter_mut() {
            *m = community[*m];
        }
        graph = graph.aggregate(&community, count);
        level += 1;
        debug!("louvain level {}: {} communities", level, count);
    }

    let mut groups: BTreeMap<usize, BTreeSet<ParticleId>> = BTreeMap::new();
    for (&id, &m) in ids.iter().zip(&membership) {
        groups.entry(m).or_default().insert(id);
    }
    let mut communities: Vec<_> = groups.into_values().collect();
    communities.sort_by_key(|c| c.first().copied());
    communities
}

/// Newman modularity of a partition of the contact graph.
pub fn modularity(
    network: &ContactNetwork,
    communities: &[BTreeSet<ParticleId>],
    resolution: f64,
) -> f64 {
    let ids: Vec<ParticleId> = network.particle_ids().collect();
    let graph = WeightedGraph::from_network(network, &ids);
    let two_m: f64 = (0..graph.len()).map(|i| graph.degree(i)).sum();
    if two_m == 0.0 {
        return 0.0;
    }

    let index: BTreeMap<ParticleId, usize> =
        ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    communities
        .iter()
        .map(|members| {
            let nodes: BTreeSet<usize> = members.iter().filter_map(|p| index.get(p).copied()).collect();
            let internal: f64 = nodes
                .iter()
                .flat_map(|&i| graph.adjacency[i].iter())
                .filter(|(j, _)| nodes.contains(j))
                .map(|(_, &w)| w)
                .sum();
            let degree: f64 = nodes.iter().map(|&i| graph.degree(i)).sum();
            internal / two_m - resolution * (degree / two_m).powi(2)
        })
        .sum()
}

/// Replaces `dir` with one `<n>.txt` per community listing its particle ids.
pub fn write_communities(dir: &Path, communities: &[BTreeSet<ParticleId>]) -> Result<Vec<PathBuf>> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| StatsError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| StatsError::io(dir, e))?;

    let mut written = Vec::with_capacity(communities.len());
    for (i, members) in communities.iter().enumerate() {
        let path = dir.join(format!("{}.txt", i));
        fs::write(&path, format!("[{}]", members.iter().join(", ")))
            .map_err(|e| StatsError::io(&path, e))?;
        written.push(path);
    }
    info!("wrote {} communities to {}", communities.len(), dir.display());
    Ok(written)
}
