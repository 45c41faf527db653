//! Particles flagged as segmentation noise.
//!
//! The set is derived from a voxel-count threshold, saved next to the
//! statistics, and loaded as an immutable snapshot for a filtered run.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::contact::{ContactRecord, ParticleId};
use crate::error::{Result, StatsError};


#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionSet {
    pub volume_threshold: usize,
    ids: BTreeSet<ParticleId>,
}

impl ExclusionSet {
    pub fn new(volume_threshold: usize, ids: impl IntoIterator<Item = ParticleId>) -> Self {
        Self {
            volume_threshold,
            ids: ids.into_iter().collect(),
        }
    }

    /// Excludes every particle with at most `threshold` voxels.
    pub fn from_voxel_counts(
        counts: impl IntoIterator<Item = (ParticleId, usize)>,
        threshold: usize,
    ) -> Self {
        let ids = counts
            .into_iter()
            .filter(|&(_, count)| count <= threshold)
            .map(|(id, _)| id);
        Self::new(threshold, ids)
    }

    pub fn contains(&self, id: ParticleId) -> bool {
        self.ids.contains(&id)
    }

    /// True when `id` or any particle it touches is excluded.
    pub fn excludes(&self, id: ParticleId, contacts: &[ContactRecord]) -> bool {
        self.contains(id) || contacts.iter().any(|c| self.contains(c.sibling_id))
    }

    pub fn ids(&self) -> impl Iterator<Item = ParticleId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// A missing or unreadable file gives an empty set.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("no exclusion list at {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str::<Self>(&text) {
            Ok(set) => {
                info!(
                    "loaded {} excluded particles (threshold {}) from {}",
                    set.len(),
                    set.volume_threshold,
                    path.display()
                );
                set
            }
            Err(e) => {
                warn!("ignoring corrupt exclusion list {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StatsError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| StatsError::format(path, e.to_string()))?;
        fs::write(path, text).map_err(|e| StatsError::io(path, e))
    }
}

/// Voxel counts per particle and evenly spaced bin edges spanning them.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelHistogram {
    pub counts: Vec<(ParticleId, usize)>,
    pub bin_edges: Vec<f64>,
}

impl VoxelHistogram {
    /// Number of particles per bin; the last bin is closed on the right.
    pub fn frequencies(&self) -> Vec<usize> {
        let bins = self.bin_edges.len().saturating_sub(1);
        let mut freq = vec![0; bins];
        if bins == 0 {
            return freq;
        }
        let lo = self.bin_edges[0];
        let hi = self.bin_edges[bins];
        for &(_, count) in &self.counts {
            let x = count as f64;
            let bin = if hi > lo {
                (((x - lo) / (hi - lo)) * bins as f64).floor() as usize
            } else {
                0
            };
            freq[bin.min(bins - 1)] += 1;
        }
        freq
    }
}

/// Histogram over `counts` with one edge per hundred particles (at least two).
pub fn voxel_histogram(counts: impl IntoIterator<Item = (ParticleId, usize)>) -> VoxelHistogram {
    let counts: Vec<_> = counts.into_iter().collect();
    let num_edges = (counts.len() / 100).max(2);
    let min = counts.iter().map(|&(_, c)| c).min().unwrap_or(0) as f64;
    let max = counts.iter().map(|&(_, c)| c).max().unwrap_or(0) as f64;
    let step = (max - min) / (num_edges - 1) as f64;
    let bin_edges = (0..num_edges).map(|i| min + step * i as f64).collect();
    VoxelHistogram { counts, bin_edges }
}
