//! Per-particle statistics over the whole ensemble.
//!
//! One task per particle: exclusion check, point-cloud shape (centroid,
//! principal axes, voxel count), then mesh-based mass properties and the
//! derived indices when the particle's surface mesh has geometry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use nalgebra::Point3;

use crate::contact::{ContactNetwork, ContactRecord, ParticleId};
use crate::error::{Result, StatsError};
use crate::exclusion::ExclusionSet;
use crate::geomio::{group_points_by_id, PointSet, CP_ID};
use crate::labels::Label;
use crate::mesh::{MassProperties, SurfaceMesh};
use crate::pool::{collect_ordered, ProgressEvent, TaskContext, WorkerPool};
use crate::shape::{self, PrincipalAxes, ShapeIndex};
use crate::table::{self, Cell, Column, ColumnKind, StatsTable, TableRow};


/// Canonical table name for a filtered run.
pub const FILTERED_STATS_FILE: &str = "particle_stats.csv";
/// Prefix of the timestamped table name for an unfiltered run.
pub const NOISY_STATS_PREFIX: &str = "particle_stats";

/// Eigenvectors are flattened axis by axis, major axis first.
pub const PARTICLE_COLUMNS: &[Column] = &[
    Column::new("id", ColumnKind::Int),
    Column::new("centroid", ColumnKind::FloatList),
    Column::new("eigen_vectors", ColumnKind::FloatList),
    Column::new("eigen_values", ColumnKind::FloatList),
    Column::new("neighbour_ids", ColumnKind::IntList),
    Column::new("voxel_count", ColumnKind::Int),
    Column::new("equivalent_radius", ColumnKind::Float),
    Column::new("coordination_number", ColumnKind::Int),
    Column::new("volume", ColumnKind::Float),
    Column::new("surface_area", ColumnKind::Float),
    Column::new("min_cell_area", ColumnKind::Float),
    Column::new("max_cell_area", ColumnKind::Float),
    Column::new("normalized_shape_index", ColumnKind::Float),
    Column::new("elongation_index", ColumnKind::Float),
    Column::new("flatness_index", ColumnKind::Float),
    Column::new("sphericity", ColumnKind::Float),
    Column::new("compactness", ColumnKind::Float),
    Column::new("label", ColumnKind::Text),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleStats {
    pub id: ParticleId,
    pub centroid: Point3<f64>,
    pub axes: PrincipalAxes,
    pub neighbour_ids: BTreeSet<ParticleId>,
    pub voxel_count: usize,
    pub equivalent_radius: f64,
    pub coordination_number: usize,
    /// `None` when the surface mesh has no geometry.
    pub mass: Option<MassProperties>,
    pub elongation_index: ShapeIndex,
    pub flatness_index: ShapeIndex,
    pub sphericity: ShapeIndex,
    pub compactness: ShapeIndex,
    pub label: Label,
}

impl ParticleStats {
    pub fn volume(&self) -> f64 {
        self.mass.map_or(0.0, |m| m.volume)
    }

    pub fn surface_area(&self) -> f64 {
        self.mass.map_or(0.0, |m| m.surface_area)
    }
}

pub(crate) fn point_cell(p: &Point3<f64>) -> Cell {
    Cell::FloatList(vec![p.x, p.y, p.z])
}

pub(crate) fn axes_cells(axes: &PrincipalAxes) -> [Cell; 2] {
    let vectors = (0..3)
        .flat_map(|i| axes.axis(i).iter().copied().collect::<Vec<_>>())
        .collect();
    [
        Cell::FloatList(vectors),
        Cell::FloatList(axes.values.iter().copied().collect()),
    ]
}

impl TableRow for ParticleStats {
    fn columns() -> &'static [Column] {
        PARTICLE_COLUMNS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn cells(&self) -> Vec<Cell> {
        let mass = self.mass.unwrap_or_default();
        let [vectors, values] = axes_cells(&self.axes);
        vec![
            Cell::Int(self.id),
            point_cell(&self.centroid),
            vectors,
            values,
            Cell::IntList(self.neighbour_ids.iter().copied().collect()),
            Cell::Int(self.voxel_count as i64),
            Cell::Float(self.equivalent_radius),
            Cell::Int(self.coordination_number as i64),
            Cell::Float(mass.volume),
            Cell::Float(mass.surface_area),
            Cell::Float(mass.min_cell_area),
            Cell::Float(mass.max_cell_area),
            Cell::Float(mass.normalized_shape_index),
            Cell::Float(self.elongation_index.or_zero()),
            Cell::Float(self.flatness_index.or_zero()),
            Cell::Float(self.sphericity.or_zero()),
            Cell::Float(self.compactness.or_zero()),
            Cell::Text(self.label.as_str().to_string()),
        ]
    }
}

/// Where a particle's voxel coordinates come from.
pub trait PointCloudSource: Send + Sync {
    fn particle_ids(&self) -> Result<Vec<ParticleId>>;

    fn point_cloud(&self, particle: ParticleId) -> Result<Vec<Point3<f64>>>;

    fn voxel_counts(&self) -> Result<Vec<(ParticleId, usize)>> {
        self.particle_ids()?
            .into_iter()
            .map(|id| Ok((id, self.point_cloud(id)?.len())))
            .collect()
    }
}

/// Point clouds held in memory, e.g. a segmentation file grouped by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClouds {
    clouds: BTreeMap<ParticleId, Vec<Point3<f64>>>,
}

impl InMemoryClouds {
    pub fn new(clouds: BTreeMap<ParticleId, Vec<Point3<f64>>>) -> Self {
        Self { clouds }
    }

    pub fn from_segmentation(set: &PointSet) -> Result<Self> {
        Ok(Self::new(group_points_by_id(set, CP_ID)?))
    }
}

impl PointCloudSource for InMemoryClouds {
    fn particle_ids(&self) -> Result<Vec<ParticleId>> {
        Ok(self.clouds.keys().copied().collect())
    }

    fn point_cloud(&self, particle: ParticleId) -> Result<Vec<Point3<f64>>> {
        self.clouds
            .get(&particle)
            .cloned()
            .ok_or(StatsError::Lookup {
                table: "point clouds",
                id: particle,
            })
    }
}

/// One `grain_<id>.vtp` file per particle.
#[derive(Debug, Clone)]
pub struct PointCloudDir {
    dir: PathBuf,
}

impl PointCloudDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_name(particle: ParticleId) -> String {
        format!("grain_{}.vtp", particle)
    }

    fn parse_file_name(name: &str) -> Option<ParticleId> {
        name.strip_prefix("grain_")?
            .strip_suffix(".vtp")?
            .parse()
            .ok()
    }
}

impl PointCloudSource for PointCloudDir {
    fn particle_ids(&self) -> Result<Vec<ParticleId>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StatsError::io(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StatsError::io(&self.dir, e))?;
            if let Some(id) = entry.file_name().to_str().and_then(Self::parse_file_name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn point_cloud(&self, particle: ParticleId) -> Result<Vec<Point3<f64>>> {
        Ok(PointSet::from_vtk(&self.dir.join(Self::file_name(particle)))?.points)
    }
}

/// Read-only settings shared by every particle task.
#[derive(Debug, Clone)]
pub struct ParticleStatsConfig {
    pub mesh_dir: PathBuf,
    pub mesh_extension: String,
    pub workers: Option<usize>,
    /// Labels assigned so far; everything else is `Unlabeled`.
    pub labels: BTreeMap<ParticleId, Label>,
}

impl ParticleStatsConfig {
    pub fn mesh_path(&self, particle: ParticleId) -> PathBuf {
        self.mesh_dir
            .join(format!("{}.{}", particle, self.mesh_extension))
    }
}

/// Statistics of one particle, or `None` when the exclusion set rules it out.
pub fn compute_one(
    ctx: &TaskContext<ParticleStatsConfig>,
    id: ParticleId,
    contacts: &[ContactRecord],
    exclusions: Option<&ExclusionSet>,
    source: &dyn PointCloudSource,
) -> Result<Option<ParticleStats>> {
    if let Some(exclusions) = exclusions {
        if exclusions.excludes(id, contacts) {
            debug!("particle {} skipped: excluded or touching an excluded particle", id);
            return Ok(None);
        }
    }

    let neighbour_ids: BTreeSet<ParticleId> = contacts.iter().map(|c| c.sibling_id).collect();

    let cloud = source.point_cloud(id)?;
    let centroid = shape::centroid(&cloud)?;
    let axes = shape::principal_axes(&cloud)?;

    let voxel_count = cloud.len();
    let mut stats = ParticleStats {
        id,
        centroid,
        axes,
        coordination_number: neighbour_ids.len(),
        neighbour_ids,
        voxel_count,
        equivalent_radius: shape::equivalent_radius(voxel_count as f64),
        mass: None,
        elongation_index: ShapeIndex::NotApplicable,
        flatness_index: ShapeIndex::NotApplicable,
        sphericity: ShapeIndex::NotApplicable,
        compactness: ShapeIndex::NotApplicable,
        label: ctx.config().labels.get(&id).copied().unwrap_or_default(),
    };

    let mesh = SurfaceMesh::from_file(&ctx.config().mesh_path(id))?;
    if let Some(mass) = mesh.mass_properties() {
        stats.mass = Some(mass);
        stats.sphericity = shape::sphericity(mass.volume, mass.surface_area);
        stats.compactness = shape::compactness(mass.volume, shape::convex_hull_volume(&cloud));
        stats.elongation_index = axes.elongation_index();
        stats.flatness_index = axes.flatness_index();
        if mass.volume > 0.0 {
            stats.equivalent_radius = shape::equivalent_radius(mass.volume);
        }
    } else {
        debug!("particle {}: surface mesh is empty", id);
    }

    Ok(Some(stats))
}

/// Runs [`compute_one`] for many particles on a fresh worker pool.
#[derive(Debug, Clone)]
pub struct ParticleStatsPipeline {
    config: Arc<ParticleStatsConfig>,
}

impl ParticleStatsPipeline {
    pub fn new(config: ParticleStatsConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ParticleStatsConfig {
        &self.config
    }

    /// Rows follow `particle_ids` order. Skipped and failed particles leave
    /// no row; only a pool that cannot start is an error.
    pub fn compute(
        &self,
        particle_ids: &[ParticleId],
        network: &Arc<ContactNetwork>,
        exclusions: Option<Arc<ExclusionSet>>,
        source: Arc<dyn PointCloudSource>,
        progress: &Sender<ProgressEvent>,
    ) -> Result<StatsTable<ParticleStats>> {
        let start = Instant::now();
        let pool = WorkerPool::new(self.config.workers)?;
        info!(
            "computing statistics for {} particles on {} workers",
            particle_ids.len(),
            pool.num_threads()
        );

        let ctx = TaskContext::new(progress.clone(), Arc::clone(&self.config));
        let handles: Vec<_> = particle_ids
            .iter()
            .map(|&id| {
                let ctx = ctx.clone();
                let network = Arc::clone(network);
                let exclusions = exclusions.clone();
                let source = Arc::clone(&source);
                pool.submit(format!("particle {}", id), move || {
                    let result = compute_one(
                        &ctx,
                        id,
                        network.contacts(id),
                        exclusions.as_deref(),
                        source.as_ref(),
                    );
                    match &result {
                        Ok(_) => {
                            debug!("finished processing particle {}", id);
                            ctx.finished(id);
                        }
                        Err(e) => {
                            error!("particle {}: {}", id, e);
                            ctx.error(format!("particle {}: {}", id, e));
                        }
                    }
                    result
                })
            })
            .collect();

        let mut table = StatsTable::new()?;
        let mut skipped = 0usize;
        let mut failed = 0usize;
        for result in collect_ordered(handles, progress) {
            match result {
                Ok(Ok(Some(stats))) => table.push(stats)?,
                Ok(Ok(None)) => skipped += 1,
                Ok(Err(_)) | Err(_) => failed += 1,
            }
        }

        info!(
            "particle statistics: {} rows, {} skipped, {} failed in {:.2?}",
            table.len(),
            skipped,
            failed,
            start.elapsed()
        );
        if failed > 0 {
            warn!("{} particles are missing from the table", failed);
        }

        Ok(table)
    }

    /// Computes and writes the table; returns it with the written path.
    pub fn run(
        &self,
        particle_ids: &[ParticleId],
        network: &Arc<ContactNetwork>,
        exclusions: Option<Arc<ExclusionSet>>,
        source: Arc<dyn PointCloudSource>,
        data_dir: &Path,
        progress: &Sender<ProgressEvent>,
    ) -> Result<(StatsTable<ParticleStats>, PathBuf)> {
        let path = output_path(data_dir, exclusions.is_some());
        let table = self.compute(particle_ids, network, exclusions, source, progress)?;
        table.write(&path)?;
        info!("wrote {}", path.display());
        Ok((table, path))
    }
}

/// Canonical name for a filtered run, timestamped for an unfiltered one.
pub fn output_path(data_dir: &Path, filtered: bool) -> PathBuf {
    if filtered {
        data_dir.join(FILTERED_STATS_FILE)
    } else {
        table::timestamped_path(data_dir, NOISY_STATS_PREFIX)
    }
}
