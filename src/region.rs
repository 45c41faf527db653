//! Per-saddle statistics of contact-region patches.
//!
//! Each saddle's quads are cut out of the shared region mesh, written as a
//! standalone OBJ, and the statistics are taken from the reloaded file so
//! the artifact and the numbers always agree.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use nalgebra::Point3;

use crate::contact::{ParticleId, SaddleId};
use crate::error::{Result, StatsError};
use crate::geomio::{CellKind, PointSet, CP_ID, REGION_ID};
use crate::mesh::SurfaceMesh;
use crate::particle::{axes_cells, point_cell};
use crate::pool::{collect_ordered, ProgressEvent, TaskContext, WorkerPool};
use crate::shape::{self, PrincipalAxes};
use crate::table::{self, Cell, Column, ColumnKind, StatsTable, TableRow};

#[cfg(test)]
mod tests {
    use super::*;

    fn strip() -> ContactRegionMesh {
        // two quads sharing an edge, plus an unused point
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
            Point3::new(9.0, 9.0, 9.0),
        ];
        let set = PointSet::new(points)
            .with_cells(vec![vec![0, 1, 4, 3], vec![1, 2, 5, 4]])
            .with_cell_array(CP_ID, vec![10.0, 10.0])
            .with_cell_array(REGION_ID, vec![0.0, 0.0]);
        ContactRegionMesh::from_point_set(&set).unwrap()
    }

    #[test]
    fn shared_points_are_deduplicated() {
        let mesh = strip().region(10).unwrap().unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.faces, vec![vec![0, 1, 2, 3], vec![1, 4, 5, 2]]);
        assert_eq!(mesh.vertices[4], Point3::new(2.0, 0.0, 0.0));
        assert!(strip().region(11).is_none());
    }

    #[test]
    fn non_quads_are_rejected() {
        let set = PointSet::new(vec![Point3::origin(); 3])
            .with_cells(vec![vec![0, 1, 2]])
            .with_cell_array(CP_ID, vec![1.0]);
        assert!(matches!(
            ContactRegionMesh::from_point_set(&set),
            Err(StatsError::Format { .. })
        ));
    }

    #[test]
    fn four_point_strips_are_not_quads() {
        let set = PointSet::new(vec![Point3::origin(); 4])
            .with_typed_cells(vec![(CellKind::Strip, vec![0, 1, 2, 3])])
            .with_cell_array(CP_ID, vec![1.0]);
        assert!(matches!(
            ContactRegionMesh::from_point_set(&set),
            Err(StatsError::Format { .. })
        ));
    }

    #[test]
    fn out_of_range_point_is_a_lookup_error() {
        let err = local_region_mesh(&[Point3::origin()], &[[0, 0, 0, 3]]).unwrap_err();
        assert!(matches!(err, StatsError::Lookup { id: 3, .. }));
    }

    #[test]
    fn empty_row_keeps_its_cells_typed() {
        let stats = ContactStats::without_geometry(4, BTreeSet::from([1, 2]));
        let cells = stats.cells();
        assert_eq!(cells.len(), CONTACT_COLUMNS.len());
        assert_eq!(cells[1], Cell::FloatList(Vec::new()));
        assert_eq!(cells[4], Cell::Int(0));
    }
}

pub const CONTACT_STATS_PREFIX: &str = "contact_stats";

pub const CONTACT_COLUMNS: &[Column] = &[
    Column::new("id", ColumnKind::Int),
    Column::new("centroid", ColumnKind::FloatList),
    Column::new("eigen_vectors", ColumnKind::FloatList),
    Column::new("eigen_values", ColumnKind::FloatList),
    Column::new("quad_count", ColumnKind::Int),
    Column::new("neighbour_ids", ColumnKind::IntList),
];

/// Quads of the rasterised contact surfaces, grouped by saddle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactRegionMesh {
    pub points: Vec<Point3<f64>>,
    pub quads: BTreeMap<SaddleId, Vec<[usize; 4]>>,
}

impl ContactRegionMesh {
    /// Groups the cells of a region file by their `CP ID`.
    pub fn from_point_set(set: &PointSet) -> Result<Self> {
        let mut quads: BTreeMap<SaddleId, Vec<[usize; 4]>> = BTreeMap::new();
        let mut regions: BTreeMap<SaddleId, BTreeSet<i64>> = BTreeMap::new();
        let has_region_ids = set.cell_arrays.contains_key(REGION_ID);

        for (i, (kind, cell)) in set.typed_cells().enumerate() {
            if kind != CellKind::Polygon {
                return Err(StatsError::format(
                    set.source(),
                    format!("cell {} is a {:?}, expected a quad", i, kind),
                ));
            }
            let quad: [usize; 4] = cell.try_into().map_err(|_| {
                StatsError::format(
                    set.source(),
                    format!("cell {} has {} vertices, expected a quad", i, cell.len()),
                )
            })?;
            let saddle = set.cell_id(CP_ID, i)?;
            quads.entry(saddle).or_default().push(quad);
            if has_region_ids {
                regions
                    .entry(saddle)
                    .or_default()
                    .insert(set.cell_id(REGION_ID, i)?);
            }
        }

        for (saddle, ids) in regions.iter().filter(|(_, ids)| ids.len() > 1) {
            debug!("saddle {} spans {} connected regions", saddle, ids.len());
        }

        Ok(Self {
            points: set.points.clone(),
            quads,
        })
    }

    /// Standalone mesh of one saddle's quads with points renumbered in
    /// first-seen order.
    pub fn region(&self, saddle: SaddleId) -> Option<Result<SurfaceMesh>> {
        self.quads
            .get(&saddle)
            .map(|quads| local_region_mesh(&self.points, quads))
    }
}

pub fn local_region_mesh(points: &[Point3<f64>], quads: &[[usize; 4]]) -> Result<SurfaceMesh> {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut vertices = Vec::new();
    let mut faces = Vec::with_capacity(quads.len());

    for quad in quads {
        let mut face = Vec::with_capacity(4);
        for &global in quad {
            let local = match remap.get(&global) {
                Some(&local) => local,
                None => {
                    let point = points.get(global).ok_or(StatsError::Lookup {
                        table: "contact region points",
                        id: global as i64,
                    })?;
                    vertices.push(*point);
                    remap.insert(global, vertices.len() - 1);
                    vertices.len() - 1
                }
            };
            face.push(local);
        }
        faces.push(face);
    }

    Ok(SurfaceMesh::new(vertices, faces))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactStats {
    pub id: SaddleId,
    /// `None` when the saddle has no region geometry.
    pub centroid: Option<Point3<f64>>,
    pub axes: Option<PrincipalAxes>,
    pub quad_count: usize,
    pub neighbour_ids: BTreeSet<ParticleId>,
}

impl ContactStats {
    pub fn without_geometry(id: SaddleId, neighbour_ids: BTreeSet<ParticleId>) -> Self {
        Self {
            id,
            centroid: None,
            axes: None,
            quad_count: 0,
            neighbour_ids,
        }
    }
}

impl TableRow for ContactStats {
    fn columns() -> &'static [Column] {
        CONTACT_COLUMNS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn cells(&self) -> Vec<Cell> {
        let centroid = match &self.centroid {
            Some(c) => point_cell(c),
            None => Cell::FloatList(Vec::new()),
        };
        let [vectors, values] = match &self.axes {
            Some(axes) => axes_cells(axes),
            None => [Cell::FloatList(Vec::new()), Cell::FloatList(Vec::new())],
        };
        vec![
            Cell::Int(self.id),
            centroid,
            vectors,
            values,
            Cell::Int(self.quad_count as i64),
            Cell::IntList(self.neighbour_ids.iter().copied().collect()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Per-saddle meshes go here as `<saddle>.obj`.
    pub dest_dir: PathBuf,
    pub workers: Option<usize>,
}

impl RegionConfig {
    pub fn mesh_path(&self, saddle: SaddleId) -> PathBuf {
        self.dest_dir.join(format!("{}.obj", saddle))
    }
}

/// Writes the saddle's mesh and derives its statistics from the written file.
pub fn region_task(
    ctx: &TaskContext<RegionConfig>,
    saddle: SaddleId,
    particles: BTreeSet<ParticleId>,
    regions: &ContactRegionMesh,
) -> Result<ContactStats> {
    let Some(quads) = regions.quads.get(&saddle) else {
        error!("saddle {} has no contact region", saddle);
        return Ok(ContactStats::without_geometry(saddle, particles));
    };

    let path = ctx.config().mesh_path(saddle);
    local_region_mesh(&regions.points, quads)?.write_obj(&path, &format!("saddle_{}", saddle))?;

    let written = SurfaceMesh::from_file(&path)?;
    Ok(ContactStats {
        id: saddle,
        centroid: Some(shape::centroid(&written.vertices)?),
        axes: Some(shape::principal_axes(&written.vertices)?),
        quad_count: quads.len(),
        neighbour_ids: particles,
    })
}

#[derive(Debug, Clone)]
pub struct ContactRegionPipeline {
    config: Arc<RegionConfig>,
}

impl ContactRegionPipeline {
    pub fn new(config: RegionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// One row per saddle in key order; a failing saddle leaves no row.
    pub fn compute(
        &self,
        saddle_to_particles: &BTreeMap<SaddleId, BTreeSet<ParticleId>>,
        regions: &Arc<ContactRegionMesh>,
        progress: &Sender<ProgressEvent>,
    ) -> Result<StatsTable<ContactStats>> {
        let start = Instant::now();
        fs::create_dir_all(&self.config.dest_dir)
            .map_err(|e| StatsError::io(&self.config.dest_dir, e))?;

        let pool = WorkerPool::new(self.config.workers)?;
        info!(
            "computing statistics for {} contact regions on {} workers",
            saddle_to_particles.len(),
            pool.num_threads()
        );

        let ctx = TaskContext::new(progress.clone(), Arc::clone(&self.config));
        let handles: Vec<_> = saddle_to_particles
            .iter()
            .map(|(&saddle, particles)| {
                let ctx = ctx.clone();
                let particles = particles.clone();
                let regions = Arc::clone(regions);
                pool.submit(format!("saddle {}", saddle), move || {
                    let result = region_task(&ctx, saddle, particles, &regions);
                    match &result {
                        Ok(_) => ctx.finished(saddle),
                        Err(e) => {
                            error!("saddle {}: {}", saddle, e);
                            ctx.error(format!("saddle {}: {}", saddle, e));
                        }
                    }
                    result
                })
            })
            .collect();

        let mut table = StatsTable::new()?;
        let mut failed = 0usize;
        for result in collect_ordered(handles, progress) {
            match result {
                Ok(Ok(stats)) => table.push(stats)?,
                Ok(Err(_)) | Err(_) => failed += 1,
            }
        }

        info!(
            "contact statistics: {} rows in {:.2?}",
            table.len(),
            start.elapsed()
        );
        if failed > 0 {
            warn!("{} contact regions are missing from the table", failed);
        }
        Ok(table)
    }

    /// Computes and writes a timestamped table into `data_dir`.
    pub fn run(
        &self,
        saddle_to_particles: &BTreeMap<SaddleId, BTreeSet<ParticleId>>,
        regions: &Arc<ContactRegionMesh>,
        data_dir: &Path,
        progress: &Sender<ProgressEvent>,
    ) -> Result<(StatsTable<ContactStats>, PathBuf)> {
        let table = self.compute(saddle_to_particles, regions, progress)?;
        let path = table::timestamped_path(data_dir, CONTACT_STATS_PREFIX);
        table.write(&path)?;
        info!("wrote {}", path.display());
        Ok((table, path))
    }
}
