use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use nalgebra::Point3;

use grainstat::contact::{saddle_contact_ids, ContactNetwork, ParticleId, RawSaddle};
use grainstat::error::{Result, StatsError};
use grainstat::exclusion::ExclusionSet;
use grainstat::geomio::{PointSet, CP_ID, REGION_ID};
use grainstat::mesh::SurfaceMesh;
use grainstat::particle::{
    InMemoryClouds, ParticleStatsConfig, ParticleStatsPipeline, PointCloudSource,
};
use grainstat::pool::ProgressEvent;
use grainstat::region::{local_region_mesh, ContactRegionMesh, ContactRegionPipeline, RegionConfig};
use grainstat::shape::{self, ShapeIndex};
use grainstat::table;

fn scratch(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("test-scratch")
        .join(format!("{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn saddle(contact_id: i64, a: ParticleId, b: ParticleId, value: f64) -> RawSaddle {
    RawSaddle {
        contact_id,
        max_1: a,
        max_2: b,
        position: Point3::new(0.0, 0.0, contact_id as f64),
        value,
    }
}

/// Box corners with side lengths `(a, b, c)` offset by `origin`, plus its centre.
fn box_cloud(origin: Point3<f64>, a: f64, b: f64, c: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::new();
    for x in [0.0, a] {
        for y in [0.0, b] {
            for z in [0.0, c] {
                points.push(origin + nalgebra::Vector3::new(x, y, z));
            }
        }
    }
    points.push(origin + nalgebra::Vector3::new(a / 2.0, b / 2.0, c / 2.0));
    points
}

/// Closed box surface with outward quads; corner index = 4x + 2y + z.
fn write_box_mesh(path: &Path, a: f64, b: f64, c: f64) {
    let vertices = box_cloud(Point3::origin(), a, b, c)[..8].to_vec();
    let faces = [
        [0, 1, 3, 2],
        [4, 6, 7, 5],
        [0, 4, 5, 1],
        [2, 3, 7, 6],
        [0, 2, 6, 4],
        [1, 5, 7, 3],
    ]
    .iter()
    .map(|q| q.to_vec())
    .collect();
    SurfaceMesh::new(vertices, faces)
        .write_obj(path, "grain")
        .unwrap();
}

fn particle_pipeline(mesh_dir: &Path, workers: usize) -> ParticleStatsPipeline {
    ParticleStatsPipeline::new(ParticleStatsConfig {
        mesh_dir: mesh_dir.to_path_buf(),
        mesh_extension: "obj".to_string(),
        workers: Some(workers),
        labels: BTreeMap::new(),
    })
}

fn percents(events: &[ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Percent(p) => Some(*p),
            _ => None,
        })
        .collect()
}

/// Sleeps before handing out a cloud, longer for earlier submissions.
struct SlowClouds {
    inner: InMemoryClouds,
    delays: BTreeMap<ParticleId, u64>,
}

impl PointCloudSource for SlowClouds {
    fn particle_ids(&self) -> Result<Vec<ParticleId>> {
        self.inner.particle_ids()
    }

    fn point_cloud(&self, particle: ParticleId) -> Result<Vec<Point3<f64>>> {
        if let Some(&ms) = self.delays.get(&particle) {
            thread::sleep(Duration::from_millis(ms));
        }
        self.inner.point_cloud(particle)
    }
}

#[test]
fn rows_follow_submission_order() {
    let dir = scratch("ordering");
    let ids = [9, 3, 7];

    let mut clouds = BTreeMap::new();
    for &id in &ids {
        write_box_mesh(&dir.join(format!("{}.obj", id)), 1.0, 2.0, 3.0);
        clouds.insert(id, box_cloud(Point3::new(id as f64, 0.0, 0.0), 1.0, 2.0, 3.0));
    }
    let source = Arc::new(SlowClouds {
        inner: InMemoryClouds::new(clouds),
        delays: BTreeMap::from([(9, 300), (3, 150), (7, 0)]),
    });

    let network = Arc::new(ContactNetwork::build(&[
        saddle(1, 9, 3, 1.0),
        saddle(2, 3, 7, 1.0),
    ]));

    let (tx, rx) = mpsc::channel();
    let table = particle_pipeline(&dir, 3)
        .compute(&ids, &network, None, source, &tx)
        .unwrap();
    drop(tx);

    assert_eq!(table.ids(), vec![9, 3, 7]);
    assert_relative_eq!(table.rows()[0].centroid, Point3::new(9.5, 1.0, 1.5), epsilon = 1e-12);

    let events: Vec<_> = rx.iter().collect();
    let finished: BTreeSet<i64> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::TaskFinished { id } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(finished, BTreeSet::from([3, 7, 9]));

    let percents = percents(&events);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(percents.iter().filter(|&&p| p == 100).count(), 1);
    assert!(percents.len() >= ids.len() + 1);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn exclusion_is_contagious() {
    let dir = scratch("contagion");
    let ids = [5, 7, 8, 9];

    let mut clouds = BTreeMap::new();
    for &id in &ids {
        write_box_mesh(&dir.join(format!("{}.obj", id)), 1.0, 1.0, 1.0);
        clouds.insert(id, box_cloud(Point3::origin(), 1.0, 1.0, 1.0));
    }
    let source: Arc<dyn PointCloudSource> = Arc::new(InMemoryClouds::new(clouds));

    // 5 - 7 - 8, 9 isolated
    let network = Arc::new(ContactNetwork::build(&[
        saddle(1, 5, 7, 1.0),
        saddle(2, 7, 8, 1.0),
    ]));
    let pipeline = particle_pipeline(&dir, 2);

    let (tx, _rx) = mpsc::channel();
    let filtered = pipeline
        .compute(
            &ids,
            &network,
            Some(Arc::new(ExclusionSet::new(0, [5]))),
            Arc::clone(&source),
            &tx,
        )
        .unwrap();
    assert_eq!(filtered.ids(), vec![8, 9]);

    let noisy = pipeline.compute(&ids, &network, None, source, &tx).unwrap();
    assert_eq!(noisy.ids(), vec![5, 7, 8, 9]);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn failed_particles_leave_gaps() {
    let dir = scratch("gaps");
    write_box_mesh(&dir.join("1.obj"), 1.0, 1.0, 1.0);
    write_box_mesh(&dir.join("3.obj"), 1.0, 1.0, 1.0);
    // 2 has no mesh, 4 has no point cloud

    let clouds = BTreeMap::from([
        (1, box_cloud(Point3::origin(), 1.0, 1.0, 1.0)),
        (2, box_cloud(Point3::origin(), 1.0, 1.0, 1.0)),
        (3, box_cloud(Point3::origin(), 1.0, 1.0, 1.0)),
    ]);
    let network = Arc::new(ContactNetwork::default());

    let (tx, rx) = mpsc::channel();
    let table = particle_pipeline(&dir, 2)
        .compute(
            &[1, 2, 3, 4],
            &network,
            None,
            Arc::new(InMemoryClouds::new(clouds)),
            &tx,
        )
        .unwrap();
    drop(tx);

    assert_eq!(table.ids(), vec![1, 3]);
    let errors = rx
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Error(_)))
        .count();
    assert_eq!(errors, 2);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn degenerate_particles_report_zero_indices() {
    let dir = scratch("degenerate");

    // every vertex at one point: zero area, zero volume
    SurfaceMesh::new(
        vec![Point3::new(1.0, 1.0, 1.0); 3],
        vec![vec![0, 1, 2]],
    )
    .write_obj(&dir.join("6.obj"), "flat")
    .unwrap();
    // a flat voxel layer has no hull volume
    let layer: Vec<_> = (0..3)
        .flat_map(|i| (0..3).map(move |j| Point3::new(i as f64, j as f64, 0.0)))
        .collect();

    let (tx, _rx) = mpsc::channel();
    let table = particle_pipeline(&dir, 1)
        .compute(
            &[6],
            &Arc::new(ContactNetwork::default()),
            None,
            Arc::new(InMemoryClouds::new(BTreeMap::from([(6, layer)]))),
            &tx,
        )
        .unwrap();

    let stats = &table.rows()[0];
    assert_eq!(stats.sphericity, ShapeIndex::NotApplicable);
    assert_eq!(stats.compactness, ShapeIndex::NotApplicable);
    assert_eq!(stats.sphericity.or_zero(), 0.0);
    assert_eq!(stats.compactness.or_zero(), 0.0);
    assert_eq!(stats.volume(), 0.0);
    assert_relative_eq!(
        stats.equivalent_radius,
        shape::equivalent_radius(9.0),
        epsilon = 1e-12
    );

    let path = dir.join("stats.csv");
    table.write(&path).unwrap();
    let record = table::find_record(&path, 6).unwrap().unwrap();
    assert_eq!(record["sphericity"], "0.0");
    assert_eq!(record["compactness"], "0.0");

    fs::remove_dir_all(&dir).unwrap();
}

/// A bent strip of three quads so the patch has three distinct extents.
fn bent_strip() -> PointSet {
    let points = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.1),
        Point3::new(2.0, 0.0, 0.5),
        Point3::new(3.0, 0.0, 1.3),
        Point3::new(0.0, 0.7, 0.0),
        Point3::new(1.0, 0.7, 0.1),
        Point3::new(2.0, 0.7, 0.5),
        Point3::new(3.0, 0.7, 1.3),
        Point3::new(50.0, 50.0, 50.0),
    ];
    PointSet::new(points)
        .with_cells(vec![
            vec![0, 1, 5, 4],
            vec![1, 2, 6, 5],
            vec![2, 3, 7, 6],
            vec![8, 8, 8, 8],
        ])
        .with_cell_array(CP_ID, vec![10.0, 10.0, 10.0, 12.0])
        .with_cell_array(REGION_ID, vec![0.0, 0.0, 0.0, 1.0])
}

#[test]
fn contact_regions_round_trip_through_written_meshes() {
    let dir = scratch("regions");
    let regions = Arc::new(ContactRegionMesh::from_point_set(&bent_strip()).unwrap());

    // 99 has no region geometry
    let saddle_to_particles = saddle_contact_ids(&[
        saddle(10, 1, 2, 1.0),
        saddle(12, 2, 3, 1.0),
        saddle(99, 3, 4, 1.0),
    ]);

    let pipeline = ContactRegionPipeline::new(RegionConfig {
        dest_dir: dir.join("contact_regions"),
        workers: Some(2),
    });
    let (tx, _rx) = mpsc::channel();
    let (table, path) = pipeline
        .run(&saddle_to_particles, &regions, &dir.join("data"), &tx)
        .unwrap();

    assert_eq!(table.ids(), vec![10, 12, 99]);
    assert!(path.is_file());
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("contact_stats_"));

    let direct = local_region_mesh(&regions.points, &regions.quads[&10]).unwrap();
    let direct_centroid = shape::centroid(&direct.vertices).unwrap();
    let direct_axes = shape::principal_axes(&direct.vertices).unwrap();

    let row = &table.rows()[0];
    assert_eq!(row.quad_count, 3);
    assert_eq!(row.neighbour_ids, BTreeSet::from([1, 2]));
    assert_relative_eq!(row.centroid.unwrap(), direct_centroid, epsilon = 1e-9);
    assert_relative_eq!(row.axes.unwrap().values, direct_axes.values, epsilon = 1e-9);
    assert!(dir.join("contact_regions").join("10.obj").is_file());

    let missing = &table.rows()[2];
    assert_eq!(missing.quad_count, 0);
    assert!(missing.centroid.is_none());
    assert_eq!(missing.neighbour_ids, BTreeSet::from([3, 4]));
    assert!(!dir.join("contact_regions").join("99.obj").exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn three_particle_scenario_end_to_end() {
    let dir = scratch("scenario");
    let (a, b, c) = (1, 2, 3);
    let raw = [saddle(10, a, b, 1.0), saddle(11, a, b, 4.0), saddle(12, b, c, 2.0)];

    let network = ContactNetwork::build(&raw);
    assert_eq!(network.contacts(a).len(), 2);
    let dedup = network.deduplicated();
    assert_eq!(dedup.contacts(a).len(), 1);
    assert_eq!(dedup.contacts(a)[0].contact_id, 11);
    assert_eq!(dedup.coordination_number(b), 2);

    let mesh_dir = dir.join("ensemble");
    fs::create_dir_all(&mesh_dir).unwrap();
    let mut clouds = BTreeMap::new();
    for (id, side) in [(a, 1.0), (b, 2.0), (c, 3.0)] {
        write_box_mesh(&mesh_dir.join(format!("{}.obj", id)), side, side, side);
        clouds.insert(id, box_cloud(Point3::origin(), side, side, side));
    }

    let data_dir = dir.join("data");
    let (tx, _rx) = mpsc::channel();
    let (table, path) = particle_pipeline(&mesh_dir, 2)
        .run(
            &[a, b, c],
            &Arc::new(dedup),
            Some(Arc::new(ExclusionSet::default())),
            Arc::new(InMemoryClouds::new(clouds)),
            &data_dir,
            &tx,
        )
        .unwrap();

    assert_eq!(path, data_dir.join("particle_stats.csv"));
    assert_eq!(table.ids(), vec![a, b, c]);

    let stats_b = &table.rows()[1];
    assert_eq!(stats_b.coordination_number, 2);
    assert_eq!(stats_b.neighbour_ids, BTreeSet::from([a, c]));
    assert_relative_eq!(stats_b.volume(), 8.0, epsilon = 1e-9);
    assert_relative_eq!(stats_b.compactness.value().unwrap(), 1.0, epsilon = 1e-9);

    let record = table::find_record(&path, b).unwrap().unwrap();
    assert_eq!(record["neighbour_ids"], "[1, 3]");
    assert_eq!(record["coordination_number"], "2");
    assert_eq!(record["label"], "Unlabeled");

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_region_file_is_reported() {
    let err = PointSet::from_vtk(Path::new("/no/such/scan_contact_regions.vtp")).unwrap_err();
    assert!(matches!(err, StatsError::MissingFile(_)));
}
