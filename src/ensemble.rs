//! One scan's worth of inputs and the stages that run over them.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::cluster::{self, SpectralSplit};
use crate::contact::{self, ContactNetwork, ExtremumEdge, MaximaTable, ParticleId, RawSaddle};
use crate::exclusion::{voxel_histogram, ExclusionSet};
use crate::geomio::{self, PointSet, CP_ID};
use crate::labels::LabelStore;
use crate::particle::{
    InMemoryClouds, ParticleStatsConfig, ParticleStatsPipeline, PointCloudDir, PointCloudSource,
};
use crate::pool::ProgressEvent;
use crate::region::{ContactRegionMesh, ContactRegionPipeline, RegionConfig};
use crate::settings::{DataPaths, Settings, Stage};

/// The contact network of one scan plus its resolved configuration.
pub struct Ensemble {
    pub settings: Settings,
    pub paths: DataPaths,
    pub saddles: Vec<RawSaddle>,
    pub network: Arc<ContactNetwork>,
    pub maxima: Option<MaximaTable>,
}

impl Ensemble {
    /// Reads the contact file (and maxima, if present) and builds the network.
    pub fn load(settings: Settings) -> Result<Self> {
        let paths = settings.paths()?;

        let contacts = PointSet::from_vtk(&paths.contacts_file)
            .with_context(|| format!("reading contacts {}", paths.contacts_file.display()))?;
        let saddles = geomio::raw_saddles(&contacts)?;
        let network = ContactNetwork::build(&saddles);

        let maxima = match &paths.maxima_file {
            Some(file) => Some(MaximaTable::from_groups(&geomio::group_points_by_id(
                &PointSet::from_vtk(file)?,
                CP_ID,
            )?)),
            None => None,
        };

        info!(
            "contact network: {} saddles, {} particles, {} records, {} components",
            saddles.len(),
            network.num_particles(),
            network.num_records(),
            network.connected_components().len()
        );

        Ok(Self {
            settings,
            paths,
            saddles,
            network: Arc::new(network),
            maxima,
        })
    }

    /// Strongest saddle to each neighbour, paired with the neighbour's maximum.
    pub fn extremum_graph(&self, particle: ParticleId) -> Result<Vec<ExtremumEdge>> {
        let maxima = self
            .maxima
            .as_ref()
            .ok_or_else(|| anyhow!("no maxima file for this scan"))?;
        Ok(contact::extremum_graph(&self.network, particle, maxima)?)
    }

    /// Per-particle files when extracted, otherwise the segmentation grouped by id.
    pub fn point_clouds(&self) -> Result<Arc<dyn PointCloudSource>> {
        if self.paths.point_cloud_dir.is_dir() {
            info!("point clouds from {}", self.paths.point_cloud_dir.display());
            return Ok(Arc::new(PointCloudDir::new(&self.paths.point_cloud_dir)));
        }
        let segmentation = self
            .paths
            .segmentation_file
            .as_ref()
            .ok_or_else(|| anyhow!("neither a point cloud directory nor a segmentation file"))?;
        info!("point clouds from {}", segmentation.display());
        let set = PointSet::from_vtk(segmentation)?;
        Ok(Arc::new(InMemoryClouds::from_segmentation(&set)?))
    }

    /// Segmentation labels of this scan, created empty on first use.
    pub fn labels(&self) -> Result<LabelStore> {
        Ok(LabelStore::open(
            &self.paths.label_file,
            self.settings.label_checkpoint_every,
        )?)
    }

    pub fn run(&self) -> Result<()> {
        match self.settings.stage {
            Stage::All => {
                self.particle_stats()?;
                self.contact_stats()?;
            }
            Stage::Particles => {
                self.particle_stats()?;
            }
            Stage::Contacts => {
                self.contact_stats()?;
            }
            Stage::Clean => {
                let threshold = self
                    .settings
                    .clean_threshold
                    .ok_or_else(|| anyhow!("clean_threshold is not set"))?;
                self.clean(threshold)?;
            }
            Stage::Communities => {
                self.communities()?;
            }
        }
        Ok(())
    }

    /// Excludes particles with at most `threshold` voxels and saves the list.
    pub fn clean(&self, threshold: usize) -> Result<ExclusionSet> {
        let counts = self.point_clouds()?.voxel_counts()?;

        let histogram = voxel_histogram(counts.iter().copied());
        info!(
            "voxel counts of {} particles binned as {:?}",
            histogram.counts.len(),
            histogram.frequencies()
        );

        let exclusions = ExclusionSet::from_voxel_counts(counts, threshold);
        exclusions.save(&self.paths.exclusion_file)?;
        info!(
            "excluded {} particles with at most {} voxels, saved to {}",
            exclusions.len(),
            threshold,
            self.paths.exclusion_file.display()
        );
        Ok(exclusions)
    }

    /// Louvain communities written one file each, plus the Laplacian split.
    pub fn communities(&self) -> Result<(Vec<PathBuf>, SpectralSplit)> {
        let communities =
            cluster::louvain_communities(&self.network, self.settings.louvain_resolution);
        info!(
            "{} communities, modularity {:.4}",
            communities.len(),
            cluster::modularity(&self.network, &communities, self.settings.louvain_resolution)
        );
        let written = cluster::write_communities(&self.paths.community_dir, &communities)?;

        let split = cluster::spectral_split(&self.network)?;
        info!(
            "laplacian: {} zero eigenvalues, fiedler split {} / {} particles",
            split.num_components,
            split.negative.len(),
            split.non_negative.len()
        );
        Ok((written, split))
    }

    pub fn particle_stats(&self) -> Result<PathBuf> {
        let source = self.point_clouds()?;
        let particle_ids = source.particle_ids()?;
        let exclusions = if self.settings.noisy {
            None
        } else {
            Some(Arc::new(ExclusionSet::load(&self.paths.exclusion_file)))
        };

        let labels = if self.paths.label_file.is_file() {
            self.labels()?.snapshot()
        } else {
            Default::default()
        };

        let pipeline = ParticleStatsPipeline::new(ParticleStatsConfig {
            mesh_dir: self.paths.mesh_dir.clone(),
            mesh_extension: self.settings.mesh_extension.clone(),
            workers: self.settings.workers,
            labels,
        });

        let (_, path) = with_progress("particles", |progress| {
            pipeline.run(
                &particle_ids,
                &self.network,
                exclusions,
                source,
                &self.paths.data_dir,
                progress,
            )
        })?;
        Ok(path)
    }

    pub fn contact_stats(&self) -> Result<PathBuf> {
        let region_file = self
            .paths
            .contact_region_file
            .as_ref()
            .ok_or_else(|| anyhow!("no contact region file for this scan"))?;
        let regions = Arc::new(ContactRegionMesh::from_point_set(&PointSet::from_vtk(
            region_file,
        )?)?);
        let saddle_to_particles = contact::saddle_contact_ids(&self.saddles);

        let pipeline = ContactRegionPipeline::new(RegionConfig {
            dest_dir: self.paths.contact_region_dir.clone(),
            workers: self.settings.workers,
        });

        let (_, path) = with_progress("contact regions", |progress| {
            pipeline.run(
                &saddle_to_particles,
                &regions,
                &self.paths.data_dir,
                progress,
            )
        })?;
        Ok(path)
    }
}

/// Drives a progress bar from the events `f` sends until it returns.
fn with_progress<T>(message: &str, f: impl FnOnce(&Sender<ProgressEvent>) -> T) -> T {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>3}% {msg} ETA: {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▇▆▅▄▃▂▁"),
    );
    pb.set_message(message.to_string());

    let (tx, rx) = mpsc::channel();
    let bar = pb.clone();
    let monitor = thread::spawn(move || {
        for event in rx {
            match event {
                ProgressEvent::Percent(p) => bar.set_position(p as u64),
                ProgressEvent::TaskFinished { .. } => bar.tick(),
                ProgressEvent::Error(e) => bar.println(format!("error: {}", e)),
            }
        }
    });

    let out = f(&tx);
    drop(tx);
    let _ = monitor.join();
    pb.finish();
    out
}
