use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use log::info;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};


/// Suffix of the saddle/contact network file.
pub const CONTACTS_SUFFIX: &str = "contacts.vtp";
/// Suffix of the labelled voxel segmentation.
pub const SEGMENTATION_SUFFIX: &str = "segmentation.vtp";
/// Suffix of the rasterised contact-region quads.
pub const CONTACT_REGIONS_SUFFIX: &str = "contact_regions.vtp";
/// Suffix of the particle maxima (grain centres).
pub const MAXIMA_SUFFIX: &str = "grain_centres.vtp";

/// Exclusion list written by the cleaning stage.
pub const EXCLUSION_FILE: &str = "clean_data.json";
/// Manual segmentation labels.
pub const LABEL_FILE: &str = "labels.json";
/// One `<n>.txt` per Louvain community, replaced on every run.
pub const COMMUNITY_DIR: &str = "communities";

/// Which pipelines the binary runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Particle statistics followed by contact-region statistics.
    #[default]
    All,
    Particles,
    Contacts,
    /// Only build the exclusion list from `clean_threshold`.
    Clean,
    /// Louvain communities and the Laplacian spectrum of the contact network.
    Communities,
}

/// Runtime configuration for the application.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Directory holding the inputs of one scan.
    pub base_dir: PathBuf,
    #[serde(default)]
    pub contacts_file: Option<PathBuf>,
    #[serde(default)]
    pub segmentation_file: Option<PathBuf>,
    #[serde(default)]
    pub contact_region_file: Option<PathBuf>,
    #[serde(default)]
    pub maxima_file: Option<PathBuf>,
    #[serde(default = "default_mesh_dir")]
    pub mesh_dir: PathBuf,
    #[serde(default = "default_point_cloud_dir")]
    pub point_cloud_dir: PathBuf,
    #[serde(default = "default_contact_region_dir")]
    pub contact_region_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_mesh_extension")]
    pub mesh_extension: String,
    /// Worker threads; `available_parallelism - 1` when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Run over every particle instead of the exclusion-filtered population.
    #[serde(default)]
    pub noisy: bool,
    /// Voxel count at or below which the cleaning stage excludes a particle.
    #[serde(default)]
    pub clean_threshold: Option<usize>,
    #[serde(default = "default_label_checkpoint")]
    pub label_checkpoint_every: usize,
    /// Louvain resolution; above one favours smaller communities.
    #[serde(default = "default_louvain_resolution")]
    pub louvain_resolution: f64,
    #[serde(default)]
    pub stage: Stage,
}

fn default_mesh_dir() -> PathBuf {
    PathBuf::from("ensemble")
}

fn default_point_cloud_dir() -> PathBuf {
    PathBuf::from("grains")
}

fn default_contact_region_dir() -> PathBuf {
    PathBuf::from("contact_regions")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_mesh_extension() -> String {
    "obj".to_string()
}

fn default_label_checkpoint() -> usize {
    10
}

fn default_louvain_resolution() -> f64 {
    1.0
}

/// Every path a run touches, resolved once.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPaths {
    pub contacts_file: PathBuf,
    pub segmentation_file: Option<PathBuf>,
    pub contact_region_file: Option<PathBuf>,
    pub maxima_file: Option<PathBuf>,
    pub mesh_dir: PathBuf,
    pub point_cloud_dir: PathBuf,
    pub contact_region_dir: PathBuf,
    pub data_dir: PathBuf,
    pub exclusion_file: PathBuf,
    pub label_file: PathBuf,
    pub community_dir: PathBuf,
}

impl Settings {
    /// Settings with every optional field at its default.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            contacts_file: None,
            segmentation_file: None,
            contact_region_file: None,
            maxima_file: None,
            mesh_dir: default_mesh_dir(),
            point_cloud_dir: default_point_cloud_dir(),
            contact_region_dir: default_contact_region_dir(),
            data_dir: default_data_dir(),
            mesh_extension: default_mesh_extension(),
            workers: None,
            noisy: false,
            clean_threshold: None,
            label_checkpoint_every: default_label_checkpoint(),
            louvain_resolution: default_louvain_resolution(),
            stage: Stage::default(),
        }
    }

    /// Relative paths are taken relative to `base_dir`; input files not
    /// given explicitly are discovered there by suffix.
    pub fn paths(&self) -> Result<DataPaths> {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.base_dir.join(p)
            }
        };
        let input = |explicit: &Option<PathBuf>, suffix: &str| -> Result<Option<PathBuf>> {
            match explicit {
                Some(p) => Ok(Some(resolve(p))),
                None => discover(&self.base_dir, suffix),
            }
        };

        let contacts_file = input(&self.contacts_file, CONTACTS_SUFFIX)?.ok_or_else(|| {
            anyhow!(
                "no *{} in {}",
                CONTACTS_SUFFIX,
                self.base_dir.display()
            )
        })?;
        let data_dir = resolve(&self.data_dir);

        Ok(DataPaths {
            contacts_file,
            segmentation_file: input(&self.segmentation_file, SEGMENTATION_SUFFIX)?,
            contact_region_file: input(&self.contact_region_file, CONTACT_REGIONS_SUFFIX)?,
            maxima_file: input(&self.maxima_file, MAXIMA_SUFFIX)?,
            mesh_dir: resolve(&self.mesh_dir),
            point_cloud_dir: resolve(&self.point_cloud_dir),
            contact_region_dir: resolve(&self.contact_region_dir),
            exclusion_file: data_dir.join(EXCLUSION_FILE),
            label_file: data_dir.join(LABEL_FILE),
            community_dir: data_dir.join(COMMUNITY_DIR),
            data_dir,
        })
    }
}

/// First file in `dir` (by name) ending in `suffix`.
fn discover(dir: &Path, suffix: &str) -> Result<Option<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("reading base directory {}", dir.display()))?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(suffix))
        })
        .collect();
    matches.sort();
    Ok(matches.into_iter().next())
}

/// Reads `config_file`, then `GRAINSTAT_*` environment overrides.
pub fn load_config_from(config_file: &Path) -> Result<Settings> {
    let settings = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(Environment::with_prefix("grainstat"))
        .build()
        .with_context(|| format!("loading configuration {}", config_file.display()))?;

    let config: Settings = settings
        .try_deserialize()
        .context("deserializing configuration")?;

    validate_config(&config)?;

    Ok(config)
}

pub fn load_config() -> Result<Settings> {
    let args = CliArgs::parse();

    let config_file = match &args.config {
        Some(file) => file.clone(),
        None => {
            let root = retrieve_project_root()?;
            let default_config_file = root.join("config/default.toml");
            let local_config = root.join("config/local.toml");

            // Check if local config exists, if not use default
            if local_config.exists() {
                local_config
            } else {
                default_config_file
            }
        }
    };
    info!("using configuration {}", config_file.display());

    let mut config = load_config_from(&config_file)?;

    // Command-line arguments override the file
    if let Some(base_dir) = args.base_dir {
        config.base_dir = base_dir;
    }
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if args.noisy {
        config.noisy = true;
    }
    if let Some(ext) = args.mesh_ext {
        config.mesh_extension = ext;
    }
    if let Some(threshold) = args.clean_threshold {
        config.clean_threshold = Some(threshold);
    }
    if let Some(stage) = args.stage {
        config.stage = stage;
    }

    validate_config(&config)?;

    info!("{:#?}", config);

    Ok(config)
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the GRAINSTAT_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("GRAINSTAT_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("locating the executable")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("could not find project root directory"))
}

fn validate_config(config: &Settings) -> Result<()> {
    if config.workers == Some(0) {
        bail!("workers must be at least 1");
    }
    if !matches!(config.mesh_extension.as_str(), "obj" | "vtp") {
        bail!(
            "mesh_extension must be obj or vtp, got {:?}",
            config.mesh_extension
        );
    }
    if config.label_checkpoint_every == 0 {
        bail!("label_checkpoint_every must be at least 1");
    }
    if !(config.louvain_resolution > 0.0) {
        bail!(
            "louvain_resolution must be positive, got {}",
            config.louvain_resolution
        );
    }
    if config.stage == Stage::Clean && config.clean_threshold.is_none() {
        bail!("the clean stage needs clean_threshold");
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "grainstat - contact networks and shape statistics of segmented grains")]
pub struct CliArgs {
    /// Configuration file. Defaults to config/local.toml, then config/default.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the contact, segmentation and region files of one scan.
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Number of worker threads.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Compute statistics for every particle, ignoring the exclusion list.
    #[arg(long)]
    noisy: bool,

    /// Extension of the per-particle surface meshes (obj or vtp).
    #[arg(long)]
    mesh_ext: Option<String>,

    /// Exclude particles with at most this many voxels.
    #[arg(long)]
    clean_threshold: Option<usize>,

    /// Pipeline stage to run.
    #[arg(short, long, value_enum)]
    stage: Option<Stage>,
}
