//! Manual segmentation labels with periodic checkpoints.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::contact::ParticleId;
use crate::error::{Result, StatsError};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Label {
    #[default]
    Unlabeled,
    CorrectSegmentation,
    IncorrectSegmentation,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Unlabeled => "Unlabeled",
            Label::CorrectSegmentation => "CorrectSegmentation",
            Label::IncorrectSegmentation => "IncorrectSegmentation",
        }
    }
}

/// Labels keyed by particle, flushed to disk every `checkpoint_every`
/// mutations so a crash loses at most that many edits.
#[derive(Debug)]
pub struct LabelStore {
    path: PathBuf,
    labels: BTreeMap<ParticleId, Label>,
    checkpoint_every: usize,
    pending: usize,
}

impl LabelStore {
    /// Opens the store at `path`, creating an empty one if absent.
    pub fn open(path: &Path, checkpoint_every: usize) -> Result<Self> {
        let labels = if path.is_file() {
            let text = fs::read_to_string(path).map_err(|e| StatsError::io(path, e))?;
            serde_json::from_str(&text).map_err(|e| StatsError::format(path, e.to_string()))?
        } else {
            BTreeMap::new()
        };
        let store = Self {
            path: path.to_path_buf(),
            labels,
            checkpoint_every: checkpoint_every.max(1),
            pending: 0,
        };
        if !path.is_file() {
            store.save()?;
        }
        info!("{} labels in {}", store.labels.len(), path.display());
        Ok(store)
    }

    /// Unlabeled when never set.
    pub fn label(&self, particle: ParticleId) -> Label {
        self.labels.get(&particle).copied().unwrap_or_default()
    }

    pub fn set(&mut self, particle: ParticleId, label: Label) -> Result<()> {
        self.labels.insert(particle, label);
        self.pending += 1;
        if self.pending >= self.checkpoint_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Copy of the current labels.
    pub fn snapshot(&self) -> BTreeMap<ParticleId, Label> {
        self.labels.clone()
    }

    pub fn particles_with(&self, label: Label) -> Vec<ParticleId> {
        self.labels
            .iter()
            .filter(|(_, &l)| l == label)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Mutations not yet on disk.
    pub fn pending(&self) -> usize {
        self.pending
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StatsError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(&self.labels)
            .map_err(|e| StatsError::format(&self.path, e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| StatsError::io(&self.path, e))?;
        debug!("checkpointed {} labels to {}", self.labels.len(), self.path.display());
        Ok(())
    }

    /// Writes everything now.
    pub fn flush(&mut self) -> Result<()> {
        self.save()?;
        self.pending = 0;
        Ok(())
    }
}
