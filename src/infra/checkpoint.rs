// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// File naming (the recorder appends its own extension):
//
//   snap/pretrain/
//     Epoch01_LXRT.mpk          ← weights after epoch 1
//     Epoch02_LXRT.mpk
//     ...
//     BEST_EVAL_LOSS_LXRT.mpk   ← lowest validation loss so far
//     latest_epoch.json         ← number of the last epoch saved
//     train_config.json         ← resolved run configuration
//
// Every epoch end writes its own checkpoint. The best checkpoint
// is rewritten only when validation loss improves on every
// earlier epoch (BestTracker).
//
// I/O failures surface to the caller with the file path; there
// is no retry.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::Serialize;
use std::{fs, path::{Path, PathBuf}};

/// Starting value of the running best validation loss
pub const INITIAL_BEST_LOSS: f64 = 9595.0;

/// Which checkpoint file a save targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    /// End of the given epoch (1-based)
    Epoch(usize),
    /// Lowest validation loss so far
    Best,
}

impl CheckpointTag {
    /// File name without the recorder's extension
    pub fn file_stem(&self) -> String {
        match self {
            CheckpointTag::Epoch(n) => format!("Epoch{n:02}_LXRT"),
            CheckpointTag::Best     => "BEST_EVAL_LOSS_LXRT".to_string(),
        }
    }
}

// ─── BestTracker ──────────────────────────────────────────────────────────────
/// Running best validation loss and the save decision per epoch.
#[derive(Debug, Clone)]
pub struct BestTracker {
    best: f64,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self { best: INITIAL_BEST_LOSS }
    }
}

impl BestTracker {
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Record an epoch's validation loss and return the checkpoints
    /// to write: Best first when the loss improved, then the epoch.
    /// A NaN loss never counts as an improvement.
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> Vec<CheckpointTag> {
        let mut tags = Vec::with_capacity(2);
        if val_loss < self.best {
            self.best = val_loss;
            tags.push(CheckpointTag::Best);
        }
        tags.push(CheckpointTag::Epoch(epoch));
        tags
    }
}

// ─── CheckpointManager ────────────────────────────────────────────────────────
/// Manages saving and loading of model checkpoints.
/// All files are stored in the configured directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager and its directory (like `mkdir -p`)
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a tagged checkpoint, without extension
    pub fn path_for(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(tag.file_stem())
    }

    /// Save model weights under `tag`.
    ///
    /// Epoch saves also update latest_epoch.json.
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, tag: CheckpointTag) -> Result<()> {
        let path = self.path_for(tag);
        Recorder::<B>::record(&CompactRecorder::new(), model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        if let CheckpointTag::Epoch(epoch) = tag {
            let latest_path = self.dir.join("latest_epoch.json");
            fs::write(&latest_path, serde_json::to_string(&epoch)?)
                .with_context(|| format!("Failed to write '{}'", latest_path.display()))?;
        }

        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(())
    }

    /// Save the resolved run configuration as train_config.json
    pub fn save_config<C: Serialize>(&self, cfg: &C) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Number of the last epoch checkpoint written, if any
    pub fn latest_epoch(&self) -> Result<Option<usize>> {
        let path = self.dir.join("latest_epoch.json");
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(Some(serde_json::from_str::<usize>(&s)?))
    }
}

/// Restore weights saved as `<prefix>_LXRT` (e.g. `snap/pretrain/Epoch03`).
///
/// The model must have the same architecture as the one saved.
pub fn load_model<B: Backend, M: Module<B>>(model: M, prefix: &str, device: &B::Device) -> Result<M> {
    let record = load_record::<B, M>(prefix, device)?;
    Ok(model.load_record(record))
}

/// Read the record saved as `<prefix>_LXRT` without applying it, so the
/// caller can swap out parts of it first.
pub fn load_record<B: Backend, M: Module<B>>(prefix: &str, device: &B::Device) -> Result<M::Record> {
    let path = PathBuf::from(format!("{prefix}_LXRT"));
    tracing::info!("Loading weights from '{}'", path.display());
    Recorder::<B>::load(&CompactRecorder::new(), path.clone(), device)
        .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))
}
