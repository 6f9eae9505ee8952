//! Prediction and trajectory persistence.
//!
//! `preds.json` maps instance id to its prediction and is shared by every
//! worker, so all read-modify-write cycles go through [`PredStore`]'s lock.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use react_agent::io::trajectory::{Trajectory, write_json};

pub const PREDS_FILE: &str = "preds.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prediction {
    pub model_name_or_path: String,
    pub instance_id: String,
    pub model_patch: String,
}

pub type Predictions = BTreeMap<String, Prediction>;

/// Serialized access to `<output>/preds.json`.
pub struct PredStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PredStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(PREDS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop any prediction left from an earlier run of `instance_id`.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub fn remove(&self, instance_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut preds = read_predictions(&self.path)?;
        if preds.remove(instance_id).is_some() {
            debug!("removed stale prediction");
            write_json(&self.path, &preds)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(instance_id = %prediction.instance_id))]
    pub fn update(&self, prediction: Prediction) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut preds = read_predictions(&self.path)?;
        preds.insert(prediction.instance_id.clone(), prediction);
        write_json(&self.path, &preds)
    }
}

/// Read `preds.json`; a missing file is an empty map.
pub fn read_predictions(path: &Path) -> Result<Predictions> {
    if !path.exists() {
        return Ok(Predictions::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Counts over a predictions file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PredSummary {
    pub total: usize,
    /// Entries whose patch is a git diff.
    pub with_diff: usize,
    pub empty: usize,
}

pub fn summarize(preds: &Predictions) -> PredSummary {
    let mut summary = PredSummary::default();
    for pred in preds.values() {
        summary.total += 1;
        if pred.model_patch.trim().is_empty() {
            summary.empty += 1;
        } else if pred.model_patch.starts_with("diff --git") {
            summary.with_diff += 1;
        }
    }
    summary
}

/// Per-instance trajectory file, written whether or not the run succeeded.
#[derive(Debug, Serialize)]
pub struct TrajectoryRecord<'a> {
    pub instance_id: &'a str,
    /// Absent when the agent could not be built.
    pub trajectory: Option<&'a Trajectory>,
    pub result: &'a str,
    /// Failure that ended the run early, if any.
    pub error: Option<String>,
}

pub fn trajectory_path(output_dir: &Path, instance_id: &str) -> PathBuf {
    output_dir
        .join(instance_id)
        .join(format!("{instance_id}.traj.json"))
}

pub fn remove_trajectory(output_dir: &Path, instance_id: &str) -> Result<()> {
    let path = trajectory_path(output_dir, instance_id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

pub fn write_trajectory(output_dir: &Path, record: &TrajectoryRecord<'_>) -> Result<PathBuf> {
    let path = trajectory_path(output_dir, record.instance_id);
    write_json(&path, record)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn prediction(id: &str, patch: &str) -> Prediction {
        Prediction {
            model_name_or_path: "gpt-5-mini".to_string(),
            instance_id: id.to_string(),
            model_patch: patch.to_string(),
        }
    }

    #[test]
    fn update_and_remove_keep_other_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = PredStore::new(temp.path());

        store.update(prediction("a", "diff a")).expect("update a");
        store.update(prediction("b", "diff b")).expect("update b");
        store.update(prediction("a", "diff a2")).expect("update a again");
        store.remove("b").expect("remove b");
        store.remove("missing").expect("remove missing");

        let preds = read_predictions(store.path()).expect("read");
        assert_eq!(preds.len(), 1);
        assert_eq!(preds["a"].model_patch, "diff a2");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).expect("read")).expect("json");
        assert_eq!(raw["a"]["instance_id"], "a");
        assert_eq!(raw["a"]["model_name_or_path"], "gpt-5-mini");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(PredStore::new(temp.path()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .update(prediction(&format!("id-{i}"), "p"))
                        .expect("update");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(read_predictions(store.path()).expect("read").len(), 8);
    }

    #[test]
    fn summary_separates_diffs_from_notes() {
        let mut preds = Predictions::new();
        for (id, patch) in [
            ("a", "diff --git a/x b/x\n"),
            ("b", ""),
            ("c", "done\n\nNo changes detected to generate a patch."),
        ] {
            preds.insert(id.to_string(), prediction(id, patch));
        }
        assert_eq!(
            summarize(&preds),
            PredSummary {
                total: 3,
                with_diff: 1,
                empty: 1,
            }
        );
    }

    #[test]
    fn trajectory_record_lands_under_instance_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let record = TrajectoryRecord {
            instance_id: "x-1",
            trajectory: None,
            result: "",
            error: Some("model call failed".to_string()),
        };
        let path = write_trajectory(temp.path(), &record).expect("write");
        assert_eq!(path, temp.path().join("x-1").join("x-1.traj.json"));

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["instance_id"], "x-1");
        assert!(value["trajectory"].is_null());

        remove_trajectory(temp.path(), "x-1").expect("remove");
        assert!(!path.exists());
        remove_trajectory(temp.path(), "x-1").expect("remove again");
    }
}
