//! Parameter snapshots and the sinks that persist them.
//!
//! A snapshot is a detached copy of every variable in a [`VarMap`], keyed by
//! the same dotted names the model registered (`encoder.conv1.weight`, ...).
//! Files are plain safetensors, so a checkpoint can be restored with
//! [`load_checkpoint`] or with `VarMap::load` directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::MutexGuard;

use candle_core::{Tensor, Var};
use candle_nn::VarMap;

use crate::error::{Result, VaeError};

/// Named copy of all trainable parameters at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ParameterSnapshot {
    tensors: HashMap<String, Tensor>,
}

impl ParameterSnapshot {
    /// Copies every variable currently held by `varmap`.
    pub fn capture(varmap: &VarMap) -> Result<Self> {
        let data = lock_parameters(varmap)?;
        let tensors = data
            .iter()
            .map(|(name, var)| -> Result<(String, Tensor)> {
                Ok((name.clone(), var.as_tensor().copy()?))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { tensors })
    }

    /// Writes the snapshot back into `varmap`.
    ///
    /// Every variable in `varmap` must have a counterpart of the same shape.
    pub fn restore(&self, varmap: &VarMap) -> Result<()> {
        let data = lock_parameters(varmap)?;
        for (name, var) in data.iter() {
            let saved = self.tensors.get(name).ok_or_else(|| {
                VaeError::Checkpoint(format!("snapshot has no tensor named {name}"))
            })?;
            if saved.dims() != var.dims() {
                return Err(VaeError::shape_mismatch(
                    format!("restoring {name}"),
                    saved.dims(),
                    var.dims(),
                ));
            }
            var.set(saved)?;
        }
        Ok(())
    }

    /// Writes the snapshot to a safetensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        candle_core::safetensors::save(&self.tensors, path)?;
        Ok(())
    }

    /// Number of named tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensor stored under `name`.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Sorted tensor names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Locks the named variables of `varmap`.
pub(crate) fn lock_parameters(varmap: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|_| VaeError::ParameterStore("lock poisoned by a panicking holder".into()))
}

/// Destination for best-validation snapshots.
///
/// Each call overwrites whatever an earlier call stored at `destination`.
pub trait CheckpointSink {
    /// Persists `snapshot`.
    fn persist(&mut self, snapshot: &ParameterSnapshot, destination: &Path) -> Result<()>;
}

/// Writes snapshots as safetensors files, creating parent directories on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsSink;

impl CheckpointSink for SafetensorsSink {
    fn persist(&mut self, snapshot: &ParameterSnapshot, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        snapshot.save(destination)
    }
}

/// Keeps the most recent snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Last persisted snapshot.
    pub latest: Option<ParameterSnapshot>,
    /// Destination passed with the last snapshot.
    pub destination: Option<PathBuf>,
    /// Number of `persist` calls so far.
    pub writes: usize,
}

impl CheckpointSink for MemorySink {
    fn persist(&mut self, snapshot: &ParameterSnapshot, destination: &Path) -> Result<()> {
        self.latest = Some(snapshot.clone());
        self.destination = Some(destination.to_path_buf());
        self.writes += 1;
        Ok(())
    }
}

/// Restores every variable of `varmap` from a safetensors checkpoint.
///
/// The variables must already exist, i.e. the model has to be constructed
/// over `varmap` before the call.
pub fn load_checkpoint(varmap: &mut VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(VaeError::Checkpoint(format!(
            "checkpoint {} does not exist",
            path.display()
        )));
    }
    varmap.load(path)?;
    tracing::info!(path = %path.display(), "Loaded checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    fn store() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        vb.get_with_hints((2, 3), "a.weight", Init::Const(1.0)).unwrap();
        vb.get_with_hints(3, "a.bias", Init::Const(0.5)).unwrap();
        varmap
    }

    fn overwrite(varmap: &VarMap, value: f32) {
        for var in varmap.all_vars() {
            let t = Tensor::full(value, var.dims(), &Device::Cpu).unwrap();
            var.set(&t).unwrap();
        }
    }

    #[test]
    fn test_capture_and_restore() {
        let varmap = store();
        let snapshot = ParameterSnapshot::capture(&varmap).unwrap();
        assert_eq!(snapshot.names(), vec!["a.bias", "a.weight"]);

        overwrite(&varmap, 9.0);
        snapshot.restore(&varmap).unwrap();

        let data = varmap.data().lock().unwrap();
        let bias: Vec<f32> = data["a.bias"].as_tensor().to_vec1().unwrap();
        assert_eq!(bias, vec![0.5; 3]);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_updates() {
        let varmap = store();
        let snapshot = ParameterSnapshot::capture(&varmap).unwrap();
        overwrite(&varmap, -1.0);
        let weight: Vec<Vec<f32>> = snapshot.get("a.weight").unwrap().to_vec2().unwrap();
        assert_eq!(weight, vec![vec![1.0; 3]; 2]);
    }

    #[test]
    fn test_restore_requires_every_name() {
        let varmap = store();
        let empty = ParameterSnapshot::default();
        assert!(matches!(
            empty.restore(&varmap),
            Err(VaeError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_memory_sink_keeps_latest() {
        let varmap = store();
        let mut sink = MemorySink::default();
        let first = ParameterSnapshot::capture(&varmap).unwrap();
        sink.persist(&first, Path::new("best.safetensors")).unwrap();
        overwrite(&varmap, 2.0);
        let second = ParameterSnapshot::capture(&varmap).unwrap();
        sink.persist(&second, Path::new("best.safetensors")).unwrap();

        assert_eq!(sink.writes, 2);
        let latest = sink.latest.unwrap();
        let bias: Vec<f32> = latest.get("a.bias").unwrap().to_vec1().unwrap();
        assert_eq!(bias, vec![2.0; 3]);
    }

    #[test]
    fn test_poisoned_store_is_reported() {
        let varmap = store();
        let shared = varmap.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.data().lock().unwrap();
            panic!("holder died");
        })
        .join();
        assert!(matches!(
            ParameterSnapshot::capture(&varmap),
            Err(VaeError::ParameterStore(_))
        ));
    }

    #[test]
    fn test_load_missing_checkpoint_fails() {
        let mut varmap = store();
        let err = load_checkpoint(&mut varmap, "/nonexistent/dir/vae.safetensors");
        assert!(matches!(err, Err(VaeError::Checkpoint(_))));
    }
}
