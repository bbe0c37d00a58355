use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sl_types::{MountConfig, SlError, SlResult, StoreError, SweepConfig};

use crate::ConfigStore;

/// JSON files on disk: one file per sweep under `sweeps/`, plus a single
/// `mounts.json` map.
///
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> SlResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("sweeps"))?;
        tracing::debug!("Opened config store at {}", root.display());

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sweep_path(&self, sweep_id: &str) -> SlResult<PathBuf> {
        let safe = !sweep_id.is_empty()
            && sweep_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::Backend {
                message: format!("'{sweep_id}' is not a valid sweep id"),
            }
            .into());
        }
        Ok(self.root.join("sweeps").join(format!("{sweep_id}.json")))
    }

    fn mounts_path(&self) -> PathBuf {
        self.root.join("mounts.json")
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> SlResult<Option<T>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> SlResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_mounts(&self) -> SlResult<BTreeMap<String, MountConfig>> {
        Ok(Self::read_json(&self.mounts_path())?.unwrap_or_default())
    }
}

impl ConfigStore for JsonFileStore {
    fn get_sweep(&self, sweep_id: &str) -> SlResult<Option<SweepConfig>> {
        Self::read_json(&self.sweep_path(sweep_id)?)
    }

    fn list_sweeps(&self) -> SlResult<Vec<SweepConfig>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(self.root.join("sweeps"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        // A corrupt record must not hide the healthy ones; `get_sweep` still
        // reports it.
        let mut sweeps = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read_json::<SweepConfig>(&path) {
                Ok(Some(config)) => sweeps.push(config),
                Ok(None) => {}
                Err(SlError::Store(StoreError::Corrupt { key, message })) => {
                    tracing::warn!(path = %key, error = %message, "skipping corrupt sweep record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sweeps)
    }

    fn put_sweep(&self, config: &SweepConfig) -> SlResult<()> {
        let path = self.sweep_path(&config.sweep_id)?;
        let _guard = self.write_lock.lock();
        Self::write_json(&path, config)?;
        tracing::debug!(sweep_id = %config.sweep_id, stage = %config.stage, "stored sweep config");
        Ok(())
    }

    fn delete_sweep(&self, sweep_id: &str) -> SlResult<bool> {
        let path = self.sweep_path(sweep_id)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get_mount(&self, name: &str) -> SlResult<Option<MountConfig>> {
        Ok(self.read_mounts()?.remove(name))
    }

    fn put_mount(&self, mount: &MountConfig) -> SlResult<()> {
        let _guard = self.write_lock.lock();
        let mut mounts = self.read_mounts()?;
        mounts.insert(mount.name.clone(), mount.clone());
        Self::write_json(&self.mounts_path(), &mounts)
    }

    fn list_mounts(&self) -> SlResult<Vec<MountConfig>> {
        Ok(self.read_mounts()?.into_values().collect())
    }
}
