use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use sl_types::{MountConfig, SlResult, SweepConfig};

use crate::ConfigStore;

#[derive(Debug, Default)]
struct Tables {
    sweeps: BTreeMap<String, SweepConfig>,
    mounts: BTreeMap<String, MountConfig>,
}

/// In-process store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get_sweep(&self, sweep_id: &str) -> SlResult<Option<SweepConfig>> {
        Ok(self.tables.read().sweeps.get(sweep_id).cloned())
    }

    fn list_sweeps(&self) -> SlResult<Vec<SweepConfig>> {
        Ok(self.tables.read().sweeps.values().cloned().collect())
    }

    fn put_sweep(&self, config: &SweepConfig) -> SlResult<()> {
        self.tables
            .write()
            .sweeps
            .insert(config.sweep_id.clone(), config.clone());
        Ok(())
    }

    fn delete_sweep(&self, sweep_id: &str) -> SlResult<bool> {
        Ok(self.tables.write().sweeps.remove(sweep_id).is_some())
    }

    fn get_mount(&self, name: &str) -> SlResult<Option<MountConfig>> {
        Ok(self.tables.read().mounts.get(name).cloned())
    }

    fn put_mount(&self, mount: &MountConfig) -> SlResult<()> {
        self.tables
            .write()
            .mounts
            .insert(mount.name.clone(), mount.clone());
        Ok(())
    }

    fn list_mounts(&self) -> SlResult<Vec<MountConfig>> {
        Ok(self.tables.read().mounts.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::Distribution;

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();

        let config = SweepConfig::new("a", "train.py", 2)
            .with_distribution("x", Distribution::uniform(0.0, 1.0));
        store.put_sweep(&config).unwrap();

        assert_eq!(other.get_sweep("a").unwrap(), Some(config));
        assert_eq!(other.list_sweeps().unwrap().len(), 1);
        assert!(other.delete_sweep("a").unwrap());
        assert!(!store.delete_sweep("a").unwrap());
    }

    #[test]
    fn mounts_are_keyed_by_name() {
        let store = MemoryStore::new();
        store
            .put_mount(&MountConfig {
                name: "a/".into(),
                source: "s3://a/".into(),
                mount_path: "/data/a/".into(),
            })
            .unwrap();
        assert!(store.get_mount("a/").unwrap().is_some());
        assert!(store.get_mount("b/").unwrap().is_none());
        assert_eq!(store.list_mounts().unwrap().len(), 1);
    }
}
