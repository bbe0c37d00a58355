//! # sl-store
//!
//! Persistence for sweep configurations and registered mounts.
//!
//! The registry writes a [`SweepConfig`] back on every externally observable
//! state change and rebuilds sweeps from it after a restart, so every backend
//! stores whole records keyed by sweep id.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use sl_types::{MountConfig, SlResult, SweepConfig};

/// Storage for sweep configurations and mounts.
///
/// Methods take `&self` so a store can be shared between the controller and
/// whatever submits requests to it.
pub trait ConfigStore {
    fn get_sweep(&self, sweep_id: &str) -> SlResult<Option<SweepConfig>>;

    /// All stored sweeps, ordered by id.
    fn list_sweeps(&self) -> SlResult<Vec<SweepConfig>>;

    /// Insert or replace.
    fn put_sweep(&self, config: &SweepConfig) -> SlResult<()>;

    /// Returns whether a record was removed.
    fn delete_sweep(&self, sweep_id: &str) -> SlResult<bool>;

    fn get_mount(&self, name: &str) -> SlResult<Option<MountConfig>>;

    fn put_mount(&self, mount: &MountConfig) -> SlResult<()>;

    fn list_mounts(&self) -> SlResult<Vec<MountConfig>>;
}

/// Default on-disk location for the file store.
pub fn default_store_root() -> std::path::PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("sweepline")
}
