//! ZFS storage backend client.
//!
//! The chain manager drives ZFS through the [`ZfsBackend`] trait: a small,
//! synchronous command surface covering dataset creation, snapshots, clones,
//! promotion, mount control and listing. [`ZfsCli`] implements it by shelling
//! out to the `zfs` binary; tests implement it in memory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use zcm_common::{InstanceId, ZcmResult};

mod command;
#[cfg(test)]
pub mod mock;

pub use command::ZfsCli;

/// One entry of a dataset listing.
///
/// Listings come back from the backend as open-ended property maps; they are
/// parsed into this fixed-field record once, at the client boundary, and
/// never re-parsed downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Fully-qualified dataset name, e.g. `pool/app/00000001`.
    pub name: String,
    /// Origin snapshot this dataset was cloned from, if any.
    pub origin: Option<String>,
    /// The `mountpoint` property, when it is a path (`none` and `legacy`
    /// map to `None`).
    pub mountpoint: Option<PathBuf>,
    /// Creation time.
    pub creation: DateTime<Utc>,
    /// Space used, in bytes.
    pub used: u64,
}

/// Synchronous ZFS command interface.
///
/// Each method maps to a single `zfs` invocation and relies on that call's
/// own atomicity; there is no transaction spanning multiple calls. Errors
/// surface as [`zcm_common::ZcmError::Backend`] carrying whatever the tool
/// reported.
pub trait ZfsBackend {
    /// Check whether a dataset exists.
    fn exists(&self, name: &str) -> ZcmResult<bool>;

    /// Create the filesystem `<root>/<id>` (creating `root` itself as
    /// needed) with an explicit mountpoint. Returns the new dataset name.
    fn create(&self, id: InstanceId, root: &str, mountpoint: &Path) -> ZcmResult<String>;

    /// Snapshot `source` as `<source>@<id>`. Returns the snapshot name.
    fn snapshot(&self, id: InstanceId, source: &str) -> ZcmResult<String>;

    /// Clone `snapshot` into a new filesystem called `name`.
    fn clone_dataset(&self, name: &str, snapshot: &str) -> ZcmResult<String>;

    /// Promote a cloned filesystem: invert the clone/origin relationship so
    /// `name` owns the snapshots it was created from.
    fn promote(&self, name: &str) -> ZcmResult<()>;

    /// Destroy a filesystem or snapshot, optionally with all descendants.
    fn destroy(&self, name: &str, recursive: bool) -> ZcmResult<()>;

    /// Rename a filesystem or snapshot.
    fn rename(&self, name: &str, new_name: &str) -> ZcmResult<()>;

    /// Mount a filesystem.
    fn mount(&self, name: &str) -> ZcmResult<()>;

    /// Unmount a filesystem. Fails if the mount is busy.
    fn unmount(&self, name: &str) -> ZcmResult<()>;

    /// Set an explicit `mountpoint` property.
    fn set_mountpoint(&self, name: &str, mountpoint: &Path) -> ZcmResult<()>;

    /// Clear the explicit `mountpoint` override so the dataset falls back
    /// to its inherited location.
    fn inherit_mountpoint(&self, name: &str) -> ZcmResult<()>;

    /// Read a single property value.
    fn get_property(&self, name: &str, property: &str) -> ZcmResult<String>;

    /// List filesystems.
    ///
    /// `target` is either a dataset name or a mounted path (leading `/`);
    /// `None` lists everything. A target that resolves to no dataset yields
    /// an empty listing, not an error. The returned order is the backend's
    /// listing order and is treated as a stable total order by the chain.
    fn list(&self, target: Option<&str>, recursive: bool) -> ZcmResult<Vec<Dataset>>;
}
