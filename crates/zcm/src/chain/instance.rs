//! Instance records and chain-order partitioning.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use zcm_common::{InstanceId, ZcmError, ZcmResult};

use crate::zfs::Dataset;

/// One copy-on-write clone in the managed chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Stable hex id, unique within the chain and never reused.
    pub id: InstanceId,
    /// Fully-qualified backing filesystem name.
    pub name: String,
    /// Snapshot this instance was cloned from; `None` for the genesis
    /// instance.
    pub origin: Option<String>,
    /// Id of the instance the origin snapshot was taken on.
    pub origin_id: Option<InstanceId>,
    /// Where the instance is currently mounted. Equals the chain's managed
    /// path iff this instance is active.
    pub mountpoint: PathBuf,
    /// Creation time.
    pub creation: DateTime<Utc>,
    /// Space used, for reporting only.
    pub used: u64,
}

impl Instance {
    /// Build an instance from one backend listing entry.
    ///
    /// # Errors
    ///
    /// Returns [`ZcmError::InvalidState`] if the dataset name or origin
    /// snapshot does not follow the chain naming scheme.
    pub fn from_dataset(dataset: Dataset) -> ZcmResult<Self> {
        let leaf = dataset
            .name
            .rsplit_once('/')
            .map_or(dataset.name.as_str(), |(_, leaf)| leaf);
        let id = InstanceId::parse(leaf)?;

        let origin_id = dataset
            .origin
            .as_deref()
            .map(origin_id_of)
            .transpose()?;
        let mountpoint = dataset.mountpoint.ok_or_else(|| {
            ZcmError::invalid_state(format!("instance {} has no mountpoint", dataset.name))
        })?;

        Ok(Self {
            id,
            name: dataset.name,
            origin: dataset.origin,
            origin_id,
            mountpoint,
            creation: dataset.creation,
            used: dataset.used,
        })
    }
}

/// Extract the parent instance id embedded in a snapshot name.
///
/// A snapshot `pool/app/00000004@00000005` was taken on instance
/// `00000004`; that is the id cloned instances refer back to.
pub fn origin_id_of(snapshot: &str) -> ZcmResult<InstanceId> {
    let leaf = snapshot
        .rsplit_once('/')
        .map_or(snapshot, |(_, leaf)| leaf);
    let (owner, _) = leaf.split_once('@').ok_or_else(|| {
        ZcmError::invalid_state(format!("snapshot name {snapshot:?} has no @ separator"))
    })?;
    InstanceId::parse(owner)
}

/// Split a chain into the ids before and after the active instance, in
/// listing order. With no active instance everything counts as older.
///
/// Recomputed wholesale from a fresh listing on every load; never patched
/// incrementally.
pub fn partition(
    instances: &[Instance],
    active: Option<InstanceId>,
) -> (Vec<InstanceId>, Vec<InstanceId>) {
    let mut older = Vec::new();
    let mut newer = Vec::new();
    let mut seen_active = false;
    for instance in instances {
        if active == Some(instance.id) {
            seen_active = true;
        } else if seen_active {
            newer.push(instance.id);
        } else {
            older.push(instance.id);
        }
    }
    (older, newer)
}
