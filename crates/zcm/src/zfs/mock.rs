//! In-memory ZFS model for tests.
//!
//! Models the subset of ZFS behavior the chain depends on: dataset
//! namespaces, explicit vs inherited mountpoints, clone origins, and
//! `promote`'s snapshot hand-over. Clones of a [`MockZfs`] share state, so a
//! test can keep a handle for inspection while the chain owns another.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use zcm_common::{InstanceId, ZcmError, ZcmResult};

use super::{Dataset, ZfsBackend};

const EPOCH: i64 = 1_600_000_000;

#[derive(Debug, Clone)]
struct MockFs {
    name: String,
    origin: Option<String>,
    /// Explicit `mountpoint` property; `None` means inherited.
    mountpoint: Option<PathBuf>,
    mounted: bool,
    creation: DateTime<Utc>,
    used: u64,
}

#[derive(Debug, Default)]
struct MockState {
    filesystems: Vec<MockFs>,
    snapshots: Vec<String>,
    fail_unmount: HashSet<String>,
    clock: i64,
}

/// Shared-state in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MockZfs {
    state: Rc<RefCell<MockState>>,
}

impl MockZfs {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent unmounts of `name` fail as if the device were busy.
    pub fn fail_unmount(&self, name: &str) {
        self.state.borrow_mut().fail_unmount.insert(name.to_string());
    }

    /// All filesystem names, sorted.
    #[must_use]
    pub fn filesystem_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .borrow()
            .filesystems
            .iter()
            .map(|fs| fs.name.clone())
            .collect();
        names.sort();
        names
    }

    /// All snapshot names, sorted.
    #[must_use]
    pub fn snapshot_names(&self) -> Vec<String> {
        let mut names = self.state.borrow().snapshots.clone();
        names.sort();
        names
    }

    /// Whether a filesystem is currently mounted.
    #[must_use]
    pub fn is_mounted(&self, name: &str) -> bool {
        self.state
            .borrow()
            .filesystems
            .iter()
            .any(|fs| fs.name == name && fs.mounted)
    }

    /// The origin snapshot of a filesystem.
    #[must_use]
    pub fn origin_of(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .filesystems
            .iter()
            .find(|fs| fs.name == name)
            .and_then(|fs| fs.origin.clone())
    }

    fn now(state: &mut MockState) -> DateTime<Utc> {
        state.clock += 1;
        Utc.timestamp_opt(EPOCH + state.clock, 0).unwrap()
    }

    fn effective_mountpoint(state: &MockState, name: &str) -> PathBuf {
        if let Some(fs) = state.filesystems.iter().find(|fs| fs.name == name) {
            if let Some(mp) = &fs.mountpoint {
                return mp.clone();
            }
        }
        match name.rsplit_once('/') {
            Some((parent, leaf)) => Self::effective_mountpoint(state, parent).join(leaf),
            // Pool default: /<name>
            None => PathBuf::from(format!("/{name}")),
        }
    }

    fn to_dataset(state: &MockState, fs: &MockFs) -> Dataset {
        Dataset {
            name: fs.name.clone(),
            origin: fs.origin.clone(),
            mountpoint: Some(Self::effective_mountpoint(state, &fs.name)),
            creation: fs.creation,
            used: fs.used,
        }
    }
}

impl ZfsBackend for MockZfs {
    fn exists(&self, name: &str) -> ZcmResult<bool> {
        Ok(self
            .state
            .borrow()
            .filesystems
            .iter()
            .any(|fs| fs.name == name))
    }

    fn create(&self, id: InstanceId, root: &str, mountpoint: &Path) -> ZcmResult<String> {
        let mut state = self.state.borrow_mut();
        let name = format!("{root}/{id}");
        if state.filesystems.iter().any(|fs| fs.name == name) {
            return Err(ZcmError::backend(format!("dataset {name} already exists")));
        }
        if !state.filesystems.iter().any(|fs| fs.name == root) {
            let creation = Self::now(&mut state);
            state.filesystems.push(MockFs {
                name: root.to_string(),
                origin: None,
                mountpoint: None,
                mounted: true,
                creation,
                used: 4096,
            });
        }
        let creation = Self::now(&mut state);
        state.filesystems.push(MockFs {
            name: name.clone(),
            origin: None,
            mountpoint: Some(mountpoint.to_path_buf()),
            mounted: true,
            creation,
            used: 1024,
        });
        Ok(name)
    }

    fn snapshot(&self, id: InstanceId, source: &str) -> ZcmResult<String> {
        let mut state = self.state.borrow_mut();
        if !state.filesystems.iter().any(|fs| fs.name == source) {
            return Err(ZcmError::backend(format!("dataset {source} does not exist")));
        }
        let name = format!("{source}@{id}");
        if state.snapshots.contains(&name) {
            return Err(ZcmError::backend(format!("snapshot {name} already exists")));
        }
        state.snapshots.push(name.clone());
        Ok(name)
    }

    fn clone_dataset(&self, name: &str, snapshot: &str) -> ZcmResult<String> {
        let mut state = self.state.borrow_mut();
        if !state.snapshots.contains(&snapshot.to_string()) {
            return Err(ZcmError::backend(format!(
                "snapshot {snapshot} does not exist"
            )));
        }
        if state.filesystems.iter().any(|fs| fs.name == name) {
            return Err(ZcmError::backend(format!("dataset {name} already exists")));
        }
        let creation = Self::now(&mut state);
        state.filesystems.push(MockFs {
            name: name.to_string(),
            origin: Some(snapshot.to_string()),
            mountpoint: None,
            mounted: true,
            creation,
            used: 1024,
        });
        Ok(name.to_string())
    }

    fn promote(&self, name: &str) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        let clone_origin = state
            .filesystems
            .iter()
            .find(|fs| fs.name == name)
            .ok_or_else(|| ZcmError::backend(format!("dataset {name} does not exist")))?
            .origin
            .clone()
            .ok_or_else(|| ZcmError::backend(format!("{name} is not a clone")))?;

        let (parent, origin_snap) = clone_origin
            .split_once('@')
            .map(|(p, s)| (p.to_string(), s.to_string()))
            .ok_or_else(|| ZcmError::backend(format!("bad origin {clone_origin}")))?;
        let pivot = u32::from_str_radix(&origin_snap, 16)
            .map_err(|_| ZcmError::backend(format!("bad snapshot name {clone_origin}")))?;

        // Snapshots of the former parent up to and including the clone's
        // origin snapshot move over to the promoted clone.
        let mut moved = Vec::new();
        for snap in &mut state.snapshots {
            if let Some(tag) = snap.strip_prefix(&format!("{parent}@")) {
                if u32::from_str_radix(tag, 16).is_ok_and(|v| v <= pivot) {
                    let renamed = format!("{name}@{tag}");
                    moved.push((snap.clone(), renamed.clone()));
                    *snap = renamed;
                }
            }
        }

        let parent_origin = state
            .filesystems
            .iter()
            .find(|fs| fs.name == parent)
            .and_then(|fs| fs.origin.clone());

        for fs in &mut state.filesystems {
            if let Some(origin) = &fs.origin {
                if let Some((_, renamed)) = moved.iter().find(|(old, _)| old == origin) {
                    fs.origin = Some(renamed.clone());
                }
            }
        }
        for fs in &mut state.filesystems {
            if fs.name == name {
                // The promoted clone takes over its former parent's origin.
                fs.origin = parent_origin.clone();
            } else if fs.name == parent {
                fs.origin = Some(format!("{name}@{origin_snap}"));
            }
        }
        Ok(())
    }

    fn destroy(&self, name: &str, recursive: bool) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        if name.contains('@') {
            if state
                .filesystems
                .iter()
                .any(|fs| fs.origin.as_deref() == Some(name))
            {
                return Err(ZcmError::backend(format!(
                    "snapshot {name} has dependent clones"
                )));
            }
            let before = state.snapshots.len();
            state.snapshots.retain(|s| s != name);
            if state.snapshots.len() == before {
                return Err(ZcmError::backend(format!("snapshot {name} does not exist")));
            }
            return Ok(());
        }

        if !state.filesystems.iter().any(|fs| fs.name == name) {
            return Err(ZcmError::backend(format!("dataset {name} does not exist")));
        }
        let child_prefix = format!("{name}/");
        let snap_prefix = format!("{name}@");
        if recursive {
            state.filesystems.retain(|fs| {
                fs.name != name && !fs.name.starts_with(&child_prefix)
            });
            state
                .snapshots
                .retain(|s| !s.starts_with(&snap_prefix) && !s.starts_with(&child_prefix));
        } else {
            if state
                .filesystems
                .iter()
                .any(|fs| fs.name.starts_with(&child_prefix))
            {
                return Err(ZcmError::backend(format!("{name} has children")));
            }
            if state.snapshots.iter().any(|s| s.starts_with(&snap_prefix)) {
                return Err(ZcmError::backend(format!("{name} has snapshots")));
            }
            state.filesystems.retain(|fs| fs.name != name);
        }
        Ok(())
    }

    fn rename(&self, name: &str, new_name: &str) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        let fs = state
            .filesystems
            .iter_mut()
            .find(|fs| fs.name == name)
            .ok_or_else(|| ZcmError::backend(format!("dataset {name} does not exist")))?;
        fs.name = new_name.to_string();
        Ok(())
    }

    fn mount(&self, name: &str) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(fs) = state.filesystems.iter_mut().find(|fs| fs.name == name) {
            fs.mounted = true;
            Ok(())
        } else {
            Err(ZcmError::backend(format!("dataset {name} does not exist")))
        }
    }

    fn unmount(&self, name: &str) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_unmount.contains(name) {
            return Err(ZcmError::backend(format!("cannot unmount {name}: device busy")));
        }
        if let Some(fs) = state.filesystems.iter_mut().find(|fs| fs.name == name) {
            fs.mounted = false;
            Ok(())
        } else {
            Err(ZcmError::backend(format!("dataset {name} does not exist")))
        }
    }

    fn set_mountpoint(&self, name: &str, mountpoint: &Path) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        let fs = state
            .filesystems
            .iter_mut()
            .find(|fs| fs.name == name)
            .ok_or_else(|| ZcmError::backend(format!("dataset {name} does not exist")))?;
        fs.mountpoint = Some(mountpoint.to_path_buf());
        Ok(())
    }

    fn inherit_mountpoint(&self, name: &str) -> ZcmResult<()> {
        let mut state = self.state.borrow_mut();
        let fs = state
            .filesystems
            .iter_mut()
            .find(|fs| fs.name == name)
            .ok_or_else(|| ZcmError::backend(format!("dataset {name} does not exist")))?;
        fs.mountpoint = None;
        Ok(())
    }

    fn get_property(&self, name: &str, property: &str) -> ZcmResult<String> {
        let state = self.state.borrow();
        let fs = state
            .filesystems
            .iter()
            .find(|fs| fs.name == name)
            .ok_or_else(|| ZcmError::backend(format!("dataset {name} does not exist")))?;
        match property {
            "mountpoint" => Ok(Self::effective_mountpoint(&state, name)
                .display()
                .to_string()),
            "mounted" => Ok(if fs.mounted { "yes" } else { "no" }.to_string()),
            "origin" => Ok(fs.origin.clone().unwrap_or_else(|| "-".to_string())),
            "used" => Ok(fs.used.to_string()),
            _ => Err(ZcmError::backend(format!("unknown property {property}"))),
        }
    }

    fn list(&self, target: Option<&str>, recursive: bool) -> ZcmResult<Vec<Dataset>> {
        let state = self.state.borrow();
        let mut matched: Vec<&MockFs> = match target {
            None => state.filesystems.iter().collect(),
            Some(path) if path.starts_with('/') => {
                let path = Path::new(path);
                state
                    .filesystems
                    .iter()
                    .filter(|fs| Self::effective_mountpoint(&state, &fs.name) == path)
                    .collect()
            }
            Some(name) => {
                let child_prefix = format!("{name}/");
                state
                    .filesystems
                    .iter()
                    .filter(|fs| {
                        fs.name == name || (recursive && fs.name.starts_with(&child_prefix))
                    })
                    .collect()
            }
        };
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched
            .into_iter()
            .map(|fs| Self::to_dataset(&state, fs))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherited_mountpoints_follow_parent() {
        let zfs = MockZfs::new();
        zfs.create(InstanceId::GENESIS, "pool/app", Path::new("/srv/app"))
            .unwrap();
        zfs.set_mountpoint("pool/app", Path::new("/srv/app/.clones"))
            .unwrap();
        let snap = zfs.snapshot(InstanceId::new(1), "pool/app/00000000").unwrap();
        zfs.clone_dataset("pool/app/00000001", &snap).unwrap();

        let listing = zfs.list(Some("pool/app"), true).unwrap();
        let clone = listing
            .iter()
            .find(|ds| ds.name == "pool/app/00000001")
            .unwrap();
        assert_eq!(
            clone.mountpoint.as_deref(),
            Some(Path::new("/srv/app/.clones/00000001"))
        );
    }

    #[test]
    fn promote_hands_over_snapshots_and_origins() {
        let zfs = MockZfs::new();
        zfs.create(InstanceId::GENESIS, "pool/app", Path::new("/srv/app"))
            .unwrap();
        // Two clones of the genesis instance.
        let s1 = zfs.snapshot(InstanceId::new(1), "pool/app/00000000").unwrap();
        zfs.clone_dataset("pool/app/00000001", &s1).unwrap();
        let s2 = zfs.snapshot(InstanceId::new(2), "pool/app/00000000").unwrap();
        zfs.clone_dataset("pool/app/00000002", &s2).unwrap();

        zfs.promote("pool/app/00000002").unwrap();

        // Both snapshots moved to the promoted clone.
        assert_eq!(
            zfs.snapshot_names(),
            vec![
                "pool/app/00000002@00000001".to_string(),
                "pool/app/00000002@00000002".to_string(),
            ]
        );
        // The other clone and the former parent now hang off the promoted one.
        assert_eq!(
            zfs.origin_of("pool/app/00000001").as_deref(),
            Some("pool/app/00000002@00000001")
        );
        assert_eq!(
            zfs.origin_of("pool/app/00000000").as_deref(),
            Some("pool/app/00000002@00000002")
        );
        assert_eq!(zfs.origin_of("pool/app/00000002"), None);
    }

    #[test]
    fn destroy_refuses_snapshot_with_dependents() {
        let zfs = MockZfs::new();
        zfs.create(InstanceId::GENESIS, "pool/app", Path::new("/srv/app"))
            .unwrap();
        let snap = zfs.snapshot(InstanceId::new(1), "pool/app/00000000").unwrap();
        zfs.clone_dataset("pool/app/00000001", &snap).unwrap();
        assert!(zfs.destroy(&snap, false).is_err());
    }
}
