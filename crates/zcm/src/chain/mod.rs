//! Clone chain lifecycle manager.
//!
//! A [`Chain`] is the in-memory view of one managed path: the hidden root
//! filesystem, every instance cloned under it, and the single active
//! instance mounted at the path itself. The view is rebuilt wholesale from
//! a backend listing by [`Chain::load`] after every mutating operation;
//! nothing is patched incrementally.
//!
//! The chain takes no lock: one process at a time per managed path. Two
//! managers mutating the same chain concurrently race on discovery and id
//! allocation.

use std::fs;
use std::path::{Path, PathBuf};

use zcm_common::{InstanceId, ZcmError, ZcmResult};

use crate::zfs::ZfsBackend;

mod instance;

pub use instance::{Instance, origin_id_of, partition};

/// Hidden directory the root filesystem is mounted at. Finding a filesystem
/// mounted there is how a managed path is recognized.
pub const HIDDEN_DIR: &str = ".clones";

/// Retention ceilings for `create`, `activate` and eviction.
///
/// Unset ceilings are unbounded. With `auto_remove` off a ceiling that
/// would be violated fails the operation up front; with it on, instances
/// are evicted after the operation until the ceilings hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionLimits {
    /// Maximum number of instances older than the active one.
    pub max_older: Option<usize>,
    /// Maximum number of instances newer than the active one.
    pub max_newer: Option<usize>,
    /// Maximum number of instances in total.
    pub max_total: Option<usize>,
    /// Evict instead of failing when a ceiling is exceeded.
    pub auto_remove: bool,
}

/// The clone chain bound to one managed path.
#[derive(Debug)]
pub struct Chain<B> {
    backend: B,
    path: PathBuf,
    root: String,
    instances: Vec<Instance>,
    active: Option<InstanceId>,
    older: Vec<InstanceId>,
    newer: Vec<InstanceId>,
    next_id: InstanceId,
    used: u64,
}

impl<B: ZfsBackend> Chain<B> {
    /// Initialize a new chain: create `root` with a genesis instance
    /// mounted at `path`, then re-target the root itself to the hidden
    /// `<path>/.clones` directory that later identifies the chain.
    ///
    /// # Errors
    ///
    /// [`ZcmError::AlreadyExists`] if the path or the root filesystem
    /// already exists.
    pub fn initialize(backend: &B, root: &str, path: impl AsRef<Path>) -> ZcmResult<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(ZcmError::AlreadyExists {
                target: path.display().to_string(),
            });
        }
        if backend.exists(root)? {
            return Err(ZcmError::AlreadyExists {
                target: root.to_string(),
            });
        }
        backend.create(InstanceId::GENESIS, root, path)?;
        backend.set_mountpoint(root, &path.join(HIDDEN_DIR))?;
        tracing::info!(root, path = %path.display(), "Initialized chain");
        Ok(())
    }

    /// Open the chain managed at `path` and load its state.
    ///
    /// # Errors
    ///
    /// [`ZcmError::NotInitialized`] if no backing root filesystem is
    /// discoverable behind the path.
    pub fn open(backend: B, path: impl Into<PathBuf>) -> ZcmResult<Self> {
        let path = path.into();
        let root = Self::discover_root(&backend, &path)?;
        let mut chain = Self {
            backend,
            path,
            root,
            instances: Vec::new(),
            active: None,
            older: Vec::new(),
            newer: Vec::new(),
            next_id: InstanceId::GENESIS.next(),
            used: 0,
        };
        chain.load()?;
        Ok(chain)
    }

    /// Locate the root filesystem by its hidden mountpoint.
    fn discover_root(backend: &B, path: &Path) -> ZcmResult<String> {
        let hidden = path.join(HIDDEN_DIR);
        let listing = backend.list(Some(&hidden.to_string_lossy()), false)?;
        match &listing[..] {
            [dataset] if dataset.mountpoint.as_deref() == Some(hidden.as_path()) => {
                Ok(dataset.name.clone())
            }
            _ => Err(ZcmError::NotInitialized {
                path: path.display().to_string(),
            }),
        }
    }

    /// Rebuild the whole in-memory view from a fresh backend listing.
    ///
    /// Replaces instances, the active marker, the older/newer partition and
    /// `next_id` in one step; never partially updates.
    pub fn load(&mut self) -> ZcmResult<()> {
        let listing = self.backend.list(Some(&self.root), true)?;

        let mut instances = Vec::with_capacity(listing.len().saturating_sub(1));
        let mut used = 0;
        let mut last_id = 0;
        for dataset in listing {
            if dataset.name == self.root {
                used = dataset.used;
                continue;
            }
            let instance = Instance::from_dataset(dataset)?;
            last_id = last_id.max(instance.id.value());
            instances.push(instance);
        }

        let active = instances
            .iter()
            .find(|instance| instance.mountpoint == self.path)
            .map(|instance| instance.id);
        let (older, newer) = partition(&instances, active);

        self.instances = instances;
        self.active = active;
        self.older = older;
        self.newer = newer;
        self.next_id = InstanceId::new(last_id + 1);
        self.used = used;
        Ok(())
    }

    /// The managed path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The hidden root filesystem name.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// All instances, in backend listing order.
    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Id of the active instance, if the chain was ever activated.
    #[must_use]
    pub fn active_id(&self) -> Option<InstanceId> {
        self.active
    }

    /// The active instance.
    #[must_use]
    pub fn active_instance(&self) -> Option<&Instance> {
        let id = self.active?;
        self.instances.iter().find(|instance| instance.id == id)
    }

    /// Ids of instances before the active one, in chain order.
    #[must_use]
    pub fn older(&self) -> &[InstanceId] {
        &self.older
    }

    /// Ids of instances after the active one, in chain order.
    #[must_use]
    pub fn newer(&self) -> &[InstanceId] {
        &self.newer
    }

    /// The id the next created instance will get.
    #[must_use]
    pub fn next_id(&self) -> InstanceId {
        self.next_id
    }

    /// Space used by the root filesystem tree.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Look up an instance by id.
    ///
    /// # Errors
    ///
    /// [`ZcmError::NotFound`] if no instance has that id.
    pub fn get(&self, id: InstanceId) -> ZcmResult<&Instance> {
        self.instances
            .iter()
            .find(|instance| instance.id == id)
            .ok_or_else(|| ZcmError::NotFound { id: id.to_string() })
    }

    /// Snapshot the active instance and clone it into a new instance.
    ///
    /// The new instance is mounted under the hidden directory and does not
    /// become active. With `auto_remove` off, `max_newer`/`max_total`
    /// ceilings are checked before any backend call; with it on, eviction
    /// runs after the clone exists.
    ///
    /// # Errors
    ///
    /// [`ZcmError::NoActiveInstance`] without an active instance,
    /// [`ZcmError::LimitExceeded`] when a ceiling blocks the creation.
    pub fn create(&mut self, limits: &RetentionLimits) -> ZcmResult<Instance> {
        let active_name = self
            .active_instance()
            .ok_or(ZcmError::NoActiveInstance)?
            .name
            .clone();

        if !limits.auto_remove {
            if let Some(max) = limits.max_newer {
                if self.newer.len() >= max {
                    return Err(ZcmError::LimitExceeded {
                        message: format!(
                            "There are already {} newer instances, can not create another",
                            self.newer.len()
                        ),
                    });
                }
            }
            if let Some(max) = limits.max_total {
                if self.instances.len() >= max {
                    return Err(ZcmError::LimitExceeded {
                        message: format!(
                            "There are already {} instances, can not create another",
                            self.instances.len()
                        ),
                    });
                }
            }
        }

        let id = self.next_id;
        let snapshot = self.backend.snapshot(id, &active_name)?;
        let name = format!("{}/{id}", self.root);
        self.backend.clone_dataset(&name, &snapshot)?;
        self.load()?;

        let instance = self.get(id)?.clone();
        tracing::info!(%id, "Created instance");
        if limits.auto_remove {
            self.auto_remove(limits)?;
        }
        Ok(instance)
    }

    /// Make `id` the active instance via an atomic mount swap.
    ///
    /// Everything is unmounted before any ownership change; if any unmount
    /// fails, all mounts are restored best-effort and the operation fails
    /// with [`ZcmError::DeviceBusy`] without having changed anything. The
    /// rollback itself is best effort only, a process killed mid-swap can
    /// leave the chain unmounted.
    ///
    /// # Errors
    ///
    /// [`ZcmError::NotFound`], [`ZcmError::AlreadyActive`],
    /// [`ZcmError::LimitExceeded`] or [`ZcmError::DeviceBusy`].
    pub fn activate(&mut self, id: InstanceId, limits: &RetentionLimits) -> ZcmResult<Instance> {
        let target_name = self.get(id)?.name.clone();
        if self.active == Some(id) {
            return Err(ZcmError::AlreadyActive { id: id.to_string() });
        }

        if !limits.auto_remove && (limits.max_newer.is_some() || limits.max_older.is_some()) {
            // Simulated partition around the candidate; no backend calls.
            let position = self
                .instances
                .iter()
                .position(|instance| instance.id == id)
                .ok_or_else(|| ZcmError::NotFound { id: id.to_string() })?;
            let older_count = position;
            let newer_count = self.instances.len() - position - 1;
            if let Some(max) = limits.max_newer {
                if newer_count > max {
                    return Err(ZcmError::LimitExceeded {
                        message: format!(
                            "Activating {id} violates the maximum number of newer instances ({newer_count}/{max})"
                        ),
                    });
                }
            }
            if let Some(max) = limits.max_older {
                if older_count > max {
                    return Err(ZcmError::LimitExceeded {
                        message: format!(
                            "Activating {id} violates the maximum number of older instances ({older_count}/{max})"
                        ),
                    });
                }
            }
        }

        self.unmount_all()?;
        if let Some(previous) = self.active_instance() {
            let previous_name = previous.name.clone();
            self.backend.inherit_mountpoint(&previous_name)?;
        }
        self.backend.set_mountpoint(&target_name, &self.path)?;
        self.active = Some(id);
        self.mount_all();

        tracing::info!(%id, "Activated instance");
        self.load()?;
        self.auto_remove(limits)?;
        Ok(self.get(id)?.clone())
    }

    /// Remove an instance, re-parenting dependent clones first.
    ///
    /// If other instances were cloned from a snapshot of the target, the
    /// last of them in chain order is promoted so it takes over the
    /// snapshot lineage; only then is the target destroyed. Mid-chain
    /// deletion never orphans a dependent.
    ///
    /// # Errors
    ///
    /// [`ZcmError::NotFound`] or [`ZcmError::CannotRemoveActive`].
    pub fn remove(&mut self, id: InstanceId) -> ZcmResult<()> {
        let target = self.get(id)?.clone();
        if self.active == Some(id) {
            return Err(ZcmError::CannotRemoveActive { id: id.to_string() });
        }

        // Only one clone of a snapshot can be promoted to own it; the later
        // dependents end up referencing the promoted clone's snapshots.
        let promoted = self
            .instances
            .iter()
            .filter(|instance| instance.origin_id == Some(id))
            .next_back()
            .cloned();
        if let Some(promoted) = &promoted {
            self.backend.promote(&promoted.name)?;
        }

        self.backend.destroy(&target.name, false)?;
        if let Some(origin) = &target.origin {
            if promoted.is_none() {
                self.backend.destroy(origin, false)?;
            } else {
                // Promotion handed this snapshot over to the promoted
                // clone's lineage; it is still referenced.
                tracing::debug!(origin, "Keeping origin snapshot after promotion");
            }
        }
        if let Some(promoted) = &promoted {
            let leftover = format!("{}@{}", promoted.name, promoted.id);
            self.backend.destroy(&leftover, false)?;
        }

        tracing::info!(%id, "Removed instance");
        self.load()
    }

    /// Evict instances until the given ceilings hold.
    ///
    /// Older instances go first, oldest first; then newer ones, closest to
    /// the active instance first. Counts are re-read after every removal
    /// since promotion can change the chain shape.
    ///
    /// # Errors
    ///
    /// [`ZcmError::NoEvictionCandidate`] when `max_total` can not be
    /// satisfied because only the active instance is left.
    pub fn auto_remove(&mut self, limits: &RetentionLimits) -> ZcmResult<()> {
        if let Some(max) = limits.max_older {
            while self.older.len() > max {
                self.remove(self.older[0])?;
            }
        }
        if let Some(max) = limits.max_newer {
            while self.newer.len() > max {
                self.remove(self.newer[0])?;
            }
        }
        if let Some(max) = limits.max_total {
            while self.instances.len() > max {
                if let Some(&id) = self.older.first() {
                    self.remove(id)?;
                } else if let Some(&id) = self.newer.first() {
                    self.remove(id)?;
                } else {
                    return Err(ZcmError::NoEvictionCandidate { limit: max });
                }
            }
        }
        Ok(())
    }

    /// Destroy the whole chain: every instance, every snapshot, the root
    /// filesystem and the managed directory.
    pub fn destroy(self) -> ZcmResult<()> {
        self.unmount_all()?;
        self.backend.destroy(&self.root, true)?;
        if self.path.exists() {
            fs::remove_dir(&self.path)?;
        }
        tracing::info!(path = %self.path.display(), "Destroyed chain");
        Ok(())
    }

    /// Unmount every filesystem: non-active instances, then the root, then
    /// the active instance. On any failure everything is remounted best
    /// effort and the failed set is reported; no ownership change happens.
    fn unmount_all(&self) -> ZcmResult<()> {
        let mut failed = Vec::new();
        for instance in &self.instances {
            if Some(instance.id) != self.active {
                if let Err(error) = self.backend.unmount(&instance.name) {
                    tracing::warn!(name = %instance.name, %error, "Unmount failed");
                    failed.push(instance.name.clone());
                }
            }
        }
        if let Err(error) = self.backend.unmount(&self.root) {
            tracing::warn!(name = %self.root, %error, "Unmount failed");
            failed.push(self.root.clone());
        }
        if let Some(active) = self.active_instance() {
            if let Err(error) = self.backend.unmount(&active.name) {
                tracing::warn!(name = %active.name, %error, "Unmount failed");
                failed.push(active.name.clone());
            }
        }
        if !failed.is_empty() {
            self.mount_all();
            return Err(ZcmError::DeviceBusy { failed });
        }
        Ok(())
    }

    /// Mount everything in the reverse order of [`Self::unmount_all`]:
    /// active instance, root, the rest. Best effort; failures are logged.
    fn mount_all(&self) {
        if let Some(active) = self.active_instance() {
            if let Err(error) = self.backend.mount(&active.name) {
                tracing::warn!(name = %active.name, %error, "Mount failed");
            }
        }
        if let Err(error) = self.backend.mount(&self.root) {
            tracing::warn!(name = %self.root, %error, "Mount failed");
        }
        for instance in &self.instances {
            if Some(instance.id) != self.active {
                if let Err(error) = self.backend.mount(&instance.name) {
                    tracing::warn!(name = %instance.name, %error, "Mount failed");
                }
            }
        }
    }
}
