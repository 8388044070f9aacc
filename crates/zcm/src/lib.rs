//! # ZCM: ZFS clone chain manager
//!
//! ZCM keeps a chain of copy-on-write "instances" of one directory tree:
//! one hidden root filesystem, snapshots taken from the instances, and
//! clones created from those snapshots, exactly one of which is mounted at
//! the managed path ("active") at any time.
//!
//! ## Usage
//!
//! ```no_run
//! use zcm::chain::Chain;
//! use zcm::zfs::ZfsCli;
//!
//! # fn example() -> zcm_common::ZcmResult<()> {
//! let backend = ZfsCli::new();
//!
//! // Initialize a chain, then open it
//! Chain::initialize(&backend, "pool/app", "/srv/app")?;
//! let mut chain = Chain::open(backend, "/srv/app")?;
//!
//! // Snapshot the active instance into a new clone and switch to it
//! let instance = chain.create(&Default::default())?;
//! let id = instance.id;
//! chain.activate(id, &Default::default())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod chain;
pub mod cli;
pub mod zfs;

pub use chain::{Chain, Instance};
pub use zfs::ZfsBackend;
