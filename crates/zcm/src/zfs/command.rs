//! `zfs` command line client.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};
use zcm_common::{InstanceId, ZcmError, ZcmResult};

use super::{Dataset, ZfsBackend};

/// Listing columns requested from `zfs list`, in parsing order.
const LIST_PROPERTIES: &str = "name,origin,mountpoint,creation,used";

/// [`ZfsBackend`] implementation shelling out to the `zfs` binary.
///
/// All invocations use `-H -p` (scripted, parseable) output so values come
/// back tab-separated and byte/epoch exact.
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: PathBuf,
}

impl ZfsCli {
    /// Create a client using `zfs` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("zfs")
    }

    /// Create a client using a specific `zfs` binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `zfs` with the given arguments, returning captured stdout.
    fn run(&self, args: &[&str]) -> ZcmResult<String> {
        tracing::debug!(?args, "Running zfs");

        let output = Command::new(&self.binary).args(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZcmError::backend(format!(
                "zfs {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_line(line: &str) -> ZcmResult<Dataset> {
        let fields: Vec<&str> = line.split('\t').collect();
        let &[name, origin, mountpoint, creation, used] = fields.as_slice() else {
            return Err(ZcmError::invalid_state(format!(
                "unexpected zfs list line: {line:?}"
            )));
        };

        let creation = creation
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| {
                ZcmError::invalid_state(format!("bad creation timestamp {creation:?} for {name}"))
            })?;
        let used = used.parse::<u64>().map_err(|_| {
            ZcmError::invalid_state(format!("bad used size {used:?} for {name}"))
        })?;

        Ok(Dataset {
            name: name.to_string(),
            origin: match origin {
                "-" => None,
                s => Some(s.to_string()),
            },
            mountpoint: match mountpoint {
                "-" | "none" | "legacy" => None,
                s => Some(PathBuf::from(s)),
            },
            creation,
            used,
        })
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ZfsBackend for ZfsCli {
    fn exists(&self, name: &str) -> ZcmResult<bool> {
        let status = Command::new(&self.binary)
            .args(["list", "-H", name])
            .output()?
            .status;
        Ok(status.success())
    }

    fn create(&self, id: InstanceId, root: &str, mountpoint: &Path) -> ZcmResult<String> {
        let name = format!("{root}/{id}");
        let mountpoint = format!("mountpoint={}", mountpoint.display());
        self.run(&["create", "-p", "-o", &mountpoint, &name])?;
        Ok(name)
    }

    fn snapshot(&self, id: InstanceId, source: &str) -> ZcmResult<String> {
        let name = format!("{source}@{id}");
        self.run(&["snapshot", &name])?;
        Ok(name)
    }

    fn clone_dataset(&self, name: &str, snapshot: &str) -> ZcmResult<String> {
        self.run(&["clone", snapshot, name])?;
        Ok(name.to_string())
    }

    fn promote(&self, name: &str) -> ZcmResult<()> {
        self.run(&["promote", name]).map(drop)
    }

    fn destroy(&self, name: &str, recursive: bool) -> ZcmResult<()> {
        if recursive {
            self.run(&["destroy", "-r", name]).map(drop)
        } else {
            self.run(&["destroy", name]).map(drop)
        }
    }

    fn rename(&self, name: &str, new_name: &str) -> ZcmResult<()> {
        self.run(&["rename", name, new_name]).map(drop)
    }

    fn mount(&self, name: &str) -> ZcmResult<()> {
        self.run(&["mount", name]).map(drop)
    }

    fn unmount(&self, name: &str) -> ZcmResult<()> {
        self.run(&["unmount", name]).map(drop)
    }

    fn set_mountpoint(&self, name: &str, mountpoint: &Path) -> ZcmResult<()> {
        let prop = format!("mountpoint={}", mountpoint.display());
        self.run(&["set", &prop, name]).map(drop)
    }

    fn inherit_mountpoint(&self, name: &str) -> ZcmResult<()> {
        self.run(&["inherit", "mountpoint", name]).map(drop)
    }

    fn get_property(&self, name: &str, property: &str) -> ZcmResult<String> {
        let out = self.run(&["get", "-H", "-p", "-o", "value", property, name])?;
        Ok(out.trim_end().to_string())
    }

    fn list(&self, target: Option<&str>, recursive: bool) -> ZcmResult<Vec<Dataset>> {
        let mut args = vec!["list", "-H", "-p", "-t", "filesystem", "-o", LIST_PROPERTIES];
        if recursive {
            args.push("-r");
        }
        if let Some(target) = target {
            args.push(target);
        }

        let output = Command::new(&self.binary).args(&args).output()?;
        if !output.status.success() {
            // A missing dataset or an unmanaged path is an empty listing,
            // not a backend failure; the chain layer decides what that means.
            // A path target that does not exist on disk reports "No such
            // file or directory" rather than "does not exist".
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("does not exist")
                || stderr.contains("not a ZFS filesystem")
                || stderr.contains("No such file or directory")
            {
                return Ok(Vec::new());
            }
            return Err(ZcmError::backend(format!(
                "zfs list failed: {}",
                stderr.trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(Self::parse_line)
            .collect()
    }
}
