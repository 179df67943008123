//! Mount table queries (via findmnt) and mount/unmount syscalls.

use std::ffi::CString;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use rustix::mount::{MountFlags, UnmountFlags};
use serde::Deserialize;

use blockdev_utils::{CommandRunExt, ExecError};

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("{0}")]
    Fail(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    NotMounted(String),
    #[error("{0}")]
    Parse(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Root of the devices output of `findmnt --json`.
#[derive(Debug, Deserialize, Default)]
pub struct Filesystems {
    pub filesystems: Vec<Filesystem>,
}

/// One mount table entry as reported by findmnt.
#[derive(Debug, Deserialize, Clone)]
pub struct Filesystem {
    pub target: Utf8PathBuf,
    pub source: String,
    pub fstype: String,
    pub options: String,
    pub children: Option<Vec<Filesystem>>,
}

/// Run findmnt with the provided options and parse its JSON output. A
/// lookup with no matches yields an empty list, not an error.
pub fn run_findmnt(args: &[&str]) -> Result<Filesystems, MountError> {
    match Command::new("findmnt")
        .arg("--json")
        .args(args)
        .run_get_output()
    {
        Ok(output) => serde_json::from_str(&output)
            .map_err(|e| MountError::Parse(format!("Failed to parse findmnt output: {e}"))),
        // exit status 1: nothing matched the filter
        Err(ExecError::Failed { status, .. }) if status.code() == Some(1) => {
            Ok(Filesystems::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Get the mountpoint of `device`. If the device is mounted multiple times
/// only the first mountpoint is returned; an unmounted device yields `None`.
pub fn get_mountpoint(device: &Utf8Path) -> Result<Option<Utf8PathBuf>, MountError> {
    let mounts = run_findmnt(&["--source", device.as_str(), "--first-only"])?;
    Ok(mounts.filesystems.into_iter().next().map(|fs| fs.target))
}

/// Whether `path` is a mountpoint.
pub fn is_mountpoint(path: &Utf8Path) -> Result<bool, MountError> {
    let mounts = run_findmnt(&["--mountpoint", path.as_str()])?;
    Ok(!mounts.filesystems.is_empty())
}

/// Split a comma separated mount option string into kernel mount flags and
/// the filesystem-specific data string.
fn parse_mount_options(options: Option<&str>) -> (MountFlags, String) {
    let mut flags = MountFlags::empty();
    let mut data = Vec::new();
    for opt in options.unwrap_or("").split(',').filter(|o| !o.is_empty()) {
        match opt {
            "ro" => flags |= MountFlags::RDONLY,
            "rw" => flags.remove(MountFlags::RDONLY),
            "nosuid" => flags |= MountFlags::NOSUID,
            "nodev" => flags |= MountFlags::NODEV,
            "noexec" => flags |= MountFlags::NOEXEC,
            "sync" => flags |= MountFlags::SYNCHRONOUS,
            "remount" => flags |= MountFlags::from_bits_retain(libc::MS_REMOUNT),
            "bind" => flags |= MountFlags::BIND,
            "noatime" => flags |= MountFlags::NOATIME,
            "nodiratime" => flags |= MountFlags::NODIRATIME,
            "relatime" => flags |= MountFlags::RELATIME,
            "strictatime" => flags |= MountFlags::STRICTATIME,
            other => data.push(other.to_string()),
        }
    }
    (flags, data.join(","))
}

fn classify_errno(e: rustix::io::Errno, what: String) -> MountError {
    match e {
        rustix::io::Errno::PERM | rustix::io::Errno::ACCESS => MountError::Auth(what),
        _ => MountError::Fail(what),
    }
}

/// Mount `device` on `mountpoint` with the given filesystem type and
/// comma-separated options.
pub fn mount(
    device: &Utf8Path,
    mountpoint: &Utf8Path,
    fstype: &str,
    options: Option<&str>,
) -> Result<(), MountError> {
    let (flags, data) = parse_mount_options(options);
    let data = CString::new(data)
        .map_err(|e| MountError::Invalid(format!("invalid mount data: {e}")))?;
    tracing::debug!("mounting {device} on {mountpoint} as {fstype} ({options:?})");
    rustix::mount::mount(
        device.as_std_path(),
        mountpoint.as_std_path(),
        fstype,
        flags,
        data.as_c_str(),
    )
    .map_err(|e| {
        classify_errno(
            e,
            format!("Failed to mount '{device}' on '{mountpoint}': {e}"),
        )
    })
}

/// Unmount `spec`, which may be either a mountpoint or a mounted device.
pub fn unmount(spec: &Utf8Path, lazy: bool, force: bool) -> Result<(), MountError> {
    let target = if is_mountpoint(spec)? {
        spec.to_owned()
    } else {
        get_mountpoint(spec)?.ok_or_else(|| {
            MountError::NotMounted(format!("'{spec}' doesn't appear to be mounted"))
        })?
    };

    let mut flags = UnmountFlags::empty();
    if lazy {
        flags |= UnmountFlags::DETACH;
    }
    if force {
        flags |= UnmountFlags::FORCE;
    }
    tracing::debug!("unmounting {target}");
    rustix::mount::unmount(target.as_std_path(), flags)
        .map_err(|e| classify_errno(e, format!("Failed to unmount '{target}': {e}")))
}

/// A device mounted on a freshly created temporary directory. The directory
/// is removed when the mount is cleanly released; if the unmount fails the
/// directory is left in place for the administrator.
pub struct TempMount {
    mountpoint: Utf8PathBuf,
    dir: Option<tempfile::TempDir>,
    mounted: bool,
}

impl TempMount {
    /// Mount `device` (of type `fstype`) on a new `blockdev.*` temporary
    /// directory, read-only when requested.
    pub fn new(device: &Utf8Path, fstype: &str, read_only: bool) -> Result<Self, MountError> {
        let dir = tempfile::Builder::new()
            .prefix("blockdev.")
            .tempdir()
            .map_err(|e| {
                MountError::Fail(format!(
                    "Failed to create temporary directory for mounting '{device}': {e}"
                ))
            })?;
        let mountpoint = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|p| MountError::Fail(format!("non-UTF-8 temporary path: {}", p.display())))?;
        mount(
            device,
            &mountpoint,
            fstype,
            read_only.then_some("ro"),
        )
        .map_err(|e| MountError::Fail(format!("Failed to mount '{device}': {e}")))?;
        Ok(Self {
            mountpoint,
            dir: Some(dir),
            mounted: true,
        })
    }

    pub fn mountpoint(&self) -> &Utf8Path {
        &self.mountpoint
    }

    /// Unmount and remove the temporary directory. On unmount failure the
    /// directory is kept (it is still a mountpoint).
    pub fn unmount(mut self) -> Result<(), MountError> {
        self.mounted = false;
        match unmount(&self.mountpoint, false, false) {
            Ok(()) => {
                if let Some(dir) = self.dir.take() {
                    if let Err(e) = dir.close() {
                        tracing::warn!("failed to remove temporary mountpoint: {e}");
                    }
                }
                Ok(())
            }
            Err(e) => {
                if let Some(dir) = self.dir.take() {
                    // Leave the directory behind; it is still mounted.
                    let _ = dir.into_path();
                }
                Err(e)
            }
        }
    }
}

impl Drop for TempMount {
    fn drop(&mut self) {
        if self.mounted {
            // Unwinding with the mount still held; detach lazily.
            if let Err(e) = unmount(&self.mountpoint, true, false) {
                tracing::warn!("failed to lazily unmount {}: {e}", self.mountpoint);
                if let Some(dir) = self.dir.take() {
                    let _ = dir.into_path();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_findmnt() -> anyhow::Result<()> {
        let fixture = include_str!("../tests/fixtures/findmnt.json");
        let mounts: Filesystems = serde_json::from_str(fixture)?;
        let root = &mounts.filesystems[0];
        assert_eq!(root.target, "/");
        assert_eq!(root.fstype, "ext4");
        let children = root.children.as_deref().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].source, "/dev/vda1");
        assert_eq!(children[1].source, "/dev/mapper/fedora-root[/machines]");
        Ok(())
    }

    #[test]
    fn test_parse_mount_options() {
        let (flags, data) = parse_mount_options(Some("ro,noatime,data=journal,discard"));
        assert!(flags.contains(MountFlags::RDONLY));
        assert!(flags.contains(MountFlags::NOATIME));
        assert_eq!(data, "data=journal,discard");

        let (flags, data) = parse_mount_options(None);
        assert!(flags.is_empty());
        assert!(data.is_empty());
    }

    #[test]
    fn test_get_mountpoint_of_root_device() -> anyhow::Result<()> {
        // The root filesystem is always mounted; its source resolves to /.
        let mounts = run_findmnt(&["--mountpoint", "/"])?;
        assert_eq!(mounts.filesystems.len(), 1);
        Ok(())
    }

    #[test]
    fn test_is_mountpoint() -> anyhow::Result<()> {
        assert!(is_mountpoint(Utf8Path::new("/"))?);
        assert!(!is_mountpoint(Utf8Path::new("/definitely/not/mounted"))?);
        Ok(())
    }
}
