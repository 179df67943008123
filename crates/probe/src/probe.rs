//! Block device signature probing and wiping.
//!
//! Probing is driven through `blkid --probe` (safe probing with both
//! partition and superblock magic detection) and wiping through `wipefs`,
//! with the file descriptor discipline kept here: wipe paths hold the device
//! open read-write (exclusively unless forced) and fsync it before closing
//! on every exit path.

use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

use camino::Utf8Path;
use rustix::fs::{Mode, OFlags};

use blockdev_utils::{report_finished, report_started, CommandRunExt, ExecError};

/// How many times a probe is retried when the device is busy.
const PROBE_RETRIES: u32 = 5;
/// Delay between probe retries.
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// blkid exits with 2 when probing finds nothing.
const BLKID_NOTHING_FOUND: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    Fail(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NoFilesystem(String),
    #[error("{0}")]
    Parse(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// One on-disk signature as reported by the prober.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub usage: Option<String>,
    pub sig_type: Option<String>,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

/// A device opened for wiping. The descriptor is fsynced before it is
/// closed, on every exit path, including unwinding.
struct WipeFd {
    fd: rustix::fd::OwnedFd,
}

impl WipeFd {
    fn open(device: &Utf8Path, force: bool) -> Result<Self, ProbeError> {
        let mut flags = OFlags::RDWR | OFlags::CLOEXEC;
        if !force {
            flags |= OFlags::EXCL;
        }
        let fd = rustix::fs::open(device.as_std_path(), flags, Mode::empty()).map_err(|e| {
            ProbeError::Fail(format!("Failed to open the device '{device}': {e}"))
        })?;
        Ok(Self { fd })
    }
}

impl Drop for WipeFd {
    fn drop(&mut self) {
        if let Err(e) = rustix::fs::fsync(&self.fd) {
            tracing::warn!("fsync before close failed: {e}");
        }
    }
}

fn open_readonly(device: &Utf8Path) -> Result<rustix::fd::OwnedFd, ProbeError> {
    rustix::fs::open(
        device.as_std_path(),
        OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| ProbeError::Fail(format!("Failed to open the device '{device}': {e}")))
}

/// Parse `blkid --output export` key=value lines.
fn parse_export(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Run a safe probe on `device`, returning the first detected signature or
/// `None` when the device carries no recognizable signature. Transient
/// failures (typically a busy device) are retried.
fn safe_probe(device: &Utf8Path) -> Result<Option<Signature>, ProbeError> {
    let mut last_err: Option<ExecError> = None;
    for attempt in 0..PROBE_RETRIES {
        if attempt > 0 {
            std::thread::sleep(PROBE_RETRY_DELAY);
        }
        match Command::new("blkid")
            .args(["--probe", "--output", "export", device.as_str()])
            .run_get_output()
        {
            Ok(output) => {
                let map = parse_export(&output);
                return Ok(Some(Signature {
                    usage: map.get("USAGE").cloned(),
                    sig_type: map.get("TYPE").cloned(),
                    label: map.get("LABEL").cloned(),
                    uuid: map.get("UUID").cloned(),
                }));
            }
            Err(ExecError::Failed { status, .. })
                if status.code() == Some(BLKID_NOTHING_FOUND) =>
            {
                return Ok(None);
            }
            Err(e @ ExecError::Spawn { .. }) => return Err(e.into()),
            Err(e) => last_err = Some(e),
        }
    }
    let detail = last_err.map(|e| e.to_string()).unwrap_or_default();
    Err(ProbeError::Fail(format!(
        "Failed to probe the device '{device}': {detail}"
    )))
}

/// Byte offsets of all signatures on `device`, in report order, from
/// `wipefs --parsable`.
fn list_signature_offsets(device: &Utf8Path) -> Result<Vec<String>, ProbeError> {
    let mut last_err: Option<ProbeError> = None;
    for attempt in 0..PROBE_RETRIES {
        if attempt > 0 {
            std::thread::sleep(PROBE_RETRY_DELAY);
        }
        match Command::new("wipefs")
            .args(["--parsable", device.as_str()])
            .run_get_output()
        {
            Ok(output) => return parse_wipefs_offsets(&output),
            Err(e @ ExecError::Spawn { .. }) => return Err(e.into()),
            Err(e) => last_err = Some(e.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        ProbeError::Fail(format!("Failed to probe the device '{device}'"))
    }))
}

/// Parse `wipefs --parsable` output: `offset,uuid,label,type` per line.
fn parse_wipefs_offsets(output: &str) -> Result<Vec<String>, ProbeError> {
    let mut offsets = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let offset = line.split(',').next().unwrap_or_default();
        if !offset.starts_with("0x") {
            return Err(ProbeError::Parse(format!(
                "Unexpected signature listing line: '{line}'"
            )));
        }
        offsets.push(offset.to_string());
    }
    Ok(offsets)
}

fn wipe_offset(device: &Utf8Path, offset: &str, force: bool) -> Result<(), ProbeError> {
    let mut cmd = Command::new("wipefs");
    cmd.args(["--offset", offset]);
    if force {
        cmd.arg("--force");
    }
    cmd.arg(device.as_str());
    cmd.run()
        .map_err(|e| ProbeError::Fail(format!("Failed to wipe signatures on the device '{device}': {e}")))
}

fn wipe_all_signatures(device: &Utf8Path, force: bool) -> Result<(), ProbeError> {
    let mut cmd = Command::new("wipefs");
    cmd.arg("--all");
    if force {
        cmd.arg("--force");
    }
    cmd.arg(device.as_str());
    cmd.run()
        .map_err(|e| ProbeError::Fail(format!("Failed to wipe signatures on the device '{device}': {e}")))
}

/// Wipe the first (or with `all` every) signature from `device`.
///
/// The device is opened `O_RDWR` and, unless `force` is given, `O_EXCL`, so
/// a mounted device is refused. A device without any signature yields
/// [`ProbeError::NoFilesystem`].
pub fn wipe(device: &Utf8Path, all: bool, force: bool) -> Result<(), ProbeError> {
    let progress_id = report_started(&format!(
        "Started wiping signatures from the device '{device}'"
    ));
    let r = wipe_impl(device, all, force);
    match &r {
        Ok(()) => report_finished(progress_id, "Completed"),
        Err(e) => report_finished(progress_id, &e.to_string()),
    }
    r
}

fn wipe_impl(device: &Utf8Path, all: bool, force: bool) -> Result<(), ProbeError> {
    let _fd = WipeFd::open(device, force)?;

    let offsets = list_signature_offsets(device)?;
    if offsets.is_empty() {
        return Err(ProbeError::NoFilesystem(format!(
            "No signature detected on the device '{device}'"
        )));
    }

    if all {
        wipe_all_signatures(device, force)
    } else {
        wipe_offset(device, &offsets[0], force)
    }
}

/// Remove all signatures from `device`; an already clean device is a
/// success (unlike [`wipe`]).
pub fn clean(device: &Utf8Path, force: bool) -> Result<(), ProbeError> {
    match wipe(device, true, force) {
        Err(ProbeError::NoFilesystem(_)) => Ok(()),
        other => other,
    }
}

/// Wipe filesystem signature(s) from `device`, checking that the first
/// detected signature is a filesystem and (when `fs_type` is given) of the
/// expected type. With `wipe_all`, nested signatures of other types (e.g.
/// the DOS partition table mkfs.ntfs leaves behind) are removed too.
pub fn wipe_fs(
    device: &Utf8Path,
    fs_type: Option<&str>,
    wipe_all: bool,
) -> Result<(), ProbeError> {
    let progress_id = report_started(&format!(
        "Started wiping '{}' signatures from the device '{device}'",
        fs_type.unwrap_or("all")
    ));
    let r = wipe_fs_impl(device, fs_type, wipe_all);
    match &r {
        Ok(()) => report_finished(progress_id, "Completed"),
        Err(e) => report_finished(progress_id, &e.to_string()),
    }
    r
}

fn wipe_fs_impl(
    device: &Utf8Path,
    fs_type: Option<&str>,
    wipe_all: bool,
) -> Result<(), ProbeError> {
    let _fd = {
        // wipe_fs is used right after mkfs, the device may still be held
        // open by udev; no O_EXCL here.
        let fd = rustix::fs::open(
            device.as_std_path(),
            OFlags::RDWR | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| ProbeError::Fail(format!("Failed to open the device '{device}': {e}")))?;
        WipeFd { fd }
    };

    let sig = safe_probe(device)?.ok_or_else(|| {
        ProbeError::Fail(format!("Failed to get signature type for the device '{device}'"))
    })?;
    let usage = sig.usage.as_deref().unwrap_or("");
    if usage != "filesystem" {
        return Err(ProbeError::Invalid(format!(
            "The signature on the device '{device}' is of type '{usage}', not 'filesystem'"
        )));
    }
    if let Some(expected) = fs_type {
        let found = sig.sig_type.as_deref().unwrap_or("");
        if found != expected {
            return Err(ProbeError::Invalid(format!(
                "The file system type on the device '{device}' is '{found}', not '{expected}'"
            )));
        }
    }

    let offsets = list_signature_offsets(device)?;
    if offsets.is_empty() {
        return Err(ProbeError::Fail(format!(
            "Failed to wipe the filesystem signature on the device '{device}'"
        )));
    }
    if wipe_all {
        wipe_all_signatures(device, true)
    } else {
        wipe_offset(device, &offsets[0], true)
    }
}

/// Detect the type of the filesystem on `device`.
///
/// Returns `Ok(None)` when no signature is detected. A signature whose usage
/// is not `filesystem` (e.g. a partition table or RAID member) is an
/// [`ProbeError::Invalid`] error.
pub fn get_fstype(device: &Utf8Path) -> Result<Option<String>, ProbeError> {
    // Verify we can open the device read-only before probing; this gives a
    // much better error than blkid's generic exit status.
    let _fd = open_readonly(device)?;

    let Some(sig) = safe_probe(device)? else {
        return Ok(None);
    };
    let usage = sig.usage.ok_or_else(|| {
        ProbeError::Fail(format!("Failed to get usage for the device '{device}'"))
    })?;
    if usage != "filesystem" {
        return Err(ProbeError::Invalid(format!(
            "The signature on the device '{device}' is of type '{usage}', not 'filesystem'"
        )));
    }
    sig.sig_type
        .map(Some)
        .ok_or_else(|| {
            ProbeError::Fail(format!(
                "Failed to get filesystem type for the device '{device}'"
            ))
        })
}

/// Read the label and UUID of the filesystem on `device` via the prober.
/// Missing values are reported as empty strings.
pub fn read_label_uuid(device: &Utf8Path) -> Result<(String, String), ProbeError> {
    let _fd = open_readonly(device)?;
    let sig = safe_probe(device)?.unwrap_or_default();
    Ok((
        sig.label.unwrap_or_default(),
        sig.uuid.unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_export() {
        let fixture = indoc! {"
            DEVNAME=/dev/sda1
            LABEL=boot
            UUID=12345678-1234-1234-1234-123456789abc
            VERSION=1.0
            TYPE=ext4
            USAGE=filesystem
        "};
        let map = parse_export(fixture);
        assert_eq!(map.get("TYPE").map(String::as_str), Some("ext4"));
        assert_eq!(map.get("USAGE").map(String::as_str), Some("filesystem"));
        assert_eq!(map.get("LABEL").map(String::as_str), Some("boot"));
        assert!(!map.contains_key("PTTYPE"));
    }

    #[test]
    fn test_parse_wipefs_offsets() -> anyhow::Result<()> {
        let fixture = indoc! {"
            0x438,5c8c5cff-a34d-4dc3-9d90-705fb3396def,boot,ext4
            0x1fe,,,dos
        "};
        let offsets = parse_wipefs_offsets(fixture)?;
        assert_eq!(offsets, ["0x438", "0x1fe"]);
        Ok(())
    }

    #[test]
    fn test_parse_wipefs_offsets_empty() -> anyhow::Result<()> {
        assert!(parse_wipefs_offsets("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_wipefs_offsets_garbage() {
        assert!(parse_wipefs_offsets("not,a,real,line").is_err());
    }

    #[test]
    fn test_get_fstype_missing_device() {
        let err = get_fstype(Utf8Path::new("/definitely/not/a/device")).unwrap_err();
        assert!(matches!(err, ProbeError::Fail(_)));
    }
}
