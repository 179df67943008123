//! The few raw ioctls the library needs. Kept in one module so the rest of
//! the crate stays free of unsafe code.
#![allow(unsafe_code)]

use std::os::fd::AsRawFd;

use camino::Utf8Path;
use rustix::fs::{Mode, OFlags};

use crate::FsError;

// <linux/fs.h>
const FIFREEZE: libc::c_ulong = 0xC0045877;
const FITHAW: libc::c_ulong = 0xC0045878;
const BLKSSZGET: libc::c_ulong = 0x1268;

fn open_readonly(path: &Utf8Path) -> Result<rustix::fd::OwnedFd, FsError> {
    rustix::fs::open(
        path.as_std_path(),
        OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| FsError::Fail(format!("Failed to open the mountpoint '{path}': {e}")))
}

/// Issue the FIFREEZE/FITHAW ioctl on `mountpoint`.
pub(crate) fn freeze_ioctl(mountpoint: &Utf8Path, freeze: bool) -> Result<(), FsError> {
    let fd = open_readonly(mountpoint)?;
    let op = if freeze { FIFREEZE } else { FITHAW };
    let r = unsafe { libc::ioctl(fd.as_raw_fd(), op, 0) };
    if r != 0 {
        return Err(FsError::Fail(format!(
            "Failed to {} '{mountpoint}': {}.",
            if freeze { "freeze" } else { "unfreeze" },
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// The logical sector size of a block device (BLKSSZGET).
pub(crate) fn logical_block_size(device: &Utf8Path) -> Result<u64, FsError> {
    let fd = rustix::fs::open(
        device.as_std_path(),
        OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| {
        FsError::Fail(format!(
            "Failed to open the device '{device}' to get its block size: {e}"
        ))
    })?;
    let mut blksize: libc::c_int = 0;
    let r = unsafe { libc::ioctl(fd.as_raw_fd(), BLKSSZGET, &mut blksize) };
    if r != 0 {
        return Err(FsError::Fail(format!(
            "Failed to get block size of the device '{device}': {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(blksize as u64)
}
