//! Availability gating for the LVM technologies.

use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dbus::blocking::stdintf::org_freedesktop_dbus::Properties;

use blockdev_utils::{
    check_deps, compare_versions, CommandRunExt, DepsCache, UtilDep,
};

use crate::conn::with_conn;
use crate::{LvmError, LVM_BUS_NAME, MANAGER_INTF, MANAGER_OBJ};

const LVM_MIN_VERSION: &str = "2.02.116";
/// lvmdbusd learned the writecache segment type with this API version.
const LVMDBUSD_WRITECACHE_VERSION: &str = "1.1.0";

/// LVM technologies the library can gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvmTech {
    Basic,
    BasicSnap,
    Thin,
    Cache,
    Calcs,
    ThinCalcs,
    GlobConf,
    Vdo,
    Writecache,
    Devices,
}

bitflags::bitflags! {
    /// Modes of operation for [`is_tech_avail`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LvmTechMode: u32 {
        const CREATE = 1 << 0;
        const REMOVE = 1 << 1;
        const MODIFY = 1 << 2;
        const QUERY = 1 << 3;
    }
}

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_LVM: u32 = 1 << 0;
const DEPS_LVMDEVICES: u32 = 1 << 1;

static DEPS: &[UtilDep] = &[
    UtilDep::with_version("lvm", LVM_MIN_VERSION, "version", r"LVM version:\s+([\d\.]+)"),
    UtilDep::new("lvmdevices"),
];

/// Bitmask cache for the D-Bus / feature / module probes. Only successful
/// probes are cached; failures are re-tried on every call.
struct ProbeCache {
    bits: AtomicU32,
    lock: Mutex<()>,
}

impl ProbeCache {
    const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            lock: Mutex::new(()),
        }
    }

    fn check(&self, mask: u32, probe: impl FnOnce() -> Result<(), LvmError>) -> Result<(), LvmError> {
        if self.bits.load(Ordering::Acquire) & mask == mask {
            return Ok(());
        }
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.bits.load(Ordering::Acquire) & mask == mask {
            return Ok(());
        }
        probe()?;
        self.bits.fetch_or(mask, Ordering::Release);
        Ok(())
    }
}

static PROBES: ProbeCache = ProbeCache::new();

const PROBE_SERVICE: u32 = 1 << 0;
const PROBE_SERVICE_WRITECACHE: u32 = 1 << 1;
const PROBE_FEATURE_VDO: u32 = 1 << 2;
const PROBE_FEATURE_WRITECACHE: u32 = 1 << 3;
const PROBE_MODULE_KVDO: u32 = 1 << 4;

/// Whether the LVM D-Bus service is reachable.
pub(crate) fn check_service_available() -> Result<(), LvmError> {
    PROBES.check(PROBE_SERVICE, || {
        with_conn(|conn| {
            let proxy = conn.with_proxy(LVM_BUS_NAME, MANAGER_OBJ, Duration::from_secs(5));
            proxy
                .method_call::<(String,), _, _, _>(
                    "org.freedesktop.DBus.Introspectable",
                    "Introspect",
                    (),
                )
                .map_err(|e| {
                    LvmError::TechUnavail(format!(
                        "The {LVM_BUS_NAME} D-Bus service is not available: {e}"
                    ))
                })?;
            Ok(())
        })
    })
}

fn check_service_version(minimum: &'static str, mask: u32) -> Result<(), LvmError> {
    PROBES.check(mask, || {
        check_service_available()?;
        let version: String = with_conn(|conn| {
            let proxy = conn.with_proxy(LVM_BUS_NAME, MANAGER_OBJ, Duration::from_secs(5));
            proxy
                .get(MANAGER_INTF, "Version")
                .map_err(|e| LvmError::Fail(format!("Failed to get the LVM API version: {e}")))
        })?;
        if compare_versions(&version, minimum) == std::cmp::Ordering::Less {
            return Err(LvmError::TechUnavail(format!(
                "Too low version of the LVM D-Bus API: {version}. At least {minimum} required."
            )));
        }
        Ok(())
    })
}

/// Whether `lvm segtypes` reports the given segment type.
fn check_segtype_feature(segtype: &'static str, mask: u32) -> Result<(), LvmError> {
    PROBES.check(mask, || {
        check_deps(&DEPS_CACHE, DEPS_LVM, DEPS)?;
        let output = Command::new("lvm").arg("segtypes").run_get_output()?;
        if output.lines().any(|l| l.trim() == segtype) {
            Ok(())
        } else {
            Err(LvmError::TechUnavail(format!(
                "Required feature '{segtype}' not supported by lvm"
            )))
        }
    })
}

/// Whether the given kernel module is loaded or at least available.
fn check_module(module: &'static str, mask: u32) -> Result<(), LvmError> {
    PROBES.check(mask, || {
        if std::path::Path::new(&format!("/sys/module/{module}")).exists() {
            return Ok(());
        }
        Command::new("modprobe")
            .args(["--dry-run", "--quiet", module])
            .run()
            .map_err(|_| {
                LvmError::TechUnavail(format!("Kernel module '{module}' is not available"))
            })
    })
}

/// Whether the given technology-mode combination is available: supported by
/// this implementation and with all runtime dependencies in place.
pub fn is_tech_avail(tech: LvmTech, modes: LvmTechMode) -> Result<(), LvmError> {
    match tech {
        LvmTech::ThinCalcs => {
            if modes.intersects(!LvmTechMode::QUERY) {
                return Err(LvmError::TechUnavail(
                    "Only 'query' supported for thin calculations".to_string(),
                ));
            }
            Ok(())
        }
        LvmTech::Calcs => {
            if modes.intersects(!LvmTechMode::QUERY) {
                return Err(LvmError::TechUnavail(
                    "Only 'query' supported for calculations".to_string(),
                ));
            }
            Ok(())
        }
        LvmTech::Vdo => {
            check_service_available()?;
            check_segtype_feature("vdo", PROBE_FEATURE_VDO)?;
            check_module("kvdo", PROBE_MODULE_KVDO)
        }
        LvmTech::Writecache => {
            check_service_version(LVMDBUSD_WRITECACHE_VERSION, PROBE_SERVICE_WRITECACHE)?;
            check_segtype_feature("writecache", PROBE_FEATURE_WRITECACHE)
        }
        LvmTech::Devices => {
            check_deps(&DEPS_CACHE, DEPS_LVMDEVICES, DEPS)?;
            Ok(())
        }
        // everything else just needs the service
        _ => check_service_available(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calcs_are_local() {
        is_tech_avail(LvmTech::Calcs, LvmTechMode::QUERY).unwrap();
        is_tech_avail(LvmTech::ThinCalcs, LvmTechMode::QUERY).unwrap();
        is_tech_avail(LvmTech::ThinCalcs, LvmTechMode::empty()).unwrap();
        assert!(matches!(
            is_tech_avail(LvmTech::ThinCalcs, LvmTechMode::CREATE),
            Err(LvmError::TechUnavail(_))
        ));
        assert!(matches!(
            is_tech_avail(LvmTech::Calcs, LvmTechMode::MODIFY | LvmTechMode::QUERY),
            Err(LvmError::TechUnavail(_))
        ));
    }
}
