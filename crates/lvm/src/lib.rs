//! LVM management over the lvmdbusd D-Bus API.
//!
//! All state lives in the LVM service; this crate is an adapter that calls
//! its methods (waiting on Job objects for long-running operations),
//! decodes its property bags into typed records, and adds the local size
//! math used when planning volume layouts. Per-call configuration overrides
//! (`--config`, `--devices`) are serialized through a process-wide mutex so
//! concurrent callers cannot corrupt each other's overrides.

mod error;
pub use error::LvmError;
mod avail;
pub use avail::{is_tech_avail, LvmTech, LvmTechMode};
mod config;
pub use config::{get_devices_filter, get_global_config, set_devices_filter, set_global_config};
mod conn;
mod props;
pub use props::{LvData, PvData, SegData, VgData};
mod dm;
pub use dm::{cache_stats, CacheMode, CacheStats};
mod sizes;
pub use sizes::*;

mod cache;
mod devices;
mod lv;
mod pv;
mod thin;
mod vdo;
mod vg;

pub use cache::*;
pub use devices::*;
pub use lv::*;
pub use pv::*;
pub use thin::*;
pub use vdo::*;
pub use vg::*;

/// The well-known bus name of the LVM D-Bus daemon.
pub(crate) const LVM_BUS_NAME: &str = "com.redhat.lvmdbus1";
pub(crate) const LVM_OBJ_PREFIX: &str = "/com/redhat/lvmdbus1";
pub(crate) const MANAGER_OBJ: &str = "/com/redhat/lvmdbus1/Manager";
pub(crate) const MANAGER_INTF: &str = "com.redhat.lvmdbus1.Manager";
pub(crate) const JOB_INTF: &str = "com.redhat.lvmdbus1.Job";
pub(crate) const PV_INTF: &str = "com.redhat.lvmdbus1.Pv";
pub(crate) const VG_INTF: &str = "com.redhat.lvmdbus1.Vg";
pub(crate) const VG_VDO_INTF: &str = "com.redhat.lvmdbus1.VgVdo";
pub(crate) const LV_CMN_INTF: &str = "com.redhat.lvmdbus1.LvCommon";
pub(crate) const LV_INTF: &str = "com.redhat.lvmdbus1.Lv";
pub(crate) const CACHED_LV_INTF: &str = "com.redhat.lvmdbus1.CachedLv";
pub(crate) const THPOOL_INTF: &str = "com.redhat.lvmdbus1.ThinPool";
pub(crate) const CACHE_POOL_INTF: &str = "com.redhat.lvmdbus1.CachePool";
pub(crate) const VDO_POOL_INTF: &str = "com.redhat.lvmdbus1.VdoPool";
