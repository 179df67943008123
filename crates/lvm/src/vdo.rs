//! VDO pool operations and statistics.

use std::collections::HashMap;

use blockdev_utils::{sizes::MIB, ExtraArg};

use crate::config::lock_config;
use crate::conn::{
    call_lvm_obj_method_sync, extra_str, get_lvm_object_properties, CallConfig, Param,
};
use crate::props::{prop_f64, prop_path, prop_str, prop_u64, DbusResolver, PathResolver};
use crate::{LvmError, LV_CMN_INTF, VDO_POOL_INTF, VG_VDO_INTF};

const VDO_POOL_SUFFIX: &str = "vpool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdoOperatingMode {
    Recovering,
    ReadOnly,
    Normal,
    #[default]
    Unknown,
}

impl VdoOperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VdoOperatingMode::Recovering => "recovering",
            VdoOperatingMode::ReadOnly => "read-only",
            VdoOperatingMode::Normal => "normal",
            VdoOperatingMode::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "recovering" => VdoOperatingMode::Recovering,
            "read-only" => VdoOperatingMode::ReadOnly,
            "normal" => VdoOperatingMode::Normal,
            other => {
                tracing::debug!("Unknown VDO operating mode: {other}");
                VdoOperatingMode::Unknown
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdoCompressionState {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl VdoCompressionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VdoCompressionState::Online => "online",
            VdoCompressionState::Offline => "offline",
            VdoCompressionState::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "online" => VdoCompressionState::Online,
            "offline" => VdoCompressionState::Offline,
            other => {
                tracing::debug!("Unknown VDO compression state: {other}");
                VdoCompressionState::Unknown
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdoIndexState {
    Error,
    Closed,
    Opening,
    Closing,
    Offline,
    Online,
    #[default]
    Unknown,
}

impl VdoIndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VdoIndexState::Error => "error",
            VdoIndexState::Closed => "closed",
            VdoIndexState::Opening => "opening",
            VdoIndexState::Closing => "closing",
            VdoIndexState::Offline => "offline",
            VdoIndexState::Online => "online",
            VdoIndexState::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "error" => VdoIndexState::Error,
            "closed" => VdoIndexState::Closed,
            "opening" => VdoIndexState::Opening,
            "closing" => VdoIndexState::Closing,
            "offline" => VdoIndexState::Offline,
            "online" => VdoIndexState::Online,
            other => {
                tracing::debug!("Unknown VDO index state: {other}");
                VdoIndexState::Unknown
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdoWritePolicy {
    Auto,
    Sync,
    Async,
    #[default]
    Unknown,
}

impl VdoWritePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VdoWritePolicy::Auto => "auto",
            VdoWritePolicy::Sync => "sync",
            VdoWritePolicy::Async => "async",
            VdoWritePolicy::Unknown => "unknown",
        }
    }

    /// Parse a write policy; unlike the state enums an unknown policy is an
    /// error, callers feed this into pool creation.
    pub fn from_policy_str(s: &str) -> Result<Self, LvmError> {
        match s {
            "auto" => Ok(VdoWritePolicy::Auto),
            "sync" => Ok(VdoWritePolicy::Sync),
            "async" => Ok(VdoWritePolicy::Async),
            other => Err(LvmError::VdoPolicyInvalid(format!(
                "Invalid policy given: {other}"
            ))),
        }
    }

    fn lenient_from_str(s: &str) -> Self {
        Self::from_policy_str(s).unwrap_or(VdoWritePolicy::Unknown)
    }
}

/// Data about a VDO pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VdoPoolData {
    pub operating_mode: VdoOperatingMode,
    pub compression_state: VdoCompressionState,
    pub index_state: VdoIndexState,
    pub write_policy: VdoWritePolicy,
    pub used_size: u64,
    pub saving_percent: f64,
    pub index_memory_size: u64,
    pub compression: bool,
    pub deduplication: bool,
}

pub(crate) fn vdo_from_props(props: &dbus::arg::PropMap) -> VdoPoolData {
    VdoPoolData {
        operating_mode: VdoOperatingMode::from_str(
            prop_str(props, "OperatingMode").unwrap_or_default().as_str(),
        ),
        compression_state: VdoCompressionState::from_str(
            prop_str(props, "CompressionState")
                .unwrap_or_default()
                .as_str(),
        ),
        index_state: VdoIndexState::from_str(
            prop_str(props, "IndexState").unwrap_or_default().as_str(),
        ),
        write_policy: VdoWritePolicy::lenient_from_str(
            prop_str(props, "WritePolicy").unwrap_or_default().as_str(),
        ),
        used_size: prop_u64(props, "UsedSize"),
        saving_percent: prop_f64(props, "SavingPercent"),
        index_memory_size: prop_u64(props, "IndexMemorySize"),
        compression: prop_str(props, "Compression").as_deref() == Some("enabled"),
        deduplication: prop_str(props, "Deduplication").as_deref() == Some("enabled"),
    }
}

/// Create a VDO pool LV with a VDO LV on top of it. `pool_name` defaults
/// to `<lv_name>_vpool`; `index_memory` of 0 uses the LVM default. The
/// index memory size and write policy can only be specified through the
/// LVM config, so they are layered into the global config string for the
/// duration of this one call.
#[allow(clippy::too_many_arguments)]
pub fn vdo_pool_create(
    vg_name: &str,
    lv_name: &str,
    pool_name: Option<&str>,
    data_size: u64,
    virtual_size: u64,
    index_memory: u64,
    compression: bool,
    deduplication: bool,
    write_policy: VdoWritePolicy,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    if write_policy == VdoWritePolicy::Unknown {
        return Err(LvmError::VdoPolicyInvalid(
            "Invalid LVM VDO write policy.".to_string(),
        ));
    }

    let pool_name = match pool_name {
        Some(name) => name.to_string(),
        None => format!("{lv_name}_{VDO_POOL_SUFFIX}"),
    };

    let params = vec![
        Param::Str(pool_name),
        Param::Str(lv_name.to_string()),
        Param::U64(data_size),
        Param::U64(virtual_size),
    ];
    let extra_params = vec![
        extra_str("--compression", if compression { "y" } else { "n" }),
        extra_str("--deduplication", if deduplication { "y" } else { "n" }),
    ];

    // hold the config mutex over the whole call so the amended config
    // cannot leak into (or be clobbered by) concurrent callers
    let config = lock_config();
    let base_config = config.global_config.clone().unwrap_or_default();
    let amended = if index_memory != 0 {
        format!(
            "{base_config} allocation {{vdo_index_memory_size_mb={} vdo_write_policy=\"{}\"}}",
            index_memory / MIB,
            write_policy.as_str()
        )
    } else {
        format!(
            "{base_config} allocation {{vdo_write_policy=\"{}\"}}",
            write_policy.as_str()
        )
    };
    let call_config = CallConfig::Override {
        global_config: Some(amended),
        devices_filter: config.devices_filter.clone(),
    };

    call_lvm_obj_method_sync(
        vg_name,
        VG_VDO_INTF,
        "CreateVdoPoolandLv",
        params,
        extra_params,
        extra,
        call_config,
    )?;
    Ok(())
}

/// Enable compression on the VDO pool `vg_name/pool_name`.
pub fn vdo_enable_compression(
    vg_name: &str,
    pool_name: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{pool_name}"),
        VDO_POOL_INTF,
        "EnableCompression",
        Vec::new(),
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Disable compression on the VDO pool `vg_name/pool_name`.
pub fn vdo_disable_compression(
    vg_name: &str,
    pool_name: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{pool_name}"),
        VDO_POOL_INTF,
        "DisableCompression",
        Vec::new(),
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Enable deduplication on the VDO pool `vg_name/pool_name`.
pub fn vdo_enable_deduplication(
    vg_name: &str,
    pool_name: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{pool_name}"),
        VDO_POOL_INTF,
        "EnableDeduplication",
        Vec::new(),
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Disable deduplication on the VDO pool `vg_name/pool_name`.
pub fn vdo_disable_deduplication(
    vg_name: &str,
    pool_name: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{pool_name}"),
        VDO_POOL_INTF,
        "DisableDeduplication",
        Vec::new(),
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Information about the VDO pool `vg_name/pool_name`.
pub fn vdo_info(vg_name: &str, pool_name: &str) -> Result<VdoPoolData, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{pool_name}"), VDO_POOL_INTF)?;
    Ok(vdo_from_props(&props))
}

/// Resize the VDO LV `vg_name/lv_name` (its virtual size).
pub fn vdo_resize(vg_name: &str, lv_name: &str, size: u64, extra: &[ExtraArg]) -> Result<(), LvmError> {
    crate::lv_resize(vg_name, lv_name, size, extra)
}

/// Resize the VDO pool `vg_name/pool_name` (its physical size).
pub fn vdo_pool_resize(
    vg_name: &str,
    pool_name: &str,
    size: u64,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    crate::lv_resize(vg_name, pool_name, size, extra)
}

/// Converting an existing LV into a VDO pool is not expressible over the
/// LVM D-Bus API.
pub fn vdo_pool_convert(
    _vg_name: &str,
    _pool_lv: &str,
    _name: Option<&str>,
    _extra: &[ExtraArg],
) -> Result<(), LvmError> {
    Err(LvmError::TechUnavail(
        "Converting an LV into a VDO pool is not supported by the LVM D-Bus API.".to_string(),
    ))
}

/// The name of the VDO pool under the VDO LV `vg_name/lv_name`.
pub fn vdo_lv_pool_name(vg_name: &str, lv_name: &str) -> Result<String, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{lv_name}"), LV_CMN_INTF)?;
    let segtypes = crate::props::prop_strv(&props, "SegType");
    if segtypes.first().map(String::as_str) != Some("vdo") {
        return Err(LvmError::NoExist(format!(
            "The LV '{lv_name}' is not a VDO LV and thus have no VDO pool"
        )));
    }
    let pool_path = prop_path(&props, "PoolLv").ok_or_else(|| {
        LvmError::Parse(format!("Failed to get the pool of the VDO LV '{lv_name}'"))
    })?;
    DbusResolver
        .name_of(&pool_path, LV_CMN_INTF)
        .ok_or_else(|| {
            LvmError::Parse(format!("Failed to get the pool name for the LV '{lv_name}'"))
        })
}

/// Selected statistics of a VDO pool, `-1` where a value is unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VdoStats {
    pub block_size: i64,
    pub logical_block_size: i64,
    pub physical_blocks: i64,
    pub data_blocks_used: i64,
    pub overhead_blocks_used: i64,
    pub logical_blocks_used: i64,
    pub used_percent: i64,
    pub saving_percent: i64,
    pub write_amplification_ratio: f64,
}

/// All statistics the kernel kvdo module exposes for the pool, read from
/// `/sys/kvdo/<name>/statistics`. The available keys vary with the module
/// version; some derived keys mimic the output of the vdo tools.
pub fn vdo_get_stats_full(
    vg_name: &str,
    pool_name: &str,
) -> Result<HashMap<String, String>, LvmError> {
    let kvdo_name = format!("{vg_name}-{pool_name}-{VDO_POOL_SUFFIX}");
    let stats_dir = format!("/sys/kvdo/{kvdo_name}/statistics");
    let entries = std::fs::read_dir(&stats_dir).map_err(|e| {
        LvmError::Fail(format!("Failed to read kvdo statistics from '{stats_dir}': {e}"))
    })?;

    let mut stats = HashMap::new();
    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Ok(value) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        stats.insert(name, value.trim().to_string());
    }

    derive_vdo_stats(&mut stats);
    Ok(stats)
}

/// Compute the derived statistics the vdo tools used to report.
fn derive_vdo_stats(stats: &mut HashMap<String, String>) {
    let get = |stats: &HashMap<String, String>, key: &str| -> Option<i64> {
        stats.get(key).and_then(|v| v.parse().ok())
    };
    let physical = get(stats, "physical_blocks");
    let data_used = get(stats, "data_blocks_used");
    let overhead = get(stats, "overhead_blocks_used");
    let logical_used = get(stats, "logical_blocks_used");

    if let (Some(physical), Some(data_used), Some(overhead)) = (physical, data_used, overhead) {
        if physical > 0 {
            let used_percent =
                (100.0 * (data_used + overhead) as f64 / physical as f64 + 0.5) as i64;
            stats.insert("usedPercent".to_string(), used_percent.to_string());
        }
    }
    if let (Some(logical_used), Some(data_used)) = (logical_used, data_used) {
        if logical_used > 0 {
            let saving_percent =
                (100.0 * (logical_used - data_used) as f64 / logical_used as f64) as i64;
            stats.insert("savingPercent".to_string(), saving_percent.to_string());
        }
    }
    if let (Some(logical_used), Some(bios_out)) = (logical_used, get(stats, "bios_out_write")) {
        if logical_used != 0 {
            // an approximation of the write amplification
            let ratio = bios_out as f64 / logical_used as f64;
            stats.insert("writeAmplificationRatio".to_string(), format!("{ratio:.2}"));
        }
    }
}

/// Selected VDO pool statistics in a fixed structure; `-1` where the
/// module does not report a value.
pub fn vdo_get_stats(vg_name: &str, pool_name: &str) -> Result<VdoStats, LvmError> {
    let full = vdo_get_stats_full(vg_name, pool_name)?;
    let get = |key: &str| -> i64 {
        full.get(key).and_then(|v| v.parse().ok()).unwrap_or(-1)
    };
    Ok(VdoStats {
        block_size: get("block_size"),
        logical_block_size: get("logical_block_size"),
        physical_blocks: get("physical_blocks"),
        data_blocks_used: get("data_blocks_used"),
        overhead_blocks_used: get("overhead_blocks_used"),
        logical_blocks_used: get("logical_blocks_used"),
        used_percent: get("usedPercent"),
        saving_percent: get("savingPercent"),
        write_amplification_ratio: full
            .get("writeAmplificationRatio")
            .and_then(|v| v.parse().ok())
            .unwrap_or(-1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbus::arg::Variant;

    #[test]
    fn test_enum_string_roundtrips() {
        for mode in [
            VdoOperatingMode::Recovering,
            VdoOperatingMode::ReadOnly,
            VdoOperatingMode::Normal,
        ] {
            assert_eq!(VdoOperatingMode::from_str(mode.as_str()), mode);
        }
        assert_eq!(
            VdoOperatingMode::from_str("somethingelse"),
            VdoOperatingMode::Unknown
        );

        for state in [
            VdoIndexState::Error,
            VdoIndexState::Closed,
            VdoIndexState::Opening,
            VdoIndexState::Closing,
            VdoIndexState::Offline,
            VdoIndexState::Online,
        ] {
            assert_eq!(VdoIndexState::from_str(state.as_str()), state);
        }

        for policy in [VdoWritePolicy::Auto, VdoWritePolicy::Sync, VdoWritePolicy::Async] {
            assert_eq!(
                VdoWritePolicy::from_policy_str(policy.as_str()).unwrap(),
                policy
            );
        }
        assert!(matches!(
            VdoWritePolicy::from_policy_str("lazy"),
            Err(LvmError::VdoPolicyInvalid(_))
        ));
    }

    #[test]
    fn test_vdo_from_props() {
        let mut props = dbus::arg::PropMap::new();
        let mut insert = |k: &str, v: Box<dyn dbus::arg::RefArg>| {
            props.insert(k.to_string(), Variant(v));
        };
        insert("OperatingMode", Box::new("normal".to_string()));
        insert("CompressionState", Box::new("online".to_string()));
        insert("IndexState", Box::new("online".to_string()));
        insert("WritePolicy", Box::new("auto".to_string()));
        insert("UsedSize", Box::new(1048576u64));
        insert("SavingPercent", Box::new(37.5f64));
        insert("IndexMemorySize", Box::new(268435456u64));
        insert("Compression", Box::new("enabled".to_string()));
        insert("Deduplication", Box::new("".to_string()));

        let data = vdo_from_props(&props);
        assert_eq!(data.operating_mode, VdoOperatingMode::Normal);
        assert_eq!(data.compression_state, VdoCompressionState::Online);
        assert_eq!(data.index_state, VdoIndexState::Online);
        assert_eq!(data.write_policy, VdoWritePolicy::Auto);
        assert_eq!(data.used_size, 1048576);
        assert_eq!(data.saving_percent, 37.5);
        assert!(data.compression);
        assert!(!data.deduplication);
    }

    #[test]
    fn test_derive_vdo_stats() {
        let mut stats = HashMap::new();
        stats.insert("physical_blocks".to_string(), "1000".to_string());
        stats.insert("data_blocks_used".to_string(), "100".to_string());
        stats.insert("overhead_blocks_used".to_string(), "100".to_string());
        stats.insert("logical_blocks_used".to_string(), "400".to_string());
        derive_vdo_stats(&mut stats);
        assert_eq!(stats.get("usedPercent").map(String::as_str), Some("20"));
        assert_eq!(stats.get("savingPercent").map(String::as_str), Some("75"));
    }
}
