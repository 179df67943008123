//! Thin pool and thin volume operations.

use blockdev_utils::ExtraArg;

use crate::conn::{
    call_lvm_obj_method_sync, extra_str, get_lvm_object_properties, get_object_path, CallConfig,
    Param,
};
use crate::props::{prop_path, DbusResolver, PathResolver};
use crate::sizes::size_str_param;
use crate::{LvmError, LV_CMN_INTF, THPOOL_INTF, VG_INTF};

/// Create a thin pool `vg_name/lv_name` of the given size. Metadata size,
/// chunk size and profile use LVM defaults when zero/`None`.
pub fn thpool_create(
    vg_name: &str,
    lv_name: &str,
    size: u64,
    md_size: u64,
    chunk_size: u64,
    profile: Option<&str>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let mut extra_params = Vec::new();
    if md_size != 0 {
        extra_params.push(extra_str("poolmetadatasize", &size_str_param(md_size)));
    }
    if chunk_size != 0 {
        extra_params.push(extra_str("chunksize", &size_str_param(chunk_size)));
    }
    if let Some(profile) = profile {
        extra_params.push(extra_str("profile", profile));
    }

    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "LvCreateLinear",
        vec![
            Param::Str(lv_name.to_string()),
            Param::U64(size),
            Param::Bool(true),
        ],
        extra_params,
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Create a thin LV of virtual `size` allocating from the pool
/// `vg_name/pool_name`.
pub fn thlv_create(
    vg_name: &str,
    pool_name: &str,
    lv_name: &str,
    size: u64,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{pool_name}"),
        THPOOL_INTF,
        "LvCreate",
        vec![Param::Str(lv_name.to_string()), Param::U64(size)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// The name of the pool the thin LV `vg_name/lv_name` allocates from.
pub fn thlv_pool_name(vg_name: &str, lv_name: &str) -> Result<String, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{lv_name}"), LV_CMN_INTF)?;
    let is_thin = crate::props::prop_bool(&props, "IsThinVolume");
    if !is_thin {
        return Err(LvmError::NoExist(format!(
            "The LV '{lv_name}' is not a thin LV and thus have no thin pool"
        )));
    }
    let pool_path = prop_path(&props, "PoolLv").ok_or_else(|| {
        LvmError::Parse(format!("Failed to get the pool of the thin LV '{lv_name}'"))
    })?;
    DbusResolver
        .name_of(&pool_path, LV_CMN_INTF)
        .ok_or_else(|| {
            LvmError::Parse(format!("Failed to get the pool name for the LV '{lv_name}'"))
        })
}

/// Create a (thin) snapshot of the thin LV `vg_name/origin_name`,
/// optionally in a different pool.
pub fn thsnapshot_create(
    vg_name: &str,
    origin_name: &str,
    snapshot_name: &str,
    pool_name: Option<&str>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let mut extra_params = Vec::new();
    if let Some(pool_name) = pool_name {
        extra_params.push(extra_str("thinpool", pool_name));
    }
    crate::conn::call_lv_method_sync(
        vg_name,
        origin_name,
        crate::LV_INTF,
        "Snapshot",
        vec![Param::Str(snapshot_name.to_string()), Param::U64(0)],
        extra_params,
        extra,
    )?;
    Ok(())
}

/// Convert the LVs `data_lv` and `metadata_lv` into a new thin pool,
/// optionally renamed to `name` (otherwise the data LV's name is
/// inherited).
pub fn thpool_convert(
    vg_name: &str,
    data_lv: &str,
    metadata_lv: &str,
    name: Option<&str>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let data_lv_path = get_object_path(&format!("{vg_name}/{data_lv}"))?;
    let metadata_lv_path = get_object_path(&format!("{vg_name}/{metadata_lv}"))?;

    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "CreateThinPool",
        vec![
            Param::ObjPath(metadata_lv_path),
            Param::ObjPath(data_lv_path),
        ],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;

    if let Some(name) = name {
        crate::lv_rename(vg_name, data_lv, name, &[])?;
    }
    Ok(())
}
