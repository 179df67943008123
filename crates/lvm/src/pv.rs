//! Physical volume operations.

use camino::Utf8Path;

use blockdev_utils::ExtraArg;

use crate::conn::{
    call_lvm_method_sync, call_lvm_obj_method_sync, extra_str, get_existing_objects,
    get_lvm_object_properties, get_object_path, get_object_properties, get_object_property,
    CallConfig, Param,
};
use crate::props::{pv_from_props, DbusResolver, PvData};
use crate::sizes::size_str_param;
use crate::{LvmError, LVM_OBJ_PREFIX, MANAGER_INTF, MANAGER_OBJ, PV_INTF, VG_INTF};

fn pv_spec(device: &Utf8Path) -> String {
    // lvmdbusd knows PVs by their /dev paths
    let device = device.as_str();
    if device.starts_with("/dev/") {
        device.to_string()
    } else {
        format!("/dev/{device}")
    }
}

/// Make a PV from `device`. `data_alignment` (the alignment of the first
/// PE) and `metadata_size` use LVM defaults when zero.
pub fn pv_create(
    device: &Utf8Path,
    data_alignment: u64,
    metadata_size: u64,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let mut extra_params = Vec::new();
    if data_alignment != 0 {
        extra_params.push(extra_str("dataalignment", &size_str_param(data_alignment)));
    }
    if metadata_size != 0 {
        extra_params.push(extra_str("metadatasize", &size_str_param(metadata_size)));
    }

    call_lvm_method_sync(
        MANAGER_OBJ,
        MANAGER_INTF,
        "PvCreate",
        vec![Param::Str(device.to_string())],
        extra_params,
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Resize the PV on `device` to `size` bytes (zero adapts it to the size
/// of the underlying device).
pub fn pv_resize(device: &Utf8Path, size: u64, extra: &[ExtraArg]) -> Result<(), LvmError> {
    let obj_path = get_object_path(&pv_spec(device))?;
    call_lvm_method_sync(
        &obj_path,
        PV_INTF,
        "ReSize",
        vec![Param::U64(size)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Remove the PV from `device`. A device that is not a PV is left alone
/// without an error; this function is idempotent.
pub fn pv_remove(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), LvmError> {
    if !device.as_std_path().exists() {
        return Err(LvmError::NoExist(format!(
            "The device '{device}' doesn't exist"
        )));
    }

    // one has to be really persuasive to remove a PV (the double force is
    // not a bug, at least not in this code)
    let extra_params = vec![extra_str("-ff", ""), extra_str("--yes", "")];
    match call_lvm_obj_method_sync(
        &pv_spec(device),
        PV_INTF,
        "Remove",
        Vec::new(),
        extra_params,
        extra,
        CallConfig::Global,
    ) {
        Ok(_) => Ok(()),
        // not a PV, nothing to do
        Err(LvmError::NoExist(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Move extents off of the `src` PV, onto `dest` when given (otherwise VG
/// allocation rules pick the targets).
pub fn pv_move(src: &Utf8Path, dest: Option<&Utf8Path>, extra: &[ExtraArg]) -> Result<(), LvmError> {
    let src_path = get_object_path(&pv_spec(src)).map_err(|e| match e {
        LvmError::NoExist(_) => LvmError::NoExist(format!("The source PV '{src}' doesn't exist")),
        other => other,
    })?;
    let dest_path = match dest {
        Some(dest) => Some(get_object_path(&pv_spec(dest)).map_err(|e| match e {
            LvmError::NoExist(_) => {
                LvmError::NoExist(format!("The destination PV '{dest}' doesn't exist"))
            }
            other => other,
        })?),
        None => None,
    };

    let vg_path = get_object_property(&src_path, PV_INTF, "Vg")?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            LvmError::Parse(format!("Failed to get the VG of the PV '{src}'"))
        })?;

    let params = vec![
        Param::ObjPath(src_path),
        Param::Range(0, 0),
        Param::PvRanges(dest_path.map(|p| vec![(p, 0, 0)]).unwrap_or_default()),
    ];
    call_lvm_method_sync(
        &vg_path,
        VG_INTF,
        "Move",
        params,
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Scan the system (or `device`, when updating the cache) for PVs.
pub fn pv_scan(
    device: Option<&Utf8Path>,
    update_cache: bool,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let devices = match device {
        Some(device) if update_cache => vec![device.to_string()],
        _ => Vec::new(),
    };
    let params = vec![
        Param::Bool(false),
        Param::Bool(update_cache),
        Param::StrArray(devices),
        // (major, minor) pairs, never specified
        Param::MajMinArray(Vec::new()),
    ];
    call_lvm_method_sync(
        MANAGER_OBJ,
        MANAGER_INTF,
        "PvScan",
        params,
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Information about the PV on `device`.
pub fn pv_info(device: &Utf8Path) -> Result<PvData, LvmError> {
    let props = get_lvm_object_properties(&pv_spec(device), PV_INTF)?;
    pv_from_props(&props, &DbusResolver)
}

/// Information about all PVs in the system.
pub fn pvs() -> Result<Vec<PvData>, LvmError> {
    let mut result = Vec::new();
    for obj_path in get_existing_objects(&format!("{LVM_OBJ_PREFIX}/Pv"))? {
        let props = get_object_properties(&obj_path, PV_INTF)?;
        result.push(pv_from_props(&props, &DbusResolver)?);
    }
    Ok(result)
}

fn manage_pv_tags(
    device: &Utf8Path,
    tags: &[String],
    method: &str,
) -> Result<(), LvmError> {
    let pv_path = get_object_path(&pv_spec(device))?;

    let info = pv_info(device)?;
    let Some(vg_name) = info.vg_name else {
        return Err(LvmError::Fail(
            "Tags can't be changed on PVs without a VG".to_string(),
        ));
    };
    let vg_path = get_object_path(&vg_name)?;

    // PV tags are managed through the VG interface with the PV passed in
    let params = vec![
        Param::ObjPathArray(vec![pv_path]),
        Param::StrArray(tags.to_vec()),
    ];
    call_lvm_method_sync(
        &vg_path,
        VG_INTF,
        method,
        params,
        Vec::new(),
        &[],
        CallConfig::Global,
    )?;
    Ok(())
}

/// Add `tags` to the PV on `device`.
pub fn add_pv_tags(device: &Utf8Path, tags: &[String]) -> Result<(), LvmError> {
    manage_pv_tags(device, tags, "PvTagsAdd")
}

/// Remove `tags` from the PV on `device`.
pub fn delete_pv_tags(device: &Utf8Path, tags: &[String]) -> Result<(), LvmError> {
    manage_pv_tags(device, tags, "PvTagsDel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pv_spec() {
        assert_eq!(pv_spec(Utf8Path::new("/dev/sda1")), "/dev/sda1");
        assert_eq!(pv_spec(Utf8Path::new("sda1")), "/dev/sda1");
    }

    #[test]
    fn test_pv_remove_nonexistent_device() {
        let err = pv_remove(Utf8Path::new("/definitely/not/a/device"), &[]).unwrap_err();
        assert!(matches!(err, LvmError::NoExist(_)));
    }
}
