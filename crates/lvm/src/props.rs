//! Typed records decoded from lvmdbusd property bags.
//!
//! Property bags are `a{sv}` dictionaries; unknown keys are ignored and
//! missing required keys surface as [`LvmError::Parse`]. Properties that
//! reference other objects hold object paths which are dereferenced to
//! names through a [`PathResolver`], keeping the decoders testable without
//! a bus connection.

use dbus::arg::{PropMap, RefArg};

use crate::conn::{get_object_path, get_object_properties, get_object_property};
use crate::{LvmError, LV_CMN_INTF, LV_INTF, PV_INTF, VG_INTF};

/// Data about an LVM physical volume, including a summary of its volume
/// group when it belongs to one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PvData {
    pub pv_name: String,
    pub pv_uuid: String,
    pub pv_size: u64,
    pub pv_free: u64,
    pub pe_start: u64,
    pub missing: bool,
    pub pv_tags: Vec<String>,
    pub vg_name: Option<String>,
    pub vg_uuid: Option<String>,
    pub vg_size: u64,
    pub vg_free: u64,
    pub vg_extent_size: u64,
    pub vg_extent_count: u64,
    pub vg_free_count: u64,
    pub vg_pv_count: u64,
}

/// Data about an LVM volume group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VgData {
    pub name: String,
    pub uuid: String,
    pub size: u64,
    pub free: u64,
    pub extent_size: u64,
    pub extent_count: u64,
    pub free_count: u64,
    pub pv_count: u64,
    pub exported: bool,
    pub vg_tags: Vec<String>,
}

/// One physical segment of a logical volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegData {
    /// Device (PV) name the segment lives on.
    pub pvdev: String,
    /// First physical extent of the segment on the PV.
    pub pv_start_pe: u64,
    /// Segment size in physical extents.
    pub size_pe: u64,
}

/// Data about a logical volume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LvData {
    pub vg_name: String,
    pub lv_name: String,
    pub uuid: String,
    pub attr: String,
    pub segtype: String,
    pub size: u64,
    pub origin: Option<String>,
    pub pool_lv: Option<String>,
    /// Data LV of a pool LV.
    pub data_lv: Option<String>,
    /// Metadata LV of a pool LV.
    pub metadata_lv: Option<String>,
    /// Hidden image LVs (e.g. RAID images).
    pub data_lvs: Vec<String>,
    /// Hidden metadata LVs.
    pub metadata_lvs: Vec<String>,
    pub move_pv: Option<String>,
    /// Comma separated roles of the LV.
    pub roles: String,
    pub lv_tags: Vec<String>,
    pub segs: Vec<SegData>,
    pub data_percent: u32,
    pub metadata_percent: u32,
    pub copy_percent: u32,
}

/// Dereferences object paths to properties of the objects behind them.
pub(crate) trait PathResolver {
    /// The `Name` property of the object at `obj_path` on `iface`.
    fn name_of(&self, obj_path: &str, iface: &str) -> Option<String>;
    /// All properties of `iface` on `obj_path`.
    fn props_of(&self, obj_path: &str, iface: &str) -> Result<PropMap, LvmError>;
    /// One property of `iface` on `obj_path`.
    fn property(&self, obj_path: &str, iface: &str, prop: &str)
        -> Result<Box<dyn RefArg>, LvmError>;
}

/// The production resolver, going through the bus.
pub(crate) struct DbusResolver;

impl PathResolver for DbusResolver {
    fn name_of(&self, obj_path: &str, iface: &str) -> Option<String> {
        get_object_property(obj_path, iface, "Name")
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn props_of(&self, obj_path: &str, iface: &str) -> Result<PropMap, LvmError> {
        get_object_properties(obj_path, iface)
    }

    fn property(
        &self,
        obj_path: &str,
        iface: &str,
        prop: &str,
    ) -> Result<Box<dyn RefArg>, LvmError> {
        get_object_property(obj_path, iface, prop)
    }
}

pub(crate) fn prop_str(props: &PropMap, key: &str) -> Option<String> {
    props.get(key).and_then(|v| v.0.as_str()).map(str::to_string)
}

pub(crate) fn prop_u64(props: &PropMap, key: &str) -> u64 {
    props.get(key).and_then(|v| v.0.as_u64()).unwrap_or(0)
}

pub(crate) fn prop_u32(props: &PropMap, key: &str) -> u32 {
    prop_u64(props, key) as u32
}

pub(crate) fn prop_bool(props: &PropMap, key: &str) -> bool {
    props.get(key).and_then(|v| v.0.as_i64()).unwrap_or(0) != 0
}

pub(crate) fn prop_f64(props: &PropMap, key: &str) -> f64 {
    props
        .get(key)
        .and_then(|v| v.0.as_f64())
        .unwrap_or_default()
}

pub(crate) fn prop_strv(props: &PropMap, key: &str) -> Vec<String> {
    let Some(value) = props.get(key) else {
        return Vec::new();
    };
    let Some(iter) = value.0.as_iter() else {
        return Vec::new();
    };
    iter.filter_map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Object-path property; `None` when missing or `/`.
pub(crate) fn prop_path(props: &PropMap, key: &str) -> Option<String> {
    prop_str(props, key).filter(|p| p != "/")
}

fn required_str(props: &PropMap, key: &str, what: &str) -> Result<String, LvmError> {
    prop_str(props, key).ok_or_else(|| {
        LvmError::Parse(format!("Missing '{key}' property in the {what} properties"))
    })
}

/// Hidden LVs are reported with their names in square brackets.
pub(crate) fn strip_brackets(name: &str) -> String {
    name.replace(['[', ']'], " ").trim().to_string()
}

/// Decode PV properties, dereferencing the `Vg` object path into a VG
/// summary (a PV outside any VG simply has no summary).
pub(crate) fn pv_from_props(
    props: &PropMap,
    resolver: &dyn PathResolver,
) -> Result<PvData, LvmError> {
    let mut data = PvData {
        pv_name: required_str(props, "Name", "PV")?,
        pv_uuid: required_str(props, "Uuid", "PV")?,
        pv_size: prop_u64(props, "SizeBytes"),
        pv_free: prop_u64(props, "FreeBytes"),
        pe_start: prop_u64(props, "PeStart"),
        missing: prop_bool(props, "Missing"),
        pv_tags: prop_strv(props, "Tags"),
        ..Default::default()
    };

    let Some(vg_path) = prop_path(props, "Vg") else {
        // the PV is not part of any VG
        return Ok(data);
    };
    match resolver.props_of(&vg_path, VG_INTF) {
        Ok(vg_props) => {
            data.vg_name = prop_str(&vg_props, "Name");
            data.vg_uuid = prop_str(&vg_props, "Uuid");
            data.vg_size = prop_u64(&vg_props, "SizeBytes");
            data.vg_free = prop_u64(&vg_props, "FreeBytes");
            data.vg_extent_size = prop_u64(&vg_props, "ExtentSizeBytes");
            data.vg_extent_count = prop_u64(&vg_props, "ExtentCount");
            data.vg_free_count = prop_u64(&vg_props, "FreeCount");
            data.vg_pv_count = prop_u64(&vg_props, "PvCount");
        }
        Err(e) => {
            tracing::debug!("Failed to get VG properties for PV {}: {e}", data.pv_name);
        }
    }
    Ok(data)
}

/// Decode VG properties.
pub(crate) fn vg_from_props(props: &PropMap) -> Result<VgData, LvmError> {
    Ok(VgData {
        name: required_str(props, "Name", "VG")?,
        uuid: required_str(props, "Uuid", "VG")?,
        size: prop_u64(props, "SizeBytes"),
        free: prop_u64(props, "FreeBytes"),
        extent_size: prop_u64(props, "ExtentSizeBytes"),
        extent_count: prop_u64(props, "ExtentCount"),
        free_count: prop_u64(props, "FreeCount"),
        pv_count: prop_u64(props, "PvCount"),
        exported: prop_bool(props, "Exportable"),
        vg_tags: prop_strv(props, "Tags"),
    })
}

/// Decode the common LV properties. Pool internals (data/metadata LVs,
/// segments) are filled in separately by the callers that need them.
pub(crate) fn lv_from_props(
    props: &PropMap,
    resolver: &dyn PathResolver,
) -> Result<LvData, LvmError> {
    let mut data = LvData {
        lv_name: required_str(props, "Name", "LV")?,
        uuid: required_str(props, "Uuid", "LV")?,
        attr: prop_str(props, "Attr").unwrap_or_default(),
        size: prop_u64(props, "SizeBytes"),
        data_percent: prop_u32(props, "DataPercent"),
        metadata_percent: prop_u32(props, "MetaDataPercent"),
        copy_percent: prop_u32(props, "CopyPercent"),
        lv_tags: prop_strv(props, "Tags"),
        ..Default::default()
    };

    // an LV can have multiple segment types; we report the first one
    let segtypes = prop_strv(props, "SegType");
    data.segtype = match segtypes.first().map(String::as_str) {
        Some("error") | None => "linear".to_string(),
        Some(st) => st.to_string(),
    };

    data.roles = prop_strv(props, "Roles").join(",");

    if let Some(vg_path) = prop_path(props, "Vg") {
        data.vg_name = resolver.name_of(&vg_path, VG_INTF).unwrap_or_default();
    }
    if let Some(origin_path) = prop_path(props, "OriginLv") {
        data.origin = resolver.name_of(&origin_path, LV_CMN_INTF);
    }
    if let Some(pool_path) = prop_path(props, "PoolLv") {
        data.pool_lv = resolver.name_of(&pool_path, LV_CMN_INTF);
    }
    if let Some(move_path) = prop_path(props, "MovePv") {
        data.move_pv = resolver.name_of(&move_path, PV_INTF);
    }

    Ok(data)
}

/// Decode the `Devices` property value (`a(oa(tts))`) into segments, one
/// per `(first_pe, last_pe)` range, with the PV object paths dereferenced
/// to device names.
pub(crate) fn segs_from_devices(
    devices: &dyn RefArg,
    resolver: &dyn PathResolver,
) -> Vec<SegData> {
    let mut segs = Vec::new();
    let Some(entries) = devices.as_iter() else {
        return segs;
    };
    for entry in entries {
        let Some(mut fields) = entry.as_iter() else {
            continue;
        };
        let Some(pv_path) = fields.next().and_then(|f| f.as_str()) else {
            continue;
        };
        let Some(pv_name) = resolver.name_of(pv_path, PV_INTF) else {
            continue;
        };
        let Some(ranges) = fields.next().and_then(|f| f.as_iter()) else {
            continue;
        };
        for range in ranges {
            let Some(mut bounds) = range.as_iter() else {
                continue;
            };
            let (Some(first), Some(last)) = (
                bounds.next().and_then(|b| b.as_u64()),
                bounds.next().and_then(|b| b.as_u64()),
            ) else {
                continue;
            };
            segs.push(SegData {
                pvdev: pv_name.clone(),
                pv_start_pe: first,
                size_pe: last - first + 1,
            });
        }
    }
    segs
}

/// Classify the hidden LVs of an LV (the `HiddenLvs` object paths) into
/// data (role `image`) and metadata (role `metadata`) LVs.
pub(crate) fn data_and_metadata_lvs(
    hidden_paths: &[String],
    resolver: &dyn PathResolver,
) -> (Vec<String>, Vec<String>) {
    let mut data_lvs = Vec::new();
    let mut metadata_lvs = Vec::new();
    for sublv in hidden_paths {
        let Some(name) = resolver.name_of(sublv, LV_INTF) else {
            continue;
        };
        let name = strip_brackets(&name);
        let roles = resolver
            .property(sublv, LV_INTF, "Roles")
            .ok()
            .map(|v| {
                v.as_iter()
                    .map(|it| it.filter_map(|r| r.as_str().map(str::to_string)).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_else(Vec::new);
        for role in &roles {
            if role == "image" {
                data_lvs.push(name.clone());
                break;
            } else if role == "metadata" {
                metadata_lvs.push(name.clone());
                break;
            }
        }
    }
    (data_lvs, metadata_lvs)
}

/// The data LV name of a pool LV (`vg_name/lv_name`), if it has one.
pub(crate) fn pool_sub_lv_name(
    vg_name: &str,
    lv_name: &str,
    segtype: &str,
    which: &str,
    resolver: &dyn PathResolver,
) -> Option<String> {
    let iface = match segtype {
        "thin-pool" => crate::THPOOL_INTF,
        "cache-pool" => crate::CACHE_POOL_INTF,
        "vdo-pool" => crate::VDO_POOL_INTF,
        _ => return None,
    };
    let obj_path = get_object_path(&format!("{vg_name}/{lv_name}")).ok()?;
    let sub_path = resolver
        .property(&obj_path, iface, which)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|p| p != "/")?;
    resolver
        .name_of(&sub_path, LV_CMN_INTF)
        .map(|n| strip_brackets(&n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbus::arg::Variant;
    use std::collections::HashMap;

    pub(crate) struct StubResolver {
        pub names: HashMap<String, String>,
        pub roles: HashMap<String, Vec<String>>,
    }

    impl StubResolver {
        fn new(names: &[(&str, &str)]) -> Self {
            Self {
                names: names
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                roles: HashMap::new(),
            }
        }
    }

    impl PathResolver for StubResolver {
        fn name_of(&self, obj_path: &str, _iface: &str) -> Option<String> {
            self.names.get(obj_path).cloned()
        }

        fn props_of(&self, _obj_path: &str, _iface: &str) -> Result<PropMap, LvmError> {
            Err(LvmError::Fail("no props in stub".to_string()))
        }

        fn property(
            &self,
            obj_path: &str,
            _iface: &str,
            prop: &str,
        ) -> Result<Box<dyn RefArg>, LvmError> {
            if prop == "Roles" {
                if let Some(roles) = self.roles.get(obj_path) {
                    return Ok(Box::new(roles.clone()));
                }
            }
            Err(LvmError::Fail("no such property".to_string()))
        }
    }

    fn props(entries: Vec<(&str, Box<dyn RefArg>)>) -> PropMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), Variant(v)))
            .collect()
    }

    #[test]
    fn test_vg_from_props() -> anyhow::Result<()> {
        let map = props(vec![
            ("Name", Box::new("testvg".to_string())),
            ("Uuid", Box::new("ABC-123".to_string())),
            ("SizeBytes", Box::new(1073741824u64)),
            ("FreeBytes", Box::new(536870912u64)),
            ("ExtentSizeBytes", Box::new(4194304u64)),
            ("ExtentCount", Box::new(256u64)),
            ("FreeCount", Box::new(128u64)),
            ("PvCount", Box::new(1u64)),
            ("Exportable", Box::new(false)),
            ("Tags", Box::new(vec!["a".to_string(), "b".to_string()])),
        ]);
        let vg = vg_from_props(&map)?;
        assert_eq!(vg.name, "testvg");
        assert_eq!(vg.extent_size, 4194304);
        assert_eq!(vg.pv_count, 1);
        assert!(!vg.exported);
        assert_eq!(vg.vg_tags, ["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_vg_from_props_missing_name() {
        let map = props(vec![("Uuid", Box::new("ABC-123".to_string()))]);
        assert!(matches!(vg_from_props(&map), Err(LvmError::Parse(_))));
    }

    #[test]
    fn test_pv_without_vg() -> anyhow::Result<()> {
        let map = props(vec![
            ("Name", Box::new("/dev/sda1".to_string())),
            ("Uuid", Box::new("PV-UUID".to_string())),
            ("SizeBytes", Box::new(1000000u64)),
            ("Vg", Box::new("/".to_string())),
        ]);
        let resolver = StubResolver::new(&[]);
        let pv = pv_from_props(&map, &resolver)?;
        assert_eq!(pv.pv_name, "/dev/sda1");
        assert_eq!(pv.vg_name, None);
        Ok(())
    }

    #[test]
    fn test_lv_from_props() -> anyhow::Result<()> {
        let map = props(vec![
            ("Name", Box::new("lv_root".to_string())),
            ("Uuid", Box::new("LV-UUID".to_string())),
            ("Attr", Box::new("-wi-a-----".to_string())),
            ("SizeBytes", Box::new(104857600u64)),
            ("SegType", Box::new(vec!["linear".to_string()])),
            (
                "Roles",
                Box::new(vec!["public".to_string(), "origin".to_string()]),
            ),
            ("Vg", Box::new("/com/redhat/lvmdbus1/Vg/0".to_string())),
            (
                "OriginLv",
                Box::new("/com/redhat/lvmdbus1/Lv/7".to_string()),
            ),
            ("PoolLv", Box::new("/".to_string())),
            ("DataPercent", Box::new(42u32)),
        ]);
        let resolver = StubResolver::new(&[
            ("/com/redhat/lvmdbus1/Vg/0", "testvg"),
            ("/com/redhat/lvmdbus1/Lv/7", "lv_orig"),
        ]);
        let lv = lv_from_props(&map, &resolver)?;
        assert_eq!(lv.lv_name, "lv_root");
        assert_eq!(lv.vg_name, "testvg");
        assert_eq!(lv.segtype, "linear");
        assert_eq!(lv.origin.as_deref(), Some("lv_orig"));
        assert_eq!(lv.pool_lv, None);
        assert_eq!(lv.roles, "public,origin");
        assert_eq!(lv.data_percent, 42);
        Ok(())
    }

    #[test]
    fn test_lv_error_segtype_is_linear() -> anyhow::Result<()> {
        let map = props(vec![
            ("Name", Box::new("lv".to_string())),
            ("Uuid", Box::new("U".to_string())),
            ("SegType", Box::new(vec!["error".to_string()])),
        ]);
        let resolver = StubResolver::new(&[]);
        let lv = lv_from_props(&map, &resolver)?;
        assert_eq!(lv.segtype, "linear");
        Ok(())
    }

    #[test]
    fn test_segs_from_devices() {
        // a(oa(tts)): one PV with two extent ranges
        let ranges: Vec<(u64, u64, String)> =
            vec![(0, 24, "linear".to_string()), (100, 149, "linear".to_string())];
        let devices: Vec<(String, Vec<(u64, u64, String)>)> =
            vec![("/com/redhat/lvmdbus1/Pv/0".to_string(), ranges)];
        let resolver = StubResolver::new(&[("/com/redhat/lvmdbus1/Pv/0", "/dev/sda1")]);
        let segs = segs_from_devices(&devices, &resolver);
        similar_asserts::assert_eq!(
            segs,
            vec![
                SegData {
                    pvdev: "/dev/sda1".to_string(),
                    pv_start_pe: 0,
                    size_pe: 25,
                },
                SegData {
                    pvdev: "/dev/sda1".to_string(),
                    pv_start_pe: 100,
                    size_pe: 50,
                },
            ]
        );
    }

    #[test]
    fn test_strip_brackets() {
        assert_eq!(strip_brackets("[pool_tmeta]"), "pool_tmeta");
        assert_eq!(strip_brackets("plain"), "plain");
    }

    #[test]
    fn test_data_and_metadata_lvs() {
        let mut resolver = StubResolver::new(&[
            ("/lv/1", "[pool_tdata]"),
            ("/lv/2", "[pool_tmeta]"),
            ("/lv/3", "[something_else]"),
        ]);
        resolver
            .roles
            .insert("/lv/1".to_string(), vec!["private".to_string(), "image".to_string()]);
        resolver
            .roles
            .insert("/lv/2".to_string(), vec!["metadata".to_string()]);
        resolver
            .roles
            .insert("/lv/3".to_string(), vec!["private".to_string()]);
        let hidden = vec![
            "/lv/1".to_string(),
            "/lv/2".to_string(),
            "/lv/3".to_string(),
        ];
        let (data, metadata) = data_and_metadata_lvs(&hidden, &resolver);
        assert_eq!(data, ["pool_tdata"]);
        assert_eq!(metadata, ["pool_tmeta"]);
    }
}
