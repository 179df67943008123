//! Cache statistics read from the kernel device-mapper state.

use std::process::Command;

use blockdev_utils::{CommandRunExt, ExecError};

use crate::LvmError;

const SECTOR_SIZE: u64 = 512;

/// dm-cache operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Writethrough,
    Writeback,
    Unknown,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Writethrough => "writethrough",
            CacheMode::Writeback => "writeback",
            CacheMode::Unknown => "unknown",
        }
    }

    pub fn from_str(mode_str: &str) -> Result<Self, LvmError> {
        match mode_str {
            "writethrough" => Ok(CacheMode::Writethrough),
            "writeback" => Ok(CacheMode::Writeback),
            "unknown" => Ok(CacheMode::Unknown),
            other => Err(LvmError::CacheInvalid(format!("Invalid mode given: {other}"))),
        }
    }
}

/// Statistics of a cached LV, with sizes scaled to bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub block_size: u64,
    pub cache_size: u64,
    pub cache_used: u64,
    pub md_block_size: u64,
    pub md_size: u64,
    pub md_used: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    pub mode: CacheMode,
}

impl Default for CacheMode {
    fn default() -> Self {
        CacheMode::Unknown
    }
}

/// Translate a VG/LV pair into the device-mapper map name: dashes inside
/// the names are doubled and the two parts joined with a single dash.
fn build_dm_name(vg_name: &str, lv_name: &str) -> String {
    format!(
        "{}-{}",
        vg_name.replace('-', "--"),
        lv_name.replace('-', "--")
    )
}

/// Parse the dm-cache status line parameters (everything after the
/// `cache` target type):
/// `<md block size> <used>/<total md blocks> <block size> <used>/<total
/// blocks> <read hits> <read misses> <write hits> <write misses>
/// <demotions> <promotions> <dirty> <#features> <features>...`
fn parse_cache_status(params: &str) -> Result<CacheStats, LvmError> {
    let parse_fail =
        |what: &str| LvmError::CacheInvalid(format!("Failed to parse cache status: {what}"));

    let mut tokens = params.split_whitespace();
    fn next_u64<'a>(
        tokens: &mut impl Iterator<Item = &'a str>,
        what: &'static str,
        parse_fail: impl Fn(&str) -> LvmError,
    ) -> Result<u64, LvmError> {
        tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| parse_fail(what))
    }

    let md_block_size = next_u64(&mut tokens, "metadata block size", parse_fail)?;
    let (md_used, md_total): (u64, u64) = {
        let token = tokens.next().ok_or_else(|| parse_fail("metadata blocks"))?;
        let (used, total) = token
            .split_once('/')
            .ok_or_else(|| parse_fail("metadata blocks"))?;
        (
            used.parse().map_err(|_| parse_fail("metadata blocks"))?,
            total.parse().map_err(|_| parse_fail("metadata blocks"))?,
        )
    };
    let block_size = next_u64(&mut tokens, "cache block size", parse_fail)?;
    let (used, total): (u64, u64) = {
        let token = tokens.next().ok_or_else(|| parse_fail("cache blocks"))?;
        let (used, total) = token
            .split_once('/')
            .ok_or_else(|| parse_fail("cache blocks"))?;
        (
            used.parse().map_err(|_| parse_fail("cache blocks"))?,
            total.parse().map_err(|_| parse_fail("cache blocks"))?,
        )
    };
    let read_hits = next_u64(&mut tokens, "read hits", parse_fail)?;
    let read_misses = next_u64(&mut tokens, "read misses", parse_fail)?;
    let write_hits = next_u64(&mut tokens, "write hits", parse_fail)?;
    let write_misses = next_u64(&mut tokens, "write misses", parse_fail)?;
    let _demotions = next_u64(&mut tokens, "demotions", parse_fail)?;
    let _promotions = next_u64(&mut tokens, "promotions", parse_fail)?;
    let _dirty = next_u64(&mut tokens, "dirty blocks", parse_fail)?;

    let n_features = next_u64(&mut tokens, "feature count", parse_fail)? as usize;
    let features: Vec<&str> = (0..n_features).filter_map(|_| tokens.next()).collect();
    if features.len() != n_features {
        return Err(parse_fail("features"));
    }
    let mode = if features.contains(&"writethrough") {
        CacheMode::Writethrough
    } else if features.contains(&"writeback") {
        CacheMode::Writeback
    } else {
        return Err(LvmError::CacheInvalid(format!(
            "Failed to determine status of the cache from the feature flags: {}",
            features.join(" ")
        )));
    };

    let block_size_bytes = block_size * SECTOR_SIZE;
    let md_block_size_bytes = md_block_size * SECTOR_SIZE;
    Ok(CacheStats {
        block_size: block_size_bytes,
        cache_size: total * block_size_bytes,
        cache_used: used * block_size_bytes,
        md_block_size: md_block_size_bytes,
        md_size: md_total * md_block_size_bytes,
        md_used: md_used * md_block_size_bytes,
        read_hits,
        read_misses,
        write_hits,
        write_misses,
        mode,
    })
}

/// Split a `dmsetup status` line into `(start, length, target, params)`.
fn split_status_line(line: &str) -> Result<(u64, u64, &str, &str), LvmError> {
    let mut tokens = line.splitn(4, ' ');
    let start = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| LvmError::DmError("Malformed device-mapper status line".to_string()))?;
    let length = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| LvmError::DmError("Malformed device-mapper status line".to_string()))?;
    let target = tokens
        .next()
        .ok_or_else(|| LvmError::DmError("Malformed device-mapper status line".to_string()))?;
    Ok((start, length, target, tokens.next().unwrap_or("")))
}

/// Statistics of the cache attached to `vg_name/cached_lv` (for a thin
/// pool, of the cache under its data LV). Requires root, as the
/// device-mapper state is not readable otherwise.
pub fn cache_stats(vg_name: &str, cached_lv: &str) -> Result<CacheStats, LvmError> {
    if !rustix::process::geteuid().is_root() {
        return Err(LvmError::NotRoot(
            "Not running as root, cannot query DM maps".to_string(),
        ));
    }

    let lvdata = crate::lv_info(vg_name, cached_lv)?;
    let map_name = if lvdata.segtype == "thin-pool" {
        let data_lv = crate::lv_info_tree(vg_name, cached_lv)?
            .data_lv
            .ok_or_else(|| {
                LvmError::CacheNoCache(format!(
                    "Failed to get the data LV of the thin pool '{vg_name}/{cached_lv}'"
                ))
            })?;
        build_dm_name(vg_name, &data_lv)
    } else {
        build_dm_name(vg_name, cached_lv)
    };

    let output = match Command::new("dmsetup")
        .args(["status", &map_name])
        .run_get_output()
    {
        Ok(output) => output,
        Err(ExecError::Failed { stderr, .. }) if stderr.contains("No such device") => {
            return Err(LvmError::CacheNoCache(format!(
                "The cache map '{map_name}' doesn't exist"
            )));
        }
        Err(e) => {
            return Err(LvmError::DmError(format!(
                "Failed to run the DM task for the cache map '{map_name}': {e}"
            )));
        }
    };

    let line = output.lines().next().ok_or_else(|| {
        LvmError::CacheNoCache(format!("The cache map '{map_name}' doesn't exist"))
    })?;
    let (_start, _length, target, params) = split_status_line(line)?;
    if target != "cache" {
        return Err(LvmError::CacheInvalid(format!(
            "The map '{map_name}' is a '{target}' map, not a cache"
        )));
    }
    parse_cache_status(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dm_name() {
        assert_eq!(build_dm_name("testvg", "testlv"), "testvg-testlv");
        assert_eq!(build_dm_name("test-vg", "my-lv"), "test--vg-my--lv");
    }

    #[test]
    fn test_parse_cache_status() -> anyhow::Result<()> {
        // a real-ish dm-cache status params blob
        let params = "8 116/4096 128 343/4096 122 34 51 12 0 0 0 \
                      3 metadata2 writethrough no_discard_passdown \
                      2 migration_threshold 2048 smq 0 rw -";
        let stats = parse_cache_status(params)?;
        assert_eq!(stats.md_block_size, 8 * 512);
        assert_eq!(stats.md_used, 116 * 8 * 512);
        assert_eq!(stats.md_size, 4096 * 8 * 512);
        assert_eq!(stats.block_size, 128 * 512);
        assert_eq!(stats.cache_used, 343 * 128 * 512);
        assert_eq!(stats.cache_size, 4096 * 128 * 512);
        assert_eq!(stats.read_hits, 122);
        assert_eq!(stats.read_misses, 34);
        assert_eq!(stats.write_hits, 51);
        assert_eq!(stats.write_misses, 12);
        assert_eq!(stats.mode, CacheMode::Writethrough);
        Ok(())
    }

    #[test]
    fn test_parse_cache_status_writeback() -> anyhow::Result<()> {
        let params = "8 116/4096 128 343/4096 122 34 51 12 0 0 5 \
                      2 metadata2 writeback 2 migration_threshold 2048 smq 0 rw -";
        assert_eq!(parse_cache_status(params)?.mode, CacheMode::Writeback);
        Ok(())
    }

    #[test]
    fn test_parse_cache_status_unknown_mode() {
        // passthrough is neither writethrough nor writeback
        let params = "8 116/4096 128 343/4096 122 34 51 12 0 0 0 1 passthrough";
        assert!(matches!(
            parse_cache_status(params),
            Err(LvmError::CacheInvalid(_))
        ));
    }

    #[test]
    fn test_parse_cache_status_truncated() {
        assert!(parse_cache_status("8 116/4096 128").is_err());
    }

    #[test]
    fn test_split_status_line() -> anyhow::Result<()> {
        let (start, length, target, params) =
            split_status_line("0 2097152 cache 8 116/4096 128 343/4096")?;
        assert_eq!(start, 0);
        assert_eq!(length, 2097152);
        assert_eq!(target, "cache");
        assert_eq!(params, "8 116/4096 128 343/4096");
        Ok(())
    }

    #[test]
    fn test_cache_mode_strings() {
        assert_eq!(CacheMode::Writethrough.as_str(), "writethrough");
        assert_eq!(
            CacheMode::from_str("writeback").unwrap(),
            CacheMode::Writeback
        );
        assert!(matches!(
            CacheMode::from_str("sideways"),
            Err(LvmError::CacheInvalid(_))
        ));
    }
}
