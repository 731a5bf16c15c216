/*++

Licensed under the Apache-2.0 license.

File Name:

   config.rs

Abstract:

    File contains utilities for parsing manifest configuration files

--*/

use anyhow::{anyhow, Context};
use chrono::{Datelike, NaiveDate};
use serde_derive::{Deserialize, Serialize};
use siip_image_gen::ManifestConfig;
use siip_image_types::KEY_USAGE_BYTE_SIZE;
use std::path::Path;

/// Manifest Configuration
///
/// Every field is optional; missing fields keep their default value.
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct ManifestFileConfig {
    pub vendor: Option<u32>,

    /// BCD date, e.g. 0x20200601
    pub date: Option<u32>,

    pub svn: Option<u32>,

    pub key_manifest_svn: Option<u32>,

    pub oem_id: Option<u16>,

    pub key_manifest_id: Option<u8>,

    /// Up to four ASCII characters, e.g. "$OSE"
    pub package_name: Option<String>,

    pub version_control_num: Option<u64>,

    pub usage_bit: Option<u32>,

    pub metadata_id: Option<u32>,

    pub module_id: Option<u32>,

    pub fw_type: Option<u8>,

    pub fw_subtype: Option<u8>,

    /// Up to four ASCII characters, e.g. "SIIP"
    pub subpart_name: Option<String>,
}

impl ManifestFileConfig {
    /// Apply the configured values over the defaults; `today` fills the
    /// date when none is configured
    pub(crate) fn manifest_config(&self, today: NaiveDate) -> anyhow::Result<ManifestConfig> {
        let defaults = ManifestConfig::default();

        let usage_bit = self.usage_bit.unwrap_or(defaults.usage_bit);
        if usage_bit as usize >= KEY_USAGE_BYTE_SIZE * 8 {
            return Err(anyhow!("Invalid usage bit {usage_bit}"));
        }

        let package_name = match &self.package_name {
            Some(name) => u32::from_le_bytes(fourcc(name)?),
            None => defaults.package_name,
        };
        let subpart_name = match &self.subpart_name {
            Some(name) => fourcc(name)?,
            None => defaults.subpart_name,
        };

        Ok(ManifestConfig {
            vendor: self.vendor.unwrap_or(defaults.vendor),
            date: self.date.unwrap_or_else(|| bcd_date(today)),
            svn: self.svn.unwrap_or(defaults.svn),
            key_manifest_svn: self.key_manifest_svn.unwrap_or(defaults.key_manifest_svn),
            oem_id: self.oem_id.unwrap_or(defaults.oem_id),
            key_manifest_id: self.key_manifest_id.unwrap_or(defaults.key_manifest_id),
            package_name,
            version_control_num: self
                .version_control_num
                .unwrap_or(defaults.version_control_num),
            usage_bit,
            metadata_id: self.metadata_id.unwrap_or(defaults.metadata_id),
            module_id: self.module_id.unwrap_or(defaults.module_id),
            fw_type: self.fw_type.unwrap_or(defaults.fw_type),
            fw_subtype: self.fw_subtype.unwrap_or(defaults.fw_subtype),
            subpart_name,
        })
    }
}

/// Four byte ASCII tag, NUL padded
fn fourcc(name: &str) -> anyhow::Result<[u8; 4]> {
    if !name.is_ascii() || name.len() > 4 {
        return Err(anyhow!("Invalid name {name:?}: expected up to 4 ASCII characters"));
    }
    let mut tag = [0u8; 4];
    tag[..name.len()].copy_from_slice(name.as_bytes());
    Ok(tag)
}

/// Date as 0xYYYYMMDD with each digit a BCD nibble
pub(crate) fn bcd_date(date: NaiveDate) -> u32 {
    let digits = date.year() as u32 * 10000 + date.month() * 100 + date.day();
    let mut bcd = 0;
    for shift in (0..8).rev() {
        let digit = digits / 10u32.pow(shift) % 10;
        bcd = bcd << 4 | digit;
    }
    bcd
}

/// Load Manifest Configuration from file
pub(crate) fn load_manifest_config(path: &Path) -> anyhow::Result<ManifestFileConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the config file {}", path.display()))?;

    let config: ManifestFileConfig = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    Ok(config)
}
