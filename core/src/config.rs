// Mount and format configuration
// Loadable from JSON so tools can keep per-image settings on disk

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PhatResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    pub partition_index: usize,  // MBR slot, or 0 for an unpartitioned device
    pub write_enable: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            partition_index: 0,
            write_enable: true,
        }
    }
}

impl MountOptions {
    pub fn read_only() -> Self {
        Self {
            write_enable: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub partition_index: usize,
    pub fat_bits: u8,                       // 12, 16, 32 or 0 to pick by size
    pub root_dir_entries: u16,              // 0 picks the default; must be 0 for FAT32
    pub sectors_per_cluster: Option<u8>,    // Override of the computed cluster size
    pub volume_id: Option<u32>,             // Random when absent
    pub volume_label: Option<String>,       // "NO NAME" when absent
}

impl FormatOptions {
    pub fn with_fat_bits(fat_bits: u8) -> Self {
        Self {
            fat_bits,
            ..Self::default()
        }
    }
}

/// Everything a tool needs to mount or format an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhatConfig {
    pub mount: MountOptions,
    pub format: FormatOptions,
}

impl PhatConfig {
    pub fn from_json_str(json: &str) -> PhatResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PhatResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> PhatResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
