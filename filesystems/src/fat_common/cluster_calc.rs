// Cluster size and FAT size calculation for FAT filesystems
// Picks the FAT width and the smallest cluster size that keeps the cluster count addressable

use log::debug;
use phat_core::{FormatOptions, Lba, PhatError, PhatResult};

use super::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            12 => Some(FatType::Fat12),
            16 => Some(FatType::Fat16),
            32 => Some(FatType::Fat32),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 32,
        }
    }

    /// Value written to terminate a chain.
    pub fn end_of_chain(self) -> u32 {
        match self {
            FatType::Fat12 => FAT12_EOC,
            FatType::Fat16 => FAT16_EOC,
            FatType::Fat32 => FAT32_EOC,
        }
    }

    pub fn bad_cluster(self) -> u32 {
        match self {
            FatType::Fat12 => FAT12_BAD,
            FatType::Fat16 => FAT16_BAD,
            FatType::Fat32 => FAT32_BAD,
        }
    }

    /// Largest cluster count the formatter lays out for this width.
    pub fn max_cluster(self) -> u32 {
        match self {
            FatType::Fat12 => FAT12_MAX_CLUSTER,
            FatType::Fat16 => FAT16_MAX_CLUSTER,
            FatType::Fat32 => FAT32_MAX_CLUSTER,
        }
    }

    pub fn fs_type_tag(self) -> &'static [u8; 8] {
        match self {
            FatType::Fat12 => FS_TYPE_FAT12,
            FatType::Fat16 => FS_TYPE_FAT16,
            FatType::Fat32 => FS_TYPE_FAT32,
        }
    }

    /// MBR partition type byte for a volume of this width.
    pub fn partition_type(self) -> u8 {
        match self {
            FatType::Fat12 => PARTITION_TYPE_FAT12,
            FatType::Fat16 => PARTITION_TYPE_FAT16,
            FatType::Fat32 => PARTITION_TYPE_FAT32_LBA,
        }
    }

    /// Width chosen when the caller leaves it open.
    pub fn for_size(total_sectors: Lba) -> Self {
        if total_sectors >= 8 * FAT16_MAX_CLUSTER {
            FatType::Fat32
        } else if total_sectors >= 8 * FAT12_MAX_CLUSTER {
            FatType::Fat16
        } else {
            FatType::Fat12
        }
    }
}

impl std::fmt::Display for FatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FAT{}", self.bits())
    }
}

/// Parameters calculated for a new FAT filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatParams {
    pub fat_type: FatType,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub sectors_per_fat: u32,
    pub root_entries: u16,  // 0 for FAT32
    pub total_sectors: u32,
    pub total_clusters: u32,  // Data clusters
    pub media: u8,
    pub drive_number: u8,
    pub sectors_per_track: u16,
    pub num_heads: u16,
}

impl FatParams {
    pub fn root_dir_sectors(&self) -> u32 {
        (self.root_entries as u32 * DIR_ENTRY_SIZE as u32 + 511) / 512
    }

    /// First data sector relative to the partition start.
    pub fn data_start(&self) -> u32 {
        self.reserved_sectors as u32
            + self.num_fats as u32 * self.sectors_per_fat
            + self.root_dir_sectors()
    }

    /// Cluster sizes above 4 KiB waste a lot of space on small files.
    pub fn is_suboptimal(&self) -> bool {
        self.sectors_per_cluster > 8
    }
}

fn smallest_cluster_size(total_sectors: Lba, max_cluster: u32) -> PhatResult<u8> {
    let total = total_sectors as u64;
    let max = max_cluster as u64;
    if total >= 128 * max {
        return Err(PhatError::CannotMakeFs(format!(
            "{} sectors need more than {} clusters of 128 sectors",
            total_sectors, max_cluster
        )));
    }
    let mut spc = 1u64;
    while total > spc * max {
        spc *= 2;
    }
    Ok(spc as u8)
}

/// Lay out a FAT filesystem over `total_sectors` starting at `partition_start`.
pub fn calculate_fat_params(
    partition_start: Lba,
    total_sectors: Lba,
    options: &FormatOptions,
) -> PhatResult<FatParams> {
    let fat_type = match options.fat_bits {
        0 => FatType::for_size(total_sectors),
        bits => FatType::from_bits(bits).ok_or_else(|| {
            PhatError::InvalidParameter(format!("unsupported FAT width {}", bits))
        })?,
    };

    let root_entries = match fat_type {
        FatType::Fat32 if options.root_dir_entries != 0 => {
            return Err(PhatError::InvalidParameter(
                "FAT32 has no fixed root directory".to_string(),
            ));
        }
        FatType::Fat32 => 0,
        FatType::Fat12 if options.root_dir_entries == 0 => FAT12_DEFAULT_ROOT_ENTRIES,
        FatType::Fat16 if options.root_dir_entries == 0 => FAT16_DEFAULT_ROOT_ENTRIES,
        _ => options.root_dir_entries,
    };

    let sectors_per_cluster = match options.sectors_per_cluster {
        Some(spc) => {
            if !spc.is_power_of_two() || spc > 128 {
                return Err(PhatError::InvalidParameter(format!(
                    "sectors per cluster must be a power of two up to 128, got {}",
                    spc
                )));
            }
            if total_sectors / spc as u32 > fat_type.max_cluster() {
                return Err(PhatError::CannotMakeFs(format!(
                    "{} clusters of {} sectors exceed the {} limit",
                    total_sectors / spc as u32, spc, fat_type
                )));
            }
            spc
        }
        None => smallest_cluster_size(total_sectors, fat_type.max_cluster())?,
    };

    let reserved_sectors = match fat_type {
        FatType::Fat32 => FAT32_RESERVED_SECTORS,
        _ => FAT1216_RESERVED_SECTORS,
    };

    // Size the FAT for every cluster the partition could hold, then round it up
    // to whole clusters.
    let spc = sectors_per_cluster as u64;
    let clusters = total_sectors as u64 / spc;
    let fat_bytes = ((clusters + 2) * fat_type.bits() as u64 + 7) / 8;
    let mut sectors_per_fat = (fat_bytes + 511) / 512;
    sectors_per_fat = (sectors_per_fat + spc - 1) / spc * spc;

    let (floppy, media, drive_number) = match fat_type {
        FatType::Fat12 => (partition_start == 0 && total_sectors == 2880, MEDIA_REMOVABLE, 0x00),
        _ => (false, MEDIA_FIXED, 0x80),
    };
    let (sectors_per_track, num_heads) = if floppy { (18, 2) } else { (63, 255) };

    let mut params = FatParams {
        fat_type,
        sectors_per_cluster,
        reserved_sectors,
        num_fats: DEFAULT_NUM_FATS,
        sectors_per_fat: sectors_per_fat as u32,
        root_entries,
        total_sectors,
        total_clusters: 0,
        media,
        drive_number,
        sectors_per_track,
        num_heads,
    };

    let data_start = params.data_start() as u64;
    if data_start >= total_sectors as u64 {
        return Err(PhatError::PartitionTooSmall);
    }
    params.total_clusters = ((total_sectors as u64 - data_start) / spc) as u32;
    let needed = if fat_type == FatType::Fat32 { 2 } else { 1 };
    if params.total_clusters < needed {
        return Err(PhatError::PartitionTooSmall);
    }

    debug!(
        "{} layout: {} sectors, {} sectors/cluster, {} sectors/FAT, {} clusters",
        fat_type, total_sectors, sectors_per_cluster, params.sectors_per_fat, params.total_clusters
    );
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_width_thresholds() {
        assert_eq!(FatType::for_size(2880), FatType::Fat12);
        assert_eq!(FatType::for_size(8 * 0xFF0 - 1), FatType::Fat12);
        assert_eq!(FatType::for_size(8 * 0xFF0), FatType::Fat16);
        assert_eq!(FatType::for_size(8 * 0xFFF0), FatType::Fat32);
    }

    #[test]
    fn test_floppy_layout() {
        let params = calculate_fat_params(0, 2880, &FormatOptions::default()).unwrap();
        assert_eq!(params.fat_type, FatType::Fat12);
        assert_eq!(params.sectors_per_cluster, 1);
        assert_eq!(params.sectors_per_fat, 9);
        assert_eq!(params.root_entries, 224);
        assert_eq!(params.data_start(), 33);
        assert_eq!(params.total_clusters, 2847);
        assert_eq!((params.sectors_per_track, params.num_heads), (18, 2));
        assert_eq!(params.media, MEDIA_REMOVABLE);
    }

    #[test]
    fn test_smallest_cluster_size() {
        // Just over two clusters' worth of 0xFFF0 needs 4-sector clusters
        let params = calculate_fat_params(2048, 200_000, &FormatOptions::with_fat_bits(16)).unwrap();
        assert_eq!(params.sectors_per_cluster, 4);
        assert_eq!(params.sectors_per_fat % 4, 0);
        assert!(params.total_clusters <= FAT16_MAX_CLUSTER);
        assert!(!params.is_suboptimal());
    }

    #[test]
    fn test_fat32_layout() {
        let params = calculate_fat_params(0, 131_072, &FormatOptions::with_fat_bits(32)).unwrap();
        assert_eq!(params.fat_type, FatType::Fat32);
        assert_eq!(params.root_entries, 0);
        assert_eq!(params.reserved_sectors, 32);
        assert_eq!(params.sectors_per_cluster, 1);
        // (131072 + 2) * 4 bytes rounds up to 1025 sectors
        assert_eq!(params.sectors_per_fat, 1025);
    }

    #[test]
    fn test_fat32_rejects_root_entries() {
        let mut options = FormatOptions::with_fat_bits(32);
        options.root_dir_entries = 512;
        assert!(matches!(
            calculate_fat_params(0, 131_072, &options),
            Err(PhatError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_too_large_for_width() {
        let result = calculate_fat_params(0, 128 * 0xFF0, &FormatOptions::with_fat_bits(12));
        assert!(matches!(result, Err(PhatError::CannotMakeFs(_))));
    }

    #[test]
    fn test_cluster_override() {
        let mut options = FormatOptions::with_fat_bits(16);
        options.sectors_per_cluster = Some(4);
        let params = calculate_fat_params(0, 16_384, &options).unwrap();
        assert_eq!(params.sectors_per_cluster, 4);

        options.sectors_per_cluster = Some(3);
        assert!(calculate_fat_params(0, 16_384, &options).is_err());
    }

    #[test]
    fn test_partition_too_small() {
        let result = calculate_fat_params(0, 20, &FormatOptions::with_fat_bits(16));
        assert!(matches!(result, Err(PhatError::PartitionTooSmall)));
    }

    #[test]
    fn test_suboptimal_cluster_size() {
        let params = calculate_fat_params(0, 20 * 0xFF0, &FormatOptions::with_fat_bits(12)).unwrap();
        assert_eq!(params.sectors_per_cluster, 32);
        assert!(params.is_suboptimal());
    }
}
