// FAT formatter
// Lays down the reserved region, the FAT copies and an empty root directory,
// then mounts the result read-write.

use log::{debug, info, warn};
use phat_core::{BlockDevice, FormatOptions, Lba, MountOptions, PhatError, PhatResult, SECTOR_SIZE};

use crate::fat_common::constants::*;
use crate::fat_common::{calculate_fat_params, format_volume_label, BootSector, FatParams, FatType, FsInfo};
use crate::fat_table::{write_entry, FatEntry};
use crate::partitioner::locate_volume;
use crate::sector_cache::{device_read, device_write};
use crate::volume::Volume;

/// Sectors written per device call while zeroing regions.
const ZERO_CHUNK_SECTORS: u32 = 128;

/// Whether the chosen layout is a good fit for the volume size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatOutcome {
    Optimal,
    /// Formatted, but with clusters above 4 KiB.
    Suboptimal,
}

fn driver_error(e: std::io::Error) -> PhatError {
    PhatError::DriverError(e.to_string())
}

fn write_zeros<D: BlockDevice>(device: &mut D, start: Lba, sectors: u32) -> PhatResult<()> {
    let zeros = vec![0u8; ZERO_CHUNK_SECTORS.min(sectors.max(1)) as usize * SECTOR_SIZE];
    let mut done = 0;
    while done < sectors {
        let count = (sectors - done).min(ZERO_CHUNK_SECTORS);
        device_write(device, start + done, &zeros[..count as usize * SECTOR_SIZE])?;
        done += count;
    }
    Ok(())
}

/// Boot sector, and for FAT32 the FSInfo sector and their backups.
fn reserved_region(params: &FatParams, boot: &BootSector) -> Vec<u8> {
    let mut region = vec![0u8; params.reserved_sectors as usize * SECTOR_SIZE];
    let boot_bytes = boot.encode(params.fat_type);
    region[..SECTOR_SIZE].copy_from_slice(&boot_bytes);

    if params.fat_type == FatType::Fat32 {
        let fs_info = FsInfo {
            free_count: params.total_clusters - 1,
            next_free: FAT32_ROOT_CLUSTER + 1,
        }
        .encode();
        let sector = |n: u16| n as usize * SECTOR_SIZE..(n as usize + 1) * SECTOR_SIZE;
        region[sector(FAT32_FS_INFO_SECTOR)].copy_from_slice(&fs_info);
        region[2 * SECTOR_SIZE + BOOT_SIGNATURE_OFFSET..3 * SECTOR_SIZE].copy_from_slice(&BOOT_SIGNATURE.to_le_bytes());
        region[sector(FAT32_BACKUP_BOOT_SECTOR)].copy_from_slice(&boot_bytes);
        region[sector(FAT32_BACKUP_BOOT_SECTOR + 1)].copy_from_slice(&fs_info);
    }
    region
}

/// First sector of each FAT copy: media byte in entry 0, entry 1 all ones
/// (clean), and on FAT32 the root directory's end-of-chain in entry 2.
fn first_fat_sector(params: &FatParams) -> [u8; SECTOR_SIZE] {
    let fat_type = params.fat_type;
    let all_ones = match fat_type {
        FatType::Fat12 => 0x0FFF,
        FatType::Fat16 => 0xFFFF,
        FatType::Fat32 => FAT32_ENTRY_MASK,
    };
    let mut sector = [0u8; SECTOR_SIZE];
    write_entry(fat_type, &mut sector, 0, (all_ones & !0xFF) | params.media as u32);
    write_entry(fat_type, &mut sector, 1, all_ones);
    if fat_type == FatType::Fat32 {
        write_entry(fat_type, &mut sector, FAT32_ROOT_CLUSTER, FatEntry::EndOfChain.raw(fat_type));
    }
    sector
}

/// Format the volume selected by `options.partition_index` and mount it.
pub fn format_volume<D: BlockDevice>(mut device: D, options: &FormatOptions) -> PhatResult<(Volume<D>, FormatOutcome)> {
    device.open().map_err(driver_error)?;
    let mut sector0 = [0u8; SECTOR_SIZE];
    device_read(&mut device, 0, &mut sector0)?;
    let (start, sectors) = locate_volume(&sector0, options.partition_index, device.capacity_sectors())?;

    let params = calculate_fat_params(start, sectors, options)?;
    let volume_id = options.volume_id.unwrap_or_else(rand::random);
    let label = format_volume_label(options.volume_label.as_deref());
    let boot = BootSector::for_format(&params, start, volume_id, label);
    info!(
        "Formatting {} sectors at LBA {} as {} ({} sectors/cluster, volume id {:08X})",
        sectors, start, params.fat_type, params.sectors_per_cluster, volume_id
    );

    device_write(&mut device, start, &reserved_region(&params, &boot))?;
    debug!("Wrote {} reserved sectors", params.reserved_sectors);

    let fat_start = start + params.reserved_sectors as Lba;
    let first = first_fat_sector(&params);
    for copy in 0..params.num_fats as u32 {
        let base = fat_start + copy * params.sectors_per_fat;
        device_write(&mut device, base, &first)?;
        write_zeros(&mut device, base + 1, params.sectors_per_fat - 1)?;
    }
    debug!("Wrote {} FAT copies of {} sectors", params.num_fats, params.sectors_per_fat);

    let root_start = fat_start + params.num_fats as u32 * params.sectors_per_fat;
    match params.fat_type {
        FatType::Fat32 => write_zeros(&mut device, root_start, params.sectors_per_cluster as u32)?,
        _ => write_zeros(&mut device, root_start, params.root_dir_sectors())?,
    }
    device.close().map_err(driver_error)?;

    let outcome = if params.is_suboptimal() {
        warn!(
            "Cluster size of {} bytes is larger than recommended",
            params.sectors_per_cluster as usize * SECTOR_SIZE
        );
        FormatOutcome::Suboptimal
    } else {
        FormatOutcome::Optimal
    };

    let mount = MountOptions {
        partition_index: options.partition_index,
        write_enable: true,
    };
    let volume = Volume::mount(device, &mount)?;
    info!("Format complete: {} free clusters", volume.free_clusters());
    Ok((volume, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat_common::FatType;
    use crate::partitioner::{create_partition, initialize_mbr};
    use crate::test_helpers::formatted_volume;
    use byteorder::{ByteOrder, LittleEndian};
    use phat_core::MemoryDisk;

    #[test]
    fn test_floppy() {
        let volume = formatted_volume(2880, 12);
        let geometry = volume.geometry();
        assert_eq!(geometry.fat_type, FatType::Fat12);
        assert_eq!(geometry.root_dir_start, 19);
        assert_eq!(geometry.data_start, 33);
        assert_eq!(volume.total_clusters(), 2847);
        assert_eq!(volume.free_clusters(), 2847);
        assert!(volume.was_clean());

        let disk = volume.unmount().unwrap();
        let fat = disk.sector(1);
        assert_eq!(&fat[..3], &[0xF0, 0xFF, 0xFF]);
        assert_eq!(LittleEndian::read_u16(&disk.sector(0)[510..]), 0xAA55);
    }

    #[test]
    fn test_fat32_reserved_region() {
        let volume = formatted_volume(140_000, 32);
        let geometry = volume.geometry().clone();
        let free = volume.free_clusters();
        assert_eq!(free, geometry.data_clusters - 1);

        let disk = volume.unmount().unwrap();
        assert_eq!(disk.sector(0), disk.sector(6));
        assert_eq!(disk.sector(1), disk.sector(7));
        let fs_info = FsInfo::parse(disk.sector(1)).unwrap();
        assert_eq!(fs_info.free_count, free);
        assert_eq!(LittleEndian::read_u16(&disk.sector(2)[510..]), 0xAA55);

        let fat = disk.sector(geometry.fat_start);
        assert_eq!(LittleEndian::read_u32(&fat[0..]), 0x0FFF_FFF8);
        assert_eq!(LittleEndian::read_u32(&fat[4..]), 0x0FFF_FFFF);
        assert_eq!(LittleEndian::read_u32(&fat[8..]), 0x0FFF_FFF8);
    }

    #[test]
    fn test_label_and_id() {
        let options = FormatOptions {
            fat_bits: 16,
            volume_id: Some(0x1234_ABCD),
            volume_label: Some("backup".into()),
            ..FormatOptions::default()
        };
        let (volume, outcome) = format_volume(MemoryDisk::new(40_000), &options).unwrap();
        assert_eq!(outcome, FormatOutcome::Optimal);
        assert_eq!(volume.volume_id(), 0x1234_ABCD);
        assert_eq!(volume.volume_label(), "BACKUP");
    }

    #[test]
    fn test_large_clusters_are_suboptimal() {
        let options = FormatOptions {
            fat_bits: 16,
            sectors_per_cluster: Some(64),
            ..FormatOptions::default()
        };
        let (_, outcome) = format_volume(MemoryDisk::new(40_000), &options).unwrap();
        assert_eq!(outcome, FormatOutcome::Suboptimal);
    }

    #[test]
    fn test_format_partition() {
        let mut disk = MemoryDisk::new(100_000);
        initialize_mbr(&mut disk, false).unwrap();
        let slot = create_partition(&mut disk, 2048, 60_000, true).unwrap();
        let options = FormatOptions {
            partition_index: slot,
            fat_bits: 16,
            ..FormatOptions::default()
        };
        let (volume, _) = format_volume(disk, &options).unwrap();
        assert_eq!(volume.geometry().partition_start, 2048);
        assert_eq!(volume.geometry().total_sectors, 60_000);

        let disk = volume.unmount().unwrap();
        assert_eq!(LittleEndian::read_u32(&disk.sector(2048)[0x1C..]), 2048);
    }

    #[test]
    fn test_too_small() {
        let result = format_volume(MemoryDisk::new(16), &FormatOptions::with_fat_bits(12));
        assert!(matches!(result, Err(PhatError::PartitionTooSmall)));
    }
}
