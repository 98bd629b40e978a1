// Mount context for a FAT12/16/32 volume
// Owns the device, the sector cache, the decoded geometry and the free-space
// bookkeeping. Directory and file operations are implemented on `Volume` in
// their own modules.

use log::{debug, info, warn};
use phat_core::{BlockDevice, Lba, MountOptions, PhatError, PhatResult, SECTOR_SIZE};
use serde::Serialize;

use crate::fat_common::constants::*;
use crate::fat_common::{BootSector, FatDateTime, FatType, FsInfo};
use crate::partitioner::locate_volume;
use crate::sector_cache::{device_read, SectorCache};

/// Layout of a mounted volume. All LBAs are absolute on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub fat_type: FatType,
    pub partition_start: Lba,
    pub total_sectors: u32,
    pub sectors_per_cluster: u32,
    pub fat_start: Lba,
    pub sectors_per_fat: u32,
    pub num_fats: u32,
    pub active_fat: u32,
    pub mirrored: bool,        // every FAT copy is kept identical
    pub root_dir_start: Lba,   // fixed root region, FAT12/16 only
    pub root_dir_sectors: u32,
    pub root_cluster: u32,     // FAT32 only
    pub data_start: Lba,
    pub data_clusters: u32,
    pub max_valid_cluster: u32,
    pub fs_info: Option<Lba>,
}

impl Geometry {
    pub fn from_boot_sector(
        bs: &BootSector,
        fat_type: FatType,
        partition_start: Lba,
        partition_sectors: u32,
    ) -> PhatResult<Self> {
        if bs.bytes_per_sector as usize != SECTOR_SIZE {
            return Err(PhatError::FsError(format!(
                "unsupported sector size {}",
                bs.bytes_per_sector
            )));
        }
        let total_sectors = bs.total_sectors();
        if total_sectors > partition_sectors {
            return Err(PhatError::FsError(format!(
                "filesystem claims {} sectors but the partition has {}",
                total_sectors, partition_sectors
            )));
        }

        let spc = bs.sectors_per_cluster as u32;
        let sectors_per_fat = bs.sectors_per_fat();
        let num_fats = bs.num_fats as u32;
        let root_dir_sectors = (bs.root_entries as u32 * DIR_ENTRY_SIZE as u32 + 511) / 512;
        let fat_start = partition_start + bs.reserved_sectors as u32;
        let root_dir_start = fat_start + num_fats * sectors_per_fat;
        let data_offset = bs.reserved_sectors as u32 + num_fats * sectors_per_fat + root_dir_sectors;
        if sectors_per_fat == 0 || data_offset >= total_sectors {
            return Err(PhatError::FsError("FAT region does not fit the volume".to_string()));
        }

        let data_clusters = (total_sectors - data_offset) / spc;
        let fat_entries = (sectors_per_fat as u64 * SECTOR_SIZE as u64 * 8 / fat_type.bits() as u64)
            .min(u32::MAX as u64) as u32;
        let max_valid_cluster = (data_clusters + 1).min(fat_entries.saturating_sub(1));
        if max_valid_cluster < FIRST_DATA_CLUSTER {
            return Err(PhatError::FsError("volume has no data clusters".to_string()));
        }

        let mut geometry = Geometry {
            fat_type,
            partition_start,
            total_sectors,
            sectors_per_cluster: spc,
            fat_start,
            sectors_per_fat,
            num_fats,
            active_fat: 0,
            mirrored: true,
            root_dir_start,
            root_dir_sectors,
            root_cluster: 0,
            data_start: partition_start + data_offset,
            data_clusters,
            max_valid_cluster,
            fs_info: None,
        };

        if fat_type == FatType::Fat32 {
            if !geometry.is_valid_cluster(bs.root_cluster) {
                return Err(PhatError::FsError(format!("root cluster {} is out of range", bs.root_cluster)));
            }
            geometry.root_cluster = bs.root_cluster;
            geometry.mirrored = bs.ext_flags & EXT_FLAGS_NO_MIRROR == 0;
            if !geometry.mirrored {
                geometry.active_fat = (bs.ext_flags & EXT_FLAGS_ACTIVE_FAT) as u32;
                if geometry.active_fat >= num_fats {
                    return Err(PhatError::FsError(format!("active FAT {} does not exist", geometry.active_fat)));
                }
            }
            let fs_info = bs.fs_info_sector;
            if fs_info != 0 && fs_info != 0xFFFF && fs_info < bs.reserved_sectors {
                geometry.fs_info = Some(partition_start + fs_info as u32);
            }
        }
        Ok(geometry)
    }

    pub fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * SECTOR_SIZE as u32
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster <= self.max_valid_cluster
    }

    /// First sector of a data cluster.
    pub fn cluster_to_lba(&self, cluster: u32) -> Lba {
        self.data_start + (cluster - FIRST_DATA_CLUSTER) * self.sectors_per_cluster
    }

    /// FAT copies a write must reach.
    pub fn fat_copies(&self) -> std::ops::Range<u32> {
        if self.mirrored {
            0..self.num_fats
        } else {
            self.active_fat..self.active_fat + 1
        }
    }

    fn clean_bit(&self) -> Option<u32> {
        match self.fat_type {
            FatType::Fat12 => None,
            FatType::Fat16 => Some(FAT16_CLEAN_BIT),
            FatType::Fat32 => Some(FAT32_CLEAN_BIT),
        }
    }
}

/// Summary of a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub fat_type: String,
    pub partition_start: Lba,
    pub total_sectors: u32,
    pub cluster_size: u32,
    pub total_clusters: u32,
    pub free_clusters: u32,
    pub free_bytes: u64,
    pub volume_label: String,
    pub volume_id: u32,
    pub clean: bool,
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    Fixed(FatDateTime),
    System,
}

/// A mounted FAT volume. Exactly one per device; every operation takes it
/// by `&mut self`.
pub struct Volume<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) cache: SectorCache,
    pub(crate) geometry: Geometry,
    pub(crate) boot: BootSector,
    pub(crate) free_clusters: u32,
    pub(crate) next_free: u32,
    clock: Clock,
    write_enable: bool,
    clean_at_mount: bool,
    marked_dirty: bool,
}

impl<D: BlockDevice> Volume<D> {
    /// Mount the FAT volume selected by `options.partition_index`.
    pub fn mount(mut device: D, options: &MountOptions) -> PhatResult<Self> {
        device.open().map_err(|e| PhatError::DriverError(e.to_string()))?;

        let mut sector = [0u8; SECTOR_SIZE];
        device_read(&mut device, 0, &mut sector)?;
        let (start, sectors) = locate_volume(&sector, options.partition_index, device.capacity_sectors())?;
        if start != 0 {
            device_read(&mut device, start, &mut sector)?;
        }
        let (boot, fat_type) = BootSector::parse(&sector)?;
        let geometry = Geometry::from_boot_sector(&boot, fat_type, start, sectors)?;
        debug!("Mount geometry: {:?}", geometry);

        let mut volume = Volume {
            device,
            cache: SectorCache::new(options.write_enable),
            geometry,
            boot,
            free_clusters: 0,
            next_free: FIRST_DATA_CLUSTER,
            clock: Clock::Fixed(FatDateTime::default()),
            write_enable: options.write_enable,
            clean_at_mount: true,
            marked_dirty: false,
        };

        if let Some(bit) = volume.geometry.clean_bit() {
            volume.clean_at_mount = volume.read_fat_raw(1)? & bit != 0;
            if !volume.clean_at_mount {
                warn!("Volume was not cleanly unmounted; consider checking it");
            }
        }
        volume.load_free_space()?;

        info!(
            "Mounted {} volume at LBA {}: {} clusters of {} bytes, {} free{}",
            fat_type,
            start,
            volume.geometry.data_clusters,
            volume.geometry.cluster_bytes(),
            volume.free_clusters,
            if volume.write_enable { "" } else { " (read-only)" }
        );
        Ok(volume)
    }

    fn load_free_space(&mut self) -> PhatResult<()> {
        if let Some(lba) = self.geometry.fs_info {
            let sector = self.cache.read(&mut self.device, lba)?;
            match FsInfo::parse(sector) {
                Some(fs_info)
                    if fs_info.free_count <= self.geometry.data_clusters
                        && self.geometry.is_valid_cluster(fs_info.next_free) =>
                {
                    self.free_clusters = fs_info.free_count;
                    self.next_free = fs_info.next_free;
                    return Ok(());
                }
                _ => warn!("FSInfo sector is invalid; scanning the FAT"),
            }
        }
        let (free, first) = self.scan_free_clusters()?;
        self.free_clusters = free;
        self.next_free = first.unwrap_or(FIRST_DATA_CLUSTER);
        Ok(())
    }

    /// Flush, restore the clean flag, close the device and hand it back.
    pub fn unmount(mut self) -> PhatResult<D> {
        if self.write_enable {
            if self.marked_dirty && self.clean_at_mount {
                if let Some(bit) = self.geometry.clean_bit() {
                    let value = self.read_fat_raw(1)?;
                    self.write_fat_raw(1, value | bit)?;
                }
            }
            self.flush()?;
        }
        self.device.close().map_err(|e| PhatError::DriverError(e.to_string()))?;
        info!("Unmounted {} volume", self.geometry.fat_type);
        Ok(self.device)
    }

    /// Push FSInfo and every dirty cached sector to the device.
    pub fn flush(&mut self) -> PhatResult<()> {
        if !self.write_enable {
            return Ok(());
        }
        self.store_fs_info()?;
        self.cache.flush(&mut self.device)
    }

    /// Gate for every mutating operation. The first call on a mount clears
    /// the clean flag in FAT entry 1.
    pub(crate) fn begin_write(&mut self) -> PhatResult<()> {
        if !self.write_enable {
            return Err(PhatError::ReadOnly("volume is mounted read-only".to_string()));
        }
        if !self.marked_dirty {
            self.marked_dirty = true;
            if let Some(bit) = self.geometry.clean_bit() {
                let value = self.read_fat_raw(1)?;
                if value & bit != 0 {
                    self.write_fat_raw(1, value & !bit)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn persist_fs_info(&mut self) -> PhatResult<()> {
        self.store_fs_info()
    }

    fn store_fs_info(&mut self) -> PhatResult<()> {
        let Some(lba) = self.geometry.fs_info else {
            return Ok(());
        };
        let fs_info = FsInfo {
            free_count: self.free_clusters,
            next_free: self.next_free,
        };
        let sector = self.cache.modify(&mut self.device, lba)?;
        if FsInfo::parse(sector).is_some() {
            fs_info.store(sector);
        } else {
            sector.copy_from_slice(&fs_info.encode());
        }
        Ok(())
    }

    /// Timestamp stamped on entries created or modified from now on.
    pub fn now(&self) -> FatDateTime {
        match self.clock {
            Clock::Fixed(datetime) => datetime,
            Clock::System => FatDateTime::now(),
        }
    }

    pub fn set_datetime(&mut self, datetime: FatDateTime) {
        self.clock = Clock::Fixed(datetime);
    }

    /// Follow the host's local clock for all later timestamps.
    pub fn use_system_clock(&mut self) {
        self.clock = Clock::System;
    }

    pub fn is_writable(&self) -> bool {
        self.write_enable
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fat_type(&self) -> FatType {
        self.geometry.fat_type
    }

    pub fn cluster_size(&self) -> u32 {
        self.geometry.cluster_bytes()
    }

    pub fn free_clusters(&self) -> u32 {
        self.free_clusters
    }

    pub fn total_clusters(&self) -> u32 {
        self.geometry.max_valid_cluster - 1
    }

    pub fn volume_label(&self) -> String {
        self.boot.label()
    }

    pub fn volume_id(&self) -> u32 {
        self.boot.volume_id
    }

    /// Whether the volume was cleanly unmounted before this mount.
    pub fn was_clean(&self) -> bool {
        self.clean_at_mount
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            fat_type: self.geometry.fat_type.to_string(),
            partition_start: self.geometry.partition_start,
            total_sectors: self.geometry.total_sectors,
            cluster_size: self.cluster_size(),
            total_clusters: self.total_clusters(),
            free_clusters: self.free_clusters,
            free_bytes: self.free_clusters as u64 * self.cluster_size() as u64,
            volume_label: self.volume_label(),
            volume_id: self.volume_id(),
            clean: self.clean_at_mount,
        }
    }
}
