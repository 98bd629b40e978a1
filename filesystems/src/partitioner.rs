// MBR partition table management
// Creates an MBR, adds primary partitions and locates the volume a mount or
// format should use. GPT is recognised only to be refused.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use phat_core::{BlockDevice, Lba, PhatError, PhatResult, SECTOR_SIZE};

use crate::fat_common::constants::*;
use crate::fat_common::BootSector;
use crate::sector_cache::{device_read, device_write};

const PARTITION_TABLE_OFFSET: usize = 0x1BE;
const PARTITION_ENTRY_SIZE: usize = 16;
const DISK_SIGNATURE_OFFSET: usize = 0x1B8;
pub const MAX_PARTITIONS: usize = 4;

/// First usable sector, keeping partitions 1 MiB aligned.
pub const FIRST_USABLE_LBA: Lba = 2048;

// Geometry assumed when translating to CHS
const CHS_HEADS: u32 = 255;
const CHS_SECTORS_PER_TRACK: u32 = 63;
const CHS_MAX_CYLINDER: u32 = 1023;

const BOOT_INDICATOR_ACTIVE: u8 = 0x80;

/// One of the four primary partition slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionEntry {
    pub boot_indicator: u8,
    pub start_chs: [u8; 3],
    pub partition_type: u8,
    pub end_chs: [u8; 3],
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    fn decode(raw: &[u8]) -> Self {
        Self {
            boot_indicator: raw[0],
            start_chs: [raw[1], raw[2], raw[3]],
            partition_type: raw[4],
            end_chs: [raw[5], raw[6], raw[7]],
            start_lba: LittleEndian::read_u32(&raw[8..]),
            sector_count: LittleEndian::read_u32(&raw[12..]),
        }
    }

    fn encode(&self, raw: &mut [u8]) {
        raw[0] = self.boot_indicator;
        raw[1..4].copy_from_slice(&self.start_chs);
        raw[4] = self.partition_type;
        raw[5..8].copy_from_slice(&self.end_chs);
        LittleEndian::write_u32(&mut raw[8..], self.start_lba);
        LittleEndian::write_u32(&mut raw[12..], self.sector_count);
    }

    pub fn is_empty(&self) -> bool {
        self.partition_type == 0 || self.sector_count == 0
    }

    pub fn is_bootable(&self) -> bool {
        self.boot_indicator == BOOT_INDICATOR_ACTIVE
    }

    /// Start sector, falling back to the CHS address when the LBA field is 0.
    pub fn first_lba(&self) -> Lba {
        if self.start_lba != 0 {
            self.start_lba
        } else {
            chs_to_lba(self.start_chs)
        }
    }

    fn end_lba(&self) -> u64 {
        self.first_lba() as u64 + self.sector_count as u64
    }
}

/// Master boot record: boot code, disk signature and the partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mbr {
    pub disk_signature: u32,
    pub entries: [PartitionEntry; MAX_PARTITIONS],
    boot_code: Vec<u8>,
}

impl Mbr {
    pub fn new(disk_signature: u32) -> Self {
        Self {
            disk_signature,
            entries: [PartitionEntry::default(); MAX_PARTITIONS],
            boot_code: vec![0u8; DISK_SIGNATURE_OFFSET],
        }
    }

    /// `None` unless `sector` is a partition table rather than a boot sector.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if LittleEndian::read_u16(&sector[BOOT_SIGNATURE_OFFSET..]) != BOOT_SIGNATURE {
            return None;
        }
        if BootSector::is_dbr(sector) {
            return None;
        }
        let mut entries = [PartitionEntry::default(); MAX_PARTITIONS];
        for (i, entry) in entries.iter_mut().enumerate() {
            let at = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            *entry = PartitionEntry::decode(&sector[at..at + PARTITION_ENTRY_SIZE]);
            if entry.boot_indicator != 0 && entry.boot_indicator != BOOT_INDICATOR_ACTIVE {
                return None;
            }
        }
        Some(Self {
            disk_signature: LittleEndian::read_u32(&sector[DISK_SIGNATURE_OFFSET..]),
            entries,
            boot_code: sector[..DISK_SIGNATURE_OFFSET].to_vec(),
        })
    }

    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..DISK_SIGNATURE_OFFSET].copy_from_slice(&self.boot_code);
        LittleEndian::write_u32(&mut sector[DISK_SIGNATURE_OFFSET..], self.disk_signature);
        for (i, entry) in self.entries.iter().enumerate() {
            let at = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            entry.encode(&mut sector[at..at + PARTITION_ENTRY_SIZE]);
        }
        LittleEndian::write_u16(&mut sector[BOOT_SIGNATURE_OFFSET..], BOOT_SIGNATURE);
        sector
    }

    pub fn is_gpt_protective(&self) -> bool {
        self.entries.iter().any(|e| e.partition_type == PARTITION_TYPE_GPT_PROTECTIVE)
    }
}

/// CHS triple for `lba`, saturating to FE FF FF past cylinder 1023.
pub fn lba_to_chs(lba: Lba) -> [u8; 3] {
    let cylinder = lba / (CHS_HEADS * CHS_SECTORS_PER_TRACK);
    if cylinder > CHS_MAX_CYLINDER {
        return [0xFE, 0xFF, 0xFF];
    }
    let temp = lba % (CHS_HEADS * CHS_SECTORS_PER_TRACK);
    let head = temp / CHS_SECTORS_PER_TRACK;
    let sector = temp % CHS_SECTORS_PER_TRACK + 1;
    [
        head as u8,
        ((sector & 0x3F) | ((cylinder >> 2) & 0xC0)) as u8,
        (cylinder & 0xFF) as u8,
    ]
}

pub fn chs_to_lba(chs: [u8; 3]) -> Lba {
    let head = chs[0] as u32;
    let sector = (chs[1] & 0x3F) as u32;
    let cylinder = (((chs[1] & 0xC0) as u32) << 2) | chs[2] as u32;
    (cylinder * CHS_HEADS + head) * CHS_SECTORS_PER_TRACK + sector.saturating_sub(1)
}

/// Partition type byte for a FAT partition of `sectors` sectors.
pub fn partition_type_for(sectors: u32) -> u8 {
    if sectors < 8 * FAT12_MAX_CLUSTER {
        PARTITION_TYPE_FAT12
    } else if sectors < 8 * FAT16_MAX_CLUSTER {
        PARTITION_TYPE_FAT16
    } else {
        PARTITION_TYPE_FAT32_LBA
    }
}

fn read_first_sector<D: BlockDevice + ?Sized>(device: &mut D) -> PhatResult<[u8; SECTOR_SIZE]> {
    let mut sector = [0u8; SECTOR_SIZE];
    device_read(device, 0, &mut sector)?;
    Ok(sector)
}

/// Write a fresh, empty MBR with a random disk signature.
pub fn initialize_mbr<D: BlockDevice + ?Sized>(device: &mut D, force: bool) -> PhatResult<()> {
    device.open().map_err(|e| PhatError::DriverError(e.to_string()))?;
    let sector = read_first_sector(device)?;
    if !force && Mbr::parse(&sector).is_some() {
        return Err(PhatError::DiskAlreadyInitialized);
    }

    let mut signature = rand::random::<u32>();
    while signature == 0 {
        signature = rand::random::<u32>();
    }
    device_write(device, 0, &Mbr::new(signature).encode())?;
    info!("Initialized MBR with disk signature 0x{:08X}", signature);
    Ok(())
}

/// First and last sector a partition may occupy.
pub fn usable_lba_range<D: BlockDevice + ?Sized>(device: &mut D) -> PhatResult<(Lba, Lba)> {
    device.open().map_err(|e| PhatError::DriverError(e.to_string()))?;
    let sector = read_first_sector(device)?;
    if Mbr::parse(&sector).is_none() {
        return Err(PhatError::NoMbr);
    }
    Ok((FIRST_USABLE_LBA, device.capacity_sectors().saturating_sub(1)))
}

/// Add a primary partition; returns the slot it was placed in.
pub fn create_partition<D: BlockDevice + ?Sized>(
    device: &mut D,
    start: Lba,
    sectors: u32,
    bootable: bool,
) -> PhatResult<usize> {
    let (first, last) = usable_lba_range(device)?;
    let end = start as u64 + sectors as u64;
    if sectors == 0 || start < first || end - 1 > last as u64 {
        return Err(PhatError::PartitionLbaIllegal);
    }

    let mut mbr = Mbr::parse(&read_first_sector(device)?).ok_or(PhatError::NoMbr)?;
    if mbr.is_gpt_protective() {
        return Err(PhatError::PartitionTableError("GPT disks are not supported".to_string()));
    }
    let overlaps = mbr
        .entries
        .iter()
        .filter(|e| !e.is_empty())
        .any(|e| (start as u64) < e.end_lba() && (e.first_lba() as u64) < end);
    if overlaps {
        return Err(PhatError::PartitionOverlapped);
    }
    let slot = mbr
        .entries
        .iter()
        .position(|e| e.is_empty())
        .ok_or(PhatError::NoFreePartitions)?;

    let last_lba = (end - 1) as Lba;
    mbr.entries[slot] = PartitionEntry {
        boot_indicator: if bootable { BOOT_INDICATOR_ACTIVE } else { 0 },
        start_chs: lba_to_chs(start),
        partition_type: partition_type_for(sectors),
        end_chs: lba_to_chs(last_lba),
        start_lba: start,
        sector_count: sectors,
    };
    device_write(device, 0, &mbr.encode())?;
    info!(
        "Created partition {} at LBA {} ({} sectors, type 0x{:02X})",
        slot, start, sectors, mbr.entries[slot].partition_type
    );
    Ok(slot)
}

/// Start and length of the volume `index` refers to, given sector 0.
/// Without an MBR the whole device is the volume and only index 0 is valid.
pub fn locate_volume(sector0: &[u8], index: usize, capacity: Lba) -> PhatResult<(Lba, u32)> {
    let mbr = match Mbr::parse(sector0) {
        Some(mbr) => mbr,
        None if index == 0 => return Ok((0, capacity)),
        None => {
            return Err(PhatError::InvalidParameter(format!(
                "partition {} requested on a disk without an MBR",
                index
            )))
        }
    };
    if mbr.is_gpt_protective() {
        return Err(PhatError::PartitionTableError("GPT disks are not supported".to_string()));
    }
    let entry = mbr
        .entries
        .get(index)
        .ok_or(PhatError::PartitionIndexOutOfBound(index))?;
    if entry.is_empty() {
        return Err(PhatError::PartitionTableError(format!("partition {} is empty", index)));
    }
    if entry.end_lba() > capacity as u64 {
        return Err(PhatError::PartitionTableError(format!(
            "partition {} ends past the end of the device",
            index
        )));
    }
    debug!("Partition {} at LBA {} ({} sectors)", index, entry.first_lba(), entry.sector_count);
    Ok((entry.first_lba(), entry.sector_count))
}
