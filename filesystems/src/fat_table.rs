// FAT table codec
// Locates and encodes 12/16/32-bit FAT entries. 12-bit entries pack two
// clusters into three bytes and may straddle a sector boundary.

use byteorder::{ByteOrder, LittleEndian};
use log::trace;
use phat_core::{BlockDevice, Lba, PhatError, PhatResult, SECTOR_SIZE};

use crate::fat_common::constants::*;
use crate::fat_common::FatType;
use crate::volume::Volume;

/// Decoded meaning of a FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(u32),
    EndOfChain,
    Bad,
    /// A link outside the volume's cluster range.
    Invalid(u32),
}

impl FatEntry {
    pub fn classify(fat_type: FatType, max_valid_cluster: u32, raw: u32) -> Self {
        if raw == 0 {
            FatEntry::Free
        } else if raw >= fat_type.end_of_chain() {
            FatEntry::EndOfChain
        } else if raw == fat_type.bad_cluster() {
            FatEntry::Bad
        } else if raw >= FIRST_DATA_CLUSTER && raw <= max_valid_cluster {
            FatEntry::Next(raw)
        } else {
            FatEntry::Invalid(raw)
        }
    }

    /// Width-specific raw value.
    pub fn raw(self, fat_type: FatType) -> u32 {
        match self {
            FatEntry::Free => 0,
            FatEntry::Next(cluster) | FatEntry::Invalid(cluster) => cluster,
            FatEntry::EndOfChain => fat_type.end_of_chain(),
            FatEntry::Bad => fat_type.bad_cluster(),
        }
    }
}

/// Byte offset of `cluster`'s entry from the start of a FAT copy.
pub fn entry_offset(fat_type: FatType, cluster: u32) -> usize {
    let cluster = cluster as usize;
    match fat_type {
        FatType::Fat12 => cluster + cluster / 2,
        FatType::Fat16 => cluster * 2,
        FatType::Fat32 => cluster * 4,
    }
}

fn entry_width(fat_type: FatType) -> usize {
    match fat_type {
        FatType::Fat12 | FatType::Fat16 => 2,
        FatType::Fat32 => 4,
    }
}

fn decode_bytes(fat_type: FatType, cluster: u32, bytes: &[u8]) -> u32 {
    match fat_type {
        FatType::Fat12 => {
            let packed = LittleEndian::read_u16(bytes) as u32;
            if cluster & 1 == 1 {
                packed >> 4
            } else {
                packed & 0x0FFF
            }
        }
        FatType::Fat16 => LittleEndian::read_u16(bytes) as u32,
        FatType::Fat32 => LittleEndian::read_u32(bytes) & FAT32_ENTRY_MASK,
    }
}

/// Merge `value` into the entry bytes, keeping the neighbour's nibble on
/// FAT12 and the reserved top bits on FAT32.
fn encode_bytes(fat_type: FatType, cluster: u32, bytes: &mut [u8], value: u32) {
    match fat_type {
        FatType::Fat12 => {
            let old = LittleEndian::read_u16(bytes);
            let value = (value & 0x0FFF) as u16;
            let packed = if cluster & 1 == 1 {
                (old & 0x000F) | (value << 4)
            } else {
                (old & 0xF000) | value
            };
            LittleEndian::write_u16(bytes, packed);
        }
        FatType::Fat16 => LittleEndian::write_u16(bytes, value as u16),
        FatType::Fat32 => {
            let old = LittleEndian::read_u32(bytes);
            LittleEndian::write_u32(bytes, (old & !FAT32_ENTRY_MASK) | (value & FAT32_ENTRY_MASK));
        }
    }
}

/// Read an entry from an in-memory FAT image.
pub fn read_entry(fat_type: FatType, fat: &[u8], cluster: u32) -> u32 {
    let at = entry_offset(fat_type, cluster);
    decode_bytes(fat_type, cluster, &fat[at..at + entry_width(fat_type)])
}

/// Write an entry into an in-memory FAT image.
pub fn write_entry(fat_type: FatType, fat: &mut [u8], cluster: u32, value: u32) {
    let at = entry_offset(fat_type, cluster);
    encode_bytes(fat_type, cluster, &mut fat[at..at + entry_width(fat_type)], value);
}

impl<D: BlockDevice> Volume<D> {
    fn fat_location(&self, copy: u32, cluster: u32) -> (Lba, usize) {
        let offset = entry_offset(self.geometry.fat_type, cluster);
        let lba = self.geometry.fat_start
            + copy * self.geometry.sectors_per_fat
            + (offset / SECTOR_SIZE) as Lba;
        (lba, offset % SECTOR_SIZE)
    }

    /// Copy bytes out of the FAT starting at (`lba`, `at`), continuing into the
    /// next sector when the run crosses the boundary.
    fn read_fat_bytes(&mut self, lba: Lba, at: usize, out: &mut [u8]) -> PhatResult<()> {
        let first = (SECTOR_SIZE - at).min(out.len());
        out[..first].copy_from_slice(&self.cache.read(&mut self.device, lba)?[at..at + first]);
        if first < out.len() {
            let rest = out.len() - first;
            out[first..].copy_from_slice(&self.cache.read(&mut self.device, lba + 1)?[..rest]);
        }
        Ok(())
    }

    fn write_fat_bytes(&mut self, lba: Lba, at: usize, bytes: &[u8]) -> PhatResult<()> {
        let first = (SECTOR_SIZE - at).min(bytes.len());
        self.cache.modify(&mut self.device, lba)?[at..at + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            let rest = bytes.len() - first;
            self.cache.modify(&mut self.device, lba + 1)?[..rest].copy_from_slice(&bytes[first..]);
        }
        Ok(())
    }

    /// Raw entry value from the authoritative FAT copy.
    pub(crate) fn read_fat_raw(&mut self, cluster: u32) -> PhatResult<u32> {
        let fat_type = self.geometry.fat_type;
        let (lba, at) = self.fat_location(self.geometry.active_fat, cluster);
        let mut bytes = [0u8; 4];
        let width = entry_width(fat_type);
        self.read_fat_bytes(lba, at, &mut bytes[..width])?;
        Ok(decode_bytes(fat_type, cluster, &bytes[..width]))
    }

    /// Store a raw entry value in every FAT copy that is kept in use.
    pub(crate) fn write_fat_raw(&mut self, cluster: u32, value: u32) -> PhatResult<()> {
        let fat_type = self.geometry.fat_type;
        let width = entry_width(fat_type);
        for copy in self.geometry.fat_copies() {
            let (lba, at) = self.fat_location(copy, cluster);
            let mut bytes = [0u8; 4];
            self.read_fat_bytes(lba, at, &mut bytes[..width])?;
            encode_bytes(fat_type, cluster, &mut bytes[..width], value);
            self.write_fat_bytes(lba, at, &bytes[..width])?;
        }
        Ok(())
    }

    fn check_cluster(&self, cluster: u32) -> PhatResult<()> {
        if self.geometry.is_valid_cluster(cluster) {
            Ok(())
        } else {
            Err(PhatError::FatError(format!(
                "cluster {} outside 2..={}",
                cluster, self.geometry.max_valid_cluster
            )))
        }
    }

    pub fn read_fat(&mut self, cluster: u32) -> PhatResult<FatEntry> {
        self.check_cluster(cluster)?;
        let raw = self.read_fat_raw(cluster)?;
        Ok(FatEntry::classify(self.geometry.fat_type, self.geometry.max_valid_cluster, raw))
    }

    pub(crate) fn write_fat(&mut self, cluster: u32, entry: FatEntry) -> PhatResult<()> {
        self.check_cluster(cluster)?;
        if let FatEntry::Next(next) = entry {
            self.check_cluster(next)?;
        }
        trace!("FAT[{}] <- {:?}", cluster, entry);
        self.write_fat_raw(cluster, entry.raw(self.geometry.fat_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::formatted_volume;

    #[test]
    fn test_fat12_packing() {
        let mut fat = [0u8; 6];
        write_entry(FatType::Fat12, &mut fat, 2, 0x123);
        write_entry(FatType::Fat12, &mut fat, 3, 0x456);
        assert_eq!(&fat[3..6], &[0x23, 0x61, 0x45]);
        assert_eq!(read_entry(FatType::Fat12, &fat, 2), 0x123);
        assert_eq!(read_entry(FatType::Fat12, &fat, 3), 0x456);

        // Rewriting one half keeps the other
        write_entry(FatType::Fat12, &mut fat, 2, 0xFFF);
        assert_eq!(read_entry(FatType::Fat12, &fat, 3), 0x456);
    }

    #[test]
    fn test_fat32_keeps_reserved_bits() {
        let mut fat = [0u8; 12];
        fat[8..12].copy_from_slice(&0xF000_0000u32.to_le_bytes());
        write_entry(FatType::Fat32, &mut fat, 2, 0x0FFF_FFF8);
        assert_eq!(LittleEndian::read_u32(&fat[8..]), 0xFFFF_FFF8);
        assert_eq!(read_entry(FatType::Fat32, &fat, 2), 0x0FFF_FFF8);
    }

    #[test]
    fn test_classify() {
        let c = |raw| FatEntry::classify(FatType::Fat16, 1000, raw);
        assert_eq!(c(0), FatEntry::Free);
        assert_eq!(c(5), FatEntry::Next(5));
        assert_eq!(c(0xFFF8), FatEntry::EndOfChain);
        assert_eq!(c(0xFFFF), FatEntry::EndOfChain);
        assert_eq!(c(0xFFF7), FatEntry::Bad);
        assert_eq!(c(1), FatEntry::Invalid(1));
        assert_eq!(c(1001), FatEntry::Invalid(1001));
    }

    #[test]
    fn test_fat12_entry_straddles_sector() {
        // Cluster 341 starts at byte 511 of the FAT
        assert_eq!(entry_offset(FatType::Fat12, 341), 511);
        let mut volume = formatted_volume(2880, 12);
        volume.write_fat(340, FatEntry::Next(341)).unwrap();
        volume.write_fat(341, FatEntry::Next(0xABC)).unwrap();
        volume.write_fat(342, FatEntry::EndOfChain).unwrap();

        assert_eq!(volume.read_fat(340).unwrap(), FatEntry::Next(341));
        assert_eq!(volume.read_fat(341).unwrap(), FatEntry::Next(0xABC));
        assert_eq!(volume.read_fat(342).unwrap(), FatEntry::EndOfChain);

        volume.cache.flush(&mut volume.device).unwrap();
        let fat_start = volume.geometry.fat_start;
        for copy in 0..2 {
            let base = fat_start + copy * volume.geometry.sectors_per_fat;
            assert_eq!(volume.device.sector(base)[511], 0xC1);
            assert_eq!(volume.device.sector(base + 1)[0], 0xAB);
            assert_eq!(volume.device.sector(base + 1)[1], 0xF8);
        }
    }

    #[test]
    fn test_mirrored_copies() {
        let mut volume = formatted_volume(40_000, 16);
        volume.write_fat(10, FatEntry::Next(11)).unwrap();
        volume.cache.flush(&mut volume.device).unwrap();

        let fat_start = volume.geometry.fat_start;
        let spf = volume.geometry.sectors_per_fat;
        for copy in 0..2 {
            let sector = volume.device.sector(fat_start + copy * spf);
            assert_eq!(LittleEndian::read_u16(&sector[20..]), 11);
        }
    }

    #[test]
    fn test_out_of_range_cluster() {
        let mut volume = formatted_volume(2880, 12);
        assert!(matches!(volume.read_fat(1), Err(PhatError::FatError(_))));
        assert!(matches!(volume.read_fat(2849), Err(PhatError::FatError(_))));
        assert!(matches!(volume.write_fat(5, FatEntry::Next(9000)), Err(PhatError::FatError(_))));
    }
}
