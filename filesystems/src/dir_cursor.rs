// Directory traversal
// Maps a directory slot index to a sector, walking the cluster chain from the
// cursor's cached position, and assembles LFN runs into long names.

use log::{trace, warn};
use phat_core::{BlockDevice, Lba, PhatError, PhatResult};

use crate::fat_common::constants::*;
use crate::fat_common::{DirRecord, FatDate, FatDateTime, LfnEntry, ShortEntry};
use crate::volume::Volume;

/// A directory may not hold more than 65536 slots.
pub const MAX_DIR_SLOTS: u32 = 65536;

const MAX_LFN_RECORDS: usize = (MAX_LFN_LENGTH + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY;

/// Position within one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirCursor {
    start_cluster: u32,  // 0 selects the fixed FAT12/16 root region
    current_cluster: u32,
    cluster_index: u32,
    next_slot: u32,
}

impl DirCursor {
    pub(crate) fn new(start_cluster: u32) -> Self {
        Self {
            start_cluster,
            current_cluster: start_cluster,
            cluster_index: 0,
            next_slot: 0,
        }
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn is_fixed_root(&self) -> bool {
        self.start_cluster == 0
    }

    /// Slot the next enumeration step will look at.
    pub fn position(&self) -> u32 {
        self.next_slot
    }

    pub fn rewind(&mut self) {
        self.next_slot = 0;
    }
}

/// One enumerated directory item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirItem {
    pub name: String,
    pub entry: ShortEntry,
    pub first_slot: u32,  // first LFN record, or the short entry itself
    pub short_slot: u32,
}

impl DirItem {
    pub fn short_name(&self) -> &[u8; 11] {
        &self.entry.name
    }

    pub fn attributes(&self) -> u8 {
        self.entry.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.entry.is_directory()
    }

    pub fn size(&self) -> u32 {
        self.entry.file_size
    }

    pub fn first_cluster(&self) -> u32 {
        self.entry.first_cluster
    }

    pub fn created(&self) -> FatDateTime {
        self.entry.created
    }

    pub fn modified(&self) -> FatDateTime {
        self.entry.modified
    }

    pub fn accessed(&self) -> FatDate {
        self.entry.accessed
    }

    /// "." or "..".
    pub fn is_dot_entry(&self) -> bool {
        self.entry.name[0] == b'.'
    }
}

/// Collects an LFN run while enumerating.
struct LfnAssembler {
    units: [u16; MAX_LFN_RECORDS * LFN_CHARS_PER_ENTRY],
    len: usize,
    expected: u8,  // ordinal the next record must carry; 0 once complete
    checksum: u8,
    first_slot: u32,
    active: bool,
}

impl LfnAssembler {
    fn new() -> Self {
        Self {
            units: [0; MAX_LFN_RECORDS * LFN_CHARS_PER_ENTRY],
            len: 0,
            expected: 0,
            checksum: 0,
            first_slot: 0,
            active: false,
        }
    }

    fn reset(&mut self) {
        self.active = false;
        self.len = 0;
        self.expected = 0;
    }

    fn splice(&mut self, entry: &LfnEntry) {
        let at = (entry.ordinal() as usize - 1) * LFN_CHARS_PER_ENTRY;
        self.units[at..at + LFN_CHARS_PER_ENTRY].copy_from_slice(&entry.chars);
    }

    fn push(&mut self, slot: u32, entry: &LfnEntry) {
        if !entry.is_valid() {
            self.reset();
            return;
        }
        let ordinal = entry.ordinal();
        if entry.is_last() {
            if self.active {
                warn!("LFN run at slot {} abandoned by a new run at {}", self.first_slot, slot);
            }
            if ordinal as usize > MAX_LFN_RECORDS {
                self.reset();
                return;
            }
            self.active = true;
            self.checksum = entry.checksum;
            self.first_slot = slot;
            self.len = (ordinal as usize - 1) * LFN_CHARS_PER_ENTRY + entry.name_units().len();
            self.splice(entry);
            self.expected = ordinal - 1;
        } else if self.active && ordinal == self.expected && entry.checksum == self.checksum {
            self.splice(entry);
            self.expected -= 1;
        } else {
            if self.active {
                warn!("Orphan LFN record at slot {}", slot);
            }
            self.reset();
        }
    }

    /// The assembled name if the run is complete and belongs to `short`.
    fn take(&mut self, short: &ShortEntry) -> Option<(String, u32)> {
        let complete = self.active && self.expected == 0 && self.checksum == short.checksum();
        if self.active && !complete {
            warn!("LFN run at slot {} does not match its short entry", self.first_slot);
        }
        let result = if complete && self.len > 0 {
            Some((String::from_utf16_lossy(&self.units[..self.len]), self.first_slot))
        } else {
            None
        };
        self.reset();
        result
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Start cluster of the root directory (0 for the fixed region).
    pub(crate) fn root_start(&self) -> u32 {
        self.geometry.root_cluster
    }

    /// Directory start for a first-cluster value read from an entry; ".."
    /// entries store 0 for the root.
    pub(crate) fn dir_start_for(&self, first_cluster: u32) -> u32 {
        if first_cluster == 0 {
            self.root_start()
        } else {
            first_cluster
        }
    }

    /// Sector and byte offset of `slot`. Returns `None` past the end unless
    /// `grow` is set, in which case the directory is extended with wiped
    /// clusters. The fixed root region never grows.
    pub(crate) fn slot_location(
        &mut self,
        cursor: &mut DirCursor,
        slot: u32,
        grow: bool,
    ) -> PhatResult<Option<(Lba, usize)>> {
        if slot >= MAX_DIR_SLOTS {
            return if grow { Err(PhatError::NotEnoughSpace) } else { Ok(None) };
        }
        let sector_index = slot / DIR_ENTRIES_PER_SECTOR as u32;
        let offset = (slot as usize % DIR_ENTRIES_PER_SECTOR) * DIR_ENTRY_SIZE;

        if cursor.is_fixed_root() {
            if sector_index >= self.geometry.root_dir_sectors {
                return if grow { Err(PhatError::NotEnoughSpace) } else { Ok(None) };
            }
            return Ok(Some((self.geometry.root_dir_start + sector_index, offset)));
        }

        let spc = self.geometry.sectors_per_cluster;
        let block = sector_index / spc;
        if block < cursor.cluster_index {
            cursor.current_cluster = cursor.start_cluster;
            cursor.cluster_index = 0;
        }
        while cursor.cluster_index < block {
            let next = match self.next_cluster(cursor.current_cluster) {
                Ok(next) => next,
                Err(PhatError::EndOfFatChain) if grow => {
                    let next = self.extend_chain(cursor.current_cluster)?;
                    self.wipe_cluster(next)?;
                    trace!("Directory at {} grew into cluster {}", cursor.start_cluster, next);
                    next
                }
                Err(PhatError::EndOfFatChain) => return Ok(None),
                Err(e) => return Err(e),
            };
            cursor.current_cluster = next;
            cursor.cluster_index += 1;
        }
        let lba = self.geometry.cluster_to_lba(cursor.current_cluster) + sector_index % spc;
        Ok(Some((lba, offset)))
    }

    pub(crate) fn read_slot(&mut self, cursor: &mut DirCursor, slot: u32) -> PhatResult<Option<DirRecord>> {
        match self.slot_location(cursor, slot, false)? {
            Some((lba, offset)) => {
                let sector = self.cache.read(&mut self.device, lba)?;
                Ok(Some(DirRecord::decode(&sector[offset..offset + DIR_ENTRY_SIZE])))
            }
            None => Ok(None),
        }
    }

    /// Store a raw 32-byte record, growing the directory if needed.
    pub(crate) fn write_slot(&mut self, cursor: &mut DirCursor, slot: u32, raw: &[u8]) -> PhatResult<()> {
        let (lba, offset) = self
            .slot_location(cursor, slot, true)?
            .ok_or(PhatError::NotEnoughSpace)?;
        let sector = self.cache.modify(&mut self.device, lba)?;
        sector[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&raw[..DIR_ENTRY_SIZE]);
        Ok(())
    }

    pub(crate) fn mark_slot_deleted(&mut self, cursor: &mut DirCursor, slot: u32) -> PhatResult<()> {
        let (lba, offset) = self
            .slot_location(cursor, slot, false)?
            .ok_or_else(|| PhatError::FsError(format!("directory slot {} does not exist", slot)))?;
        self.cache.modify(&mut self.device, lba)?[offset] = DIR_ENTRY_DELETED;
        Ok(())
    }

    /// Advance to the next item, assembling its long name. `None` once the
    /// end marker or the end of the directory is reached.
    pub fn next_entry(&mut self, cursor: &mut DirCursor) -> PhatResult<Option<DirItem>> {
        let mut lfn = LfnAssembler::new();
        loop {
            let slot = cursor.next_slot;
            let record = match self.read_slot(cursor, slot)? {
                Some(record) => record,
                None => return Ok(None),
            };
            match record {
                DirRecord::End => return Ok(None),
                DirRecord::Deleted => lfn.reset(),
                DirRecord::Lfn(entry) => lfn.push(slot, &entry),
                DirRecord::Short(entry) => {
                    cursor.next_slot = slot + 1;
                    if entry.is_volume_label() {
                        lfn.reset();
                        continue;
                    }
                    let (name, first_slot) = match lfn.take(&entry) {
                        Some(found) => found,
                        None => (entry.display_name(), slot),
                    };
                    return Ok(Some(DirItem {
                        name,
                        entry,
                        first_slot,
                        short_slot: slot,
                    }));
                }
            }
            cursor.next_slot = slot + 1;
        }
    }

    /// Look `name` up in one directory by exact, case-as-stored comparison.
    pub(crate) fn find_entry(&mut self, dir_start: u32, name: &str) -> PhatResult<Option<DirItem>> {
        let mut cursor = DirCursor::new(dir_start);
        while let Some(item) = self.next_entry(&mut cursor)? {
            if item.name == name {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat_common::long_names::create_lfn_entries;
    use crate::fat_common::{attributes::*, lfn_checksum};
    use crate::test_helpers::formatted_volume;

    fn short(name: &[u8; 11]) -> ShortEntry {
        ShortEntry::new(*name, ATTR_ARCHIVE, 0, FatDateTime::default())
    }

    #[test]
    fn test_fixed_root_addressing() {
        let mut volume = formatted_volume(2880, 12);
        let mut cursor = DirCursor::new(0);
        assert_eq!(volume.slot_location(&mut cursor, 0, false).unwrap(), Some((19, 0)));
        assert_eq!(volume.slot_location(&mut cursor, 17, false).unwrap(), Some((20, 32)));
        assert_eq!(volume.slot_location(&mut cursor, 224, false).unwrap(), None);
        assert!(matches!(volume.slot_location(&mut cursor, 224, true), Err(PhatError::NotEnoughSpace)));
    }

    #[test]
    fn test_growth_only_when_allowed() {
        let mut volume = formatted_volume(131_072, 32);
        let root = volume.root_start();
        let mut cursor = DirCursor::new(root);
        // One sector per cluster: slot 16 lives in the second cluster
        assert_eq!(volume.slot_location(&mut cursor, 16, false).unwrap(), None);
        assert_eq!(volume.cluster_chain(root).unwrap().len(), 1);

        let (lba, offset) = volume.slot_location(&mut cursor, 16, true).unwrap().unwrap();
        assert_eq!(offset, 0);
        let chain = volume.cluster_chain(root).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(lba, volume.geometry.cluster_to_lba(chain[1]));

        // Walking back rewinds to the start of the chain
        let (lba0, _) = volume.slot_location(&mut cursor, 3, false).unwrap().unwrap();
        assert_eq!(lba0, volume.geometry.cluster_to_lba(root));
    }

    #[test]
    fn test_enumeration_with_lfn() {
        let mut volume = formatted_volume(2880, 12);
        let mut cursor = DirCursor::new(0);
        let entry = short(b"THEBIO~1TXT");
        let records = create_lfn_entries("The Biography of John Wok.txt", lfn_checksum(&entry.name));
        for (i, record) in records.iter().enumerate() {
            volume.write_slot(&mut cursor, i as u32, &record.to_bytes()).unwrap();
        }
        volume.write_slot(&mut cursor, 3, &entry.to_bytes()).unwrap();
        volume.write_slot(&mut cursor, 4, &short(b"PLAIN   TXT").to_bytes()).unwrap();

        let mut cursor = DirCursor::new(0);
        let item = volume.next_entry(&mut cursor).unwrap().unwrap();
        assert_eq!(item.name, "The Biography of John Wok.txt");
        assert_eq!((item.first_slot, item.short_slot), (0, 3));
        let item = volume.next_entry(&mut cursor).unwrap().unwrap();
        assert_eq!(item.name, "PLAIN.TXT");
        assert_eq!((item.first_slot, item.short_slot), (4, 4));
        assert!(volume.next_entry(&mut cursor).unwrap().is_none());
        assert!(volume.next_entry(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_checksum_mismatch_falls_back_to_short_name() {
        let mut volume = formatted_volume(2880, 12);
        let mut cursor = DirCursor::new(0);
        let entry = short(b"LONGNA~1TXT");
        for (i, record) in create_lfn_entries("Long name.txt", 0x00).iter().enumerate() {
            volume.write_slot(&mut cursor, i as u32, &record.to_bytes()).unwrap();
        }
        volume.write_slot(&mut cursor, 1, &entry.to_bytes()).unwrap();

        let item = volume.next_entry(&mut DirCursor::new(0)).unwrap().unwrap();
        assert_eq!(item.name, "LONGNA~1.TXT");
        assert_eq!(item.first_slot, 1);
    }

    #[test]
    fn test_missing_ordinal_invalidates_run() {
        let mut volume = formatted_volume(2880, 12);
        let mut cursor = DirCursor::new(0);
        let entry = short(b"THEBIO~1TXT");
        let records = create_lfn_entries("The Biography of John Wok.txt", entry.checksum());
        // Drop ordinal 2
        volume.write_slot(&mut cursor, 0, &records[0].to_bytes()).unwrap();
        volume.write_slot(&mut cursor, 1, &records[2].to_bytes()).unwrap();
        volume.write_slot(&mut cursor, 2, &entry.to_bytes()).unwrap();

        let item = volume.next_entry(&mut DirCursor::new(0)).unwrap().unwrap();
        assert_eq!(item.name, "THEBIO~1.TXT");
    }

    #[test]
    fn test_deleted_and_label_skipped() {
        let mut volume = formatted_volume(2880, 12);
        let mut cursor = DirCursor::new(0);
        let mut label = short(b"MY DISK    ");
        label.attributes = ATTR_VOLUME_ID;
        volume.write_slot(&mut cursor, 0, &label.to_bytes()).unwrap();
        let mut gone = short(b"GONE    TXT").to_bytes();
        gone[0] = DIR_ENTRY_DELETED;
        volume.write_slot(&mut cursor, 1, &gone).unwrap();
        volume.write_slot(&mut cursor, 2, &short(b"KEPT    TXT").to_bytes()).unwrap();

        let names: Vec<String> = {
            let mut cursor = DirCursor::new(0);
            let mut names = Vec::new();
            while let Some(item) = volume.next_entry(&mut cursor).unwrap() {
                names.push(item.name);
            }
            names
        };
        assert_eq!(names, vec!["KEPT.TXT"]);
    }
}
