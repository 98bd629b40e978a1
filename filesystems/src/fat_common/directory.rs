// Directory entry codec for FAT12/16/32
// A 32-byte slot is decoded into a tagged record by looking at its first and attribute bytes

use byteorder::{ByteOrder, LittleEndian};
use static_assertions::const_assert_eq;

use super::codepage::cp437_to_char;
use super::constants::*;
use super::timestamps::{FatDate, FatDateTime, FatTime};

/// Directory entry attributes
pub mod attributes {
    pub const ATTR_READ_ONLY: u8 = 0x01;
    pub const ATTR_HIDDEN: u8 = 0x02;
    pub const ATTR_SYSTEM: u8 = 0x04;
    pub const ATTR_VOLUME_ID: u8 = 0x08;
    pub const ATTR_DIRECTORY: u8 = 0x10;
    pub const ATTR_ARCHIVE: u8 = 0x20;
    pub const ATTR_LONG_NAME: u8 = 0x0F;  // LFN marker
    pub const ATTR_LONG_NAME_MASK: u8 = 0x3F;
}

use attributes::*;

// Short entry layout
const DIR_NAME: usize = 0;
const DIR_ATTR: usize = 11;
const DIR_NT_RES: usize = 12;
const DIR_CRT_TIME_TENTH: usize = 13;
const DIR_CRT_TIME: usize = 14;
const DIR_CRT_DATE: usize = 16;
const DIR_LST_ACC_DATE: usize = 18;
const DIR_FST_CLUS_HI: usize = 20;
const DIR_WRT_TIME: usize = 22;
const DIR_WRT_DATE: usize = 24;
const DIR_FST_CLUS_LO: usize = 26;
const DIR_FILE_SIZE: usize = 28;

// LFN entry layout
const LDIR_ORD: usize = 0;
const LDIR_NAME1: usize = 1;   // 5 units
const LDIR_ATTR: usize = 11;
const LDIR_TYPE: usize = 12;
const LDIR_CHKSUM: usize = 13;
const LDIR_NAME2: usize = 14;  // 6 units
const LDIR_FST_CLUS_LO: usize = 26;
const LDIR_NAME3: usize = 28;  // 2 units

const_assert_eq!(DIR_FILE_SIZE + 4, DIR_ENTRY_SIZE);
const_assert_eq!(LDIR_NAME3 + 4, DIR_ENTRY_SIZE);
const_assert_eq!(DIR_ENTRIES_PER_SECTOR, 16);

/// Standard 8.3 directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub case_info: u8,
    pub created: FatDateTime,
    pub accessed: FatDate,
    pub modified: FatDateTime,
    pub first_cluster: u32,
    pub file_size: u32,
}

/// One long-filename continuation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfnEntry {
    pub order: u8,          // ordinal with the LFN_LAST_ENTRY bit
    pub chars: [u16; 13],
    pub attributes: u8,
    pub entry_type: u8,
    pub checksum: u8,
    pub cluster_low: u16,
}

/// A 32-byte directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirRecord {
    /// First byte 0x00: this and every following slot is free.
    End,
    /// First byte 0xE5.
    Deleted,
    Lfn(LfnEntry),
    Short(ShortEntry),
}

impl DirRecord {
    pub fn decode(raw: &[u8]) -> Self {
        debug_assert!(raw.len() >= DIR_ENTRY_SIZE);
        match raw[0] {
            DIR_ENTRY_END => DirRecord::End,
            DIR_ENTRY_DELETED => DirRecord::Deleted,
            _ if raw[DIR_ATTR] & ATTR_LONG_NAME_MASK == ATTR_LONG_NAME => {
                DirRecord::Lfn(LfnEntry::decode(raw))
            }
            _ => DirRecord::Short(ShortEntry::decode(raw)),
        }
    }

    /// True for slots a new entry may take.
    pub fn is_free(&self) -> bool {
        matches!(self, DirRecord::End | DirRecord::Deleted)
    }
}

impl ShortEntry {
    pub fn new(name: [u8; 11], attributes: u8, case_info: u8, now: FatDateTime) -> Self {
        Self {
            name,
            attributes,
            case_info,
            created: now,
            accessed: now.date,
            modified: now,
            first_cluster: 0,
            file_size: 0,
        }
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[DIR_NAME..DIR_NAME + 11]);
        let hi = LittleEndian::read_u16(&raw[DIR_FST_CLUS_HI..]) as u32;
        let lo = LittleEndian::read_u16(&raw[DIR_FST_CLUS_LO..]) as u32;
        Self {
            name,
            attributes: raw[DIR_ATTR],
            case_info: raw[DIR_NT_RES],
            created: FatDateTime::new(
                FatDate::decode(LittleEndian::read_u16(&raw[DIR_CRT_DATE..])),
                FatTime::decode_with_tenths(
                    LittleEndian::read_u16(&raw[DIR_CRT_TIME..]),
                    raw[DIR_CRT_TIME_TENTH],
                ),
            ),
            accessed: FatDate::decode(LittleEndian::read_u16(&raw[DIR_LST_ACC_DATE..])),
            modified: FatDateTime::new(
                FatDate::decode(LittleEndian::read_u16(&raw[DIR_WRT_DATE..])),
                FatTime::decode(LittleEndian::read_u16(&raw[DIR_WRT_TIME..])),
            ),
            first_cluster: (hi << 16) | lo,
            file_size: LittleEndian::read_u32(&raw[DIR_FILE_SIZE..]),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        raw[DIR_NAME..DIR_NAME + 11].copy_from_slice(&self.name);
        raw[DIR_ATTR] = self.attributes;
        raw[DIR_NT_RES] = self.case_info;
        raw[DIR_CRT_TIME_TENTH] = self.created.time.encode_tenths();
        LittleEndian::write_u16(&mut raw[DIR_CRT_TIME..], self.created.time.encode());
        LittleEndian::write_u16(&mut raw[DIR_CRT_DATE..], self.created.date.encode());
        LittleEndian::write_u16(&mut raw[DIR_LST_ACC_DATE..], self.accessed.encode());
        LittleEndian::write_u16(&mut raw[DIR_FST_CLUS_HI..], (self.first_cluster >> 16) as u16);
        LittleEndian::write_u16(&mut raw[DIR_WRT_TIME..], self.modified.time.encode());
        LittleEndian::write_u16(&mut raw[DIR_WRT_DATE..], self.modified.date.encode());
        LittleEndian::write_u16(&mut raw[DIR_FST_CLUS_LO..], self.first_cluster as u16);
        LittleEndian::write_u32(&mut raw[DIR_FILE_SIZE..], self.file_size);
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        self.encode(&mut raw);
        raw
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & (ATTR_VOLUME_ID | ATTR_DIRECTORY) == ATTR_VOLUME_ID
    }

    pub fn checksum(&self) -> u8 {
        lfn_checksum(&self.name)
    }

    /// Render the 8.3 name, lower-casing per the case-info bits.
    pub fn display_name(&self) -> String {
        let mut name = String::with_capacity(12);
        let base_lower = self.case_info & CI_BASENAME_IS_LOWER != 0;
        let ext_lower = self.case_info & CI_EXTENSION_IS_LOWER != 0;

        let base = trim_padding(&self.name[0..8]);
        for (i, &byte) in base.iter().enumerate() {
            let byte = if i == 0 && byte == DIR_ENTRY_KANJI_E5 { DIR_ENTRY_DELETED } else { byte };
            name.push(oem_char(byte, base_lower));
        }

        let ext = trim_padding(&self.name[8..11]);
        if !ext.is_empty() {
            name.push('.');
            for &byte in ext {
                name.push(oem_char(byte, ext_lower));
            }
        }
        name
    }
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(field.len());
    let field = &field[..end];
    let len = field.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    &field[..len]
}

fn oem_char(byte: u8, lower: bool) -> char {
    let byte = if lower { byte.to_ascii_lowercase() } else { byte };
    cp437_to_char(byte)
}

impl LfnEntry {
    pub fn decode(raw: &[u8]) -> Self {
        let mut chars = [0u16; 13];
        for i in 0..5 {
            chars[i] = LittleEndian::read_u16(&raw[LDIR_NAME1 + i * 2..]);
        }
        for i in 0..6 {
            chars[5 + i] = LittleEndian::read_u16(&raw[LDIR_NAME2 + i * 2..]);
        }
        for i in 0..2 {
            chars[11 + i] = LittleEndian::read_u16(&raw[LDIR_NAME3 + i * 2..]);
        }
        Self {
            order: raw[LDIR_ORD],
            chars,
            attributes: raw[LDIR_ATTR],
            entry_type: raw[LDIR_TYPE],
            checksum: raw[LDIR_CHKSUM],
            cluster_low: LittleEndian::read_u16(&raw[LDIR_FST_CLUS_LO..]),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        raw[LDIR_ORD] = self.order;
        for i in 0..5 {
            LittleEndian::write_u16(&mut raw[LDIR_NAME1 + i * 2..], self.chars[i]);
        }
        raw[LDIR_ATTR] = self.attributes;
        raw[LDIR_TYPE] = self.entry_type;
        raw[LDIR_CHKSUM] = self.checksum;
        for i in 0..6 {
            LittleEndian::write_u16(&mut raw[LDIR_NAME2 + i * 2..], self.chars[5 + i]);
        }
        LittleEndian::write_u16(&mut raw[LDIR_FST_CLUS_LO..], self.cluster_low);
        for i in 0..2 {
            LittleEndian::write_u16(&mut raw[LDIR_NAME3 + i * 2..], self.chars[11 + i]);
        }
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        self.encode(&mut raw);
        raw
    }

    /// Attribute exactly the LFN marker, type zero and cluster field zero.
    pub fn is_valid(&self) -> bool {
        self.attributes == ATTR_LONG_NAME
            && self.entry_type == 0
            && self.cluster_low == 0
            && self.ordinal() != 0
    }

    pub fn ordinal(&self) -> u8 {
        self.order & LFN_ORDINAL_MASK
    }

    pub fn is_last(&self) -> bool {
        self.order & LFN_LAST_ENTRY != 0
    }

    /// Units carried by this record up to the 0x0000 terminator.
    pub fn name_units(&self) -> &[u16] {
        let len = self.chars.iter().position(|&c| c == 0).unwrap_or(13);
        &self.chars[..len]
    }
}

/// Checksum of an 8.3 name, stored in every LFN record that decorates it.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &byte in short_name {
        sum = ((sum >> 1) | ((sum & 1) << 7)).wrapping_add(byte);
    }
    sum
}
