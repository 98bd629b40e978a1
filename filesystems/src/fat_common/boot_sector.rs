// Boot sector (DBR) and FSInfo parsing/encoding for FAT12/16/32

use byteorder::{ByteOrder, LittleEndian};
use phat_core::{PhatError, PhatResult, SECTOR_SIZE};

use super::cluster_calc::{FatParams, FatType};
use super::constants::*;

/// Real-mode stub that prints a message and reboots on a key press.
/// Bytes 3..5 hold the message address and are patched per layout.
const BOOT_STUB: [u8; 29] = [
    0x0E,             // push cs
    0x1F,             // pop ds
    0xBE, 0x00, 0x00, // mov si, message
    0xAC,             // lodsb
    0x22, 0xC0,       // and al, al
    0x74, 0x0B,       // jz key_press
    0x56,             // push si
    0xB4, 0x0E,       // mov ah, 0eh
    0xBB, 0x07, 0x00, // mov bx, 0007h
    0xCD, 0x10,       // int 10h
    0x5E,             // pop si
    0xEB, 0xF0,       // jmp lodsb
    0x32, 0xE4,       // key_press: xor ah, ah
    0xCD, 0x16,       // int 16h
    0xCD, 0x19,       // int 19h
    0xEB, 0xFE,       // jmp $
];

const BOOT_MESSAGE: &[u8] =
    b"This is not a bootable disk.  Please insert a bootable floppy and\r\npress any key to try again ... \r\n\0";

/// Boot sectors are loaded at 0000:7C00.
const BOOT_LOAD_ADDRESS: u16 = 0x7C00;

fn write_boot_code(sector: &mut [u8], code_offset: usize) {
    let message_offset = code_offset + BOOT_STUB.len();
    let mut stub = BOOT_STUB;
    LittleEndian::write_u16(&mut stub[3..5], BOOT_LOAD_ADDRESS + message_offset as u16);
    sector[code_offset..message_offset].copy_from_slice(&stub);
    sector[message_offset..message_offset + BOOT_MESSAGE.len()].copy_from_slice(BOOT_MESSAGE);
}

/// Decoded BIOS parameter block plus the extended fields of either layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    pub jump_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entries: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub sectors_per_fat_16: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    // FAT32 only
    pub sectors_per_fat_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    // Extended boot record
    pub drive_number: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl BootSector {
    /// Structural check: signature, non-zero geometry and a jump instruction.
    pub fn is_dbr(sector: &[u8]) -> bool {
        if sector.len() < SECTOR_SIZE {
            return false;
        }
        LittleEndian::read_u16(&sector[BOOT_SIGNATURE_OFFSET..]) == BOOT_SIGNATURE
            && LittleEndian::read_u16(&sector[BPB_BYTES_PER_SEC..]) != 0
            && sector[BPB_SEC_PER_CLUS] != 0
            && LittleEndian::read_u16(&sector[BPB_RSVD_SEC_CNT..]) != 0
            && sector[BPB_NUM_FATS] != 0
            && (sector[BS_JMP_BOOT] == 0xEB || sector[BS_JMP_BOOT] == 0xE9)
    }

    /// Width named by the filesystem-type tag, if any.
    pub fn detect_fat_type(sector: &[u8]) -> Option<FatType> {
        let tag32 = &sector[BS32_FIL_SYS_TYPE..BS32_FIL_SYS_TYPE + 8];
        let tag16 = &sector[BS16_FIL_SYS_TYPE..BS16_FIL_SYS_TYPE + 8];
        if tag32 == FS_TYPE_FAT32 {
            Some(FatType::Fat32)
        } else if tag16 == FS_TYPE_FAT16 {
            Some(FatType::Fat16)
        } else if tag16 == FS_TYPE_FAT12 {
            Some(FatType::Fat12)
        } else {
            None
        }
    }

    /// Parse a DBR; anything that is not a FAT boot sector is `NotFat`.
    pub fn parse(sector: &[u8]) -> PhatResult<(Self, FatType)> {
        if !Self::is_dbr(sector) {
            return Err(PhatError::NotFat);
        }
        let fat_type = Self::detect_fat_type(sector).ok_or(PhatError::NotFat)?;

        let mut bs = BootSector {
            jump_boot: [sector[0], sector[1], sector[2]],
            oem_name: copy_array(&sector[BS_OEM_NAME..]),
            bytes_per_sector: LittleEndian::read_u16(&sector[BPB_BYTES_PER_SEC..]),
            sectors_per_cluster: sector[BPB_SEC_PER_CLUS],
            reserved_sectors: LittleEndian::read_u16(&sector[BPB_RSVD_SEC_CNT..]),
            num_fats: sector[BPB_NUM_FATS],
            root_entries: LittleEndian::read_u16(&sector[BPB_ROOT_ENT_CNT..]),
            total_sectors_16: LittleEndian::read_u16(&sector[BPB_TOT_SEC16..]),
            media: sector[BPB_MEDIA],
            sectors_per_fat_16: LittleEndian::read_u16(&sector[BPB_FAT_SZ16..]),
            sectors_per_track: LittleEndian::read_u16(&sector[BPB_SEC_PER_TRK..]),
            num_heads: LittleEndian::read_u16(&sector[BPB_NUM_HEADS..]),
            hidden_sectors: LittleEndian::read_u32(&sector[BPB_HIDD_SEC..]),
            total_sectors_32: LittleEndian::read_u32(&sector[BPB_TOT_SEC32..]),
            sectors_per_fat_32: 0,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info_sector: 0,
            backup_boot_sector: 0,
            drive_number: 0,
            volume_id: 0,
            volume_label: [b' '; 11],
            fs_type: *fat_type.fs_type_tag(),
        };

        match fat_type {
            FatType::Fat32 => {
                bs.sectors_per_fat_32 = LittleEndian::read_u32(&sector[BPB_FAT_SZ32..]);
                bs.ext_flags = LittleEndian::read_u16(&sector[BPB_EXT_FLAGS..]);
                bs.fs_version = LittleEndian::read_u16(&sector[BPB_FS_VER..]);
                bs.root_cluster = LittleEndian::read_u32(&sector[BPB_ROOT_CLUS..]);
                bs.fs_info_sector = LittleEndian::read_u16(&sector[BPB_FS_INFO..]);
                bs.backup_boot_sector = LittleEndian::read_u16(&sector[BPB_BK_BOOT_SEC..]);
                bs.drive_number = sector[BS32_DRV_NUM];
                bs.volume_id = LittleEndian::read_u32(&sector[BS32_VOL_ID..]);
                bs.volume_label = copy_array(&sector[BS32_VOL_LAB..]);
            }
            FatType::Fat12 | FatType::Fat16 => {
                bs.drive_number = sector[BS16_DRV_NUM];
                bs.volume_id = LittleEndian::read_u32(&sector[BS16_VOL_ID..]);
                bs.volume_label = copy_array(&sector[BS16_VOL_LAB..]);
            }
        }
        Ok((bs, fat_type))
    }

    /// Build the boot sector for a freshly laid out volume.
    pub fn for_format(params: &FatParams, hidden_sectors: u32, volume_id: u32, label: [u8; 11]) -> Self {
        let fat32 = params.fat_type == FatType::Fat32;
        BootSector {
            jump_boot: if fat32 { [0xEB, 0x58, 0x90] } else { [0xEB, 0x3C, 0x90] },
            oem_name: if fat32 { *b"MSDOS5.0" } else { *b"*-v4VIHC" },
            bytes_per_sector: STANDARD_BYTES_PER_SECTOR,
            sectors_per_cluster: params.sectors_per_cluster,
            reserved_sectors: params.reserved_sectors,
            num_fats: params.num_fats,
            root_entries: params.root_entries,
            total_sectors_16: if params.total_sectors <= 0xFFFF { params.total_sectors as u16 } else { 0 },
            media: params.media,
            sectors_per_fat_16: if fat32 { 0 } else { params.sectors_per_fat as u16 },
            sectors_per_track: params.sectors_per_track,
            num_heads: params.num_heads,
            hidden_sectors,
            total_sectors_32: if params.total_sectors > 0xFFFF { params.total_sectors } else { 0 },
            sectors_per_fat_32: if fat32 { params.sectors_per_fat } else { 0 },
            ext_flags: 0,
            fs_version: 0,
            root_cluster: if fat32 { FAT32_ROOT_CLUSTER } else { 0 },
            fs_info_sector: if fat32 { FAT32_FS_INFO_SECTOR } else { 0 },
            backup_boot_sector: if fat32 { FAT32_BACKUP_BOOT_SECTOR } else { 0 },
            drive_number: params.drive_number,
            volume_id,
            volume_label: label,
            fs_type: *params.fat_type.fs_type_tag(),
        }
    }

    pub fn encode(&self, fat_type: FatType) -> [u8; SECTOR_SIZE] {
        let mut s = [0u8; SECTOR_SIZE];
        s[BS_JMP_BOOT..BS_JMP_BOOT + 3].copy_from_slice(&self.jump_boot);
        s[BS_OEM_NAME..BS_OEM_NAME + 8].copy_from_slice(&self.oem_name);
        LittleEndian::write_u16(&mut s[BPB_BYTES_PER_SEC..], self.bytes_per_sector);
        s[BPB_SEC_PER_CLUS] = self.sectors_per_cluster;
        LittleEndian::write_u16(&mut s[BPB_RSVD_SEC_CNT..], self.reserved_sectors);
        s[BPB_NUM_FATS] = self.num_fats;
        LittleEndian::write_u16(&mut s[BPB_ROOT_ENT_CNT..], self.root_entries);
        LittleEndian::write_u16(&mut s[BPB_TOT_SEC16..], self.total_sectors_16);
        s[BPB_MEDIA] = self.media;
        LittleEndian::write_u16(&mut s[BPB_FAT_SZ16..], self.sectors_per_fat_16);
        LittleEndian::write_u16(&mut s[BPB_SEC_PER_TRK..], self.sectors_per_track);
        LittleEndian::write_u16(&mut s[BPB_NUM_HEADS..], self.num_heads);
        LittleEndian::write_u32(&mut s[BPB_HIDD_SEC..], self.hidden_sectors);
        LittleEndian::write_u32(&mut s[BPB_TOT_SEC32..], self.total_sectors_32);

        match fat_type {
            FatType::Fat32 => {
                LittleEndian::write_u32(&mut s[BPB_FAT_SZ32..], self.sectors_per_fat_32);
                LittleEndian::write_u16(&mut s[BPB_EXT_FLAGS..], self.ext_flags);
                LittleEndian::write_u16(&mut s[BPB_FS_VER..], self.fs_version);
                LittleEndian::write_u32(&mut s[BPB_ROOT_CLUS..], self.root_cluster);
                LittleEndian::write_u16(&mut s[BPB_FS_INFO..], self.fs_info_sector);
                LittleEndian::write_u16(&mut s[BPB_BK_BOOT_SEC..], self.backup_boot_sector);
                s[BS32_DRV_NUM] = self.drive_number;
                s[BS32_BOOT_SIG] = EXTENDED_BOOT_SIG;
                LittleEndian::write_u32(&mut s[BS32_VOL_ID..], self.volume_id);
                s[BS32_VOL_LAB..BS32_VOL_LAB + 11].copy_from_slice(&self.volume_label);
                s[BS32_FIL_SYS_TYPE..BS32_FIL_SYS_TYPE + 8].copy_from_slice(&self.fs_type);
                write_boot_code(&mut s, BS32_BOOT_CODE);
            }
            FatType::Fat12 | FatType::Fat16 => {
                s[BS16_DRV_NUM] = self.drive_number;
                s[BS16_BOOT_SIG] = EXTENDED_BOOT_SIG;
                LittleEndian::write_u32(&mut s[BS16_VOL_ID..], self.volume_id);
                s[BS16_VOL_LAB..BS16_VOL_LAB + 11].copy_from_slice(&self.volume_label);
                s[BS16_FIL_SYS_TYPE..BS16_FIL_SYS_TYPE + 8].copy_from_slice(&self.fs_type);
                write_boot_code(&mut s, BS16_BOOT_CODE);
            }
        }
        LittleEndian::write_u16(&mut s[BOOT_SIGNATURE_OFFSET..], BOOT_SIGNATURE);
        s
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    pub fn sectors_per_fat(&self) -> u32 {
        if self.sectors_per_fat_16 != 0 {
            self.sectors_per_fat_16 as u32
        } else {
            self.sectors_per_fat_32
        }
    }

    pub fn label(&self) -> String {
        String::from_utf8_lossy(&self.volume_label).trim_end().to_string()
    }
}

/// Volume label in boot-sector form: upper-cased, space padded to 11 bytes.
pub fn format_volume_label(label: Option<&str>) -> [u8; 11] {
    let mut result = [0x20u8; 11];
    let label = label.unwrap_or(DEFAULT_VOLUME_LABEL).to_uppercase();
    let bytes = label.as_bytes();
    let len = bytes.len().min(11);
    result[..len].copy_from_slice(&bytes[..len]);
    result
}

fn copy_array<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&src[..N]);
    out
}

/// FAT32 FSInfo sector contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    /// `None` when any of the three signatures is wrong.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        let lead = LittleEndian::read_u32(&sector[FSINFO_LEAD_SIG_OFFSET..]);
        let strukt = LittleEndian::read_u32(&sector[FSINFO_STRUCT_SIG_OFFSET..]);
        let trail = LittleEndian::read_u32(&sector[FSINFO_TRAIL_SIG_OFFSET..]);
        if lead != FSINFO_LEAD_SIG || strukt != FSINFO_STRUCT_SIG || trail != FSINFO_TRAIL_SIG {
            return None;
        }
        Some(Self {
            free_count: LittleEndian::read_u32(&sector[FSINFO_FREE_COUNT_OFFSET..]),
            next_free: LittleEndian::read_u32(&sector[FSINFO_NEXT_FREE_OFFSET..]),
        })
    }

    /// Update the counters in an existing FSInfo sector, keeping the rest.
    pub fn store(&self, sector: &mut [u8]) {
        LittleEndian::write_u32(&mut sector[FSINFO_FREE_COUNT_OFFSET..], self.free_count);
        LittleEndian::write_u32(&mut sector[FSINFO_NEXT_FREE_OFFSET..], self.next_free);
    }

    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut s = [0u8; SECTOR_SIZE];
        LittleEndian::write_u32(&mut s[FSINFO_LEAD_SIG_OFFSET..], FSINFO_LEAD_SIG);
        LittleEndian::write_u32(&mut s[FSINFO_STRUCT_SIG_OFFSET..], FSINFO_STRUCT_SIG);
        LittleEndian::write_u32(&mut s[FSINFO_TRAIL_SIG_OFFSET..], FSINFO_TRAIL_SIG);
        self.store(&mut s);
        s
    }
}
