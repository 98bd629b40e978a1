// FAT filesystem constants shared between FAT12, FAT16 and FAT32

// Boot sector offsets
pub const BS_JMP_BOOT: usize = 0x00;
pub const BS_OEM_NAME: usize = 0x03;
pub const BPB_BYTES_PER_SEC: usize = 0x0B;
pub const BPB_SEC_PER_CLUS: usize = 0x0D;
pub const BPB_RSVD_SEC_CNT: usize = 0x0E;
pub const BPB_NUM_FATS: usize = 0x10;
pub const BPB_ROOT_ENT_CNT: usize = 0x11;
pub const BPB_TOT_SEC16: usize = 0x13;
pub const BPB_MEDIA: usize = 0x15;
pub const BPB_FAT_SZ16: usize = 0x16;
pub const BPB_SEC_PER_TRK: usize = 0x18;
pub const BPB_NUM_HEADS: usize = 0x1A;
pub const BPB_HIDD_SEC: usize = 0x1C;
pub const BPB_TOT_SEC32: usize = 0x20;

// FAT12/16 extended BPB (starts at 36)
pub const BS16_DRV_NUM: usize = 0x24;
pub const BS16_BOOT_SIG: usize = 0x26;
pub const BS16_VOL_ID: usize = 0x27;
pub const BS16_VOL_LAB: usize = 0x2B;
pub const BS16_FIL_SYS_TYPE: usize = 0x36;
pub const BS16_BOOT_CODE: usize = 0x3E;

// FAT32 extended BPB (starts at 36)
pub const BPB_FAT_SZ32: usize = 0x24;
pub const BPB_EXT_FLAGS: usize = 0x28;
pub const BPB_FS_VER: usize = 0x2A;
pub const BPB_ROOT_CLUS: usize = 0x2C;
pub const BPB_FS_INFO: usize = 0x30;
pub const BPB_BK_BOOT_SEC: usize = 0x32;
pub const BS32_DRV_NUM: usize = 0x40;
pub const BS32_BOOT_SIG: usize = 0x42;
pub const BS32_VOL_ID: usize = 0x43;
pub const BS32_VOL_LAB: usize = 0x47;
pub const BS32_FIL_SYS_TYPE: usize = 0x52;
pub const BS32_BOOT_CODE: usize = 0x5A;

pub const EXT_FLAGS_NO_MIRROR: u16 = 0x0080;  // Only the active FAT is in use
pub const EXT_FLAGS_ACTIVE_FAT: u16 = 0x000F;
pub const EXTENDED_BOOT_SIG: u8 = 0x29;

// Boot sector signature
pub const BOOT_SIGNATURE: u16 = 0xAA55;
pub const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;

// FSInfo sector
pub const FSINFO_LEAD_SIG: u32 = 0x41615252;
pub const FSINFO_STRUCT_SIG: u32 = 0x61417272;
pub const FSINFO_TRAIL_SIG: u32 = 0xAA550000;
pub const FSINFO_LEAD_SIG_OFFSET: usize = 0;
pub const FSINFO_STRUCT_SIG_OFFSET: usize = 484;
pub const FSINFO_FREE_COUNT_OFFSET: usize = 488;
pub const FSINFO_NEXT_FREE_OFFSET: usize = 492;
pub const FSINFO_TRAIL_SIG_OFFSET: usize = 508;
pub const FSINFO_UNKNOWN: u32 = 0xFFFFFFFF;

// Filesystem type tags
pub const FS_TYPE_FAT12: &[u8; 8] = b"FAT12   ";
pub const FS_TYPE_FAT16: &[u8; 8] = b"FAT16   ";
pub const FS_TYPE_FAT32: &[u8; 8] = b"FAT32   ";

// FAT entry values
pub const FAT12_EOC: u32 = 0x0FF8;
pub const FAT12_BAD: u32 = 0x0FF7;
pub const FAT16_EOC: u32 = 0xFFF8;  // End of chain marker
pub const FAT16_BAD: u32 = 0xFFF7;  // Bad cluster marker
pub const FAT32_EOC: u32 = 0x0FFFFFF8;  // End of chain marker (28 bits)
pub const FAT32_BAD: u32 = 0x0FFFFFF7;  // Bad cluster marker (28 bits)
pub const FAT32_ENTRY_MASK: u32 = 0x0FFFFFFF;

// Clean shutdown bits live in FAT entry 1
pub const FAT16_CLEAN_BIT: u32 = 0x8000;
pub const FAT32_CLEAN_BIT: u32 = 0x08000000;

// Largest cluster count the formatter will lay out per width
pub const FAT12_MAX_CLUSTER: u32 = 0xFF0;
pub const FAT16_MAX_CLUSTER: u32 = 0xFFF0;
pub const FAT32_MAX_CLUSTER: u32 = 0x0FFFFFF0;

// Standard values
pub const STANDARD_BYTES_PER_SECTOR: u16 = 512;
pub const FIRST_DATA_CLUSTER: u32 = 2;
pub const FAT32_ROOT_CLUSTER: u32 = 2;  // Standard root directory cluster for FAT32
pub const FAT32_FS_INFO_SECTOR: u16 = 1;  // FSInfo sector location
pub const FAT32_BACKUP_BOOT_SECTOR: u16 = 6;  // Backup boot sector location
pub const FAT32_RESERVED_SECTORS: u16 = 32;
pub const FAT1216_RESERVED_SECTORS: u16 = 1;
pub const DEFAULT_NUM_FATS: u8 = 2;
pub const FAT12_DEFAULT_ROOT_ENTRIES: u16 = 224;
pub const FAT16_DEFAULT_ROOT_ENTRIES: u16 = 512;
pub const DEFAULT_VOLUME_LABEL: &str = "NO NAME";

// Media descriptors
pub const MEDIA_FIXED: u8 = 0xF8;  // Fixed disk
pub const MEDIA_REMOVABLE: u8 = 0xF0;  // Removable media

// Directory entries
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRIES_PER_SECTOR: usize = 512 / DIR_ENTRY_SIZE;
pub const DIR_ENTRY_END: u8 = 0x00;
pub const DIR_ENTRY_DELETED: u8 = 0xE5;
pub const DIR_ENTRY_KANJI_E5: u8 = 0x05;  // Stored in place of a leading 0xE5
pub const LFN_LAST_ENTRY: u8 = 0x40;
pub const LFN_ORDINAL_MASK: u8 = 0x1F;
pub const LFN_CHARS_PER_ENTRY: usize = 13;
pub const MAX_LFN_LENGTH: usize = 255;

// Case-info byte (offset 12 of a short entry)
pub const CI_EXTENSION_IS_LOWER: u8 = 0x10;
pub const CI_BASENAME_IS_LOWER: u8 = 0x08;

// Partition type codes for MBR
pub const PARTITION_TYPE_FAT12: u8 = 0x01;
pub const PARTITION_TYPE_FAT16: u8 = 0x06;  // FAT16
pub const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;  // FAT32 LBA
pub const PARTITION_TYPE_GPT_PROTECTIVE: u8 = 0xEE;
