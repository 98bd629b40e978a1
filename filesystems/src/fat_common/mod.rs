// On-disk structures shared by FAT12, FAT16 and FAT32

pub mod boot_sector;
pub mod cluster_calc;
pub mod codepage;
pub mod constants;
pub mod directory;
pub mod long_names;
pub mod timestamps;

pub use boot_sector::{format_volume_label, BootSector, FsInfo};
pub use cluster_calc::{calculate_fat_params, FatParams, FatType};
pub use directory::{attributes, lfn_checksum, DirRecord, LfnEntry, ShortEntry};
pub use long_names::{fit_83, is_valid_filename, ShortName};
pub use timestamps::{FatDate, FatDateTime, FatTime};
