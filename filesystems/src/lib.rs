// FAT12/16/32 filesystem engine over any BlockDevice

// On-disk structures shared by every FAT width
pub mod fat_common;

// Device access
pub mod sector_cache;
pub mod partitioner;

// Volume state and the FAT itself
pub mod volume;
pub mod fat_table;
mod cluster_chain;

// Directories and files
pub mod dir_cursor;
pub mod dir_ops;
pub mod path_resolver;
pub mod file_ops;

pub mod formatter;

#[cfg(test)]
pub mod test_helpers;

pub use dir_cursor::{DirCursor, DirItem};
pub use fat_common::{FatDate, FatDateTime, FatTime, FatType};
pub use fat_table::FatEntry;
pub use file_ops::{FileHandle, OpenMode};
pub use formatter::{format_volume, FormatOutcome};
pub use partitioner::{create_partition, initialize_mbr, usable_lba_range, Mbr, PartitionEntry};
pub use path_resolver::{file_name, normalize_path, parent_path};
pub use volume::{Geometry, Volume, VolumeInfo};
