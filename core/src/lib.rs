pub mod config;
pub mod device;
pub mod error;

pub use config::{FormatOptions, MountOptions, PhatConfig};
pub use device::{BlockDevice, FileDisk, Lba, MemoryDisk, SECTOR_SIZE};
pub use error::{PhatError, PhatResult};
