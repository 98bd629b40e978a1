use thiserror::Error;

use crate::device::Lba;

/// Every status an engine call can end with.
///
/// Navigational outcomes (`EndOfDirectory`, `EndOfFatChain`, `EndOfFile`) are
/// part of the same taxonomy; see [`PhatError::is_navigational`].
#[derive(Debug, Error)]
pub enum PhatError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Driver error: {0}")]
    DriverError(String),

    #[error("Read failed at LBA {lba}")]
    ReadFail { lba: Lba },

    #[error("Write failed at LBA {lba}")]
    WriteFail { lba: Lba },

    #[error("Partition table error: {0}")]
    PartitionTableError(String),

    #[error("Not a FAT filesystem")]
    NotFat,

    #[error("FAT chain is corrupted: {0}")]
    FatError(String),

    #[error("Filesystem error: {0}")]
    FsError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("End of directory")]
    EndOfDirectory,

    #[error("End of FAT chain")]
    EndOfFatChain,

    #[error("End of file")]
    EndOfFile,

    #[error("Not enough space on the volume")]
    NotEnoughSpace,

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Directory already exists: {0}")]
    DirectoryAlreadyExists(String),

    #[error("Read-only: {0}")]
    ReadOnly(String),

    #[error("Name too long: {0}")]
    NameTooLong(String),

    #[error("Bad file name: {0:?}")]
    BadFileName(String),

    #[error("Cannot make filesystem: {0}")]
    CannotMakeFs(String),

    #[error("Disk already has a partition table")]
    DiskAlreadyInitialized,

    #[error("No free partition slots")]
    NoFreePartitions,

    #[error("Partition too small for a FAT filesystem")]
    PartitionTooSmall,

    #[error("The first sector is not an MBR")]
    NoMbr,

    #[error("Partition LBA range is outside the usable area")]
    PartitionLbaIllegal,

    #[error("Partition overlaps an existing one")]
    PartitionOverlapped,

    #[error("Partition index {0} is out of bounds")]
    PartitionIndexOutOfBound(usize),

    #[error("Device needs 64-bit LBA addressing")]
    NeedBigLba,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl PhatError {
    /// True for the statuses callers treat as normal loop termination.
    pub fn is_navigational(&self) -> bool {
        matches!(
            self,
            PhatError::EndOfDirectory | PhatError::EndOfFatChain | PhatError::EndOfFile
        )
    }

    /// True for "does not exist" outcomes of a lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PhatError::FileNotFound(_) | PhatError::DirectoryNotFound(_)
        )
    }
}

pub type PhatResult<T> = Result<T, PhatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigational_statuses() {
        assert!(PhatError::EndOfDirectory.is_navigational());
        assert!(PhatError::EndOfFatChain.is_navigational());
        assert!(PhatError::EndOfFile.is_navigational());
        assert!(!PhatError::NotFat.is_navigational());
        assert!(!PhatError::FileNotFound("a".into()).is_navigational());
    }

    #[test]
    fn test_messages() {
        assert_eq!(PhatError::NotFat.to_string(), "Not a FAT filesystem");
        assert_eq!(
            PhatError::ReadFail { lba: 42 }.to_string(),
            "Read failed at LBA 42"
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(PhatError::from(io).to_string().contains("boom"));
    }
}
