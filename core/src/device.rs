// Block device contract used by the FAT engine
// Sector-granular transfers only; all addresses are absolute LBAs on the medium

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fixed transfer unit of every device.
pub const SECTOR_SIZE: usize = 512;

/// Logical block address, zero-based sector index on the device.
pub type Lba = u32;

/// Raw sector access to a concrete medium (SD card, disk image, virtual disk).
///
/// `buf.len()` must be a multiple of [`SECTOR_SIZE`]; the sector count of a
/// transfer is `buf.len() / SECTOR_SIZE` and the sectors are contiguous.
pub trait BlockDevice {
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
    fn read_sectors(&mut self, lba: Lba, buf: &mut [u8]) -> io::Result<()>;
    fn write_sectors(&mut self, lba: Lba, buf: &[u8]) -> io::Result<()>;
    fn capacity_sectors(&self) -> Lba;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
    fn read_sectors(&mut self, lba: Lba, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_sectors(lba, buf)
    }
    fn write_sectors(&mut self, lba: Lba, buf: &[u8]) -> io::Result<()> {
        (**self).write_sectors(lba, buf)
    }
    fn capacity_sectors(&self) -> Lba {
        (**self).capacity_sectors()
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
    fn read_sectors(&mut self, lba: Lba, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_sectors(lba, buf)
    }
    fn write_sectors(&mut self, lba: Lba, buf: &[u8]) -> io::Result<()> {
        (**self).write_sectors(lba, buf)
    }
    fn capacity_sectors(&self) -> Lba {
        (**self).capacity_sectors()
    }
}

fn check_transfer(lba: Lba, len: usize, capacity: Lba) -> io::Result<()> {
    if len % SECTOR_SIZE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("transfer of {} bytes is not sector aligned", len),
        ));
    }
    let count = (len / SECTOR_SIZE) as u64;
    if lba as u64 + count > capacity as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("LBA {} + {} sectors is past the end of the device", lba, count),
        ));
    }
    Ok(())
}

/// Disk image stored in a regular file.
pub struct FileDisk {
    path: PathBuf,
    file: Option<File>,
    capacity: Lba,
}

impl FileDisk {
    /// Use an existing image; its length decides the capacity.
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)?.len();
        if len % SECTOR_SIZE as u64 != 0 {
            warn!("Image {} is not a whole number of sectors", path.display());
        }
        let sectors = len / SECTOR_SIZE as u64;
        if sectors > Lba::MAX as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "image needs 64-bit LBA addressing",
            ));
        }
        Ok(Self {
            path,
            file: None,
            capacity: sectors as Lba,
        })
    }

    /// Create (or truncate) an image of `sectors` zeroed sectors.
    pub fn create<P: AsRef<Path>>(path: P, sectors: Lba) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(sectors as u64 * SECTOR_SIZE as u64)?;
        debug!("Created image {} with {} sectors", path.display(), sectors);
        Ok(Self {
            path,
            file: None,
            capacity: sectors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device is not open"))
    }
}

impl BlockDevice for FileDisk {
    fn open(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            debug!("Opened image {}", self.path.display());
            self.file = Some(file);
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
            debug!("Closed image {}", self.path.display());
        }
        Ok(())
    }

    fn read_sectors(&mut self, lba: Lba, buf: &mut [u8]) -> io::Result<()> {
        check_transfer(lba, buf.len(), self.capacity)?;
        let file = self.file()?;
        file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        file.read_exact(buf)
    }

    fn write_sectors(&mut self, lba: Lba, buf: &[u8]) -> io::Result<()> {
        check_transfer(lba, buf.len(), self.capacity)?;
        let file = self.file()?;
        file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        file.write_all(buf)
    }

    fn capacity_sectors(&self) -> Lba {
        self.capacity
    }
}

/// In-memory image, handy for tests and for hosts without storage.
#[derive(Debug, Clone)]
pub struct MemoryDisk {
    data: Vec<u8>,
}

impl MemoryDisk {
    pub fn new(sectors: Lba) -> Self {
        Self {
            data: vec![0u8; sectors as usize * SECTOR_SIZE],
        }
    }

    /// Wrap an existing image; trailing partial sectors are dropped.
    pub fn from_bytes(mut data: Vec<u8>) -> Self {
        let whole = data.len() - data.len() % SECTOR_SIZE;
        data.truncate(whole);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Borrow one sector of the image directly.
    pub fn sector(&self, lba: Lba) -> &[u8] {
        let start = lba as usize * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl BlockDevice for MemoryDisk {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_sectors(&mut self, lba: Lba, buf: &mut [u8]) -> io::Result<()> {
        check_transfer(lba, buf.len(), self.capacity_sectors())?;
        let start = lba as usize * SECTOR_SIZE;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: Lba, buf: &[u8]) -> io::Result<()> {
        check_transfer(lba, buf.len(), self.capacity_sectors())?;
        let start = lba as usize * SECTOR_SIZE;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn capacity_sectors(&self) -> Lba {
        (self.data.len() / SECTOR_SIZE) as Lba
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_memory_disk_roundtrip() {
        let mut disk = MemoryDisk::new(8);
        let data = [0xA5u8; SECTOR_SIZE * 2];
        disk.write_sectors(3, &data).unwrap();

        let mut back = [0u8; SECTOR_SIZE * 2];
        disk.read_sectors(3, &mut back).unwrap();
        assert_eq!(back[..], data[..]);
        assert_eq!(disk.sector(2), &[0u8; SECTOR_SIZE][..]);
    }

    #[test]
    fn test_memory_disk_bounds() {
        let mut disk = MemoryDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE * 2];
        assert!(disk.read_sectors(3, &mut buf).is_err());
        assert!(disk.read_sectors(0, &mut buf[..100]).is_err());
    }

    #[test]
    fn test_file_disk() {
        let temp = NamedTempFile::new().unwrap();
        let mut disk = FileDisk::create(temp.path(), 16).unwrap();
        assert_eq!(disk.capacity_sectors(), 16);

        disk.open().unwrap();
        let sector = [0x42u8; SECTOR_SIZE];
        disk.write_sectors(15, &sector).unwrap();
        disk.close().unwrap();

        let mut reopened = FileDisk::new(temp.path()).unwrap();
        reopened.open().unwrap();
        let mut back = [0u8; SECTOR_SIZE];
        reopened.read_sectors(15, &mut back).unwrap();
        assert_eq!(back, sector);
    }

    #[test]
    fn test_file_disk_requires_open() {
        let temp = NamedTempFile::new().unwrap();
        let mut disk = FileDisk::create(temp.path(), 2).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(disk.read_sectors(0, &mut buf).is_err());
    }
}
