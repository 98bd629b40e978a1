// File handles
// Byte-granular reads and writes over a cluster chain. Whole aligned sectors
// go straight to the device; partial sectors go through a per-handle buffer.

use log::{debug, info};
use phat_core::{BlockDevice, Lba, PhatError, PhatResult, SECTOR_SIZE};

use crate::dir_cursor::{DirCursor, DirItem};
use crate::fat_common::attributes::*;
use crate::fat_common::ShortEntry;
use crate::path_resolver::{normalize_path, Lookup};
use crate::volume::Volume;

/// Access requested when opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Read and write; creates the file when it is missing.
    ReadWrite,
}

/// An open file. Handles hold no borrow of the volume; every operation takes
/// the volume and the handle together.
pub struct FileHandle {
    dir: DirCursor,
    slot: u32,
    path: String,
    entry: ShortEntry,
    first_cluster: u32,
    current_cluster: u32,
    cluster_index: u32,
    position: u32,
    size: u32,
    writable: bool,
    modified: bool,
    buffer: [u8; SECTOR_SIZE],
    buffer_lba: Option<Lba>,
}

impl FileHandle {
    fn new(dir_start: u32, item: DirItem, path: String, writable: bool) -> Self {
        let first_cluster = item.first_cluster();
        Self {
            dir: DirCursor::new(dir_start),
            slot: item.short_slot,
            path,
            first_cluster,
            current_cluster: first_cluster,
            cluster_index: 0,
            position: 0,
            size: item.size(),
            entry: item.entry,
            writable,
            modified: false,
            buffer: [0; SECTOR_SIZE],
            buffer_lba: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn tell(&self) -> u32 {
        self.position
    }

    /// Move the position. Seeking past the end is allowed; a later write
    /// zero-fills the gap.
    pub fn seek(&mut self, position: u32) {
        self.position = position;
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.size
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn attributes(&self) -> u8 {
        self.entry.attributes
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("position", &self.position)
            .field("size", &self.size)
            .field("first_cluster", &self.first_cluster)
            .field("writable", &self.writable)
            .finish()
    }
}

impl<D: BlockDevice> Volume<D> {
    pub fn open_file(&mut self, path: &str, mode: OpenMode) -> PhatResult<FileHandle> {
        let display = normalize_path(path);
        if mode == OpenMode::ReadWrite && !self.is_writable() {
            return Err(PhatError::ReadOnly(display));
        }
        match self.lookup(path)? {
            Lookup::Root => Err(PhatError::IsADirectory(display)),
            Lookup::Found { item, .. } if item.is_directory() => Err(PhatError::IsADirectory(display)),
            Lookup::Found { parent, item } => {
                let writable = mode == OpenMode::ReadWrite && item.attributes() & ATTR_READ_ONLY == 0;
                debug!("Opened {} ({} bytes, writable: {})", display, item.size(), writable);
                Ok(FileHandle::new(parent, item, display, writable))
            }
            Lookup::Missing { .. } if mode == OpenMode::Read => Err(PhatError::FileNotFound(display)),
            Lookup::Missing { parent, name } => {
                self.begin_write()?;
                let entry = ShortEntry::new([b' '; 11], ATTR_ARCHIVE, 0, self.now());
                let item = self.create_entry(parent, &name, entry)?;
                info!("Created {}", display);
                Ok(FileHandle::new(parent, item, display, true))
            }
        }
    }

    /// Rewrite the handle's directory entry from its in-memory copy.
    fn store_entry(&mut self, fh: &mut FileHandle) -> PhatResult<()> {
        let raw = fh.entry.to_bytes();
        self.write_slot(&mut fh.dir, fh.slot, &raw)
    }

    /// The `index`-th cluster of the file, extending the chain when
    /// `allocate` is set.
    fn file_cluster(&mut self, fh: &mut FileHandle, index: u32, allocate: bool) -> PhatResult<u32> {
        if fh.first_cluster == 0 {
            if !allocate {
                return Err(PhatError::FatError(format!("{} has no clusters", fh.path)));
            }
            let cluster = self.allocate_cluster(None)?;
            fh.first_cluster = cluster;
            fh.current_cluster = cluster;
            fh.cluster_index = 0;
            // Link the chain to the entry right away so it is never orphaned
            fh.entry.first_cluster = cluster;
            self.store_entry(fh)?;
        }
        if index < fh.cluster_index {
            fh.current_cluster = fh.first_cluster;
            fh.cluster_index = 0;
        }
        while fh.cluster_index < index {
            let next = match self.next_cluster(fh.current_cluster) {
                Ok(next) => next,
                Err(PhatError::EndOfFatChain) if allocate => self.extend_chain(fh.current_cluster)?,
                Err(PhatError::EndOfFatChain) => {
                    return Err(PhatError::FatError(format!(
                        "chain of {} is shorter than its size",
                        fh.path
                    )));
                }
                Err(e) => return Err(e),
            };
            fh.current_cluster = next;
            fh.cluster_index += 1;
        }
        Ok(fh.current_cluster)
    }

    /// Device sector holding byte `position` of the file, plus the offset
    /// within it and the sectors left in the cluster from there.
    fn locate(&mut self, fh: &mut FileHandle, position: u32, allocate: bool) -> PhatResult<(Lba, usize, u32)> {
        let cluster_bytes = self.geometry.cluster_bytes();
        let cluster = self.file_cluster(fh, position / cluster_bytes, allocate)?;
        let in_cluster = position % cluster_bytes;
        let sector = in_cluster / SECTOR_SIZE as u32;
        let lba = self.geometry.cluster_to_lba(cluster) + sector;
        let left = self.geometry.sectors_per_cluster - sector;
        Ok((lba, (in_cluster as usize) % SECTOR_SIZE, left))
    }

    fn load_buffer(&mut self, fh: &mut FileHandle, lba: Lba) -> PhatResult<()> {
        if fh.buffer_lba != Some(lba) {
            self.cache.read_direct(&mut self.device, lba, &mut fh.buffer)?;
            fh.buffer_lba = Some(lba);
        }
        Ok(())
    }

    /// Read from the current position. Returns the bytes read, which is
    /// short only at end of file; `EndOfFile` when nothing is left.
    pub fn read(&mut self, fh: &mut FileHandle, buf: &mut [u8]) -> PhatResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if fh.position >= fh.size {
            return Err(PhatError::EndOfFile);
        }
        let wanted = buf.len().min((fh.size - fh.position) as usize);
        let mut done = 0;
        while done < wanted {
            let position = fh.position;
            let (lba, offset, left) = self.locate(fh, position, false)?;
            let remaining = wanted - done;
            let len = if offset == 0 && remaining >= SECTOR_SIZE {
                let sectors = (remaining / SECTOR_SIZE).min(left as usize);
                let len = sectors * SECTOR_SIZE;
                self.cache.read_direct(&mut self.device, lba, &mut buf[done..done + len])?;
                len
            } else {
                self.load_buffer(fh, lba)?;
                let len = (SECTOR_SIZE - offset).min(remaining);
                buf[done..done + len].copy_from_slice(&fh.buffer[offset..offset + len]);
                len
            };
            done += len;
            fh.position += len as u32;
        }
        Ok(done)
    }

    fn write_at(&mut self, fh: &mut FileHandle, data: &[u8]) -> PhatResult<()> {
        let mut done = 0;
        while done < data.len() {
            let position = fh.position;
            let (lba, offset, left) = self.locate(fh, position, true)?;
            let remaining = data.len() - done;
            let len = if offset == 0 && remaining >= SECTOR_SIZE {
                let sectors = (remaining / SECTOR_SIZE).min(left as usize);
                let len = sectors * SECTOR_SIZE;
                self.cache.write_direct(&mut self.device, lba, &data[done..done + len])?;
                if matches!(fh.buffer_lba, Some(b) if b >= lba && b < lba + sectors as Lba) {
                    fh.buffer_lba = None;
                }
                len
            } else {
                if fh.buffer_lba != Some(lba) {
                    let sector_start = position - offset as u32;
                    if sector_start < fh.size {
                        self.cache.read_direct(&mut self.device, lba, &mut fh.buffer)?;
                    } else {
                        fh.buffer.fill(0);
                    }
                    fh.buffer_lba = Some(lba);
                }
                let len = (SECTOR_SIZE - offset).min(remaining);
                fh.buffer[offset..offset + len].copy_from_slice(&data[done..done + len]);
                self.cache.write_direct(&mut self.device, lba, &fh.buffer)?;
                len
            };
            done += len;
            fh.position += len as u32;
            fh.size = fh.size.max(fh.position);
            fh.modified = true;
        }
        Ok(())
    }

    /// Write at the current position, growing the file as needed. A gap left
    /// by seeking past the end is filled with zeros first.
    pub fn write(&mut self, fh: &mut FileHandle, data: &[u8]) -> PhatResult<usize> {
        if !fh.writable {
            return Err(PhatError::ReadOnly(fh.path.clone()));
        }
        if data.is_empty() {
            return Ok(0);
        }
        if fh.position as u64 + data.len() as u64 > u32::MAX as u64 {
            return Err(PhatError::InvalidParameter(format!(
                "{} would exceed the 4 GiB file size limit",
                fh.path
            )));
        }
        self.begin_write()?;

        if fh.position > fh.size {
            let target = fh.position;
            fh.position = fh.size;
            let zeros = [0u8; 8 * SECTOR_SIZE];
            while fh.position < target {
                let len = ((target - fh.position) as usize).min(zeros.len());
                self.write_at(fh, &zeros[..len])?;
            }
        }
        self.write_at(fh, data)?;
        Ok(data.len())
    }

    /// Cut the file at the current position, freeing the clusters past it.
    pub fn truncate(&mut self, fh: &mut FileHandle) -> PhatResult<()> {
        if !fh.writable {
            return Err(PhatError::ReadOnly(fh.path.clone()));
        }
        let new_size = fh.position;
        if new_size >= fh.size {
            return Ok(());
        }
        self.begin_write()?;

        if new_size == 0 {
            if fh.first_cluster != 0 {
                let first = fh.first_cluster;
                fh.first_cluster = 0;
                fh.entry.first_cluster = 0;
                fh.entry.file_size = 0;
                self.store_entry(fh)?;
                self.free_chain(first)?;
            }
        } else {
            let keep = (new_size - 1) / self.geometry.cluster_bytes();
            let last = self.file_cluster(fh, keep, false)?;
            self.truncate_chain(last)?;
        }

        debug!("Truncated {} from {} to {} bytes", fh.path, fh.size, new_size);
        fh.size = new_size;
        fh.current_cluster = fh.first_cluster;
        fh.cluster_index = 0;
        fh.buffer_lba = None;
        fh.modified = true;
        Ok(())
    }

    /// Finish with a handle. On a writable mount the access date is
    /// refreshed; size, first cluster and modification time only when the
    /// file was changed. An access-date-only update leaves the clean flag
    /// alone.
    pub fn close(&mut self, mut fh: FileHandle) -> PhatResult<()> {
        if !self.is_writable() {
            return Ok(());
        }
        let now = self.now();
        if !fh.modified && fh.entry.accessed == now.date {
            return Ok(());
        }
        fh.entry.accessed = now.date;
        if fh.modified {
            self.begin_write()?;
            fh.entry.modified = now;
            fh.entry.file_size = fh.size;
            fh.entry.first_cluster = fh.first_cluster;
            fh.entry.attributes |= ATTR_ARCHIVE;
        }
        self.store_entry(&mut fh)?;
        debug!("Closed {} ({} bytes)", fh.path, fh.size);
        Ok(())
    }

    /// Whole contents of the file at `path`.
    pub fn read_file(&mut self, path: &str) -> PhatResult<Vec<u8>> {
        let mut fh = self.open_file(path, OpenMode::Read)?;
        let mut data = vec![0u8; fh.size() as usize];
        let mut filled = 0;
        while filled < data.len() {
            match self.read(&mut fh, &mut data[filled..]) {
                Ok(n) => filled += n,
                Err(e) if e.is_navigational() => break,
                Err(e) => return Err(e),
            }
        }
        data.truncate(filled);
        self.close(fh)?;
        Ok(data)
    }

    /// Replace the contents of `path`, creating it when missing.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> PhatResult<()> {
        let mut fh = self.open_file(path, OpenMode::ReadWrite)?;
        self.truncate(&mut fh)?;
        self.write(&mut fh, data)?;
        self.close(fh)
    }
}
