// Test helpers for filesystem testing

use phat_core::{BlockDevice, FormatOptions, Lba, MemoryDisk, SECTOR_SIZE};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crate::formatter::format_volume;
use crate::volume::Volume;

/// One transfer seen by a [`RecordingDisk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskOp {
    Read { lba: Lba, count: usize },
    Write { lba: Lba, count: usize, head: [u8; 4] },
}

pub type DiskLog = Rc<RefCell<Vec<DiskOp>>>;

/// Device wrapper that records every transfer in order.
pub struct RecordingDisk<D> {
    inner: D,
    log: DiskLog,
    fail_writes: bool,
}

impl<D: BlockDevice> RecordingDisk<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            log: Rc::new(RefCell::new(Vec::new())),
            fail_writes: false,
        }
    }

    pub fn log(&self) -> DiskLog {
        Rc::clone(&self.log)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl<D: BlockDevice> BlockDevice for RecordingDisk<D> {
    fn open(&mut self) -> io::Result<()> {
        self.inner.open()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }

    fn read_sectors(&mut self, lba: Lba, buf: &mut [u8]) -> io::Result<()> {
        self.log.borrow_mut().push(DiskOp::Read { lba, count: buf.len() / SECTOR_SIZE });
        self.inner.read_sectors(lba, buf)
    }

    fn write_sectors(&mut self, lba: Lba, buf: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let mut head = [0u8; 4];
        head.copy_from_slice(&buf[..4]);
        self.log.borrow_mut().push(DiskOp::Write { lba, count: buf.len() / SECTOR_SIZE, head });
        self.inner.write_sectors(lba, buf)
    }

    fn capacity_sectors(&self) -> Lba {
        self.inner.capacity_sectors()
    }
}

/// Unpartitioned in-memory volume of the given width.
pub fn formatted_volume(sectors: Lba, fat_bits: u8) -> Volume<MemoryDisk> {
    formatted_with(sectors, FormatOptions::with_fat_bits(fat_bits))
}

pub fn formatted_with(sectors: Lba, options: FormatOptions) -> Volume<MemoryDisk> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (volume, _) = format_volume(MemoryDisk::new(sectors), &options).unwrap();
    volume
}
