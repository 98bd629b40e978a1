// Write-back sector cache
// A small fixed pool of sector buffers; a dirty slot is always written back
// before it is handed to another LBA.

use log::{debug, trace, warn};
use phat_core::{BlockDevice, Lba, PhatError, PhatResult, SECTOR_SIZE};

/// Number of sector buffers in the pool.
pub const CACHE_SLOTS: usize = 8;

/// Read `buf.len() / 512` sectors from the device, mapping failures to `ReadFail`.
pub(crate) fn device_read<D: BlockDevice + ?Sized>(device: &mut D, lba: Lba, buf: &mut [u8]) -> PhatResult<()> {
    device.read_sectors(lba, buf).map_err(|e| {
        warn!("Device read at LBA {} failed: {}", lba, e);
        PhatError::ReadFail { lba }
    })
}

/// Write `buf.len() / 512` sectors to the device, mapping failures to `WriteFail`.
pub(crate) fn device_write<D: BlockDevice + ?Sized>(device: &mut D, lba: Lba, buf: &[u8]) -> PhatResult<()> {
    device.write_sectors(lba, buf).map_err(|e| {
        warn!("Device write at LBA {} failed: {}", lba, e);
        PhatError::WriteFail { lba }
    })
}

#[derive(Clone)]
struct CacheSlot {
    lba: Lba,
    valid: bool,
    sync: bool,  // false while the buffer holds data the device has not seen
    age: u64,
    data: [u8; SECTOR_SIZE],
}

impl CacheSlot {
    fn empty() -> Self {
        Self {
            lba: 0,
            valid: false,
            sync: true,
            age: 0,
            data: [0u8; SECTOR_SIZE],
        }
    }

    fn is_dirty(&self) -> bool {
        self.valid && !self.sync
    }
}

pub struct SectorCache {
    slots: Vec<CacheSlot>,
    clock: u64,
    write_enable: bool,
    hits: u64,
    misses: u64,
}

impl SectorCache {
    pub fn new(write_enable: bool) -> Self {
        Self {
            slots: vec![CacheSlot::empty(); CACHE_SLOTS],
            clock: 0,
            write_enable,
            hits: 0,
            misses: 0,
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn touch(&mut self, index: usize) {
        self.clock += 1;
        self.slots[index].age = self.clock;
    }

    fn lookup(&self, lba: Lba) -> Option<usize> {
        self.slots.iter().position(|s| s.valid && s.lba == lba)
    }

    fn write_back<D: BlockDevice + ?Sized>(&mut self, device: &mut D, index: usize) -> PhatResult<()> {
        let slot = &mut self.slots[index];
        if !slot.is_dirty() {
            return Ok(());
        }
        if !self.write_enable {
            return Err(PhatError::InternalError(format!(
                "dirty sector {} in the cache of a read-only mount",
                slot.lba
            )));
        }
        trace!("Writing back cached sector {}", slot.lba);
        if let Err(e) = device_write(device, slot.lba, &slot.data) {
            slot.valid = false;
            return Err(e);
        }
        slot.sync = true;
        Ok(())
    }

    /// Pick a slot for `lba`, writing back whatever it held. The returned
    /// slot is marked invalid until the caller fills it.
    fn claim<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba) -> PhatResult<usize> {
        let victim = match self.slots.iter().position(|s| !s.valid) {
            Some(free) => free,
            None => {
                let (oldest, _) = self
                    .slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.age)
                    .ok_or_else(|| PhatError::InternalError("empty sector cache".to_string()))?;
                debug!("Evicting sector {} for {}", self.slots[oldest].lba, lba);
                self.write_back(device, oldest)?;
                oldest
            }
        };
        let slot = &mut self.slots[victim];
        slot.valid = false;
        slot.sync = true;
        slot.lba = lba;
        Ok(victim)
    }

    fn load<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba) -> PhatResult<usize> {
        if let Some(index) = self.lookup(lba) {
            self.hits += 1;
            self.touch(index);
            return Ok(index);
        }
        self.misses += 1;
        let index = self.claim(device, lba)?;
        device_read(device, lba, &mut self.slots[index].data)?;
        self.slots[index].valid = true;
        self.touch(index);
        Ok(index)
    }

    /// Latest contents of `lba`.
    pub fn read<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba) -> PhatResult<&[u8]> {
        let index = self.load(device, lba)?;
        Ok(&self.slots[index].data)
    }

    /// Mutable view of `lba`; the slot is marked dirty.
    pub fn modify<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba) -> PhatResult<&mut [u8]> {
        if !self.write_enable {
            return Err(PhatError::ReadOnly(format!("sector {}", lba)));
        }
        let index = self.load(device, lba)?;
        let slot = &mut self.slots[index];
        slot.sync = false;
        Ok(&mut slot.data)
    }

    /// Replace the whole of `lba` without fetching it first.
    pub fn overwrite<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba, data: &[u8]) -> PhatResult<()> {
        if !self.write_enable {
            return Err(PhatError::ReadOnly(format!("sector {}", lba)));
        }
        let index = match self.lookup(lba) {
            Some(index) => index,
            None => self.claim(device, lba)?,
        };
        let slot = &mut self.slots[index];
        slot.data.copy_from_slice(&data[..SECTOR_SIZE]);
        slot.valid = true;
        slot.sync = false;
        self.touch(index);
        Ok(())
    }

    /// Multi-sector read straight from the device. Cached copies are newer
    /// than the medium and are laid over the result.
    pub fn read_direct<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba, buf: &mut [u8]) -> PhatResult<()> {
        device_read(device, lba, buf)?;
        let count = (buf.len() / SECTOR_SIZE) as Lba;
        for slot in self.slots.iter().filter(|s| s.valid && s.lba >= lba && s.lba < lba + count) {
            let at = (slot.lba - lba) as usize * SECTOR_SIZE;
            buf[at..at + SECTOR_SIZE].copy_from_slice(&slot.data);
        }
        Ok(())
    }

    /// Multi-sector write straight to the device. Cached copies are
    /// refreshed and become clean.
    pub fn write_direct<D: BlockDevice + ?Sized>(&mut self, device: &mut D, lba: Lba, buf: &[u8]) -> PhatResult<()> {
        if !self.write_enable {
            return Err(PhatError::ReadOnly(format!("sector {}", lba)));
        }
        device_write(device, lba, buf)?;
        let count = (buf.len() / SECTOR_SIZE) as Lba;
        for slot in self.slots.iter_mut().filter(|s| s.valid && s.lba >= lba && s.lba < lba + count) {
            let at = (slot.lba - lba) as usize * SECTOR_SIZE;
            slot.data.copy_from_slice(&buf[at..at + SECTOR_SIZE]);
            slot.sync = true;
        }
        Ok(())
    }

    /// Write every dirty slot back to the device.
    pub fn flush<D: BlockDevice + ?Sized>(&mut self, device: &mut D) -> PhatResult<()> {
        for index in 0..self.slots.len() {
            self.write_back(device, index)?;
        }
        Ok(())
    }

    pub fn dirty_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_dirty()).count()
    }

    /// Forget every slot; dirty data is dropped.
    pub fn invalidate(&mut self) {
        for slot in &mut self.slots {
            if slot.is_dirty() {
                warn!("Dropping unflushed sector {}", slot.lba);
            }
            *slot = CacheSlot::empty();
        }
    }
}
